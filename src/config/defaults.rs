//! System-wide default constants.
//!
//! Centralises the tunables documented for operators. Every value here can be
//! overridden from `plane_config.toml` or the matching `PLANE_*` env var.

// ============================================================================
// Server
// ============================================================================

pub const SERVER_ADDR: &str = "0.0.0.0:8080";

// ============================================================================
// Probing
// ============================================================================

/// Probe interval used when a descriptor does not declare one (ms).
pub const PROBE_INTERVAL_MS: u64 = 10_000;

/// Hard timeout on a single liveness probe (ms).
pub const PROBE_TIMEOUT_MS: u64 = 3_000;

/// Consecutive probe failures before a service is marked `Failed`.
pub const PROBE_FAILURE_THRESHOLD: u32 = 3;

// ============================================================================
// Circuit Breaker
// ============================================================================

pub const BREAKER_FAILURE_THRESHOLD: u32 = 5;

/// Time an open breaker waits before granting a trial call (ms).
pub const BREAKER_COOLDOWN_MS: u64 = 30_000;

// ============================================================================
// Self-Healing
// ============================================================================

/// Orchestrator tick (ms).
pub const HEALING_TICK_MS: u64 = 5_000;

pub const MAX_RESTARTS_PER_WINDOW: u32 = 3;

/// Sliding window for the restart quota (ms). 300 000 = 5 minutes.
pub const RESTART_WINDOW_MS: u64 = 300_000;

/// How long to wait for a restarted service to report healthy (ms).
pub const GRACE_PERIOD_MS: u64 = 10_000;

/// Re-probe cadence inside the grace period (ms).
pub const REPROBE_INTERVAL_MS: u64 = 1_000;

/// Hard timeout on invoking the external supervisor (ms).
pub const RESTART_TIMEOUT_MS: u64 = 30_000;

/// Restart attempts per failure episode (initial restart + one retry).
pub const ATTEMPTS_PER_EPISODE: u32 = 2;

/// Base delay between restart attempts in one episode, doubled each attempt (ms).
pub const RESTART_BACKOFF_MS: u64 = 1_000;

/// Healing log capacity (actions).
pub const HEALING_LOG_CAPACITY: usize = 1_000;

// ============================================================================
// Event Bus
// ============================================================================

/// Event ring-buffer capacity.
pub const BUS_HISTORY_CAPACITY: usize = 100;

/// Time box for a single subscriber invocation (ms).
pub const HANDLER_TIMEOUT_MS: u64 = 5_000;

// ============================================================================
// Analytics
// ============================================================================

/// Hard cap on the task outcome series.
pub const ANALYTICS_MAX_ENTRIES: usize = 10_000;
