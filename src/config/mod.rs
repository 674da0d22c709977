//! Control Plane Configuration Module
//!
//! Provides every tunable of the plane (probe cadence, breaker policy, restart
//! quota, buffer sizes) as TOML values with documented defaults.
//!
//! ## Loading Order
//!
//! 1. `PLANE_CONFIG` environment variable (path to TOML file)
//! 2. `plane_config.toml` in the current working directory
//! 3. Built-in defaults (see [`defaults`])
//!
//! After the file is resolved, `PLANE_*` environment variables override
//! individual values (see [`PlaneConfig::with_env_overrides`]).

mod plane_config;
pub mod defaults;
pub mod validation;

pub use plane_config::*;
