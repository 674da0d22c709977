//! Bounded healing log with cumulative totals
//!
//! The ring holds the most recent actions for reporting. Totals are kept
//! separately so they still count actions that rotation has dropped.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::ring::RingBuffer;
use crate::types::{HealingAction, HealingActionKind};

pub struct HealingLog {
    actions: Mutex<RingBuffer<HealingAction>>,
    total_actions: AtomicU64,
    total_restarts: AtomicU64,
    recovery_ms_sum: AtomicU64,
    recoveries: AtomicU64,
}

impl HealingLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            actions: Mutex::new(RingBuffer::new(capacity)),
            total_actions: AtomicU64::new(0),
            total_restarts: AtomicU64::new(0),
            recovery_ms_sum: AtomicU64::new(0),
            recoveries: AtomicU64::new(0),
        }
    }

    pub fn append(&self, action: HealingAction) {
        self.total_actions.fetch_add(1, Ordering::Relaxed);
        if action.action == HealingActionKind::Restart {
            self.total_restarts.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(ms) = action.recovery_time_ms {
            self.recovery_ms_sum.fetch_add(ms, Ordering::Relaxed);
            self.recoveries.fetch_add(1, Ordering::Relaxed);
        }
        self.actions.lock().push(action);
    }

    /// Most recent `limit` actions, oldest first.
    pub fn history(&self, limit: usize) -> Vec<HealingAction> {
        self.actions.lock().latest(limit)
    }

    pub fn history_for(&self, service_id: &str, limit: usize) -> Vec<HealingAction> {
        self.actions
            .lock()
            .latest_matching(limit, |a| a.service_id == service_id)
    }

    pub fn len(&self) -> usize {
        self.actions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.lock().is_empty()
    }

    pub fn total_actions(&self) -> u64 {
        self.total_actions.load(Ordering::Relaxed)
    }

    pub fn total_restarts(&self) -> u64 {
        self.total_restarts.load(Ordering::Relaxed)
    }

    /// Mean recovery time over successful restarts; 0 when there are none.
    pub fn average_recovery_time_ms(&self) -> f64 {
        let n = self.recoveries.load(Ordering::Relaxed);
        if n == 0 {
            return 0.0;
        }
        self.recovery_ms_sum.load(Ordering::Relaxed) as f64 / n as f64
    }
}
