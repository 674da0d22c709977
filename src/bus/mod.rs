//! Event Bus - in-memory publish/subscribe hub with bounded history
//!
//! Every health and lifecycle fact in the plane travels through here:
//!
//! ```text
//! Registry ──┐                      ┌──► Orchestrator (wake-up channel)
//! Breaker  ──┼──► publish(type) ──► ├──► Analytics
//! HTTP     ──┘        │             └──► any HTTP-registered consumer
//!                     ▼
//!              RingBuffer<Event>  (last N, oldest dropped)
//! ```
//!
//! Handlers for one `publish` run in subscription order. Each invocation is
//! time-boxed and panic-isolated: a failing handler is recorded on the event
//! as a [`DeliveryFailure`] and never reaches the publisher or the other
//! subscribers.

mod handler;

pub use handler::{EventHandler, FnHandler};

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::BusConfig;
use crate::error::{HandlerError, PlaneError};
use crate::ring::RingBuffer;
use crate::types::{DeliveryFailure, Event, EventTypeSummary};

/// Event type names published by the plane itself
pub mod event_types {
    pub const SERVICE_HEALTHY: &str = "service.healthy";
    pub const SERVICE_DEGRADED: &str = "service.degraded";
    pub const SERVICE_FAILED: &str = "service.failed";
    pub const SERVICE_UNKNOWN: &str = "service.unknown";
    pub const SERVICE_REGISTERED: &str = "service.registered";
    pub const SERVICE_DEREGISTERED: &str = "service.deregistered";
    pub const SERVICE_RESTARTING: &str = "service.restarting";
    pub const SERVICE_HEALED: &str = "service.healed";
    pub const SERVICE_ISOLATED: &str = "service.isolated";
    pub const SERVICE_ESCALATED: &str = "service.escalated";

    pub const BREAKER_OPENED: &str = "breaker.opened";
    pub const BREAKER_REOPENED: &str = "breaker.reopened";
    pub const BREAKER_HALF_OPEN: &str = "breaker.half_open";
    pub const BREAKER_CLOSED: &str = "breaker.closed";
    pub const BREAKER_RESET: &str = "breaker.reset";

    pub const TASK_COMPLETED: &str = "task.completed";
    pub const TASK_FAILED: &str = "task.failed";
}

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct SubscriptionToken(pub u64);

#[derive(Clone)]
struct Subscription {
    token: SubscriptionToken,
    handler: Arc<dyn EventHandler>,
}

/// In-memory event bus.
///
/// The subscriber table and the history ring are guarded independently, and
/// neither lock is held while handlers run.
pub struct EventBus {
    subscribers: RwLock<HashMap<String, Vec<Subscription>>>,
    history: Mutex<RingBuffer<Event>>,
    next_token: AtomicU64,
    next_sequence: AtomicU64,
    handler_timeout: Duration,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(&BusConfig::default())
    }
}

impl EventBus {
    pub fn new(config: &BusConfig) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            history: Mutex::new(RingBuffer::new(config.history_capacity)),
            next_token: AtomicU64::new(1),
            next_sequence: AtomicU64::new(0),
            handler_timeout: Duration::from_millis(config.handler_timeout_ms),
        }
    }

    /// Register `handler` for exactly `event_type`.
    pub fn subscribe(&self, event_type: &str, handler: Arc<dyn EventHandler>) -> SubscriptionToken {
        let token = SubscriptionToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        debug!(event_type, subscriber = handler.name(), token = token.0, "Subscribed");
        self.subscribers
            .write()
            .entry(event_type.to_string())
            .or_default()
            .push(Subscription { token, handler });
        token
    }

    /// Closure convenience over [`subscribe`](Self::subscribe).
    pub fn subscribe_fn<F>(&self, event_type: &str, name: &str, f: F) -> SubscriptionToken
    where
        F: Fn(&Event) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.subscribe(event_type, Arc::new(FnHandler::new(name, f)))
    }

    /// Remove a subscription. Returns false if the token is unknown.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        let mut subs = self.subscribers.write();
        let mut removed = false;
        subs.retain(|_, list| {
            let before = list.len();
            list.retain(|s| s.token != token);
            removed |= list.len() != before;
            !list.is_empty()
        });
        removed
    }

    /// Publish with the bus itself as source component.
    pub async fn publish(&self, event_type: &str, payload: serde_json::Value) -> Event {
        self.publish_from("event-bus", event_type, payload).await
    }

    /// Deliver to every current subscriber of `event_type`, then record the
    /// annotated event in the history ring and return it.
    ///
    /// History stays in `sequence` order even when a handler publishes during
    /// delivery: the nested event is recorded first but slotted after its parent.
    pub async fn publish_from(
        &self,
        source_component: &str,
        event_type: &str,
        payload: serde_json::Value,
    ) -> Event {
        let mut event = Event {
            id: uuid::Uuid::new_v4().to_string(),
            sequence: self.next_sequence.fetch_add(1, Ordering::SeqCst),
            event_type: event_type.to_string(),
            payload,
            timestamp: chrono::Utc::now(),
            source_component: source_component.to_string(),
            delivery_failures: Vec::new(),
        };

        // Snapshot so handlers may subscribe/publish without deadlocking.
        let targets: Vec<Subscription> = self
            .subscribers
            .read()
            .get(event_type)
            .cloned()
            .unwrap_or_default();

        for sub in &targets {
            if let Err(reason) = self.deliver(sub, &event).await {
                let err = PlaneError::SubscriberHandler {
                    subscriber: sub.handler.name().to_string(),
                    event_type: event.event_type.clone(),
                    reason,
                };
                warn!(event_id = %event.id, error = %err, "Subscriber failed, continuing delivery");
                event.delivery_failures.push(DeliveryFailure {
                    subscriber: sub.handler.name().to_string(),
                    error: err.to_string(),
                });
            }
        }

        debug!(
            event_type = %event.event_type,
            source = %event.source_component,
            delivered = targets.len(),
            failed = event.delivery_failures.len(),
            "Event published"
        );

        self.history
            .lock()
            .insert_by_key(event.clone(), |e| e.sequence);
        event
    }

    async fn deliver(&self, sub: &Subscription, event: &Event) -> Result<(), String> {
        let call = AssertUnwindSafe(sub.handler.handle(event)).catch_unwind();
        match tokio::time::timeout(self.handler_timeout, call).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(e.to_string()),
            Ok(Err(panic)) => Err(format!("handler panicked: {}", panic_message(panic.as_ref()))),
            Err(_) => Err(format!("handler timed out after {:?}", self.handler_timeout)),
        }
    }

    /// The most recent `limit` events, oldest first.
    pub fn history(&self, limit: usize) -> Vec<Event> {
        self.history.lock().latest(limit)
    }

    pub fn history_by_type(&self, event_type: &str, limit: usize) -> Vec<Event> {
        self.history
            .lock()
            .latest_matching(limit, |e| e.event_type == event_type)
    }

    /// Subscriber counts per event type, sorted by type.
    pub fn event_types(&self) -> Vec<EventTypeSummary> {
        let mut out: Vec<EventTypeSummary> = self
            .subscribers
            .read()
            .iter()
            .map(|(t, subs)| EventTypeSummary {
                event_type: t.clone(),
                subscribers: subs.len(),
            })
            .collect();
        out.sort_by(|a, b| a.event_type.cmp(&b.event_type));
        out
    }

    pub fn subscriber_count(&self, event_type: &str) -> usize {
        self.subscribers.read().get(event_type).map_or(0, Vec::len)
    }

    pub fn history_capacity(&self) -> usize {
        self.history.lock().capacity()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
