//! Subscriber trait and closure adapter

use async_trait::async_trait;

use crate::error::HandlerError;
use crate::types::Event;

/// A bus subscriber.
///
/// Handlers run inline with `publish` under a time box, so long work should
/// be handed off (e.g. to a channel) rather than done in `handle`.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Name recorded in delivery-failure annotations and logs
    fn name(&self) -> &str;

    async fn handle(&self, event: &Event) -> Result<(), HandlerError>;
}

/// Adapts a synchronous closure into an [`EventHandler`].
pub struct FnHandler<F> {
    name: String,
    f: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&Event) -> Result<(), HandlerError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

#[async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&Event) -> Result<(), HandlerError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        (self.f)(event)
    }
}
