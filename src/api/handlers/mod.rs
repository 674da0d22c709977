//! API route handlers
//!
//! - Event bus publish/history/types
//! - Service registration and health records
//! - Circuit breaker state
//! - Plane health, system health and the healing log
//! - Task analytics

mod events;
mod services;
mod circuit;
mod healing;
mod analytics;

pub use events::*;
pub use services::*;
pub use circuit::*;
pub use healing::*;
pub use analytics::*;

use serde::Deserialize;

/// `?limit=` for list endpoints
#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}
