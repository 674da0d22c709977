//! Liveness probe transports

use async_trait::async_trait;
use std::time::{Duration, Instant};

use crate::error::ProbeError;
use crate::types::{ServiceDescriptor, HealthRecord};

/// Performs one liveness check and reports its latency.
///
/// The registry wraps every call in its own hard timeout, so implementations
/// need not enforce one.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, descriptor: &ServiceDescriptor) -> Result<Duration, ProbeError>;
}

/// Notified after every probe of every service.
///
/// This is how probe outcomes reach the circuit breaker without going
/// through the bus (which only carries status transitions).
#[async_trait]
pub trait ProbeObserver: Send + Sync {
    async fn on_registered(&self, descriptor: &ServiceDescriptor);

    async fn on_probe(&self, record: &HealthRecord, outcome: &Result<Duration, ProbeError>);

    async fn on_deregistered(&self, service_id: &str);
}

/// HTTP GET prober: any 2xx response is healthy.
pub struct HttpProber {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpProber {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, descriptor: &ServiceDescriptor) -> Result<Duration, ProbeError> {
        let started = Instant::now();
        let resp = self
            .client
            .get(&descriptor.probe_endpoint)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProbeError::Timeout(self.timeout)
                } else {
                    ProbeError::Connection(e.to_string())
                }
            })?;

        let status = resp.status();
        if status.is_success() {
            Ok(started.elapsed())
        } else {
            Err(ProbeError::Unhealthy(format!("HTTP {status}")))
        }
    }
}
