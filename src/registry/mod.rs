//! Service Registry - tracked services, their latest HealthRecord, probing
//!
//! Each service has its own entry, so probes of different services never
//! contend. Within one service a probe gate serializes probes: the record
//! update, the observer notification and the transition event of one probe
//! complete before the next probe of that service starts.
//!
//! Status transitions are published on the bus as `service.<status>`.
//! Probes whose status equals the previous one publish nothing.

mod probe;

pub use probe::{HttpProber, ProbeObserver, Prober};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{event_types, EventBus};
use crate::config::ProbeConfig;
use crate::error::{PlaneError, ProbeError};
use crate::types::{HealthRecord, HealthStatus, ServiceDescriptor};

const SOURCE: &str = "service-registry";

struct ServiceEntry {
    descriptor: ServiceDescriptor,
    record: Mutex<HealthRecord>,
    /// Held for the whole of one probe
    probe_gate: tokio::sync::Mutex<()>,
    /// Cancels this service's periodic probe task
    task_token: Mutex<Option<CancellationToken>>,
}

impl ServiceEntry {
    fn new(descriptor: ServiceDescriptor) -> Self {
        Self {
            record: Mutex::new(HealthRecord::unknown(&descriptor.id)),
            descriptor,
            probe_gate: tokio::sync::Mutex::new(()),
            task_token: Mutex::new(None),
        }
    }

    fn cancel_task(&self) {
        if let Some(token) = self.task_token.lock().take() {
            token.cancel();
        }
    }
}

pub struct ServiceRegistry {
    services: DashMap<String, Arc<ServiceEntry>>,
    bus: Arc<EventBus>,
    prober: Arc<dyn Prober>,
    observers: RwLock<Vec<Arc<dyn ProbeObserver>>>,
    config: ProbeConfig,
    /// Root token of the periodic probe tasks, while they run
    probing: Mutex<Option<CancellationToken>>,
}

impl ServiceRegistry {
    pub fn new(config: ProbeConfig, bus: Arc<EventBus>, prober: Arc<dyn Prober>) -> Self {
        Self {
            services: DashMap::new(),
            bus,
            prober,
            observers: RwLock::new(Vec::new()),
            config,
            probing: Mutex::new(None),
        }
    }

    /// Receive every probe outcome and registration change.
    pub fn add_observer(&self, observer: Arc<dyn ProbeObserver>) {
        self.observers.write().push(observer);
    }

    fn observers(&self) -> Vec<Arc<dyn ProbeObserver>> {
        self.observers.read().clone()
    }

    fn entry(&self, service_id: &str) -> Result<Arc<ServiceEntry>, PlaneError> {
        self.services
            .get(service_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| PlaneError::UnknownService(service_id.to_string()))
    }

    // ========================================================================
    // Membership
    // ========================================================================

    /// Start tracking a service with status Unknown.
    ///
    /// A service id can be registered once; re-registration requires a
    /// deregistration first.
    pub async fn register(
        self: &Arc<Self>,
        descriptor: ServiceDescriptor,
    ) -> Result<ServiceDescriptor, PlaneError> {
        if descriptor.id.trim().is_empty() {
            return Err(PlaneError::InvalidRequest("service id must not be empty".into()));
        }
        if descriptor.probe_endpoint.trim().is_empty() {
            return Err(PlaneError::InvalidRequest(format!(
                "service {} has no probe endpoint",
                descriptor.id
            )));
        }
        if descriptor.probe_interval_ms == Some(0) {
            return Err(PlaneError::InvalidRequest(format!(
                "service {} has a zero probe interval",
                descriptor.id
            )));
        }

        let entry = match self.services.entry(descriptor.id.clone()) {
            Entry::Occupied(_) => return Err(PlaneError::DuplicateService(descriptor.id)),
            Entry::Vacant(slot) => {
                let entry = Arc::new(ServiceEntry::new(descriptor.clone()));
                slot.insert(Arc::clone(&entry));
                entry
            }
        };

        info!(
            service = %descriptor.id,
            endpoint = %descriptor.probe_endpoint,
            interval_ms = descriptor.probe_interval(self.config.interval_ms).as_millis() as u64,
            "Service registered"
        );

        for observer in self.observers() {
            observer.on_registered(&descriptor).await;
        }

        self.bus
            .publish_from(
                SOURCE,
                event_types::SERVICE_REGISTERED,
                json!({ "serviceId": descriptor.id, "descriptor": descriptor }),
            )
            .await;

        let root = self.probing.lock().clone();
        if let Some(root) = root {
            self.spawn_probe_task(entry, &root);
        }

        Ok(descriptor)
    }

    /// Stop tracking a service. Returns false if it was not registered.
    pub async fn deregister(&self, service_id: &str) -> bool {
        let Some((_, entry)) = self.services.remove(service_id) else {
            return false;
        };
        entry.cancel_task();
        info!(service = %service_id, "Service deregistered");

        for observer in self.observers() {
            observer.on_deregistered(service_id).await;
        }

        self.bus
            .publish_from(
                SOURCE,
                event_types::SERVICE_DEREGISTERED,
                json!({ "serviceId": service_id }),
            )
            .await;
        true
    }

    pub fn contains(&self, service_id: &str) -> bool {
        self.services.contains_key(service_id)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn descriptor(&self, service_id: &str) -> Result<ServiceDescriptor, PlaneError> {
        self.entry(service_id).map(|e| e.descriptor.clone())
    }

    /// All registered descriptors, sorted by id.
    pub fn descriptors(&self) -> Vec<ServiceDescriptor> {
        let mut out: Vec<ServiceDescriptor> = self
            .services
            .iter()
            .map(|e| e.value().descriptor.clone())
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    // ========================================================================
    // Health records
    // ========================================================================

    /// Last known record, without probing.
    pub fn get_record(&self, service_id: &str) -> Result<HealthRecord, PlaneError> {
        self.entry(service_id).map(|e| e.record.lock().clone())
    }

    /// Last known records of all services, sorted by id.
    pub fn records(&self) -> Vec<HealthRecord> {
        let entries: Vec<Arc<ServiceEntry>> =
            self.services.iter().map(|e| Arc::clone(e.value())).collect();
        let mut out: Vec<HealthRecord> = entries.iter().map(|e| e.record.lock().clone()).collect();
        out.sort_by(|a, b| a.service_id.cmp(&b.service_id));
        out
    }

    /// Probe one service now and return its updated record.
    ///
    /// A probe failure is not an error here: it is folded into the record.
    /// The only error is an unknown service id.
    pub async fn probe(&self, service_id: &str) -> Result<HealthRecord, PlaneError> {
        let entry = self.entry(service_id)?;
        let _gate = entry.probe_gate.lock().await;

        let limit = self.config.timeout();
        let outcome = match tokio::time::timeout(limit, self.prober.probe(&entry.descriptor)).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout(limit)),
        };

        let threshold = entry
            .descriptor
            .failure_threshold
            .unwrap_or(self.config.failure_threshold)
            .max(1);
        let now = chrono::Utc::now();

        let (previous, record) = {
            let mut rec = entry.record.lock();
            let previous = rec.status;
            match &outcome {
                Ok(latency) => rec.record_success(*latency, now),
                Err(e) => rec.record_failure(e, threshold, now),
            }
            (previous, rec.clone())
        };

        if let Err(e) = &outcome {
            let err = e.clone().into_plane_error(service_id);
            debug!(error = %err, consecutive = record.consecutive_failures, "Probe failed");
        }

        // Deregistered while the probe was in flight: drop the result.
        if !self.contains(service_id) {
            return Ok(record);
        }

        for observer in self.observers() {
            observer.on_probe(&record, &outcome).await;
        }

        if previous != record.status {
            match record.status {
                HealthStatus::Healthy => {
                    info!(service = %service_id, from = %previous, "Service healthy");
                }
                _ => warn!(
                    service = %service_id,
                    from = %previous,
                    to = %record.status,
                    error = record.last_error.as_deref().unwrap_or(""),
                    "Service health changed"
                ),
            }
            self.bus
                .publish_from(
                    SOURCE,
                    record.status.event_type(),
                    json!({
                        "serviceId": service_id,
                        "previousStatus": previous,
                        "status": record.status,
                        "record": record,
                    }),
                )
                .await;
        }

        Ok(record)
    }

    /// Probe every registered service concurrently.
    pub async fn probe_all(&self) -> Vec<HealthRecord> {
        let ids: Vec<String> = self.services.iter().map(|e| e.key().clone()).collect();
        let results = futures::future::join_all(ids.iter().map(|id| self.probe(id))).await;
        let mut out: Vec<HealthRecord> = results.into_iter().filter_map(Result::ok).collect();
        out.sort_by(|a, b| a.service_id.cmp(&b.service_id));
        out
    }

    // ========================================================================
    // Periodic probing
    // ========================================================================

    /// Spawn one probe loop per service, each on its own interval.
    /// Services registered later get a loop at registration. Idempotent.
    pub fn start_periodic_probing(self: &Arc<Self>, parent: &CancellationToken) {
        let root = {
            let mut probing = self.probing.lock();
            if probing.is_some() {
                return;
            }
            let root = parent.child_token();
            *probing = Some(root.clone());
            root
        };

        let entries: Vec<Arc<ServiceEntry>> =
            self.services.iter().map(|e| Arc::clone(e.value())).collect();
        info!(services = entries.len(), "Periodic probing started");
        for entry in entries {
            self.spawn_probe_task(entry, &root);
        }
    }

    /// Stop all periodic probe loops.
    pub fn stop(&self) {
        if let Some(root) = self.probing.lock().take() {
            root.cancel();
            info!("Periodic probing stopped");
        }
    }

    pub fn is_probing(&self) -> bool {
        self.probing.lock().is_some()
    }

    fn spawn_probe_task(self: &Arc<Self>, entry: Arc<ServiceEntry>, root: &CancellationToken) {
        let token = root.child_token();
        if let Some(old) = entry.task_token.lock().replace(token.clone()) {
            old.cancel();
        }

        let registry = Arc::clone(self);
        let id = entry.descriptor.id.clone();
        let interval = entry.descriptor.probe_interval(self.config.interval_ms);

        tokio::spawn(async move {
            // Stagger first probes so services registered together do not
            // probe in lockstep.
            let max_jitter = (interval.as_millis() as u64 / 10).max(1);
            let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..max_jitter));
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(jitter) => {}
            }

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = registry.probe(&id).await {
                            debug!(service = %id, error = %e, "Probe loop exiting");
                            break;
                        }
                    }
                }
            }
            debug!(service = %id, "Probe loop stopped");
        });
    }
}
