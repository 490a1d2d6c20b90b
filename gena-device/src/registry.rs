//! Registry of devices, their evented services, and live subscriptions.
//!
//! All mutable state sits behind one `Arc<RwLock<..>>`; the HTTP handlers,
//! delivery workers, and the expiry sweeper all go through this type. Lock
//! scopes stay small and nothing performs I/O while holding the lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use gena_wire::{DeliveryUrl, EventKey};
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::notify::{DeliveryJob, DeliveryOutcome, NotifyPayload};

/// Opaque handle naming one registered device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle(u64);

/// One evented service offered by a registered device.
#[derive(Debug, Clone)]
pub struct ServiceSpec {
    /// Unique device name of the owning device, e.g. `uuid:...`
    pub udn: String,
    /// Service identifier, e.g. `urn:upnp-org:serviceId:AVTransport`
    pub service_id: String,
    /// Request path subscribers send SUBSCRIBE/UNSUBSCRIBE to, e.g. `/events/avt`
    pub event_path: String,
}

/// Internal locator for one service. Indices are stable: a device's service
/// list is fixed at registration and handles are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceKey {
    handle: DeviceHandle,
    index: usize,
}

/// Identifying fields of a subscription, reported in events and logs.
#[derive(Debug, Clone)]
pub struct SubscriptionInfo {
    pub udn: String,
    pub service_id: String,
    pub sid: String,
}

/// Why a subscription could not be admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitError {
    /// The service disappeared between path resolution and insertion
    ServiceGone,
    /// The per-service subscription cap is reached
    TooManySubscribers,
}

/// Why a renewal was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewError {
    /// The service disappeared
    ServiceGone,
    /// No subscription with that SID on this service
    UnknownSid,
}

/// What a delivery worker should do with a dequeued job.
#[derive(Debug)]
pub enum JobDisposition {
    /// Send to these callback URLs, first success wins
    Deliver(Vec<DeliveryUrl>),
    /// The subscription is gone or the job is stale; drop it
    Skip,
}

/// One live subscription on one service.
pub struct Subscription {
    sid: String,
    delivery_urls: Vec<DeliveryUrl>,
    /// `None` means an infinite lease
    expires_at: Option<SystemTime>,
    /// Set by `init_notify`; no notifications flow before that
    active: bool,
    /// Next sequence number to assign (the send counter)
    send_key: EventKey,
    /// Next sequence number allowed on the wire (the ordering gate)
    gate_key: EventKey,
    /// Producer side of this subscription's delivery queue. Dropping the
    /// subscription closes the queue and ends its worker task.
    queue_tx: mpsc::UnboundedSender<DeliveryJob>,
}

impl Subscription {
    pub fn new(
        sid: String,
        delivery_urls: Vec<DeliveryUrl>,
        expires_at: Option<SystemTime>,
        queue_tx: mpsc::UnboundedSender<DeliveryJob>,
    ) -> Self {
        Self {
            sid,
            delivery_urls,
            expires_at,
            active: false,
            send_key: EventKey::INITIAL,
            gate_key: EventKey::INITIAL,
            queue_tx,
        }
    }
}

struct ServiceState {
    spec: ServiceSpec,
    /// Keyed by SID
    subscriptions: HashMap<String, Subscription>,
}

impl ServiceState {
    fn info_for(&self, sub: &Subscription) -> SubscriptionInfo {
        SubscriptionInfo {
            udn: self.spec.udn.clone(),
            service_id: self.spec.service_id.clone(),
            sid: sub.sid.clone(),
        }
    }
}

struct DeviceEntry {
    services: Vec<ServiceState>,
}

#[derive(Default)]
struct Inner {
    next_handle: u64,
    devices: HashMap<DeviceHandle, DeviceEntry>,
    /// event_path -> service, across all devices
    paths: HashMap<String, ServiceKey>,
}

impl Inner {
    fn service(&self, key: ServiceKey) -> Option<&ServiceState> {
        self.devices.get(&key.handle)?.services.get(key.index)
    }

    fn service_mut(&mut self, key: ServiceKey) -> Option<&mut ServiceState> {
        self.devices
            .get_mut(&key.handle)?
            .services
            .get_mut(key.index)
    }

    fn find_service(
        &self,
        handle: DeviceHandle,
        udn: &str,
        service_id: &str,
    ) -> Option<ServiceKey> {
        let entry = self.devices.get(&handle)?;
        entry
            .services
            .iter()
            .position(|s| s.spec.udn == udn && s.spec.service_id == service_id)
            .map(|index| ServiceKey { handle, index })
    }
}

/// Shared registry handle. Clones share the same state.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RwLock<Inner>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
        }
    }

    /// Register a device and its evented services, reserving their event
    /// paths. Fails if any path is already claimed or the list is empty.
    pub async fn register(&self, services: Vec<ServiceSpec>) -> Result<DeviceHandle, String> {
        if services.is_empty() {
            return Err("A device needs at least one evented service".to_string());
        }
        let mut inner = self.inner.write().await;
        for spec in &services {
            if inner.paths.contains_key(&spec.event_path) {
                return Err(format!("Event path already in use: {}", spec.event_path));
            }
        }
        let handle = DeviceHandle(inner.next_handle);
        inner.next_handle += 1;
        for (index, spec) in services.iter().enumerate() {
            inner
                .paths
                .insert(spec.event_path.clone(), ServiceKey { handle, index });
        }
        let entry = DeviceEntry {
            services: services
                .into_iter()
                .map(|spec| ServiceState {
                    spec,
                    subscriptions: HashMap::new(),
                })
                .collect(),
        };
        inner.devices.insert(handle, entry);
        debug!(handle = handle.0, "Registered device");
        Ok(handle)
    }

    /// Remove a device, its path reservations, and every subscription on it.
    /// Dropping the subscriptions closes their delivery queues, which ends
    /// their worker tasks once in-flight work drains.
    pub async fn unregister(&self, handle: DeviceHandle) -> Option<usize> {
        let mut inner = self.inner.write().await;
        let entry = inner.devices.remove(&handle)?;
        inner.paths.retain(|_, key| key.handle != handle);
        let dropped: usize = entry
            .services
            .iter()
            .map(|s| s.subscriptions.len())
            .sum();
        debug!(
            handle = handle.0,
            subscriptions = dropped,
            "Unregistered device"
        );
        Some(dropped)
    }

    /// Resolve an event path to its service.
    pub async fn resolve_path(&self, path: &str) -> Option<(ServiceKey, ServiceSpec)> {
        let inner = self.inner.read().await;
        let key = *inner.paths.get(path)?;
        let service = inner.service(key)?;
        Some((key, service.spec.clone()))
    }

    /// Locate a service by its application-facing identifiers.
    pub async fn find_service(
        &self,
        handle: DeviceHandle,
        udn: &str,
        service_id: &str,
    ) -> Option<ServiceKey> {
        self.inner.read().await.find_service(handle, udn, service_id)
    }

    /// Insert a freshly admitted subscription, enforcing the per-service cap
    /// atomically with the insertion.
    pub async fn admit(
        &self,
        key: ServiceKey,
        subscription: Subscription,
        limit: Option<usize>,
    ) -> Result<SubscriptionInfo, AdmitError> {
        let mut inner = self.inner.write().await;
        let Some(service) = inner.service_mut(key) else {
            return Err(AdmitError::ServiceGone);
        };
        if let Some(limit) = limit {
            if service.subscriptions.len() >= limit {
                return Err(AdmitError::TooManySubscribers);
            }
        }
        let info = service.info_for(&subscription);
        service
            .subscriptions
            .insert(subscription.sid.clone(), subscription);
        debug!(sid = %info.sid, service = %info.service_id, "Admitted subscription");
        Ok(info)
    }

    /// Extend a subscription's lease. Sequence counters and callback URLs are
    /// untouched by renewal.
    pub async fn renew(
        &self,
        key: ServiceKey,
        sid: &str,
        expires_at: Option<SystemTime>,
    ) -> Result<(), RenewError> {
        let mut inner = self.inner.write().await;
        let Some(service) = inner.service_mut(key) else {
            return Err(RenewError::ServiceGone);
        };
        match service.subscriptions.get_mut(sid) {
            Some(sub) => {
                sub.expires_at = expires_at;
                debug!(sid, "Renewed subscription");
                Ok(())
            }
            None => Err(RenewError::UnknownSid),
        }
    }

    /// Remove a subscription by SID. Returns whether it existed.
    pub async fn remove(&self, key: ServiceKey, sid: &str) -> bool {
        let mut inner = self.inner.write().await;
        let Some(service) = inner.service_mut(key) else {
            return false;
        };
        service.subscriptions.remove(sid).is_some()
    }

    /// Activate a subscription and queue its initial (sequence 0) event.
    ///
    /// Fails if the subscription is unknown or was already activated; the
    /// initial event must be the first one a subscriber sees.
    pub async fn activate(
        &self,
        key: ServiceKey,
        sid: &str,
        payload: Arc<NotifyPayload>,
    ) -> Result<(), crate::error::DeviceError> {
        let mut inner = self.inner.write().await;
        let Some(service) = inner.service_mut(key) else {
            return Err(crate::error::DeviceError::InvalidSid(sid.to_string()));
        };
        let Some(sub) = service.subscriptions.get_mut(sid) else {
            return Err(crate::error::DeviceError::InvalidSid(sid.to_string()));
        };
        if sub.active {
            return Err(crate::error::DeviceError::InvalidSid(sid.to_string()));
        }
        sub.active = true;
        let seq = sub.send_key.take_and_advance();
        let job = DeliveryJob {
            sid: sid.to_string(),
            seq,
            payload,
        };
        if sub.queue_tx.send(job).is_err() {
            warn!(sid, "Delivery queue closed before initial event");
        }
        Ok(())
    }

    /// Fan one event out to every active subscription on a service.
    ///
    /// Sequence numbers are assigned and jobs enqueued under the write lock,
    /// so every subscription's queue sees events in the same order they were
    /// published. A closed queue skips that subscriber and the fan-out
    /// continues. Returns the number of deliveries queued.
    pub async fn notify_all(
        &self,
        key: ServiceKey,
        payload: Arc<NotifyPayload>,
    ) -> Result<usize, crate::error::DeviceError> {
        let mut inner = self.inner.write().await;
        let Some(service) = inner.service_mut(key) else {
            return Err(crate::error::DeviceError::InvalidService {
                udn: payload.udn.clone(),
                service_id: payload.service_id.clone(),
            });
        };
        let mut queued = 0;
        for sub in service.subscriptions.values_mut() {
            if !sub.active {
                continue;
            }
            let seq = sub.send_key.take_and_advance();
            let job = DeliveryJob {
                sid: sub.sid.clone(),
                seq,
                payload: Arc::clone(&payload),
            };
            if sub.queue_tx.send(job).is_ok() {
                queued += 1;
            } else {
                warn!(sid = %sub.sid, "Delivery queue closed, skipping subscriber");
            }
        }
        Ok(queued)
    }

    /// Decide what a worker should do with a dequeued job.
    ///
    /// A missing or inactive subscription drops the job. With ordered
    /// delivery on, a job whose sequence number is not the current gate value
    /// is stale (its subscription was removed and the SID never recurs) and
    /// is dropped too.
    pub async fn inspect_job(
        &self,
        key: ServiceKey,
        sid: &str,
        seq: EventKey,
        ordered: bool,
    ) -> JobDisposition {
        let inner = self.inner.read().await;
        let Some(sub) = inner.service(key).and_then(|s| s.subscriptions.get(sid)) else {
            return JobDisposition::Skip;
        };
        if !sub.active {
            return JobDisposition::Skip;
        }
        if ordered && sub.gate_key != seq {
            debug!(sid, seq = %seq, gate = %sub.gate_key, "Dropping stale delivery job");
            return JobDisposition::Skip;
        }
        JobDisposition::Deliver(sub.delivery_urls.clone())
    }

    /// Record the outcome of one delivery attempt.
    ///
    /// The ordering gate advances on every completed attempt, success or not,
    /// so one dead subscriber never stalls its own queue. A `Gone` outcome
    /// (the subscriber answered 412) removes the subscription; the removed
    /// subscription's identity is returned so the caller can report it with
    /// the lock released.
    pub async fn complete_delivery(
        &self,
        key: ServiceKey,
        sid: &str,
        outcome: DeliveryOutcome,
    ) -> Option<SubscriptionInfo> {
        let mut inner = self.inner.write().await;
        let service = inner.service_mut(key)?;
        let sub = service.subscriptions.get_mut(sid)?;
        sub.gate_key = sub.gate_key.next();
        if outcome == DeliveryOutcome::Gone {
            let info = SubscriptionInfo {
                udn: service.spec.udn.clone(),
                service_id: service.spec.service_id.clone(),
                sid: sid.to_string(),
            };
            service.subscriptions.remove(sid);
            return Some(info);
        }
        None
    }

    /// Sweep out subscriptions whose lease has run out, returning their
    /// identities so expiry events can be emitted outside the lock.
    pub async fn purge_expired(&self, now: SystemTime) -> Vec<SubscriptionInfo> {
        let mut inner = self.inner.write().await;
        let mut expired = Vec::new();
        for entry in inner.devices.values_mut() {
            for service in entry.services.iter_mut() {
                let gone: Vec<String> = service
                    .subscriptions
                    .values()
                    .filter(|sub| matches!(sub.expires_at, Some(t) if t <= now))
                    .map(|sub| sub.sid.clone())
                    .collect();
                for sid in gone {
                    if let Some(sub) = service.subscriptions.remove(&sid) {
                        expired.push(service.info_for(&sub));
                    }
                }
            }
        }
        expired
    }

    /// Number of subscriptions on a service. Used by tests and diagnostics.
    pub async fn subscription_count(&self, key: ServiceKey) -> usize {
        self.inner
            .read()
            .await
            .service(key)
            .map(|s| s.subscriptions.len())
            .unwrap_or(0)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
