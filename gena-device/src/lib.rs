//! # gena-device
//!
//! Publisher-side GENA eventing: accepts SUBSCRIBE/UNSUBSCRIBE requests for
//! registered services, and fans state-change notifications out to every
//! subscriber with per-subscription wire ordering.
//!
//! # Architecture
//!
//! - [`GenaDevice`] owns an embedded HTTP event server, the subscription
//!   registry, and an expiry sweeper task.
//! - Every admitted subscription gets its own delivery queue and worker
//!   task; one slow or dead subscriber never delays the others.
//! - Admission, expiry, and removal are reported to the application over an
//!   event channel; the application accepts each new subscriber by calling
//!   [`GenaDevice::accept_subscription`] with the current state.
//!
//! # Example
//!
//! ```no_run
//! use gena_device::{DeviceConfig, DeviceEvent, GenaDevice, ServiceSpec};
//! use gena_wire::PropertySet;
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (tx, mut rx) = mpsc::unbounded_channel();
//!     let device = GenaDevice::new(DeviceConfig::default(), tx).await?;
//!
//!     let handle = device
//!         .register_device(vec![ServiceSpec {
//!             udn: "uuid:player-1".to_string(),
//!             service_id: "urn:upnp-org:serviceId:AVTransport".to_string(),
//!             event_path: "/events/avt".to_string(),
//!         }])
//!         .await?;
//!
//!     while let Some(event) = rx.recv().await {
//!         if let DeviceEvent::SubscriptionRequest { udn, service_id, subscription_id } = event {
//!             let state = PropertySet::from_pairs([("TransportState", "STOPPED")]);
//!             device
//!                 .accept_subscription(handle, &udn, &service_id, &subscription_id, &state)
//!                 .await?;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod notify;

mod dispatcher;
mod registry;
mod server;

pub use config::DeviceConfig;
pub use error::{DeviceError, Result, TransportError};
pub use event::DeviceEvent;
pub use notify::{DeliveryOutcome, HttpNotifyTransport, NotifyPayload, NotifyTransport};
pub use registry::{DeviceHandle, ServiceSpec, SubscriptionInfo};

use std::sync::Arc;
use std::time::SystemTime;

use gena_wire::PropertySet;
use tokio::sync::mpsc;
use tracing::{info, warn};

use registry::Registry;
use server::EventServer;

/// The publisher engine.
///
/// Owns the embedded event server, the subscription registry, and the expiry
/// sweeper. One instance serves any number of registered devices; their
/// services are told apart by event path.
pub struct GenaDevice {
    config: Arc<DeviceConfig>,
    registry: Registry,
    server: EventServer,
    sweeper_shutdown: mpsc::Sender<()>,
    sweeper_handle: tokio::task::JoinHandle<()>,
}

impl GenaDevice {
    /// Create the engine and start its event server.
    ///
    /// Events (subscription requests, expirations, dropped subscribers) are
    /// delivered on `event_tx`; the channel is never written to while
    /// internal locks are held, so handlers may call back into the engine.
    pub async fn new(
        config: DeviceConfig,
        event_tx: mpsc::UnboundedSender<DeviceEvent>,
    ) -> Result<Self> {
        config.validate()?;
        let transport = notify::HttpNotifyTransport::new(config.notify_timeout)
            .map_err(|e| DeviceError::Configuration(e.to_string()))?;
        Self::with_transport(config, event_tx, Arc::new(transport)).await
    }

    /// Create the engine with a caller-supplied NOTIFY transport.
    pub async fn with_transport(
        config: DeviceConfig,
        event_tx: mpsc::UnboundedSender<DeviceEvent>,
        transport: Arc<dyn NotifyTransport>,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let registry = Registry::new();

        let server = EventServer::start(
            Arc::clone(&config),
            registry.clone(),
            transport,
            event_tx.clone(),
        )
        .await
        .map_err(DeviceError::ServerError)?;

        let (sweeper_shutdown, shutdown_rx) = mpsc::channel(1);
        let sweeper_handle = spawn_expiry_sweeper(
            registry.clone(),
            config.expiry_sweep_interval,
            event_tx,
            shutdown_rx,
        );

        info!(url = server.base_url(), "Publisher engine started");
        Ok(Self {
            config,
            registry,
            server,
            sweeper_shutdown,
            sweeper_handle,
        })
    }

    /// Base URL of the event server. Event paths registered with
    /// [`register_device`](Self::register_device) are resolved under it.
    pub fn base_url(&self) -> &str {
        self.server.base_url()
    }

    /// Port the event server is bound to.
    pub fn port(&self) -> u16 {
        self.server.port()
    }

    /// Register a device and its evented services.
    ///
    /// Each service's `event_path` is reserved on the event server; paths
    /// must be unique across all registered devices.
    pub async fn register_device(&self, services: Vec<ServiceSpec>) -> Result<DeviceHandle> {
        self.registry
            .register(services)
            .await
            .map_err(DeviceError::Configuration)
    }

    /// Remove a device, releasing its event paths and dropping every
    /// subscription on its services.
    pub async fn unregister_device(&self, handle: DeviceHandle) -> Result<()> {
        match self.registry.unregister(handle).await {
            Some(_) => Ok(()),
            None => Err(DeviceError::InvalidHandle),
        }
    }

    /// Accept a newly admitted subscription, sending it the initial
    /// (sequence 0) notification carrying the full evented state.
    ///
    /// Until this is called the subscription exists but receives nothing.
    /// Calling it twice for the same subscription is an error.
    pub async fn accept_subscription(
        &self,
        handle: DeviceHandle,
        udn: &str,
        service_id: &str,
        subscription_id: &str,
        state: &PropertySet,
    ) -> Result<()> {
        let key = self.service_key(handle, udn, service_id).await?;
        let payload = Arc::new(NotifyPayload {
            udn: udn.to_string(),
            service_id: service_id.to_string(),
            body: state.to_xml(),
        });
        self.registry.activate(key, subscription_id, payload).await
    }

    /// Publish a state change to every active subscriber of a service.
    ///
    /// The property set is rendered once and shared across all deliveries.
    /// Returns the number of deliveries queued.
    pub async fn notify_all(
        &self,
        handle: DeviceHandle,
        udn: &str,
        service_id: &str,
        changes: &PropertySet,
    ) -> Result<usize> {
        self.notify_all_xml(handle, udn, service_id, changes.to_xml())
            .await
    }

    /// Publish a pre-rendered property-set body to every active subscriber.
    ///
    /// For callers that produce their event XML elsewhere; the body is
    /// forwarded as-is.
    pub async fn notify_all_xml(
        &self,
        handle: DeviceHandle,
        udn: &str,
        service_id: &str,
        body: String,
    ) -> Result<usize> {
        let key = self.service_key(handle, udn, service_id).await?;
        let payload = Arc::new(NotifyPayload {
            udn: udn.to_string(),
            service_id: service_id.to_string(),
            body,
        });
        self.registry.notify_all(key, payload).await
    }

    /// Number of subscriptions currently held by a service.
    pub async fn subscription_count(
        &self,
        handle: DeviceHandle,
        udn: &str,
        service_id: &str,
    ) -> Result<usize> {
        let key = self.service_key(handle, udn, service_id).await?;
        Ok(self.registry.subscription_count(key).await)
    }

    /// The engine's admission and delivery configuration.
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Shut the engine down: stop the sweeper, then the event server.
    /// Delivery workers finish their queued work and exit as their
    /// subscriptions are dropped.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.sweeper_shutdown.send(()).await;
        if self.sweeper_handle.await.is_err() {
            warn!("Expiry sweeper did not shut down cleanly");
        }
        self.server.shutdown().await;
        Ok(())
    }

    async fn service_key(
        &self,
        handle: DeviceHandle,
        udn: &str,
        service_id: &str,
    ) -> Result<registry::ServiceKey> {
        self.registry
            .find_service(handle, udn, service_id)
            .await
            .ok_or_else(|| DeviceError::InvalidService {
                udn: udn.to_string(),
                service_id: service_id.to_string(),
            })
    }
}

/// Periodically sweep out subscriptions whose lease ran out and report each
/// one to the application.
fn spawn_expiry_sweeper(
    registry: Registry,
    interval: std::time::Duration,
    event_tx: mpsc::UnboundedSender<DeviceEvent>,
    mut shutdown_rx: mpsc::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let expired = registry.purge_expired(SystemTime::now()).await;
                    for info in expired {
                        tracing::debug!(sid = %info.sid, "Subscription lease expired");
                        let _ = event_tx.send(DeviceEvent::SubscriptionExpired {
                            udn: info.udn,
                            service_id: info.service_id,
                            subscription_id: info.sid,
                        });
                    }
                }
                _ = shutdown_rx.recv() => {
                    break;
                }
            }
        }
    })
}
