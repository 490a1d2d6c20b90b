//! The control point's view of its open subscriptions.

use std::collections::HashMap;
use std::sync::Arc;

use gena_wire::Timeout;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use url::Url;

/// Shared subscription table, keyed by the locally issued correlation id.
pub(crate) type SubscriptionTable = Arc<RwLock<HashMap<String, ClientSubscription>>>;

/// One open subscription as tracked locally.
pub(crate) struct ClientSubscription {
    /// SID the publisher issued; goes on the wire for renewal and
    /// cancellation, and matches inbound notifications
    pub service_sid: String,
    /// Event URL the subscription was opened against
    pub event_url: Url,
    /// Lease to ask for on every renewal, as originally requested
    pub requested: Timeout,
    /// The renewal (or expiry) timer task. At most one exists per
    /// subscription; it is aborted before any replacement is spawned.
    /// Dropping the handle detaches the task without cancelling it, which
    /// lets the task remove its own entry.
    pub timer: Option<JoinHandle<()>>,
}

impl ClientSubscription {
    pub(crate) fn new(service_sid: String, event_url: Url, requested: Timeout) -> Self {
        Self {
            service_sid,
            event_url,
            requested,
            timer: None,
        }
    }

    /// Abort the timer task, if any. Must not be called from the timer
    /// task itself.
    pub(crate) fn halt_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// A subscription as handed back to the application.
#[derive(Debug, Clone)]
pub struct Subscription {
    /// Locally issued correlation id. All calls and events name the
    /// subscription by this id; it stays stable even if reopening the
    /// subscription changes the publisher-issued SID underneath.
    pub sid: String,
    /// The lease the publisher granted
    pub lease: Timeout,
}
