//! Events emitted by the control point to the application.

use gena_wire::{EventKey, PropertySet, Timeout};

/// Events delivered over the channel registered at construction.
///
/// `subscription_id` is always the locally issued correlation id handed out
/// by [`subscribe`](crate::GenaControlPoint::subscribe), never the
/// publisher's SID.
#[derive(Debug, Clone)]
pub enum CtrlptEvent {
    /// A notification arrived and passed validation. Sequence number 0
    /// carries the publisher's full evented state; later keys carry changes.
    Notify {
        subscription_id: String,
        seq: EventKey,
        properties: PropertySet,
    },

    /// An automatic renewal succeeded and the lease was extended.
    SubscriptionRenewed {
        subscription_id: String,
        lease: Timeout,
    },

    /// Automatic renewal failed; the subscription was dropped and the
    /// application must subscribe again if it still wants events.
    AutoRenewalFailed {
        subscription_id: String,
        reason: String,
    },

    /// A lease ran out with auto-renewal off; the subscription was dropped.
    SubscriptionExpired { subscription_id: String },
}
