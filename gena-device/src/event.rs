//! Events emitted by the publisher engine to the application.

/// Events delivered over the channel registered at engine construction.
///
/// The channel is always written to with the registry lock released, so the
/// application may call back into the engine from its receive loop.
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// A subscriber was admitted. The subscription stays inactive (no
    /// notifications flow) until the application accepts it by calling
    /// [`GenaDevice::init_notify`](crate::GenaDevice::init_notify) with the
    /// current state-variable values.
    SubscriptionRequest {
        udn: String,
        service_id: String,
        subscription_id: String,
    },

    /// A subscription lease ran out and the subscription was removed by the
    /// expiry sweeper.
    SubscriptionExpired {
        udn: String,
        service_id: String,
        subscription_id: String,
    },

    /// A subscriber answered a NOTIFY with 412 and was removed.
    SubscriptionDropped {
        udn: String,
        service_id: String,
        subscription_id: String,
    },
}
