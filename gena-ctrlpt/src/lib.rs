//! # gena-ctrlpt
//!
//! Control-point-side GENA eventing: opens subscriptions against publisher
//! event URLs, keeps them alive with automatic renewal, and receives
//! notifications on an embedded HTTP listener.
//!
//! # Architecture
//!
//! - [`GenaControlPoint`] owns the subscription table, an HTTP client for
//!   the outbound operations, and the NOTIFY listener.
//! - Each finite-lease subscription carries one timer task that renews it
//!   shortly before expiry (or, with auto-renewal off, reports its
//!   expiration).
//! - Validated notifications and lifecycle changes arrive on an event
//!   channel as [`CtrlptEvent`] values.
//!
//! # Example
//!
//! ```no_run
//! use gena_ctrlpt::{CtrlptConfig, CtrlptEvent, GenaControlPoint};
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (tx, mut rx) = mpsc::unbounded_channel();
//!     let cp = GenaControlPoint::new(CtrlptConfig::default(), tx).await?;
//!
//!     let sub = cp
//!         .subscribe("http://192.168.1.100:1400/events/avt", None)
//!         .await?;
//!     println!("Subscribed as {}", sub.sid);
//!
//!     while let Some(event) = rx.recv().await {
//!         if let CtrlptEvent::Notify { subscription_id, seq, properties } = event {
//!             println!("{subscription_id} #{seq}: {} properties", properties.len());
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod event;

mod listener;
mod ops;
mod subscription;

pub use config::CtrlptConfig;
pub use error::{CtrlptError, Result};
pub use event::CtrlptEvent;
pub use subscription::Subscription;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use gena_wire::Timeout;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use listener::NotifyListener;
use subscription::{ClientSubscription, SubscriptionTable};

/// The control-point engine.
pub struct GenaControlPoint {
    config: Arc<CtrlptConfig>,
    client: reqwest::Client,
    subscriptions: SubscriptionTable,
    listener: NotifyListener,
    event_tx: mpsc::UnboundedSender<CtrlptEvent>,
}

impl GenaControlPoint {
    /// Create the engine and start its NOTIFY listener.
    pub async fn new(
        config: CtrlptConfig,
        event_tx: mpsc::UnboundedSender<CtrlptEvent>,
    ) -> Result<Self> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| CtrlptError::Configuration(e.to_string()))?;

        let subscriptions: SubscriptionTable = Arc::new(RwLock::new(HashMap::new()));
        let listener = NotifyListener::start(
            config.port_range,
            Arc::clone(&subscriptions),
            event_tx.clone(),
            config.race_retry_attempts,
            config.race_retry_delay,
        )
        .await
        .map_err(CtrlptError::ServerError)?;

        info!(url = listener.base_url(), "Control point started");
        Ok(Self {
            config: Arc::new(config),
            client,
            subscriptions,
            listener,
            event_tx,
        })
    }

    /// The URL publishers are told to deliver notifications to.
    pub fn callback_url(&self) -> String {
        format!("{}/notify", self.listener.base_url())
    }

    /// Port the NOTIFY listener is bound to.
    pub fn port(&self) -> u16 {
        self.listener.port()
    }

    /// Open a subscription against a publisher's event URL.
    ///
    /// `requested` defaults to the configured lease; a request below the
    /// configured minimum goes out as the minimum. The publisher may grant
    /// a different lease than requested; the granted one is returned and
    /// drives renewal scheduling.
    ///
    /// The returned [`Subscription`] carries a locally issued correlation
    /// id, not the publisher's SID; all further calls and events use it.
    pub async fn subscribe(
        &self,
        event_url: &str,
        requested: Option<Timeout>,
    ) -> Result<Subscription> {
        let event_url =
            Url::parse(event_url).map_err(|e| CtrlptError::InvalidUrl(e.to_string()))?;
        let requested = match requested.unwrap_or(Timeout::Seconds(self.config.default_timeout)) {
            Timeout::Seconds(s) => Timeout::Seconds(s.max(self.config.min_subscription_time)),
            Timeout::Infinite => Timeout::Infinite,
        };

        let granted =
            ops::subscribe(&self.client, &event_url, &self.callback_url(), requested).await?;
        let sid = format!("{}{}", gena_wire::SID_PREFIX, Uuid::new_v4());
        info!(%sid, service_sid = %granted.sid, lease = %granted.lease, "Subscription opened");

        let mut sub = ClientSubscription::new(granted.sid, event_url, requested);
        sub.timer = renewal_delay(granted.lease, &self.config).map(|delay| {
            spawn_timer(
                self.client.clone(),
                Arc::clone(&self.config),
                Arc::clone(&self.subscriptions),
                self.event_tx.clone(),
                sid.clone(),
                delay,
            )
        });
        self.subscriptions.write().await.insert(sid.clone(), sub);

        Ok(Subscription {
            sid,
            lease: granted.lease,
        })
    }

    /// Renew a subscription now, outside the automatic schedule.
    ///
    /// The standing timer is cancelled first and rescheduled from the newly
    /// granted lease. A failed renewal drops the subscription: the publisher
    /// no longer honors the SID, so nothing will arrive for it again.
    pub async fn renew(&self, sid: &str) -> Result<Timeout> {
        let (event_url, requested, service_sid) = {
            let mut subs = self.subscriptions.write().await;
            let sub = subs
                .get_mut(sid)
                .ok_or_else(|| CtrlptError::InvalidSid(sid.to_string()))?;
            sub.halt_timer();
            (sub.event_url.clone(), sub.requested, sub.service_sid.clone())
        };

        match ops::renew(&self.client, &event_url, &service_sid, requested).await {
            Ok(lease) => {
                let mut subs = self.subscriptions.write().await;
                if let Some(sub) = subs.get_mut(sid) {
                    sub.timer = renewal_delay(lease, &self.config).map(|delay| {
                        spawn_timer(
                            self.client.clone(),
                            Arc::clone(&self.config),
                            Arc::clone(&self.subscriptions),
                            self.event_tx.clone(),
                            sid.to_string(),
                            delay,
                        )
                    });
                }
                Ok(lease)
            }
            Err(e) => {
                warn!(sid, error = %e, "Renewal failed, dropping subscription");
                self.subscriptions.write().await.remove(sid);
                Err(e)
            }
        }
    }

    /// Cancel a subscription.
    ///
    /// The local record is removed unconditionally; the UNSUBSCRIBE request
    /// is best-effort, since an unreachable publisher will expire the lease
    /// on its own.
    pub async fn unsubscribe(&self, sid: &str) -> Result<()> {
        let sub = {
            let mut subs = self.subscriptions.write().await;
            let mut sub = subs
                .remove(sid)
                .ok_or_else(|| CtrlptError::InvalidSid(sid.to_string()))?;
            sub.halt_timer();
            sub
        };
        if let Err(e) = ops::unsubscribe(&self.client, &sub.event_url, &sub.service_sid).await {
            warn!(sid, error = %e, "UNSUBSCRIBE request failed");
        }
        Ok(())
    }

    /// Number of open subscriptions.
    pub async fn subscription_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    /// Cancel every subscription and stop the listener.
    pub async fn shutdown(self) -> Result<()> {
        let drained: Vec<(String, ClientSubscription)> = {
            let mut subs = self.subscriptions.write().await;
            subs.drain().collect()
        };
        for (sid, mut sub) in drained {
            sub.halt_timer();
            if let Err(e) = ops::unsubscribe(&self.client, &sub.event_url, &sub.service_sid).await
            {
                warn!(%sid, error = %e, "UNSUBSCRIBE request failed during shutdown");
            }
        }
        self.listener.shutdown().await;
        Ok(())
    }
}

/// How long to wait before acting on a lease.
///
/// Granted leases below the configured minimum are scheduled as if they were
/// the minimum, otherwise a stingy publisher would turn renewal into a busy
/// loop. Infinite leases need no timer at all.
fn renewal_delay(lease: Timeout, config: &CtrlptConfig) -> Option<Duration> {
    let Timeout::Seconds(seconds) = lease else {
        return None;
    };
    let seconds = seconds.max(config.min_subscription_time);
    let seconds = if config.auto_renew {
        seconds - config.renew_margin
    } else {
        seconds
    };
    Some(Duration::from_secs(u64::from(seconds)))
}

/// The per-subscription timer task.
///
/// With auto-renewal on it renews shortly before each expiry and reschedules
/// itself; a failed renewal drops the subscription and is reported. With
/// auto-renewal off it waits out the lease, drops the subscription, and
/// reports the expiration.
fn spawn_timer(
    client: reqwest::Client,
    config: Arc<CtrlptConfig>,
    subscriptions: SubscriptionTable,
    event_tx: mpsc::UnboundedSender<CtrlptEvent>,
    sid: String,
    mut delay: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(delay).await;

            if !config.auto_renew {
                // Entry removal drops this task's own handle, which detaches
                // rather than cancels; the send below still runs
                let removed = subscriptions.write().await.remove(&sid);
                if removed.is_some() {
                    let _ = event_tx.send(CtrlptEvent::SubscriptionExpired {
                        subscription_id: sid.clone(),
                    });
                }
                return;
            }

            let (event_url, requested, service_sid) = {
                let subs = subscriptions.read().await;
                match subs.get(&sid) {
                    Some(sub) => (
                        sub.event_url.clone(),
                        sub.requested,
                        sub.service_sid.clone(),
                    ),
                    None => return,
                }
            };

            match ops::renew(&client, &event_url, &service_sid, requested).await {
                Ok(lease) => {
                    // The entry may have been unsubscribed while the renewal
                    // request was in flight
                    if !subscriptions.read().await.contains_key(&sid) {
                        return;
                    }
                    let next = renewal_delay(lease, &config);
                    let _ = event_tx.send(CtrlptEvent::SubscriptionRenewed {
                        subscription_id: sid.clone(),
                        lease,
                    });
                    match next {
                        Some(next_delay) => delay = next_delay,
                        // The publisher switched to an infinite lease
                        None => return,
                    }
                }
                Err(e) => {
                    warn!(%sid, error = %e, "Automatic renewal failed, dropping subscription");
                    let removed = subscriptions.write().await.remove(&sid);
                    if removed.is_some() {
                        let _ = event_tx.send(CtrlptEvent::AutoRenewalFailed {
                            subscription_id: sid.clone(),
                            reason: e.to_string(),
                        });
                    }
                    return;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_renewal_delay_applies_margin() {
        let config = CtrlptConfig::default();
        assert_eq!(
            renewal_delay(Timeout::Seconds(300), &config),
            Some(Duration::from_secs(290))
        );
    }

    #[test]
    fn test_renewal_delay_clamps_short_leases() {
        let config = CtrlptConfig::default();
        // A 3-second grant schedules as the 15-second minimum minus margin
        assert_eq!(
            renewal_delay(Timeout::Seconds(3), &config),
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn test_renewal_delay_infinite_needs_no_timer() {
        let config = CtrlptConfig::default();
        assert_eq!(renewal_delay(Timeout::Infinite, &config), None);
    }

    #[test]
    fn test_renewal_delay_without_auto_renew_waits_full_lease() {
        let config = CtrlptConfig::default().with_auto_renew(false);
        assert_eq!(
            renewal_delay(Timeout::Seconds(300), &config),
            Some(Duration::from_secs(300))
        );
    }
}
