//! Per-subscription delivery workers.
//!
//! Every subscription owns one queue and one worker task. The worker drains
//! the queue one job at a time, so a subscriber's notifications hit the wire
//! in the order they were published without any cross-subscription
//! coordination. Slow subscribers only slow themselves down.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::event::DeviceEvent;
use crate::notify::{DeliveryJob, DeliveryOutcome, NotifyTransport};
use crate::registry::{JobDisposition, Registry, ServiceKey};

/// Spawn the delivery worker for one subscription.
///
/// The worker runs until the queue's sender side is dropped, which happens
/// when the subscription leaves the registry.
pub(crate) fn spawn_worker(
    registry: Registry,
    transport: Arc<dyn NotifyTransport>,
    key: ServiceKey,
    ordered: bool,
    mut queue_rx: mpsc::UnboundedReceiver<DeliveryJob>,
    event_tx: mpsc::UnboundedSender<DeviceEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(job) = queue_rx.recv().await {
            let urls = match registry
                .inspect_job(key, &job.sid, job.seq, ordered)
                .await
            {
                JobDisposition::Deliver(urls) => urls,
                JobDisposition::Skip => continue,
            };

            let outcome = deliver(transport.as_ref(), &urls, &job).await;
            trace!(sid = %job.sid, seq = %job.seq, ?outcome, "Delivery attempt finished");

            let dropped = registry.complete_delivery(key, &job.sid, outcome).await;
            if let Some(info) = dropped {
                debug!(sid = %info.sid, "Subscriber answered 412, subscription removed");
                let _ = event_tx.send(DeviceEvent::SubscriptionDropped {
                    udn: info.udn,
                    service_id: info.service_id,
                    subscription_id: info.sid,
                });
            }
        }
    })
}

/// Try each callback URL in registration order until one answers.
///
/// The alternate URLs cover unreachable subscribers, not unhappy ones: only
/// a transport failure falls through to the next URL. The first URL that
/// produces an HTTP response settles the attempt, whatever its status
/// (200 accepted, 412 gone, anything else a rejection). Exhausting the list
/// without any response is a rejection too.
async fn deliver(
    transport: &dyn NotifyTransport,
    urls: &[gena_wire::DeliveryUrl],
    job: &DeliveryJob,
) -> DeliveryOutcome {
    for url in urls {
        match transport.deliver(url, &job.sid, job.seq, &job.payload).await {
            Ok(200) => return DeliveryOutcome::Accepted,
            Ok(412) => return DeliveryOutcome::Gone,
            Ok(status) => {
                trace!(sid = %job.sid, url = url.as_str(), status, "Subscriber refused NOTIFY");
                return DeliveryOutcome::Rejected;
            }
            Err(e) => {
                trace!(sid = %job.sid, url = url.as_str(), error = %e, "NOTIFY transport failure");
            }
        }
    }
    DeliveryOutcome::Rejected
}
