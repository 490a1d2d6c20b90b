//! NOTIFY payloads and the transport seam used to deliver them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gena_wire::{DeliveryUrl, EventKey, NT_EVENT, NTS_PROPCHANGE};
use reqwest::Method;

use crate::error::TransportError;

/// One rendered event message, shared across every subscriber it fans out to.
///
/// The property-set XML is rendered exactly once per `notify_all` call; each
/// per-subscription delivery job holds an `Arc` to the same payload and the
/// buffer is freed when the last job finishes.
#[derive(Debug)]
pub struct NotifyPayload {
    pub udn: String,
    pub service_id: String,
    /// Property-set XML body, rendered once.
    pub body: String,
}

/// One queued delivery for one subscription.
///
/// Jobs for a subscription are enqueued in sequence-number order and drained
/// by that subscription's worker task one at a time.
#[derive(Debug)]
pub struct DeliveryJob {
    pub sid: String,
    pub seq: EventKey,
    pub payload: Arc<NotifyPayload>,
}

/// Outcome of delivering one NOTIFY to one subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Subscriber answered 200.
    Accepted,
    /// Subscriber answered 412; the subscription must be removed.
    Gone,
    /// Transport failure or a non-200 non-412 response.
    Rejected,
}

/// Transport used to push NOTIFY messages to subscriber callback URLs.
///
/// Split out behind a trait so dispatch ordering can be exercised in tests
/// with a transport that records and reorders completions.
#[async_trait]
pub trait NotifyTransport: Send + Sync + 'static {
    /// Deliver one NOTIFY. Returns the subscriber's HTTP status code.
    async fn deliver(
        &self,
        url: &DeliveryUrl,
        sid: &str,
        seq: EventKey,
        payload: &NotifyPayload,
    ) -> Result<u16, TransportError>;
}

/// Production transport: NOTIFY over HTTP via a shared connection pool.
pub struct HttpNotifyTransport {
    client: reqwest::Client,
}

impl HttpNotifyTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl NotifyTransport for HttpNotifyTransport {
    async fn deliver(
        &self,
        url: &DeliveryUrl,
        sid: &str,
        seq: EventKey,
        payload: &NotifyPayload,
    ) -> Result<u16, TransportError> {
        let method = Method::from_bytes(b"NOTIFY")
            .map_err(|e| TransportError::SendRecv(e.to_string()))?;

        let response = self
            .client
            .request(method, url.as_str())
            .header("HOST", url.authority())
            .header("CONTENT-TYPE", "text/xml; charset=\"utf-8\"")
            .header("NT", NT_EVENT)
            .header("NTS", NTS_PROPCHANGE)
            .header("SID", sid)
            .header("SEQ", seq.0.to_string())
            .body(payload.body.clone())
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    TransportError::Connect(e.to_string())
                } else {
                    TransportError::SendRecv(e.to_string())
                }
            })?;

        Ok(response.status().as_u16())
    }
}
