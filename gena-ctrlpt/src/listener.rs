//! HTTP server for receiving NOTIFY requests from publishers.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener};
use std::time::Duration;

use gena_wire::{EventKey, PropertySet, NT_EVENT, NTS_PROPCHANGE};
use tokio::sync::mpsc;
use warp::http::{Response, StatusCode};
use warp::Filter;

use crate::event::CtrlptEvent;
use crate::subscription::SubscriptionTable;

/// Everything a NOTIFY handler needs, cloned into the route.
#[derive(Clone)]
struct ListenerContext {
    subscriptions: SubscriptionTable,
    event_tx: mpsc::UnboundedSender<CtrlptEvent>,
    race_retry_attempts: u32,
    race_retry_delay: Duration,
}

/// HTTP listener for inbound notifications.
///
/// Binds to the first free port in the configured range and accepts NOTIFY
/// on any path; notifications are told apart by their SID header, so one
/// listener serves every subscription this control point holds.
pub(crate) struct NotifyListener {
    /// The port the listener is bound to
    port: u16,
    /// The base URL for callback registration
    base_url: String,
    /// Shutdown signal sender
    shutdown_tx: Option<mpsc::Sender<()>>,
    /// Server task handle
    server_handle: Option<tokio::task::JoinHandle<()>>,
}

impl NotifyListener {
    /// Create and start the listener.
    pub(crate) async fn start(
        port_range: (u16, u16),
        subscriptions: SubscriptionTable,
        event_tx: mpsc::UnboundedSender<CtrlptEvent>,
        race_retry_attempts: u32,
        race_retry_delay: Duration,
    ) -> Result<Self, String> {
        let port = Self::find_available_port(port_range.0, port_range.1).ok_or_else(|| {
            format!(
                "No available port found in range {}-{}",
                port_range.0, port_range.1
            )
        })?;

        let local_ip = Self::detect_local_ip()
            .ok_or_else(|| "Failed to detect local IP address".to_string())?;
        let base_url = format!("http://{local_ip}:{port}");

        let context = ListenerContext {
            subscriptions,
            event_tx,
            race_retry_attempts,
            race_retry_delay,
        };

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let (ready_tx, mut ready_rx) = mpsc::channel::<()>(1);

        let server_handle = Self::start_server(port, context, shutdown_rx, ready_tx);

        ready_rx
            .recv()
            .await
            .ok_or_else(|| "Listener failed to start".to_string())?;

        Ok(Self {
            port,
            base_url,
            shutdown_tx: Some(shutdown_tx),
            server_handle: Some(server_handle),
        })
    }

    /// Base URL publishers deliver notifications to.
    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn port(&self) -> u16 {
        self.port
    }

    /// Stop accepting requests and wait for in-flight ones to finish.
    pub(crate) async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.server_handle.take() {
            let _ = handle.await;
        }
    }

    /// Find an available port in the given range.
    fn find_available_port(start: u16, end: u16) -> Option<u16> {
        (start..=end).find(|&port| Self::is_port_available(port))
    }

    /// Check if a port is available for binding.
    fn is_port_available(port: u16) -> bool {
        TcpListener::bind(SocketAddr::new(
            IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port,
        ))
        .is_ok()
    }

    /// Detect the local IP address for callback URLs.
    ///
    /// Uses a UDP socket connection to determine the local IP address that
    /// would be used for outbound connections. No data is actually sent.
    fn detect_local_ip() -> Option<IpAddr> {
        let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
        socket.connect("8.8.8.8:80").ok()?;
        let local_addr = socket.local_addr().ok()?;
        Some(local_addr.ip())
    }

    /// Start the HTTP server on the given port.
    fn start_server(
        port: u16,
        context: ListenerContext,
        mut shutdown_rx: mpsc::Receiver<()>,
        ready_tx: mpsc::Sender<()>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let route = warp::method()
                .and(warp::header::optional::<String>("sid"))
                .and(warp::header::optional::<String>("nt"))
                .and(warp::header::optional::<String>("nts"))
                .and(warp::header::optional::<String>("seq"))
                .and(warp::body::bytes())
                .and_then({
                    move |method: warp::http::Method,
                          sid: Option<String>,
                          nt: Option<String>,
                          nts: Option<String>,
                          seq: Option<String>,
                          body: bytes::Bytes| {
                        let context = context.clone();
                        async move {
                            let reply =
                                handle_notify(&context, method, sid, nt, nts, seq, &body).await;
                            Ok::<_, warp::Rejection>(reply)
                        }
                    }
                });

            let (addr, server) = warp::serve(route).bind_with_graceful_shutdown(
                SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), port),
                async move {
                    shutdown_rx.recv().await;
                },
            );

            tracing::info!(%addr, "Notification listener ready");
            let _ = ready_tx.send(()).await;
            server.await;
        })
    }
}

async fn handle_notify(
    context: &ListenerContext,
    method: warp::http::Method,
    sid: Option<String>,
    nt: Option<String>,
    nts: Option<String>,
    seq: Option<String>,
    body: &[u8],
) -> Response<String> {
    if method.as_str() != "NOTIFY" {
        return status_reply(StatusCode::METHOD_NOT_ALLOWED);
    }

    // A notification without a SID cannot be matched to anything
    let Some(sid) = sid else {
        return status_reply(StatusCode::PRECONDITION_FAILED);
    };

    // NT and NTS must both be present and carry the eventing values
    let (Some(nt), Some(nts)) = (nt, nts) else {
        return status_reply(StatusCode::BAD_REQUEST);
    };
    if nt != NT_EVENT || nts != NTS_PROPCHANGE {
        return status_reply(StatusCode::PRECONDITION_FAILED);
    }

    let Some(seq) = seq.as_deref().and_then(|s| s.trim().parse::<u32>().ok()) else {
        return status_reply(StatusCode::BAD_REQUEST);
    };
    let seq = EventKey(seq);

    let body = String::from_utf8_lossy(body);
    let Ok(properties) = PropertySet::parse(&body) else {
        return status_reply(StatusCode::BAD_REQUEST);
    };

    // An initial event can outrun the subscribe response it belongs to: the
    // publisher sends it as soon as the subscription is accepted, possibly
    // before this side has recorded the SID. Re-check the table a few times
    // before giving up.
    let mut attempts = if seq == EventKey::INITIAL {
        context.race_retry_attempts
    } else {
        0
    };
    // The SID header carries the publisher's id; the table is keyed by the
    // local correlation id, so matching scans the (small) table. The
    // sequence number is passed through as received: a notification lost in
    // transit must not condemn every later one.
    let correlation_id = loop {
        {
            let subs = context.subscriptions.read().await;
            if let Some((local_sid, _)) = subs.iter().find(|(_, s)| s.service_sid == sid) {
                break local_sid.clone();
            }
        }
        if attempts == 0 {
            tracing::debug!(%sid, "Notification for unknown subscription");
            return status_reply(StatusCode::PRECONDITION_FAILED);
        }
        attempts -= 1;
        tokio::time::sleep(context.race_retry_delay).await;
    };

    let _ = context.event_tx.send(CtrlptEvent::Notify {
        subscription_id: correlation_id,
        seq,
        properties,
    });
    status_reply(StatusCode::OK)
}

fn status_reply(code: StatusCode) -> Response<String> {
    Response::builder()
        .status(code)
        .body(String::new())
        .unwrap_or_default()
}
