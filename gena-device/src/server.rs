//! HTTP server for handling inbound SUBSCRIBE and UNSUBSCRIBE requests.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::SystemTime;

use gena_wire::{parse_callback_header, Timeout, NT_EVENT, SID_PREFIX};
use tokio::sync::mpsc;
use uuid::Uuid;
use warp::http::{Response, StatusCode};
use warp::Filter;

use crate::config::DeviceConfig;
use crate::dispatcher;
use crate::event::DeviceEvent;
use crate::notify::NotifyTransport;
use crate::registry::{AdmitError, Registry, RenewError, Subscription};

/// Node id fed into time-based SID generation.
const SID_NODE: [u8; 6] = *b"gena-d";

/// Everything a subscription-request handler needs, cloned into the route.
#[derive(Clone)]
struct HandlerContext {
    registry: Registry,
    config: Arc<DeviceConfig>,
    transport: Arc<dyn NotifyTransport>,
    event_tx: mpsc::UnboundedSender<DeviceEvent>,
}

/// HTTP event server for subscription management.
///
/// Binds to the first free port in the configured range and dispatches
/// SUBSCRIBE and UNSUBSCRIBE requests against the paths reserved in the
/// registry. Notifications themselves go out through per-subscription worker
/// tasks, not through this server.
pub(crate) struct EventServer {
    /// The port the server is bound to
    port: u16,
    /// Base URL advertised in device descriptions
    base_url: String,
    /// Shutdown signal sender
    shutdown_tx: Option<mpsc::Sender<()>>,
    /// Server task handle
    server_handle: Option<tokio::task::JoinHandle<()>>,
}

impl EventServer {
    /// Create and start the event server.
    pub(crate) async fn start(
        config: Arc<DeviceConfig>,
        registry: Registry,
        transport: Arc<dyn NotifyTransport>,
        event_tx: mpsc::UnboundedSender<DeviceEvent>,
    ) -> Result<Self, String> {
        let port = Self::find_available_port(config.port_range.0, config.port_range.1)
            .ok_or_else(|| {
                format!(
                    "No available port found in range {}-{}",
                    config.port_range.0, config.port_range.1
                )
            })?;

        let local_ip = Self::detect_local_ip()
            .ok_or_else(|| "Failed to detect local IP address".to_string())?;
        let base_url = format!("http://{local_ip}:{port}");

        let context = HandlerContext {
            registry,
            config,
            transport,
            event_tx,
        };

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let (ready_tx, mut ready_rx) = mpsc::channel::<()>(1);

        let server_handle = Self::start_server(port, context, shutdown_rx, ready_tx);

        ready_rx
            .recv()
            .await
            .ok_or_else(|| "Server failed to start".to_string())?;

        Ok(Self {
            port,
            base_url,
            shutdown_tx: Some(shutdown_tx),
            server_handle: Some(server_handle),
        })
    }

    /// Base URL subscribers reach this server at, `http://<ip>:<port>`.
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

    /// Detect the local IP address to advertise in the base URL.
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
        context: HandlerContext,
        mut shutdown_rx: mpsc::Receiver<()>,
        ready_tx: mpsc::Sender<()>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let route = warp::method()
                .and(warp::path::full())
                .and(warp::header::optional::<String>("callback"))
                .and(warp::header::optional::<String>("nt"))
                .and(warp::header::optional::<String>("sid"))
                .and(warp::header::optional::<String>("timeout"))
                .and_then({
                    move |method: warp::http::Method,
                          path: warp::path::FullPath,
                          callback: Option<String>,
                          nt: Option<String>,
                          sid: Option<String>,
                          timeout: Option<String>| {
                        let context = context.clone();
                        async move {
                            let reply = handle_request(
                                &context,
                                method,
                                path.as_str(),
                                callback,
                                nt,
                                sid,
                                timeout,
                            )
                            .await;
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

            tracing::info!(%addr, "Event server listening");
            let _ = ready_tx.send(()).await;
            server.await;
        })
    }
}

async fn handle_request(
    context: &HandlerContext,
    method: warp::http::Method,
    path: &str,
    callback: Option<String>,
    nt: Option<String>,
    sid: Option<String>,
    timeout: Option<String>,
) -> Response<String> {
    match method.as_str() {
        "SUBSCRIBE" => match sid {
            Some(sid) => handle_renewal(context, path, callback, nt, &sid, timeout).await,
            None => handle_subscribe(context, path, callback, nt, timeout).await,
        },
        "UNSUBSCRIBE" => handle_unsubscribe(context, path, callback, nt, sid).await,
        _ => status_reply(StatusCode::METHOD_NOT_ALLOWED),
    }
}

/// Admit a new subscription.
async fn handle_subscribe(
    context: &HandlerContext,
    path: &str,
    callback: Option<String>,
    nt: Option<String>,
    timeout: Option<String>,
) -> Response<String> {
    // NT must be present and carry the event notification type
    let Some(nt) = nt else {
        return status_reply(StatusCode::BAD_REQUEST);
    };
    if nt != NT_EVENT {
        return status_reply(StatusCode::PRECONDITION_FAILED);
    }

    // CALLBACK must yield at least one usable delivery URL
    let delivery_urls = callback
        .as_deref()
        .map(parse_callback_header)
        .unwrap_or_default();
    if delivery_urls.is_empty() {
        return status_reply(StatusCode::PRECONDITION_FAILED);
    }

    let Some((key, spec)) = context.registry.resolve_path(path).await else {
        return status_reply(StatusCode::NOT_FOUND);
    };

    let lease = granted_lease(&context.config, timeout.as_deref());
    let expires_at = lease.as_duration().map(|d| SystemTime::now() + d);
    let sid = format!("{SID_PREFIX}{}", Uuid::now_v1(&SID_NODE));

    // The worker exists before the subscription is linked; if admission
    // fails the queue sender is dropped and the worker exits on its own.
    let (queue_tx, queue_rx) = mpsc::unbounded_channel();
    dispatcher::spawn_worker(
        context.registry.clone(),
        Arc::clone(&context.transport),
        key,
        context.config.ordered_delivery,
        queue_rx,
        context.event_tx.clone(),
    );

    let subscription = Subscription::new(sid.clone(), delivery_urls, expires_at, queue_tx);
    let limit = context.config.max_subscriptions;
    match context.registry.admit(key, subscription, limit).await {
        Ok(info) => {
            // Reported after admission so the application can accept it
            // with init_notify as soon as it sees the event
            let _ = context.event_tx.send(DeviceEvent::SubscriptionRequest {
                udn: spec.udn,
                service_id: spec.service_id,
                subscription_id: info.sid,
            });
            subscription_reply(&sid, lease)
        }
        Err(AdmitError::TooManySubscribers) => status_reply(StatusCode::SERVICE_UNAVAILABLE),
        Err(AdmitError::ServiceGone) => status_reply(StatusCode::NOT_FOUND),
    }
}

/// Extend an existing subscription's lease.
async fn handle_renewal(
    context: &HandlerContext,
    path: &str,
    callback: Option<String>,
    nt: Option<String>,
    sid: &str,
    timeout: Option<String>,
) -> Response<String> {
    // A renewal names a subscription; carrying CALLBACK or NT as well makes
    // the request ambiguous
    if callback.is_some() || nt.is_some() {
        return status_reply(StatusCode::BAD_REQUEST);
    }

    let Some((key, _)) = context.registry.resolve_path(path).await else {
        return status_reply(StatusCode::NOT_FOUND);
    };

    let lease = granted_lease(&context.config, timeout.as_deref());
    let expires_at = lease.as_duration().map(|d| SystemTime::now() + d);
    match context.registry.renew(key, sid, expires_at).await {
        Ok(()) => subscription_reply(sid, lease),
        Err(RenewError::UnknownSid) => status_reply(StatusCode::PRECONDITION_FAILED),
        Err(RenewError::ServiceGone) => status_reply(StatusCode::NOT_FOUND),
    }
}

/// Cancel a subscription.
async fn handle_unsubscribe(
    context: &HandlerContext,
    path: &str,
    callback: Option<String>,
    nt: Option<String>,
    sid: Option<String>,
) -> Response<String> {
    if callback.is_some() || nt.is_some() {
        return status_reply(StatusCode::BAD_REQUEST);
    }
    let Some(sid) = sid else {
        return status_reply(StatusCode::PRECONDITION_FAILED);
    };
    let Some((key, _)) = context.registry.resolve_path(path).await else {
        return status_reply(StatusCode::NOT_FOUND);
    };

    // Cancellation is idempotent: an unknown SID usually means the lease
    // already ran out, and the subscriber's goal is met either way
    if !context.registry.remove(key, &sid).await {
        tracing::debug!(%sid, "UNSUBSCRIBE for unknown subscription");
    }
    status_reply(StatusCode::OK)
}

/// Apply the admission policy to the requested lease.
fn granted_lease(config: &DeviceConfig, timeout: Option<&str>) -> Timeout {
    let requested = timeout
        .and_then(Timeout::parse_header)
        .unwrap_or(Timeout::Seconds(config.default_timeout));
    match requested {
        Timeout::Infinite if !config.allow_infinite => Timeout::Seconds(config.default_timeout),
        other => other.clamp(
            config.min_subscription_timeout,
            config.max_subscription_timeout,
        ),
    }
}

fn status_reply(code: StatusCode) -> Response<String> {
    Response::builder()
        .status(code)
        .body(String::new())
        .unwrap_or_default()
}

fn subscription_reply(sid: &str, lease: Timeout) -> Response<String> {
    Response::builder()
        .status(StatusCode::OK)
        .header("SID", sid)
        .header("TIMEOUT", lease.to_string())
        .body(String::new())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_granted_lease_clamps() {
        let config = DeviceConfig::default();
        assert_eq!(
            granted_lease(&config, Some("Second-5")),
            Timeout::Seconds(60)
        );
        assert_eq!(
            granted_lease(&config, Some("Second-90000")),
            Timeout::Seconds(7200)
        );
        assert_eq!(
            granted_lease(&config, Some("Second-1800")),
            Timeout::Seconds(1800)
        );
    }

    #[test]
    fn test_granted_lease_defaults_on_garbage() {
        let config = DeviceConfig::default();
        assert_eq!(granted_lease(&config, None), Timeout::Seconds(1801));
        assert_eq!(
            granted_lease(&config, Some("ten minutes")),
            Timeout::Seconds(1801)
        );
    }

    #[test]
    fn test_granted_lease_infinite_policy() {
        let config = DeviceConfig::default();
        assert_eq!(
            granted_lease(&config, Some("Second-infinite")),
            Timeout::Seconds(1801)
        );

        let config = DeviceConfig::default().with_infinite_leases(true);
        assert_eq!(
            granted_lease(&config, Some("Second-infinite")),
            Timeout::Infinite
        );
    }
}
