//! Integration tests for the control point.
//!
//! A mockito server plays the publisher for the outbound operations, while
//! real NOTIFY requests are sent to the embedded listener.

use std::time::Duration;

use gena_ctrlpt::{CtrlptConfig, CtrlptError, CtrlptEvent, GenaControlPoint};
use gena_wire::Timeout;
use reqwest::Method;
use tokio::sync::mpsc;
use tokio::time::timeout;

const PROPERTY_SET: &str = r#"<?xml version="1.0"?>
<e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0">
<e:property>
<TransportState>PLAYING</TransportState>
</e:property>
</e:propertyset>"#;

fn notify_method() -> Method {
    Method::from_bytes(b"NOTIFY").unwrap()
}

async fn start_cp(
    config: CtrlptConfig,
) -> (GenaControlPoint, mpsc::UnboundedReceiver<CtrlptEvent>) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let (tx, rx) = mpsc::unbounded_channel();
    let cp = GenaControlPoint::new(config, tx)
        .await
        .expect("Failed to start control point");
    (cp, rx)
}

/// Publisher-side mock granting a subscription with the given SID and lease.
async fn mock_subscribe(server: &mut mockito::ServerGuard, sid: &str, lease: &str) -> mockito::Mock {
    server
        .mock("SUBSCRIBE", "/events/avt")
        .match_header("SID", mockito::Matcher::Missing)
        .match_header("NT", "upnp:event")
        .with_status(200)
        .with_header("SID", sid)
        .with_header("TIMEOUT", lease)
        .create_async()
        .await
}

#[tokio::test]
async fn test_notify_flow_end_to_end() {
    let mut server = mockito::Server::new_async().await;
    mock_subscribe(&mut server, "uuid:pub-1", "Second-1800").await;
    let unsub_mock = server
        .mock("UNSUBSCRIBE", "/events/avt")
        .match_header("SID", "uuid:pub-1")
        .with_status(200)
        .create_async()
        .await;

    let (cp, mut events) = start_cp(CtrlptConfig::default().with_port_range(50501, 50600)).await;
    let event_url = format!("{}/events/avt", server.url());
    let sub = cp.subscribe(&event_url, None).await.unwrap();
    // The caller-visible id is locally issued, not the publisher's SID
    assert!(sub.sid.starts_with("uuid:"));
    assert_ne!(sub.sid, "uuid:pub-1");
    assert_eq!(sub.lease, Timeout::Seconds(1800));

    let client = reqwest::Client::new();
    let notify = |seq: u32| {
        client
            .request(notify_method(), cp.callback_url())
            .header("SID", "uuid:pub-1")
            .header("NT", "upnp:event")
            .header("NTS", "upnp:propchange")
            .header("SEQ", seq.to_string())
            .body(PROPERTY_SET)
            .send()
    };

    // Initial event, then the first change
    for expected_seq in 0..2u32 {
        let response = notify(expected_seq).await.unwrap();
        assert_eq!(response.status(), 200);
        let event = timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("Timeout waiting for notification")
            .expect("No event received");
        let CtrlptEvent::Notify {
            subscription_id,
            seq,
            properties,
        } = event
        else {
            panic!("Expected Notify, got {event:?}");
        };
        assert_eq!(subscription_id, sub.sid);
        assert_eq!(seq.0, expected_seq);
        assert_eq!(properties.properties()[0].name, "TransportState");
    }

    cp.unsubscribe(&sub.sid).await.unwrap();
    unsub_mock.assert_async().await;
    assert_eq!(cp.subscription_count().await, 0);

    cp.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_missed_notification_does_not_block_later_ones() {
    let mut server = mockito::Server::new_async().await;
    mock_subscribe(&mut server, "uuid:gap-1", "Second-1800").await;

    let (cp, mut events) = start_cp(CtrlptConfig::default().with_port_range(51201, 51300)).await;
    let event_url = format!("{}/events/avt", server.url());
    let sub = cp.subscribe(&event_url, None).await.unwrap();

    let client = reqwest::Client::new();
    let notify = |seq: u32| {
        client
            .request(notify_method(), cp.callback_url())
            .header("SID", "uuid:gap-1")
            .header("NT", "upnp:event")
            .header("NTS", "upnp:propchange")
            .header("SEQ", seq.to_string())
            .body(PROPERTY_SET)
            .send()
    };

    // Sequence number 1 never arrives (lost in transit); 2 and 3 must
    // still be accepted and reach the application with their numbers
    for expected_seq in [0u32, 2, 3] {
        let response = notify(expected_seq).await.unwrap();
        assert_eq!(response.status(), 200);
        let event = timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("Timeout waiting for notification")
            .expect("No event received");
        assert!(matches!(
            event,
            CtrlptEvent::Notify { subscription_id, seq, .. }
                if subscription_id == sub.sid && seq.0 == expected_seq
        ));
    }

    cp.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_notify_validation_statuses() {
    let (cp, _events) = start_cp(CtrlptConfig::default().with_port_range(50601, 50700)).await;
    let client = reqwest::Client::new();
    let url = cp.callback_url();

    // Missing SID
    let response = client
        .request(notify_method(), &url)
        .header("NT", "upnp:event")
        .header("NTS", "upnp:propchange")
        .header("SEQ", "0")
        .body(PROPERTY_SET)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 412);

    // Missing NT/NTS
    let response = client
        .request(notify_method(), &url)
        .header("SID", "uuid:x")
        .header("SEQ", "0")
        .body(PROPERTY_SET)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // Wrong NT value
    let response = client
        .request(notify_method(), &url)
        .header("SID", "uuid:x")
        .header("NT", "upnp:rootdevice")
        .header("NTS", "upnp:propchange")
        .header("SEQ", "0")
        .body(PROPERTY_SET)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 412);

    // Unparseable SEQ
    let response = client
        .request(notify_method(), &url)
        .header("SID", "uuid:x")
        .header("NT", "upnp:event")
        .header("NTS", "upnp:propchange")
        .header("SEQ", "first")
        .body(PROPERTY_SET)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // Unparseable body
    let response = client
        .request(notify_method(), &url)
        .header("SID", "uuid:x")
        .header("NT", "upnp:event")
        .header("NTS", "upnp:propchange")
        .header("SEQ", "0")
        .body("this is not xml")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // Unknown SID with a non-initial key is refused without any retry delay
    let response = client
        .request(notify_method(), &url)
        .header("SID", "uuid:unknown")
        .header("NT", "upnp:event")
        .header("NTS", "upnp:propchange")
        .header("SEQ", "3")
        .body(PROPERTY_SET)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 412);

    cp.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_initial_event_outrunning_subscribe_response() {
    let mut server = mockito::Server::new_async().await;
    mock_subscribe(&mut server, "uuid:race-1", "Second-1800").await;

    let (cp, mut events) = start_cp(CtrlptConfig::default().with_port_range(50701, 50800)).await;
    let callback_url = cp.callback_url();

    // The initial event arrives before the subscription is recorded; the
    // listener holds it while re-checking the table
    let early_notify = tokio::spawn(async move {
        reqwest::Client::new()
            .request(notify_method(), callback_url)
            .header("SID", "uuid:race-1")
            .header("NT", "upnp:event")
            .header("NTS", "upnp:propchange")
            .header("SEQ", "0")
            .body(PROPERTY_SET)
            .send()
            .await
            .unwrap()
    });

    tokio::time::sleep(Duration::from_millis(150)).await;
    let event_url = format!("{}/events/avt", server.url());
    let sub = cp.subscribe(&event_url, None).await.unwrap();

    let response = early_notify.await.unwrap();
    assert_eq!(response.status(), 200);
    let event = timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("Timeout waiting for held notification")
        .expect("No event received");
    assert!(matches!(
        event,
        CtrlptEvent::Notify { subscription_id, .. } if subscription_id == sub.sid
    ));

    cp.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_auto_renewal_extends_the_lease() {
    let mut server = mockito::Server::new_async().await;
    mock_subscribe(&mut server, "uuid:renew-1", "Second-2").await;
    let renew_mock = server
        .mock("SUBSCRIBE", "/events/avt")
        .match_header("SID", "uuid:renew-1")
        .with_status(200)
        .with_header("SID", "uuid:renew-1")
        .with_header("TIMEOUT", "Second-2")
        .expect_at_least(1)
        .create_async()
        .await;

    let config = CtrlptConfig::default()
        .with_port_range(50801, 50900)
        .with_renewal_timings(2, 1);
    let (cp, mut events) = start_cp(config).await;
    let event_url = format!("{}/events/avt", server.url());
    let sub = cp.subscribe(&event_url, None).await.unwrap();

    // The two-second lease renews after one second
    let event = timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("Timeout waiting for renewal")
        .expect("No event received");
    assert!(matches!(
        event,
        CtrlptEvent::SubscriptionRenewed { subscription_id, lease }
            if subscription_id == sub.sid && lease == Timeout::Seconds(2)
    ));
    renew_mock.assert_async().await;
    assert_eq!(cp.subscription_count().await, 1);

    cp.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failed_auto_renewal_drops_the_subscription() {
    let mut server = mockito::Server::new_async().await;
    mock_subscribe(&mut server, "uuid:renew-2", "Second-2").await;
    server
        .mock("SUBSCRIBE", "/events/avt")
        .match_header("SID", "uuid:renew-2")
        .with_status(412)
        .create_async()
        .await;

    let config = CtrlptConfig::default()
        .with_port_range(50901, 51000)
        .with_renewal_timings(2, 1);
    let (cp, mut events) = start_cp(config).await;
    let event_url = format!("{}/events/avt", server.url());
    let sub = cp.subscribe(&event_url, None).await.unwrap();

    let event = timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("Timeout waiting for renewal failure")
        .expect("No event received");
    assert!(matches!(
        event,
        CtrlptEvent::AutoRenewalFailed { subscription_id, .. }
            if subscription_id == sub.sid
    ));
    assert_eq!(cp.subscription_count().await, 0);

    cp.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_lease_expires_without_auto_renewal() {
    let mut server = mockito::Server::new_async().await;
    mock_subscribe(&mut server, "uuid:lapse-1", "Second-2").await;

    let config = CtrlptConfig::default()
        .with_port_range(51001, 51100)
        .with_auto_renew(false)
        .with_renewal_timings(2, 1);
    let (cp, mut events) = start_cp(config).await;
    let event_url = format!("{}/events/avt", server.url());
    let sub = cp.subscribe(&event_url, None).await.unwrap();

    let event = timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("Timeout waiting for expiration")
        .expect("No event received");
    assert!(matches!(
        event,
        CtrlptEvent::SubscriptionExpired { subscription_id }
            if subscription_id == sub.sid
    ));
    assert_eq!(cp.subscription_count().await, 0);

    cp.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_manual_renewal_replaces_the_pending_timer() {
    let mut server = mockito::Server::new_async().await;
    mock_subscribe(&mut server, "uuid:ren-m1", "Second-2").await;
    // Exactly one renewal request: the manual one. The timer that was
    // standing when renew() was called must not fire on its old schedule.
    let renew_mock = server
        .mock("SUBSCRIBE", "/events/avt")
        .match_header("SID", "uuid:ren-m1")
        .with_status(200)
        .with_header("SID", "uuid:ren-m1")
        .with_header("TIMEOUT", "Second-30")
        .expect(1)
        .create_async()
        .await;

    let config = CtrlptConfig::default()
        .with_port_range(51301, 51400)
        .with_renewal_timings(2, 1);
    let (cp, mut events) = start_cp(config).await;
    let event_url = format!("{}/events/avt", server.url());
    let sub = cp.subscribe(&event_url, None).await.unwrap();

    // The two-second grant scheduled an automatic renewal after one second;
    // renewing by hand first pushes the schedule out to the new lease
    let lease = cp.renew(&sub.sid).await.unwrap();
    assert_eq!(lease, Timeout::Seconds(30));

    tokio::time::sleep(Duration::from_millis(1500)).await;
    renew_mock.assert_async().await;
    assert!(
        timeout(Duration::from_millis(100), events.recv())
            .await
            .is_err(),
        "The replaced timer must not produce a renewal of its own"
    );
    assert_eq!(cp.subscription_count().await, 1);

    cp.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failed_manual_renewal_drops_the_subscription() {
    let mut server = mockito::Server::new_async().await;
    mock_subscribe(&mut server, "uuid:ren-m2", "Second-1800").await;
    server
        .mock("SUBSCRIBE", "/events/avt")
        .match_header("SID", "uuid:ren-m2")
        .with_status(412)
        .create_async()
        .await;

    let (cp, _events) = start_cp(CtrlptConfig::default().with_port_range(51401, 51500)).await;
    let event_url = format!("{}/events/avt", server.url());
    let sub = cp.subscribe(&event_url, None).await.unwrap();

    let err = cp.renew(&sub.sid).await.unwrap_err();
    assert!(matches!(err, CtrlptError::Refused(412)));
    assert_eq!(cp.subscription_count().await, 0);

    // The entry is gone, so a second renewal cannot name it
    let err = cp.renew(&sub.sid).await.unwrap_err();
    assert!(matches!(err, CtrlptError::InvalidSid(_)));

    cp.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_short_lease_request_goes_out_as_the_minimum() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("SUBSCRIBE", "/events/avt")
        .match_header("SID", mockito::Matcher::Missing)
        .match_header("TIMEOUT", "Second-15")
        .with_status(200)
        .with_header("SID", "uuid:min-1")
        .with_header("TIMEOUT", "Second-15")
        .create_async()
        .await;

    let (cp, _events) = start_cp(CtrlptConfig::default().with_port_range(51101, 51200)).await;
    let event_url = format!("{}/events/avt", server.url());
    cp.subscribe(&event_url, Some(Timeout::Seconds(5)))
        .await
        .unwrap();
    mock.assert_async().await;

    cp.shutdown().await.unwrap();
}
