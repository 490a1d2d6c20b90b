//! The three outbound GENA operations: subscribe, renew, unsubscribe.

use gena_wire::{Timeout, NT_EVENT};
use reqwest::Method;
use url::Url;

use crate::error::{CtrlptError, Result};

fn subscribe_method() -> Method {
    // The byte string is a valid token, this cannot fail
    Method::from_bytes(b"SUBSCRIBE").unwrap_or(Method::GET)
}

fn unsubscribe_method() -> Method {
    Method::from_bytes(b"UNSUBSCRIBE").unwrap_or(Method::GET)
}

/// What the publisher granted on subscribe or renewal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Granted {
    pub sid: String,
    pub lease: Timeout,
}

/// Open a new subscription: SUBSCRIBE with CALLBACK, NT, and TIMEOUT.
///
/// The publisher answers with the SID it minted and the lease it actually
/// granted, which may differ from the one requested.
pub(crate) async fn subscribe(
    client: &reqwest::Client,
    event_url: &Url,
    callback_url: &str,
    requested: Timeout,
) -> Result<Granted> {
    let response = client
        .request(subscribe_method(), event_url.as_str())
        .header("CALLBACK", format!("<{callback_url}>"))
        .header("NT", NT_EVENT)
        .header("TIMEOUT", requested.to_string())
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(CtrlptError::Refused(status.as_u16()));
    }

    let sid = header_value(&response, "SID")?
        .ok_or_else(|| CtrlptError::BadResponse("missing SID header".to_string()))?;
    let lease = granted_lease(&response)?;
    Ok(Granted { sid, lease })
}

/// Extend an existing subscription: SUBSCRIBE with SID and TIMEOUT only.
pub(crate) async fn renew(
    client: &reqwest::Client,
    event_url: &Url,
    sid: &str,
    requested: Timeout,
) -> Result<Timeout> {
    let response = client
        .request(subscribe_method(), event_url.as_str())
        .header("SID", sid)
        .header("TIMEOUT", requested.to_string())
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(CtrlptError::Refused(status.as_u16()));
    }
    granted_lease(&response)
}

/// Cancel a subscription: UNSUBSCRIBE with SID.
pub(crate) async fn unsubscribe(
    client: &reqwest::Client,
    event_url: &Url,
    sid: &str,
) -> Result<()> {
    let response = client
        .request(unsubscribe_method(), event_url.as_str())
        .header("SID", sid)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(CtrlptError::Refused(status.as_u16()));
    }
    Ok(())
}

fn header_value(response: &reqwest::Response, name: &str) -> Result<Option<String>> {
    match response.headers().get(name) {
        Some(value) => {
            let value = value
                .to_str()
                .map_err(|_| CtrlptError::BadResponse(format!("{name} header is not text")))?;
            Ok(Some(value.to_string()))
        }
        None => Ok(None),
    }
}

fn granted_lease(response: &reqwest::Response) -> Result<Timeout> {
    let value = header_value(response, "TIMEOUT")?
        .ok_or_else(|| CtrlptError::BadResponse("missing TIMEOUT header".to_string()))?;
    Timeout::parse_header(&value)
        .ok_or_else(|| CtrlptError::BadResponse(format!("unparseable TIMEOUT header: {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> reqwest::Client {
        reqwest::Client::new()
    }

    #[tokio::test]
    async fn test_subscribe_parses_grant() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("SUBSCRIBE", "/events/avt")
            .match_header("NT", "upnp:event")
            .match_header("CALLBACK", "<http://10.0.0.7:49400/notify>")
            .match_header("TIMEOUT", "Second-1801")
            .with_status(200)
            .with_header("SID", "uuid:pub-1")
            .with_header("TIMEOUT", "Second-300")
            .create_async()
            .await;

        let url = Url::parse(&format!("{}/events/avt", server.url())).unwrap();
        let granted = subscribe(
            &client(),
            &url,
            "http://10.0.0.7:49400/notify",
            Timeout::Seconds(1801),
        )
        .await
        .unwrap();

        mock.assert_async().await;
        assert_eq!(granted.sid, "uuid:pub-1");
        assert_eq!(granted.lease, Timeout::Seconds(300));
    }

    #[tokio::test]
    async fn test_subscribe_surfaces_refusal() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("SUBSCRIBE", "/events/avt")
            .with_status(503)
            .create_async()
            .await;

        let url = Url::parse(&format!("{}/events/avt", server.url())).unwrap();
        let err = subscribe(&client(), &url, "http://10.0.0.7:49400/notify", Timeout::Seconds(1801))
            .await
            .unwrap_err();
        assert!(matches!(err, CtrlptError::Refused(503)));
    }

    #[tokio::test]
    async fn test_subscribe_rejects_reply_without_sid() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("SUBSCRIBE", "/events/avt")
            .with_status(200)
            .with_header("TIMEOUT", "Second-300")
            .create_async()
            .await;

        let url = Url::parse(&format!("{}/events/avt", server.url())).unwrap();
        let err = subscribe(&client(), &url, "http://10.0.0.7:49400/notify", Timeout::Seconds(1801))
            .await
            .unwrap_err();
        assert!(matches!(err, CtrlptError::BadResponse(_)));
    }

    #[tokio::test]
    async fn test_renew_sends_sid_without_callback() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("SUBSCRIBE", "/events/avt")
            .match_header("SID", "uuid:pub-1")
            .match_header("CALLBACK", mockito::Matcher::Missing)
            .match_header("NT", mockito::Matcher::Missing)
            .with_status(200)
            .with_header("SID", "uuid:pub-1")
            .with_header("TIMEOUT", "Second-600")
            .create_async()
            .await;

        let url = Url::parse(&format!("{}/events/avt", server.url())).unwrap();
        let lease = renew(&client(), &url, "uuid:pub-1", Timeout::Seconds(600))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(lease, Timeout::Seconds(600));
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("UNSUBSCRIBE", "/events/avt")
            .match_header("SID", "uuid:pub-1")
            .with_status(200)
            .create_async()
            .await;

        let url = Url::parse(&format!("{}/events/avt", server.url())).unwrap();
        unsubscribe(&client(), &url, "uuid:pub-1").await.unwrap();
        mock.assert_async().await;
    }
}
