//! CALLBACK header parsing into ordered delivery-URL lists.

use url::Url;

/// One callback address a subscriber registered to receive notifications at.
///
/// Keeps the raw text alongside the parsed form: the raw text is echoed in
/// diagnostics, the parsed form drives connection establishment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryUrl {
    /// The URL exactly as it appeared between `<` and `>`
    pub raw: String,
    /// The parsed URL, guaranteed to carry a host
    pub url: Url,
}

impl DeliveryUrl {
    /// The URL text as the subscriber supplied it.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// host:port authority of this delivery URL.
    pub fn authority(&self) -> String {
        let host = self.url.host_str().unwrap_or_default();
        match self.url.port_or_known_default() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }
}

/// Parse a CALLBACK header value into an ordered list of delivery URLs.
///
/// The header carries URLs delimited by `<` and `>`, e.g.
/// `<http://10.0.0.5:1234/a><http://10.0.0.5:1234/b>`. Only http URLs with a
/// network authority (a bare host:port at minimum) are kept; malformed or
/// authority-less entries are skipped, preserving the order of the rest.
/// An empty result means the header was unusable.
pub fn parse_callback_header(value: &str) -> Vec<DeliveryUrl> {
    let mut urls = Vec::new();
    let mut rest = value;
    while let Some(start) = rest.find('<') {
        let after = &rest[start + 1..];
        let Some(end) = after.find('>') else {
            break;
        };
        let raw = &after[..end];
        if let Ok(url) = Url::parse(raw) {
            if url.scheme() == "http" && url.has_host() {
                urls.push(DeliveryUrl {
                    raw: raw.to_string(),
                    url,
                });
            }
        }
        rest = &after[end + 1..];
    }
    urls
}
