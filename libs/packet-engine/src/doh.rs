//! Turns a raw datagram payload into a DoH HTTP POST and streams back the
//! response body.

use std::collections::HashMap;
use std::sync::Arc;

use reqwest::{Client, StatusCode};
use thiserror::Error;
use url::Url;

const DNS_PACKET_CONTENT_TYPE: &str = "application/dns-packet";

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("transport error talking to DoH upstream: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("DoH upstream returned HTTP status {0}")]
    BadStatus(StatusCode),
    #[error("failed reading DoH response body: {0}")]
    BodyRead(#[source] reqwest::Error),
}

/// Immutable snapshot of upstream configuration, captured once at Start.
/// Changing it requires Stop followed by Start.
#[derive(Clone)]
pub struct UpstreamConfig {
    pub url: Url,
    /// Extra headers to send on every request. Stored as a multimap since a
    /// single header name may legitimately repeat.
    pub headers: Arc<HashMap<String, Vec<String>>>,
    pub client: Client,
    /// Whether to strip the IP/UDP prefix before sending only the DNS
    /// payload (RFC 8484 shape), or forward the datagram unmodified as
    /// received from the TUN device. See the open issue in the design notes:
    /// the wire format consumed by the configured upstream is unresolved
    /// upstream of this proxy, so it is made explicit and adjustable here
    /// rather than guessed.
    pub strip_ip_headers: bool,
}

impl UpstreamConfig {
    pub fn new(url: Url, client: Client) -> Self {
        Self {
            url,
            headers: Arc::new(HashMap::new()),
            client,
            strip_ip_headers: false,
        }
    }
}

/// A single outbound DoH round-trip, abstracted so tests can substitute a
/// fake transport.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn resolve(&self, query: &[u8]) -> Result<bytes::Bytes, ResolveError>;
}

pub struct ReqwestTransport {
    config: UpstreamConfig,
}

impl ReqwestTransport {
    pub fn new(config: UpstreamConfig) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl Transport for ReqwestTransport {
    async fn resolve(&self, query: &[u8]) -> Result<bytes::Bytes, ResolveError> {
        let body = if self.config.strip_ip_headers {
            strip_ip_udp_prefix(query)
        } else {
            query
        };

        let mut req = self
            .config
            .client
            .post(self.config.url.clone())
            .header(reqwest::header::CONTENT_TYPE, DNS_PACKET_CONTENT_TYPE)
            .body(body.to_vec());

        for (name, values) in self.config.headers.iter() {
            for value in values {
                req = req.header(name.as_str(), value.as_str());
            }
        }

        let resp = req.send().await.map_err(ResolveError::Transport)?;
        let status = resp.status();
        if status != StatusCode::OK {
            return Err(ResolveError::BadStatus(status));
        }

        resp.bytes().await.map_err(ResolveError::BodyRead)
    }
}

/// Strips a well-formed IPv4 (20-byte) + UDP (8-byte) prefix, returning only
/// the DNS message. Best-effort: if `query` is too short this returns it
/// unmodified rather than panicking, since the caller has no recovery path.
fn strip_ip_udp_prefix(query: &[u8]) -> &[u8] {
    query.get(28..).unwrap_or(query)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_ip_udp_prefix_removes_28_bytes() {
        let query = (0u8..40).collect::<Vec<_>>();
        assert_eq!(strip_ip_udp_prefix(&query), &query[28..]);
    }

    #[test]
    fn strip_ip_udp_prefix_on_short_buffer_is_a_no_op() {
        let query = vec![1, 2, 3];
        assert_eq!(strip_ip_udp_prefix(&query), &query[..]);
    }
}
