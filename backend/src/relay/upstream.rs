//! Outbound call to the inference service.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::header::{ACCEPT, ACCEPT_ENCODING, CACHE_CONTROL, CONNECTION, CONTENT_TYPE};
use reqwest::{Client, Response};
use relay_common::ChatStreamRequest;

use super::session::SessionContext;
use crate::config::{StreamConfig, UpstreamConfig};
use crate::error::{GatewayError, Result};

/// Raw upstream body, block by block.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Whether reads from an upstream stream can carry their own deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPolicy {
    /// Each read may wait at most this long before it is retried.
    Bounded(Duration),
    /// Reads wait until data arrives or the session ends.
    Unbounded,
}

impl From<Option<Duration>> for ReadPolicy {
    fn from(timeout: Option<Duration>) -> Self {
        timeout.map_or(ReadPolicy::Unbounded, ReadPolicy::Bounded)
    }
}

/// Open upstream response body.
///
/// Dropping the stream releases the underlying connection.
pub struct UpstreamStream {
    body: ByteStream,
    policy: ReadPolicy,
}

impl UpstreamStream {
    pub fn new<S>(body: S, policy: ReadPolicy) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self {
            body: Box::pin(body),
            policy,
        }
    }

    pub fn policy(&self) -> ReadPolicy {
        self.policy
    }

    /// Next block of the body, `None` at end of stream. Cancel-safe.
    pub async fn next_block(&mut self) -> Option<io::Result<Bytes>> {
        self.body.next().await
    }
}

impl fmt::Debug for UpstreamStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamStream")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Drop for UpstreamStream {
    fn drop(&mut self) {
        tracing::debug!("Upstream connection released");
    }
}

/// Opens one upstream stream per session.
#[async_trait]
pub trait Forwarder: Send + Sync {
    /// Send `request` upstream and return its body once the status is known.
    ///
    /// Must give up with `UpstreamCanceled` once the session signal is
    /// cancelled and with `UpstreamTimeout` once its deadline passes. The
    /// request handler never cancels the signal while `open` is pending: a
    /// client that disconnects drops this future instead, so `UpstreamCanceled`
    /// only comes from a caller that cancels the session explicitly.
    async fn open(&self, request: &ChatStreamRequest, session: &SessionContext)
        -> Result<UpstreamStream>;
}

/// Forwarder that POSTs to the inference service over HTTP.
pub struct HttpForwarder {
    http_client: Client,
    url: String,
    read_policy: ReadPolicy,
    error_snippet_bytes: usize,
}

impl HttpForwarder {
    pub fn new(upstream: &UpstreamConfig, stream: &StreamConfig) -> reqwest::Result<Self> {
        let http_client = Client::builder()
            .connect_timeout(Duration::from_secs(upstream.connect_timeout_secs))
            .timeout(Duration::from_secs(upstream.request_timeout_secs))
            .pool_max_idle_per_host(upstream.pool_max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(upstream.pool_idle_timeout_secs))
            .tcp_keepalive(Duration::from_secs(upstream.tcp_keepalive_secs))
            .build()?;

        Ok(Self {
            http_client,
            url: upstream.url.clone(),
            read_policy: stream.read_timeout().into(),
            error_snippet_bytes: upstream.error_snippet_bytes,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// A failed dial is unavailable even when it failed by timing out.
    fn classify(&self, err: reqwest::Error, session: &SessionContext) -> GatewayError {
        if err.is_connect() {
            GatewayError::UpstreamUnavailable(err.to_string())
        } else if err.is_timeout() {
            GatewayError::UpstreamTimeout(session.total_timeout().as_secs())
        } else {
            GatewayError::UpstreamUnavailable(err.to_string())
        }
    }
}

#[async_trait]
impl Forwarder for HttpForwarder {
    async fn open(
        &self,
        request: &ChatStreamRequest,
        session: &SessionContext,
    ) -> Result<UpstreamStream> {
        let body = serde_json::to_vec(request)
            .map_err(|e| GatewayError::MalformedRequest(e.to_string()))?;

        tracing::debug!(
            session_id = %session.id(),
            url = %self.url,
            bytes = body.len(),
            "Sending chat stream request upstream"
        );

        // Compression stays off: a recompressed body would be buffered
        // instead of delivered incrementally.
        let send = self
            .http_client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json; charset=utf-8")
            .header(ACCEPT, "text/event-stream; charset=utf-8")
            .header(CACHE_CONTROL, "no-cache")
            .header(CONNECTION, "keep-alive")
            .header(ACCEPT_ENCODING, "identity")
            .body(body)
            .send();

        let response = tokio::select! {
            biased;
            _ = session.signal().cancelled() => return Err(GatewayError::UpstreamCanceled),
            _ = tokio::time::sleep_until(session.deadline()) => {
                return Err(GatewayError::UpstreamTimeout(session.total_timeout().as_secs()));
            }
            result = send => result.map_err(|e| self.classify(e, session))?,
        };

        let status = response.status();
        tracing::debug!(
            session_id = %session.id(),
            status = status.as_u16(),
            content_type = ?response.headers().get(CONTENT_TYPE),
            "Upstream responded"
        );

        if !status.is_success() {
            let snippet = tokio::select! {
                _ = tokio::time::sleep_until(session.deadline()) => String::new(),
                snippet = read_snippet(response, self.error_snippet_bytes) => snippet,
            };
            return Err(GatewayError::UpstreamRejected {
                status: status.as_u16(),
                snippet,
            });
        }

        let body = response.bytes_stream().map(|block| block.map_err(io::Error::other));
        Ok(UpstreamStream::new(body, self.read_policy))
    }
}

/// Read at most `limit` bytes of an error body, then drop the response.
async fn read_snippet(mut response: Response, limit: usize) -> String {
    let mut buf: Vec<u8> = Vec::with_capacity(limit.min(4096));
    while buf.len() < limit {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                let take = (limit - buf.len()).min(chunk.len());
                buf.extend_from_slice(&chunk[..take]);
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!("Failed to read upstream error body: {}", e);
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_policy_from_config() {
        assert_eq!(
            ReadPolicy::from(Some(Duration::from_secs(30))),
            ReadPolicy::Bounded(Duration::from_secs(30))
        );
        assert_eq!(ReadPolicy::from(None), ReadPolicy::Unbounded);
    }

    #[test]
    fn test_forwarder_uses_configured_url_and_policy() {
        let upstream = UpstreamConfig {
            url: "http://inference:8000/api/chat/stream".to_string(),
            ..UpstreamConfig::default()
        };
        let stream = StreamConfig {
            read_timeout_secs: 0,
            ..StreamConfig::default()
        };
        let forwarder = HttpForwarder::new(&upstream, &stream).unwrap();
        assert_eq!(forwarder.url(), "http://inference:8000/api/chat/stream");
        assert_eq!(forwarder.read_policy, ReadPolicy::Unbounded);
    }

    #[tokio::test]
    async fn test_next_block_yields_until_end() {
        let blocks = futures_util::stream::iter(vec![
            Ok(Bytes::from_static(b"a")),
            Ok(Bytes::from_static(b"b")),
        ]);
        let mut stream = UpstreamStream::new(blocks, ReadPolicy::Unbounded);
        assert_eq!(stream.next_block().await.unwrap().unwrap(), "a");
        assert_eq!(stream.next_block().await.unwrap().unwrap(), "b");
        assert!(stream.next_block().await.is_none());
    }
}
