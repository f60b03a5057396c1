//! Client-facing event stream writer.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use relay_common::StreamChunk;
use serde_json::json;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;

use crate::error::{GatewayError, Result};

/// Keep-alive sentinel written on every heartbeat tick.
pub const HEARTBEAT_MARKER: &str = "[HEARTBEAT]";
/// Terminal marker; always the last frame of a completed session.
pub const DONE_MARKER: &str = "[DONE]";

/// Longest a terminal write may wait on a client that stopped reading.
pub const TERMINAL_WRITE_GRACE: Duration = Duration::from_secs(5);

/// One body frame of the streaming response.
pub type Frame = std::result::Result<Bytes, Infallible>;

/// Encode a payload as an event-stream line.
pub fn encode_event(payload: &[u8]) -> Bytes {
    let mut event = BytesMut::with_capacity(payload.len() + 8);
    event.extend_from_slice(b"data: ");
    event.extend_from_slice(payload);
    event.extend_from_slice(b"\n\n");
    event.freeze()
}

/// Single writer for one session's response body.
///
/// Clones share the same channel. Once [`EventWriter::finish`] or
/// [`EventWriter::close`] has run, every later write fails with
/// `ClientWriteFailure`; the `Option` taken under the lock is the session's
/// terminated latch.
#[derive(Clone)]
pub struct EventWriter {
    tx: Arc<Mutex<Option<mpsc::Sender<Frame>>>>,
    liveness: mpsc::WeakSender<Frame>,
}

impl EventWriter {
    /// Create a writer and the receiver that feeds the response body.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let liveness = tx.downgrade();
        (
            Self {
                tx: Arc::new(Mutex::new(Some(tx))),
                liveness,
            },
            rx,
        )
    }

    async fn write_event(&self, payload: &[u8]) -> Result<()> {
        let guard = self.tx.lock().await;
        let tx = guard.as_ref().ok_or(GatewayError::ClientWriteFailure)?;
        tx.send(Ok(encode_event(payload)))
            .await
            .map_err(|_| GatewayError::ClientWriteFailure)
    }

    pub async fn chunk(&self, chunk: &StreamChunk) -> Result<()> {
        let payload = serde_json::to_string(chunk)
            .map_err(|e| GatewayError::MalformedChunk(e.to_string()))?;
        self.write_event(payload.as_bytes()).await
    }

    /// Forward an undecodable upstream record as-is.
    pub async fn raw(&self, line: &[u8]) -> Result<()> {
        self.write_event(line).await
    }

    pub async fn heartbeat(&self) -> Result<()> {
        self.write_event(HEARTBEAT_MARKER.as_bytes()).await
    }

    /// Write the terminal marker and close the stream.
    ///
    /// Returns `false` without writing if the stream was already terminated.
    /// The marker is dropped if the client does not take it within
    /// [`TERMINAL_WRITE_GRACE`]; the stream closes either way.
    pub async fn finish(&self) -> bool {
        let Some(tx) = self.tx.lock().await.take() else {
            return false;
        };
        let until = Instant::now() + TERMINAL_WRITE_GRACE;
        send_terminal(&tx, DONE_MARKER.as_bytes(), until).await;
        true
    }

    /// Write `{"error": message}` then the terminal marker, and close the stream.
    ///
    /// Both frames share one [`TERMINAL_WRITE_GRACE`] budget.
    pub async fn fail(&self, message: &str) -> bool {
        let Some(tx) = self.tx.lock().await.take() else {
            return false;
        };
        let until = Instant::now() + TERMINAL_WRITE_GRACE;
        let error = json!({ "error": message }).to_string();
        if send_terminal(&tx, error.as_bytes(), until).await {
            send_terminal(&tx, DONE_MARKER.as_bytes(), until).await;
        }
        true
    }

    /// Close the stream without a terminal marker.
    pub async fn close(&self) -> bool {
        self.tx.lock().await.take().is_some()
    }

    /// Non-blocking check for a departed client.
    pub fn client_gone_now(&self) -> bool {
        self.liveness.upgrade().map_or(true, |tx| tx.is_closed())
    }

    /// Resolves once the response body has been dropped, or the writer terminated.
    pub async fn client_gone(&self) {
        if let Some(tx) = self.liveness.upgrade() {
            tx.closed().await;
        }
    }
}

/// Send one terminal frame, giving up at `until`. `false` if it was not delivered.
async fn send_terminal(tx: &mpsc::Sender<Frame>, payload: &[u8], until: Instant) -> bool {
    let left = until.saturating_duration_since(Instant::now());
    match tx.send_timeout(Ok(encode_event(payload)), left).await {
        Ok(()) => true,
        Err(SendTimeoutError::Timeout(_)) => {
            tracing::warn!(
                grace_ms = TERMINAL_WRITE_GRACE.as_millis() as u64,
                "Client stopped reading, closing stream without terminal frames"
            );
            false
        }
        Err(SendTimeoutError::Closed(_)) => {
            tracing::debug!("Client gone before terminal frame");
            false
        }
    }
}
