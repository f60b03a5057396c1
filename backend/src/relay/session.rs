//! One client-to-upstream session, from open stream to terminal marker.

use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use super::heartbeat::Heartbeat;
use super::records::{Record, RecordReader};
use super::signal::SessionSignal;
use super::upstream::{ReadPolicy, UpstreamStream};
use super::writer::EventWriter;
use crate::error::{GatewayError, Result};

/// Identity, cancellation and deadline shared by everything a session runs.
#[derive(Debug, Clone)]
pub struct SessionContext {
    id: String,
    signal: SessionSignal,
    deadline: Instant,
    total_timeout: Duration,
}

impl SessionContext {
    /// Start the session clock. The deadline is fixed from this instant.
    pub fn new(total_timeout: Duration) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            signal: SessionSignal::new(),
            deadline: Instant::now() + total_timeout,
            total_timeout,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn signal(&self) -> &SessionSignal {
        &self.signal
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn total_timeout(&self) -> Duration {
        self.total_timeout
    }

    fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

/// How the relay loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Upstream finished; `records` were forwarded.
    Done { records: usize },
    /// The overall deadline passed.
    TimedOut,
    /// The upstream broke mid-stream.
    Failed(String),
    /// Client gone or session cancelled.
    Aborted,
}

/// Drives one open upstream stream to completion.
pub struct Session {
    ctx: SessionContext,
    writer: EventWriter,
    heartbeat_interval: Duration,
}

impl Session {
    pub fn new(ctx: SessionContext, writer: EventWriter, heartbeat_interval: Duration) -> Self {
        Self {
            ctx,
            writer,
            heartbeat_interval,
        }
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    /// Relay `upstream` to the client and terminate the stream exactly once.
    pub async fn run(self, upstream: UpstreamStream) -> RelayOutcome {
        let started = std::time::Instant::now();
        let heartbeat = Heartbeat::spawn(
            self.writer.clone(),
            self.heartbeat_interval,
            self.ctx.signal().clone(),
            self.ctx.id().to_string(),
        );

        let outcome = relay_loop(&self.ctx, &self.writer, upstream).await;

        self.ctx.signal().cancel();
        heartbeat.stop().await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            RelayOutcome::Done { records } => {
                self.writer.finish().await;
                tracing::info!(
                    session_id = %self.ctx.id(),
                    records = records,
                    elapsed_ms = elapsed_ms,
                    "Chat stream completed"
                );
            }
            RelayOutcome::TimedOut => {
                let err = GatewayError::UpstreamTimeout(self.ctx.total_timeout().as_secs());
                self.terminate_with_error(&err.to_string()).await;
                tracing::warn!(
                    session_id = %self.ctx.id(),
                    elapsed_ms = elapsed_ms,
                    "Chat stream hit the session deadline"
                );
            }
            RelayOutcome::Failed(message) => {
                let err = GatewayError::UpstreamUnavailable(message.clone());
                self.terminate_with_error(&err.to_string()).await;
                tracing::error!(
                    session_id = %self.ctx.id(),
                    error = %message,
                    elapsed_ms = elapsed_ms,
                    "Upstream stream failed"
                );
            }
            RelayOutcome::Aborted => {
                self.writer.close().await;
                tracing::info!(
                    session_id = %self.ctx.id(),
                    elapsed_ms = elapsed_ms,
                    "Client disconnected, stream aborted"
                );
            }
        }

        outcome
    }

    async fn terminate_with_error(&self, message: &str) {
        if !self.writer.fail(message).await {
            tracing::debug!(session_id = %self.ctx.id(), "Stream already terminated");
        }
    }
}

enum Read {
    Block(Option<std::io::Result<bytes::Bytes>>),
    Idle(Duration),
}

async fn read_next(upstream: &mut UpstreamStream) -> Read {
    match upstream.policy() {
        ReadPolicy::Bounded(limit) => {
            match tokio::time::timeout(limit, upstream.next_block()).await {
                Ok(block) => Read::Block(block),
                Err(_) => Read::Idle(limit),
            }
        }
        ReadPolicy::Unbounded => Read::Block(upstream.next_block().await),
    }
}

/// Forward one decoded record. `Err` means the client is gone.
async fn emit(writer: &EventWriter, record: &Record) -> Result<()> {
    match record {
        Record::Chunk(chunk) => writer.chunk(chunk).await,
        Record::Raw(line) => writer.raw(line).await,
    }
}

/// Emit `record` unless the session deadline has passed. A client that
/// stops reading cannot hold the write past the deadline.
async fn forward(
    ctx: &SessionContext,
    writer: &EventWriter,
    record: &Record,
) -> Option<RelayOutcome> {
    if ctx.expired() {
        return Some(RelayOutcome::TimedOut);
    }
    match tokio::time::timeout_at(ctx.deadline(), emit(writer, record)).await {
        Ok(Ok(())) => None,
        Ok(Err(_)) => Some(RelayOutcome::Aborted),
        Err(_) => Some(RelayOutcome::TimedOut),
    }
}

/// Reading, decoding and emitting until the stream ends or the session stops.
///
/// Takes ownership of `upstream`, so the connection is released on every
/// return path.
async fn relay_loop(
    ctx: &SessionContext,
    writer: &EventWriter,
    mut upstream: UpstreamStream,
) -> RelayOutcome {
    let mut reader = RecordReader::new();
    let mut records = 0usize;
    let deadline = tokio::time::sleep_until(ctx.deadline());
    tokio::pin!(deadline);

    loop {
        if writer.client_gone_now() {
            return RelayOutcome::Aborted;
        }

        let read = tokio::select! {
            biased;
            _ = ctx.signal().cancelled() => return RelayOutcome::Aborted,
            _ = writer.client_gone() => return RelayOutcome::Aborted,
            _ = &mut deadline => return RelayOutcome::TimedOut,
            read = read_next(&mut upstream) => read,
        };

        let block = match read {
            Read::Idle(limit) => {
                tracing::debug!(
                    session_id = %ctx.id(),
                    error = %GatewayError::ReadTimeout(limit.as_secs()),
                    "No upstream data yet, retrying read"
                );
                continue;
            }
            Read::Block(None) => {
                if let Some(record) = reader.finish() {
                    if let Some(outcome) = forward(ctx, writer, &record).await {
                        return outcome;
                    }
                    records += 1;
                }
                tracing::debug!(session_id = %ctx.id(), "Upstream stream ended");
                return RelayOutcome::Done { records };
            }
            Read::Block(Some(Err(e))) => return RelayOutcome::Failed(e.to_string()),
            Read::Block(Some(Ok(block))) => block,
        };

        reader.push(&block);
        for record in reader.drain() {
            if let Some(outcome) = forward(ctx, writer, &record).await {
                return outcome;
            }
            records += 1;
            if record.is_finished() {
                tracing::debug!(session_id = %ctx.id(), "Upstream reported finished");
                return RelayOutcome::Done { records };
            }
        }
    }
}
