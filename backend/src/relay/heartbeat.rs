//! Keep-alive ticker for idle streams.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::signal::SessionSignal;
use super::writer::EventWriter;

/// Background task writing `[HEARTBEAT]` every interval.
///
/// The task ends on its own when the session is cancelled or a write fails.
/// Dropping the handle aborts it.
pub struct Heartbeat {
    handle: Option<JoinHandle<()>>,
}

impl Heartbeat {
    pub fn spawn(
        writer: EventWriter,
        every: Duration,
        signal: SessionSignal,
        session_id: String,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = signal.cancelled() => break,
                    _ = ticker.tick() => {
                        if writer.heartbeat().await.is_err() {
                            tracing::debug!(session_id = %session_id, "Heartbeat write failed, stopping");
                            break;
                        }
                        tracing::trace!(session_id = %session_id, "Heartbeat sent");
                    }
                }
            }
        });

        Self {
            handle: Some(handle),
        }
    }

    /// Stop the task and wait until it has fully exited.
    pub async fn stop(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_ticks_after_each_interval() {
        let (writer, mut rx) = EventWriter::channel(8);
        let signal = SessionSignal::new();
        let heartbeat = Heartbeat::spawn(
            writer.clone(),
            Duration::from_secs(10),
            signal.clone(),
            "s1".to_string(),
        );

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(21)).await;
        let first = rx.recv().await.unwrap().unwrap();
        let second = rx.recv().await.unwrap().unwrap();
        assert_eq!(first, "data: [HEARTBEAT]\n\n");
        assert_eq!(second, "data: [HEARTBEAT]\n\n");
        assert!(rx.try_recv().is_err());

        heartbeat.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_ticks_after_stop() {
        let (writer, mut rx) = EventWriter::channel(8);
        let heartbeat = Heartbeat::spawn(
            writer.clone(),
            Duration::from_secs(1),
            SessionSignal::new(),
            "s2".to_string(),
        );
        heartbeat.stop().await;

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(writer.finish().await);
        assert_eq!(rx.recv().await.unwrap().unwrap(), "data: [DONE]\n\n");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exits_on_cancel() {
        let (writer, mut rx) = EventWriter::channel(8);
        let signal = SessionSignal::new();
        let heartbeat = Heartbeat::spawn(
            writer,
            Duration::from_secs(1),
            signal.clone(),
            "s3".to_string(),
        );
        signal.cancel();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(rx.try_recv().is_err());
        heartbeat.stop().await;
    }
}
