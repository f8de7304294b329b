//! The session's keepalive task.

use crate::model::Envelope;

use parking_lot::Mutex;
use std::{sync::Arc, time::Duration};
use tokio::{task::JoinHandle, time::sleep};
use tracing::trace;

/// Periodically emits HEARTBEAT frames carrying the last seen sequence
/// number, as an independent cooperative task.
pub(crate) struct Heartbeat {
    handle: Option<JoinHandle<()>>,
    sent_at: Arc<Mutex<Option<tokio::time::Instant>>>,
}

impl Heartbeat {
    /// Starts beating at `interval`, sending immediately.
    pub(crate) fn start(
        interval: Duration,
        tx: flume::Sender<Envelope>,
        sequence: Arc<Mutex<Option<u64>>>,
    ) -> Self {
        let sent_at = Arc::new(Mutex::new(None));
        let task_sent_at = Arc::clone(&sent_at);

        let handle = tokio::spawn(async move {
            loop {
                *task_sent_at.lock() = Some(tokio::time::Instant::now());
                let beat = Envelope::heartbeat(*sequence.lock());

                if tx.send_async(beat).await.is_err() {
                    break;
                }

                trace!("Sent heartbeat.");
                sleep(interval).await;
            }
        });

        Self {
            handle: Some(handle),
            sent_at,
        }
    }

    /// Departure time of the most recent heartbeat.
    pub(crate) fn sent_at(&self) -> Option<tokio::time::Instant> {
        *self.sent_at.lock()
    }

    /// Cancels the underlying task. Idempotent.
    pub(crate) fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn beats_carry_the_current_sequence() {
        let (tx, rx) = flume::unbounded();
        let sequence = Arc::new(Mutex::new(Some(3)));

        let mut heartbeat = Heartbeat::start(Duration::from_millis(10), tx, Arc::clone(&sequence));

        let first = rx.recv_async().await.unwrap();
        assert_eq!(first.d.as_u64(), Some(3));

        *sequence.lock() = Some(4);
        let second = rx.recv_async().await.unwrap();
        assert_eq!(second.d.as_u64(), Some(4));

        heartbeat.stop();
        heartbeat.stop();

        // Give the aborted task a moment, then confirm silence.
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(rx.drain().count() <= 1);
    }
}
