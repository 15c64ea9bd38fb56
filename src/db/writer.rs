use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use super::{DurableRecord, PersistenceError, RecordStore};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

#[derive(Debug, Default)]
struct WriterCounters {
    written: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriterStats {
    pub written: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub dropped: u64,
}

enum WriterCommand {
    Append(DurableRecord),
    Flush(oneshot::Sender<()>),
}

/// Handle to the background task that appends records in submission order.
/// Submitting never blocks the caller; failed appends are retried and then
/// routed to the store's dead-letter sink.
#[derive(Clone)]
pub struct DurableWriter {
    tx: mpsc::UnboundedSender<WriterCommand>,
    counters: Arc<WriterCounters>,
}

impl DurableWriter {
    pub fn spawn(store: Arc<dyn RecordStore>, policy: RetryPolicy) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let counters = Arc::new(WriterCounters::default());
        tokio::spawn(run_writer(store, policy, rx, Arc::clone(&counters)));
        Self { tx, counters }
    }

    pub fn submit(&self, record: DurableRecord) {
        if self.tx.send(WriterCommand::Append(record)).is_err() {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            warn!("durable writer stopped, record dropped");
        }
    }

    /// Resolves once every record submitted before this call has been written or dead-lettered.
    pub async fn flush(&self) -> Result<(), PersistenceError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(WriterCommand::Flush(done_tx))
            .map_err(|_| PersistenceError::Unavailable("durable writer stopped".to_string()))?;
        done_rx
            .await
            .map_err(|_| PersistenceError::Unavailable("durable writer stopped".to_string()))
    }

    pub fn stats(&self) -> WriterStats {
        WriterStats {
            written: self.counters.written.load(Ordering::Relaxed),
            retried: self.counters.retried.load(Ordering::Relaxed),
            dead_lettered: self.counters.dead_lettered.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

async fn run_writer(
    store: Arc<dyn RecordStore>,
    policy: RetryPolicy,
    mut rx: mpsc::UnboundedReceiver<WriterCommand>,
    counters: Arc<WriterCounters>,
) {
    while let Some(command) = rx.recv().await {
        match command {
            WriterCommand::Append(record) => {
                write_with_retry(store.as_ref(), &policy, &record, &counters).await;
            }
            WriterCommand::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("durable writer stopped");
}

async fn write_with_retry(
    store: &dyn RecordStore,
    policy: &RetryPolicy,
    record: &DurableRecord,
    counters: &WriterCounters,
) {
    let attempts = policy.max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match store.append(record).await {
            Ok(()) => {
                counters.written.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Err(e) => {
                last_error = e.to_string();
                warn!(
                    kind = record.kind(),
                    attempt,
                    error = %e,
                    "durable append failed"
                );
                if attempt < attempts {
                    counters.retried.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(policy.backoff(attempt)).await;
                }
            }
        }
    }

    counters.dead_lettered.fetch_add(1, Ordering::Relaxed);
    let reason = format!("append failed after {attempts} attempts: {last_error}");
    if let Err(e) = store.dead_letter(record, &reason).await {
        error!(
            kind = record.kind(),
            error = %e,
            "dead letter write failed, record lost"
        );
    } else {
        error!(kind = record.kind(), reason = %reason, "record routed to dead letters");
    }
}
