use anyhow::Result;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

/// How often the consumer looks at the front of the queue.
pub const CONSUMER_TICK: Duration = Duration::from_secs(1);

/// Outbound transport for finished messages.
pub trait Deliver: Send + Sync {
    /// Sends `text` once. An `Err` means the message is lost.
    fn deliver(&self, text: &str) -> impl Future<Output = Result<()>> + Send;
}

/// A formatted message waiting for its due time.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    pub text: String,
    pub due_at: Instant,
}

/// Outcome counts for a batch of deliveries.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

/// FIFO of pending messages shared between the tail loop and the consumer.
///
/// Due times only gate the front: a message that is due but sits behind one
/// that is not waits its turn. The queue is unbounded.
#[derive(Debug, Default)]
pub struct DeliveryQueue {
    pending: Mutex<VecDeque<QueuedMessage>>,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl DeliveryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn pending(&self) -> MutexGuard<'_, VecDeque<QueuedMessage>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends to the back. Never blocks on delivery and never rejects.
    pub fn enqueue(&self, text: String, due_at: Instant) {
        self.pending().push_back(QueuedMessage { text, due_at });
    }

    pub fn len(&self) -> usize {
        self.pending().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending().is_empty()
    }

    /// Total messages the transport accepted.
    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Total messages dropped after a failed delivery.
    pub fn failed_count(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Removes the front message if its due time has passed.
    pub fn pop_due(&self, now: Instant) -> Option<QueuedMessage> {
        let mut pending = self.pending();
        if pending.front().is_some_and(|m| m.due_at <= now) {
            pending.pop_front()
        } else {
            None
        }
    }

    /// Delivers front messages in order until the queue is empty or the
    /// front is not yet due. The lock is never held across a delivery.
    pub async fn deliver_due<D: Deliver>(&self, now: Instant, deliverer: &D) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        while let Some(message) = self.pop_due(now) {
            self.send(message, deliverer, &mut report).await;
        }
        report
    }

    /// Delivers every pending message immediately, ignoring due times.
    /// Used only at shutdown.
    pub async fn flush_all<D: Deliver>(&self, deliverer: &D) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        if self.is_empty() {
            info!("No queued messages to send");
            return report;
        }

        let drained: Vec<QueuedMessage> = self.pending().drain(..).collect();
        info!(count = drained.len(), "Sending queued messages before shutdown");
        for message in drained {
            self.send(message, deliverer, &mut report).await;
        }
        report
    }

    async fn send<D: Deliver>(
        &self,
        message: QueuedMessage,
        deliverer: &D,
        report: &mut DeliveryReport,
    ) {
        match deliverer.deliver(&message.text).await {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                report.delivered += 1;
                info!(text = %message.text, "Sent to Discord");
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                report.failed += 1;
                let reason = format!("{e:#}");
                error!(text = %message.text, error = %reason, "Delivery failed; message dropped");
            }
        }
    }
}

/// Background consumer: every [`CONSUMER_TICK`] delivers whatever is due at
/// the front of `queue`. Returns when `stop_rx` flips to `true`; a delivery
/// already in progress finishes first.
pub async fn run_consumer<D: Deliver>(
    queue: Arc<DeliveryQueue>,
    deliverer: Arc<D>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut ticker = interval(CONSUMER_TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                queue.deliver_due(Instant::now(), deliverer.as_ref()).await;
            }
        }
    }

    debug!(
        delivered = queue.delivered_count(),
        failed = queue.failed_count(),
        pending = queue.len(),
        "Queue consumer stopped"
    );
}
