//! Stream producer: publish with asynchronous, attributable delivery outcomes.
//!
//! `publish` only enqueues with the [`RecordSink`]; the broker's delivery report
//! is collected by a background report loop which routes it to the mandatory
//! [`DeliveryHandler`] and to the caller's [`DeliveryReceipt`].
//!
//! Shutdown stops accepting new records, flushes the sink and waits for the
//! report loop to drain. Anything still in flight when the timeout elapses is
//! reported to the handler as one batch failure with
//! [`DeliveryFailure::Unflushed`].

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::bus::{BusError, DeliveryFailure, DeliveryFuture, DeliveryOutcome, RecordSink, StreamRecord};

/// Correlation id assigned to every accepted publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublishId(u64);

impl PublishId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PublishId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pub-{}", self.0)
    }
}

/// Delivery report for one published record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub publish_id: PublishId,
    pub topic: String,
    pub key: Option<String>,
    pub outcome: DeliveryOutcome,
}

/// Receives every delivery report the producer observes.
pub trait DeliveryHandler: Send + Sync {
    fn on_delivery(&self, report: &DeliveryReport);

    /// Records abandoned at shutdown. Defaults to reporting each one.
    fn on_batch_failure(&self, reports: &[DeliveryReport]) {
        for report in reports {
            self.on_delivery(report);
        }
    }
}

/// Handler that logs outcomes: successes at debug, failures at error.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingDeliveryHandler;

impl DeliveryHandler for LoggingDeliveryHandler {
    fn on_delivery(&self, report: &DeliveryReport) {
        match &report.outcome {
            DeliveryOutcome::Delivered { partition, offset } => debug!(
                publish_id = %report.publish_id,
                topic = %report.topic,
                key = ?report.key,
                partition,
                offset,
                "Record delivered"
            ),
            DeliveryOutcome::Failed(failure) => error!(
                publish_id = %report.publish_id,
                topic = %report.topic,
                key = ?report.key,
                failure = %failure,
                "Record delivery failed"
            ),
        }
    }

    fn on_batch_failure(&self, reports: &[DeliveryReport]) {
        let keys: Vec<&str> = reports.iter().filter_map(|r| r.key.as_deref()).collect();
        error!(
            count = reports.len(),
            keys = ?keys,
            "Records not flushed before producer shutdown"
        );
    }
}

/// Producer errors.
#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    #[error("Producer is shut down")]
    Closed,

    #[error("Record was not enqueued: {0}")]
    Enqueue(#[from] BusError),
}

/// Handle to the eventual outcome of one publish.
#[derive(Debug)]
pub struct DeliveryReceipt {
    publish_id: PublishId,
    outcome: oneshot::Receiver<DeliveryOutcome>,
}

impl DeliveryReceipt {
    pub fn publish_id(&self) -> PublishId {
        self.publish_id
    }

    /// Wait for the delivery report.
    pub async fn outcome(self) -> DeliveryOutcome {
        self.outcome
            .await
            .unwrap_or(DeliveryOutcome::Failed(DeliveryFailure::Unflushed))
    }

    /// Wait for the delivery report for at most `timeout`.
    ///
    /// `None` means no report arrived in time; it is still routed to the
    /// [`DeliveryHandler`] when it does.
    pub async fn wait(self, timeout: Duration) -> Option<DeliveryOutcome> {
        tokio::time::timeout(timeout, self.outcome()).await.ok()
    }
}

/// Result of [`StreamProducer::shutdown`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Publishes that had no delivery report when the timeout elapsed.
    pub unflushed: Vec<PublishId>,
}

impl FlushReport {
    pub fn is_clean(&self) -> bool {
        self.unflushed.is_empty()
    }
}

struct Pending {
    publish_id: PublishId,
    topic: String,
    key: Option<String>,
    delivery: DeliveryFuture,
    notify: oneshot::Sender<DeliveryOutcome>,
}

struct Awaiting {
    topic: String,
    key: Option<String>,
    notify: oneshot::Sender<DeliveryOutcome>,
}

struct ReportLoop {
    handle: JoinHandle<Vec<PublishId>>,
    abort: oneshot::Sender<()>,
}

/// Publishes records through one [`RecordSink`].
///
/// Must be created inside a tokio runtime; the report loop is spawned on
/// construction.
pub struct StreamProducer {
    sink: Arc<dyn RecordSink>,
    next_id: AtomicU64,
    pending: Mutex<Option<mpsc::UnboundedSender<Pending>>>,
    report_loop: Mutex<Option<ReportLoop>>,
}

impl StreamProducer {
    pub fn new(sink: Arc<dyn RecordSink>, handler: Arc<dyn DeliveryHandler>) -> Self {
        let (pending_tx, pending_rx) = mpsc::unbounded_channel();
        let (abort_tx, abort_rx) = oneshot::channel();
        let handle = tokio::spawn(run_report_loop(pending_rx, handler, abort_rx));

        Self {
            sink,
            next_id: AtomicU64::new(1),
            pending: Mutex::new(Some(pending_tx)),
            report_loop: Mutex::new(Some(ReportLoop {
                handle,
                abort: abort_tx,
            })),
        }
    }

    /// Enqueue a record. Returns once the sink has accepted it.
    pub fn publish(&self, record: StreamRecord) -> Result<DeliveryReceipt, ProducerError> {
        let guard = lock(&self.pending);
        let pending = guard.as_ref().ok_or(ProducerError::Closed)?;

        let publish_id = PublishId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let topic = record.topic.clone();
        let key = record.key.clone();

        let delivery = self.sink.enqueue(record).map_err(|e| {
            warn!(publish_id = %publish_id, key = ?key, error = %e, "Failed to enqueue record");
            e
        })?;

        let (notify, outcome) = oneshot::channel();
        pending
            .send(Pending {
                publish_id,
                topic,
                key,
                delivery,
                notify,
            })
            .map_err(|_| ProducerError::Closed)?;

        debug!(publish_id = %publish_id, "Record enqueued");
        Ok(DeliveryReceipt {
            publish_id,
            outcome,
        })
    }

    pub fn is_accepting(&self) -> bool {
        lock(&self.pending).is_some()
    }

    /// Stop accepting records and flush everything in flight within `timeout`.
    ///
    /// Calling it again returns an empty report.
    pub async fn shutdown(&self, timeout: Duration) -> FlushReport {
        let deadline = Instant::now() + timeout;
        lock(&self.pending).take();

        let Some(ReportLoop { mut handle, abort }) = lock(&self.report_loop).take() else {
            return FlushReport::default();
        };

        if let Err(e) = self.sink.flush(timeout).await {
            warn!(error = %e, "Producer flush did not complete");
        }

        let unflushed = match tokio::time::timeout_at(deadline, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                let _ = abort.send(());
                handle.await
            }
        };

        let unflushed = unflushed.unwrap_or_else(|e| {
            error!(error = %e, "Delivery report loop panicked");
            Vec::new()
        });

        if unflushed.is_empty() {
            info!("Producer flushed");
        } else {
            warn!(unflushed = unflushed.len(), "Producer shut down with records in flight");
        }
        FlushReport { unflushed }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Collect delivery reports until the pending channel closes and every
/// in-flight record is reported, or until aborted.
///
/// Returns the publishes abandoned by an abort.
async fn run_report_loop(
    mut pending: mpsc::UnboundedReceiver<Pending>,
    handler: Arc<dyn DeliveryHandler>,
    mut abort: oneshot::Receiver<()>,
) -> Vec<PublishId> {
    let mut in_flight = FuturesUnordered::new();
    let mut awaiting: HashMap<PublishId, Awaiting> = HashMap::new();
    let mut accepting = true;

    loop {
        if !accepting && in_flight.is_empty() {
            return Vec::new();
        }

        tokio::select! {
            biased;

            _ = &mut abort => {
                return fail_unflushed(awaiting, handler.as_ref());
            }

            next = pending.recv(), if accepting => match next {
                Some(p) => {
                    let publish_id = p.publish_id;
                    awaiting.insert(
                        publish_id,
                        Awaiting { topic: p.topic, key: p.key, notify: p.notify },
                    );
                    let delivery = p.delivery;
                    in_flight.push(async move { (publish_id, delivery.await) });
                }
                None => accepting = false,
            },

            Some((publish_id, outcome)) = in_flight.next(), if !in_flight.is_empty() => {
                if let Some(entry) = awaiting.remove(&publish_id) {
                    let report = DeliveryReport {
                        publish_id,
                        topic: entry.topic,
                        key: entry.key,
                        outcome: outcome.clone(),
                    };
                    handler.on_delivery(&report);
                    let _ = entry.notify.send(outcome);
                }
            }
        }
    }
}

fn fail_unflushed(
    awaiting: HashMap<PublishId, Awaiting>,
    handler: &dyn DeliveryHandler,
) -> Vec<PublishId> {
    if awaiting.is_empty() {
        return Vec::new();
    }

    let mut entries: Vec<(PublishId, Awaiting)> = awaiting.into_iter().collect();
    entries.sort_by_key(|(id, _)| *id);

    let failed = DeliveryOutcome::Failed(DeliveryFailure::Unflushed);
    let mut ids = Vec::with_capacity(entries.len());
    let mut reports = Vec::with_capacity(entries.len());
    for (publish_id, entry) in entries {
        ids.push(publish_id);
        reports.push(DeliveryReport {
            publish_id,
            topic: entry.topic,
            key: entry.key,
            outcome: failed.clone(),
        });
        let _ = entry.notify.send(failed.clone());
    }

    handler.on_batch_failure(&reports);
    ids
}
