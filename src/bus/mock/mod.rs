//! Mock stream client implementations for testing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{
    BusError, DeliveryFailure, DeliveryFuture, DeliveryOutcome, RecordSink, RecordSource, Result,
    StreamRecord,
};

/// How [`MockRecordSink`] treats the next enqueued record.
#[derive(Debug, Clone)]
pub enum SinkBehavior {
    /// Enqueue and confirm delivery.
    Confirm,
    /// Enqueue, then report the given failure.
    Fail(DeliveryFailure),
    /// Refuse to enqueue.
    Refuse(BusError),
    /// Enqueue and never report.
    Hold,
    /// Enqueue and confirm after a delay.
    Delayed(Duration),
}

/// Mock sink that records every enqueued record.
pub struct MockRecordSink {
    published: Mutex<Vec<StreamRecord>>,
    behavior: Mutex<SinkBehavior>,
    in_flight: Arc<AtomicUsize>,
    next_offset: AtomicI64,
}

impl Default for MockRecordSink {
    fn default() -> Self {
        Self::with_behavior(SinkBehavior::Confirm)
    }
}

impl MockRecordSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behavior(behavior: SinkBehavior) -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            behavior: Mutex::new(behavior),
            in_flight: Arc::new(AtomicUsize::new(0)),
            next_offset: AtomicI64::new(0),
        }
    }

    pub fn set_behavior(&self, behavior: SinkBehavior) {
        *lock(&self.behavior) = behavior;
    }

    pub fn published_count(&self) -> usize {
        lock(&self.published).len()
    }

    pub fn published(&self) -> Vec<StreamRecord> {
        lock(&self.published).clone()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Decrements the in-flight counter when the delivery future finishes or is dropped.
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RecordSink for MockRecordSink {
    fn enqueue(&self, record: StreamRecord) -> Result<DeliveryFuture> {
        let behavior = lock(&self.behavior).clone();
        if let SinkBehavior::Refuse(err) = behavior {
            return Err(err);
        }

        lock(&self.published).push(record);
        let offset = self.next_offset.fetch_add(1, Ordering::SeqCst);
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = InFlight(Arc::clone(&self.in_flight));

        Ok(Box::pin(async move {
            let _guard = guard;
            match behavior {
                SinkBehavior::Confirm => DeliveryOutcome::Delivered {
                    partition: 0,
                    offset,
                },
                SinkBehavior::Fail(failure) => DeliveryOutcome::Failed(failure),
                SinkBehavior::Hold => futures::future::pending().await,
                SinkBehavior::Delayed(delay) => {
                    tokio::time::sleep(delay).await;
                    DeliveryOutcome::Delivered {
                        partition: 0,
                        offset,
                    }
                }
                SinkBehavior::Refuse(_) => unreachable!("refused before enqueue"),
            }
        }))
    }

    async fn flush(&self, timeout: Duration) -> Result<()> {
        let drained = async {
            while self.in_flight.load(Ordering::SeqCst) > 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        };
        tokio::time::timeout(timeout, drained).await.map_err(|_| {
            BusError::Timeout(format!(
                "{} record(s) still in flight",
                self.in_flight.load(Ordering::SeqCst)
            ))
        })
    }
}

/// One scripted result for [`ScriptedRecordSource::poll`].
#[derive(Debug, Clone)]
pub enum ScriptedPoll {
    Record(StreamRecord),
    Timeout,
    Error(BusError),
}

/// Observations shared between a [`ScriptedRecordSource`] and the test.
#[derive(Debug, Default)]
pub struct SourceProbe {
    polls: AtomicUsize,
    committed: Mutex<Vec<i64>>,
    closed: AtomicBool,
}

impl SourceProbe {
    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn committed(&self) -> Vec<i64> {
        lock(&self.committed).clone()
    }

    pub fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Source replaying a fixed script; idle (timeouts) once the script runs out.
pub struct ScriptedRecordSource {
    script: VecDeque<ScriptedPoll>,
    probe: Arc<SourceProbe>,
}

impl ScriptedRecordSource {
    pub fn new(script: impl IntoIterator<Item = ScriptedPoll>) -> Self {
        Self {
            script: script.into_iter().collect(),
            probe: Arc::new(SourceProbe::default()),
        }
    }

    /// Script delivering each payload as a record at consecutive offsets.
    pub fn from_payloads<I, P>(topic: &str, payloads: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<bytes::Bytes>,
    {
        Self::new(payloads.into_iter().enumerate().map(|(i, payload)| {
            ScriptedPoll::Record(StreamRecord::outbound(topic, None, payload).at(0, i as i64))
        }))
    }

    pub fn probe(&self) -> Arc<SourceProbe> {
        Arc::clone(&self.probe)
    }
}

#[async_trait]
impl RecordSource for ScriptedRecordSource {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<StreamRecord>> {
        self.probe.polls.fetch_add(1, Ordering::SeqCst);
        match self.script.pop_front() {
            Some(ScriptedPoll::Record(record)) => Ok(Some(record)),
            Some(ScriptedPoll::Timeout) => Ok(None),
            Some(ScriptedPoll::Error(err)) => Err(err),
            None => {
                tokio::time::sleep(timeout).await;
                Ok(None)
            }
        }
    }

    async fn commit(&mut self, record: &StreamRecord) -> Result<()> {
        if let Some(offset) = record.offset {
            lock(&self.probe.committed).push(offset);
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.probe.closed.store(true, Ordering::SeqCst);
    }
}
