//! In-memory channel broker for standalone mode.
//!
//! A single bounded mpsc channel stands in for one partition of one topic.
//! Records published through the sink are consumed back through the source.
//! Ideal for local development and testing without external dependencies.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

use super::{
    BusError, DeliveryFuture, DeliveryOutcome, RecordSink, RecordSource, Result, StreamRecord,
};

/// Partition used for every record.
const PARTITION: i32 = 0;

/// Linked sink/source pair for one in-memory topic.
pub struct ChannelBroker {
    topic: String,
    sender: mpsc::Sender<StreamRecord>,
    receiver: mpsc::Receiver<StreamRecord>,
}

impl ChannelBroker {
    /// Create a broker holding at most `capacity` unconsumed records.
    pub fn new(topic: impl Into<String>, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            topic: topic.into(),
            sender,
            receiver,
        }
    }

    /// Split into the producer-side sink and consumer-side source.
    pub fn split(self) -> (ChannelRecordSink, ChannelRecordSource) {
        let sink = ChannelRecordSink {
            topic: self.topic.clone(),
            sender: self.sender,
            next_offset: Arc::new(AtomicI64::new(0)),
        };
        let source = ChannelRecordSource {
            topic: self.topic,
            receiver: self.receiver,
            committed: None,
        };
        (sink, source)
    }
}

/// Producer half of a [`ChannelBroker`].
pub struct ChannelRecordSink {
    topic: String,
    sender: mpsc::Sender<StreamRecord>,
    next_offset: Arc<AtomicI64>,
}

#[async_trait]
impl RecordSink for ChannelRecordSink {
    fn enqueue(&self, mut record: StreamRecord) -> Result<DeliveryFuture> {
        if record.topic != self.topic {
            return Err(BusError::Rejected(format!(
                "unknown topic '{}' (broker serves '{}')",
                record.topic, self.topic
            )));
        }

        // Reserve the offset and send under the same permit so offsets stay
        // monotonic in channel order.
        let permit = self.sender.try_reserve().map_err(|e| match e {
            TrySendError::Full(_) => BusError::Transport("channel broker is full".to_string()),
            TrySendError::Closed(_) => BusError::Closed,
        })?;
        let offset = self.next_offset.fetch_add(1, Ordering::SeqCst);
        record.partition = Some(PARTITION);
        record.offset = Some(offset);
        permit.send(record);

        Ok(Box::pin(async move {
            DeliveryOutcome::Delivered {
                partition: PARTITION,
                offset,
            }
        }))
    }

    async fn flush(&self, _timeout: Duration) -> Result<()> {
        // Delivery is confirmed at enqueue time; nothing is ever in flight.
        Ok(())
    }
}

/// Consumer half of a [`ChannelBroker`].
pub struct ChannelRecordSource {
    topic: String,
    receiver: mpsc::Receiver<StreamRecord>,
    committed: Option<i64>,
}

impl ChannelRecordSource {
    /// Offset of the last committed record.
    pub fn committed_offset(&self) -> Option<i64> {
        self.committed
    }
}

#[async_trait]
impl RecordSource for ChannelRecordSource {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<StreamRecord>> {
        match tokio::time::timeout(timeout, self.receiver.recv()).await {
            Ok(Some(record)) => Ok(Some(record)),
            Ok(None) => {
                // Every sink is gone; behave like an idle topic.
                tokio::time::sleep(timeout).await;
                Ok(None)
            }
            Err(_) => Ok(None),
        }
    }

    async fn commit(&mut self, record: &StreamRecord) -> Result<()> {
        if let Some(offset) = record.offset {
            debug!(topic = %self.topic, offset, "Committed offset");
            self.committed = Some(offset);
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.receiver.close();
    }
}
