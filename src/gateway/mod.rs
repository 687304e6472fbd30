//! Ingestion gateway: persist, then publish.
//!
//! `submit` stores the message first; a storage failure aborts before anything
//! is published. Once stored, the message is encoded and handed to the
//! producer, and the caller learns how far it got through [`StreamStatus`].
//! A stored message that did not reach the stream is logged at error level
//! with its identity so that a reconciliation job can re-publish it.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::bus::{DeliveryFailure, DeliveryOutcome};
use crate::codec::{CodecError, RecordCodec};
use crate::model::{DomainMessage, NewMessage};
use crate::producer::{ProducerError, StreamProducer};
use crate::storage::{MessageStore, StorageError};

/// Ingestion errors. Anything past persistence is reported in [`StreamStatus`].
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Invalid submission: {0}")]
    Invalid(String),

    #[error("Failed to persist message: {0}")]
    Storage(#[from] StorageError),
}

/// How far a persisted message got towards the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StreamStatus {
    /// The broker confirmed the record.
    Delivered { partition: i32, offset: i64 },
    /// Stored but not streamed.
    Failed { reason: String },
    /// Stored and enqueued; no delivery report arrived in time.
    Unconfirmed,
}

/// Result of a successful [`IngestionGateway::submit`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Submission {
    pub message: DomainMessage,
    pub stream: StreamStatus,
}

impl Submission {
    /// Persisted and confirmed on the stream.
    pub fn is_fully_streamed(&self) -> bool {
        matches!(self.stream, StreamStatus::Delivered { .. })
    }
}

/// Orchestrates persist-then-publish for externally submitted messages.
pub struct IngestionGateway {
    store: Arc<dyn MessageStore>,
    codec: RecordCodec,
    producer: Arc<StreamProducer>,
    confirm_timeout: Duration,
}

impl IngestionGateway {
    pub fn new(
        store: Arc<dyn MessageStore>,
        codec: RecordCodec,
        producer: Arc<StreamProducer>,
        confirm_timeout: Duration,
    ) -> Self {
        Self {
            store,
            codec,
            producer,
            confirm_timeout,
        }
    }

    /// Persist a message and publish it to the stream.
    pub async fn submit(&self, sender: &str, body: &str) -> Result<Submission, IngestError> {
        let sender = sender.trim();
        if sender.is_empty() {
            return Err(IngestError::Invalid("sender must not be empty".to_string()));
        }
        if body.trim().is_empty() {
            return Err(IngestError::Invalid("body must not be empty".to_string()));
        }

        let message = self.store.create(NewMessage::new(sender, body)).await?;
        let stream = self.publish(&message).await;

        match &stream {
            StreamStatus::Delivered { partition, offset } => info!(
                message_id = ?message.id(),
                partition,
                offset,
                "Message persisted and streamed"
            ),
            StreamStatus::Failed { reason } => error!(
                message_id = ?message.id(),
                sender = %message.sender,
                reason = %reason,
                "Message persisted but not streamed; needs reconciliation"
            ),
            StreamStatus::Unconfirmed => warn!(
                message_id = ?message.id(),
                timeout_ms = self.confirm_timeout.as_millis() as u64,
                "Message persisted; stream delivery not yet confirmed"
            ),
        }

        Ok(Submission { message, stream })
    }

    /// All persisted messages.
    pub async fn list(&self) -> Result<Vec<DomainMessage>, StorageError> {
        self.store.list().await
    }

    async fn publish(&self, message: &DomainMessage) -> StreamStatus {
        let record = match self.codec.encode(message) {
            Ok(record) => record,
            Err(e) => return failed(encode_failure(e)),
        };

        let receipt = match self.producer.publish(record) {
            Ok(receipt) => receipt,
            Err(ProducerError::Closed) => {
                return failed(DeliveryFailure::Transient("producer is shut down".to_string()))
            }
            Err(ProducerError::Enqueue(e)) => return failed(DeliveryFailure::from(&e)),
        };

        match receipt.wait(self.confirm_timeout).await {
            Some(DeliveryOutcome::Delivered { partition, offset }) => {
                StreamStatus::Delivered { partition, offset }
            }
            Some(DeliveryOutcome::Failed(failure)) => failed(failure),
            None => StreamStatus::Unconfirmed,
        }
    }
}

fn encode_failure(err: CodecError) -> DeliveryFailure {
    DeliveryFailure::Serialization(err.to_string())
}

fn failed(failure: DeliveryFailure) -> StreamStatus {
    StreamStatus::Failed {
        reason: failure.to_string(),
    }
}

#[cfg(test)]
mod tests;
