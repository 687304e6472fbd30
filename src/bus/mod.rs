//! Stream client: the boundary to the event-stream broker.
//!
//! This module contains:
//! - `RecordSource` trait: consume-one primitive (poll with a bounded wait)
//! - `RecordSink` trait: publish-one primitive returning a delivery future
//! - Record, outcome and error types shared by consumer and producer
//! - Implementations: Kafka, in-memory channel broker, mocks

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use serde::Serialize;
use tracing::info;

use crate::config::{MessagingConfig, MessagingType};

pub mod channel;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod mock;

pub use channel::{ChannelBroker, ChannelRecordSink, ChannelRecordSource};
#[cfg(feature = "kafka")]
pub use kafka::{KafkaRecordSink, KafkaRecordSource};
pub use mock::{MockRecordSink, ScriptedPoll, ScriptedRecordSource, SinkBehavior};

// ============================================================================
// Records and outcomes
// ============================================================================

/// One unit on the stream.
///
/// `partition` and `offset` are only populated on consumed records and are used
/// for diagnostics and offset commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRecord {
    pub topic: String,
    pub key: Option<String>,
    pub payload: Bytes,
    pub partition: Option<i32>,
    pub offset: Option<i64>,
}

impl StreamRecord {
    /// Build a record to publish (no partition/offset yet).
    pub fn outbound(
        topic: impl Into<String>,
        key: Option<String>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            topic: topic.into(),
            key,
            payload: payload.into(),
            partition: None,
            offset: None,
        }
    }

    /// Attach consume-side position metadata.
    pub fn at(mut self, partition: i32, offset: i64) -> Self {
        self.partition = Some(partition);
        self.offset = Some(offset);
        self
    }
}

/// Classified reason a published record did not reach the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum DeliveryFailure {
    /// Network or broker availability problem; a retry may succeed.
    Transient(String),
    /// The broker refused the record.
    Rejected(String),
    /// The record could not be serialized by the client.
    Serialization(String),
    /// Still in flight when the producer was shut down.
    Unflushed,
}

impl std::fmt::Display for DeliveryFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryFailure::Transient(msg) => write!(f, "transient: {}", msg),
            DeliveryFailure::Rejected(msg) => write!(f, "rejected by broker: {}", msg),
            DeliveryFailure::Serialization(msg) => write!(f, "serialization: {}", msg),
            DeliveryFailure::Unflushed => write!(f, "not flushed before shutdown"),
        }
    }
}

impl From<&BusError> for DeliveryFailure {
    fn from(err: &BusError) -> Self {
        match err {
            BusError::Rejected(msg) => DeliveryFailure::Rejected(msg.clone()),
            BusError::Serialization(msg) => DeliveryFailure::Serialization(msg.clone()),
            other => DeliveryFailure::Transient(other.to_string()),
        }
    }
}

/// Asynchronous confirmation for one published record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { partition: i32, offset: i64 },
    Failed(DeliveryFailure),
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }
}

/// Future resolving once the broker has acknowledged (or refused) a record.
pub type DeliveryFuture = BoxFuture<'static, DeliveryOutcome>;

// ============================================================================
// Errors
// ============================================================================

/// Result type for stream client operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur talking to the broker.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BusError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Broker timed out: {0}")]
    Timeout(String),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Not authorized: {0}")]
    Authorization(String),

    #[error("Invalid client configuration: {0}")]
    Configuration(String),

    #[error("Record rejected: {0}")]
    Rejected(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Stream client closed")]
    Closed,
}

impl BusError {
    /// Fatal errors halt the owning component; everything else is retried on the
    /// next natural loop iteration.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BusError::Authentication(_)
                | BusError::Authorization(_)
                | BusError::Configuration(_)
                | BusError::Closed
        )
    }
}

// ============================================================================
// Traits
// ============================================================================

/// Consume side of the stream client, bound to one topic and consumer group.
///
/// `Sync` is required so the consume loop's future can be spawned.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Wait up to `timeout` for the next record.
    ///
    /// `Ok(None)` means no data arrived in time; it is not an error.
    async fn poll(&mut self, timeout: Duration) -> Result<Option<StreamRecord>>;

    /// Mark a record as processed so a restart resumes after it.
    async fn commit(&mut self, _record: &StreamRecord) -> Result<()> {
        Ok(())
    }

    /// Release broker resources.
    async fn close(&mut self) {}
}

/// Publish side of the stream client, bound to one topic.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Hand a record to the client without waiting for the broker.
    ///
    /// Errors here mean the record was never enqueued.
    fn enqueue(&self, record: StreamRecord) -> Result<DeliveryFuture>;

    /// Block until every enqueued record has a delivery report or `timeout` elapses.
    async fn flush(&self, timeout: Duration) -> Result<()>;
}

// ============================================================================
// Factory
// ============================================================================

/// Both halves of a broker connection plus the bound topic.
pub struct StreamClient {
    pub topic: String,
    pub source: Box<dyn RecordSource>,
    pub sink: Arc<dyn RecordSink>,
}

/// Bring up consumer and producer connections according to configuration.
///
/// Requires the corresponding feature for external brokers:
/// - Kafka: `--features kafka`
pub async fn init_stream_client(config: &MessagingConfig) -> Result<StreamClient> {
    match config.messaging_type {
        MessagingType::Channel => {
            let broker = ChannelBroker::new(&config.kafka.topic, config.channel.capacity);
            let (sink, source) = broker.split();
            info!(
                messaging_type = "channel",
                topic = %config.kafka.topic,
                "Stream client initialized"
            );
            Ok(StreamClient {
                topic: config.kafka.topic.clone(),
                source: Box::new(source),
                sink: Arc::new(sink),
            })
        }
        MessagingType::Kafka => {
            #[cfg(feature = "kafka")]
            {
                let source = KafkaRecordSource::connect(&config.kafka).await?;
                let sink = KafkaRecordSink::connect(&config.kafka).await?;
                info!(
                    messaging_type = "kafka",
                    bootstrap_servers = %config.kafka.bootstrap_servers,
                    topic = %config.kafka.topic,
                    "Stream client initialized"
                );
                Ok(StreamClient {
                    topic: config.kafka.topic.clone(),
                    source: Box::new(source),
                    sink: Arc::new(sink),
                })
            }

            #[cfg(not(feature = "kafka"))]
            {
                Err(BusError::Configuration(
                    "Kafka support requires the 'kafka' feature. Rebuild with --features kafka"
                        .to_string(),
                ))
            }
        }
    }
}
