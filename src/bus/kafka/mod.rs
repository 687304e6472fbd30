//! Kafka stream client.
//!
//! One consumer subscribed to the configured topic within the configured group,
//! and one producer publishing to the same topic. Message key is the message
//! identity (ensures ordering per message).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::Message as KafkaMessage;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::ClientConfig;
use tracing::{debug, info};

use super::{
    BusError, DeliveryFailure, DeliveryFuture, DeliveryOutcome, RecordSink, RecordSource, Result,
    StreamRecord,
};
use crate::config::KafkaConfig;

/// How long the startup metadata probe may take.
const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

/// Build a ClientConfig for producers.
fn build_producer_config(config: &KafkaConfig) -> ClientConfig {
    let mut client = ClientConfig::new();
    client.set("bootstrap.servers", &config.bootstrap_servers);
    client.set("message.timeout.ms", config.message_timeout_ms.to_string());
    client.set("acks", "all");
    client.set("enable.idempotence", "true");

    apply_security_config(config, &mut client);
    client
}

/// Build a ClientConfig for consumers.
///
/// Offsets are stored explicitly via [`RecordSource::commit`] and flushed by the
/// client's periodic auto-commit.
fn build_consumer_config(config: &KafkaConfig) -> ClientConfig {
    let mut client = ClientConfig::new();
    client.set("bootstrap.servers", &config.bootstrap_servers);
    client.set("group.id", &config.group_id);
    client.set("auto.offset.reset", &config.auto_offset_reset);
    client.set("enable.auto.commit", "true");
    client.set("enable.auto.offset.store", "false");
    client.set("enable.partition.eof", "false");

    apply_security_config(config, &mut client);
    client
}

/// Apply security settings to a ClientConfig.
fn apply_security_config(config: &KafkaConfig, client: &mut ClientConfig) {
    if let Some(ref protocol) = config.security_protocol {
        client.set("security.protocol", protocol);
    }

    if let Some(ref mechanism) = config.sasl_mechanism {
        client.set("sasl.mechanism", mechanism);
    }

    if let Some(ref username) = config.sasl_username {
        client.set("sasl.username", username);
    }

    if let Some(ref password) = config.sasl_password {
        client.set("sasl.password", password);
    }

    if let Some(ref ca_location) = config.ssl_ca_location {
        client.set("ssl.ca.location", ca_location);
    }
}

/// Map a librdkafka error onto the relay's transient/fatal taxonomy.
pub fn classify_kafka_error(err: &KafkaError) -> BusError {
    let message = err.to_string();

    if matches!(err, KafkaError::ClientConfig(..) | KafkaError::ClientCreation(_)) {
        return BusError::Configuration(message);
    }

    match err.rdkafka_error_code() {
        Some(RDKafkaErrorCode::Authentication)
        | Some(RDKafkaErrorCode::SaslAuthenticationFailed) => BusError::Authentication(message),
        Some(RDKafkaErrorCode::TopicAuthorizationFailed)
        | Some(RDKafkaErrorCode::GroupAuthorizationFailed)
        | Some(RDKafkaErrorCode::ClusterAuthorizationFailed) => BusError::Authorization(message),
        Some(RDKafkaErrorCode::InvalidArgument) | Some(RDKafkaErrorCode::Fatal) => {
            BusError::Configuration(message)
        }
        Some(RDKafkaErrorCode::MessageSizeTooLarge)
        | Some(RDKafkaErrorCode::InvalidMessage)
        | Some(RDKafkaErrorCode::InvalidRecord) => BusError::Rejected(message),
        Some(RDKafkaErrorCode::MessageTimedOut)
        | Some(RDKafkaErrorCode::RequestTimedOut)
        | Some(RDKafkaErrorCode::OperationTimedOut) => BusError::Timeout(message),
        Some(RDKafkaErrorCode::BrokerTransportFailure)
        | Some(RDKafkaErrorCode::AllBrokersDown) => BusError::Transport(message),
        _ => BusError::Broker(message),
    }
}

/// Kafka consume side.
pub struct KafkaRecordSource {
    consumer: Arc<StreamConsumer>,
    topic: String,
}

impl KafkaRecordSource {
    /// Create the consumer, subscribe, and probe the topic's metadata.
    ///
    /// The probe surfaces authentication/authorization failures at startup
    /// instead of on the first poll.
    pub async fn connect(config: &KafkaConfig) -> Result<Self> {
        let consumer: StreamConsumer = build_consumer_config(config)
            .create()
            .map_err(|e| classify_kafka_error(&e))?;
        let consumer = Arc::new(consumer);

        consumer
            .subscribe(&[config.topic.as_str()])
            .map_err(|e| classify_kafka_error(&e))?;

        let probe = Arc::clone(&consumer);
        let topic = config.topic.clone();
        tokio::task::spawn_blocking(move || {
            probe
                .fetch_metadata(Some(topic.as_str()), METADATA_TIMEOUT)
                .map(|_| ())
        })
        .await
        .map_err(|e| BusError::Broker(format!("metadata probe panicked: {}", e)))?
        .map_err(|e| classify_kafka_error(&e))?;

        info!(
            bootstrap_servers = %config.bootstrap_servers,
            topic = %config.topic,
            group_id = %config.group_id,
            offset_reset = %config.auto_offset_reset,
            "Kafka consumer subscribed"
        );

        Ok(Self {
            consumer,
            topic: config.topic.clone(),
        })
    }
}

#[async_trait]
impl RecordSource for KafkaRecordSource {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<StreamRecord>> {
        match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_) => Ok(None),
            Ok(Err(e)) => Err(classify_kafka_error(&e)),
            Ok(Ok(message)) => {
                let key = message
                    .key()
                    .map(|k| String::from_utf8_lossy(k).into_owned());
                let payload = message.payload().map(|p| p.to_vec()).unwrap_or_default();
                let record = StreamRecord::outbound(message.topic(), key, payload)
                    .at(message.partition(), message.offset());
                Ok(Some(record))
            }
        }
    }

    async fn commit(&mut self, record: &StreamRecord) -> Result<()> {
        let (Some(partition), Some(offset)) = (record.partition, record.offset) else {
            return Ok(());
        };
        // The stored position is the next offset to read.
        self.consumer
            .store_offset(&record.topic, partition, offset + 1)
            .map_err(|e| classify_kafka_error(&e))
    }

    async fn close(&mut self) {
        self.consumer.unsubscribe();
        debug!(topic = %self.topic, "Kafka consumer unsubscribed");
    }
}

/// Kafka publish side.
pub struct KafkaRecordSink {
    producer: FutureProducer,
}

impl KafkaRecordSink {
    /// Create the producer and probe the topic's metadata.
    pub async fn connect(config: &KafkaConfig) -> Result<Self> {
        let producer: FutureProducer = build_producer_config(config)
            .create()
            .map_err(|e| classify_kafka_error(&e))?;

        let probe = producer.clone();
        let topic = config.topic.clone();
        tokio::task::spawn_blocking(move || {
            probe
                .client()
                .fetch_metadata(Some(topic.as_str()), METADATA_TIMEOUT)
                .map(|_| ())
        })
        .await
        .map_err(|e| BusError::Broker(format!("metadata probe panicked: {}", e)))?
        .map_err(|e| classify_kafka_error(&e))?;

        info!(
            bootstrap_servers = %config.bootstrap_servers,
            topic = %config.topic,
            "Kafka producer connected"
        );

        Ok(Self { producer })
    }
}

#[async_trait]
impl RecordSink for KafkaRecordSink {
    fn enqueue(&self, record: StreamRecord) -> Result<DeliveryFuture> {
        let mut kafka_record: FutureRecord<'_, str, [u8]> =
            FutureRecord::to(&record.topic).payload(record.payload.as_ref());
        if let Some(ref key) = record.key {
            kafka_record = kafka_record.key(key.as_str());
        }

        let delivery = self
            .producer
            .send_result(kafka_record)
            .map_err(|(e, _)| classify_kafka_error(&e))?;

        Ok(Box::pin(async move {
            match delivery.await {
                Ok(Ok((partition, offset))) => DeliveryOutcome::Delivered { partition, offset },
                Ok(Err((e, _))) => {
                    DeliveryOutcome::Failed(DeliveryFailure::from(&classify_kafka_error(&e)))
                }
                Err(_) => DeliveryOutcome::Failed(DeliveryFailure::Transient(
                    "producer dropped before delivery report".to_string(),
                )),
            }
        }))
    }

    async fn flush(&self, timeout: Duration) -> Result<()> {
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(|e| BusError::Broker(format!("flush panicked: {}", e)))?
            .map_err(|e| classify_kafka_error(&e))
    }
}
