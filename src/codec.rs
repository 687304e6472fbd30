//! Conversion between [`DomainMessage`] and stream records.
//!
//! Payloads are JSON objects; the record key is the decimal message identity so
//! that all records for a message land on the same partition.

use crate::bus::StreamRecord;
use crate::model::DomainMessage;

/// Errors raised while encoding or decoding a record.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Record has no payload")]
    EmptyPayload,

    #[error("Payload is not valid JSON for a message: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serializes domain messages for a single topic.
#[derive(Debug, Clone)]
pub struct RecordCodec {
    topic: String,
}

impl RecordCodec {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Build the outbound record for a message.
    pub fn encode(&self, message: &DomainMessage) -> Result<StreamRecord, CodecError> {
        let payload = serde_json::to_vec(message)?;
        let key = message.id().map(|id| id.to_string());
        Ok(StreamRecord::outbound(&self.topic, key, payload))
    }

    /// Parse a consumed record back into a message.
    pub fn decode(&self, record: &StreamRecord) -> Result<DomainMessage, CodecError> {
        if record.payload.is_empty() {
            return Err(CodecError::EmptyPayload);
        }
        Ok(serde_json::from_slice(&record.payload)?)
    }
}
