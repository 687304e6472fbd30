//! Domain message types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity assigned by the durable store on persist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message accepted for persistence but not yet stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub sender: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl NewMessage {
    /// Create a message stamped with the current time.
    pub fn new(sender: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            body: body.into(),
            created_at: Utc::now(),
        }
    }

    /// Attach the identity assigned by the store.
    pub fn into_persisted(self, id: MessageId) -> DomainMessage {
        DomainMessage {
            id: Some(id),
            sender: self.sender,
            body: self.body,
            created_at: self.created_at,
        }
    }
}

/// A chat-style message flowing from ingestion through the stream to subscribers.
///
/// `id` is `None` until the durable store has persisted the message and is never
/// changed afterwards. `body` travels as `text` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<MessageId>,
    pub sender: String,
    #[serde(rename = "text", alias = "body")]
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl From<NewMessage> for DomainMessage {
    /// A message with no identity yet.
    fn from(message: NewMessage) -> Self {
        Self {
            id: None,
            sender: message.sender,
            body: message.body,
            created_at: message.created_at,
        }
    }
}

impl DomainMessage {
    pub fn id(&self) -> Option<MessageId> {
        self.id
    }

    /// Whether the store has assigned an identity.
    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }
}
