//! In-memory MessageStore for testing.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::model::{DomainMessage, MessageId, NewMessage};
use crate::storage::{MessageStore, Result, StorageError};

/// Mock message store that keeps messages in memory.
pub struct MockMessageStore {
    messages: RwLock<Vec<DomainMessage>>,
    next_id: AtomicI64,
    fail_create: AtomicBool,
    fail_list: AtomicBool,
}

impl Default for MockMessageStore {
    fn default() -> Self {
        Self {
            messages: RwLock::new(Vec::new()),
            next_id: AtomicI64::new(1),
            fail_create: AtomicBool::new(false),
            fail_list: AtomicBool::new(false),
        }
    }
}

impl MockMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `create` calls fail.
    pub fn set_fail_on_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `list` calls fail.
    pub fn set_fail_on_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    pub async fn count(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn get(&self, id: MessageId) -> Option<DomainMessage> {
        self.messages
            .read()
            .await
            .iter()
            .find(|m| m.id() == Some(id))
            .cloned()
    }
}

#[async_trait]
impl MessageStore for MockMessageStore {
    async fn create(&self, message: NewMessage) -> Result<DomainMessage> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("simulated create failure".to_string()));
        }

        let id = MessageId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let stored = message.into_persisted(id);
        self.messages.write().await.push(stored.clone());
        Ok(stored)
    }

    async fn list(&self) -> Result<Vec<DomainMessage>> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("simulated list failure".to_string()));
        }
        Ok(self.messages.read().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_assigns_increasing_ids() {
        let store = MockMessageStore::new();

        let a = store.create(NewMessage::new("alice", "one")).await.unwrap();
        let b = store.create(NewMessage::new("bob", "two")).await.unwrap();

        assert_eq!(a.id(), Some(MessageId(1)));
        assert_eq!(b.id(), Some(MessageId(2)));
        assert_eq!(store.list().await.unwrap(), vec![a, b]);
    }

    #[tokio::test]
    async fn test_create_failure_stores_nothing() {
        let store = MockMessageStore::new();
        store.set_fail_on_create(true);

        let result = store.create(NewMessage::new("alice", "lost")).await;

        assert!(matches!(result, Err(StorageError::Unavailable(_))));
        assert_eq!(store.count().await, 0);
    }

    #[tokio::test]
    async fn test_list_failure() {
        let store = MockMessageStore::new();
        store.set_fail_on_list(true);
        assert!(store.list().await.is_err());
    }
}
