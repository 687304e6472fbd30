//! PostgreSQL MessageStore implementation.

use async_trait::async_trait;
use sea_query::{Order, PostgresQueryBuilder, Query};
use sqlx::{PgPool, Row};

use crate::model::{DomainMessage, MessageId, NewMessage};
use crate::storage::schema::{Messages, CREATE_MESSAGES_TABLE_POSTGRES};
use crate::storage::{parse_created_at, MessageStore, Result};

/// PostgreSQL implementation of MessageStore.
pub struct PostgresMessageStore {
    pool: PgPool,
}

impl PostgresMessageStore {
    /// Create a new PostgreSQL message store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the messages table if it does not exist.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(CREATE_MESSAGES_TABLE_POSTGRES)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MessageStore for PostgresMessageStore {
    async fn create(&self, message: NewMessage) -> Result<DomainMessage> {
        let query = Query::insert()
            .into_table(Messages::Table)
            .columns([Messages::Sender, Messages::Body, Messages::CreatedAt])
            .values_panic([
                message.sender.as_str().into(),
                message.body.as_str().into(),
                message.created_at.to_rfc3339().into(),
            ])
            .returning_col(Messages::Id)
            .to_string(PostgresQueryBuilder);

        let row = sqlx::query(&query).fetch_one(&self.pool).await?;
        let id: i64 = row.try_get("id")?;

        Ok(message.into_persisted(MessageId(id)))
    }

    async fn list(&self) -> Result<Vec<DomainMessage>> {
        let query = Query::select()
            .columns([
                Messages::Id,
                Messages::Sender,
                Messages::Body,
                Messages::CreatedAt,
            ])
            .from(Messages::Table)
            .order_by(Messages::Id, Order::Asc)
            .to_string(PostgresQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| -> Result<DomainMessage> {
                let id: i64 = row.try_get("id")?;
                let created_at: String = row.try_get("created_at")?;
                let message = NewMessage {
                    sender: row.try_get("sender")?,
                    body: row.try_get("body")?,
                    created_at: parse_created_at(id, &created_at)?,
                };
                Ok(message.into_persisted(MessageId(id)))
            })
            .collect()
    }
}
