//! Database schema definitions using sea-query.

use sea_query::Iden;

/// Messages table schema.
#[derive(Iden)]
pub enum Messages {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "sender"]
    Sender,
    #[iden = "body"]
    Body,
    #[iden = "created_at"]
    CreatedAt,
}

/// SQL for creating the messages table (SQLite).
pub const CREATE_MESSAGES_TABLE_SQLITE: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sender TEXT NOT NULL,
    body TEXT NOT NULL,
    created_at TEXT NOT NULL
)
"#;

/// SQL for creating the messages table (PostgreSQL).
pub const CREATE_MESSAGES_TABLE_POSTGRES: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    id BIGSERIAL PRIMARY KEY,
    sender TEXT NOT NULL,
    body TEXT NOT NULL,
    created_at TEXT NOT NULL
)
"#;
