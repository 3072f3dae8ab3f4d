//! SQLite conversation store.
//!
//! Uses a single SQLite database file with two tables:
//! - `conversations`: one row per conversation with its derived metadata
//! - `messages`: append-only, ordered by an integer sequence, cascade-deleted
//!   with their conversation

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parley_core::error::StoreError;
use parley_core::message::{Conversation, ConversationId, ConversationStatus, ConversationUpdate, Message, Role, UserId};
use parley_core::store::{ConversationQuery, ConversationStore};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

/// A production SQLite conversation store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a store at `path`.
    ///
    /// The database and all tables/indexes are created automatically.
    /// Pass `"sqlite::memory:"` for an ephemeral database.
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let in_memory = path.contains(":memory:");
        let url = if path.starts_with("sqlite:") { path.to_string() } else { format!("sqlite://{path}") };

        let options = SqliteConnectOptions::from_str(&url)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        // Every connection to `:memory:` is a separate database.
        let max_connections = if in_memory { 1 } else { 4 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite conversation store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id              TEXT PRIMARY KEY NOT NULL,
                user_id         TEXT NOT NULL,
                title           TEXT NOT NULL,
                status          TEXT NOT NULL DEFAULT 'active',
                message_count   INTEGER NOT NULL DEFAULT 0,
                total_tokens    INTEGER NOT NULL DEFAULT 0,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL,
                last_message_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("conversations table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                seq             INTEGER PRIMARY KEY AUTOINCREMENT,
                id              TEXT UNIQUE NOT NULL,
                conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                role            TEXT NOT NULL,
                content         TEXT NOT NULL,
                image_url       TEXT,
                token_count     INTEGER,
                metadata        TEXT NOT NULL DEFAULT '{}',
                created_at      TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("messages table: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_conversations_user ON conversations(user_id, status)")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::MigrationFailed(format!("user index: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, seq)")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::MigrationFailed(format!("message index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn parse_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    }

    /// Parse a `Conversation` from a SQLite row.
    fn row_to_conversation(row: &sqlx::sqlite::SqliteRow) -> Result<Conversation, StoreError> {
        let id: String = row
            .try_get("id")
            .map_err(|e| StoreError::QueryFailed(format!("id column: {e}")))?;
        let user_id: String = row
            .try_get("user_id")
            .map_err(|e| StoreError::QueryFailed(format!("user_id column: {e}")))?;
        let title: String = row
            .try_get("title")
            .map_err(|e| StoreError::QueryFailed(format!("title column: {e}")))?;
        let status: String = row
            .try_get("status")
            .map_err(|e| StoreError::QueryFailed(format!("status column: {e}")))?;
        let message_count: i64 = row
            .try_get("message_count")
            .map_err(|e| StoreError::QueryFailed(format!("message_count column: {e}")))?;
        let total_tokens: i64 = row
            .try_get("total_tokens")
            .map_err(|e| StoreError::QueryFailed(format!("total_tokens column: {e}")))?;
        let created_at: String = row
            .try_get("created_at")
            .map_err(|e| StoreError::QueryFailed(format!("created_at column: {e}")))?;
        let updated_at: String = row
            .try_get("updated_at")
            .map_err(|e| StoreError::QueryFailed(format!("updated_at column: {e}")))?;
        let last_message_at: Option<String> = row
            .try_get("last_message_at")
            .map_err(|e| StoreError::QueryFailed(format!("last_message_at column: {e}")))?;

        let status = ConversationStatus::parse(&status)
            .ok_or_else(|| StoreError::QueryFailed(format!("unknown conversation status '{status}'")))?;

        Ok(Conversation {
            id: ConversationId(id),
            user_id: UserId(user_id),
            title,
            status,
            message_count: u32::try_from(message_count).unwrap_or(0),
            total_tokens: u64::try_from(total_tokens).unwrap_or(0),
            created_at: Self::parse_time(&created_at),
            updated_at: Self::parse_time(&updated_at),
            last_message_at: last_message_at.as_deref().map(Self::parse_time),
        })
    }

    /// Parse a `Message` from a SQLite row.
    fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<Message, StoreError> {
        let id: String = row
            .try_get("id")
            .map_err(|e| StoreError::QueryFailed(format!("id column: {e}")))?;
        let role: String = row
            .try_get("role")
            .map_err(|e| StoreError::QueryFailed(format!("role column: {e}")))?;
        let content: String = row
            .try_get("content")
            .map_err(|e| StoreError::QueryFailed(format!("content column: {e}")))?;
        let image_url: Option<String> = row
            .try_get("image_url")
            .map_err(|e| StoreError::QueryFailed(format!("image_url column: {e}")))?;
        let token_count: Option<i64> = row
            .try_get("token_count")
            .map_err(|e| StoreError::QueryFailed(format!("token_count column: {e}")))?;
        let metadata_json: String = row
            .try_get("metadata")
            .map_err(|e| StoreError::QueryFailed(format!("metadata column: {e}")))?;
        let created_at: String = row
            .try_get("created_at")
            .map_err(|e| StoreError::QueryFailed(format!("created_at column: {e}")))?;

        let role = Role::parse(&role).ok_or_else(|| StoreError::QueryFailed(format!("unknown role '{role}'")))?;
        let metadata = serde_json::from_str(&metadata_json).unwrap_or_default();

        Ok(Message {
            id,
            role,
            content,
            image_url,
            token_count: token_count.and_then(|t| u32::try_from(t).ok()),
            timestamp: Self::parse_time(&created_at),
            metadata,
        })
    }
}

/// Fixed-width timestamps so lexical order matches chronological order.
fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[async_trait]
impl ConversationStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn create_conversation(&self, conversation: Conversation) -> Result<Conversation, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO conversations
                (id, user_id, title, status, message_count, total_tokens, created_at, updated_at, last_message_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(conversation.id.as_str())
        .bind(conversation.user_id.as_str())
        .bind(&conversation.title)
        .bind(conversation.status.as_str())
        .bind(i64::from(conversation.message_count))
        .bind(i64::try_from(conversation.total_tokens).unwrap_or(i64::MAX))
        .bind(format_time(&conversation.created_at))
        .bind(format_time(&conversation.updated_at))
        .bind(conversation.last_message_at.as_ref().map(format_time))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT conversation failed: {e}")))?;

        debug!(conversation = %conversation.id, "Created conversation");
        Ok(conversation)
    }

    async fn get_conversation(&self, id: &ConversationId) -> Result<Option<Conversation>, StoreError> {
        let row = sqlx::query("SELECT * FROM conversations WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("SELECT conversation: {e}")))?;

        row.as_ref().map(Self::row_to_conversation).transpose()
    }

    async fn list_conversations(&self, query: ConversationQuery) -> Result<Vec<Conversation>, StoreError> {
        let status_filter = match query.status {
            Some(_) => "status = ?2",
            None => "status != ?2",
        };
        let status = query.status.unwrap_or(ConversationStatus::Deleted);

        let sql = format!(
            r#"
            SELECT * FROM conversations
            WHERE user_id = ?1 AND {status_filter}
            ORDER BY COALESCE(last_message_at, created_at) DESC, created_at DESC
            LIMIT ?3 OFFSET ?4
            "#
        );

        let rows = sqlx::query(&sql)
            .bind(query.user_id.as_str())
            .bind(status.as_str())
            .bind(i64::try_from(query.limit).unwrap_or(i64::MAX))
            .bind(i64::try_from(query.offset).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("List conversations: {e}")))?;

        rows.iter().map(Self::row_to_conversation).collect()
    }

    async fn list_messages(&self, id: &ConversationId) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query("SELECT * FROM messages WHERE conversation_id = ?1 ORDER BY seq ASC")
            .bind(id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("List messages: {e}")))?;

        rows.iter().map(Self::row_to_message).collect()
    }

    async fn append_message(&self, id: &ConversationId, message: Message) -> Result<(), StoreError> {
        let exists = sqlx::query("SELECT 1 FROM conversations WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("Conversation lookup: {e}")))?;
        if exists.is_none() {
            return Err(StoreError::NotFound(format!("conversation {id}")));
        }

        let metadata_json = serde_json::to_string(&message.metadata)
            .map_err(|e| StoreError::Storage(format!("Metadata serialization: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO messages (id, conversation_id, role, content, image_url, token_count, metadata, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&message.id)
        .bind(id.as_str())
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(&message.image_url)
        .bind(message.token_count.map(i64::from))
        .bind(&metadata_json)
        .bind(format_time(&message.timestamp))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT message failed: {e}")))?;

        debug!(conversation = %id, message = %message.id, role = message.role.as_str(), "Appended message");
        Ok(())
    }

    async fn update_conversation_meta(
        &self,
        id: &ConversationId,
        update: ConversationUpdate,
    ) -> Result<Conversation, StoreError> {
        let now = format_time(&Utc::now());
        let result = sqlx::query(
            r#"
            UPDATE conversations SET
                title           = COALESCE(?2, title),
                status          = COALESCE(?3, status),
                message_count   = COALESCE(?4, message_count),
                total_tokens    = COALESCE(?5, total_tokens),
                last_message_at = COALESCE(?6, last_message_at),
                updated_at      = ?7
            WHERE id = ?1
            "#,
        )
        .bind(id.as_str())
        .bind(update.title.as_deref())
        .bind(update.status.map(|s| s.as_str()))
        .bind(update.message_count.map(i64::from))
        .bind(update.total_tokens.map(|t| i64::try_from(t).unwrap_or(i64::MAX)))
        .bind(update.last_message_at.as_ref().map(format_time))
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("UPDATE conversation failed: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("conversation {id}")));
        }

        self.get_conversation(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("conversation {id}")))
    }

    async fn delete_conversation(&self, id: &ConversationId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM conversations WHERE id = ?1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("DELETE failed: {e}")))?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> (SqliteStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parley.db");
        let store = SqliteStore::new(path.to_str().unwrap()).await.unwrap();
        (store, dir)
    }

    fn alice() -> UserId {
        UserId::from("alice")
    }

    #[tokio::test]
    async fn create_and_get_conversation() {
        let (store, _dir) = test_store().await;
        let conv = store.create_conversation(Conversation::new(alice(), "Printer help")).await.unwrap();

        let fetched = store.get_conversation(&conv.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, conv.id);
        assert_eq!(fetched.title, "Printer help");
        assert_eq!(fetched.user_id, alice());
        assert_eq!(fetched.status, ConversationStatus::Active);
    }

    #[tokio::test]
    async fn missing_conversation_is_none() {
        let (store, _dir) = test_store().await;
        assert!(store.get_conversation(&ConversationId::from("nope")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn messages_round_trip_in_order() {
        let (store, _dir) = test_store().await;
        let conv = store.create_conversation(Conversation::new(alice(), "t")).await.unwrap();

        let first = Message::user("Hello").with_image("https://example.com/a.png");
        let second = Message::assistant("Hi there!")
            .with_token_count(12)
            .with_metadata("model", serde_json::json!("gpt-4o-mini"));
        let third = Message::user("Thanks");

        store.append_message(&conv.id, first.clone()).await.unwrap();
        store.append_message(&conv.id, second.clone()).await.unwrap();
        store.append_message(&conv.id, third.clone()).await.unwrap();

        let messages = store.list_messages(&conv.id).await.unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].id, first.id);
        assert_eq!(messages[0].image_url.as_deref(), Some("https://example.com/a.png"));
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, "Hi there!");
        assert_eq!(messages[1].token_count, Some(12));
        assert_eq!(messages[1].metadata["model"], "gpt-4o-mini");
        assert_eq!(messages[2].content, "Thanks");
        assert!(messages[2].token_count.is_none());
    }

    #[tokio::test]
    async fn append_to_missing_conversation_fails() {
        let (store, _dir) = test_store().await;
        let err = store
            .append_message(&ConversationId::from("ghost"), Message::user("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn update_meta_is_partial() {
        let (store, _dir) = test_store().await;
        let conv = store.create_conversation(Conversation::new(alice(), "Original")).await.unwrap();

        let updated = store
            .update_conversation_meta(
                &conv.id,
                ConversationUpdate {
                    message_count: Some(2),
                    total_tokens: Some(12),
                    last_message_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.title, "Original");
        assert_eq!(updated.message_count, 2);
        assert_eq!(updated.total_tokens, 12);
        assert!(updated.last_message_at.is_some());

        let archived = store
            .update_conversation_meta(
                &conv.id,
                ConversationUpdate {
                    status: Some(ConversationStatus::Archived),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(archived.status, ConversationStatus::Archived);
        assert_eq!(archived.message_count, 2);
    }

    #[tokio::test]
    async fn update_missing_conversation_is_not_found() {
        let (store, _dir) = test_store().await;
        let err = store
            .update_conversation_meta(&ConversationId::from("ghost"), ConversationUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_cascades_messages() {
        let (store, _dir) = test_store().await;
        let conv = store.create_conversation(Conversation::new(alice(), "t")).await.unwrap();
        store.append_message(&conv.id, Message::user("one")).await.unwrap();
        store.append_message(&conv.id, Message::assistant("two")).await.unwrap();

        assert!(store.delete_conversation(&conv.id).await.unwrap());
        assert!(store.get_conversation(&conv.id).await.unwrap().is_none());
        assert!(store.list_messages(&conv.id).await.unwrap().is_empty());
        assert!(!store.delete_conversation(&conv.id).await.unwrap());
    }

    #[tokio::test]
    async fn list_filters_by_user_and_status() {
        let (store, _dir) = test_store().await;
        let a1 = store.create_conversation(Conversation::new(alice(), "a1")).await.unwrap();
        let a2 = store.create_conversation(Conversation::new(alice(), "a2")).await.unwrap();
        store.create_conversation(Conversation::new(UserId::from("bob"), "b1")).await.unwrap();

        store
            .update_conversation_meta(
                &a1.id,
                ConversationUpdate {
                    status: Some(ConversationStatus::Archived),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let all = store.list_conversations(ConversationQuery::for_user(alice())).await.unwrap();
        assert_eq!(all.len(), 2);

        let archived = store
            .list_conversations(ConversationQuery::for_user(alice()).with_status(ConversationStatus::Archived))
            .await
            .unwrap();
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].id, a1.id);

        let page = store
            .list_conversations(ConversationQuery::for_user(alice()).page(1, 1))
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert!(page[0].id == a1.id || page[0].id == a2.id);
    }

    #[tokio::test]
    async fn list_orders_by_recent_activity() {
        let (store, _dir) = test_store().await;
        let older = store.create_conversation(Conversation::new(alice(), "older")).await.unwrap();
        let newer = store.create_conversation(Conversation::new(alice(), "newer")).await.unwrap();

        store
            .update_conversation_meta(
                &older.id,
                ConversationUpdate {
                    last_message_at: Some(Utc::now() + chrono::Duration::seconds(5)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let listed = store.list_conversations(ConversationQuery::for_user(alice())).await.unwrap();
        assert_eq!(listed[0].id, older.id);
        assert_eq!(listed[1].id, newer.id);
    }

    #[tokio::test]
    async fn reopening_file_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parley.db");
        let path = path.to_str().unwrap();

        let conv_id = {
            let store = SqliteStore::new(path).await.unwrap();
            let conv = store.create_conversation(Conversation::new(alice(), "persist")).await.unwrap();
            store.append_message(&conv.id, Message::user("remember me")).await.unwrap();
            conv.id
        };

        let store = SqliteStore::new(path).await.unwrap();
        let messages = store.list_messages(&conv_id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "remember me");
    }

    #[tokio::test]
    async fn in_memory_database_works() {
        let store = SqliteStore::new("sqlite::memory:").await.unwrap();
        let conv = store.create_conversation(Conversation::new(alice(), "t")).await.unwrap();
        store.append_message(&conv.id, Message::user("hi")).await.unwrap();
        assert_eq!(store.list_messages(&conv.id).await.unwrap().len(), 1);
    }
}
