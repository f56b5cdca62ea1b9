//! SQLite-backed document store.

use std::str::FromStr;

use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};

use veil_common::{ChatId, MessageId, UserHash};

use crate::{ChatRecord, DocumentStore, MessageRecord, error::Result};

/// Durable store over a single SQLite database file.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and apply the schema.
    /// `:memory:` yields an ephemeral store.
    pub async fn open(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{path}"))
            .map_err(sqlx::Error::from)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    async fn migrate(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chats (
                chat_id TEXT PRIMARY KEY,
                user_hash TEXT NOT NULL,
                vault_key_ref TEXT NOT NULL,
                encrypted_title TEXT,
                title_v INTEGER NOT NULL DEFAULT 0,
                messages_v INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                last_message_at INTEGER,
                last_edited_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_chats_user_updated
            ON chats(user_hash, updated_at)
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                message_id TEXT PRIMARY KEY,
                chat_id TEXT NOT NULL,
                user_hash TEXT NOT NULL,
                sender TEXT NOT NULL,
                encrypted_content TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_messages_chat_created
            ON messages(chat_id, created_at)
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_messages_user_updated
            ON messages(user_hash, updated_at)
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }
}

const INSERT_CHAT: &str = r#"
    INSERT OR REPLACE INTO chats (
        chat_id, user_hash, vault_key_ref, encrypted_title, title_v,
        messages_v, created_at, updated_at, last_message_at, last_edited_at
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

const INSERT_MESSAGE: &str = r#"
    INSERT OR REPLACE INTO messages (
        message_id, chat_id, user_hash, sender, encrypted_content,
        created_at, updated_at
    ) VALUES (?, ?, ?, ?, ?, ?, ?)
"#;

const SELECT_CHAT: &str = r#"
    SELECT chat_id, user_hash, vault_key_ref, encrypted_title, title_v,
           messages_v, created_at, updated_at, last_message_at, last_edited_at
    FROM chats
"#;

const SELECT_MESSAGE: &str = r#"
    SELECT message_id, chat_id, user_hash, sender, encrypted_content,
           created_at, updated_at
    FROM messages
"#;

fn bind_chat<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    chat: &'q ChatRecord,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    query
        .bind(chat.chat_id.as_str())
        .bind(chat.user_hash.as_str())
        .bind(chat.vault_key_ref.as_str())
        .bind(chat.encrypted_title.as_deref())
        .bind(chat.title_v as i64)
        .bind(chat.messages_v as i64)
        .bind(chat.created_at)
        .bind(chat.updated_at)
        .bind(chat.last_message_at)
        .bind(chat.last_edited_at)
}

fn bind_message<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    msg: &'q MessageRecord,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    query
        .bind(msg.message_id.as_str())
        .bind(msg.chat_id.as_str())
        .bind(msg.user_hash.as_str())
        .bind(msg.sender.as_str())
        .bind(msg.encrypted_content.as_str())
        .bind(msg.created_at)
        .bind(msg.updated_at)
}

#[async_trait::async_trait]
impl DocumentStore for SqliteStore {
    async fn get_chat(&self, chat_id: &ChatId) -> Result<Option<ChatRecord>> {
        let row = sqlx::query_as::<_, ChatRow>(&format!("{SELECT_CHAT} WHERE chat_id = ?"))
            .bind(chat_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn put_chat(&self, chat: &ChatRecord) -> Result<()> {
        bind_chat(sqlx::query(INSERT_CHAT), chat)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn put_chat_with_message(&self, chat: &ChatRecord, msg: &MessageRecord) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        bind_chat(sqlx::query(INSERT_CHAT), chat)
            .execute(&mut *tx)
            .await?;
        bind_message(sqlx::query(INSERT_MESSAGE), msg)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete_chat(&self, chat_id: &ChatId) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM messages WHERE chat_id = ?")
            .bind(chat_id.as_str())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chats WHERE chat_id = ?")
            .bind(chat_id.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn recent_chats(&self, user: &UserHash, limit: usize) -> Result<Vec<ChatRecord>> {
        let rows = sqlx::query_as::<_, ChatRow>(&format!(
            "{SELECT_CHAT} WHERE user_hash = ? ORDER BY updated_at DESC LIMIT ?"
        ))
        .bind(user.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn chats_updated_since(&self, user: &UserHash, since: i64) -> Result<Vec<ChatRecord>> {
        let rows = sqlx::query_as::<_, ChatRow>(&format!(
            "{SELECT_CHAT} WHERE user_hash = ? AND updated_at > ? ORDER BY updated_at ASC"
        ))
        .bind(user.as_str())
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn chat_ids_for_user(&self, user: &UserHash) -> Result<Vec<ChatId>> {
        let rows = sqlx::query_as::<_, (String,)>("SELECT chat_id FROM chats WHERE user_hash = ?")
            .bind(user.as_str())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(id,)| ChatId::from_string(id))
            .collect())
    }

    async fn put_message(&self, msg: &MessageRecord) -> Result<()> {
        bind_message(sqlx::query(INSERT_MESSAGE), msg)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn chat_messages(&self, chat_id: &ChatId) -> Result<Vec<MessageRecord>> {
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            "{SELECT_MESSAGE} WHERE chat_id = ? ORDER BY created_at ASC"
        ))
        .bind(chat_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn messages_updated_since(
        &self,
        user: &UserHash,
        since: i64,
    ) -> Result<Vec<MessageRecord>> {
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            "{SELECT_MESSAGE} WHERE user_hash = ? AND updated_at > ? ORDER BY created_at ASC"
        ))
        .bind(user.as_str())
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

// ── Row types ────────────────────────────────────────────────────────────────

/// Internal row type for SQLite queries.
#[derive(sqlx::FromRow)]
struct ChatRow {
    chat_id: String,
    user_hash: String,
    vault_key_ref: String,
    encrypted_title: Option<String>,
    title_v: i64,
    messages_v: i64,
    created_at: i64,
    updated_at: i64,
    last_message_at: Option<i64>,
    last_edited_at: i64,
}

impl From<ChatRow> for ChatRecord {
    fn from(row: ChatRow) -> Self {
        Self {
            chat_id: ChatId::from_string(row.chat_id),
            user_hash: UserHash::from_hex(row.user_hash),
            vault_key_ref: row.vault_key_ref,
            encrypted_title: row.encrypted_title,
            title_v: row.title_v as u64,
            messages_v: row.messages_v as u64,
            created_at: row.created_at,
            updated_at: row.updated_at,
            last_message_at: row.last_message_at,
            last_edited_at: row.last_edited_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    message_id: String,
    chat_id: String,
    user_hash: String,
    sender: String,
    encrypted_content: String,
    created_at: i64,
    updated_at: i64,
}

impl From<MessageRow> for MessageRecord {
    fn from(row: MessageRow) -> Self {
        Self {
            message_id: MessageId::from_string(row.message_id),
            chat_id: ChatId::from_string(row.chat_id),
            user_hash: UserHash::from_hex(row.user_hash),
            sender: row.sender,
            encrypted_content: row.encrypted_content,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
