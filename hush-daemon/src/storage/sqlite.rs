//! SQLite storage backend for hushd.

use super::{ChannelState, ChannelStore, StoredMessage};
use crate::crypto::{self, ChannelKey, DbKey, ScopeKey, KEY_SIZE, NONCE_SIZE};
use crate::error::{StorageError, StorageResult};
use crate::remote::Scope;
use async_trait::async_trait;
use hush_types::{ChannelId, ChannelInfo, IdentityId, MessageId, RemoteMessage, ScopeKind};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::sync::RwLock;

const FINGERPRINT_KEY: &str = "db_key_fingerprint";

/// SQLite-backed channel store.
///
/// Uses WAL mode for concurrent reads/writes. Channel and scope keys are
/// sealed with the [`DbKey`] before they reach disk.
pub struct SqliteStore {
    location: Location,
    open: RwLock<Option<OpenStore>>,
}

enum Location {
    File(PathBuf),
    Memory,
}

#[derive(Clone)]
struct OpenStore {
    pool: SqlitePool,
    key: DbKey,
}

impl SqliteStore {
    /// Create a closed store backed by a database file.
    ///
    /// The file is created on first open.
    pub fn new(path: &Path) -> Self {
        Self {
            location: Location::File(path.to_path_buf()),
            open: RwLock::new(None),
        }
    }

    /// Create a closed in-memory store (for testing).
    ///
    /// Data does not survive `close`.
    pub fn in_memory() -> Self {
        Self {
            location: Location::Memory,
            open: RwLock::new(None),
        }
    }

    async fn connect(&self) -> StorageResult<SqlitePool> {
        let pool = match &self.location {
            Location::File(path) => {
                let options = SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true)
                    .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                    .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                    .busy_timeout(std::time::Duration::from_secs(5));

                SqlitePoolOptions::new()
                    .max_connections(4)
                    .connect_with(options)
                    .await?
            }
            Location::Memory => {
                let options = SqliteConnectOptions::from_str(":memory:")?
                    .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                    .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

                // One long-lived connection; the database lives in it.
                SqlitePoolOptions::new()
                    .max_connections(1)
                    .idle_timeout(None)
                    .max_lifetime(None)
                    .connect_with(options)
                    .await?
            }
        };
        Ok(pool)
    }

    /// Run database migrations.
    async fn run_migrations(pool: &SqlitePool) -> StorageResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(|e| StorageError::Migration(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS channels (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL DEFAULT '',
                description TEXT NOT NULL DEFAULT '',
                message_index INTEGER NOT NULL DEFAULT 0,
                read_index INTEGER NOT NULL DEFAULT 0,
                scope TEXT NOT NULL,
                token TEXT NOT NULL,
                key_nonce BLOB NOT NULL,
                key_sealed BLOB NOT NULL,
                hidden INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(|e| StorageError::Migration(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                channel_id TEXT NOT NULL,
                id TEXT NOT NULL,
                sender TEXT NOT NULL,
                text TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                PRIMARY KEY (channel_id, id)
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(|e| StorageError::Migration(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scopes (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                key_nonce BLOB NOT NULL,
                key_sealed BLOB NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(|e| StorageError::Migration(e.to_string()))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_channel_ts ON messages(channel_id, timestamp)",
        )
        .execute(pool)
        .await
        .map_err(|e| StorageError::Migration(e.to_string()))?;

        Ok(())
    }

    /// Record the key fingerprint on first open; reject a different key later.
    async fn verify_key(pool: &SqlitePool, key: &DbKey) -> StorageResult<()> {
        let fingerprint = key.fingerprint();
        let stored: Option<String> = sqlx::query_scalar("SELECT value FROM meta WHERE key = ?1")
            .bind(FINGERPRINT_KEY)
            .fetch_optional(pool)
            .await?;

        match stored {
            Some(existing) if existing == fingerprint => Ok(()),
            Some(_) => Err(StorageError::KeyMismatch),
            None => {
                sqlx::query("INSERT INTO meta (key, value) VALUES (?1, ?2)")
                    .bind(FINGERPRINT_KEY)
                    .bind(&fingerprint)
                    .execute(pool)
                    .await?;
                Ok(())
            }
        }
    }

    async fn handle(&self) -> StorageResult<OpenStore> {
        self.open.read().await.clone().ok_or(StorageError::Closed)
    }
}

#[async_trait]
impl ChannelStore for SqliteStore {
    async fn open(&self, key: &DbKey) -> StorageResult<()> {
        let mut open = self.open.write().await;
        if let Some(existing) = open.as_ref() {
            // Already open: fine for the same key
            return if existing.key == *key {
                Ok(())
            } else {
                Err(StorageError::KeyMismatch)
            };
        }

        let pool = self.connect().await?;
        Self::run_migrations(&pool).await?;
        if let Err(e) = Self::verify_key(&pool, key).await {
            pool.close().await;
            return Err(e);
        }

        *open = Some(OpenStore {
            pool,
            key: key.clone(),
        });
        tracing::info!("Storage opened");
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        if let Some(store) = self.open.write().await.take() {
            store.pool.close().await;
            tracing::info!("Storage closed");
        }
        Ok(())
    }

    async fn is_open(&self) -> bool {
        self.open.read().await.is_some()
    }

    async fn channel(&self, id: &ChannelId) -> StorageResult<Option<ChannelState>> {
        let store = self.handle().await?;
        let row = sqlx::query_as::<_, ChannelRow>(
            r#"
            SELECT id, name, description, message_index, read_index, scope, token,
                   key_nonce, key_sealed, hidden
            FROM channels
            WHERE id = ?1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&store.pool)
        .await?;

        row.map(|r| r.into_state(&store.key)).transpose()
    }

    async fn channels(&self) -> StorageResult<Vec<ChannelState>> {
        let store = self.handle().await?;
        let rows = sqlx::query_as::<_, ChannelRow>(
            r#"
            SELECT id, name, description, message_index, read_index, scope, token,
                   key_nonce, key_sealed, hidden
            FROM channels
            ORDER BY name ASC
            "#,
        )
        .fetch_all(&store.pool)
        .await?;

        rows.into_iter()
            .map(|row| row.into_state(&store.key))
            .collect()
    }

    async fn insert_channel(&self, channel: &ChannelState) -> StorageResult<()> {
        let store = self.handle().await?;
        let (key_sealed, key_nonce) = crypto::encrypt(store.key.as_bytes(), channel.key.as_bytes())
            .map_err(|e| StorageError::InvalidRow(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO channels (id, name, description, message_index, read_index, scope,
                                  token, key_nonce, key_sealed, hidden)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(channel.id.to_string())
        .bind(&channel.name)
        .bind(&channel.description)
        .bind(channel.message_index)
        .bind(channel.read_index)
        .bind(channel.scope.as_str())
        .bind(&channel.token)
        .bind(key_nonce.as_slice())
        .bind(key_sealed)
        .bind(channel.hidden)
        .execute(&store.pool)
        .await?;

        Ok(())
    }

    async fn set_token(&self, id: &ChannelId, token: &str) -> StorageResult<()> {
        let store = self.handle().await?;
        sqlx::query("UPDATE channels SET token = ?2 WHERE id = ?1")
            .bind(id.to_string())
            .bind(token)
            .execute(&store.pool)
            .await?;
        Ok(())
    }

    async fn set_info(&self, id: &ChannelId, info: &ChannelInfo) -> StorageResult<()> {
        let store = self.handle().await?;
        sqlx::query("UPDATE channels SET name = ?2, description = ?3 WHERE id = ?1")
            .bind(id.to_string())
            .bind(&info.name)
            .bind(&info.description)
            .execute(&store.pool)
            .await?;
        Ok(())
    }

    async fn set_message_index(&self, id: &ChannelId, index: i64) -> StorageResult<()> {
        let store = self.handle().await?;
        sqlx::query("UPDATE channels SET message_index = ?2 WHERE id = ?1 AND message_index < ?2")
            .bind(id.to_string())
            .bind(index)
            .execute(&store.pool)
            .await?;
        Ok(())
    }

    async fn mark_read(&self, id: &ChannelId) -> StorageResult<()> {
        let store = self.handle().await?;
        sqlx::query("UPDATE channels SET read_index = message_index WHERE id = ?1")
            .bind(id.to_string())
            .execute(&store.pool)
            .await?;
        Ok(())
    }

    async fn hide_channel(&self, id: &ChannelId) -> StorageResult<bool> {
        let store = self.handle().await?;
        let result = sqlx::query("UPDATE channels SET hidden = 1 WHERE id = ?1")
            .bind(id.to_string())
            .execute(&store.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn add_messages(
        &self,
        channel: &ChannelId,
        messages: &[RemoteMessage],
    ) -> StorageResult<u64> {
        if messages.is_empty() {
            return Ok(0);
        }

        let store = self.handle().await?;
        let channel_id = channel.to_string();
        let mut inserted = 0;

        let mut tx = store.pool.begin().await?;
        for msg in messages {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO messages (channel_id, id, sender, text, timestamp)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )
            .bind(&channel_id)
            .bind(msg.id.as_str())
            .bind(&msg.sender)
            .bind(&msg.text)
            .bind(msg.timestamp)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;

        Ok(inserted)
    }

    async fn messages(&self, channel: &ChannelId) -> StorageResult<Vec<StoredMessage>> {
        let store = self.handle().await?;
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT channel_id, id, sender, text, timestamp
            FROM messages
            WHERE channel_id = ?1
            ORDER BY timestamp ASC, id ASC
            "#,
        )
        .bind(channel.to_string())
        .fetch_all(&store.pool)
        .await?;

        rows.into_iter().map(|row| row.try_into()).collect()
    }

    async fn message_count(&self, channel: &ChannelId) -> StorageResult<u64> {
        let store = self.handle().await?;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE channel_id = ?1")
            .bind(channel.to_string())
            .fetch_one(&store.pool)
            .await?;
        Ok(count as u64)
    }

    async fn relay_tokens(&self) -> StorageResult<Vec<String>> {
        let store = self.handle().await?;
        let tokens: Vec<String> =
            sqlx::query_scalar("SELECT token FROM channels WHERE token != '' ORDER BY id")
                .fetch_all(&store.pool)
                .await?;
        Ok(tokens)
    }

    async fn save_scope(&self, scope: &Scope) -> StorageResult<()> {
        let store = self.handle().await?;
        let (key_sealed, key_nonce) = crypto::encrypt(store.key.as_bytes(), scope.key.as_bytes())
            .map_err(|e| StorageError::InvalidRow(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO scopes (id, kind, key_nonce, key_sealed)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                kind = excluded.kind,
                key_nonce = excluded.key_nonce,
                key_sealed = excluded.key_sealed
            "#,
        )
        .bind(scope.id.to_string())
        .bind(scope.kind.as_str())
        .bind(key_nonce.as_slice())
        .bind(key_sealed)
        .execute(&store.pool)
        .await?;

        Ok(())
    }

    async fn scopes(&self) -> StorageResult<Vec<Scope>> {
        let store = self.handle().await?;
        let rows = sqlx::query_as::<_, ScopeRow>(
            "SELECT id, kind, key_nonce, key_sealed FROM scopes ORDER BY rowid ASC",
        )
        .fetch_all(&store.pool)
        .await?;

        rows.into_iter()
            .map(|row| row.into_scope(&store.key))
            .collect()
    }
}

/// Open a key sealed with the database key.
fn unseal_key(db_key: &DbKey, nonce: &[u8], sealed: &[u8]) -> StorageResult<[u8; KEY_SIZE]> {
    let nonce: [u8; NONCE_SIZE] = nonce
        .try_into()
        .map_err(|_| StorageError::InvalidRow("bad key nonce".into()))?;
    let bytes = crypto::decrypt(db_key.as_bytes(), sealed, &nonce)
        .map_err(|e| StorageError::InvalidRow(e.to_string()))?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| StorageError::InvalidRow("bad key length".into()))
}

/// Internal row type for channel queries.
#[derive(sqlx::FromRow)]
struct ChannelRow {
    id: String,
    name: String,
    description: String,
    message_index: i64,
    read_index: i64,
    scope: String,
    token: String,
    key_nonce: Vec<u8>,
    key_sealed: Vec<u8>,
    hidden: bool,
}

impl ChannelRow {
    fn into_state(self, db_key: &DbKey) -> StorageResult<ChannelState> {
        let id: ChannelId = self
            .id
            .parse()
            .map_err(|e: hush_types::WireError| StorageError::InvalidRow(e.to_string()))?;
        let scope = ScopeKind::parse(&self.scope)
            .ok_or_else(|| StorageError::InvalidRow(format!("unknown scope: {}", self.scope)))?;
        let key_bytes = unseal_key(db_key, &self.key_nonce, &self.key_sealed)?;
        let key = ChannelKey::from_bytes(&key_bytes)
            .map_err(|e| StorageError::InvalidRow(e.to_string()))?;

        Ok(ChannelState {
            id,
            name: self.name,
            description: self.description,
            message_index: self.message_index,
            read_index: self.read_index,
            scope,
            token: self.token,
            key,
            hidden: self.hidden,
        })
    }
}

/// Internal row type for scope queries.
#[derive(sqlx::FromRow)]
struct ScopeRow {
    id: String,
    kind: String,
    key_nonce: Vec<u8>,
    key_sealed: Vec<u8>,
}

impl ScopeRow {
    fn into_scope(self, db_key: &DbKey) -> StorageResult<Scope> {
        let id: IdentityId = self
            .id
            .parse()
            .map_err(|e: hush_types::WireError| StorageError::InvalidRow(e.to_string()))?;
        let kind = ScopeKind::parse(&self.kind)
            .ok_or_else(|| StorageError::InvalidRow(format!("unknown scope: {}", self.kind)))?;
        let key_bytes = unseal_key(db_key, &self.key_nonce, &self.key_sealed)?;
        let key =
            ScopeKey::from_bytes(&key_bytes).map_err(|e| StorageError::InvalidRow(e.to_string()))?;
        Ok(Scope { id, kind, key })
    }
}

/// Internal row type for message queries.
#[derive(sqlx::FromRow)]
struct MessageRow {
    channel_id: String,
    id: String,
    sender: String,
    text: String,
    timestamp: i64,
}

impl TryFrom<MessageRow> for StoredMessage {
    type Error = StorageError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        Ok(StoredMessage {
            channel: row
                .channel_id
                .parse()
                .map_err(|e: hush_types::WireError| StorageError::InvalidRow(e.to_string()))?,
            id: MessageId::new(row.id),
            sender: row.sender,
            text: row.text,
            timestamp: row.timestamp,
        })
    }
}
