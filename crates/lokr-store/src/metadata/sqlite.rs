//! SQLite metadata store
//!
//! Every counter mutation is a single `UPDATE ... RETURNING` statement, so
//! concurrent uploads and deletes never lose an increment even when the pool
//! hands out several connections.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lokr_core::types::{ContentBlob, FileId, FileShare, LogicalFile, User, UserId, Visibility};
use lokr_core::utils::hash::Fingerprint;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous};
use sqlx::{Pool, Row, Sqlite};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use super::{
    from_db_int, to_db_int, BlobRepo, FileRepo, MetadataError, MetadataResult, MetadataStore,
    ShareRepo, UserRepo,
};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY NOT NULL,
    storage_used INTEGER NOT NULL DEFAULT 0 CHECK (storage_used >= 0),
    storage_quota INTEGER NOT NULL CHECK (storage_quota >= 0)
);

CREATE TABLE IF NOT EXISTS content_blobs (
    fingerprint TEXT PRIMARY KEY NOT NULL,
    storage_key TEXT NOT NULL,
    byte_size INTEGER NOT NULL,
    reference_count INTEGER NOT NULL CHECK (reference_count >= 0),
    deleting INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_content_blobs_orphaned
    ON content_blobs (reference_count, created_at);

CREATE TABLE IF NOT EXISTS logical_files (
    id TEXT PRIMARY KEY NOT NULL,
    owner_id TEXT NOT NULL REFERENCES users (id),
    fingerprint TEXT NOT NULL REFERENCES content_blobs (fingerprint),
    display_name TEXT NOT NULL,
    mime_type TEXT NOT NULL,
    byte_size INTEGER NOT NULL,
    visibility TEXT NOT NULL DEFAULT 'PRIVATE',
    share_token TEXT UNIQUE,
    download_count INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_logical_files_owner ON logical_files (owner_id);
CREATE INDEX IF NOT EXISTS idx_logical_files_fingerprint ON logical_files (fingerprint);

CREATE TABLE IF NOT EXISTS file_shares (
    file_id TEXT NOT NULL REFERENCES logical_files (id) ON DELETE CASCADE,
    grantee_id TEXT NOT NULL REFERENCES users (id),
    permission TEXT NOT NULL,
    expires_at INTEGER,
    UNIQUE (file_id, grantee_id)
);

CREATE INDEX IF NOT EXISTS idx_file_shares_expiry ON file_shares (expires_at);
"#;

const FILE_COLUMNS: &str = "id, owner_id, fingerprint, display_name, mime_type, byte_size, \
                            visibility, share_token, download_count, created_at";

/// Metadata store backed by SQLite
#[derive(Debug, Clone)]
pub struct SqliteMetadataStore {
    pool: Pool<Sqlite>,
}

impl SqliteMetadataStore {
    /// Open (creating if missing) the database at `url`, e.g. `sqlite://vault/lokr.db`
    pub async fn open(url: &str, max_connections: u32) -> MetadataResult<Self> {
        let opts = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        debug!("Opened SQLite metadata store at {}", url);
        Ok(store)
    }

    /// Private in-memory database, kept alive by a single pinned connection
    pub async fn in_memory() -> MetadataResult<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;

        // Databases created before removal claims lack the column
        let has_claims: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM pragma_table_info('content_blobs') WHERE name = 'deleting'",
        )
        .fetch_one(&self.pool)
        .await?;
        if has_claims == 0 {
            sqlx::query("ALTER TABLE content_blobs ADD COLUMN deleting INTEGER NOT NULL DEFAULT 0")
                .execute(&self.pool)
                .await?;
            debug!("Added removal claim column to content_blobs");
        }
        Ok(())
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn corrupt<E: std::fmt::Display>(column: &'static str) -> impl FnOnce(E) -> MetadataError {
    move |e| MetadataError::corrupt(format!("bad {}: {}", column, e))
}

fn parse_fingerprint(value: &str) -> MetadataResult<Fingerprint> {
    Fingerprint::from_hex(value).map_err(corrupt("fingerprint"))
}

fn parse_file_id(value: &str) -> MetadataResult<FileId> {
    Uuid::parse_str(value)
        .map(FileId::from_uuid)
        .map_err(corrupt("file id"))
}

fn parse_timestamp_millis(value: i64) -> MetadataResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(value)
        .ok_or_else(|| MetadataError::corrupt(format!("timestamp {} out of range", value)))
}

fn blob_from_row(row: &SqliteRow) -> MetadataResult<ContentBlob> {
    let fingerprint: String = row.try_get("fingerprint")?;
    Ok(ContentBlob {
        fingerprint: parse_fingerprint(&fingerprint)?,
        storage_key: row.try_get("storage_key")?,
        byte_size: from_db_int(row.try_get("byte_size")?, "byte_size")?,
        reference_count: from_db_int(row.try_get("reference_count")?, "reference_count")?,
        created_at: row.try_get("created_at")?,
    })
}

fn file_from_row(row: &SqliteRow) -> MetadataResult<LogicalFile> {
    let id: String = row.try_get("id")?;
    let owner: String = row.try_get("owner_id")?;
    let fingerprint: String = row.try_get("fingerprint")?;
    let visibility: String = row.try_get("visibility")?;
    Ok(LogicalFile {
        id: parse_file_id(&id)?,
        owner_id: UserId::new(owner),
        fingerprint: parse_fingerprint(&fingerprint)?,
        display_name: row.try_get("display_name")?,
        mime_type: row.try_get("mime_type")?,
        byte_size: from_db_int(row.try_get("byte_size")?, "byte_size")?,
        visibility: Visibility::from_str(&visibility).map_err(corrupt("visibility"))?,
        share_token: row.try_get("share_token")?,
        download_count: from_db_int(row.try_get("download_count")?, "download_count")?,
        created_at: row.try_get("created_at")?,
    })
}

fn user_from_row(row: &SqliteRow) -> MetadataResult<User> {
    let id: String = row.try_get("id")?;
    Ok(User {
        id: UserId::new(id),
        storage_used: from_db_int(row.try_get("storage_used")?, "storage_used")?,
        storage_quota: from_db_int(row.try_get("storage_quota")?, "storage_quota")?,
    })
}

fn share_from_row(row: &SqliteRow) -> MetadataResult<FileShare> {
    let file_id: String = row.try_get("file_id")?;
    let grantee: String = row.try_get("grantee_id")?;
    let permission: String = row.try_get("permission")?;
    let expires_at: Option<i64> = row.try_get("expires_at")?;
    Ok(FileShare {
        file_id: parse_file_id(&file_id)?,
        grantee_id: UserId::new(grantee),
        permission: permission.parse().map_err(corrupt("permission"))?,
        expires_at: expires_at.map(parse_timestamp_millis).transpose()?,
    })
}

fn optional_count(value: Option<i64>, column: &str) -> MetadataResult<Option<u64>> {
    value.map(|v| from_db_int(v, column)).transpose()
}

#[async_trait]
impl BlobRepo for SqliteMetadataStore {
    async fn get_blob(&self, fingerprint: &Fingerprint) -> MetadataResult<Option<ContentBlob>> {
        let row = sqlx::query("SELECT * FROM content_blobs WHERE fingerprint = ?")
            .bind(fingerprint.to_hex())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(blob_from_row).transpose()
    }

    async fn insert_blob(&self, blob: &ContentBlob) -> MetadataResult<()> {
        let result = sqlx::query(
            "INSERT INTO content_blobs (fingerprint, storage_key, byte_size, reference_count, created_at) \
             VALUES (?, ?, ?, ?, ?) ON CONFLICT (fingerprint) DO NOTHING",
        )
        .bind(blob.fingerprint.to_hex())
        .bind(&blob.storage_key)
        .bind(to_db_int(blob.byte_size))
        .bind(to_db_int(blob.reference_count))
        .bind(blob.created_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MetadataError::conflict(format!("blob {}", blob.fingerprint)));
        }
        Ok(())
    }

    async fn increment_blob_ref(&self, fingerprint: &Fingerprint) -> MetadataResult<Option<u64>> {
        let count: Option<i64> = sqlx::query_scalar(
            "UPDATE content_blobs SET reference_count = reference_count + 1 \
             WHERE fingerprint = ? AND deleting = 0 RETURNING reference_count",
        )
        .bind(fingerprint.to_hex())
        .fetch_optional(&self.pool)
        .await?;
        optional_count(count, "reference_count")
    }

    async fn decrement_blob_ref(&self, fingerprint: &Fingerprint) -> MetadataResult<Option<u64>> {
        let count: Option<i64> = sqlx::query_scalar(
            "UPDATE content_blobs SET reference_count = MAX(reference_count - 1, 0) \
             WHERE fingerprint = ? RETURNING reference_count",
        )
        .bind(fingerprint.to_hex())
        .fetch_optional(&self.pool)
        .await?;
        optional_count(count, "reference_count")
    }

    async fn claim_orphan(&self, fingerprint: &Fingerprint) -> MetadataResult<bool> {
        let result = sqlx::query(
            "UPDATE content_blobs SET deleting = 1 \
             WHERE fingerprint = ? AND reference_count = 0 AND deleting = 0",
        )
        .bind(fingerprint.to_hex())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn release_orphan_claim(&self, fingerprint: &Fingerprint) -> MetadataResult<bool> {
        let result = sqlx::query("UPDATE content_blobs SET deleting = 0 WHERE fingerprint = ?")
            .bind(fingerprint.to_hex())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn reset_orphan_claims(&self) -> MetadataResult<u64> {
        let result = sqlx::query("UPDATE content_blobs SET deleting = 0 WHERE deleting <> 0")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_blob_if_orphaned(&self, fingerprint: &Fingerprint) -> MetadataResult<bool> {
        let result =
            sqlx::query("DELETE FROM content_blobs WHERE fingerprint = ? AND reference_count = 0")
                .bind(fingerprint.to_hex())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_orphaned_blobs(&self, limit: usize) -> MetadataResult<Vec<ContentBlob>> {
        let rows = sqlx::query(
            "SELECT * FROM content_blobs WHERE reference_count = 0 \
             ORDER BY created_at ASC, fingerprint ASC LIMIT ?",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(blob_from_row).collect()
    }

    async fn list_blobs(&self) -> MetadataResult<Vec<ContentBlob>> {
        let rows = sqlx::query("SELECT * FROM content_blobs ORDER BY fingerprint")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(blob_from_row).collect()
    }

    async fn set_blob_ref(&self, fingerprint: &Fingerprint, count: u64) -> MetadataResult<bool> {
        let result = sqlx::query("UPDATE content_blobs SET reference_count = ? WHERE fingerprint = ?")
            .bind(to_db_int(count))
            .bind(fingerprint.to_hex())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl FileRepo for SqliteMetadataStore {
    async fn insert_file(&self, file: &LogicalFile) -> MetadataResult<()> {
        let result = sqlx::query(
            "INSERT INTO logical_files (id, owner_id, fingerprint, display_name, mime_type, byte_size, \
             visibility, share_token, download_count, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(file.id.to_string())
        .bind(file.owner_id.as_str())
        .bind(file.fingerprint.to_hex())
        .bind(&file.display_name)
        .bind(&file.mime_type)
        .bind(to_db_int(file.byte_size))
        .bind(file.visibility.as_str())
        .bind(file.share_token.as_deref())
        .bind(to_db_int(file.download_count))
        .bind(file.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(MetadataError::conflict(format!("file {}", file.id))),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_file(&self, id: FileId) -> MetadataResult<Option<LogicalFile>> {
        let row = sqlx::query(&format!("SELECT {} FROM logical_files WHERE id = ?", FILE_COLUMNS))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(file_from_row).transpose()
    }

    async fn get_file_by_token(&self, token: &str) -> MetadataResult<Option<LogicalFile>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM logical_files WHERE share_token = ?",
            FILE_COLUMNS
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(file_from_row).transpose()
    }

    async fn delete_file(&self, id: FileId) -> MetadataResult<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM file_shares WHERE file_id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM logical_files WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_files_by_owner(&self, owner: &UserId) -> MetadataResult<Vec<LogicalFile>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM logical_files WHERE owner_id = ? ORDER BY created_at ASC, id ASC",
            FILE_COLUMNS
        ))
        .bind(owner.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(file_from_row).collect()
    }

    async fn set_share_token(
        &self,
        id: FileId,
        token: Option<&str>,
        visibility: Visibility,
    ) -> MetadataResult<bool> {
        let result = sqlx::query("UPDATE logical_files SET share_token = ?, visibility = ? WHERE id = ?")
            .bind(token)
            .bind(visibility.as_str())
            .bind(id.to_string())
            .execute(&self.pool)
            .await;

        match result {
            Ok(done) => Ok(done.rows_affected() > 0),
            Err(e) if is_unique_violation(&e) => Err(MetadataError::conflict("share token")),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_visibility(&self, id: FileId, visibility: Visibility) -> MetadataResult<bool> {
        let result = sqlx::query("UPDATE logical_files SET visibility = ? WHERE id = ?")
            .bind(visibility.as_str())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn increment_download_count(&self, id: FileId) -> MetadataResult<Option<u64>> {
        let count: Option<i64> = sqlx::query_scalar(
            "UPDATE logical_files SET download_count = download_count + 1 \
             WHERE id = ? RETURNING download_count",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        optional_count(count, "download_count")
    }

    async fn live_reference_counts(&self) -> MetadataResult<Vec<(Fingerprint, u64)>> {
        let rows = sqlx::query(
            "SELECT fingerprint, COUNT(*) AS refs FROM logical_files GROUP BY fingerprint ORDER BY fingerprint",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                let fingerprint: String = row.try_get("fingerprint")?;
                let refs: i64 = row.try_get("refs")?;
                Ok((parse_fingerprint(&fingerprint)?, from_db_int(refs, "refs")?))
            })
            .collect()
    }

    async fn usage_by_owner(&self) -> MetadataResult<Vec<(UserId, u64)>> {
        let rows = sqlx::query(
            "SELECT owner_id, SUM(byte_size) AS used FROM logical_files GROUP BY owner_id ORDER BY owner_id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                let owner: String = row.try_get("owner_id")?;
                let used: i64 = row.try_get("used")?;
                Ok((UserId::new(owner), from_db_int(used, "used")?))
            })
            .collect()
    }
}

#[async_trait]
impl UserRepo for SqliteMetadataStore {
    async fn insert_user(&self, user: &User) -> MetadataResult<()> {
        let result = sqlx::query("INSERT INTO users (id, storage_used, storage_quota) VALUES (?, ?, ?)")
            .bind(user.id.as_str())
            .bind(to_db_int(user.storage_used))
            .bind(to_db_int(user.storage_quota))
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(MetadataError::conflict(format!("user {}", user.id))),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_user(&self, id: &UserId) -> MetadataResult<Option<User>> {
        let row = sqlx::query("SELECT id, storage_used, storage_quota FROM users WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn adjust_storage_used(&self, id: &UserId, delta: i64) -> MetadataResult<Option<u64>> {
        let used: Option<i64> = sqlx::query_scalar(
            "UPDATE users SET storage_used = MAX(storage_used + ?, 0) WHERE id = ? RETURNING storage_used",
        )
        .bind(delta)
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        optional_count(used, "storage_used")
    }

    async fn reserve_storage(&self, id: &UserId, bytes: u64) -> MetadataResult<Option<u64>> {
        let bytes = to_db_int(bytes);
        let used: Option<i64> = sqlx::query_scalar(
            "UPDATE users SET storage_used = storage_used + ? \
             WHERE id = ? AND storage_used + ? <= storage_quota RETURNING storage_used",
        )
        .bind(bytes)
        .bind(id.as_str())
        .bind(bytes)
        .fetch_optional(&self.pool)
        .await?;
        optional_count(used, "storage_used")
    }

    async fn set_storage_used(&self, id: &UserId, used: u64) -> MetadataResult<bool> {
        let result = sqlx::query("UPDATE users SET storage_used = ? WHERE id = ?")
            .bind(to_db_int(used))
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_storage_quota(&self, id: &UserId, quota: u64) -> MetadataResult<bool> {
        let result = sqlx::query("UPDATE users SET storage_quota = ? WHERE id = ?")
            .bind(to_db_int(quota))
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_users(&self) -> MetadataResult<Vec<User>> {
        let rows = sqlx::query("SELECT id, storage_used, storage_quota FROM users ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(user_from_row).collect()
    }
}

#[async_trait]
impl ShareRepo for SqliteMetadataStore {
    async fn upsert_share(&self, share: &FileShare) -> MetadataResult<()> {
        sqlx::query(
            "INSERT INTO file_shares (file_id, grantee_id, permission, expires_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT (file_id, grantee_id) DO UPDATE SET \
             permission = excluded.permission, expires_at = excluded.expires_at",
        )
        .bind(share.file_id.to_string())
        .bind(share.grantee_id.as_str())
        .bind(share.permission.as_str())
        .bind(share.expires_at.map(|t| t.timestamp_millis()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_share(&self, file_id: FileId, grantee: &UserId) -> MetadataResult<Option<FileShare>> {
        let row = sqlx::query("SELECT * FROM file_shares WHERE file_id = ? AND grantee_id = ?")
            .bind(file_id.to_string())
            .bind(grantee.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(share_from_row).transpose()
    }

    async fn delete_share(&self, file_id: FileId, grantee: &UserId) -> MetadataResult<bool> {
        let result = sqlx::query("DELETE FROM file_shares WHERE file_id = ? AND grantee_id = ?")
            .bind(file_id.to_string())
            .bind(grantee.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_shares(&self, file_id: FileId) -> MetadataResult<Vec<FileShare>> {
        let rows = sqlx::query("SELECT * FROM file_shares WHERE file_id = ? ORDER BY grantee_id")
            .bind(file_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(share_from_row).collect()
    }

    async fn delete_expired_shares(&self, now: DateTime<Utc>) -> MetadataResult<u64> {
        let result =
            sqlx::query("DELETE FROM file_shares WHERE expires_at IS NOT NULL AND expires_at <= ?")
                .bind(now.timestamp_millis())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
