//! Local SQLite database for offline-first operations
//!
//! Provides:
//! - One table per collection (profiles, households, individuals, photos)
//!   with the record body as JSON plus indexed columns
//! - The durable sync queue (see [`crate::queue`])
//! - Atomic "write record + enqueue" batches
//! - Sync metadata (last successful drain)
//!
//! The `sync_status` and `last_modified` columns are authoritative; they are
//! folded back into the JSON body whenever a record is read.

use crate::error::{SyncError, SyncResult};
use crate::models::{Collection, IndexValue, Operation, Record, SyncStatus};
use crate::queue::{self, MutationQueue, QueueEntry};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::query::Query as SqlQuery;
use sqlx::sqlite::{
    Sqlite, SqliteArguments, SqliteConnectOptions, SqliteConnection, SqliteJournalMode,
    SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

const IN_MEMORY_PATH: &str = ":memory:";
const LAST_SYNC_KEY: &str = "last_sync_time";

/// Configuration for local database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalDbConfig {
    /// Path to the database file, or `:memory:`
    pub db_path: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Whether to enable WAL mode
    pub enable_wal: bool,
}

impl Default for LocalDbConfig {
    fn default() -> Self {
        Self {
            db_path: "survey_local.db".to_string(),
            max_connections: 5,
            enable_wal: true,
        }
    }
}

impl LocalDbConfig {
    pub fn in_memory() -> Self {
        Self {
            db_path: IN_MEMORY_PATH.to_string(),
            max_connections: 1,
            enable_wal: false,
        }
    }

    fn is_in_memory(&self) -> bool {
        self.db_path == IN_MEMORY_PATH
    }
}

/// Record filter for [`LocalDatabase::query`] and [`LocalDatabase::count`]
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    All,
    /// Indexed column equals a value (`Null` matches missing values)
    Equals(&'static str, IndexValue),
    /// Indexed column greater than or equal to a value
    AtLeast(&'static str, IndexValue),
    /// `last_modified` at or after the given milliseconds
    ModifiedSince(i64),
    Status(SyncStatus),
}

impl Query {
    fn where_clause(&self, collection: Collection) -> SyncResult<(String, Option<IndexValue>)> {
        match self {
            Query::All => Ok((String::new(), None)),
            Query::Equals(column, IndexValue::Null) => {
                check_indexed(collection, column)?;
                Ok((format!(" WHERE {} IS NULL", column), None))
            }
            Query::Equals(column, value) => {
                check_indexed(collection, column)?;
                Ok((format!(" WHERE {} = ?", column), Some(value.clone())))
            }
            Query::AtLeast(column, value) => {
                check_indexed(collection, column)?;
                Ok((format!(" WHERE {} >= ?", column), Some(value.clone())))
            }
            Query::ModifiedSince(millis) => Ok((
                " WHERE last_modified >= ?".to_string(),
                Some(IndexValue::Integer(*millis)),
            )),
            Query::Status(status) => Ok((
                " WHERE sync_status = ?".to_string(),
                Some(IndexValue::Text(status.as_str().to_string())),
            )),
        }
    }
}

fn check_indexed(collection: Collection, column: &str) -> SyncResult<()> {
    if collection.indexed_columns().contains(&column) {
        Ok(())
    } else {
        Err(SyncError::InvalidOperation(format!(
            "Column {} is not indexed on {}",
            column,
            collection.as_str()
        )))
    }
}

fn bind_index<'q>(
    query: SqlQuery<'q, Sqlite, SqliteArguments<'q>>,
    value: &IndexValue,
) -> SqlQuery<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        IndexValue::Text(text) => query.bind(text.clone()),
        IndexValue::Integer(number) => query.bind(*number),
        IndexValue::Bool(flag) => query.bind(*flag),
        IndexValue::Null => query.bind(Option::<String>::None),
    }
}

/// Column values for one stored record
#[derive(Debug, Clone)]
struct RowImage {
    collection: Collection,
    id: Uuid,
    sync_status: SyncStatus,
    last_modified: i64,
    data: String,
    indexes: Vec<(&'static str, IndexValue)>,
}

impl RowImage {
    fn from_record<R: Record>(record: &R) -> SyncResult<Self> {
        let indexes = record.index_values();
        for (column, _) in &indexes {
            check_indexed(R::COLLECTION, column)?;
        }

        let envelope = record.envelope();
        Ok(Self {
            collection: R::COLLECTION,
            id: envelope.id,
            sync_status: envelope.sync_status,
            last_modified: envelope.last_modified,
            data: serde_json::to_string(record)?,
            indexes,
        })
    }
}

/// A staged local write
#[derive(Debug, Clone)]
enum StagedWrite {
    Put(RowImage),
    Delete { collection: Collection, id: Uuid },
    Enqueue(QueueEntry),
}

/// Record writes and queue entries that commit in one transaction.
///
/// Either every staged write lands or none does, so a record is never
/// persisted without its queue entry (and vice versa).
#[derive(Debug)]
pub struct WriteBatch<'a> {
    db: &'a LocalDatabase,
    writes: Vec<StagedWrite>,
}

impl<'a> WriteBatch<'a> {
    /// Stage a plain record write with no queue entry
    pub fn put<R: Record>(&mut self, record: &R) -> SyncResult<&mut Self> {
        self.writes.push(StagedWrite::Put(RowImage::from_record(record)?));
        Ok(self)
    }

    /// Stage a record write as pending plus the queue entry that carries it
    pub fn put_queued<R: Record>(&mut self, record: &R, operation: Operation) -> SyncResult<&mut Self> {
        let mut pending = record.clone();
        pending.envelope_mut().sync_status = SyncStatus::Pending;

        let entry = QueueEntry::for_record(&pending, operation)?;
        self.writes.push(StagedWrite::Put(RowImage::from_record(&pending)?));
        self.writes.push(StagedWrite::Enqueue(entry));
        Ok(self)
    }

    /// Stage removal of a record plus a delete entry for the remote store
    pub fn delete_queued<R: Record>(&mut self, record: &R) -> SyncResult<&mut Self> {
        let entry = QueueEntry::for_record(record, Operation::Delete)?;
        self.writes.push(StagedWrite::Delete {
            collection: R::COLLECTION,
            id: record.id(),
        });
        self.writes.push(StagedWrite::Enqueue(entry));
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Apply every staged write. Returns the queue entries as stored.
    pub async fn commit(self) -> SyncResult<Vec<QueueEntry>> {
        let mut tx = self.db.pool.begin().await?;
        let mut enqueued = Vec::new();

        for write in self.writes {
            match write {
                StagedWrite::Put(row) => write_row(&mut tx, &row).await?,
                StagedWrite::Delete { collection, id } => {
                    delete_row(&mut tx, collection, id).await?;
                }
                StagedWrite::Enqueue(entry) => {
                    enqueued.push(queue::insert_entry(&mut tx, entry).await?);
                }
            }
        }

        tx.commit().await?;
        Ok(enqueued)
    }
}

/// Local SQLite database
#[derive(Debug, Clone)]
pub struct LocalDatabase {
    pool: SqlitePool,
}

impl LocalDatabase {
    /// Open (or create) the database and its schema
    pub async fn new(config: LocalDbConfig) -> SyncResult<Self> {
        let in_memory = config.is_in_memory();

        let options = if in_memory {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            if let Some(parent) = Path::new(&config.db_path).parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await.map_err(|e| {
                        SyncError::Config(format!("Cannot create {}: {}", parent.display(), e))
                    })?;
                }
            }

            let journal_mode = if config.enable_wal {
                SqliteJournalMode::Wal
            } else {
                SqliteJournalMode::Delete
            };
            SqliteConnectOptions::new()
                .filename(&config.db_path)
                .create_if_missing(true)
                .journal_mode(journal_mode)
        };
        let options = options.busy_timeout(Duration::from_secs(5));

        // An in-memory database lives only as long as its single connection
        let pool = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(config.max_connections.max(1))
                .connect_with(options)
                .await?
        };

        let db = Self { pool };
        db.initialize_schema().await?;

        tracing::info!(
            db_path = %config.db_path,
            wal = config.enable_wal && !in_memory,
            "Local database opened"
        );

        Ok(db)
    }

    pub async fn in_memory() -> SyncResult<Self> {
        Self::new(LocalDbConfig::in_memory()).await
    }

    async fn initialize_schema(&self) -> SyncResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS profiles (
                id TEXT PRIMARY KEY,
                sync_status TEXT NOT NULL,
                last_modified INTEGER NOT NULL,
                data TEXT NOT NULL,
                role TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS households (
                id TEXT PRIMARY KEY,
                sync_status TEXT NOT NULL,
                last_modified INTEGER NOT NULL,
                data TEXT NOT NULL,
                enumerator_id TEXT,
                ward TEXT,
                llg TEXT,
                created_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS individuals (
                id TEXT PRIMARY KEY,
                sync_status TEXT NOT NULL,
                last_modified INTEGER NOT NULL,
                data TEXT NOT NULL,
                household_id TEXT,
                youth_15_35 INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS photos (
                id TEXT PRIMARY KEY,
                sync_status TEXT NOT NULL,
                last_modified INTEGER NOT NULL,
                data TEXT NOT NULL,
                household_id TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for collection in Collection::ALL {
            let table = collection.as_str();
            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_status ON {table}(sync_status)"
            ))
            .execute(&self.pool)
            .await?;
            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_modified ON {table}(last_modified)"
            ))
            .execute(&self.pool)
            .await?;
            for column in collection.indexed_columns() {
                sqlx::query(&format!(
                    "CREATE INDEX IF NOT EXISTS idx_{table}_{column} ON {table}({column})"
                ))
                .execute(&self.pool)
                .await?;
            }
        }

        // seq breaks ties between entries sharing a created_at
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_queue (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                collection_name TEXT NOT NULL,
                record_id TEXT NOT NULL,
                operation TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                next_attempt_at INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sync_queue_order ON sync_queue(created_at, seq)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_sync_queue_record ON sync_queue(collection_name, record_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Handle on the sync queue sharing this database's pool
    pub fn queue(&self) -> MutationQueue {
        MutationQueue::new(self.pool.clone())
    }

    /// Start an atomic batch of writes
    pub fn batch(&self) -> WriteBatch<'_> {
        WriteBatch {
            db: self,
            writes: Vec::new(),
        }
    }

    /// Insert or replace a record without queueing it
    pub async fn put<R: Record>(&self, record: &R) -> SyncResult<()> {
        let row = RowImage::from_record(record)?;
        let mut conn = self.pool.acquire().await?;
        write_row(&mut conn, &row).await
    }

    pub async fn get<R: Record>(&self, id: Uuid) -> SyncResult<Option<R>> {
        let row = sqlx::query(&format!(
            "SELECT id, sync_status, last_modified, data FROM {} WHERE id = ?",
            R::COLLECTION.as_str()
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(decode_record).transpose()
    }

    /// Records matching `query`, oldest modification first
    pub async fn query<R: Record>(&self, query: &Query) -> SyncResult<Vec<R>> {
        let (clause, value) = query.where_clause(R::COLLECTION)?;
        let sql = format!(
            "SELECT id, sync_status, last_modified, data FROM {}{} ORDER BY last_modified ASC, id ASC",
            R::COLLECTION.as_str(),
            clause
        );

        let mut statement = sqlx::query(&sql);
        if let Some(value) = &value {
            statement = bind_index(statement, value);
        }
        let rows = statement.fetch_all(&self.pool).await?;

        rows.iter().map(decode_record).collect()
    }

    pub async fn count(&self, collection: Collection, query: &Query) -> SyncResult<i64> {
        let (clause, value) = query.where_clause(collection)?;
        let sql = format!(
            "SELECT COUNT(*) AS count FROM {}{}",
            collection.as_str(),
            clause
        );

        let mut statement = sqlx::query(&sql);
        if let Some(value) = &value {
            statement = bind_index(statement, value);
        }
        let row = statement.fetch_one(&self.pool).await?;
        Ok(row.try_get("count")?)
    }

    /// Row counts grouped by an indexed column, e.g. individuals per household
    pub async fn group_counts(
        &self,
        collection: Collection,
        column: &'static str,
    ) -> SyncResult<Vec<(Option<String>, i64)>> {
        check_indexed(collection, column)?;
        let rows = sqlx::query(&format!(
            "SELECT {column} AS key, COUNT(*) AS count FROM {} GROUP BY {column}",
            collection.as_str()
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| Ok((row.try_get("key")?, row.try_get("count")?)))
            .collect()
    }

    /// Remove a record locally without queueing a remote delete
    pub async fn delete(&self, collection: Collection, id: Uuid) -> SyncResult<bool> {
        let mut conn = self.pool.acquire().await?;
        delete_row(&mut conn, collection, id).await
    }

    /// Write a record as pending and enqueue it, atomically
    pub async fn put_and_enqueue<R: Record>(
        &self,
        record: &R,
        operation: Operation,
    ) -> SyncResult<QueueEntry> {
        let mut batch = self.batch();
        batch.put_queued(record, operation)?;
        batch
            .commit()
            .await?
            .pop()
            .ok_or_else(|| SyncError::Internal("Batch committed without an entry".to_string()))
    }

    /// Delete a record and enqueue the remote delete, atomically.
    /// Returns `None` when the record does not exist.
    pub async fn delete_and_enqueue<R: Record>(&self, id: Uuid) -> SyncResult<Option<QueueEntry>> {
        let Some(record) = self.get::<R>(id).await? else {
            return Ok(None);
        };

        let mut batch = self.batch();
        batch.delete_queued(&record)?;
        Ok(batch.commit().await?.pop())
    }

    /// Finish a successfully applied entry in one transaction: merge the
    /// remote write-back into the record, dequeue the entry, and mark the
    /// record synced unless newer entries for it are still queued.
    ///
    /// A `null` in `write_back` removes that key. Returns the record's new
    /// status, or `None` when the record no longer exists locally.
    pub async fn complete_entry(
        &self,
        entry: &QueueEntry,
        write_back: &Map<String, Value>,
    ) -> SyncResult<Option<SyncStatus>> {
        let table = entry.collection.as_str();
        let record_id = entry.record_id.to_string();
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query(&format!("SELECT data FROM {table} WHERE id = ?"))
            .bind(&record_id)
            .fetch_optional(&mut *tx)
            .await?;

        if let (Some(row), false) = (&current, write_back.is_empty()) {
            let data: String = row.try_get("data")?;
            let mut value: Value = serde_json::from_str(&data)?;
            merge_fields(&mut value, write_back);

            sqlx::query(&format!("UPDATE {table} SET data = ? WHERE id = ?"))
                .bind(value.to_string())
                .bind(&record_id)
                .execute(&mut *tx)
                .await?;
        }

        queue::dequeue_entry(&mut tx, entry.id).await?;

        let status = if current.is_some() {
            let remaining =
                queue::count_outstanding(&mut tx, entry.collection, entry.record_id).await?;
            let status = if remaining == 0 {
                SyncStatus::Synced
            } else {
                SyncStatus::Pending
            };
            update_status(&mut tx, entry.collection, entry.record_id, status).await?;
            Some(status)
        } else {
            None
        };

        tx.commit().await?;
        Ok(status)
    }

    pub async fn set_sync_status(
        &self,
        collection: Collection,
        id: Uuid,
        status: SyncStatus,
    ) -> SyncResult<bool> {
        let mut conn = self.pool.acquire().await?;
        update_status(&mut conn, collection, id, status).await
    }

    /// Drop a queue entry without applying it and flag its record as error
    pub async fn discard_entry(&self, id: Uuid) -> SyncResult<Option<QueueEntry>> {
        let mut tx = self.pool.begin().await?;
        let entry = queue::take_entry(&mut tx, id).await?;
        if let Some(entry) = &entry {
            update_status(&mut tx, entry.collection, entry.record_id, SyncStatus::Error).await?;
        }
        tx.commit().await?;

        if let Some(entry) = &entry {
            tracing::warn!(
                entry_id = %entry.id,
                collection = entry.collection.as_str(),
                record_id = %entry.record_id,
                attempts = entry.attempts,
                "Queue entry discarded by operator"
            );
        }
        Ok(entry)
    }

    pub async fn set_metadata(&self, key: &str, value: &str) -> SyncResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_metadata (key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_metadata(&self, key: &str) -> SyncResult<Option<String>> {
        let row = sqlx::query("SELECT value FROM sync_metadata WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| r.try_get::<String, _>("value").map_err(SyncError::from))
            .transpose()
    }

    pub async fn set_last_sync_time(&self, at: DateTime<Utc>) -> SyncResult<()> {
        self.set_metadata(LAST_SYNC_KEY, &at.timestamp_millis().to_string())
            .await
    }

    pub async fn last_sync_time(&self) -> SyncResult<Option<DateTime<Utc>>> {
        let Some(raw) = self.get_metadata(LAST_SYNC_KEY).await? else {
            return Ok(None);
        };
        let millis: i64 = raw
            .parse()
            .map_err(|_| SyncError::Internal(format!("Invalid {}: {}", LAST_SYNC_KEY, raw)))?;
        Ok(Utc.timestamp_millis_opt(millis).single())
    }

    /// Remove survey data (households, individuals, photos) and the queue.
    /// Profiles and metadata are kept.
    pub async fn clear_survey_data(&self) -> SyncResult<()> {
        let mut tx = self.pool.begin().await?;
        for table in ["households", "individuals", "photos", "sync_queue"] {
            sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        tracing::info!("Local survey data cleared");
        Ok(())
    }

    /// Compact the database file
    pub async fn vacuum(&self) -> SyncResult<()> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }

    /// Close database connection
    pub async fn close(self) -> SyncResult<()> {
        self.pool.close().await;
        Ok(())
    }
}

async fn write_row(conn: &mut SqliteConnection, row: &RowImage) -> SyncResult<()> {
    let mut columns = vec!["id", "sync_status", "last_modified", "data"];
    columns.extend(row.indexes.iter().map(|(column, _)| *column));
    let placeholders = vec!["?"; columns.len()].join(", ");

    let sql = format!(
        "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
        row.collection.as_str(),
        columns.join(", "),
        placeholders
    );

    let mut statement = sqlx::query(&sql)
        .bind(row.id.to_string())
        .bind(row.sync_status.as_str())
        .bind(row.last_modified)
        .bind(row.data.clone());
    for (_, value) in &row.indexes {
        statement = bind_index(statement, value);
    }
    statement.execute(&mut *conn).await?;

    tracing::debug!(
        collection = row.collection.as_str(),
        record_id = %row.id,
        status = row.sync_status.as_str(),
        "Record written"
    );
    Ok(())
}

async fn delete_row(conn: &mut SqliteConnection, collection: Collection, id: Uuid) -> SyncResult<bool> {
    let result = sqlx::query(&format!("DELETE FROM {} WHERE id = ?", collection.as_str()))
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

async fn update_status(
    conn: &mut SqliteConnection,
    collection: Collection,
    id: Uuid,
    status: SyncStatus,
) -> SyncResult<bool> {
    let result = sqlx::query(&format!(
        "UPDATE {} SET sync_status = ? WHERE id = ?",
        collection.as_str()
    ))
    .bind(status.as_str())
    .bind(id.to_string())
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

fn merge_fields(target: &mut Value, fields: &Map<String, Value>) {
    if let Value::Object(object) = target {
        for (key, value) in fields {
            if value.is_null() {
                object.remove(key);
            } else {
                object.insert(key.clone(), value.clone());
            }
        }
    }
}

fn decode_record<R: Record>(row: &SqliteRow) -> SyncResult<R> {
    let id: String = row.try_get("id")?;
    let sync_status: String = row.try_get("sync_status")?;
    let last_modified: i64 = row.try_get("last_modified")?;
    let data: String = row.try_get("data")?;

    let mut value: Value = serde_json::from_str(&data)?;
    if let Value::Object(object) = &mut value {
        object.insert("id".to_string(), Value::String(id));
        object.insert("sync_status".to_string(), Value::String(sync_status));
        object.insert("last_modified".to_string(), Value::from(last_modified));
    }

    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Household, Individual, Photo, Profile};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_database_persists() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("survey.db");
        let config = LocalDbConfig {
            db_path: db_path.to_str().unwrap().to_string(),
            ..Default::default()
        };

        let household = Household::new();
        {
            let db = LocalDatabase::new(config.clone()).await.unwrap();
            db.put(&household).await.unwrap();
            db.close().await.unwrap();
        }

        let db = LocalDatabase::new(config).await.unwrap();
        let loaded: Household = db.get(household.id()).await.unwrap().unwrap();
        assert_eq!(loaded, household);
    }

    #[tokio::test]
    async fn test_put_and_enqueue_is_atomic_pair() {
        let db = LocalDatabase::in_memory().await.unwrap();
        let mut household = Household::new();
        household.envelope.sync_status = SyncStatus::Synced;
        household.ward = Some("Ward 3".to_string());

        let entry = db.put_and_enqueue(&household, Operation::Insert).await.unwrap();
        assert_eq!(entry.collection, Collection::Households);
        assert_eq!(entry.record_id, household.id());
        assert_eq!(entry.payload["ward"], "Ward 3");

        let stored: Household = db.get(household.id()).await.unwrap().unwrap();
        assert_eq!(stored.envelope.sync_status, SyncStatus::Pending);
        assert_eq!(db.queue().len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_batch_leaves_nothing_behind() {
        let db = LocalDatabase::in_memory().await.unwrap();
        let household = Household::new();

        let queued = db.put_and_enqueue(&household, Operation::Insert).await.unwrap();

        // Reusing the entry id violates the UNIQUE constraint mid-batch
        let mut individual_entry = QueueEntry::for_record(&household, Operation::Update).unwrap();
        individual_entry.id = queued.id;
        let individual = Individual::new(household.id());

        let mut batch = db.batch();
        batch.put(&individual).unwrap();
        batch.writes.push(StagedWrite::Enqueue(individual_entry));
        assert!(batch.commit().await.is_err());

        assert!(db.get::<Individual>(individual.id()).await.unwrap().is_none());
        assert_eq!(db.queue().len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_query_by_index() {
        let db = LocalDatabase::in_memory().await.unwrap();
        let household = Household::new();
        let other = Household::new();

        let mut youth = Individual::new(household.id());
        youth.youth_15_35 = Some(true);
        let elder = Individual::new(household.id());
        let elsewhere = Individual::new(other.id());

        for individual in [&youth, &elder, &elsewhere] {
            db.put(individual).await.unwrap();
        }

        let members: Vec<Individual> = db
            .query(&Query::Equals("household_id", IndexValue::uuid(household.id())))
            .await
            .unwrap();
        assert_eq!(members.len(), 2);

        let count = db
            .count(Collection::Individuals, &Query::Equals("youth_15_35", IndexValue::Bool(true)))
            .await
            .unwrap();
        assert_eq!(count, 1);

        let unknown = db
            .count(Collection::Individuals, &Query::Equals("name_or_initials", IndexValue::Null))
            .await;
        assert!(matches!(unknown, Err(SyncError::InvalidOperation(_))));

        let groups = db
            .group_counts(Collection::Individuals, "household_id")
            .await
            .unwrap();
        assert!(groups.contains(&(Some(household.id().to_string()), 2)));
        assert!(groups.contains(&(Some(other.id().to_string()), 1)));
    }

    #[tokio::test]
    async fn test_status_column_is_authoritative() {
        let db = LocalDatabase::in_memory().await.unwrap();
        let profile = Profile::for_user(Uuid::new_v4());
        db.put(&profile).await.unwrap();

        assert!(db
            .set_sync_status(Collection::Profiles, profile.id(), SyncStatus::Error)
            .await
            .unwrap());

        let loaded: Profile = db.get(profile.id()).await.unwrap().unwrap();
        assert_eq!(loaded.envelope.sync_status, SyncStatus::Error);

        let errors: Vec<Profile> = db.query(&Query::Status(SyncStatus::Error)).await.unwrap();
        assert_eq!(errors.len(), 1);
    }

    #[tokio::test]
    async fn test_complete_entry_merges_write_back() {
        let db = LocalDatabase::in_memory().await.unwrap();
        let photo = Photo::new(Uuid::new_v4(), vec![1, 2, 3]);
        let entry = db.put_and_enqueue(&photo, Operation::Insert).await.unwrap();

        let mut write_back = Map::new();
        write_back.insert("url".to_string(), Value::from("https://cdn/x.jpg"));
        write_back.insert("blob_data".to_string(), Value::Null);

        let status = db.complete_entry(&entry, &write_back).await.unwrap();
        assert_eq!(status, Some(SyncStatus::Synced));

        let stored: Photo = db.get(photo.id()).await.unwrap().unwrap();
        assert_eq!(stored.url, "https://cdn/x.jpg");
        assert!(stored.blob_data.is_none());
        assert_eq!(stored.envelope.sync_status, SyncStatus::Synced);
        assert!(db.queue().is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_complete_entry_keeps_pending_when_newer_edit_queued() {
        let db = LocalDatabase::in_memory().await.unwrap();
        let mut household = Household::new();
        let first = db.put_and_enqueue(&household, Operation::Insert).await.unwrap();

        household.touch();
        household.head_name = Some("Kila".to_string());
        db.put_and_enqueue(&household, Operation::Update).await.unwrap();

        let status = db.complete_entry(&first, &Map::new()).await.unwrap();
        assert_eq!(status, Some(SyncStatus::Pending));

        let stored: Household = db.get(household.id()).await.unwrap().unwrap();
        assert_eq!(stored.head_name.as_deref(), Some("Kila"));
        assert_eq!(db.queue().len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_and_enqueue() {
        let db = LocalDatabase::in_memory().await.unwrap();
        let household = Household::new();
        db.put(&household).await.unwrap();

        let entry = db
            .delete_and_enqueue::<Household>(household.id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.operation, Operation::Delete);
        assert!(db.get::<Household>(household.id()).await.unwrap().is_none());

        let missing = db.delete_and_enqueue::<Household>(Uuid::new_v4()).await.unwrap();
        assert!(missing.is_none());
        assert_eq!(db.queue().len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_discard_entry_flags_record() {
        let db = LocalDatabase::in_memory().await.unwrap();
        let household = Household::new();
        let entry = db.put_and_enqueue(&household, Operation::Insert).await.unwrap();

        let discarded = db.discard_entry(entry.id).await.unwrap().unwrap();
        assert_eq!(discarded.id, entry.id);
        assert!(db.queue().is_empty().await.unwrap());

        let stored: Household = db.get(household.id()).await.unwrap().unwrap();
        assert_eq!(stored.envelope.sync_status, SyncStatus::Error);
        assert!(db.discard_entry(entry.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_metadata_and_last_sync_time() {
        let db = LocalDatabase::in_memory().await.unwrap();
        assert!(db.last_sync_time().await.unwrap().is_none());

        let at = Utc.timestamp_millis_opt(1_700_000_000_123).single().unwrap();
        db.set_last_sync_time(at).await.unwrap();
        assert_eq!(db.last_sync_time().await.unwrap(), Some(at));

        db.set_metadata("schema", "1").await.unwrap();
        db.set_metadata("schema", "2").await.unwrap();
        assert_eq!(db.get_metadata("schema").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_clear_survey_data_keeps_profiles() {
        let db = LocalDatabase::in_memory().await.unwrap();
        let profile = Profile::for_user(Uuid::new_v4());
        db.put(&profile).await.unwrap();
        db.put_and_enqueue(&Household::new(), Operation::Insert).await.unwrap();

        db.clear_survey_data().await.unwrap();

        assert_eq!(db.count(Collection::Households, &Query::All).await.unwrap(), 0);
        assert!(db.queue().is_empty().await.unwrap());
        assert!(db.get::<Profile>(profile.id()).await.unwrap().is_some());
    }
}
