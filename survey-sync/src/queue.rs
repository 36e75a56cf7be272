//! Durable mutation queue
//!
//! A FIFO log of remote-bound operations stored in the `sync_queue` table of
//! the local database. Entries are ordered by `created_at` with the insertion
//! sequence breaking ties, and `created_at` never decreases across inserts
//! even if the device clock steps backwards.
//!
//! Only [`MutationQueue::dequeue`] after a confirmed remote success (or an
//! explicit operator discard) removes an entry; failures stay in place with
//! an incremented attempt count.

use crate::error::{SyncError, SyncResult};
use crate::models::{now_millis, Collection, Operation, Record};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnection, SqlitePool, SqliteRow};
use sqlx::Row;
use uuid::Uuid;

const ENTRY_COLUMNS: &str = "id, collection_name, record_id, operation, payload, \
                             created_at, attempts, error_message, next_attempt_at";

/// A pending remote-bound operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Unique operation ID
    pub id: Uuid,

    /// Collection (and remote table) the record belongs to
    #[serde(rename = "collection_name")]
    pub collection: Collection,

    pub record_id: Uuid,

    pub operation: Operation,

    /// Snapshot of the record at enqueue time
    pub payload: serde_json::Value,

    /// Milliseconds since the epoch; assigned on insert
    pub created_at: i64,

    /// Number of failed remote attempts
    pub attempts: u32,

    /// Last error message (if any)
    pub error_message: Option<String>,

    /// Earliest time (ms) the entry may be retried
    pub next_attempt_at: i64,
}

impl QueueEntry {
    pub fn new(
        collection: Collection,
        record_id: Uuid,
        operation: Operation,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            collection,
            record_id,
            operation,
            payload,
            created_at: now_millis(),
            attempts: 0,
            error_message: None,
            next_attempt_at: 0,
        }
    }

    /// Entry carrying a snapshot of `record`
    pub fn for_record<R: Record>(record: &R, operation: Operation) -> SyncResult<Self> {
        Ok(Self::new(
            R::COLLECTION,
            record.id(),
            operation,
            serde_json::to_value(record)?,
        ))
    }

    pub fn record_key(&self) -> (Collection, Uuid) {
        (self.collection, self.record_id)
    }

    /// Household that must reach the remote store before this record does
    pub fn parent_household(&self) -> Option<Uuid> {
        match self.collection {
            Collection::Individuals | Collection::Photos => self
                .payload
                .get("household_id")
                .and_then(|v| v.as_str())
                .and_then(|s| Uuid::parse_str(s).ok()),
            Collection::Households | Collection::Profiles => None,
        }
    }

    pub fn is_eligible(&self, now: i64) -> bool {
        self.next_attempt_at <= now
    }
}

/// Handle on the `sync_queue` table
#[derive(Debug, Clone)]
pub struct MutationQueue {
    pool: SqlitePool,
}

impl MutationQueue {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append an entry on its own. Record writes should go through
    /// [`crate::LocalDatabase::batch`] so the record and its entry commit together.
    pub async fn enqueue(&self, entry: QueueEntry) -> SyncResult<QueueEntry> {
        let mut conn = self.pool.acquire().await?;
        insert_entry(&mut conn, entry).await
    }

    /// Remove an entry after its remote application was confirmed
    pub async fn dequeue(&self, id: Uuid) -> SyncResult<bool> {
        let mut conn = self.pool.acquire().await?;
        dequeue_entry(&mut conn, id).await
    }

    /// All outstanding entries in FIFO order
    pub async fn list_pending(&self) -> SyncResult<Vec<QueueEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM sync_queue ORDER BY created_at ASC, seq ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(entry_from_row).collect()
    }

    pub async fn get(&self, id: Uuid) -> SyncResult<Option<QueueEntry>> {
        let row = sqlx::query(&format!("SELECT {ENTRY_COLUMNS} FROM sync_queue WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(entry_from_row).transpose()
    }

    /// Increment `attempts`, store the error and the next eligible time.
    /// Returns the new attempt count.
    pub async fn record_failure(
        &self,
        id: Uuid,
        message: &str,
        next_attempt_at: i64,
    ) -> SyncResult<u32> {
        let row = sqlx::query(
            r#"
            UPDATE sync_queue
            SET attempts = attempts + 1,
                error_message = ?,
                next_attempt_at = ?
            WHERE id = ?
            RETURNING attempts
            "#,
        )
        .bind(message)
        .bind(next_attempt_at)
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| SyncError::NotFound(format!("queue entry {}", id)))?;

        let attempts = attempts_from_i64(row.try_get("attempts")?)?;

        tracing::warn!(
            entry_id = %id,
            attempts,
            next_attempt_at,
            "Queue entry failed"
        );

        Ok(attempts)
    }

    pub async fn len(&self) -> SyncResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM sync_queue")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("count")?)
    }

    pub async fn is_empty(&self) -> SyncResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Entries still outstanding for one record
    pub async fn outstanding_for(&self, collection: Collection, record_id: Uuid) -> SyncResult<i64> {
        let mut conn = self.pool.acquire().await?;
        count_outstanding(&mut conn, collection, record_id).await
    }

    /// Make every entry eligible immediately
    pub async fn reset_backoff(&self) -> SyncResult<u64> {
        let result = sqlx::query("UPDATE sync_queue SET next_attempt_at = 0 WHERE next_attempt_at > 0")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

pub(crate) async fn insert_entry(
    conn: &mut SqliteConnection,
    mut entry: QueueEntry,
) -> SyncResult<QueueEntry> {
    // Clamp to the newest existing entry so FIFO order survives clock steps
    let row = sqlx::query(
        r#"
        INSERT INTO sync_queue (
            id, collection_name, record_id, operation, payload,
            created_at, attempts, error_message, next_attempt_at
        ) VALUES (
            ?, ?, ?, ?, ?,
            MAX(?, COALESCE((SELECT MAX(created_at) FROM sync_queue), 0)),
            ?, ?, ?
        )
        RETURNING created_at
        "#,
    )
    .bind(entry.id.to_string())
    .bind(entry.collection.as_str())
    .bind(entry.record_id.to_string())
    .bind(entry.operation.as_str())
    .bind(entry.payload.to_string())
    .bind(entry.created_at)
    .bind(i64::from(entry.attempts))
    .bind(entry.error_message.as_deref())
    .bind(entry.next_attempt_at)
    .fetch_one(&mut *conn)
    .await?;

    entry.created_at = row.try_get("created_at")?;

    tracing::debug!(
        entry_id = %entry.id,
        collection = entry.collection.as_str(),
        record_id = %entry.record_id,
        operation = ?entry.operation,
        "Queued operation for sync"
    );

    Ok(entry)
}

pub(crate) async fn dequeue_entry(conn: &mut SqliteConnection, id: Uuid) -> SyncResult<bool> {
    let result = sqlx::query("DELETE FROM sync_queue WHERE id = ?")
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub(crate) async fn take_entry(
    conn: &mut SqliteConnection,
    id: Uuid,
) -> SyncResult<Option<QueueEntry>> {
    let row = sqlx::query(&format!(
        "DELETE FROM sync_queue WHERE id = ? RETURNING {ENTRY_COLUMNS}"
    ))
    .bind(id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(entry_from_row).transpose()
}

pub(crate) async fn count_outstanding(
    conn: &mut SqliteConnection,
    collection: Collection,
    record_id: Uuid,
) -> SyncResult<i64> {
    let row = sqlx::query(
        "SELECT COUNT(*) AS count FROM sync_queue WHERE collection_name = ? AND record_id = ?",
    )
    .bind(collection.as_str())
    .bind(record_id.to_string())
    .fetch_one(&mut *conn)
    .await?;
    Ok(row.try_get("count")?)
}

fn attempts_from_i64(value: i64) -> SyncResult<u32> {
    u32::try_from(value).map_err(|_| SyncError::Internal(format!("Invalid attempt count: {}", value)))
}

fn entry_from_row(row: &SqliteRow) -> SyncResult<QueueEntry> {
    let id: String = row.try_get("id")?;
    let collection: String = row.try_get("collection_name")?;
    let record_id: String = row.try_get("record_id")?;
    let operation: String = row.try_get("operation")?;
    let payload: String = row.try_get("payload")?;

    Ok(QueueEntry {
        id: Uuid::parse_str(&id)
            .map_err(|e| SyncError::Internal(format!("Invalid UUID: {}", e)))?,
        collection: Collection::from_str(&collection)?,
        record_id: Uuid::parse_str(&record_id)
            .map_err(|e| SyncError::Internal(format!("Invalid UUID: {}", e)))?,
        operation: Operation::from_str(&operation)?,
        payload: serde_json::from_str(&payload)?,
        created_at: row.try_get("created_at")?,
        attempts: attempts_from_i64(row.try_get("attempts")?)?,
        error_message: row.try_get("error_message")?,
        next_attempt_at: row.try_get("next_attempt_at")?,
    })
}
