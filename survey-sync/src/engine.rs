//! Sync engine
//!
//! The engine is the only consumer of the mutation queue. A drain pass
//! snapshots the queue once and applies entries strictly in FIFO order;
//! at most one pass runs at a time. A drain request arriving mid-pass is
//! ignored rather than queued.
//!
//! Passes are requested by connectivity transitions (debounced), a periodic
//! timer, local writes, or an explicit [`SyncEngine::force_sync`].

use crate::backoff::RetryPolicy;
use crate::connectivity::{ConnectivityEvent, ConnectivityMonitor};
use crate::error::{RemoteError, SyncResult};
use crate::local_db::{LocalDatabase, Query};
use crate::models::{now_millis, Collection, Operation, SyncStatus};
use crate::queue::{MutationQueue, QueueEntry};
use crate::remote::RemoteAdapter;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{watch, Notify};
use uuid::Uuid;

/// Keep later entries for this record out of the pass. An unapplied child
/// delete also holds back its household, whose delete is queued after it.
fn hold_back(blocked: &mut HashSet<(Collection, Uuid)>, entry: &QueueEntry) {
    blocked.insert(entry.record_key());
    if entry.operation == Operation::Delete {
        if let Some(household) = entry.parent_household() {
            blocked.insert((Collection::Households, household));
        }
    }
}

/// Timing knobs for the background loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Periodic drain interval
    pub drain_interval: Duration,
    /// Quiet period after coming online before draining
    pub online_debounce: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            drain_interval: Duration::from_secs(300),
            online_debounce: Duration::from_secs(2),
        }
    }
}

/// Why a drain was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainTrigger {
    Transition,
    Timer,
    Manual,
    LocalWrite,
}

/// Counters for one drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    /// Entries applied remotely and dequeued
    pub applied: usize,
    /// Entries that failed and were kept
    pub failed: usize,
    /// Entries skipped this pass (backoff or an earlier failure on the same record)
    pub deferred: usize,
    /// Records newly marked `error`
    pub flagged: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    Completed(SyncStats),
    /// Another pass was running; this request was a no-op
    AlreadyDraining,
    /// Not online and the trigger was not manual
    Offline,
}

/// Holds the draining flag for the duration of one pass
struct DrainGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> DrainGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct SyncEngine {
    db: LocalDatabase,
    queue: MutationQueue,
    adapter: Arc<dyn RemoteAdapter>,
    connectivity: Arc<ConnectivityMonitor>,
    policy: RetryPolicy,
    settings: EngineSettings,
    draining: AtomicBool,
    wake: Notify,
}

impl SyncEngine {
    pub fn new(
        db: LocalDatabase,
        adapter: Arc<dyn RemoteAdapter>,
        connectivity: Arc<ConnectivityMonitor>,
        policy: RetryPolicy,
        settings: EngineSettings,
    ) -> Self {
        let queue = db.queue();
        Self {
            db,
            queue,
            adapter,
            connectivity,
            policy,
            settings,
            draining: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }

    pub fn database(&self) -> &LocalDatabase {
        &self.db
    }

    pub fn queue(&self) -> &MutationQueue {
        &self.queue
    }

    pub fn connectivity(&self) -> &Arc<ConnectivityMonitor> {
        &self.connectivity
    }

    pub fn is_connected(&self) -> bool {
        self.connectivity.is_online()
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Entries waiting for the remote store
    pub async fn pending_count(&self) -> SyncResult<i64> {
        self.queue.len().await
    }

    /// Households whose latest local state is confirmed remotely
    pub async fn synced_count(&self) -> SyncResult<i64> {
        self.db
            .count(Collection::Households, &Query::Status(SyncStatus::Synced))
            .await
    }

    /// Records flagged `error` across all collections
    pub async fn error_count(&self) -> SyncResult<i64> {
        let mut total = 0;
        for collection in Collection::ALL {
            total += self
                .db
                .count(collection, &Query::Status(SyncStatus::Error))
                .await?;
        }
        Ok(total)
    }

    pub async fn last_sync_time(&self) -> SyncResult<Option<DateTime<Utc>>> {
        self.db.last_sync_time().await
    }

    /// Manual drain; runs even when the monitor reports offline
    pub async fn force_sync(&self) -> SyncResult<DrainOutcome> {
        self.request_drain(DrainTrigger::Manual).await
    }

    /// Ask the background loop to drain soon
    pub fn notify_local_write(&self) {
        self.wake.notify_one();
    }

    /// Make every queued entry eligible now
    pub async fn retry_now(&self) -> SyncResult<u64> {
        self.queue.reset_backoff().await
    }

    /// Drop an entry without applying it; its record is flagged `error`
    pub async fn discard(&self, entry_id: Uuid) -> SyncResult<Option<QueueEntry>> {
        self.db.discard_entry(entry_id).await
    }

    pub async fn request_drain(&self, trigger: DrainTrigger) -> SyncResult<DrainOutcome> {
        if trigger != DrainTrigger::Manual && !self.connectivity.is_online() {
            tracing::debug!(?trigger, "Skipping drain while offline");
            return Ok(DrainOutcome::Offline);
        }

        let Some(_guard) = DrainGuard::acquire(&self.draining) else {
            tracing::debug!(?trigger, "Drain already in progress");
            return Ok(DrainOutcome::AlreadyDraining);
        };

        tracing::info!(?trigger, "Drain started");
        let stats = self.drain_pass().await?;
        tracing::info!(
            ?trigger,
            applied = stats.applied,
            failed = stats.failed,
            deferred = stats.deferred,
            flagged = stats.flagged,
            "Drain finished"
        );

        Ok(DrainOutcome::Completed(stats))
    }

    async fn drain_pass(&self) -> SyncResult<SyncStats> {
        let snapshot = self.queue.list_pending().await?;
        let now = now_millis();
        let mut stats = SyncStats::default();

        // Records with an unapplied earlier entry in this pass
        let mut blocked: HashSet<(Collection, Uuid)> = HashSet::new();

        for entry in snapshot {
            let key = entry.record_key();
            let parent_blocked = entry
                .parent_household()
                .is_some_and(|household| blocked.contains(&(Collection::Households, household)));

            if blocked.contains(&key) || parent_blocked || !entry.is_eligible(now) {
                hold_back(&mut blocked, &entry);
                stats.deferred += 1;
                continue;
            }

            match self.adapter.apply(&entry).await {
                Ok(applied) => match self.db.complete_entry(&entry, &applied.write_back).await {
                    Ok(status) => {
                        stats.applied += 1;
                        tracing::debug!(
                            entry_id = %entry.id,
                            collection = entry.collection.as_str(),
                            record_id = %entry.record_id,
                            status = ?status,
                            "Entry synced"
                        );
                    }
                    Err(e) => {
                        // Applied remotely but still queued; reapplying is an idempotent upsert
                        tracing::error!(entry_id = %entry.id, error = %e, "Failed to finish synced entry");
                        hold_back(&mut blocked, &entry);
                        stats.failed += 1;
                    }
                },
                Err(err) => {
                    hold_back(&mut blocked, &entry);
                    stats.failed += 1;
                    match self.handle_failure(&entry, &err).await {
                        Ok(true) => stats.flagged += 1,
                        Ok(false) => {}
                        Err(e) => {
                            tracing::error!(entry_id = %entry.id, error = %e, "Failed to record sync failure");
                        }
                    }
                }
            }
        }

        self.db.set_last_sync_time(Utc::now()).await?;
        Ok(stats)
    }

    /// Record the failure and schedule the retry. Returns `true` when the
    /// record was newly flagged as error.
    async fn handle_failure(&self, entry: &QueueEntry, err: &RemoteError) -> SyncResult<bool> {
        let message = logger_redacted::redact(&err.to_string());
        let next_attempt_at = self
            .policy
            .next_attempt_at(now_millis(), entry.attempts.saturating_add(1));
        let attempts = self
            .queue
            .record_failure(entry.id, &message, next_attempt_at)
            .await?;

        logger_redacted::redacted_warn!(
            "Sync of {} {} failed (attempt {}): {}",
            entry.collection.as_str(),
            entry.record_id,
            attempts,
            err
        );

        let rejected = !err.is_transient();
        if !rejected && !self.policy.exceeds_threshold(attempts) {
            return Ok(false);
        }

        let flagged = self
            .db
            .set_sync_status(entry.collection, entry.record_id, SyncStatus::Error)
            .await?;
        if flagged {
            tracing::warn!(
                entry_id = %entry.id,
                collection = entry.collection.as_str(),
                record_id = %entry.record_id,
                attempts,
                rejected,
                "Record flagged as sync error"
            );
        }
        Ok(flagged)
    }

    /// Background loop: periodic drains, local-write wakeups, and debounced
    /// drains on online transitions. Returns when `shutdown` becomes `true`.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut events = self.connectivity.subscribe();
        let mut ticker = tokio::time::interval(self.settings.drain_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!(
            interval_secs = self.settings.drain_interval.as_secs(),
            "Sync engine started"
        );

        loop {
            let trigger = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => DrainTrigger::Timer,
                _ = self.wake.notified() => DrainTrigger::LocalWrite,
                event = events.recv() => match event {
                    Ok(ConnectivityEvent::Online) => {
                        tokio::time::sleep(self.settings.online_debounce).await;
                        // Collapse a burst of transitions into one drain
                        while events.try_recv().is_ok() {}
                        if !self.connectivity.is_online() {
                            continue;
                        }
                        DrainTrigger::Transition
                    }
                    Ok(ConnectivityEvent::Offline) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "Connectivity events lagged");
                        if !self.connectivity.is_online() {
                            continue;
                        }
                        DrainTrigger::Transition
                    }
                    Err(RecvError::Closed) => break,
                },
            };

            if let Err(e) = self.request_drain(trigger).await {
                logger_redacted::redacted_error!("Drain failed: {}", e);
            }
        }

        tracing::info!("Sync engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Household, Individual, Operation, Record};
    use crate::remote::{AppliedResult, MockRemoteAdapter};
    use std::sync::Mutex;

    async fn engine_with(adapter: MockRemoteAdapter, policy: RetryPolicy) -> SyncEngine {
        let db = LocalDatabase::in_memory().await.unwrap();
        SyncEngine::new(
            db,
            Arc::new(adapter),
            Arc::new(ConnectivityMonitor::new(true)),
            policy,
            EngineSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_drain_applies_in_fifo_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let seen = order.clone();

        let mut adapter = MockRemoteAdapter::new();
        adapter.expect_apply().returning(move |entry| {
            seen.lock().unwrap().push(entry.collection);
            Ok(AppliedResult::default())
        });
        let engine = engine_with(adapter, RetryPolicy::immediate()).await;

        let household = Household::new();
        let mut batch = engine.database().batch();
        batch.put_queued(&household, Operation::Insert).unwrap();
        batch
            .put_queued(&Individual::new(household.id()), Operation::Insert)
            .unwrap();
        batch.commit().await.unwrap();

        let outcome = engine.force_sync().await.unwrap();
        assert_eq!(
            outcome,
            DrainOutcome::Completed(SyncStats {
                applied: 2,
                ..Default::default()
            })
        );
        assert_eq!(
            *order.lock().unwrap(),
            vec![Collection::Households, Collection::Individuals]
        );
        assert_eq!(engine.pending_count().await.unwrap(), 0);
        assert_eq!(engine.synced_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_offline_requests_are_skipped_but_manual_runs() {
        let mut adapter = MockRemoteAdapter::new();
        adapter
            .expect_apply()
            .returning(|_| Ok(AppliedResult::default()));
        let engine = engine_with(adapter, RetryPolicy::immediate()).await;
        engine.connectivity().set_online(false);

        assert_eq!(
            engine.request_drain(DrainTrigger::Timer).await.unwrap(),
            DrainOutcome::Offline
        );
        assert!(engine.last_sync_time().await.unwrap().is_none());

        assert!(matches!(
            engine.force_sync().await.unwrap(),
            DrainOutcome::Completed(_)
        ));
        assert!(engine.last_sync_time().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_request_while_draining_is_noop() {
        let engine = engine_with(MockRemoteAdapter::new(), RetryPolicy::immediate()).await;

        let _guard = DrainGuard::acquire(&engine.draining).unwrap();
        assert!(engine.is_draining());
        assert_eq!(
            engine.force_sync().await.unwrap(),
            DrainOutcome::AlreadyDraining
        );
    }

    #[tokio::test]
    async fn test_failed_child_delete_holds_back_household_delete() {
        let mut adapter = MockRemoteAdapter::new();
        adapter.expect_apply().times(1).returning(|entry| {
            assert_eq!(entry.collection, Collection::Individuals);
            Err(RemoteError::Transient("connection reset".to_string()))
        });
        let engine = engine_with(adapter, RetryPolicy::immediate()).await;

        let household = Household::new();
        let individual = Individual::new(household.id());
        let mut batch = engine.database().batch();
        batch.delete_queued(&individual).unwrap();
        batch.delete_queued(&household).unwrap();
        batch.commit().await.unwrap();

        let outcome = engine.force_sync().await.unwrap();
        assert_eq!(
            outcome,
            DrainOutcome::Completed(SyncStats {
                failed: 1,
                deferred: 1,
                ..Default::default()
            })
        );
        assert_eq!(engine.pending_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_rejected_entry_flags_record_and_stays_queued() {
        let mut adapter = MockRemoteAdapter::new();
        adapter.expect_apply().returning(|_| {
            Err(RemoteError::Rejected {
                status: 400,
                message: "bad phone +675 7123 4567".to_string(),
            })
        });
        let engine = engine_with(adapter, RetryPolicy::default()).await;

        let household = Household::new();
        let entry = engine
            .database()
            .put_and_enqueue(&household, Operation::Insert)
            .await
            .unwrap();

        let outcome = engine.force_sync().await.unwrap();
        assert_eq!(
            outcome,
            DrainOutcome::Completed(SyncStats {
                failed: 1,
                flagged: 1,
                ..Default::default()
            })
        );

        let stored = engine.queue().get(entry.id).await.unwrap().unwrap();
        assert_eq!(stored.attempts, 1);
        assert!(stored.next_attempt_at > 0);
        let message = stored.error_message.unwrap();
        assert!(!message.contains("7123"), "phone leaked: {message}");

        let record: Household = engine.database().get(household.id()).await.unwrap().unwrap();
        assert_eq!(record.envelope.sync_status, SyncStatus::Error);
        assert_eq!(engine.error_count().await.unwrap(), 1);

        // Still backing off, so the next pass defers it
        let outcome = engine.force_sync().await.unwrap();
        assert_eq!(
            outcome,
            DrainOutcome::Completed(SyncStats {
                deferred: 1,
                ..Default::default()
            })
        );
    }

    #[tokio::test]
    async fn test_transient_failures_flag_after_threshold() {
        let mut adapter = MockRemoteAdapter::new();
        adapter
            .expect_apply()
            .returning(|_| Err(RemoteError::Transient("timeout".to_string())));
        let policy = RetryPolicy {
            error_threshold: 2,
            ..RetryPolicy::immediate()
        };
        let engine = engine_with(adapter, policy).await;

        let household = Household::new();
        engine
            .database()
            .put_and_enqueue(&household, Operation::Insert)
            .await
            .unwrap();

        engine.force_sync().await.unwrap();
        let record: Household = engine.database().get(household.id()).await.unwrap().unwrap();
        assert_eq!(record.envelope.sync_status, SyncStatus::Pending);

        engine.force_sync().await.unwrap();
        let record: Household = engine.database().get(household.id()).await.unwrap().unwrap();
        assert_eq!(record.envelope.sync_status, SyncStatus::Error);
        assert_eq!(engine.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_household_defers_its_children() {
        let mut adapter = MockRemoteAdapter::new();
        adapter
            .expect_apply()
            .withf(|entry| entry.collection == Collection::Households)
            .times(1)
            .returning(|_| Err(RemoteError::Transient("reset".to_string())));
        adapter
            .expect_apply()
            .withf(|entry| entry.collection == Collection::Individuals)
            .times(0);
        let engine = engine_with(adapter, RetryPolicy::immediate()).await;

        let household = Household::new();
        let mut batch = engine.database().batch();
        batch.put_queued(&household, Operation::Insert).unwrap();
        batch
            .put_queued(&Individual::new(household.id()), Operation::Insert)
            .unwrap();
        batch.commit().await.unwrap();

        let outcome = engine.force_sync().await.unwrap();
        assert_eq!(
            outcome,
            DrainOutcome::Completed(SyncStats {
                failed: 1,
                deferred: 1,
                ..Default::default()
            })
        );
    }

    #[tokio::test]
    async fn test_run_loop_drains_on_local_write_and_stops() {
        let mut adapter = MockRemoteAdapter::new();
        adapter
            .expect_apply()
            .returning(|_| Ok(AppliedResult::default()));
        let db = LocalDatabase::in_memory().await.unwrap();
        let engine = Arc::new(SyncEngine::new(
            db,
            Arc::new(adapter),
            Arc::new(ConnectivityMonitor::new(true)),
            RetryPolicy::immediate(),
            EngineSettings {
                drain_interval: Duration::from_secs(3600),
                online_debounce: Duration::from_millis(10),
            },
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(engine.clone().run(shutdown_rx));

        engine
            .database()
            .put_and_enqueue(&Household::new(), Operation::Insert)
            .await
            .unwrap();
        engine.notify_local_write();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while engine.pending_count().await.unwrap() > 0 {
            assert!(tokio::time::Instant::now() < deadline, "queue never drained");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
