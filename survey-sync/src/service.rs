//! Survey recording operations used by the application layer
//!
//! Every write stages the record and its queue entry in one transaction,
//! then nudges the engine when the device is online.

use crate::engine::SyncEngine;
use crate::error::{SyncError, SyncResult};
use crate::local_db::{LocalDatabase, Query};
use crate::models::{
    Collection, Household, IndexValue, Individual, Operation, Photo, Profile, Record, SyncStatus,
};
use chrono::{Local, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Counts shown on the enumerator dashboard
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DashboardStats {
    pub households_today: i64,
    pub household_count: i64,
    pub individual_count: i64,
    pub pending: i64,
    pub synced: i64,
    pub errors: i64,
}

/// Local storage footprint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StorageInfo {
    pub households: i64,
    pub individuals: i64,
    pub photos: i64,
    pub pending: i64,
}

pub struct SurveyService {
    db: LocalDatabase,
    engine: Arc<SyncEngine>,
}

impl SurveyService {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self {
            db: engine.database().clone(),
            engine,
        }
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    async fn operation_for<R: Record>(&self, id: Uuid) -> SyncResult<Operation> {
        Ok(if self.db.get::<R>(id).await?.is_some() {
            Operation::Update
        } else {
            Operation::Insert
        })
    }

    fn after_write(&self) {
        if self.engine.is_connected() {
            self.engine.notify_local_write();
        }
    }

    /// Save a household with its members and photos as one unit. The
    /// household is queued first so it reaches the remote store before
    /// anything that references it.
    pub async fn save_household(
        &self,
        mut household: Household,
        mut individuals: Vec<Individual>,
        mut photos: Vec<Photo>,
    ) -> SyncResult<Household> {
        let household_id = household.id();
        let now = Utc::now();
        household.updated_at = now;
        household.touch();

        let mut operations = Vec::with_capacity(individuals.len() + photos.len());
        for individual in &mut individuals {
            individual.household_id = household_id;
            individual.updated_at = now;
            individual.touch();
            operations.push(self.operation_for::<Individual>(individual.id()).await?);
        }
        for photo in &mut photos {
            photo.household_id = household_id;
            photo.touch();
            operations.push(self.operation_for::<Photo>(photo.id()).await?);
        }
        let household_op = self.operation_for::<Household>(household_id).await?;

        let mut batch = self.db.batch();
        batch.put_queued(&household, household_op)?;
        let mut child_ops = operations.into_iter();
        for individual in &individuals {
            let op = child_ops.next().unwrap_or(Operation::Insert);
            batch.put_queued(individual, op)?;
        }
        for photo in &photos {
            let op = child_ops.next().unwrap_or(Operation::Insert);
            batch.put_queued(photo, op)?;
        }
        let entries = batch.commit().await?;

        tracing::info!(
            household_id = %household_id,
            individuals = individuals.len(),
            photos = photos.len(),
            queued = entries.len(),
            "Household saved"
        );

        self.after_write();
        Ok(household)
    }

    pub async fn update_household(&self, household: Household) -> SyncResult<Household> {
        if self.db.get::<Household>(household.id()).await?.is_none() {
            return Err(SyncError::NotFound(format!("household {}", household.id())));
        }
        self.save_household(household, Vec::new(), Vec::new()).await
    }

    async fn ensure_household(&self, household_id: Uuid) -> SyncResult<()> {
        match self.db.get::<Household>(household_id).await? {
            Some(_) => Ok(()),
            None => Err(SyncError::NotFound(format!("household {}", household_id))),
        }
    }

    pub async fn save_individual(&self, mut individual: Individual) -> SyncResult<Individual> {
        self.ensure_household(individual.household_id).await?;
        individual.updated_at = Utc::now();
        individual.touch();

        let op = self.operation_for::<Individual>(individual.id()).await?;
        self.db.put_and_enqueue(&individual, op).await?;
        self.after_write();
        Ok(individual)
    }

    pub async fn save_photo(&self, mut photo: Photo) -> SyncResult<Photo> {
        self.ensure_household(photo.household_id).await?;
        photo.touch();

        let op = self.operation_for::<Photo>(photo.id()).await?;
        self.db.put_and_enqueue(&photo, op).await?;
        self.after_write();
        Ok(photo)
    }

    /// Delete a household and everything it owns. Children are queued for
    /// remote deletion before the household. Returns `false` if it did not exist.
    pub async fn delete_household(&self, household_id: Uuid) -> SyncResult<bool> {
        let Some(household) = self.db.get::<Household>(household_id).await? else {
            return Ok(false);
        };
        let owner = Query::Equals("household_id", IndexValue::uuid(household_id));
        let individuals: Vec<Individual> = self.db.query(&owner).await?;
        let photos: Vec<Photo> = self.db.query(&owner).await?;

        let mut batch = self.db.batch();
        for individual in &individuals {
            batch.delete_queued(individual)?;
        }
        for photo in &photos {
            batch.delete_queued(photo)?;
        }
        batch.delete_queued(&household)?;
        batch.commit().await?;

        tracing::info!(
            household_id = %household_id,
            individuals = individuals.len(),
            photos = photos.len(),
            "Household deleted"
        );

        self.after_write();
        Ok(true)
    }

    pub async fn save_profile(&self, mut profile: Profile) -> SyncResult<Profile> {
        profile.touch();
        let op = self.operation_for::<Profile>(profile.id()).await?;
        self.db.put_and_enqueue(&profile, op).await?;
        self.after_write();
        Ok(profile)
    }

    pub async fn update_profile(
        &self,
        id: Uuid,
        full_name: Option<String>,
        phone: Option<String>,
    ) -> SyncResult<Profile> {
        let mut profile = self
            .db
            .get::<Profile>(id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("profile {}", id)))?;

        profile.full_name = full_name;
        profile.phone = phone;
        profile.touch();

        self.db.put_and_enqueue(&profile, Operation::Update).await?;
        self.after_write();
        Ok(profile)
    }

    pub async fn load_profile(&self, id: Uuid) -> SyncResult<Option<Profile>> {
        self.db.get(id).await
    }

    /// Newest first
    pub async fn list_households(&self) -> SyncResult<Vec<Household>> {
        let mut households: Vec<Household> = self.db.query(&Query::All).await?;
        households.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(households)
    }

    pub async fn household_individuals(&self, household_id: Uuid) -> SyncResult<Vec<Individual>> {
        self.db
            .query(&Query::Equals("household_id", IndexValue::uuid(household_id)))
            .await
    }

    pub async fn household_photos(&self, household_id: Uuid) -> SyncResult<Vec<Photo>> {
        self.db
            .query(&Query::Equals("household_id", IndexValue::uuid(household_id)))
            .await
    }

    /// Households modified since local midnight
    pub async fn households_today(&self) -> SyncResult<i64> {
        let midnight = Local::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .and_then(|start| start.and_local_timezone(Local).earliest())
            .map(|start| start.timestamp_millis())
            .unwrap_or(0);

        self.db
            .count(Collection::Households, &Query::ModifiedSince(midnight))
            .await
    }

    pub async fn dashboard_stats(&self) -> SyncResult<DashboardStats> {
        Ok(DashboardStats {
            households_today: self.households_today().await?,
            household_count: self.db.count(Collection::Households, &Query::All).await?,
            individual_count: self.db.count(Collection::Individuals, &Query::All).await?,
            pending: self.engine.pending_count().await?,
            synced: self.engine.synced_count().await?,
            errors: self.engine.error_count().await?,
        })
    }

    pub async fn storage_info(&self) -> SyncResult<StorageInfo> {
        Ok(StorageInfo {
            households: self.db.count(Collection::Households, &Query::All).await?,
            individuals: self.db.count(Collection::Individuals, &Query::All).await?,
            photos: self.db.count(Collection::Photos, &Query::All).await?,
            pending: self.engine.pending_count().await?,
        })
    }

    /// Remove all survey data from the device. Refuses while entries are
    /// still queued unless `force` is set, since those records exist nowhere else.
    pub async fn clear_local_data(&self, force: bool) -> SyncResult<()> {
        let pending = self.engine.pending_count().await?;
        if pending > 0 && !force {
            return Err(SyncError::InvalidOperation(format!(
                "{} entries have not been synced",
                pending
            )));
        }

        if pending > 0 {
            tracing::warn!(pending, "Clearing local data with unsynced entries");
        }
        self.db.clear_survey_data().await
    }

    /// Records the remote store has not confirmed, for the sync status screen
    pub async fn unsynced_households(&self) -> SyncResult<Vec<Household>> {
        let mut households: Vec<Household> =
            self.db.query(&Query::Status(SyncStatus::Pending)).await?;
        households.extend(
            self.db
                .query::<Household>(&Query::Status(SyncStatus::Error))
                .await?,
        );
        Ok(households)
    }
}
