//! Read-only exports: full JSON backup and a flat household table
//!
//! Neither export touches sync state.

use crate::error::SyncResult;
use crate::local_db::{LocalDatabase, Query};
use crate::models::{Collection, Household, Individual, Photo, Profile, SyncStatus};
use crate::queue::QueueEntry;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;

/// Full dump of every local collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backup {
    pub exported_at: DateTime<Utc>,
    pub app_version: String,
    pub profiles: Vec<Profile>,
    pub households: Vec<Household>,
    pub individuals: Vec<Individual>,
    pub photos: Vec<Photo>,
    pub sync_queue: Vec<QueueEntry>,
}

impl Backup {
    pub async fn collect(db: &LocalDatabase) -> SyncResult<Self> {
        let backup = Self {
            exported_at: Utc::now(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            profiles: db.query(&Query::All).await?,
            households: db.query(&Query::All).await?,
            individuals: db.query(&Query::All).await?,
            photos: db.query(&Query::All).await?,
            sync_queue: db.queue().list_pending().await?,
        };

        tracing::info!(
            households = backup.households.len(),
            individuals = backup.individuals.len(),
            photos = backup.photos.len(),
            queued = backup.sync_queue.len(),
            "Backup collected"
        );
        Ok(backup)
    }

    pub fn to_json_pretty(&self) -> SyncResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

pub fn backup_file_name(date: NaiveDate) -> String {
    format!("bogia_survey_backup_{}.json", date.format("%Y-%m-%d"))
}

pub fn table_file_name(date: NaiveDate) -> String {
    format!("households_{}.csv", date.format("%Y-%m-%d"))
}

/// Which households to include in the table export
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HouseholdFilter {
    pub ward: Option<String>,
    pub llg: Option<String>,
    pub status: Option<SyncStatus>,
}

impl HouseholdFilter {
    fn matches(&self, household: &Household) -> bool {
        self.ward
            .as_ref()
            .map_or(true, |ward| household.ward.as_ref() == Some(ward))
            && self
                .llg
                .as_ref()
                .map_or(true, |llg| household.llg.as_ref() == Some(llg))
            && self
                .status
                .map_or(true, |status| household.envelope.sync_status == status)
    }
}

/// One line of the household table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HouseholdRow {
    pub id: String,
    pub created_at: String,
    pub province: Option<String>,
    pub district: Option<String>,
    pub llg: Option<String>,
    pub ward: Option<String>,
    pub hamlet: Option<String>,
    pub head_name: Option<String>,
    pub head_phone: Option<String>,
    pub gps_lat: Option<f64>,
    pub gps_lng: Option<f64>,
    pub individuals_count: i64,
    pub sync_status: SyncStatus,
}

const HEADER: [&str; 13] = [
    "id",
    "created_at",
    "province",
    "district",
    "llg",
    "ward",
    "hamlet",
    "head_name",
    "head_phone",
    "gps_lat",
    "gps_lng",
    "individuals_count",
    "sync_status",
];

impl HouseholdRow {
    fn fields(&self) -> [String; 13] {
        let text = |value: &Option<String>| value.clone().unwrap_or_default();
        let number = |value: Option<f64>| value.map(|v| v.to_string()).unwrap_or_default();
        [
            self.id.clone(),
            self.created_at.clone(),
            text(&self.province),
            text(&self.district),
            text(&self.llg),
            text(&self.ward),
            text(&self.hamlet),
            text(&self.head_name),
            text(&self.head_phone),
            number(self.gps_lat),
            number(self.gps_lng),
            self.individuals_count.to_string(),
            self.sync_status.as_str().to_string(),
        ]
    }
}

/// Households (newest first) with their member counts
pub async fn household_rows(
    db: &LocalDatabase,
    filter: &HouseholdFilter,
) -> SyncResult<Vec<HouseholdRow>> {
    let counts: HashMap<String, i64> = db
        .group_counts(Collection::Individuals, "household_id")
        .await?
        .into_iter()
        .filter_map(|(key, count)| key.map(|k| (k, count)))
        .collect();

    let mut households: Vec<Household> = db.query(&Query::All).await?;
    households.retain(|h| filter.matches(h));
    households.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    Ok(households
        .into_iter()
        .map(|h| {
            let id = h.envelope.id.to_string();
            HouseholdRow {
                individuals_count: counts.get(&id).copied().unwrap_or(0),
                id,
                created_at: h.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
                province: h.province,
                district: h.district,
                llg: h.llg,
                ward: h.ward,
                hamlet: h.hamlet,
                head_name: h.head_name,
                head_phone: h.head_phone,
                gps_lat: h.gps_lat,
                gps_lng: h.gps_lng,
                sync_status: h.envelope.sync_status,
            }
        })
        .collect())
}

fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Write rows as RFC 4180 CSV with a header line
pub fn write_csv<W: Write>(rows: &[HouseholdRow], mut out: W) -> std::io::Result<()> {
    writeln!(out, "{}", HEADER.join(","))?;
    for row in rows {
        let line: Vec<String> = row.fields().iter().map(|f| escape_field(f)).collect();
        writeln!(out, "{}", line.join(","))?;
    }
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Operation, Record};

    #[test]
    fn test_file_names() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 9).unwrap();
        assert_eq!(backup_file_name(date), "bogia_survey_backup_2026-03-09.json");
        assert_eq!(table_file_name(date), "households_2026-03-09.csv");
    }

    #[test]
    fn test_csv_escaping() {
        let row = HouseholdRow {
            id: "h1".to_string(),
            created_at: "2026-03-09T00:00:00Z".to_string(),
            province: Some("Madang".to_string()),
            district: None,
            llg: None,
            ward: Some("Ward 1, Bogia".to_string()),
            hamlet: Some("Say \"hi\"".to_string()),
            head_name: None,
            head_phone: None,
            gps_lat: Some(-4.25),
            gps_lng: None,
            individuals_count: 3,
            sync_status: SyncStatus::Pending,
        };

        let mut out = Vec::new();
        write_csv(&[row], &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();

        assert_eq!(lines.next().unwrap(), HEADER.join(","));
        assert_eq!(
            lines.next().unwrap(),
            "h1,2026-03-09T00:00:00Z,Madang,,,\"Ward 1, Bogia\",\"Say \"\"hi\"\"\",,,-4.25,,3,pending"
        );
    }

    #[tokio::test]
    async fn test_rows_and_backup_leave_queue_untouched() {
        let db = LocalDatabase::in_memory().await.unwrap();

        let mut household = Household::new();
        household.ward = Some("Ward 2".to_string());
        let other = Household::new();
        let mut batch = db.batch();
        batch.put_queued(&household, Operation::Insert).unwrap();
        batch.put_queued(&other, Operation::Insert).unwrap();
        batch
            .put_queued(&Individual::new(household.id()), Operation::Insert)
            .unwrap();
        batch
            .put_queued(&Individual::new(household.id()), Operation::Insert)
            .unwrap();
        batch.commit().await.unwrap();

        let filter = HouseholdFilter {
            ward: Some("Ward 2".to_string()),
            ..Default::default()
        };
        let rows = household_rows(&db, &filter).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows.first().unwrap().individuals_count, 2);

        let all = household_rows(&db, &HouseholdFilter::default()).await.unwrap();
        let other_row = all.iter().find(|r| r.id == other.id().to_string()).unwrap();
        assert_eq!(other_row.individuals_count, 0);

        let backup = Backup::collect(&db).await.unwrap();
        assert_eq!(backup.households.len(), 2);
        assert_eq!(backup.individuals.len(), 2);
        assert_eq!(backup.sync_queue.len(), 4);
        assert!(!backup.app_version.is_empty());

        let json = backup.to_json_pretty().unwrap();
        let parsed: Backup = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.households, backup.households);

        assert_eq!(db.queue().len().await.unwrap(), 4);
    }
}
