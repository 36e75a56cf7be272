//! Survey record types and the sync envelope they share
//!
//! Every record stored locally carries a [`SyncEnvelope`]: a stable id
//! generated on the device, a millisecond modification stamp used for
//! last-write-wins ordering, and the record's [`SyncStatus`].

use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

/// Current wall-clock time in milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Remote durability of a local record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Pending,
    Synced,
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
            SyncStatus::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> SyncResult<Self> {
        match s {
            "pending" => Ok(SyncStatus::Pending),
            "synced" => Ok(SyncStatus::Synced),
            "error" => Ok(SyncStatus::Error),
            _ => Err(SyncError::InvalidOperation(format!("Unknown sync status: {}", s))),
        }
    }
}

/// Operation type in sync queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }

    pub fn from_str(s: &str) -> SyncResult<Self> {
        match s {
            "insert" => Ok(Operation::Insert),
            "update" => Ok(Operation::Update),
            "delete" => Ok(Operation::Delete),
            _ => Err(SyncError::InvalidOperation(format!("Unknown operation type: {}", s))),
        }
    }
}

/// Local record collections. The name doubles as the remote table name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Profiles,
    Households,
    Individuals,
    Photos,
}

impl Collection {
    pub const ALL: [Collection; 4] = [
        Collection::Profiles,
        Collection::Households,
        Collection::Individuals,
        Collection::Photos,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Profiles => "profiles",
            Collection::Households => "households",
            Collection::Individuals => "individuals",
            Collection::Photos => "photos",
        }
    }

    pub fn from_str(s: &str) -> SyncResult<Self> {
        match s {
            "profiles" => Ok(Collection::Profiles),
            "households" => Ok(Collection::Households),
            "individuals" => Ok(Collection::Individuals),
            "photos" => Ok(Collection::Photos),
            _ => Err(SyncError::InvalidOperation(format!("Unknown collection: {}", s))),
        }
    }

    /// Secondary index columns beyond `sync_status` and `last_modified`
    pub fn indexed_columns(&self) -> &'static [&'static str] {
        match self {
            Collection::Profiles => &["role"],
            Collection::Households => &["enumerator_id", "ward", "llg", "created_at"],
            Collection::Individuals => &["household_id", "youth_15_35"],
            Collection::Photos => &["household_id"],
        }
    }
}

/// Value stored in a secondary index column
#[derive(Debug, Clone, PartialEq)]
pub enum IndexValue {
    Text(String),
    Integer(i64),
    Bool(bool),
    Null,
}

impl IndexValue {
    pub fn text(value: Option<&str>) -> Self {
        value.map_or(IndexValue::Null, |v| IndexValue::Text(v.to_string()))
    }

    pub fn uuid(value: Uuid) -> Self {
        IndexValue::Text(value.to_string())
    }

    pub fn flag(value: Option<bool>) -> Self {
        value.map_or(IndexValue::Null, IndexValue::Bool)
    }
}

/// Fields shared by every synchronized record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEnvelope {
    /// Generated on the device, never reassigned
    pub id: Uuid,
    /// Milliseconds since the epoch at the last local change
    pub last_modified: i64,
    pub sync_status: SyncStatus,
}

impl SyncEnvelope {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            last_modified: now_millis(),
            sync_status: SyncStatus::Pending,
        }
    }

    pub fn with_id(id: Uuid) -> Self {
        Self {
            id,
            ..Self::new()
        }
    }
}

impl Default for SyncEnvelope {
    fn default() -> Self {
        Self::new()
    }
}

/// A record that can be stored locally and queued for the remote store
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + Unpin + 'static {
    const COLLECTION: Collection;

    fn envelope(&self) -> &SyncEnvelope;

    fn envelope_mut(&mut self) -> &mut SyncEnvelope;

    /// Values for [`Collection::indexed_columns`], in any order
    fn index_values(&self) -> Vec<(&'static str, IndexValue)>;

    fn id(&self) -> Uuid {
        self.envelope().id
    }

    /// Mark a local change: bump `last_modified` and reset status to pending
    fn touch(&mut self) {
        let envelope = self.envelope_mut();
        envelope.last_modified = now_millis().max(envelope.last_modified);
        envelope.sync_status = SyncStatus::Pending;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    #[default]
    Enumerator,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Enumerator => "enumerator",
        }
    }
}

/// One per authenticated user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(flatten)]
    pub envelope: SyncEnvelope,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    #[serde(default)]
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl Profile {
    /// Profiles share the id of the authenticated user
    pub fn for_user(user_id: Uuid) -> Self {
        Self {
            envelope: SyncEnvelope::with_id(user_id),
            created_at: Utc::now(),
            ..Default::default()
        }
    }
}

impl Record for Profile {
    const COLLECTION: Collection = Collection::Profiles;

    fn envelope(&self) -> &SyncEnvelope {
        &self.envelope
    }

    fn envelope_mut(&mut self) -> &mut SyncEnvelope {
        &mut self.envelope
    }

    fn index_values(&self) -> Vec<(&'static str, IndexValue)> {
        vec![("role", IndexValue::Text(self.role.as_str().to_string()))]
    }
}

/// Root survey unit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Household {
    #[serde(flatten)]
    pub envelope: SyncEnvelope,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    // Location
    pub province: Option<String>,
    pub district: Option<String>,
    pub llg: Option<String>,
    pub ward: Option<String>,
    pub hamlet: Option<String>,
    pub gps_lat: Option<f64>,
    pub gps_lng: Option<f64>,
    pub gps_accuracy: Option<f64>,

    // Household head
    pub tenure: Option<String>,
    pub head_name: Option<String>,
    pub head_phone: Option<String>,

    // WASH
    pub water_source: Option<String>,
    pub sanitation: Option<String>,
    pub handwashing_soap: Option<bool>,

    // Energy and ICT
    pub energy_lighting: Option<String>,
    pub energy_cooking: Option<String>,
    pub mobile_coverage: Option<String>,
    pub internet_access: Option<String>,

    // Travel time to services, in minutes
    pub services_health_mins: Option<u32>,
    pub services_school_mins: Option<u32>,
    pub services_police_mins: Option<u32>,
    pub services_market_mins: Option<u32>,
    pub road_condition: Option<String>,

    pub consent: Option<bool>,
    pub enumerator_id: Option<Uuid>,
    pub sync_source: Option<String>,
    pub synced_at: Option<DateTime<Utc>>,
}

impl Household {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            updated_at: now,
            ..Default::default()
        }
    }
}

impl Record for Household {
    const COLLECTION: Collection = Collection::Households;

    fn envelope(&self) -> &SyncEnvelope {
        &self.envelope
    }

    fn envelope_mut(&mut self) -> &mut SyncEnvelope {
        &mut self.envelope
    }

    fn index_values(&self) -> Vec<(&'static str, IndexValue)> {
        vec![
            (
                "enumerator_id",
                self.enumerator_id.map_or(IndexValue::Null, IndexValue::uuid),
            ),
            ("ward", IndexValue::text(self.ward.as_deref())),
            ("llg", IndexValue::text(self.llg.as_deref())),
            (
                "created_at",
                IndexValue::Text(self.created_at.to_rfc3339_opts(SecondsFormat::Millis, true)),
            ),
        ]
    }
}

/// A household member
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Individual {
    #[serde(flatten)]
    pub envelope: SyncEnvelope,
    pub household_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    pub name_or_initials: Option<String>,
    pub sex: Option<String>,
    pub dob: Option<String>,
    pub age_years: Option<u32>,
    pub relationship: Option<String>,
    pub marital_status: Option<String>,
    pub in_school: Option<bool>,
    pub grade_current: Option<String>,
    pub highest_level: Option<String>,
    pub livelihood: Option<String>,

    // Washington Group short set
    pub disability_seeing: Option<String>,
    pub disability_hearing: Option<String>,
    pub disability_walking: Option<String>,
    pub disability_remembering: Option<String>,
    pub disability_selfcare: Option<String>,
    pub disability_communication: Option<String>,

    pub youth_15_35: Option<bool>,
    pub skills: Option<Vec<String>>,
    pub availability: Option<String>,
    pub training_need: Option<String>,
}

impl Individual {
    pub fn new(household_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            household_id,
            created_at: now,
            updated_at: now,
            ..Default::default()
        }
    }
}

impl Record for Individual {
    const COLLECTION: Collection = Collection::Individuals;

    fn envelope(&self) -> &SyncEnvelope {
        &self.envelope
    }

    fn envelope_mut(&mut self) -> &mut SyncEnvelope {
        &mut self.envelope
    }

    fn index_values(&self) -> Vec<(&'static str, IndexValue)> {
        vec![
            ("household_id", IndexValue::uuid(self.household_id)),
            ("youth_15_35", IndexValue::flag(self.youth_15_35)),
        ]
    }
}

/// A photo of a household. Holds the image bytes until the upload succeeds,
/// after which only `url` remains.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Photo {
    #[serde(flatten)]
    pub envelope: SyncEnvelope,
    pub household_id: Uuid,
    #[serde(default)]
    pub url: String,
    pub caption: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "blob_base64"
    )]
    pub blob_data: Option<Vec<u8>>,
}

impl Photo {
    pub fn new(household_id: Uuid, blob: Vec<u8>) -> Self {
        Self {
            household_id,
            created_at: Utc::now(),
            blob_data: Some(blob),
            ..Default::default()
        }
    }

    /// Object path under the photo bucket
    pub fn storage_path(household_id: Uuid, photo_id: Uuid) -> String {
        format!("{}/{}.jpg", household_id, photo_id)
    }
}

impl Record for Photo {
    const COLLECTION: Collection = Collection::Photos;

    fn envelope(&self) -> &SyncEnvelope {
        &self.envelope
    }

    fn envelope_mut(&mut self) -> &mut SyncEnvelope {
        &mut self.envelope
    }

    fn index_values(&self) -> Vec<(&'static str, IndexValue)> {
        vec![("household_id", IndexValue::uuid(self.household_id))]
    }
}

// Serialize photo bytes as standard base64 so they survive JSON payloads
mod blob_base64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(blob: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match blob {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|e| STANDARD.decode(e).map_err(serde::de::Error::custom))
            .transpose()
    }
}
