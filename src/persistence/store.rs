use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::error;
use uuid::Uuid;

use crate::error::{CouncilError, Result};

/// Kinds of record the council writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    /// Indicators frozen at the start of a weekly cycle
    Indicators,
    Pitch,
    /// Pitch regenerated after the weekly cycle; never read by checkpoints
    RegeneratedPitch,
    PitchReport,
    Review,
    /// Private label -> author mapping
    LabelMap,
    Decision,
    CheckpointEvent,
    ExecutionReport,
    StageReport,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::Indicators => "indicators",
            RecordType::Pitch => "pitch",
            RecordType::RegeneratedPitch => "regenerated_pitch",
            RecordType::PitchReport => "pitch_report",
            RecordType::Review => "review",
            RecordType::LabelMap => "label_map",
            RecordType::Decision => "decision",
            RecordType::CheckpointEvent => "checkpoint_event",
            RecordType::ExecutionReport => "execution_report",
            RecordType::StageReport => "stage_report",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload handed to `Store::save`
#[derive(Debug, Clone, PartialEq)]
pub struct RecordPayload {
    pub cycle_id: Uuid,
    /// Secondary key, e.g. model id or account id
    pub key: Option<String>,
    pub body: serde_json::Value,
}

impl RecordPayload {
    pub fn new<T: Serialize>(cycle_id: Uuid, key: Option<&str>, value: &T) -> Result<Self> {
        Ok(Self {
            cycle_id,
            key: key.map(str::to_string),
            body: serde_json::to_value(value)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: i64,
    pub record_type: RecordType,
    pub cycle_id: Uuid,
    pub key: Option<String>,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl StoredRecord {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone()).map_err(CouncilError::from)
    }
}

/// Load filter. Results always come back newest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    pub cycle_id: Option<Uuid>,
    pub key: Option<String>,
    pub limit: Option<usize>,
}

impl RecordFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn cycle(cycle_id: Uuid) -> Self {
        Self {
            cycle_id: Some(cycle_id),
            ..Self::default()
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn latest() -> Self {
        Self {
            limit: Some(1),
            ..Self::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Durable record store shared by every concurrent operation.
///
/// Implementations bound how many operations run at once and queue the rest.
#[async_trait]
pub trait Store: Send + Sync {
    async fn save(&self, record_type: RecordType, payload: RecordPayload) -> Result<i64>;

    async fn load(&self, record_type: RecordType, filter: &RecordFilter) -> Result<Vec<StoredRecord>>;
}

/// Serialize and save in one step
pub async fn save_value<T: Serialize + Sync>(
    store: &dyn Store,
    record_type: RecordType,
    cycle_id: Uuid,
    key: Option<&str>,
    value: &T,
) -> Result<i64> {
    store
        .save(record_type, RecordPayload::new(cycle_id, key, value)?)
        .await
}

/// Save, logging a failure instead of returning it.
///
/// Used after side effects have already happened, where the caller must
/// still get its result back.
pub async fn save_or_log<T: Serialize + Sync>(
    store: &dyn Store,
    record_type: RecordType,
    cycle_id: Uuid,
    key: Option<&str>,
    value: &T,
) -> bool {
    match save_value(store, record_type, cycle_id, key, value).await {
        Ok(_) => true,
        Err(e) => {
            error!(%cycle_id, record_type = %record_type, key, error = %e, "failed to persist record");
            false
        }
    }
}

/// Newest record of a type matching `filter`, decoded
pub async fn load_latest<T: DeserializeOwned>(
    store: &dyn Store,
    record_type: RecordType,
    filter: RecordFilter,
) -> Result<Option<T>> {
    let records = store.load(record_type, &filter.with_limit(1)).await?;
    records.first().map(StoredRecord::decode).transpose()
}

/// All records of a type matching `filter`, decoded, newest first
pub async fn load_all<T: DeserializeOwned>(
    store: &dyn Store,
    record_type: RecordType,
    filter: &RecordFilter,
) -> Result<Vec<T>> {
    store
        .load(record_type, filter)
        .await?
        .iter()
        .map(StoredRecord::decode)
        .collect()
}
