use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore};
use tracing::debug;

use crate::error::{CouncilError, Result};

use super::store::{RecordFilter, RecordPayload, RecordType, Store, StoredRecord};

/// In-process store for dry runs and tests.
///
/// A semaphore plays the part of the connection pool: at most `permits`
/// operations run together and the rest wait up to `acquire_timeout`.
pub struct MemoryStore {
    records: RwLock<Vec<StoredRecord>>,
    permits: Semaphore,
    acquire_timeout: Duration,
    next_id: AtomicI64,
}

impl MemoryStore {
    pub fn new(max_concurrent: usize, acquire_timeout: Duration) -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            permits: Semaphore::new(max_concurrent.max(1)),
            acquire_timeout,
            next_id: AtomicI64::new(1),
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    async fn permit(&self) -> Result<tokio::sync::SemaphorePermit<'_>> {
        match tokio::time::timeout(self.acquire_timeout, self.permits.acquire()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(CouncilError::Internal("store closed".into())),
            Err(_) => Err(CouncilError::Internal(format!(
                "timed out after {:?} waiting for a store permit",
                self.acquire_timeout
            ))),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(30))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn save(&self, record_type: RecordType, payload: RecordPayload) -> Result<i64> {
        let _permit = self.permit().await?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.records.write().await.push(StoredRecord {
            id,
            record_type,
            cycle_id: payload.cycle_id,
            key: payload.key,
            payload: payload.body,
            created_at: Utc::now(),
        });
        debug!(id, record_type = %record_type, "record saved");
        Ok(id)
    }

    async fn load(&self, record_type: RecordType, filter: &RecordFilter) -> Result<Vec<StoredRecord>> {
        let _permit = self.permit().await?;
        let records = self.records.read().await;
        let matching = records
            .iter()
            .rev()
            .filter(|r| r.record_type == record_type)
            .filter(|r| filter.cycle_id.map_or(true, |c| r.cycle_id == c))
            .filter(|r| filter.key.as_ref().map_or(true, |k| r.key.as_ref() == Some(k)))
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(matching)
    }
}
