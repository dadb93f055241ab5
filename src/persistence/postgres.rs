//! PostgreSQL record store
//!
//! Records are stored as JSONB in a single `council_records` table. The pool's
//! `max_connections` bounds concurrent storage operations; callers beyond that
//! wait up to `acquire_timeout` for a connection.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::error::{CouncilError, Result};

use super::store::{RecordFilter, RecordPayload, RecordType, Store, StoredRecord};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect with the configured pool bounds
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.url)
            .await?;

        info!(max_connections = config.max_connections, "Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a store from an existing connection pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| CouncilError::Database(e.into()))?;
        info!("Database migrations completed");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn parse_record_type(raw: &str) -> Result<RecordType> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .map_err(|_| CouncilError::Internal(format!("unknown record type in store: {}", raw)))
}

#[async_trait]
impl Store for PgStore {
    async fn save(&self, record_type: RecordType, payload: RecordPayload) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO council_records (record_type, cycle_id, record_key, payload)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(record_type.as_str())
        .bind(payload.cycle_id)
        .bind(&payload.key)
        .bind(&payload.body)
        .fetch_one(&self.pool)
        .await?;

        let id: i64 = row.get("id");
        debug!(id, record_type = %record_type, cycle_id = %payload.cycle_id, "record saved");
        Ok(id)
    }

    async fn load(&self, record_type: RecordType, filter: &RecordFilter) -> Result<Vec<StoredRecord>> {
        let limit = filter.limit.map(|l| l as i64).unwrap_or(i64::MAX);

        let rows = sqlx::query(
            r#"
            SELECT id, record_type, cycle_id, record_key, payload, created_at
            FROM council_records
            WHERE record_type = $1
              AND ($2::uuid IS NULL OR cycle_id = $2)
              AND ($3::text IS NULL OR record_key = $3)
            ORDER BY created_at DESC, id DESC
            LIMIT $4
            "#,
        )
        .bind(record_type.as_str())
        .bind(filter.cycle_id)
        .bind(&filter.key)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let raw_type: String = row.get("record_type");
                Ok(StoredRecord {
                    id: row.get("id"),
                    record_type: parse_record_type(&raw_type)?,
                    cycle_id: row.get::<Uuid, _>("cycle_id"),
                    key: row.get("record_key"),
                    payload: row.get("payload"),
                    created_at: row.get::<DateTime<Utc>, _>("created_at"),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_type_names_round_trip() {
        for record_type in [
            RecordType::Indicators,
            RecordType::RegeneratedPitch,
            RecordType::LabelMap,
            RecordType::CheckpointEvent,
            RecordType::ExecutionReport,
        ] {
            assert_eq!(parse_record_type(record_type.as_str()).unwrap(), record_type);
        }
        assert!(parse_record_type("nonsense").is_err());
    }
}
