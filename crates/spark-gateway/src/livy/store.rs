//! The persistent batch id to gateway id mapping.
//!
//! This is the only state the gateway persists. Batch ids are assigned by
//! the database on insert (an identity column), which makes them monotonic
//! without any gateway-side locking.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use snafu::{ResultExt, Snafu};
use sqlx::{
    FromRow, PgPool,
    postgres::{PgConnectOptions, PgPoolOptions},
};
use uuid::Uuid;

use crate::config::DatabaseConfig;

const MAX_CONNECTIONS: u32 = 10;

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum StoreError {
    #[snafu(display("failed to connect to the batch database"))]
    Connect { source: sqlx::Error },

    #[snafu(display("failed to run batch database migrations"))]
    Migrate { source: sqlx::migrate::MigrateError },

    #[snafu(display("batch database query failed"))]
    Query { source: sqlx::Error },
}

/// A persisted batch row. `name` holds the gateway id.
#[derive(Clone, Debug, FromRow)]
pub struct BatchRecord {
    pub uid: Uuid,
    pub batch_id: i64,
    pub name: String,
    pub creation_time: DateTime<Utc>,
    pub termination_time: Option<DateTime<Utc>>,
    pub username: String,
    pub namespace: String,
    pub cluster: String,
    pub submitted: Option<serde_json::Value>,
    pub updated: Option<serde_json::Value>,
    pub state: String,
    pub status: Option<serde_json::Value>,
}

/// A batch row to insert. The batch id and creation time are assigned by the
/// store.
#[derive(Clone, Debug)]
pub struct NewBatch {
    pub uid: Uuid,
    pub name: String,
    pub username: String,
    pub namespace: String,
    pub cluster: String,
    pub submitted: serde_json::Value,
    pub state: String,
}

/// Persistence seam of the numeric-id surface. The production implementation
/// is [`PostgresBatchStore`]; tests substitute in-memory doubles.
#[async_trait]
pub trait BatchStore: Send + Sync {
    /// Inserts a new batch and returns the store-assigned batch id.
    async fn insert(&self, batch: NewBatch) -> Result<i64>;

    async fn get(&self, batch_id: i64) -> Result<Option<BatchRecord>>;

    /// Returns up to `size` rows with `batch_id >= from`, ascending.
    async fn list_from(&self, from: i64, size: i64) -> Result<Vec<BatchRecord>>;

    async fn delete(&self, batch_id: i64) -> Result<()>;
}

/// Postgres-backed batch store.
#[derive(Clone, Debug)]
pub struct PostgresBatchStore {
    pool: PgPool,
}

impl PostgresBatchStore {
    /// Connects to the configured database and applies pending migrations.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let options = PgConnectOptions::new()
            .host(&config.hostname)
            .port(config.port)
            .database(&config.database_name)
            .username(&config.username)
            .password(&config.password());

        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .context(ConnectSnafu)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context(MigrateSnafu)?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl BatchStore for PostgresBatchStore {
    async fn insert(&self, batch: NewBatch) -> Result<i64> {
        let (batch_id,): (i64,) = sqlx::query_as(
            "INSERT INTO batches (uid, name, username, namespace, cluster, submitted, state) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING batch_id",
        )
        .bind(batch.uid)
        .bind(&batch.name)
        .bind(&batch.username)
        .bind(&batch.namespace)
        .bind(&batch.cluster)
        .bind(&batch.submitted)
        .bind(&batch.state)
        .fetch_one(&self.pool)
        .await
        .context(QuerySnafu)?;

        Ok(batch_id)
    }

    async fn get(&self, batch_id: i64) -> Result<Option<BatchRecord>> {
        sqlx::query_as("SELECT * FROM batches WHERE batch_id = $1")
            .bind(batch_id)
            .fetch_optional(&self.pool)
            .await
            .context(QuerySnafu)
    }

    async fn list_from(&self, from: i64, size: i64) -> Result<Vec<BatchRecord>> {
        sqlx::query_as("SELECT * FROM batches WHERE batch_id >= $1 ORDER BY batch_id ASC LIMIT $2")
            .bind(from)
            .bind(size)
            .fetch_all(&self.pool)
            .await
            .context(QuerySnafu)
    }

    async fn delete(&self, batch_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM batches WHERE batch_id = $1")
            .bind(batch_id)
            .execute(&self.pool)
            .await
            .context(QuerySnafu)?;

        Ok(())
    }
}
