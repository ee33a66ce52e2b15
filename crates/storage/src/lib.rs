use std::{str::FromStr, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{
    migrate::MigrateError,
    sqlite::{
        SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
    },
    Row, SqlitePool,
};
use thiserror::Error;
use uuid::Uuid;

use repo_activity_core::store::{ActivityStore, StoreError};
use repo_activity_core::types::{ActivityAction, ActivityRecord, RecordError, StoredActivity};

const MAX_CONNECTIONS: u32 = 5;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Top-level database handle that owns the SQLite connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Establishes a new SQLite connection pool for the provided connection string.
    ///
    /// Pragmas are part of the connect options so every pooled connection gets them.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(StorageError::Connect)?
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(StorageError::Connect)?;

        Ok(Self { pool })
    }

    /// Applies migrations located under `migrations/`.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(StorageError::Migration)?;
        Ok(())
    }

    /// Round-trips a trivial query to confirm the database is reachable.
    pub async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Returns a handle to the append-only activity record table.
    pub fn activities(&self) -> ActivityRepository {
        ActivityRepository {
            pool: self.pool.clone(),
        }
    }

    /// Exposes the inner pool when lower level access is required.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// General storage level errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to sqlite: {0}")]
    Connect(sqlx::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(MigrateError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository responsible for the `activity_records` table.
#[derive(Clone)]
pub struct ActivityRepository {
    pool: SqlitePool,
}

impl ActivityRepository {
    /// Appends a record and returns its generated identifier.
    pub async fn insert(&self, record: &ActivityRecord) -> Result<String, ActivityRepositoryError> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO activity_records \
             (id, request_id, author, action, from_branch, to_branch, timestamp, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&record.request_id)
        .bind(&record.author)
        .bind(record.action.as_str())
        .bind(record.from_branch.as_deref())
        .bind(&record.to_branch)
        .bind(&record.timestamp)
        .bind(to_rfc3339(Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    /// Loads the record with the greatest timestamp; later inserts win ties.
    pub async fn fetch_latest(&self) -> Result<Option<StoredActivity>, ActivityRepositoryError> {
        let row = sqlx::query(
            "SELECT id, request_id, author, action, from_branch, to_branch, timestamp \
             FROM activity_records \
             ORDER BY timestamp DESC, seq DESC \
             LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        row.map(decode_row).transpose()
    }

    /// Number of stored records.
    pub async fn count(&self) -> Result<i64, ActivityRepositoryError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM activity_records")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

fn decode_row(row: SqliteRow) -> Result<StoredActivity, ActivityRepositoryError> {
    let action: String = row.try_get("action")?;
    let record = ActivityRecord {
        request_id: row.try_get("request_id")?,
        author: row.try_get("author")?,
        action: action.parse::<ActivityAction>()?,
        from_branch: row.try_get("from_branch")?,
        to_branch: row.try_get("to_branch")?,
        timestamp: row.try_get("timestamp")?,
    };
    record.validate()?;

    Ok(StoredActivity {
        id: row.try_get("id")?,
        record,
    })
}

#[async_trait]
impl ActivityStore for ActivityRepository {
    async fn insert(&self, record: &ActivityRecord) -> Result<String, StoreError> {
        ActivityRepository::insert(self, record)
            .await
            .map_err(StoreError::new)
    }

    async fn fetch_latest(&self) -> Result<Option<StoredActivity>, StoreError> {
        ActivityRepository::fetch_latest(self)
            .await
            .map_err(StoreError::new)
    }
}

/// Errors raised by [`ActivityRepository`].
#[derive(Debug, Error)]
pub enum ActivityRepositoryError {
    #[error("stored record is malformed: {0}")]
    Decode(#[from] RecordError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_db() -> Database {
        let db = Database::connect("sqlite::memory:?cache=shared")
            .await
            .expect("connect");
        db.run_migrations().await.expect("migrations");
        db
    }

    #[tokio::test]
    async fn migrations_apply() {
        let db = setup_db().await;

        let tables: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'activity_records'",
        )
        .fetch_one(db.pool())
        .await
        .expect("fetch tables");
        assert_eq!(tables.0, 1);
        db.ping().await.expect("ping");
    }

    #[tokio::test]
    async fn every_pooled_connection_is_configured() {
        let db = setup_db().await;

        let mut held = Vec::new();
        for _ in 0..MAX_CONNECTIONS {
            let mut conn = db.pool().acquire().await.expect("acquire");
            let foreign_keys: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
                .fetch_one(&mut *conn)
                .await
                .expect("foreign_keys");
            let busy_timeout: i64 = sqlx::query_scalar("PRAGMA busy_timeout")
                .fetch_one(&mut *conn)
                .await
                .expect("busy_timeout");
            assert_eq!(foreign_keys, 1);
            assert_eq!(busy_timeout, BUSY_TIMEOUT.as_millis() as i64);
            held.push(conn);
        }
    }

    #[tokio::test]
    async fn fetch_latest_returns_none_when_empty() {
        let db = setup_db().await;
        let latest = db.activities().fetch_latest().await.expect("fetch");
        assert!(latest.is_none());
    }

    #[tokio::test]
    async fn insert_round_trips_merge_record() {
        let db = setup_db().await;
        let repo = db.activities();
        let record =
            ActivityRecord::merge("1987654321", "maintainer", "feature", "main", "2024-01-02T07:30:00Z");

        let id = repo.insert(&record).await.expect("insert");
        let latest = repo.fetch_latest().await.expect("fetch").expect("row");

        assert_eq!(latest.id, id);
        assert_eq!(latest.record, record);
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[tokio::test]
    async fn fetch_latest_orders_by_timestamp_not_insertion() {
        let db = setup_db().await;
        let repo = db.activities();

        repo.insert(&ActivityRecord::push("b", "octocat", "main", "2024-01-02T00:00:00Z"))
            .await
            .expect("insert");
        repo.insert(&ActivityRecord::pull_request(
            "7",
            "octocat",
            "topic",
            "main",
            "2024-01-03T00:00:00Z",
        ))
        .await
        .expect("insert");
        repo.insert(&ActivityRecord::push("a", "octocat", "main", "2024-01-01T00:00:00Z"))
            .await
            .expect("insert");

        let latest = repo.fetch_latest().await.expect("fetch").expect("row");
        assert_eq!(latest.record.request_id, "7");
        assert_eq!(latest.record.from_branch.as_deref(), Some("topic"));
        assert_eq!(repo.count().await.expect("count"), 3);
    }

    #[tokio::test]
    async fn equal_timestamps_resolve_to_last_insert() {
        let db = setup_db().await;
        let repo = db.activities();

        for request_id in ["first", "second"] {
            repo.insert(&ActivityRecord::push(
                request_id,
                "octocat",
                "main",
                "2024-01-01T00:00:00Z",
            ))
            .await
            .expect("insert");
        }

        let latest = repo.fetch_latest().await.expect("fetch").expect("row");
        assert_eq!(latest.record.request_id, "second");
    }

    #[tokio::test]
    async fn schema_rejects_push_with_source_branch() {
        let db = setup_db().await;
        let mut record = ActivityRecord::push("abc", "octocat", "main", "2024-01-01T00:00:00Z");
        record.from_branch = Some("topic".to_string());

        let err = db.activities().insert(&record).await.expect_err("check constraint");
        assert!(matches!(err, ActivityRepositoryError::Database(_)));
    }

    #[tokio::test]
    async fn trait_object_delegates_to_repository() {
        let db = setup_db().await;
        let store: std::sync::Arc<dyn ActivityStore> = std::sync::Arc::new(db.activities());

        let id = store
            .insert(&ActivityRecord::push("abc", "octocat", "main", "2024-01-01T00:00:00Z"))
            .await
            .expect("insert");
        let latest = store.fetch_latest().await.expect("fetch").expect("row");
        assert_eq!(latest.id, id);
    }
}
