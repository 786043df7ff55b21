use crate::error::StoreError;
use crate::lease::LiveLeases;
use crate::run::{Run, RunTransition};
use crate::store::RunStore;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::str::FromStr;
use std::time::Duration;

/// Opens a pool on a SQLite database URL, creating the file (and its
/// directory) when missing.
pub async fn connect(database_url: &str) -> Result<SqlitePool, StoreError> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5));

    let file = options.get_filename();
    if let Some(parent) = file.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(StoreError::io(parent))?;
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Applies the embedded schema migrations.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), StoreError> {
    // Use a relative path from the crate root
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Timestamps are stored as fixed-width RFC 3339 text so that string
/// comparison in SQL matches time order.
pub(crate) fn encode_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_ts(text: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp '{text}': {e}")))
}

fn decode_opt_ts(text: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    text.as_deref().map(decode_ts).transpose()
}

#[derive(Debug, FromRow)]
struct RunRow {
    run_id: String,
    name: String,
    strategy_kind: String,
    config: String,
    status: String,
    submitted_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    error: Option<String>,
    artifact_dir: Option<String>,
}

impl TryFrom<RunRow> for Run {
    type Error = StoreError;

    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        Ok(Run {
            status: row
                .status
                .parse()
                .map_err(|e: core_types::CoreError| StoreError::Corrupt(e.to_string()))?,
            config: serde_json::from_str(&row.config)?,
            submitted_at: decode_ts(&row.submitted_at)?,
            started_at: decode_opt_ts(row.started_at)?,
            completed_at: decode_opt_ts(row.completed_at)?,
            run_id: row.run_id,
            name: row.name,
            strategy_kind: row.strategy_kind,
            error: row.error,
            artifact_dir: row.artifact_dir,
        })
    }
}

const SELECT_RUN: &str = "SELECT run_id, name, strategy_kind, config, status, submitted_at, \
     started_at, completed_at, error, artifact_dir FROM runs";

/// Runs in a relational table. Each transition is one transaction whose
/// `UPDATE` is guarded by the status that was read.
#[derive(Debug, Clone)]
pub struct SqlRunStore {
    pool: SqlitePool,
}

impl SqlRunStore {
    /// Connects and migrates.
    pub async fn open(database_url: &str) -> Result<Self, StoreError> {
        let pool = connect(database_url).await?;
        run_migrations(&pool).await?;
        tracing::debug!(database_url, "Opened SQL run store");
        Ok(Self { pool })
    }

    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl RunStore for SqlRunStore {
    fn backend(&self) -> &'static str {
        "sql"
    }

    async fn create(&self, run: &Run) -> Result<(), StoreError> {
        let config = serde_json::to_string(&run.config)?;
        let result = sqlx::query(
            r#"
            INSERT INTO runs (run_id, name, strategy_kind, config, status, submitted_at,
                              started_at, completed_at, error, artifact_dir)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (run_id) DO NOTHING
            "#,
        )
        .bind(&run.run_id)
        .bind(&run.name)
        .bind(&run.strategy_kind)
        .bind(config)
        .bind(run.status.as_str())
        .bind(encode_ts(run.submitted_at))
        .bind(run.started_at.map(encode_ts))
        .bind(run.completed_at.map(encode_ts))
        .bind(&run.error)
        .bind(&run.artifact_dir)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists(run.run_id.clone()));
        }
        Ok(())
    }

    async fn update(&self, run_id: &str, transition: RunTransition) -> Result<Run, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, RunRow>(&format!("{SELECT_RUN} WHERE run_id = ?"))
            .bind(run_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::NotFound(run_id.to_string()))?;
        let mut run = Run::try_from(row)?;
        let from = run.status;
        run.apply(transition)?;

        let result = sqlx::query(
            r#"
            UPDATE runs
            SET status = ?, started_at = ?, completed_at = ?, error = ?, artifact_dir = ?
            WHERE run_id = ? AND status = ?
            "#,
        )
        .bind(run.status.as_str())
        .bind(run.started_at.map(encode_ts))
        .bind(run.completed_at.map(encode_ts))
        .bind(&run.error)
        .bind(&run.artifact_dir)
        .bind(run_id)
        .bind(from.as_str())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() != 1 {
            // Dropping the transaction rolls it back.
            return Err(StoreError::Conflict(run_id.to_string()));
        }
        tx.commit().await?;
        Ok(run)
    }

    async fn get(&self, run_id: &str) -> Result<Option<Run>, StoreError> {
        sqlx::query_as::<_, RunRow>(&format!("{SELECT_RUN} WHERE run_id = ?"))
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Run::try_from)
            .transpose()
    }

    async fn list(&self) -> Result<Vec<Run>, StoreError> {
        sqlx::query_as::<_, RunRow>(&format!("{SELECT_RUN} ORDER BY submitted_at ASC, run_id ASC"))
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Run::try_from)
            .collect()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    async fn reconcile_interrupted(
        &self,
        at: DateTime<Utc>,
        live: &LiveLeases,
    ) -> Result<Vec<String>, StoreError> {
        let mut tx = self.pool.begin().await?;
        // Leases are re-read inside the transaction: one taken after `live`
        // was collected still protects its run.
        let candidates: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT run_id FROM runs
            WHERE status IN ('queued', 'running')
              AND NOT EXISTS (
                SELECT 1 FROM run_leases l
                WHERE l.run_id = runs.run_id AND l.expires_at > ? AND l.owner <> ?
              )
            ORDER BY submitted_at, run_id
            "#,
        )
        .bind(encode_ts(crate::run::timestamp()))
        .bind(&live.owner)
        .fetch_all(&mut *tx)
        .await?;

        let mut ids = Vec::with_capacity(candidates.len());
        for run_id in candidates.into_iter().filter(|id| !live.contains(id)) {
            sqlx::query(
                r#"
                UPDATE runs
                SET status = 'failed', completed_at = ?, error = ?
                WHERE run_id = ? AND status IN ('queued', 'running')
                "#,
            )
            .bind(encode_ts(at))
            .bind(crate::run::INTERRUPTED_ERROR)
            .bind(&run_id)
            .execute(&mut *tx)
            .await?;
            ids.push(run_id);
        }
        tx.commit().await?;

        if !ids.is_empty() {
            tracing::warn!(backend = "sql", count = ids.len(), "Reconciled interrupted runs to failed");
        }
        Ok(ids)
    }
}
