use crate::error::StoreError;
use crate::sql::encode_ts;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use sqlx::sqlite::SqlitePool;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::sync::Mutex;

/// Exclusive right to execute one run until `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub run_id: String,
    pub owner: String,
    pub expires_at: DateTime<Utc>,
}

/// Runs that owners other than `owner` hold an unexpired lease on.
///
/// Startup reconciliation leaves these runs alone: another process is
/// still working on them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveLeases {
    pub owner: String,
    pub run_ids: BTreeSet<String>,
}

impl LiveLeases {
    /// No foreign leases: every unfinished run counts as interrupted.
    pub fn none(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            run_ids: BTreeSet::new(),
        }
    }

    pub fn contains(&self, run_id: &str) -> bool {
        self.run_ids.contains(run_id)
    }
}

/// Grants at most one live lease per run id.
///
/// An expired lease can be taken over by another owner; the previous holder
/// finds out on its next `renew`.
#[async_trait]
pub trait LeaseManager: Send + Sync {
    /// Takes the lease, or returns `LeaseHeld` if another owner holds a live one.
    async fn acquire(&self, run_id: &str, owner: &str, ttl: Duration) -> Result<Lease, StoreError>;

    /// Extends a lease this owner still holds, or returns `LeaseLost`.
    async fn renew(&self, lease: &Lease, ttl: Duration) -> Result<Lease, StoreError>;

    /// Gives the lease up. Releasing a lease that was lost is not an error.
    async fn release(&self, lease: &Lease) -> Result<(), StoreError>;

    /// Unexpired leases held by anyone but `owner`.
    async fn live(&self, owner: &str) -> Result<LiveLeases, StoreError>;
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    let ttl = TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX);
    now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn now() -> DateTime<Utc> {
    crate::run::timestamp()
}

/// Leases held in this process's memory.
#[derive(Debug, Default)]
pub struct InProcessLeaseManager {
    leases: Mutex<HashMap<String, Lease>>,
}

impl InProcessLeaseManager {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LeaseManager for InProcessLeaseManager {
    async fn acquire(&self, run_id: &str, owner: &str, ttl: Duration) -> Result<Lease, StoreError> {
        let mut leases = self.leases.lock().await;
        let now = now();
        if let Some(current) = leases.get(run_id) {
            if current.owner != owner && current.expires_at > now {
                return Err(StoreError::LeaseHeld {
                    run_id: run_id.to_string(),
                    owner: current.owner.clone(),
                });
            }
        }
        let lease = Lease {
            run_id: run_id.to_string(),
            owner: owner.to_string(),
            expires_at: expiry(now, ttl),
        };
        leases.insert(run_id.to_string(), lease.clone());
        Ok(lease)
    }

    async fn renew(&self, lease: &Lease, ttl: Duration) -> Result<Lease, StoreError> {
        let mut leases = self.leases.lock().await;
        match leases.get_mut(&lease.run_id) {
            Some(current) if current.owner == lease.owner => {
                current.expires_at = expiry(now(), ttl);
                Ok(current.clone())
            }
            _ => Err(StoreError::LeaseLost(lease.run_id.clone())),
        }
    }

    async fn release(&self, lease: &Lease) -> Result<(), StoreError> {
        let mut leases = self.leases.lock().await;
        if leases.get(&lease.run_id).is_some_and(|l| l.owner == lease.owner) {
            leases.remove(&lease.run_id);
        }
        Ok(())
    }

    async fn live(&self, owner: &str) -> Result<LiveLeases, StoreError> {
        let leases = self.leases.lock().await;
        let now = now();
        Ok(LiveLeases {
            owner: owner.to_string(),
            run_ids: leases
                .values()
                .filter(|l| l.owner != owner && l.expires_at > now)
                .map(|l| l.run_id.clone())
                .collect(),
        })
    }
}

/// Leases in the `run_leases` table, shared by every process on the database.
#[derive(Debug, Clone)]
pub struct SqlLeaseManager {
    pool: SqlitePool,
}

impl SqlLeaseManager {
    /// Expects a pool whose migrations have already been applied.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LeaseManager for SqlLeaseManager {
    async fn acquire(&self, run_id: &str, owner: &str, ttl: Duration) -> Result<Lease, StoreError> {
        let now = now();
        let expires_at = expiry(now, ttl);
        let result = sqlx::query(
            r#"
            INSERT INTO run_leases (run_id, owner, expires_at)
            VALUES (?, ?, ?)
            ON CONFLICT (run_id) DO UPDATE
            SET owner = excluded.owner, expires_at = excluded.expires_at
            WHERE run_leases.expires_at <= ? OR run_leases.owner = excluded.owner
            "#,
        )
        .bind(run_id)
        .bind(owner)
        .bind(encode_ts(expires_at))
        .bind(encode_ts(now))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let holder: Option<String> =
                sqlx::query_scalar("SELECT owner FROM run_leases WHERE run_id = ?")
                    .bind(run_id)
                    .fetch_optional(&self.pool)
                    .await?;
            return Err(StoreError::LeaseHeld {
                run_id: run_id.to_string(),
                owner: holder.unwrap_or_default(),
            });
        }
        Ok(Lease {
            run_id: run_id.to_string(),
            owner: owner.to_string(),
            expires_at,
        })
    }

    async fn renew(&self, lease: &Lease, ttl: Duration) -> Result<Lease, StoreError> {
        let expires_at = expiry(now(), ttl);
        let result = sqlx::query("UPDATE run_leases SET expires_at = ? WHERE run_id = ? AND owner = ?")
            .bind(encode_ts(expires_at))
            .bind(&lease.run_id)
            .bind(&lease.owner)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::LeaseLost(lease.run_id.clone()));
        }
        Ok(Lease {
            expires_at,
            ..lease.clone()
        })
    }

    async fn release(&self, lease: &Lease) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM run_leases WHERE run_id = ? AND owner = ?")
            .bind(&lease.run_id)
            .bind(&lease.owner)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn live(&self, owner: &str) -> Result<LiveLeases, StoreError> {
        let run_ids: Vec<String> =
            sqlx::query_scalar("SELECT run_id FROM run_leases WHERE expires_at > ? AND owner <> ?")
                .bind(encode_ts(now()))
                .bind(owner)
                .fetch_all(&self.pool)
                .await?;
        Ok(LiveLeases {
            owner: owner.to_string(),
            run_ids: run_ids.into_iter().collect(),
        })
    }
}
