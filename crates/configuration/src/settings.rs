use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Service-level settings: where runs are stored, how many run at once, where
/// artifacts and market data live. Distinct from a run's `BacktestConfig`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub store: StoreSettings,
    pub jobs: JobSettings,
    pub artifacts: ArtifactSettings,
    pub data: DataSettings,
    pub logging: LoggingSettings,
    pub server: ServerSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum StoreBackend {
    /// A single JSON index file on local disk.
    #[default]
    File,
    /// One object per run with conditional writes.
    Object,
    /// A relational table accessed through sqlx.
    Sql,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    pub file_path: PathBuf,
    pub object_root: PathBuf,
    pub database_url: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::File,
            file_path: PathBuf::from("state/runs.json"),
            object_root: PathBuf::from("state/objects"),
            database_url: "sqlite://state/runs.db?mode=rwc".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct JobSettings {
    /// Upper bound on simultaneously executing runs.
    pub max_concurrency: usize,
    pub lease_ttl_secs: u64,
    /// Identifies this process in lease records. Generated when unset.
    pub owner: Option<String>,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            max_concurrency: 2,
            lease_ttl_secs: 30,
            owner: None,
        }
    }
}

/// Whether a failed remote mirror fails the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum ReplicaPolicy {
    /// Log the mirror failure and keep the run completed.
    #[default]
    BestEffort,
    Required,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ArtifactSettings {
    pub root: PathBuf,
    pub remote_root: Option<PathBuf>,
    pub replica_policy: ReplicaPolicy,
}

impl Default for ArtifactSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("artifacts"),
            remote_root: None,
            replica_policy: ReplicaPolicy::BestEffort,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DataSettings {
    /// Directory holding `prices/<SYMBOL>.csv` and `signals/<column>.csv`.
    pub root: PathBuf,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// When set, logs are also written to a daily rolling file in this directory.
    pub directory: Option<PathBuf>,
    pub file_prefix: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
            file_prefix: "meridian.log".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerSettings {
    pub addr: SocketAddr,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
        }
    }
}
