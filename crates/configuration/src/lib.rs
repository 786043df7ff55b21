//! # Meridian Configuration
//!
//! Two kinds of configuration live here:
//!
//! - `BacktestConfig`: the run document a client submits. It is parsed from
//!   JSON or TOML and validated before a run record is ever created.
//! - `Settings`: how the service itself is wired (run store backend, pool
//!   size, artifact locations), read from `meridian.toml` and `MERIDIAN__*`
//!   environment variables.
//!
//! Tracing initialisation is here too so every binary sets up logging the same way.

pub use crate::error::ConfigError;
use std::path::Path;

pub mod backtest;
pub mod error;
pub mod logging;
pub mod settings;

pub use backtest::{
    BacktestConfig, BrokerConfig, CompositeParams, ConfiguredParams, ConstraintConfig,
    DocumentFormat, ExitRule, HoldingConfig, LegConfig, LongShortParams, MissingPolicy,
    OutputConfig, PostprocessConfig, RebalanceFrequency, ScoreSource, ScoreTransform,
    ScoringConfig, SelectionConfig, SignalTopNParams, SizerConfig, StaticUniverseParams,
    StrategyConfig, UniverseConfig,
};
pub use logging::init_tracing;
pub use settings::{
    ArtifactSettings, DataSettings, JobSettings, LoggingSettings, ReplicaPolicy, ServerSettings,
    Settings, StoreBackend, StoreSettings,
};

/// Loads the service settings.
///
/// Reads `path` (or `meridian.toml` in the working directory) when it exists,
/// then overlays `MERIDIAN__SECTION__KEY` environment variables. Every field has
/// a default, so an empty environment yields a usable configuration.
pub fn load_settings(path: Option<&Path>) -> Result<Settings, ConfigError> {
    let file = match path {
        Some(path) => config::File::from(path).required(true),
        None => config::File::with_name("meridian").required(false),
    };
    let builder = config::Config::builder()
        .add_source(file)
        .add_source(
            config::Environment::with_prefix("MERIDIAN")
                .prefix_separator("__")
                .separator("__"),
        )
        .build()?;

    let settings = builder.try_deserialize::<Settings>()?;

    if settings.jobs.max_concurrency == 0 {
        return Err(ConfigError::ValidationError(
            "jobs.max_concurrency must be at least 1".to_string(),
        ));
    }
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn settings_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[store]\nbackend = \"sql\"\n\n[jobs]\nmax_concurrency = 4\n\n[artifacts]\nreplica_policy = \"required\""
        )
        .unwrap();

        let settings = load_settings(Some(file.path())).unwrap();
        assert_eq!(settings.store.backend, StoreBackend::Sql);
        assert_eq!(settings.jobs.max_concurrency, 4);
        assert_eq!(settings.jobs.lease_ttl_secs, 30);
        assert_eq!(settings.artifacts.replica_policy, ReplicaPolicy::Required);
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[jobs]\nmax_concurrency = 0").unwrap();
        assert!(matches!(
            load_settings(Some(file.path())),
            Err(ConfigError::ValidationError(_))
        ));
    }
}
