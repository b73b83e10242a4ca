//! This module maintains application wide configurations.
//!

use std::path::{Path, PathBuf};

use serde::Deserialize;

error_chain::error_chain! {
    types {
        Error, ErrorKind, ResultExt, Result;
    }

    foreign_links {
        IoError(::std::io::Error);
        SerdeYamlError(::serde_yaml::Error);
    }

    errors {
        InvalidConfigFile {
            description("invalid config file")
        }
    }
}

/// Provide application wide configurations.
#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    /// Judge node related configurations.
    pub node: NodeConfig,

    /// Storage related configurations.
    pub storage: StorageConfig,

    /// Problem catalog related configurations.
    pub catalog: CatalogConfig,

    /// Maintenance daemon related configurations.
    #[serde(default)]
    pub maintenance: MaintenanceConfig,

    /// Submission and ad-hoc execution limits.
    #[serde(default)]
    pub limits: LimitsConfig,
}

impl AppConfig {
    /// Load configuration from the specified YAML file.
    pub fn from_file<P>(config_file: P) -> Result<Self>
        where P: AsRef<Path> {
        let content = std::fs::read_to_string(config_file)
            .chain_err(|| Error::from(ErrorKind::InvalidConfigFile))
            ?;
        let config: AppConfig = serde_yaml::from_str(&content)
            .chain_err(|| Error::from(ErrorKind::InvalidConfigFile))
            ?;
        Ok(config)
    }
}

/// Provide judge node related configurations.
#[derive(Clone, Debug, Deserialize)]
pub struct NodeConfig {
    /// Number of worker threads in the dispatcher pool.
    pub workers: u32,

    /// The time a worker sleeps between two queue polls, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// The grace period an in-flight submission is given to finish during
    /// shutdown, in milliseconds.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

/// Provide storage related configurations.
#[derive(Clone, Debug, Deserialize)]
pub struct StorageConfig {
    /// Path to the database file that contains a sqlite database.
    pub db_file: PathBuf,
}

/// Provide problem catalog related configurations.
#[derive(Clone, Debug, Deserialize)]
pub struct CatalogConfig {
    /// The directory under which problem manifests are maintained.
    pub problem_dir: PathBuf,
}

/// Provide maintenance daemon related configurations.
#[derive(Clone, Debug, Deserialize)]
pub struct MaintenanceConfig {
    /// The time interval between two maintenance passes, in milliseconds.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// The age after which a RUNNING queue item is considered abandoned by
    /// its worker, in milliseconds.
    #[serde(default = "default_stale_threshold_ms")]
    pub stale_threshold_ms: u64,

    /// The retention window for COMPLETED queue items, in milliseconds.
    #[serde(default = "default_queue_retention_ms")]
    pub queue_retention_ms: u64,

    /// The retention window for ad-hoc execution records, in milliseconds.
    #[serde(default = "default_execution_retention_ms")]
    pub execution_retention_ms: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> MaintenanceConfig {
        MaintenanceConfig {
            sweep_interval_ms: default_sweep_interval_ms(),
            stale_threshold_ms: default_stale_threshold_ms(),
            queue_retention_ms: default_queue_retention_ms(),
            execution_retention_ms: default_execution_retention_ms(),
        }
    }
}

/// Provide submission and ad-hoc execution limits.
#[derive(Clone, Debug, Deserialize)]
pub struct LimitsConfig {
    /// Maximum size of a submitted source text, in bytes.
    #[serde(default = "default_max_source_bytes")]
    pub max_source_bytes: usize,

    /// Smallest time limit an ad-hoc execution may request, in milliseconds.
    #[serde(default = "default_min_time_limit_ms")]
    pub min_time_limit_ms: u64,

    /// Largest time limit an ad-hoc execution may request, in milliseconds.
    #[serde(default = "default_max_time_limit_ms")]
    pub max_time_limit_ms: u64,

    /// Smallest memory limit an ad-hoc execution may request, in megabytes.
    #[serde(default = "default_min_memory_limit_mb")]
    pub min_memory_limit_mb: u64,

    /// Largest memory limit an ad-hoc execution may request, in megabytes.
    #[serde(default = "default_max_memory_limit_mb")]
    pub max_memory_limit_mb: u64,

    /// Time limit applied when an ad-hoc execution does not request one, in
    /// milliseconds.
    #[serde(default = "default_time_limit_ms")]
    pub default_time_limit_ms: u64,

    /// Memory limit applied when an ad-hoc execution does not request one,
    /// in megabytes.
    #[serde(default = "default_memory_limit_mb")]
    pub default_memory_limit_mb: u64,
}

impl Default for LimitsConfig {
    fn default() -> LimitsConfig {
        LimitsConfig {
            max_source_bytes: default_max_source_bytes(),
            min_time_limit_ms: default_min_time_limit_ms(),
            max_time_limit_ms: default_max_time_limit_ms(),
            min_memory_limit_mb: default_min_memory_limit_mb(),
            max_memory_limit_mb: default_max_memory_limit_mb(),
            default_time_limit_ms: default_time_limit_ms(),
            default_memory_limit_mb: default_memory_limit_mb(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_shutdown_grace_ms() -> u64 {
    10_000
}

fn default_sweep_interval_ms() -> u64 {
    60_000
}

fn default_stale_threshold_ms() -> u64 {
    30 * 60 * 1000
}

fn default_queue_retention_ms() -> u64 {
    30 * 24 * 60 * 60 * 1000
}

fn default_execution_retention_ms() -> u64 {
    7 * 24 * 60 * 60 * 1000
}

fn default_max_source_bytes() -> usize {
    100_000
}

fn default_min_time_limit_ms() -> u64 {
    100
}

fn default_max_time_limit_ms() -> u64 {
    30_000
}

fn default_min_memory_limit_mb() -> u64 {
    16
}

fn default_max_memory_limit_mb() -> u64 {
    1024
}

fn default_time_limit_ms() -> u64 {
    2000
}

fn default_memory_limit_mb() -> u64 {
    256
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::str::FromStr;

    #[test]
    fn deserialize_app_config_yaml() {
        let yaml = r#"
            node:
                workers: 4
                poll_interval_ms: 500
                shutdown_grace_ms: 3000
            storage:
                db_file: "path/to/db/file"
            catalog:
                problem_dir: "/problems"
            maintenance:
                sweep_interval_ms: 15000
                stale_threshold_ms: 600000
                queue_retention_ms: 86400000
                execution_retention_ms: 3600000
            limits:
                max_source_bytes: 50000
        "#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(4, config.node.workers);
        assert_eq!(500, config.node.poll_interval_ms);
        assert_eq!(3000, config.node.shutdown_grace_ms);

        assert_eq!(PathBuf::from_str("path/to/db/file").unwrap(), config.storage.db_file);
        assert_eq!(PathBuf::from_str("/problems").unwrap(), config.catalog.problem_dir);

        assert_eq!(15000, config.maintenance.sweep_interval_ms);
        assert_eq!(600000, config.maintenance.stale_threshold_ms);
        assert_eq!(86400000, config.maintenance.queue_retention_ms);
        assert_eq!(3600000, config.maintenance.execution_retention_ms);

        assert_eq!(50000, config.limits.max_source_bytes);
        // Unspecified limits fall back to their defaults.
        assert_eq!(100, config.limits.min_time_limit_ms);
        assert_eq!(1024, config.limits.max_memory_limit_mb);
    }

    #[test]
    fn deserialize_minimal_config() {
        let yaml = r#"
            node:
                workers: 2
            storage:
                db_file: "ripple.db"
            catalog:
                problem_dir: "problems"
        "#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(2, config.node.workers);
        assert_eq!(1000, config.node.poll_interval_ms);
        assert_eq!(30 * 60 * 1000, config.maintenance.stale_threshold_ms);
        assert_eq!(100_000, config.limits.max_source_bytes);
    }

    #[test]
    fn from_file_rejects_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        use std::io::Write;
        file.write_all(b"node: [this is not a mapping]").unwrap();
        assert!(AppConfig::from_file(file.path()).is_err());
    }
}
