//! Configuration system: TOML file + env var overrides + defaults.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::classify::taxonomy::{DefectCategory, Taxonomy};
use crate::core::errors::{DlError, Result};
use crate::logger::channel::{CHANNEL_CAPACITY, LoggerConfig};
use crate::logger::jsonl::JsonlConfig;

/// Full dledger configuration model.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub logging: LoggingConfig,
    pub query: QueryConfig,
    pub taxonomy: TaxonomyConfig,
    /// File this config was loaded from. Not part of the file itself.
    #[serde(skip)]
    pub config_file: PathBuf,
}

/// Which `BugStore` backs the ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Memory,
}

impl StoreBackend {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Memory => "memory",
        }
    }

    fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Some(Self::Sqlite),
            "memory" => Some(Self::Memory),
            _ => None,
        }
    }
}

/// Persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub sqlite_db: PathBuf,
    pub busy_timeout_ms: u64,
}

/// Activity log settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,
    pub jsonl_log: PathBuf,
    pub fallback_log: Option<PathBuf>,
    pub max_size_bytes: u64,
    pub max_rotated_files: u32,
    pub fsync_interval_secs: u64,
    pub channel_capacity: usize,
}

/// Query defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct QueryConfig {
    /// Length of the `most_frequent` list in stats.
    pub most_frequent_n: usize,
    /// Row limit for `list` and `subjects` when `--top` is not given.
    pub default_top_n: usize,
}

/// Additions to the built-in taxonomy.
///
/// Changing either table changes fingerprints for the affected types, so a
/// ledger should keep one taxonomy for its whole life.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TaxonomyConfig {
    /// Extra defect types compared structurally.
    pub structural: Vec<String>,
    /// Defect type => category label.
    pub categories: BTreeMap<String, String>,
}

fn home_dir() -> PathBuf {
    env::var_os("HOME").map_or_else(
        || {
            eprintln!("[DL-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths");
            PathBuf::from("/tmp")
        },
        PathBuf::from,
    )
}

fn data_dir() -> PathBuf {
    home_dir().join(".local").join("share").join("dledger")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            sqlite_db: data_dir().join("ledger.sqlite3"),
            busy_timeout_ms: 5_000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        let jsonl = JsonlConfig::default();
        Self {
            enabled: true,
            jsonl_log: data_dir().join("ledger.jsonl"),
            fallback_log: jsonl.fallback_path,
            max_size_bytes: jsonl.max_size_bytes,
            max_rotated_files: jsonl.max_rotated_files,
            fsync_interval_secs: jsonl.fsync_interval_secs,
            channel_capacity: CHANNEL_CAPACITY,
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            most_frequent_n: 5,
            default_top_n: 20,
        }
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        home_dir().join(".config").join("dledger").join("config.toml")
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw =
                fs::read_to_string(&path_buf).map_err(|source| DlError::io(&path_buf, source))?;
            toml::from_str::<Self>(&raw)?
        } else if is_explicit_path {
            return Err(DlError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.normalize();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for the session log.
    ///
    /// FNV-1a over the canonical JSON, stable across processes and releases.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    /// Built-in taxonomy merged with the `[taxonomy]` section.
    pub fn taxonomy(&self) -> Result<Taxonomy> {
        Taxonomy::default().with_overrides(&self.taxonomy.structural, &self.taxonomy.categories)
    }

    /// Logger thread settings derived from `[logging]`.
    pub fn logger_config(&self) -> LoggerConfig {
        LoggerConfig {
            jsonl: JsonlConfig {
                path: self.logging.jsonl_log.clone(),
                fallback_path: self.logging.fallback_log.clone(),
                max_size_bytes: self.logging.max_size_bytes,
                max_rotated_files: self.logging.max_rotated_files,
                fsync_interval_secs: self.logging.fsync_interval_secs,
            },
            channel_capacity: self.logging.channel_capacity,
        }
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // store
        if let Some(raw) = lookup("DLEDGER_STORE_BACKEND") {
            self.store.backend =
                StoreBackend::from_label(&raw).ok_or_else(|| DlError::ConfigParse {
                    context: "env",
                    details: format!("DLEDGER_STORE_BACKEND={raw:?}: expected sqlite or memory"),
                })?;
        }
        if let Some(raw) = lookup("DLEDGER_STORE_SQLITE_DB") {
            self.store.sqlite_db = PathBuf::from(raw);
        }

        // logging
        if let Some(raw) = lookup("DLEDGER_LOGGING_ENABLED") {
            self.logging.enabled = parse_env_bool("DLEDGER_LOGGING_ENABLED", &raw)?;
        }
        if let Some(raw) = lookup("DLEDGER_LOGGING_JSONL_LOG") {
            self.logging.jsonl_log = PathBuf::from(raw);
        }

        // query
        if let Some(raw) = lookup("DLEDGER_QUERY_MOST_FREQUENT_N") {
            self.query.most_frequent_n = parse_env_usize("DLEDGER_QUERY_MOST_FREQUENT_N", &raw)?;
        }
        if let Some(raw) = lookup("DLEDGER_QUERY_DEFAULT_TOP_N") {
            self.query.default_top_n = parse_env_usize("DLEDGER_QUERY_DEFAULT_TOP_N", &raw)?;
        }

        Ok(())
    }

    /// Taxonomy keys are matched case-insensitively; store them that way.
    fn normalize(&mut self) {
        for ty in &mut self.taxonomy.structural {
            *ty = ty.trim().to_lowercase();
        }
        self.taxonomy.structural.retain(|ty| !ty.is_empty());
        self.taxonomy.structural.sort();
        self.taxonomy.structural.dedup();

        self.taxonomy.categories = std::mem::take(&mut self.taxonomy.categories)
            .into_iter()
            .map(|(ty, label)| (ty.trim().to_lowercase(), label.trim().to_lowercase()))
            .collect();
    }

    pub fn validate(&self) -> Result<()> {
        if self.store.busy_timeout_ms == 0 {
            return Err(DlError::InvalidConfig {
                details: "store.busy_timeout_ms must be > 0".to_string(),
            });
        }
        if self.store.backend == StoreBackend::Sqlite
            && self.store.sqlite_db.as_os_str().is_empty()
        {
            return Err(DlError::InvalidConfig {
                details: "store.sqlite_db must be set for the sqlite backend".to_string(),
            });
        }

        if self.logging.channel_capacity == 0 {
            return Err(DlError::InvalidConfig {
                details: "logging.channel_capacity must be > 0".to_string(),
            });
        }
        if self.logging.max_size_bytes < 4096 {
            return Err(DlError::InvalidConfig {
                details: format!(
                    "logging.max_size_bytes must be >= 4096, got {}",
                    self.logging.max_size_bytes
                ),
            });
        }

        if self.query.most_frequent_n == 0 || self.query.default_top_n == 0 {
            return Err(DlError::InvalidConfig {
                details: "query.most_frequent_n and query.default_top_n must be > 0".to_string(),
            });
        }

        for (ty, label) in &self.taxonomy.categories {
            if ty.is_empty() {
                return Err(DlError::InvalidConfig {
                    details: "taxonomy.categories has an empty defect type".to_string(),
                });
            }
            if DefectCategory::from_label(label).is_none() {
                return Err(DlError::InvalidConfig {
                    details: format!("taxonomy.categories.{ty}: unknown category {label:?}"),
                });
            }
        }

        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env_usize(name: &str, raw: &str) -> Result<usize> {
    raw.trim()
        .parse::<usize>()
        .map_err(|error| DlError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}

fn parse_env_bool(name: &str, raw: &str) -> Result<bool> {
    raw.trim()
        .parse::<bool>()
        .map_err(|error| DlError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}

#[cfg(test)]
mod tests {
    use super::{Config, DlError, StoreBackend};
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect()
    }

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.store.backend, StoreBackend::Sqlite);
        assert_eq!(cfg.query.most_frequent_n, 5);
        assert!(cfg.store.sqlite_db.ends_with("dledger/ledger.sqlite3"));
    }

    #[test]
    fn load_returns_error_for_explicit_missing_path() {
        let err = Config::load(Some(Path::new("/nonexistent/dledger/config.toml"))).unwrap_err();
        assert!(matches!(err, DlError::MissingConfig { .. }));
        assert_eq!(err.code(), "DL-1002");
    }

    #[test]
    fn load_reads_toml_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[store]
backend = "memory"

[query]
most_frequent_n = 3

[taxonomy]
structural = [" Lure_Bypass "]

[taxonomy.categories]
mana_leak = "calculation_error"
"#,
        )
        .unwrap();

        let cfg = Config::load(Some(&path)).unwrap();
        assert_eq!(cfg.config_file, path);
        assert_eq!(cfg.query.most_frequent_n, 3);
        assert_eq!(cfg.taxonomy.structural, vec!["lure_bypass".to_string()]);

        let taxonomy = cfg.taxonomy().unwrap();
        assert_eq!(taxonomy.category_of("mana_leak").as_str(), "calculation_error");
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[store\nbackend = ").unwrap();
        let err = Config::load(Some(&path)).unwrap_err();
        assert_eq!(err.code(), "DL-1003");
    }

    #[test]
    fn unknown_category_label_rejected() {
        let mut cfg = Config::default();
        cfg.taxonomy
            .categories
            .insert("mana_leak".to_string(), "cosmic_rays".to_string());
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.code(), "DL-1001");
        assert!(err.to_string().contains("cosmic_rays"));
    }

    #[test]
    fn zero_limits_rejected() {
        let mut cfg = Config::default();
        cfg.query.default_top_n = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.logging.channel_capacity = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.store.busy_timeout_ms = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let env = vars(&[
            ("DLEDGER_STORE_BACKEND", "Memory"),
            ("DLEDGER_STORE_SQLITE_DB", "/tmp/x.sqlite3"),
            ("DLEDGER_LOGGING_ENABLED", "false"),
            ("DLEDGER_QUERY_DEFAULT_TOP_N", "7"),
        ]);
        let mut cfg = Config::default();
        cfg.apply_env_overrides_from(|name| env.get(name).cloned())
            .unwrap();
        assert_eq!(cfg.store.backend, StoreBackend::Memory);
        assert_eq!(cfg.store.sqlite_db, PathBuf::from("/tmp/x.sqlite3"));
        assert!(!cfg.logging.enabled);
        assert_eq!(cfg.query.default_top_n, 7);
    }

    #[test]
    fn env_invalid_values_rejected() {
        let env = vars(&[("DLEDGER_LOGGING_ENABLED", "sometimes")]);
        let mut cfg = Config::default();
        let err = cfg
            .apply_env_overrides_from(|name| env.get(name).cloned())
            .unwrap_err();
        assert_eq!(err.code(), "DL-1003");

        let env = vars(&[("DLEDGER_STORE_BACKEND", "postgres")]);
        let err = cfg
            .apply_env_overrides_from(|name| env.get(name).cloned())
            .unwrap_err();
        assert!(err.to_string().contains("DLEDGER_STORE_BACKEND"));
    }

    #[test]
    fn stable_hash_deterministic_and_sensitive() {
        let cfg = Config::default();
        assert_eq!(cfg.stable_hash().unwrap(), cfg.stable_hash().unwrap());

        let mut changed = cfg.clone();
        changed.taxonomy.structural.push("lure_bypass".to_string());
        assert_ne!(cfg.stable_hash().unwrap(), changed.stable_hash().unwrap());
    }

    #[test]
    fn logger_config_mirrors_logging_section() {
        let mut cfg = Config::default();
        cfg.logging.jsonl_log = PathBuf::from("/tmp/dl.jsonl");
        cfg.logging.channel_capacity = 16;
        let logger = cfg.logger_config();
        assert_eq!(logger.jsonl.path, PathBuf::from("/tmp/dl.jsonl"));
        assert_eq!(logger.channel_capacity, 16);
    }
}
