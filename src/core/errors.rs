//! DL-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, DlError>;

/// Top-level error type for the defect ledger.
#[derive(Debug, Error)]
pub enum DlError {
    #[error("[DL-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[DL-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[DL-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[DL-2001] invalid input at {location}: {details}")]
    InvalidInput { location: String, details: String },

    #[error("[DL-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[DL-2102] SQL failure in {context}: {details}")]
    Sql {
        context: &'static str,
        details: String,
    },

    #[error("[DL-2103] storage backend failure for {key}: {details}")]
    Storage { key: String, details: String },

    #[error("[DL-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[DL-3003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[DL-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl DlError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "DL-1001",
            Self::MissingConfig { .. } => "DL-1002",
            Self::ConfigParse { .. } => "DL-1003",
            Self::InvalidInput { .. } => "DL-2001",
            Self::Serialization { .. } => "DL-2101",
            Self::Sql { .. } => "DL-2102",
            Self::Storage { .. } => "DL-2103",
            Self::Io { .. } => "DL-3002",
            Self::ChannelClosed { .. } => "DL-3003",
            Self::Runtime { .. } => "DL-3900",
        }
    }

    /// Whether a caller-side retry might resolve the failure.
    ///
    /// Nothing in this crate retries internally.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::ChannelClosed { .. }
                | Self::Sql { .. }
                | Self::Storage { .. }
                | Self::Runtime { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for DlError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql {
            context: "rusqlite",
            details: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for DlError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for DlError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
