//! Configuration errors.

use std::path::PathBuf;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Why a configuration could not be produced.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required config file does not exist.
    #[error("config file {} does not exist", path.display())]
    Missing {
        /// The path that was looked up.
        path: PathBuf,
    },

    /// A config file exists but could not be read.
    #[error("cannot read config file {}", path.display())]
    Read {
        /// The file.
        path: PathBuf,
        /// I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// A document did not parse in its declared format.
    #[error("malformed {format} config: {source}")]
    Parse {
        /// `toml`, `json` or `yaml`.
        format: &'static str,
        /// Parser error.
        #[source]
        source: BoxError,
    },

    /// Neither the file extension nor the given name is a known format.
    #[error("unsupported config format {0:?} (expected toml, json, yml or yaml)")]
    UnsupportedFormat(String),

    /// A value parsed but is not acceptable.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// Dotted option name, e.g. `server.http_port`.
        field: String,
        /// What is wrong with it.
        reason: String,
    },

    /// An environment override could not be applied.
    #[error("environment override {var}: {reason}")]
    Env {
        /// Variable name.
        var: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A `.env` file exists but could not be loaded.
    #[error("cannot load .env file")]
    DotEnv(#[from] dotenvy::Error),
}

impl ConfigError {
    /// `Missing` for `path`.
    pub fn missing(path: impl Into<PathBuf>) -> Self {
        Self::Missing { path: path.into() }
    }

    /// `Read` for `path`.
    pub fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }

    /// `Parse` in `format`.
    pub fn parse(format: &'static str, source: impl Into<BoxError>) -> Self {
        Self::Parse {
            format,
            source: source.into(),
        }
    }

    /// `InvalidValue` for `field`.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// `Env` for `var`.
    pub fn env(var: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Env {
            var: var.into(),
            reason: reason.into(),
        }
    }
}
