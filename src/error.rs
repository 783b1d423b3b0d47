//! Error types for portprobe.
//!
//! Uses `thiserror` for ergonomic error definitions. Only batch-wide failures
//! live here: a refused, reset, unreachable or silent port is an ordinary
//! `Closed` outcome and never becomes a `ScanError`.

use crate::scanner::StrategyKind;
use crate::types::{PortError, TargetError};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for scanning operations.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Target(#[from] TargetError),

    #[error("Readiness multiplexer failed: {0}")]
    Multiplexer(#[source] io::Error),

    #[error("Resource exhausted while {context}: {source}")]
    ResourceExhausted {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("Strategy '{0}' is not supported on this platform")]
    Unsupported(StrategyKind),

    #[error(
        "{} cannot serve as a child process: it is not the portprobe binary; set EngineOptions::process_program",
        .0.display()
    )]
    NoChildProgram(PathBuf),

    #[error("Scan worker failed: {0}")]
    WorkerFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ScanError {
    /// Whether the error was raised by request validation, before any probing.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::InvalidConfig(_))
    }

    pub(crate) fn exhausted(context: impl Into<String>, source: io::Error) -> Self {
        Self::ResourceExhausted {
            context: context.into(),
            source,
        }
    }
}

impl From<PortError> for ScanError {
    fn from(err: PortError) -> Self {
        Self::InvalidConfig(err.to_string())
    }
}

/// Result type alias for scan operations.
pub type ScanResult<T> = Result<T, ScanError>;

/// Errors raised while loading or saving application settings.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not determine a configuration directory")]
    DirectoryNotFound,

    #[error("failed to read {path}: {reason}")]
    ReadFailed { path: PathBuf, reason: String },

    #[error("failed to write {path}: {reason}")]
    WriteFailed { path: PathBuf, reason: String },

    #[error("invalid settings file: {0}")]
    InvalidFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidFormat(err.to_string())
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors surfaced by CLI subcommands.
#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit status for this error: 2 for bad input, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Scan(e) if e.is_configuration() => 2,
            _ => 1,
        }
    }
}

pub type CliResult<T> = Result<T, CliError>;
