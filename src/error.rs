//! Error handling types for stockbridge
//!
//! `BusError` covers the failures a submitted command can settle with.
//! Malformed worker output is absent: it settles successfully with an error
//! marker payload (see `bus::correlator`). `ConfigError` covers startup.

use std::path::PathBuf;

use thiserror::Error;

/// Failure of a single command routed through the worker bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// The worker executable could not be launched.
    ///
    /// Logged by the supervisor; never delivered to a caller, since queued
    /// commands wait for the next successful spawn instead.
    #[error("failed to spawn worker '{}': {source}", .program.display())]
    SpawnFailure {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The worker exited while this command was awaiting its response.
    #[error("worker exited while the command was in flight ({})", describe_exit(.code))]
    WorkerCrashed { code: Option<i32> },

    /// Writing the command to the worker's stdin failed.
    #[error("failed to write command to worker: {source}")]
    WriteFailure {
        #[source]
        source: std::io::Error,
    },

    /// The bus is shutting down and no longer dispatches commands.
    #[error("command bus is shutting down")]
    ShuttingDown,
}

/// Result type for bus operations
pub type BusResult<T> = Result<T, BusError>;

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}

impl BusError {
    /// Create a spawn failure error
    pub fn spawn_failure(program: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BusError::SpawnFailure {
            program: program.into(),
            source,
        }
    }

    /// Create a worker crash error
    pub fn worker_crashed(code: Option<i32>) -> Self {
        BusError::WorkerCrashed { code }
    }

    /// Create a write failure error
    pub fn write_failure(source: std::io::Error) -> Self {
        BusError::WriteFailure { source }
    }

    /// Whether the failure came from the worker side (as opposed to the bus
    /// itself going away). The HTTP layer maps these to 502.
    pub fn is_worker_fault(&self) -> bool {
        matches!(
            self,
            BusError::SpawnFailure { .. }
                | BusError::WorkerCrashed { .. }
                | BusError::WriteFailure { .. }
        )
    }
}

/// Failure while loading settings. Always fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid listen address '{value}': {source}")]
    InvalidListen {
        value: String,
        #[source]
        source: std::net::AddrParseError,
    },
}
