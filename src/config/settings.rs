//! Settings types.
//!
//! `SettingsLayer` is what a single source (a TOML file or the command line)
//! contributes: every field optional, unknown keys rejected. Layers are
//! merged and then resolved against the built-in defaults into `Settings`.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Worker executable used when nothing else is configured.
pub const DEFAULT_WORKER_PROGRAM: &str = "../dsa2";
/// Flag that puts the worker into line-protocol mode.
pub const DEFAULT_WORKER_ARGS: &[&str] = &["--api"];
pub const DEFAULT_RESPAWN_DELAY_MS: u64 = 1000;
pub const DEFAULT_KILL_GRACE_MS: u64 = 2000;
pub const DEFAULT_LISTEN: &str = "127.0.0.1:5000";

/// How to launch and supervise the worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Pause between a worker exit (or failed spawn) and the next spawn.
    pub respawn_delay_ms: u64,
    /// Time a worker gets to exit on its own at shutdown before it is killed.
    pub kill_grace_ms: u64,
}

impl WorkerConfig {
    pub fn respawn_delay(&self) -> Duration {
        Duration::from_millis(self.respawn_delay_ms)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_WORKER_PROGRAM),
            args: DEFAULT_WORKER_ARGS.iter().map(|s| s.to_string()).collect(),
            respawn_delay_ms: DEFAULT_RESPAWN_DELAY_MS,
            kill_grace_ms: DEFAULT_KILL_GRACE_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 5000)),
        }
    }
}

/// Fully resolved settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub worker: WorkerConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerLayer {
    pub program: Option<PathBuf>,
    pub args: Option<Vec<String>>,
    pub respawn_delay_ms: Option<u64>,
    pub kill_grace_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerLayer {
    pub listen: Option<String>,
}

/// One source of settings. Absent fields defer to lower layers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsLayer {
    #[serde(default)]
    pub worker: WorkerLayer,
    #[serde(default)]
    pub server: ServerLayer,
}

impl SettingsLayer {
    /// Read and parse a TOML settings file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents, path)
    }

    /// Parse TOML that was read from `path`.
    ///
    /// A relative `worker.program` containing a directory component is taken
    /// relative to the file's directory. Bare names are left for `PATH`
    /// lookup.
    pub fn from_toml(contents: &str, path: &Path) -> Result<Self, ConfigError> {
        let mut layer: SettingsLayer =
            toml::from_str(contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        if let (Some(program), Some(base)) = (layer.worker.program.as_mut(), path.parent()) {
            if program.is_relative() && program.components().count() > 1 {
                *program = base.join(&*program);
            }
        }
        Ok(layer)
    }

    /// Overlay `higher` on top of `self`; fields set in `higher` win.
    pub fn merge(self, higher: SettingsLayer) -> SettingsLayer {
        SettingsLayer {
            worker: WorkerLayer {
                program: higher.worker.program.or(self.worker.program),
                args: higher.worker.args.or(self.worker.args),
                respawn_delay_ms: higher.worker.respawn_delay_ms.or(self.worker.respawn_delay_ms),
                kill_grace_ms: higher.worker.kill_grace_ms.or(self.worker.kill_grace_ms),
            },
            server: ServerLayer {
                listen: higher.server.listen.or(self.server.listen),
            },
        }
    }

    /// Fill the remaining gaps from the defaults.
    pub fn resolve(self) -> Result<Settings, ConfigError> {
        let defaults = Settings::default();
        let listen = match self.server.listen {
            Some(value) => value
                .parse::<SocketAddr>()
                .map_err(|source| ConfigError::InvalidListen { value, source })?,
            None => defaults.server.listen,
        };
        Ok(Settings {
            worker: WorkerConfig {
                program: self.worker.program.unwrap_or(defaults.worker.program),
                args: self.worker.args.unwrap_or(defaults.worker.args),
                respawn_delay_ms: self
                    .worker
                    .respawn_delay_ms
                    .unwrap_or(defaults.worker.respawn_delay_ms),
                kill_grace_ms: self
                    .worker
                    .kill_grace_ms
                    .unwrap_or(defaults.worker.kill_grace_ms),
            },
            server: ServerConfig { listen },
        })
    }
}
