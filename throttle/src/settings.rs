use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use throttle_exec::command::Runner;

/// Where the status record lives unless configured otherwise.
pub const DEFAULT_STATUS_FILE: &str = "./conf/throttlerStatus.json";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings from {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse settings from {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Process settings, read from a JSON file.
///
/// ```json
/// {
///   "throttlerProfiles": [{"name": "3G", "latency": 200, "bandwidth": 750, "packetLoss": 1, "netInterface": "eth0"}],
///   "statusFile": "./conf/throttlerStatus.json",
///   "commandTimeoutMs": 10000,
///   "sudo": false
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Named presets. They are kept as given and only validated when started.
    pub throttler_profiles: Vec<Value>,
    /// Path of the status record.
    pub status_file: PathBuf,
    /// Upper bound for a single backend command, in milliseconds.
    pub command_timeout_ms: u64,
    /// Whether backend commands run through `sudo`.
    pub sudo: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            throttler_profiles: Vec::new(),
            status_file: PathBuf::from(DEFAULT_STATUS_FILE),
            command_timeout_ms: 10_000,
            sudo: false,
        }
    }
}

impl Settings {
    /// Loads the settings at `path`. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();

        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(?path, "no settings file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => return Err(SettingsError::Io { path: path.to_path_buf(), source }),
        };

        serde_json::from_slice(&bytes)
            .map_err(|source| SettingsError::Parse { path: path.to_path_buf(), source })
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// The command runner backends should use.
    pub fn runner(&self) -> Runner {
        Runner::new(self.command_timeout()).with_sudo(self.sudo)
    }

    /// Finds the profile whose `name` field equals `name`.
    pub fn profile(&self, name: &str) -> Option<&Value> {
        self.throttler_profiles.iter().find(|p| p.get("name").and_then(Value::as_str) == Some(name))
    }
}
