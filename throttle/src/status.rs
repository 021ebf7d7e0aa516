use std::fmt;

use serde::{Deserialize, Serialize};
use throttle_common::ThrottlerConfig;
use throttle_exec::ExecStatus;

use crate::Error;

/// The lifecycle state of the throttler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ThrottlerStatus {
    /// Nothing has been loaded yet.
    #[default]
    Uninitialized,
    /// Loaded, but never started.
    #[serde(alias = "Initilized")]
    Initialized,
    /// A configuration is applied.
    Started,
    /// Explicitly stopped.
    Stopped,
}

impl fmt::Display for ThrottlerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Uninitialized => "Uninitialized",
            Self::Initialized => "Initialized",
            Self::Started => "Started",
            Self::Stopped => "Stopped",
        };
        f.write_str(s)
    }
}

/// The persisted state: `{"conf": ThrottlerConfig | null, "status": "Started"}`.
///
/// `conf` is present if and only if `status` is [`ThrottlerStatus::Started`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    #[serde(default)]
    pub conf: Option<ThrottlerConfig>,
    pub status: ThrottlerStatus,
}

impl StatusRecord {
    pub fn started(conf: ThrottlerConfig) -> Self {
        Self { conf: Some(conf), status: ThrottlerStatus::Started }
    }

    pub fn is_consistent(&self) -> bool {
        self.conf.is_some() == (self.status == ThrottlerStatus::Started)
    }
}

/// The status of the throttler together with the configuration it runs, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThrottlerState {
    pub status: ThrottlerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ThrottlerConfig>,
}

/// The answer to a status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub status: ThrottlerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ThrottlerConfig>,
    /// The backend's rule listing, when it could be obtained.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell_output: Option<String>,
}

/// A successful start or stop.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub message: String,
    pub state: ThrottlerState,
}

impl Transition {
    pub(crate) fn started(config: ThrottlerConfig, restarted: bool) -> Self {
        let message = if restarted { "Throttler was re-started" } else { "Throttler was started" };
        Self {
            message: message.to_string(),
            state: ThrottlerState { status: ThrottlerStatus::Started, config: Some(config) },
        }
    }

    pub(crate) fn stopped() -> Self {
        Self {
            message: "Throttler was stopped".to_string(),
            state: ThrottlerState { status: ThrottlerStatus::Stopped, config: None },
        }
    }
}

/// The serializable outcome of a start or stop: `{status, message, throttlerStatus?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub status: ExecStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throttler_status: Option<ThrottlerState>,
}

impl From<Result<Transition, Error>> for Response {
    fn from(value: Result<Transition, Error>) -> Self {
        match value {
            Ok(transition) => Self {
                status: ExecStatus::Success,
                message: transition.message,
                throttler_status: Some(transition.state),
            },
            Err(e) => Self { status: ExecStatus::Failed, message: e.to_string(), throttler_status: None },
        }
    }
}
