//! The capability contract every backend implements, and the mapping from the host platform
//! to the backend that can serve it.

use std::fmt::{self, Debug, Display};

use serde::{Deserialize, Serialize};
use throttle_common::ThrottlerConfig;

use crate::{command, dummynet::PacketFilter, tc::TrafficControl};

/// The outcome of a single backend operation. `Ok` carries the tool's output, if any.
pub type ExecResult = std::result::Result<Option<String>, BackendError>;

/// A failure reported by a backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The underlying tool could not be run, failed or timed out.
    #[error("{0}")]
    Command(#[from] command::Error),
    /// The tool ran fine, but its answer is negative.
    #[error("{0}")]
    Rejected(String),
    /// The backend panicked while serving the request.
    #[error("backend panicked: {0}")]
    Panicked(String),
}

/// A backend able to apply and remove emulation rules on this host.
///
/// Implementations hold no state of their own beyond what the OS tool keeps.
pub trait Executor: Debug + Send + Sync {
    /// Short name of the backend, used in logs.
    fn name(&self) -> &'static str;

    /// Applies `config`.
    fn start(&self, config: &ThrottlerConfig) -> ExecResult;

    /// Removes the rules previously applied for `config`.
    fn stop(&self, config: &ThrottlerConfig) -> ExecResult;

    /// Succeeds if emulation rules managed by this backend are currently installed.
    fn check(&self) -> ExecResult;

    /// Lists the installed rules, as printed by the OS tool.
    fn list(&self) -> ExecResult;

    /// Succeeds if the OS tool is available on this host.
    fn exists(&self) -> ExecResult;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecStatus {
    Success,
    Failed,
}

/// The serializable form of an [`ExecResult`]: `{status: "Success" | "Failed", message?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecReport {
    pub status: ExecStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<&ExecResult> for ExecReport {
    fn from(value: &ExecResult) -> Self {
        match value {
            Ok(message) => Self { status: ExecStatus::Success, message: message.clone() },
            Err(e) => Self { status: ExecStatus::Failed, message: Some(e.to_string()) },
        }
    }
}

impl From<ExecResult> for ExecReport {
    fn from(value: ExecResult) -> Self {
        Self::from(&value)
    }
}

/// The operating systems we know how to tell apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Platform {
    Linux,
    Darwin,
    FreeBsd,
    Windows,
    Other(String),
}

impl Platform {
    /// The platform this binary was built for.
    pub fn current() -> Self {
        Self::from(std::env::consts::OS)
    }
}

impl From<&str> for Platform {
    fn from(s: &str) -> Self {
        match s {
            "linux" => Self::Linux,
            "macos" | "darwin" => Self::Darwin,
            "freebsd" => Self::FreeBsd,
            "windows" => Self::Windows,
            other => Self::Other(other.to_string()),
        }
    }
}

impl Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linux => f.write_str("linux"),
            Self::Darwin => f.write_str("darwin"),
            Self::FreeBsd => f.write_str("freebsd"),
            Self::Windows => f.write_str("windows"),
            Self::Other(os) => f.write_str(os),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("OS is not supported: {0}")]
    UnsupportedPlatform(Platform),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Returns the backend serving `platform`, running its commands through `runner`.
///
/// Linux is served by `tc` netem, macOS and FreeBSD by dummynet pipes behind a pf anchor.
pub fn select_executor(platform: &Platform, runner: command::Runner) -> Result<Box<dyn Executor>> {
    let executor: Box<dyn Executor> = match platform {
        Platform::Linux => Box::new(TrafficControl::new(runner)),
        // The stock pf.conf on macOS already evaluates anchors below `com.apple/`.
        Platform::Darwin => Box::new(PacketFilter::new(runner).anchor("com.apple/throttle")),
        Platform::FreeBsd => Box::new(PacketFilter::new(runner)),
        Platform::Windows | Platform::Other(_) => {
            return Err(Error::UnsupportedPlatform(platform.clone()))
        }
    };

    tracing::debug!(%platform, backend = executor.name(), "selected executor");

    Ok(executor)
}
