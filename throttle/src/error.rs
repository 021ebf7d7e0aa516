use throttle_exec::{executor, BackendError};

use crate::{settings::SettingsError, store::StoreError, validate::ValidationError};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The configuration was rejected, nothing was applied.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The backend reported a failure. Its message is passed through as is.
    #[error(transparent)]
    Backend(#[from] BackendError),
    /// No backend exists for this host.
    #[error(transparent)]
    UnsupportedPlatform(#[from] executor::Error),
    /// The status record couldn't be written or removed.
    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),
    /// Stop was requested, but no configuration is applied.
    #[error("Throttler wasn't started")]
    NothingToStop,
    #[error("settings error: {0}")]
    Settings(#[from] SettingsError),
    /// The service thread is gone.
    #[error("throttler service is closed")]
    ServiceClosed,
}

pub type Result<T> = std::result::Result<T, Error>;
