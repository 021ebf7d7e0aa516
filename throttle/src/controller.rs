//! The throttler state machine.
//!
//! ```text
//!                 start(A)                 start(B)
//!   Initialized ──────────▶ Started(A) ─────────────▶ Started(B)   (implicit stop of A)
//!                             │    ▲
//!                       stop()│    │start(C)
//!                             ▼    │
//!                            Stopped
//! ```
//!
//! A [`Controller`] owns the in-memory status and configuration, and is the only writer of its
//! [`StatusStore`]. Mutating operations take `&mut self`: to share a controller between tasks,
//! hand it to a [`ThrottlerService`](crate::service::ThrottlerService), which runs every request
//! to completion before serving the next.

use std::panic::{self, AssertUnwindSafe};

use serde_json::Value;
use throttle_common::ThrottlerConfig;
use throttle_exec::{select_executor, BackendError, ExecResult, Executor, Platform};

use crate::{
    error::{Error, Result},
    settings::Settings,
    status::{StatusRecord, StatusReport, ThrottlerState, ThrottlerStatus, Transition},
    store::{FileStore, StatusStore},
    validate::Validator,
};

#[derive(Debug)]
pub struct Controller<S> {
    status: ThrottlerStatus,
    config: Option<ThrottlerConfig>,
    profiles: Vec<Value>,
    store: S,
    executor: Box<dyn Executor>,
    validator: Validator,
}

impl Controller<FileStore> {
    /// Builds a controller for `platform`, persisting to the status file of `settings`.
    ///
    /// Fails if no backend supports `platform`.
    pub fn from_settings(settings: &Settings, platform: &Platform) -> Result<Self> {
        let executor = select_executor(platform, settings.runner())?;
        let store = FileStore::new(&settings.status_file);

        Ok(Self::init(settings.throttler_profiles.clone(), store, executor))
    }
}

impl<S: StatusStore> Controller<S> {
    /// Creates a controller and restores the state found in `store`.
    ///
    /// A corrupt record is logged and removed, and the controller starts over as
    /// [`ThrottlerStatus::Initialized`].
    pub fn init(profiles: Vec<Value>, store: S, executor: Box<dyn Executor>) -> Self {
        let mut controller = Self {
            status: ThrottlerStatus::Uninitialized,
            config: None,
            profiles,
            store,
            executor,
            validator: Validator::default(),
        };

        match controller.store.load() {
            Ok(Some(record)) => {
                controller.status = record.status;
                controller.config = record.conf;
            }
            Ok(None) => {}
            Err(e) if e.is_corruption() => {
                tracing::error!(%e, "failed to read current configuration, removing broken record");
                if let Err(e) = controller.store.clear() {
                    tracing::error!(%e, "failed to remove broken status record");
                }
            }
            Err(e) => {
                tracing::error!(%e, "failed to read current configuration");
            }
        }

        if controller.status == ThrottlerStatus::Uninitialized {
            controller.status = ThrottlerStatus::Initialized;
        }

        tracing::info!(
            backend = controller.executor.name(),
            profiles = ?controller.profiles,
            config = ?controller.config,
            status = %controller.status,
            "throttler configuration"
        );

        controller
    }

    /// Replaces the validator, e.g. to check interfaces against a fixed list.
    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    /// Applies `config`. If a configuration is already applied, it is stopped first and the
    /// returned transition reports a restart.
    ///
    /// If the previous configuration was removed but `config` then fails to apply, the
    /// throttler is left [`ThrottlerStatus::Stopped`] with no configuration.
    pub fn start(&mut self, config: ThrottlerConfig) -> Result<Transition> {
        let _span = tracing::info_span!("start", %config).entered();

        if let Err(e) = self.validator.validate(&config) {
            tracing::info!(%e, "can't start throttler, bad config");
            return Err(e.into());
        }

        let restarted = self.status == ThrottlerStatus::Started;
        if restarted {
            // Never apply a configuration on top of one we failed to remove.
            self.stop().inspect_err(|e| tracing::info!(%e, "can't re-start throttler"))?;
        }

        self.invoke(|executor| executor.start(&config))
            .inspect_err(|e| tracing::info!(%e, "can't start throttler"))?;

        let previous = (self.status, self.config.take());
        self.status = ThrottlerStatus::Started;
        self.config = Some(config.clone());

        if let Err(e) = self.store.save(&StatusRecord::started(config.clone())) {
            tracing::error!(%e, "failed to persist status, rolling back");

            match self.invoke(|executor| executor.stop(&config)) {
                Ok(_) => (self.status, self.config) = previous,
                // The rules are still applied, so is our configuration.
                Err(e) => tracing::error!(%e, "failed to roll back backend"),
            }

            return Err(e.into());
        }

        tracing::info!(restarted, "throttler started");

        Ok(Transition::started(config, restarted))
    }

    /// Validates an untyped configuration and applies it, see [`Controller::start`].
    pub fn start_value(&mut self, value: &Value) -> Result<Transition> {
        let config = self.validator.validate_value(value).inspect_err(|e| {
            tracing::info!(%e, "can't start throttler, bad config");
        })?;

        self.start(config)
    }

    /// Removes the applied configuration. Fails with [`Error::NothingToStop`] if there is none.
    pub fn stop(&mut self) -> Result<Transition> {
        let _span = tracing::info_span!("stop").entered();

        let Some(config) = self.config.clone() else {
            tracing::info!("throttler wasn't started, nothing to stop");
            return Err(Error::NothingToStop);
        };

        self.invoke(|executor| executor.stop(&config))
            .inspect_err(|e| tracing::info!(%e, "can't stop throttler"))?;

        // The rules are gone whatever happens to the record.
        self.config = None;
        self.status = ThrottlerStatus::Stopped;

        self.store
            .clear()
            .inspect_err(|e| tracing::error!(%e, "failed to remove status record"))?;

        tracing::info!("throttler stopped");

        Ok(Transition::stopped())
    }

    pub fn check(&self) -> ExecResult {
        self.invoke(|executor| executor.check())
    }

    pub fn list(&self) -> ExecResult {
        self.invoke(|executor| executor.list())
    }

    pub fn exists(&self) -> ExecResult {
        self.invoke(|executor| executor.exists())
    }

    /// The current status and configuration, plus the backend's rule listing when available.
    pub fn status(&self) -> StatusReport {
        let shell_output = match self.list() {
            Ok(output) => output,
            Err(e) => {
                tracing::debug!(%e, "failed to list rules");
                None
            }
        };

        StatusReport { status: self.status, config: self.config.clone(), shell_output }
    }

    pub fn state(&self) -> ThrottlerState {
        ThrottlerState { status: self.status, config: self.config.clone() }
    }

    pub fn throttler_status(&self) -> ThrottlerStatus {
        self.status
    }

    pub fn current_config(&self) -> Option<&ThrottlerConfig> {
        self.config.as_ref()
    }

    pub fn profiles(&self) -> &[Value] {
        &self.profiles
    }

    /// Calls into the backend, turning a panic into a [`BackendError::Panicked`].
    fn invoke<F>(&self, op: F) -> ExecResult
    where
        F: FnOnce(&dyn Executor) -> ExecResult,
    {
        let executor = self.executor.as_ref();

        panic::catch_unwind(AssertUnwindSafe(|| op(executor))).unwrap_or_else(|payload| {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());

            tracing::error!(backend = executor.name(), %message, "backend panicked");
            Err(BackendError::Panicked(message))
        })
    }
}
