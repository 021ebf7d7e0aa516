#![doc(issue_tracker_base_url = "https://github.com/chainbound/throttle-rs/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

pub mod controller;
pub mod error;
pub mod service;
pub mod settings;
pub mod status;
pub mod store;
pub mod validate;

pub use controller::Controller;
pub use error::{Error, Result};
pub use service::{ThrottlerHandle, ThrottlerService};
pub use settings::Settings;
pub use status::{Response, StatusRecord, StatusReport, ThrottlerState, ThrottlerStatus, Transition};
pub use store::{FileStore, MemoryStore, StatusStore, StoreError};
pub use validate::{ValidationError, Validator, Violation};

pub use throttle_common::ThrottlerConfig;
pub use throttle_exec::{ExecReport, ExecResult, ExecStatus, Executor, Platform};
