#![doc(issue_tracker_base_url = "https://github.com/chainbound/throttle-rs/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

pub mod command;
pub mod dummynet;
pub mod executor;
pub mod interface;
pub mod tc;

pub use executor::{
    select_executor, BackendError, ExecReport, ExecResult, ExecStatus, Executor, Platform,
};
pub use interface::{InterfaceProbe, StaticInterfaces, SystemInterfaces};
