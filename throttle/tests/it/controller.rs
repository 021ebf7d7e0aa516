use std::{fs, io};

use serde_json::json;
use throttle::{
    Controller, Error, ExecStatus, FileStore, MemoryStore, Response, StatusRecord, StatusStore,
    StoreError, ThrottlerConfig, ThrottlerState, ThrottlerStatus, Validator,
};
use throttle_exec::{BackendError, StaticInterfaces};

use crate::mock::{Call, MockExecutor};

fn validator() -> Validator {
    Validator::new(StaticInterfaces::new(["eth0", "eth1"]))
}

fn controller<S: StatusStore>(store: S, executor: &MockExecutor) -> Controller<S> {
    Controller::init(Vec::new(), store, executor.boxed()).with_validator(validator())
}

fn config_a() -> ThrottlerConfig {
    ThrottlerConfig::new("eth0").latency(100).bandwidth(1024).packet_loss(1.0)
}

fn config_b() -> ThrottlerConfig {
    ThrottlerConfig::new("eth1").latency(300).jitter(20).packet_loss(5.5).packet_corruption(0.1)
}

/// Reads like a store, refuses every write.
#[derive(Debug, Clone, Default)]
struct ReadOnlyStore(MemoryStore);

impl StatusStore for ReadOnlyStore {
    fn load(&self) -> Result<Option<StatusRecord>, StoreError> {
        self.0.load()
    }

    fn save(&self, _record: &StatusRecord) -> Result<(), StoreError> {
        Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only file system").into())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.0.clear()
    }
}

#[test]
fn fresh_controller_is_initialized() {
    let _ = tracing_subscriber::fmt::try_init();

    let executor = MockExecutor::new();
    let controller = controller(MemoryStore::new(), &executor);

    assert_eq!(controller.throttler_status(), ThrottlerStatus::Initialized);
    assert!(controller.current_config().is_none());
    assert!(executor.calls().is_empty());
}

#[test]
fn invalid_config_changes_nothing() {
    let _ = tracing_subscriber::fmt::try_init();

    let executor = MockExecutor::new();
    let store = MemoryStore::new();
    let mut controller = controller(store.clone(), &executor);

    let err = controller.start(ThrottlerConfig::new("wlan9").latency(10)).unwrap_err();

    let Error::Validation(e) = &err else { panic!("expected a validation error, got {err:?}") };
    assert_eq!(e.violations().len(), 1);
    assert_eq!(err.to_string(), "Configuration has following error(s): wlan9 is invalid network interface;");

    assert_eq!(controller.throttler_status(), ThrottlerStatus::Initialized);
    assert!(executor.calls().is_empty());
    assert!(store.raw().is_none());
}

#[test]
fn invalid_value_reports_every_violation() {
    let _ = tracing_subscriber::fmt::try_init();

    let executor = MockExecutor::new();
    let mut controller = controller(MemoryStore::new(), &executor);

    let err = controller
        .start_value(&json!({"latency": -5, "bandwidth": "fast", "packetLoss": 2}))
        .unwrap_err();

    let Error::Validation(e) = &err else { panic!("expected a validation error, got {err:?}") };
    assert_eq!(e.violations().len(), 3);
    assert!(executor.calls().is_empty());
}

#[test]
fn stop_without_start_fails() {
    let _ = tracing_subscriber::fmt::try_init();

    let executor = MockExecutor::new();
    let mut controller = controller(MemoryStore::new(), &executor);

    let err = controller.stop().unwrap_err();
    assert!(matches!(err, Error::NothingToStop));

    let response = Response::from(Err(err));
    assert_eq!(response.status, ExecStatus::Failed);
    assert_eq!(response.message, "Throttler wasn't started");

    assert_eq!(controller.throttler_status(), ThrottlerStatus::Initialized);
    assert!(executor.calls().is_empty());
}

#[test]
fn start_then_stop() {
    let _ = tracing_subscriber::fmt::try_init();

    let executor = MockExecutor::new();
    let store = MemoryStore::new();
    let mut controller = controller(store.clone(), &executor);

    let started = controller.start(config_a()).unwrap();
    assert_eq!(started.message, "Throttler was started");
    assert_eq!(
        started.state,
        ThrottlerState { status: ThrottlerStatus::Started, config: Some(config_a()) }
    );
    assert_eq!(store.load().unwrap(), Some(StatusRecord::started(config_a())));

    let stopped = controller.stop().unwrap();
    assert_eq!(stopped.message, "Throttler was stopped");
    assert_eq!(stopped.state, ThrottlerState { status: ThrottlerStatus::Stopped, config: None });
    assert!(store.raw().is_none());

    assert_eq!(executor.calls(), vec![Call::Start(config_a()), Call::Stop(config_a())]);

    // A second stop has nothing left to remove.
    assert!(matches!(controller.stop(), Err(Error::NothingToStop)));
    assert_eq!(controller.throttler_status(), ThrottlerStatus::Stopped);
}

#[test]
fn restart_stops_previous_config_first() {
    let _ = tracing_subscriber::fmt::try_init();

    let executor = MockExecutor::new();
    let store = MemoryStore::new();
    let mut controller = controller(store.clone(), &executor);

    controller.start(config_a()).unwrap();
    let restarted = controller.start(config_b()).unwrap();

    assert_eq!(restarted.message, "Throttler was re-started");
    assert_eq!(restarted.state.config, Some(config_b()));
    assert_eq!(
        executor.calls(),
        vec![Call::Start(config_a()), Call::Stop(config_a()), Call::Start(config_b())]
    );
    assert_eq!(store.load().unwrap(), Some(StatusRecord::started(config_b())));
}

#[test]
fn start_after_stop_is_not_a_restart() {
    let _ = tracing_subscriber::fmt::try_init();

    let executor = MockExecutor::new();
    let mut controller = controller(MemoryStore::new(), &executor);

    controller.start(config_a()).unwrap();
    controller.stop().unwrap();

    let started = controller.start(config_b()).unwrap();
    assert_eq!(started.message, "Throttler was started");
}

#[test]
fn failed_implicit_stop_keeps_running_config() {
    let _ = tracing_subscriber::fmt::try_init();

    let executor = MockExecutor::new();
    let store = MemoryStore::new();
    let mut controller = controller(store.clone(), &executor);

    controller.start(config_a()).unwrap();
    executor.fail_stop(true);

    let err = controller.start(config_b()).unwrap_err();
    assert!(matches!(err, Error::Backend(BackendError::Rejected(_))));
    assert_eq!(err.to_string(), "Cannot delete qdisc with handle of zero");

    // B was never applied.
    assert_eq!(executor.calls(), vec![Call::Start(config_a()), Call::Stop(config_a())]);
    assert_eq!(
        controller.state(),
        ThrottlerState { status: ThrottlerStatus::Started, config: Some(config_a()) }
    );
    assert_eq!(store.load().unwrap(), Some(StatusRecord::started(config_a())));
}

#[test]
fn restart_with_failed_start_leaves_stopped() {
    let _ = tracing_subscriber::fmt::try_init();

    let executor = MockExecutor::new();
    let store = MemoryStore::new();
    let mut controller = controller(store.clone(), &executor);

    controller.start(config_a()).unwrap();
    executor.fail_start(true);

    let err = controller.start(config_b()).unwrap_err();
    assert!(matches!(err, Error::Backend(BackendError::Rejected(_))));

    // A was torn down before B failed, nothing is applied anymore.
    assert_eq!(
        executor.calls(),
        vec![Call::Start(config_a()), Call::Stop(config_a()), Call::Start(config_b())]
    );
    assert_eq!(controller.state(), ThrottlerState { status: ThrottlerStatus::Stopped, config: None });
    assert!(store.raw().is_none());

    // The next start is a plain start.
    executor.fail_start(false);
    assert_eq!(controller.start(config_b()).unwrap().message, "Throttler was started");
}

#[test]
fn failed_backend_start_changes_nothing() {
    let _ = tracing_subscriber::fmt::try_init();

    let executor = MockExecutor::new();
    let store = MemoryStore::new();
    let mut controller = controller(store.clone(), &executor);
    executor.fail_start(true);

    let response = Response::from(controller.start(config_a()));
    assert_eq!(response.status, ExecStatus::Failed);
    assert_eq!(response.message, "RTNETLINK answers: Operation not permitted");
    assert!(response.throttler_status.is_none());

    assert_eq!(controller.throttler_status(), ThrottlerStatus::Initialized);
    assert!(store.raw().is_none());
}

#[test]
fn failed_stop_keeps_record() {
    let _ = tracing_subscriber::fmt::try_init();

    let executor = MockExecutor::new();
    let store = MemoryStore::new();
    let mut controller = controller(store.clone(), &executor);

    controller.start(config_a()).unwrap();
    executor.fail_stop(true);

    assert!(matches!(controller.stop(), Err(Error::Backend(_))));
    assert_eq!(controller.throttler_status(), ThrottlerStatus::Started);
    assert_eq!(store.load().unwrap(), Some(StatusRecord::started(config_a())));
}

#[test]
fn backend_panic_is_a_failure() {
    let _ = tracing_subscriber::fmt::try_init();

    let executor = MockExecutor::new();
    let mut controller = controller(MemoryStore::new(), &executor);
    executor.panic_on_start(true);

    let err = controller.start(config_a()).unwrap_err();
    let Error::Backend(BackendError::Panicked(message)) = &err else {
        panic!("expected a backend panic, got {err:?}")
    };
    assert_eq!(message, "mock backend exploded");
    assert_eq!(controller.throttler_status(), ThrottlerStatus::Initialized);

    // The controller is still usable.
    executor.panic_on_start(false);
    controller.start(config_a()).unwrap();
}

#[test]
fn persistence_failure_rolls_back_backend() {
    let _ = tracing_subscriber::fmt::try_init();

    let executor = MockExecutor::new();
    let mut controller = controller(ReadOnlyStore::default(), &executor);

    let err = controller.start(config_a()).unwrap_err();
    assert!(matches!(err, Error::Persistence(StoreError::Io(_))));

    assert_eq!(executor.calls(), vec![Call::Start(config_a()), Call::Stop(config_a())]);
    assert_eq!(
        controller.state(),
        ThrottlerState { status: ThrottlerStatus::Initialized, config: None }
    );
}

#[test]
fn state_survives_reinit() {
    let _ = tracing_subscriber::fmt::try_init();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("conf").join("throttlerStatus.json");
    let executor = MockExecutor::new();

    let mut first = controller(FileStore::new(&path), &executor);
    first.start(config_b()).unwrap();
    drop(first);

    let mut second = controller(FileStore::new(&path), &executor);
    assert_eq!(
        second.state(),
        ThrottlerState { status: ThrottlerStatus::Started, config: Some(config_b()) }
    );

    // Stopping the restored config talks to the backend with it.
    executor.clear_calls();
    second.stop().unwrap();
    assert_eq!(executor.calls(), vec![Call::Stop(config_b())]);
    assert!(!path.exists());
    drop(second);

    let third = controller(FileStore::new(&path), &executor);
    assert_eq!(third.state(), ThrottlerState { status: ThrottlerStatus::Initialized, config: None });
}

#[test]
fn corrupt_record_is_removed_at_init() {
    let _ = tracing_subscriber::fmt::try_init();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("throttlerStatus.json");
    fs::write(&path, r#"{"conf": {"latency": 1"#).unwrap();

    let controller = controller(FileStore::new(&path), &MockExecutor::new());

    assert_eq!(controller.throttler_status(), ThrottlerStatus::Initialized);
    assert!(controller.current_config().is_none());
    assert!(!path.exists());
}

#[test]
fn inconsistent_record_is_removed_at_init() {
    let _ = tracing_subscriber::fmt::try_init();

    let store = MemoryStore::new();
    store.set_raw(r#"{"conf": null, "status": "Started"}"#);

    let controller = controller(store.clone(), &MockExecutor::new());

    assert_eq!(controller.throttler_status(), ThrottlerStatus::Initialized);
    assert!(store.raw().is_none());
}

#[test]
fn legacy_record_is_restored() {
    let _ = tracing_subscriber::fmt::try_init();

    let store = MemoryStore::new();
    store.set_raw(r#"{"conf": null, "status": "Initilized"}"#);

    let controller = controller(store, &MockExecutor::new());

    assert_eq!(controller.throttler_status(), ThrottlerStatus::Initialized);
}

#[test]
fn status_includes_backend_listing() {
    let _ = tracing_subscriber::fmt::try_init();

    let executor = MockExecutor::new();
    let mut controller = controller(MemoryStore::new(), &executor);
    controller.start(config_a()).unwrap();

    let report = controller.status();
    assert_eq!(report.status, ThrottlerStatus::Started);
    assert_eq!(report.config, Some(config_a()));
    assert!(report.shell_output.unwrap().starts_with("qdisc netem"));

    executor.fail_list(true);
    let report = controller.status();
    assert_eq!(report.status, ThrottlerStatus::Started);
    assert!(report.shell_output.is_none());

    let json = serde_json::to_value(&report).unwrap();
    assert!(json.get("shellOutput").is_none());
}

#[test]
fn queries_pass_through_to_backend() {
    let _ = tracing_subscriber::fmt::try_init();

    let executor = MockExecutor::new();
    let controller = controller(MemoryStore::new(), &executor);

    assert!(controller.check().unwrap().is_some());
    assert!(controller.exists().unwrap().unwrap().contains("iproute2"));

    executor.fail_list(true);
    assert!(controller.list().is_err());

    assert_eq!(executor.calls(), vec![Call::Check, Call::Exists, Call::List]);
}

#[test]
fn start_from_profile() {
    let _ = tracing_subscriber::fmt::try_init();

    let profiles = vec![json!({
        "name": "3G",
        "latency": 200,
        "bandwidth": 750,
        "packetLoss": 1,
        "netInterface": "eth0",
    })];
    let executor = MockExecutor::new();
    let mut controller =
        Controller::init(profiles, MemoryStore::new(), executor.boxed()).with_validator(validator());

    let profile = controller.profiles()[0].clone();
    let started = controller.start_value(&profile).unwrap();

    let expected = ThrottlerConfig::new("eth0").latency(200).bandwidth(750).packet_loss(1.0);
    assert_eq!(started.state.config, Some(expected.clone()));
    assert_eq!(executor.calls(), vec![Call::Start(expected)]);
}
