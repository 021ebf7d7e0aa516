//! A recording [`Executor`] with switchable failures.

use std::sync::Arc;

use parking_lot::Mutex;
use throttle::{ExecResult, Executor, ThrottlerConfig};
use throttle_exec::BackendError;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Start(ThrottlerConfig),
    Stop(ThrottlerConfig),
    Check,
    List,
    Exists,
}

#[derive(Debug, Default)]
struct Inner {
    calls: Vec<Call>,
    fail_start: bool,
    fail_stop: bool,
    fail_list: bool,
    panic_on_start: bool,
}

/// Clones share the same call log and failure switches.
#[derive(Debug, Clone, Default)]
pub struct MockExecutor {
    inner: Arc<Mutex<Inner>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn boxed(&self) -> Box<dyn Executor> {
        Box::new(self.clone())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.inner.lock().calls.clear();
    }

    pub fn fail_start(&self, fail: bool) {
        self.inner.lock().fail_start = fail;
    }

    pub fn fail_stop(&self, fail: bool) {
        self.inner.lock().fail_stop = fail;
    }

    pub fn fail_list(&self, fail: bool) {
        self.inner.lock().fail_list = fail;
    }

    pub fn panic_on_start(&self, panic: bool) {
        self.inner.lock().panic_on_start = panic;
    }
}

impl Executor for MockExecutor {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn start(&self, config: &ThrottlerConfig) -> ExecResult {
        let (fail, panic) = {
            let mut inner = self.inner.lock();
            inner.calls.push(Call::Start(config.clone()));
            (inner.fail_start, inner.panic_on_start)
        };

        if panic {
            panic!("mock backend exploded");
        }
        if fail {
            return Err(BackendError::Rejected("RTNETLINK answers: Operation not permitted".into()));
        }
        Ok(None)
    }

    fn stop(&self, config: &ThrottlerConfig) -> ExecResult {
        let mut inner = self.inner.lock();
        inner.calls.push(Call::Stop(config.clone()));

        if inner.fail_stop {
            return Err(BackendError::Rejected("Cannot delete qdisc with handle of zero".into()));
        }
        Ok(None)
    }

    fn check(&self) -> ExecResult {
        self.inner.lock().calls.push(Call::Check);
        Ok(Some("qdisc netem 1: dev eth0 root".into()))
    }

    fn list(&self) -> ExecResult {
        let mut inner = self.inner.lock();
        inner.calls.push(Call::List);

        if inner.fail_list {
            return Err(BackendError::Rejected("tc: not found".into()));
        }
        Ok(Some("qdisc netem 1: dev eth0 root refcnt 2 limit 1000 delay 100ms".into()))
    }

    fn exists(&self) -> ExecResult {
        self.inner.lock().calls.push(Call::Exists);
        Ok(Some("tc utility, iproute2-6.1.0".into()))
    }
}
