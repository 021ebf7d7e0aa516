//! Serialized access to a [`Controller`].
//!
//! [`ThrottlerService::spawn`] moves the controller onto a dedicated OS thread. Requests arrive
//! over a channel and are served one at a time: a start or stop, including its backend commands
//! and the status record write, completes before the next request is looked at.

use std::thread::JoinHandle;

use serde_json::Value;
use throttle_common::ThrottlerConfig;
use throttle_exec::ExecResult;
use tokio::sync::{mpsc, oneshot};

use crate::{
    controller::Controller,
    error::{Error, Result},
    status::{StatusReport, Transition},
    store::StatusStore,
};

/// How many requests may queue up before callers wait.
const DEFAULT_BUFFER_SIZE: usize = 32;

#[derive(Debug)]
enum Request {
    Start(Box<ThrottlerConfig>, oneshot::Sender<Result<Transition>>),
    StartValue(Value, oneshot::Sender<Result<Transition>>),
    Stop(oneshot::Sender<Result<Transition>>),
    Status(oneshot::Sender<StatusReport>),
    Check(oneshot::Sender<ExecResult>),
    List(oneshot::Sender<ExecResult>),
    Exists(oneshot::Sender<ExecResult>),
    Profiles(oneshot::Sender<Vec<Value>>),
    CurrentConfig(oneshot::Sender<Option<ThrottlerConfig>>),
}

impl Request {
    fn name(&self) -> &'static str {
        match self {
            Self::Start(..) => "start",
            Self::StartValue(..) => "start_value",
            Self::Stop(_) => "stop",
            Self::Status(_) => "status",
            Self::Check(_) => "check",
            Self::List(_) => "list",
            Self::Exists(_) => "exists",
            Self::Profiles(_) => "profiles",
            Self::CurrentConfig(_) => "current_config",
        }
    }

    fn serve<S: StatusStore>(self, controller: &mut Controller<S>) {
        // A closed reply channel means the caller went away, the work is done regardless.
        let sent = match self {
            Self::Start(config, tx) => tx.send(controller.start(*config)).is_ok(),
            Self::StartValue(value, tx) => tx.send(controller.start_value(&value)).is_ok(),
            Self::Stop(tx) => tx.send(controller.stop()).is_ok(),
            Self::Status(tx) => tx.send(controller.status()).is_ok(),
            Self::Check(tx) => tx.send(controller.check()).is_ok(),
            Self::List(tx) => tx.send(controller.list()).is_ok(),
            Self::Exists(tx) => tx.send(controller.exists()).is_ok(),
            Self::Profiles(tx) => tx.send(controller.profiles().to_vec()).is_ok(),
            Self::CurrentConfig(tx) => tx.send(controller.current_config().cloned()).is_ok(),
        };

        if !sent {
            tracing::debug!("failed to send back response, rx dropped");
        }
    }
}

/// Runs a [`Controller`] on its own thread.
#[derive(Debug)]
pub struct ThrottlerService;

impl ThrottlerService {
    /// Spawns the service thread. It exits once every [`ThrottlerHandle`] is dropped.
    pub fn spawn<S>(controller: Controller<S>) -> (ThrottlerHandle, JoinHandle<()>)
    where
        S: StatusStore + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<Request>(DEFAULT_BUFFER_SIZE);

        let handle = std::thread::spawn(move || {
            let mut controller = controller;

            while let Some(request) = rx.blocking_recv() {
                let _span = tracing::debug_span!("throttler job", request = request.name()).entered();
                request.serve(&mut controller);
            }

            tracing::debug!("all handles dropped, throttler service exiting");
        });

        (ThrottlerHandle { tx }, handle)
    }
}

/// A cloneable handle to a running [`ThrottlerService`].
#[derive(Debug, Clone)]
pub struct ThrottlerHandle {
    tx: mpsc::Sender<Request>,
}

impl ThrottlerHandle {
    async fn request<T>(&self, request: impl FnOnce(oneshot::Sender<T>) -> Request) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(request(tx)).await.map_err(|_| Error::ServiceClosed)?;
        rx.await.map_err(|_| Error::ServiceClosed)
    }

    pub async fn start(&self, config: ThrottlerConfig) -> Result<Transition> {
        self.request(|tx| Request::Start(Box::new(config), tx)).await?
    }

    pub async fn start_value(&self, value: Value) -> Result<Transition> {
        self.request(|tx| Request::StartValue(value, tx)).await?
    }

    pub async fn stop(&self) -> Result<Transition> {
        self.request(Request::Stop).await?
    }

    pub async fn status(&self) -> Result<StatusReport> {
        self.request(Request::Status).await
    }

    pub async fn check(&self) -> Result<Option<String>> {
        Ok(self.request(Request::Check).await??)
    }

    pub async fn list(&self) -> Result<Option<String>> {
        Ok(self.request(Request::List).await??)
    }

    pub async fn exists(&self) -> Result<Option<String>> {
        Ok(self.request(Request::Exists).await??)
    }

    pub async fn profiles(&self) -> Result<Vec<Value>> {
        self.request(Request::Profiles).await
    }

    pub async fn current_config(&self) -> Result<Option<ThrottlerConfig>> {
        self.request(Request::CurrentConfig).await
    }
}
