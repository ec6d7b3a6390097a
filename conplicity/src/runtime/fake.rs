//! Scriptable in-memory runtime recording every call, for unit tests.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;

use crate::error::{ConplicityError, Result};
use crate::runtime::{ContainerHandle, ContainerRuntime, ContainerSpec, ContainerStatus, LogStream};
use crate::utils::context::CallContext;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    ImageExists(String),
    PullImage(String),
    Create(ContainerSpec),
    Start(String),
    Logs(String),
    Inspect(String),
    Remove(String),
}

/// How one container behaves once started.
#[derive(Debug, Clone)]
pub(crate) struct Script {
    pub fail_create: bool,
    pub fail_start: bool,
    pub log_chunks: Vec<String>,
    /// Ends the log stream with a transport error after `log_chunks`.
    pub log_error: bool,
    pub fail_inspect: bool,
    pub exit_code: Option<i64>,
    /// Cancels the caller's context while logs are being read.
    pub cancel_during_logs: bool,
    /// Keeps the log stream open until the caller's context is done.
    pub hang_logs: bool,
    /// Inspect reports the container as still running.
    pub still_running: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            fail_create: false,
            fail_start: false,
            log_chunks: Vec::new(),
            log_error: false,
            fail_inspect: false,
            exit_code: Some(0),
            cancel_during_logs: false,
            hang_logs: false,
            still_running: false,
        }
    }
}

impl Script {
    pub fn exiting(code: i64) -> Self {
        Self {
            exit_code: Some(code),
            ..Default::default()
        }
    }
}

#[derive(Default)]
pub(crate) struct FakeRuntime {
    images: HashSet<String>,
    scripts: Mutex<VecDeque<Script>>,
    current: Mutex<Option<Script>>,
    calls: Mutex<Vec<Call>>,
    removal_contexts_live: Mutex<Vec<bool>>,
    next_id: Mutex<u32>,
}

impl FakeRuntime {
    pub fn with_image(mut self, image: &str) -> Self {
        self.images.insert(image.to_string());
        self
    }

    /// Queues the behavior of the next created container. Containers without
    /// a queued script succeed with exit code 0 and no output.
    pub fn with_script(self, script: Script) -> Self {
        self.scripts.lock().unwrap().push_back(script);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    pub fn created_specs(&self) -> Vec<ContainerSpec> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Create(spec) => Some(spec),
                _ => None,
            })
            .collect()
    }

    /// Whether each removal was issued with a context that was still live.
    pub fn removal_contexts_live(&self) -> Vec<bool> {
        self.removal_contexts_live.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn script(&self) -> Script {
        self.current.lock().unwrap().clone().unwrap_or_default()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn image_exists(&self, _ctx: &CallContext, image: &str) -> Result<bool> {
        self.record(Call::ImageExists(image.to_string()));
        Ok(self.images.contains(image))
    }

    async fn pull_image(&self, _ctx: &CallContext, image: &str) -> Result<()> {
        self.record(Call::PullImage(image.to_string()));
        Ok(())
    }

    async fn create_container(
        &self,
        ctx: &CallContext,
        spec: &ContainerSpec,
    ) -> Result<ContainerHandle> {
        self.record(Call::Create(spec.clone()));
        let script = self.scripts.lock().unwrap().pop_front().unwrap_or_default();
        let fail = script.fail_create;
        *self.current.lock().unwrap() = Some(script);
        ctx.run("create_container", async {
            if fail {
                return Err(ConplicityError::runtime("create_container", "no such image"));
            }
            let id = {
                let mut next_id = self.next_id.lock().unwrap();
                *next_id += 1;
                *next_id
            };
            Ok(ContainerHandle::new(format!("container-{id}")))
        })
        .await
    }

    async fn start_container(&self, ctx: &CallContext, handle: &ContainerHandle) -> Result<()> {
        self.record(Call::Start(handle.id.clone()));
        let fail = self.script().fail_start;
        ctx.run("start_container", async {
            if fail {
                return Err(ConplicityError::runtime("start_container", "bind source missing"));
            }
            Ok(())
        })
        .await
    }

    fn container_logs<'a>(
        &'a self,
        ctx: &'a CallContext,
        handle: &'a ContainerHandle,
    ) -> LogStream<'a> {
        self.record(Call::Logs(handle.id.clone()));
        let script = self.script();
        if script.cancel_during_logs {
            ctx.cancel();
            return ctx.bind_stream("container_logs", stream::pending());
        }
        if script.hang_logs {
            return ctx.bind_stream("container_logs", stream::pending());
        }
        let mut items: Vec<Result<String>> = script.log_chunks.into_iter().map(Ok).collect();
        if script.log_error {
            items.push(Err(ConplicityError::runtime(
                "container_logs",
                "connection reset by peer",
            )));
        }
        stream::iter(items).boxed()
    }

    async fn inspect_container(
        &self,
        _ctx: &CallContext,
        handle: &ContainerHandle,
    ) -> Result<ContainerStatus> {
        self.record(Call::Inspect(handle.id.clone()));
        let script = self.script();
        if script.fail_inspect {
            return Err(ConplicityError::runtime("inspect_container", "daemon went away"));
        }
        Ok(ContainerStatus {
            running: script.still_running,
            exit_code: script.exit_code,
        })
    }

    async fn remove_container(&self, ctx: &CallContext, handle: &ContainerHandle) -> Result<()> {
        self.record(Call::Remove(handle.id.clone()));
        self.removal_contexts_live
            .lock()
            .unwrap()
            .push(!ctx.is_done());
        Ok(())
    }
}
