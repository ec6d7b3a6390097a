//! Drives one duplicity execution inside a transient container.
//!
//! A run creates exactly one container and always removes it before
//! returning. Creation and start failures abort the run; losing the logs or
//! the final state only degrades the [`RunResult`].

use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::backup::env::{compose_environment, environment_keys};
use crate::config::RunConfiguration;
use crate::error::{ConplicityError, Result};
use crate::runtime::{BindMount, ContainerHandle, ContainerRuntime, ContainerSpec};
use crate::utils::context::{CLEANUP_TIMEOUT, CallContext};

/// Exit code reported when the runtime could not tell how the run ended.
/// Real exit codes are in `0..=255`.
pub const UNKNOWN_EXIT_CODE: i64 = -1;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupCommand {
    pub args: Vec<String>,
    pub binds: Vec<BindMount>,
}

impl BackupCommand {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            binds: Vec::new(),
        }
    }

    pub fn bind(mut self, mount: BindMount) -> Self {
        self.binds.push(mount);
        self
    }
}

#[derive(Debug)]
pub struct RunResult {
    pub exit_code: i64,
    /// Combined stdout/stderr. May be partial if log capture failed.
    pub output: String,
    /// Observability failures hit during the run.
    pub warnings: Vec<ConplicityError>,
}

impl RunResult {
    fn pending() -> Self {
        Self {
            exit_code: UNKNOWN_EXIT_CODE,
            output: String::new(),
            warnings: Vec::new(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }

    pub fn exit_code_known(&self) -> bool {
        (0..=255).contains(&self.exit_code)
    }
}

pub struct Supervisor {
    runtime: Arc<dyn ContainerRuntime>,
    config: Arc<RunConfiguration>,
}

impl Supervisor {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: Arc<RunConfiguration>) -> Self {
        Self { runtime, config }
    }

    pub fn config(&self) -> &RunConfiguration {
        &self.config
    }

    pub async fn run(&self, ctx: &CallContext, command: BackupCommand) -> Result<RunResult> {
        let ctx = match self.config.run_timeout {
            Some(timeout) => ctx.child_with_timeout(timeout),
            None => ctx.clone(),
        };

        let spec = ContainerSpec {
            image: self.config.image.clone(),
            env: compose_environment(&self.config),
            cmd: command.args,
            binds: command.binds,
            interactive: true,
        };

        debug!(
            image = %spec.image,
            command = %spec.cmd.join(" "),
            environment = %environment_keys(&spec.env).join(", "),
            "Creating container"
        );

        let handle = self
            .runtime
            .create_container(&ctx, &spec)
            .await
            .map_err(|e| ConplicityError::provisioning("create", e))?;
        let lease = ContainerLease::new(self.runtime.clone(), handle);

        let outcome = self.drive(&ctx, lease.handle(), &spec.cmd).await;
        lease.release(&ctx).await;
        outcome
    }

    async fn drive(
        &self,
        ctx: &CallContext,
        handle: &ContainerHandle,
        cmd: &[String],
    ) -> Result<RunResult> {
        debug!(container = %handle, "Launching 'duplicity {}'", cmd.join(" "));
        self.runtime
            .start_container(ctx, handle)
            .await
            .map_err(|e| ConplicityError::provisioning("start", e))?;

        let mut result = RunResult::pending();

        let mut logs = self.runtime.container_logs(ctx, handle);
        while let Some(chunk) = logs.next().await {
            match chunk {
                Ok(chunk) => result.output.push_str(&chunk),
                Err(e) => {
                    warn!(container = %handle, error = %e, "Failed to retrieve logs");
                    result.warnings.push(ConplicityError::LogCapture {
                        source: Box::new(e),
                    });
                    break;
                }
            }
        }
        drop(logs);

        // The run may have been cut short by the deadline; the state is still
        // worth reading.
        let inspect_ctx = ctx.cleanup_context();
        match self.runtime.inspect_container(&inspect_ctx, handle).await {
            // The exit code of a running container is a placeholder.
            Ok(status) if status.running => {
                warn!(container = %handle, "Container still running, exit code unknown");
                result.warnings.push(ConplicityError::StillRunning {
                    container: handle.to_string(),
                });
            }
            Ok(status) => match status.exit_code {
                Some(code) => result.exit_code = code,
                None => warn!(container = %handle, "Runtime reported no exit code"),
            },
            Err(e) => {
                warn!(container = %handle, error = %e, "Failed to inspect container");
                result.warnings.push(ConplicityError::Inspect {
                    source: Box::new(e),
                });
            }
        }

        debug!(container = %handle, exit_code = result.exit_code, "{}", result.output);
        Ok(result)
    }
}

async fn remove_quietly(runtime: &dyn ContainerRuntime, ctx: &CallContext, handle: &ContainerHandle) {
    info!(container = %handle, "Removing container");
    if let Err(e) = runtime.remove_container(ctx, handle).await {
        warn!(container = %handle, error = %e, "Failed to remove container");
    }
}

/// Owns a created container until it is removed.
///
/// `release` is the normal path. If the lease is dropped without it, e.g.
/// because the run future was dropped, removal is spawned onto the current
/// tokio runtime.
struct ContainerLease {
    runtime: Arc<dyn ContainerRuntime>,
    handle: ContainerHandle,
    armed: bool,
}

impl ContainerLease {
    fn new(runtime: Arc<dyn ContainerRuntime>, handle: ContainerHandle) -> Self {
        Self {
            runtime,
            handle,
            armed: true,
        }
    }

    fn handle(&self) -> &ContainerHandle {
        &self.handle
    }

    async fn release(mut self, ctx: &CallContext) {
        self.armed = false;
        remove_quietly(self.runtime.as_ref(), &ctx.cleanup_context(), &self.handle).await;
    }
}

impl Drop for ContainerLease {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let handle = self.handle.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                let runtime = self.runtime.clone();
                rt.spawn(async move {
                    let ctx = CallContext::with_timeout(CLEANUP_TIMEOUT);
                    remove_quietly(runtime.as_ref(), &ctx, &handle).await;
                });
            }
            Err(_) => warn!(container = %handle, "No async runtime left, container not removed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::ErrorKind;
    use crate::runtime::fake::{Call, FakeRuntime, Script};

    fn supervisor(runtime: Arc<FakeRuntime>) -> Supervisor {
        let config = RunConfiguration {
            image: "camptocamp/duplicity:latest".into(),
            ..Default::default()
        };
        Supervisor::new(runtime, Arc::new(config))
    }

    fn command() -> BackupCommand {
        BackupCommand::new(["--name", "vol1", "/var/backups/vol1", "s3://bucket/host1/vol1"])
            .bind(BindMount::read_only("/srv/vol1", "/var/backups/vol1"))
    }

    fn creates_and_removes(runtime: &FakeRuntime) -> (usize, usize) {
        (
            runtime.count(|c| matches!(c, Call::Create(_))),
            runtime.count(|c| matches!(c, Call::Remove(_))),
        )
    }

    #[tokio::test]
    async fn test_run_returns_exit_code_and_output() {
        let runtime = Arc::new(FakeRuntime::default().with_script(Script {
            log_chunks: vec!["Local and Remote metadata are synchronized\n".into(), "done\n".into()],
            exit_code: Some(0),
            ..Default::default()
        }));
        let result = supervisor(runtime.clone())
            .run(&CallContext::background(), command())
            .await
            .unwrap();

        assert_eq!(result.exit_code, 0);
        assert!(result.succeeded());
        assert_eq!(result.output, "Local and Remote metadata are synchronized\ndone\n");
        assert!(result.warnings.is_empty());
        assert_eq!(
            runtime.calls()[1..].to_vec(),
            vec![
                Call::Start("container-1".into()),
                Call::Logs("container-1".into()),
                Call::Inspect("container-1".into()),
                Call::Remove("container-1".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_run_creates_interactive_container_with_env_and_binds() {
        let runtime = Arc::new(FakeRuntime::default());
        supervisor(runtime.clone())
            .run(&CallContext::background(), command())
            .await
            .unwrap();

        let specs = runtime.created_specs();
        assert_eq!(specs.len(), 1);
        let spec = &specs[0];
        assert_eq!(spec.image, "camptocamp/duplicity:latest");
        assert!(spec.interactive);
        assert_eq!(spec.cmd[0], "--name");
        assert_eq!(spec.env.len(), 8);
        assert_eq!(spec.binds, vec![BindMount::read_only("/srv/vol1", "/var/backups/vol1")]);
    }

    #[tokio::test]
    async fn test_log_failure_keeps_exit_code_and_removes_container() {
        let runtime = Arc::new(FakeRuntime::default().with_script(Script {
            log_chunks: vec!["partial".into()],
            log_error: true,
            exit_code: Some(0),
            ..Default::default()
        }));
        let result = supervisor(runtime.clone())
            .run(&CallContext::background(), command())
            .await
            .unwrap();

        assert_eq!(result.exit_code, 0);
        assert_eq!(result.output, "partial");
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].kind(), ErrorKind::Observability);
        assert_eq!(creates_and_removes(&runtime), (1, 1));
    }

    #[tokio::test]
    async fn test_inspect_failure_leaves_sentinel_exit_code() {
        let runtime = Arc::new(FakeRuntime::default().with_script(Script {
            fail_inspect: true,
            ..Default::default()
        }));
        let result = supervisor(runtime.clone())
            .run(&CallContext::background(), command())
            .await
            .unwrap();

        assert_eq!(result.exit_code, UNKNOWN_EXIT_CODE);
        assert!(!result.exit_code_known());
        assert!(!result.succeeded());
        assert_eq!(result.warnings[0].kind(), ErrorKind::Observability);
        assert_eq!(creates_and_removes(&runtime), (1, 1));
    }

    #[tokio::test]
    async fn test_start_failure_is_fatal_but_container_is_removed() {
        let runtime = Arc::new(FakeRuntime::default().with_script(Script {
            fail_start: true,
            ..Default::default()
        }));
        let err = supervisor(runtime.clone())
            .run(&CallContext::background(), command())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::RuntimeProvisioning);
        assert!(err.to_string().starts_with("failed to start container"));
        assert_eq!(creates_and_removes(&runtime), (1, 1));
        assert_eq!(runtime.count(|c| matches!(c, Call::Logs(_))), 0);
    }

    #[tokio::test]
    async fn test_create_failure_has_nothing_to_remove() {
        let runtime = Arc::new(FakeRuntime::default().with_script(Script {
            fail_create: true,
            ..Default::default()
        }));
        let err = supervisor(runtime.clone())
            .run(&CallContext::background(), command())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::RuntimeProvisioning);
        assert_eq!(creates_and_removes(&runtime), (1, 0));
    }

    #[tokio::test]
    async fn test_cancelled_run_removes_with_fresh_context() {
        let runtime = Arc::new(FakeRuntime::default().with_script(Script {
            cancel_during_logs: true,
            exit_code: Some(137),
            ..Default::default()
        }));
        let ctx = CallContext::background();
        let result = supervisor(runtime.clone()).run(&ctx, command()).await.unwrap();

        assert!(ctx.is_done());
        assert_eq!(result.exit_code, 137);
        assert_eq!(result.warnings[0].kind(), ErrorKind::Observability);
        assert_eq!(runtime.removal_contexts_live(), vec![true]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_timeout_with_container_still_running_is_not_a_success() {
        let runtime = Arc::new(FakeRuntime::default().with_script(Script {
            hang_logs: true,
            still_running: true,
            exit_code: Some(0),
            ..Default::default()
        }));
        let config = RunConfiguration {
            image: "camptocamp/duplicity:latest".into(),
            run_timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        };
        let supervisor = Supervisor::new(runtime.clone(), Arc::new(config));

        let result = supervisor.run(&CallContext::background(), command()).await.unwrap();

        assert_eq!(result.exit_code, UNKNOWN_EXIT_CODE);
        assert!(!result.succeeded());
        let kinds: Vec<_> = result.warnings.iter().map(ConplicityError::kind).collect();
        assert_eq!(kinds, vec![ErrorKind::Observability, ErrorKind::Observability]);
        assert!(matches!(
            result.warnings[1],
            ConplicityError::StillRunning { .. }
        ));
        assert_eq!(creates_and_removes(&runtime), (1, 1));
        assert_eq!(runtime.removal_contexts_live(), vec![true]);
    }

    #[tokio::test]
    async fn test_cancelled_before_create_is_reported_as_cancellation() {
        let runtime = Arc::new(FakeRuntime::default());
        let ctx = CallContext::background();
        ctx.cancel();

        let err = supervisor(runtime.clone()).run(&ctx, command()).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(creates_and_removes(&runtime), (1, 0));
    }

    #[tokio::test]
    async fn test_one_removal_per_creation_across_runs() {
        let runtime = Arc::new(
            FakeRuntime::default()
                .with_script(Script::exiting(0))
                .with_script(Script {
                    log_error: true,
                    ..Default::default()
                })
                .with_script(Script {
                    fail_start: true,
                    ..Default::default()
                })
                .with_script(Script {
                    fail_inspect: true,
                    ..Default::default()
                }),
        );
        let supervisor = supervisor(runtime.clone());
        for _ in 0..4 {
            let _ = supervisor.run(&CallContext::background(), command()).await;
        }
        assert_eq!(creates_and_removes(&runtime), (4, 4));
    }

    #[tokio::test]
    async fn test_dropped_lease_removes_in_background() {
        let runtime = Arc::new(FakeRuntime::default());
        let lease = ContainerLease::new(runtime.clone(), ContainerHandle::new("orphan"));
        drop(lease);

        for _ in 0..50 {
            if runtime.count(|c| matches!(c, Call::Remove(_))) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(runtime.calls(), vec![Call::Remove("orphan".into())]);
    }
}
