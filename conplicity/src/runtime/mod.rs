//! Narrow view of the container runtime used by backup runs.
//!
//! Every call takes a [`CallContext`]; implementations must abort in-flight
//! work once it is done. No call is retried at this layer.

pub mod docker;
#[cfg(test)]
pub(crate) mod fake;

use std::fmt;

use futures::stream::BoxStream;
use tracing::{debug, info};

use crate::error::Result;
use crate::utils::context::CallContext;

pub use docker::DockerRuntime;

/// Chunks of combined stdout/stderr, in the order the runtime sent them.
pub type LogStream<'a> = BoxStream<'a, Result<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountMode {
    ReadOnly,
    ReadWrite,
}

impl MountMode {
    fn as_str(self) -> &'static str {
        match self {
            MountMode::ReadOnly => "ro",
            MountMode::ReadWrite => "rw",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub host_path: String,
    pub container_path: String,
    pub mode: MountMode,
}

impl BindMount {
    pub fn read_only(host_path: impl Into<String>, container_path: impl Into<String>) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
            mode: MountMode::ReadOnly,
        }
    }

    pub fn read_write(host_path: impl Into<String>, container_path: impl Into<String>) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
            mode: MountMode::ReadWrite,
        }
    }
}

/// Renders the `host:container:mode` form the Docker API expects.
impl fmt::Display for BindMount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.host_path,
            self.container_path,
            self.mode.as_str()
        )
    }
}

/// Everything needed to create one backup container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    pub cmd: Vec<String>,
    /// `KEY=value` entries.
    pub env: Vec<String>,
    pub binds: Vec<BindMount>,
    /// Attach stdin/stdout/stderr with a TTY, stdin closed after first attach.
    pub interactive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerHandle {
    pub id: String,
}

impl ContainerHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerStatus {
    pub running: bool,
    /// `None` when the runtime did not report one.
    pub exit_code: Option<i64>,
}

#[async_trait::async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn image_exists(&self, ctx: &CallContext, image: &str) -> Result<bool>;

    async fn pull_image(&self, ctx: &CallContext, image: &str) -> Result<()>;

    async fn create_container(&self, ctx: &CallContext, spec: &ContainerSpec)
    -> Result<ContainerHandle>;

    async fn start_container(&self, ctx: &CallContext, handle: &ContainerHandle) -> Result<()>;

    /// Follows stdout and stderr until the container exits and the runtime
    /// closes the stream, each line prefixed with its timestamp. Failing to
    /// open the stream is reported as its first item.
    fn container_logs<'a>(
        &'a self,
        ctx: &'a CallContext,
        handle: &'a ContainerHandle,
    ) -> LogStream<'a>;

    async fn inspect_container(
        &self,
        ctx: &CallContext,
        handle: &ContainerHandle,
    ) -> Result<ContainerStatus>;

    /// Force-removes the container together with its anonymous volumes.
    async fn remove_container(&self, ctx: &CallContext, handle: &ContainerHandle) -> Result<()>;

    /// Pulls `image` unless the runtime already has it.
    async fn ensure_image(&self, ctx: &CallContext, image: &str) -> Result<()> {
        if self.image_exists(ctx, image).await? {
            debug!(image = %image, "Image already pulled, not pulling");
            return Ok(());
        }
        info!(image = %image, "Pulling image");
        self.pull_image(ctx, image).await
    }
}
