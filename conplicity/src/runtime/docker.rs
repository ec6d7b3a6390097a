//! [`ContainerRuntime`] over the Docker Engine API, via bollard.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogsOptions, RemoveContainerOptions,
    StartContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::{API_DEFAULT_VERSION, Docker};
use futures::{StreamExt, TryStreamExt};
use tracing::{debug, info};

use crate::error::{ConplicityError, Result};
use crate::runtime::{ContainerHandle, ContainerRuntime, ContainerSpec, ContainerStatus, LogStream};
use crate::utils::context::CallContext;

/// Seconds bollard waits for the daemon to answer a request.
const CLIENT_TIMEOUT_SECS: u64 = 120;

#[derive(Clone, Debug)]
pub struct DockerRuntime {
    docker: Docker,
}

/// How the Docker daemon is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Endpoint {
    Unix(String),
    Http(String),
}

impl Endpoint {
    /// `unix://` URLs and bare paths are sockets, `tcp://` and `http://` are
    /// plain HTTP.
    fn parse(endpoint: &str) -> Self {
        if let Some(addr) = endpoint.strip_prefix("tcp://") {
            Self::Http(format!("http://{addr}"))
        } else if endpoint.starts_with("http://") {
            Self::Http(endpoint.to_string())
        } else {
            Self::Unix(endpoint.strip_prefix("unix://").unwrap_or(endpoint).to_string())
        }
    }
}

impl DockerRuntime {
    pub fn connect(endpoint: &str) -> Result<Self> {
        let connected = match Endpoint::parse(endpoint) {
            Endpoint::Http(url) => {
                Docker::connect_with_http(&url, CLIENT_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
            Endpoint::Unix(path) => {
                Docker::connect_with_unix(&path, CLIENT_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
        };
        let docker = connected
            .map_err(|e| ConplicityError::Config(format!("failed to create Docker client: {e}")))?;

        debug!(endpoint = %endpoint, "Created Docker client");
        Ok(Self { docker })
    }
}

fn logs_options() -> LogsOptions<String> {
    LogsOptions {
        follow: true,
        stdout: true,
        stderr: true,
        timestamps: true,
        tail: "all".to_string(),
        ..Default::default()
    }
}

fn is_not_found(err: &DockerError) -> bool {
    matches!(
        err,
        DockerError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

fn container_config(spec: &ContainerSpec) -> Config<String> {
    Config {
        image: Some(spec.image.clone()),
        cmd: Some(spec.cmd.clone()),
        env: Some(spec.env.clone()),
        open_stdin: Some(spec.interactive),
        stdin_once: Some(spec.interactive),
        attach_stdin: Some(spec.interactive),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        tty: Some(spec.interactive),
        host_config: Some(HostConfig {
            binds: Some(spec.binds.iter().map(ToString::to_string).collect()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn image_exists(&self, ctx: &CallContext, image: &str) -> Result<bool> {
        ctx.run("inspect_image", async {
            match self.docker.inspect_image(image).await {
                Ok(_) => Ok(true),
                Err(e) if is_not_found(&e) => Ok(false),
                Err(e) => Err(ConplicityError::runtime("inspect_image", e)),
            }
        })
        .await
    }

    async fn pull_image(&self, ctx: &CallContext, image: &str) -> Result<()> {
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };

        ctx.run("pull_image", async {
            let mut stream = self.docker.create_image(Some(options), None, None);
            while let Some(progress) = stream.next().await {
                let progress = progress.map_err(|e| ConplicityError::ImagePull {
                    image: image.to_string(),
                    reason: e.to_string(),
                })?;
                if let Some(status) = progress.status {
                    debug!(image = %image, status = %status, "Pull progress");
                }
            }
            Ok(())
        })
        .await?;

        info!(image = %image, "Pulled image");
        Ok(())
    }

    async fn create_container(
        &self,
        ctx: &CallContext,
        spec: &ContainerSpec,
    ) -> Result<ContainerHandle> {
        let response = ctx
            .run("create_container", async {
                self.docker
                    .create_container(None::<CreateContainerOptions<String>>, container_config(spec))
                    .await
                    .map_err(|e| ConplicityError::runtime("create_container", e))
            })
            .await?;

        for warning in &response.warnings {
            debug!(container = %response.id, warning = %warning, "Docker warning on create");
        }
        Ok(ContainerHandle::new(response.id))
    }

    async fn start_container(&self, ctx: &CallContext, handle: &ContainerHandle) -> Result<()> {
        ctx.run("start_container", async {
            self.docker
                .start_container(&handle.id, None::<StartContainerOptions<String>>)
                .await
                .map_err(|e| ConplicityError::runtime("start_container", e))
        })
        .await
    }

    fn container_logs<'a>(
        &'a self,
        ctx: &'a CallContext,
        handle: &'a ContainerHandle,
    ) -> LogStream<'a> {
        let logs = self
            .docker
            .logs(&handle.id, Some(logs_options()))
            .map_ok(|output| output.to_string())
            .map_err(|e| ConplicityError::runtime("container_logs", e));
        ctx.bind_stream("container_logs", logs)
    }

    async fn inspect_container(
        &self,
        ctx: &CallContext,
        handle: &ContainerHandle,
    ) -> Result<ContainerStatus> {
        let inspect = ctx
            .run("inspect_container", async {
                self.docker
                    .inspect_container(&handle.id, None::<InspectContainerOptions>)
                    .await
                    .map_err(|e| ConplicityError::runtime("inspect_container", e))
            })
            .await?;

        let state = inspect.state.unwrap_or_default();
        Ok(ContainerStatus {
            running: state.running.unwrap_or(false),
            exit_code: state.exit_code,
        })
    }

    async fn remove_container(&self, ctx: &CallContext, handle: &ContainerHandle) -> Result<()> {
        // `link` would remove a link named after the container instead of the
        // container itself.
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            link: false,
        };

        ctx.run("remove_container", async {
            self.docker
                .remove_container(&handle.id, Some(options))
                .await
                .map_err(|e| ConplicityError::runtime("remove_container", e))
        })
        .await
    }
}
