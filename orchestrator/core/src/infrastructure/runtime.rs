// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Docker Container Runner
//!
//! `ContainerRunner` backed by the local Docker daemon through `bollard`.
//! Session containers idle on `tail -f /dev/null` with the workspace
//! bind-mounted; all agent commands arrive through `exec`.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Implements the container runner collaborator

use crate::domain::runtime::{ContainerId, ContainerRunner, ContainerSpec, ExecResult, RuntimeError};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::Docker;
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, info};

/// Seconds Docker waits before killing a container on stop.
const STOP_GRACE_SECONDS: i64 = 10;

pub struct DockerContainerRunner {
    docker: Docker,
}

impl DockerContainerRunner {
    pub fn new(socket_path: Option<String>) -> Result<Self, RuntimeError> {
        let docker = if let Some(path) = socket_path {
            #[cfg(unix)]
            let result = Docker::connect_with_unix(&path, 120, bollard::API_DEFAULT_VERSION);

            #[cfg(windows)]
            let result = Docker::connect_with_named_pipe(&path, 120, bollard::API_DEFAULT_VERSION);

            result.map_err(|e| {
                RuntimeError::Unavailable(format!("Failed to connect to Docker at {}: {}", path, e))
            })?
        } else {
            Docker::connect_with_local_defaults().map_err(|e| {
                RuntimeError::Unavailable(format!(
                    "Failed to connect to Docker: {}\n\n\
                     Ensure the Docker daemon is running and this user can access its socket.",
                    e
                ))
            })?
        };

        Ok(Self { docker })
    }

    /// Verify Docker daemon is accessible
    pub async fn healthcheck(&self) -> Result<(), RuntimeError> {
        self.docker
            .ping()
            .await
            .map_err(|e| RuntimeError::Unavailable(format!("Cannot connect to Docker daemon: {}", e)))?;
        Ok(())
    }

    async fn run_exec(&self, container_id: &str, command: &[String]) -> Result<ExecResult, RuntimeError> {
        let exec_config = CreateExecOptions {
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            cmd: Some(command.to_vec()),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(container_id, exec_config)
            .await
            .map_err(|e| classify(e, container_id, RuntimeError::ExecutionFailed))?;

        let start_opts = StartExecOptions {
            detach: false,
            ..Default::default()
        };

        let res = self
            .docker
            .start_exec(&exec.id, Some(start_opts))
            .await
            .map_err(|e| classify(e, container_id, RuntimeError::ExecutionFailed))?;

        let mut output = String::new();
        if let StartExecResults::Attached { output: mut stream, .. } = res {
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(LogOutput::StdOut { message }) | Ok(LogOutput::StdErr { message }) => {
                        output.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(_) => {}
                    Err(e) => return Err(classify(e, container_id, RuntimeError::ExecutionFailed)),
                }
            }
        }

        let exec_inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| RuntimeError::ExecutionFailed(format!("Failed to inspect exec: {}", e)))?;

        Ok(ExecResult {
            exit_code: exec_inspect.exit_code.unwrap_or(-1),
            output,
        })
    }
}

/// Map a Docker API error: a missing container and a dead daemon end the
/// session, anything else is reported through `fallback`.
fn classify(err: DockerError, container_id: &str, fallback: fn(String) -> RuntimeError) -> RuntimeError {
    match err {
        DockerError::DockerResponseServerError { status_code: 404, .. } => {
            RuntimeError::ContainerNotFound(container_id.to_string())
        }
        DockerError::DockerResponseServerError { status_code: 409, message } => fallback(message),
        DockerError::DockerResponseServerError { message, .. } => fallback(message),
        DockerError::IOError { err } => RuntimeError::Unavailable(err.to_string()),
        DockerError::HyperResponseError { err } => RuntimeError::Unavailable(err.to_string()),
        other => fallback(other.to_string()),
    }
}

/// `host:container` bind for the session workspace.
fn workspace_bind(spec: &ContainerSpec) -> Result<String, RuntimeError> {
    let host = if spec.workspace.is_absolute() {
        spec.workspace.clone()
    } else {
        std::env::current_dir()
            .map_err(|e| RuntimeError::CreateFailed(format!("Cannot resolve workspace: {}", e)))?
            .join(&spec.workspace)
    };
    let host = host
        .to_str()
        .ok_or_else(|| RuntimeError::CreateFailed(format!("Workspace path is not UTF-8: {:?}", host)))?;
    Ok(format!("{}:{}", host, spec.workdir))
}

fn env_pairs(spec: &ContainerSpec) -> Vec<String> {
    let mut env: Vec<String> = spec.env.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    env.sort();
    env
}

#[async_trait]
impl ContainerRunner for DockerContainerRunner {
    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        if self.docker.inspect_image(image).await.is_ok() {
            debug!("Image {} present locally", image);
            return Ok(());
        }

        info!("Pulling image: {}", image);
        let options = Some(CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        });

        let mut stream = self.docker.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            if let Err(e) = result {
                return Err(RuntimeError::PullFailed(format!(
                    "Failed to pull image {}: {}\n\nTry manually: docker pull {}",
                    image, e, image
                )));
            }
        }
        info!("Successfully pulled image: {}", image);
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerId, RuntimeError> {
        let host_config = bollard::service::HostConfig {
            binds: Some(vec![workspace_bind(spec)?]),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        // Keep container alive; work arrives through exec
        let cmd = vec!["tail".to_string(), "-f".to_string(), "/dev/null".to_string()];

        let container_config = Config {
            image: Some(spec.image.clone()),
            tty: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            working_dir: Some(spec.workdir.clone()),
            cmd: Some(cmd),
            env: Some(env_pairs(spec)),
            host_config: Some(host_config),
            ..Default::default()
        };

        let res = self
            .docker
            .create_container(Some(options), container_config)
            .await
            .map_err(|e| classify(e, &spec.name, RuntimeError::CreateFailed))?;

        info!("Created session container {} ({})", spec.name, res.id);
        Ok(ContainerId::new(res.id))
    }

    async fn start(&self, id: &ContainerId) -> Result<(), RuntimeError> {
        self.docker
            .start_container(id.as_str(), None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| classify(e, id.as_str(), RuntimeError::CreateFailed))?;
        Ok(())
    }

    async fn exec(&self, id: &ContainerId, command: &[String], timeout: Duration) -> Result<ExecResult, RuntimeError> {
        match tokio::time::timeout(timeout, self.run_exec(id.as_str(), command)).await {
            Ok(result) => result,
            Err(_) => Err(RuntimeError::Timeout(timeout)),
        }
    }

    async fn stop(&self, id: &ContainerId) -> Result<(), RuntimeError> {
        self.docker
            .stop_container(id.as_str(), Some(StopContainerOptions { t: STOP_GRACE_SECONDS }))
            .await
            .map_err(|e| classify(e, id.as_str(), RuntimeError::TerminationFailed))?;
        info!("Stopped session container: {}", id.as_str());
        Ok(())
    }

    async fn remove(&self, id: &ContainerId) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };

        self.docker
            .remove_container(id.as_str(), Some(options))
            .await
            .map_err(|e| RuntimeError::TerminationFailed(e.to_string()))?;

        info!("Removed session container: {}", id.as_str());
        Ok(())
    }
}
