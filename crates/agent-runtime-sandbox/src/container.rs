//! Managed compose container backend.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use agent_runtime_core::{AdapterError, BackendKind, CommandOutput, ExecutionAdapter};
use async_trait::async_trait;
use thiserror::Error;

use crate::{
    command::CommandBuilder,
    config::{ContainerConfig, DEFAULT_COMPOSE_FILE, DEFAULT_SERVICE},
};

/// Container lifecycle error.
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("Container runtime unavailable: {0}")]
    RuntimeUnavailable(String),
    #[error("Failed to start service `{service}`: {reason}")]
    StartFailed { service: String, reason: String },
    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

/// Drives `docker compose` for one service of one project.
#[derive(Debug, Clone)]
pub struct ComposeManager {
    project_root: PathBuf,
    service: String,
    runtime: CommandBuilder,
    compose: CommandBuilder,
}

impl ComposeManager {
    /// Build a manager from container parameters and a resolved project root.
    #[must_use]
    pub fn new(config: &ContainerConfig, project_root: &Path) -> Self {
        let compose_file = config
            .compose_file
            .clone()
            .unwrap_or_else(|| project_root.join(DEFAULT_COMPOSE_FILE));
        let project_name = config.project_name.clone().unwrap_or_else(|| {
            project_root
                .file_name()
                .map_or_else(|| "agent-runtime".into(), |n| n.to_string_lossy().into_owned())
        });
        let service = config
            .service
            .clone()
            .unwrap_or_else(|| DEFAULT_SERVICE.to_string());

        let runtime = CommandBuilder::new(shlex_base(&config.docker_binary));
        let compose = runtime.clone().params([
            "compose".to_string(),
            "-f".to_string(),
            compose_file.to_string_lossy().into_owned(),
            "-p".to_string(),
            project_name,
        ]);

        Self {
            project_root: project_root.to_path_buf(),
            service,
            runtime,
            compose,
        }
    }

    /// Compose service commands are executed in.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Probe whether the container runtime answers.
    ///
    /// # Errors
    /// Returns `RuntimeUnavailable` with the reason if it does not.
    pub async fn check_runtime(&self) -> Result<(), ContainerError> {
        let parts = self
            .runtime
            .build_with(["info"])
            .map_err(|e| ContainerError::RuntimeUnavailable(e.to_string()))?;
        let output = parts
            .run(Some(&self.project_root))
            .await
            .map_err(|e| ContainerError::RuntimeUnavailable(e.to_string()))?;
        if output.success() {
            Ok(())
        } else {
            Err(ContainerError::RuntimeUnavailable(first_line(&output.stderr)))
        }
    }

    /// Whether the service has a running container.
    ///
    /// # Errors
    /// Returns error if compose cannot be invoked.
    pub async fn is_running(&self) -> Result<bool, ContainerError> {
        let output = self
            .compose_run(["ps", "-q", "--status", "running", self.service.as_str()])
            .await?;
        Ok(output.success() && !output.stdout.trim().is_empty())
    }

    /// Start the service unless it is already running.
    ///
    /// # Errors
    /// Returns `StartFailed` if `compose up` fails.
    pub async fn ensure_running(&self) -> Result<(), ContainerError> {
        if self.is_running().await? {
            tracing::debug!(service = %self.service, "container already running");
            return Ok(());
        }

        tracing::info!(service = %self.service, "starting container");
        let output = self
            .compose_run(["up", "-d", self.service.as_str()])
            .await?;
        if output.success() {
            Ok(())
        } else {
            Err(ContainerError::StartFailed {
                service: self.service.clone(),
                reason: first_line(&output.stderr),
            })
        }
    }

    /// Run a shell command inside the service container.
    ///
    /// # Errors
    /// Returns error if compose cannot be invoked.
    pub async fn exec(&self, command: &str) -> Result<CommandOutput, AdapterError> {
        self.compose
            .build_with(["exec", "-T", self.service.as_str(), "sh", "-c", command])?
            .run(Some(&self.project_root))
            .await
    }

    async fn compose_run<const N: usize>(
        &self,
        args: [&str; N],
    ) -> Result<CommandOutput, ContainerError> {
        let parts = self.compose.build_with(args).map_err(AdapterError::from)?;
        Ok(parts.run(Some(&self.project_root)).await?)
    }
}

/// Quote a binary path so it survives shell-splitting as a single word.
fn shlex_base(binary: &str) -> String {
    shlex::try_quote(binary).map_or_else(|_| binary.to_string(), |q| q.into_owned())
}

fn first_line(text: &str) -> String {
    let line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("").trim();
    if line.is_empty() {
        "no diagnostic output".into()
    } else {
        line.to_string()
    }
}

/// Executes commands inside a compose-managed container.
#[derive(Debug, Clone)]
pub struct ContainerAdapter {
    manager: Arc<ComposeManager>,
}

impl ContainerAdapter {
    /// Wrap a manager whose container is already running.
    #[must_use]
    pub const fn new(manager: Arc<ComposeManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl ExecutionAdapter for ContainerAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Container
    }

    async fn run_command(&self, command: &str) -> Result<CommandOutput, AdapterError> {
        tracing::debug!(command, service = %self.manager.service(), "container exec");
        self.manager.exec(command).await
    }
}
