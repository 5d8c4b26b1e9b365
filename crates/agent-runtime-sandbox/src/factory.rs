//! Execution adapter factory with health verification and local fallback.

use std::{fmt, sync::Arc};

use agent_runtime_core::{
    AdapterError, BackendKind, EventBus, ExecutionAdapter, RuntimeEvent,
};
use thiserror::Error;

use crate::{
    config::{ContainerConfig, LocalConfig, RemoteSandboxConfig, SandboxConfig},
    container::{ComposeManager, ContainerAdapter, ContainerError},
    local::LocalAdapter,
    remote::RemoteSandboxAdapter,
};

/// Command every freshly built container adapter must run successfully.
pub const SMOKE_TEST_COMMAND: &str = "echo ok";

/// Adapter creation error.
#[derive(Debug, Error)]
pub enum FactoryError {
    #[error("{backend} backend requires `{parameter}`")]
    MissingParameter {
        backend: BackendKind,
        parameter: &'static str,
    },
    #[error(transparent)]
    Container(#[from] ContainerError),
    #[error("Smoke test failed on {backend} backend: {reason}")]
    SmokeTest { backend: BackendKind, reason: String },
    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

impl FactoryError {
    /// Whether the error is a configuration mistake rather than an
    /// unavailable backend.
    #[must_use]
    pub const fn is_missing_parameter(&self) -> bool {
        matches!(self, Self::MissingParameter { .. })
    }
}

/// A verified adapter and the backend actually in use.
#[derive(Clone)]
pub struct AdapterSelection {
    pub adapter: Arc<dyn ExecutionAdapter>,
    pub kind: BackendKind,
    /// Why the requested backend was abandoned, if it was.
    pub fallback_reason: Option<String>,
}

impl fmt::Debug for AdapterSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterSelection")
            .field("kind", &self.kind)
            .field("fallback_reason", &self.fallback_reason)
            .finish_non_exhaustive()
    }
}

/// Builds execution adapters from [`SandboxConfig`].
#[derive(Clone, Default)]
pub struct AdapterFactory {
    events: Option<Arc<EventBus>>,
}

impl AdapterFactory {
    /// Create a factory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a factory that announces its selection on `events`.
    #[must_use]
    pub const fn with_events(events: Arc<EventBus>) -> Self {
        Self {
            events: Some(events),
        }
    }

    /// Build and verify the requested backend, degrading to local if allowed.
    ///
    /// A missing required parameter is a configuration error and never
    /// falls back.
    ///
    /// # Errors
    /// Returns `MissingParameter` if the backend lacks a required parameter.
    /// With auto-fallback disabled, also returns the failure of the requested
    /// backend verbatim.
    pub async fn create(&self, config: &SandboxConfig) -> Result<AdapterSelection, FactoryError> {
        let attempt = match config.backend {
            BackendKind::Local => Ok(local_adapter(&config.local)),
            BackendKind::Container => container_adapter(&config.container).await,
            BackendKind::RemoteSandbox => remote_adapter(&config.remote),
        };

        let selection = match attempt {
            Ok(adapter) => AdapterSelection {
                kind: adapter.kind(),
                adapter,
                fallback_reason: None,
            },
            Err(err) if config.auto_fallback && !err.is_missing_parameter() => {
                tracing::warn!(
                    requested = %config.backend,
                    error = %err,
                    "Backend unavailable, falling back to local execution"
                );
                AdapterSelection {
                    adapter: local_adapter(&config.local),
                    kind: BackendKind::Local,
                    fallback_reason: Some(err.to_string()),
                }
            }
            Err(err) => {
                tracing::error!(requested = %config.backend, error = %err, "Backend unavailable");
                return Err(err);
            }
        };

        tracing::info!(kind = %selection.kind, requested = %config.backend, "Execution backend selected");
        if let Some(events) = &self.events {
            events.publish(RuntimeEvent::BackendSelected {
                kind: selection.kind,
                fallback_reason: selection.fallback_reason.clone(),
            });
        }
        Ok(selection)
    }
}

/// Build an adapter with a default factory.
///
/// # Errors
/// See [`AdapterFactory::create`].
pub async fn create_adapter(config: &SandboxConfig) -> Result<AdapterSelection, FactoryError> {
    AdapterFactory::new().create(config).await
}

/// Run [`SMOKE_TEST_COMMAND`] and require a zero exit status.
///
/// Catches runtimes that are reachable but do not accept commands.
///
/// # Errors
/// Returns `SmokeTest` with the reason on failure.
pub async fn smoke_test(adapter: &dyn ExecutionAdapter) -> Result<(), FactoryError> {
    let backend = adapter.kind();
    let output = adapter
        .run_command(SMOKE_TEST_COMMAND)
        .await
        .map_err(|e| FactoryError::SmokeTest {
            backend,
            reason: e.to_string(),
        })?;
    if output.success() {
        Ok(())
    } else {
        Err(FactoryError::SmokeTest {
            backend,
            reason: format!("exit status {}: {}", output.exit_code, output.stderr.trim()),
        })
    }
}

fn local_adapter(config: &LocalConfig) -> Arc<dyn ExecutionAdapter> {
    Arc::new(match &config.working_dir {
        Some(dir) => LocalAdapter::new(dir.clone()),
        None => LocalAdapter::current_dir(),
    })
}

async fn container_adapter(
    config: &ContainerConfig,
) -> Result<Arc<dyn ExecutionAdapter>, FactoryError> {
    let project_root = config
        .project_root
        .as_deref()
        .ok_or(FactoryError::MissingParameter {
            backend: BackendKind::Container,
            parameter: "project_root",
        })?;

    let manager = Arc::new(ComposeManager::new(config, project_root));
    manager.check_runtime().await?;
    manager.ensure_running().await?;

    let adapter: Arc<dyn ExecutionAdapter> = Arc::new(ContainerAdapter::new(manager));
    smoke_test(adapter.as_ref()).await?;
    Ok(adapter)
}

fn remote_adapter(
    config: &RemoteSandboxConfig,
) -> Result<Arc<dyn ExecutionAdapter>, FactoryError> {
    let sandbox_id = config
        .sandbox_id
        .as_deref()
        .filter(|id| !id.trim().is_empty())
        .ok_or(FactoryError::MissingParameter {
            backend: BackendKind::RemoteSandbox,
            parameter: "sandbox_id",
        })?;
    Ok(Arc::new(RemoteSandboxAdapter::new(sandbox_id, config.cli.clone())))
}
