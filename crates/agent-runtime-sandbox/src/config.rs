//! Backend selection configuration.

use std::path::PathBuf;

use agent_runtime_core::BackendKind;
use serde::{Deserialize, Serialize};

/// Default compose service name.
pub const DEFAULT_SERVICE: &str = "sandbox";
/// Default compose file name, relative to the project root.
pub const DEFAULT_COMPOSE_FILE: &str = "docker-compose.yml";

/// Execution backend configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Requested backend.
    pub backend: BackendKind,
    /// Degrade to the local backend when the requested one fails.
    pub auto_fallback: bool,
    pub container: ContainerConfig,
    pub remote: RemoteSandboxConfig,
    pub local: LocalConfig,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Container,
            auto_fallback: true,
            container: ContainerConfig::default(),
            remote: RemoteSandboxConfig::default(),
            local: LocalConfig::default(),
        }
    }
}

impl SandboxConfig {
    /// Parse configuration from JSON, filling unspecified fields with defaults.
    ///
    /// # Errors
    /// Returns error if the JSON is malformed.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Configuration for the local backend.
    #[must_use]
    pub fn local(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            backend: BackendKind::Local,
            local: LocalConfig {
                working_dir: Some(working_dir.into()),
            },
            ..Self::default()
        }
    }

    /// Configuration for the container backend.
    #[must_use]
    pub fn container(project_root: impl Into<PathBuf>) -> Self {
        Self {
            backend: BackendKind::Container,
            container: ContainerConfig {
                project_root: Some(project_root.into()),
                ..ContainerConfig::default()
            },
            ..Self::default()
        }
    }

    /// Configuration for the remote sandbox backend.
    #[must_use]
    pub fn remote(sandbox_id: impl Into<String>) -> Self {
        Self {
            backend: BackendKind::RemoteSandbox,
            remote: RemoteSandboxConfig {
                sandbox_id: Some(sandbox_id.into()),
                ..RemoteSandboxConfig::default()
            },
            ..Self::default()
        }
    }

    /// Set the auto-fallback flag.
    #[must_use]
    pub const fn with_auto_fallback(mut self, auto_fallback: bool) -> Self {
        self.auto_fallback = auto_fallback;
        self
    }
}

/// Managed compose container parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Project root mounted into the container. Required.
    pub project_root: Option<PathBuf>,
    /// Compose file; defaults to `<project_root>/docker-compose.yml`.
    pub compose_file: Option<PathBuf>,
    /// Compose service; defaults to `sandbox`.
    pub service: Option<String>,
    /// Compose project name; defaults to the project root's directory name.
    pub project_name: Option<String>,
    /// Container runtime binary.
    pub docker_binary: String,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            project_root: None,
            compose_file: None,
            service: None,
            project_name: None,
            docker_binary: "docker".into(),
        }
    }
}

/// Remote ephemeral sandbox parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSandboxConfig {
    /// Sandbox identifier. Required.
    pub sandbox_id: Option<String>,
    /// Client command used to reach the sandbox (`<cli> exec <id> -- ...`).
    pub cli: String,
}

impl Default for RemoteSandboxConfig {
    fn default() -> Self {
        Self {
            sandbox_id: None,
            cli: "sandbox".into(),
        }
    }
}

/// Host execution parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// Working directory; defaults to the process's current directory.
    pub working_dir: Option<PathBuf>,
}
