//! Core traits for model, tool and command execution collaborators.

use std::{borrow::Cow, fmt};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{
    ConversationEntry, ExecutionContext, PermissionMode, SessionConfig, SessionId, ToolCall,
};

/// Execution backend variants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Direct host execution.
    Local,
    /// Managed compose container.
    #[default]
    Container,
    /// Remote ephemeral sandbox.
    RemoteSandbox,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Local => "local",
            Self::Container => "container",
            Self::RemoteSandbox => "remote_sandbox",
        })
    }
}

/// Result of running a command through an adapter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Process exit code (`-1` when terminated by a signal).
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Whether the command exited with status zero.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Execution adapter error.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Command `{command}` exited with {exit_code}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

fn quote(value: &str) -> Result<String, AdapterError> {
    shlex::try_quote(value)
        .map(Cow::into_owned)
        .map_err(|e| AdapterError::InvalidArgument(e.to_string()))
}

fn require_success(command: String, output: CommandOutput) -> Result<CommandOutput, AdapterError> {
    if output.success() {
        Ok(output)
    } else {
        Err(AdapterError::CommandFailed {
            command,
            exit_code: output.exit_code,
            stderr: output.stderr,
        })
    }
}

/// Uniform command-execution capability over all backends.
///
/// The filesystem primitives default to POSIX shell commands routed through
/// [`ExecutionAdapter::run_command`], so a backend only has to provide
/// command execution.
#[async_trait]
pub trait ExecutionAdapter: Send + Sync {
    /// Backend variant.
    fn kind(&self) -> BackendKind;

    /// Run a shell command and collect its output.
    async fn run_command(&self, command: &str) -> Result<CommandOutput, AdapterError>;

    /// Read a file as UTF-8 text.
    async fn read_file(&self, path: &str) -> Result<String, AdapterError> {
        let command = format!("cat -- {}", quote(path)?);
        let output = self.run_command(&command).await?;
        require_success(command, output).map(|o| o.stdout)
    }

    /// Write a file, creating parent directories.
    async fn write_file(&self, path: &str, contents: &str) -> Result<(), AdapterError> {
        let path = quote(path)?;
        let command = format!(
            "mkdir -p \"$(dirname -- {path})\" && printf '%s' {} > {path}",
            quote(contents)?
        );
        let output = self.run_command(&command).await?;
        require_success(command, output).map(|_| ())
    }

    /// List directory entry names, sorted.
    async fn list_dir(&self, path: &str) -> Result<Vec<String>, AdapterError> {
        let command = format!("ls -1A -- {}", quote(path)?);
        let output = self.run_command(&command).await?;
        let output = require_success(command, output)?;
        let mut names: Vec<String> = output.stdout.lines().map(str::to_string).collect();
        names.sort();
        Ok(names)
    }

    /// Whether a path exists.
    async fn file_exists(&self, path: &str) -> Result<bool, AdapterError> {
        let output = self.run_command(&format!("test -e {}", quote(path)?)).await?;
        Ok(output.success())
    }
}

/// What the model answered for one query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    /// Assistant text.
    pub text: String,
    /// Requested tool calls. Empty means the text is the final answer.
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

impl ModelResponse {
    /// A final text answer.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
        }
    }

    /// A response requesting tools.
    #[must_use]
    pub fn tool_calls(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            text: text.into(),
            tool_calls,
        }
    }

    /// Whether the response requests tools.
    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Model collaborator error.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Model request failed: {0}")]
    Request(String),
    #[error("Invalid model response: {0}")]
    InvalidResponse(String),
}

/// Language model collaborator: send context, receive text or tool requests.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Query the model with the full conversation log.
    async fn query(
        &self,
        context: &[ConversationEntry],
        config: &SessionConfig,
    ) -> Result<ModelResponse, ModelError>;
}

/// Tool-level error. Surfaced to the model as the tool's output.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{0}")]
    Failed(String),
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("Tool not allowed: {0}")]
    NotAllowed(String),
    #[error("Permission denied: {0}")]
    Denied(String),
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

/// Everything a tool sees about the invocation it serves.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Owning session.
    pub session_id: SessionId,
    /// Freshly generated id for this invocation.
    pub invocation_id: String,
    /// Correlation id of the originating call.
    pub tool_call_id: Option<String>,
    /// Permission mode of the owning session.
    pub permission_mode: PermissionMode,
    /// Execution context (adapter, cancellation, metadata).
    pub execution: ExecutionContext,
}

/// Tool invocation function.
///
/// Implementations should watch `ctx.execution.cancel` if they can stop
/// early; the executor does not wait for them once cancellation wins.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Invoke a tool.
    async fn invoke(&self, call: ToolCall, ctx: ToolContext) -> Result<Value, ToolError>;
}
