//! Remote ephemeral sandbox backend.

use agent_runtime_core::{AdapterError, BackendKind, CommandOutput, ExecutionAdapter};
use async_trait::async_trait;

use crate::command::CommandBuilder;

/// Executes commands in a remote sandbox through its command-line client.
///
/// Commands are issued as `<cli> exec <sandbox_id> -- sh -c <command>`.
#[derive(Debug, Clone)]
pub struct RemoteSandboxAdapter {
    sandbox_id: String,
    client: CommandBuilder,
}

impl RemoteSandboxAdapter {
    /// Bind an adapter to a sandbox identifier.
    #[must_use]
    pub fn new(sandbox_id: impl Into<String>, cli: impl Into<String>) -> Self {
        let sandbox_id = sandbox_id.into();
        let client = CommandBuilder::new(cli).params(["exec".to_string(), sandbox_id.clone()]);
        Self { sandbox_id, client }
    }

    /// Sandbox this adapter is bound to.
    #[must_use]
    pub fn sandbox_id(&self) -> &str {
        &self.sandbox_id
    }
}

#[async_trait]
impl ExecutionAdapter for RemoteSandboxAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::RemoteSandbox
    }

    async fn run_command(&self, command: &str) -> Result<CommandOutput, AdapterError> {
        tracing::debug!(command, sandbox_id = %self.sandbox_id, "remote exec");
        self.client
            .build_with(["--", "sh", "-c", command])?
            .run(None)
            .await
    }
}
