//! Direct host execution.

use std::path::{Path, PathBuf};

use agent_runtime_core::{AdapterError, BackendKind, CommandOutput, ExecutionAdapter};
use async_trait::async_trait;

use crate::{command::run_process, shell::get_shell_command};

/// Runs commands directly on the host, in a working directory.
#[derive(Debug, Clone)]
pub struct LocalAdapter {
    working_dir: PathBuf,
    shell: (String, &'static str),
}

impl LocalAdapter {
    /// Create an adapter rooted at `working_dir`.
    #[must_use]
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            shell: get_shell_command(),
        }
    }

    /// Create an adapter rooted at the process's current directory.
    #[must_use]
    pub fn current_dir() -> Self {
        Self::new(std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }

    /// Working directory commands run in.
    #[must_use]
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.working_dir.join(path)
    }
}

#[async_trait]
impl ExecutionAdapter for LocalAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn run_command(&self, command: &str) -> Result<CommandOutput, AdapterError> {
        let (program, arg) = &self.shell;
        tracing::debug!(command, cwd = %self.working_dir.display(), "local exec");
        run_process(
            Path::new(program),
            &[(*arg).to_string(), command.to_string()],
            Some(&self.working_dir),
        )
        .await
    }

    async fn read_file(&self, path: &str) -> Result<String, AdapterError> {
        Ok(tokio::fs::read_to_string(self.resolve(path)).await?)
    }

    async fn write_file(&self, path: &str, contents: &str) -> Result<(), AdapterError> {
        let path = self.resolve(path);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(tokio::fs::write(path, contents).await?)
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<String>, AdapterError> {
        let mut entries = tokio::fs::read_dir(self.resolve(path)).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    async fn file_exists(&self, path: &str) -> Result<bool, AdapterError> {
        Ok(tokio::fs::try_exists(self.resolve(path)).await?)
    }
}
