//! Command building and process execution.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
};

use agent_runtime_core::{AdapterError, CommandOutput};
use thiserror::Error;
use tokio::process::Command;

use crate::shell::resolve_executable_path;

/// Command build error.
#[derive(Debug, Error)]
pub enum CommandBuildError {
    #[error("Base command cannot be parsed: {0}")]
    InvalidBase(String),
    #[error("Base command is empty after parsing")]
    EmptyCommand,
    #[error("Executable not found: {0}")]
    ExecutableNotFound(String),
}

impl From<CommandBuildError> for AdapterError {
    fn from(err: CommandBuildError) -> Self {
        Self::SpawnFailed(err.to_string())
    }
}

/// Parsed command parts (program + args).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandParts {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandParts {
    /// Create new command parts.
    #[must_use]
    pub const fn new(program: String, args: Vec<String>) -> Self {
        Self { program, args }
    }

    /// Resolve the program to an absolute path.
    ///
    /// # Errors
    /// Returns error if executable not found.
    pub async fn into_resolved(self) -> Result<(PathBuf, Vec<String>), CommandBuildError> {
        let Self { program, args } = self;
        let executable = resolve_executable_path(&program)
            .await
            .ok_or(CommandBuildError::ExecutableNotFound(program))?;
        Ok((executable, args))
    }

    /// Resolve and run the command, collecting its output.
    ///
    /// A non-zero exit status is not an error; callers inspect the output.
    ///
    /// # Errors
    /// Returns error if the executable cannot be resolved or spawned.
    pub async fn run(self, cwd: Option<&Path>) -> Result<CommandOutput, AdapterError> {
        let (executable, args) = self.into_resolved().await?;
        run_process(&executable, &args, cwd).await
    }
}

/// Spawn `program` with `args` and wait for it to exit.
///
/// # Errors
/// Returns error if the process cannot be spawned or awaited.
pub async fn run_process(
    program: &Path,
    args: &[String],
    cwd: Option<&Path>,
) -> Result<CommandOutput, AdapterError> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = cwd {
        cmd.current_dir(cwd);
    }

    tracing::trace!(program = %program.display(), ?args, "spawning process");
    let output = cmd
        .output()
        .await
        .map_err(|e| AdapterError::SpawnFailed(format!("{}: {e}", program.display())))?;

    Ok(CommandOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Builder for wrapper commands (`docker compose ...`, remote sandbox CLIs).
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    /// Base executable command, shell-split.
    pub base: String,
    /// Parameters appended verbatim after the base.
    pub params: Option<Vec<String>>,
}

impl CommandBuilder {
    /// Create a new command builder.
    #[must_use]
    pub fn new<S: Into<String>>(base: S) -> Self {
        Self {
            base: base.into(),
            params: None,
        }
    }

    /// Set parameters.
    #[must_use]
    pub fn params<I>(mut self, params: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.params = Some(params.into_iter().map(Into::into).collect());
        self
    }

    /// Extend parameters.
    #[must_use]
    pub fn extend_params<I>(mut self, more: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let extra: Vec<String> = more.into_iter().map(Into::into).collect();
        match &mut self.params {
            Some(p) => p.extend(extra),
            None => self.params = Some(extra),
        }
        self
    }

    /// Build the base command with its parameters.
    ///
    /// # Errors
    /// Returns error if command is invalid.
    pub fn build(&self) -> Result<CommandParts, CommandBuildError> {
        self.build_with(std::iter::empty::<String>())
    }

    /// Build the command with extra trailing arguments.
    ///
    /// # Errors
    /// Returns error if command is invalid.
    pub fn build_with<I>(&self, additional_args: I) -> Result<CommandParts, CommandBuildError>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let mut parts = split_command_line(&self.base)?;
        if let Some(ref params) = self.params {
            parts.extend(params.iter().cloned());
        }
        parts.extend(additional_args.into_iter().map(Into::into));

        if parts.is_empty() {
            return Err(CommandBuildError::EmptyCommand);
        }

        let program = parts.remove(0);
        Ok(CommandParts::new(program, parts))
    }
}

fn split_command_line(input: &str) -> Result<Vec<String>, CommandBuildError> {
    #[cfg(windows)]
    {
        Ok(winsplit::split(input))
    }

    #[cfg(not(windows))]
    {
        shlex::split(input).ok_or_else(|| CommandBuildError::InvalidBase(input.to_string()))
    }
}
