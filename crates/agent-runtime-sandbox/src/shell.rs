//! Shell detection and executable resolution.

use std::{
    collections::HashSet,
    env::{join_paths, split_paths},
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
};

use tokio::sync::OnceCell;

/// Returns `(shell_program, shell_arg)` used to run command strings on the host.
///
/// - Windows: `("cmd", "/C")`
/// - Unix-like: the user's `$SHELL` if it is a POSIX-compatible shell,
///   otherwise `/bin/sh`
#[must_use]
pub fn get_shell_command() -> (String, &'static str) {
    if cfg!(windows) {
        ("cmd".into(), "/C")
    } else {
        UnixShell::current_shell().get_shell_command()
    }
}

/// PATH reported by the user's login shell, read at most once per process.
static LOGIN_PATH: OnceCell<Option<OsString>> = OnceCell::const_new();

/// Resolve an executable by name, falling back to the login-shell PATH if needed.
///
/// The search order is:
/// 1. Explicit paths (absolute or containing a separator), never searched.
/// 2. The current process PATH.
/// 3. The process PATH merged with the PATH reported by the user's login
///    shell. The login shell runs once; its PATH is cached and never written
///    back to the process environment.
pub async fn resolve_executable_path(executable: &str) -> Option<PathBuf> {
    if executable.trim().is_empty() {
        return None;
    }

    let path = Path::new(executable);
    if path.is_absolute() || executable.contains(std::path::MAIN_SEPARATOR) {
        return path.is_file().then(|| path.to_path_buf());
    }

    let process_path = std::env::var_os("PATH").unwrap_or_default();
    if let Some(found) = search_async(executable, process_path.clone()).await {
        return Some(found);
    }

    let login_path = LOGIN_PATH
        .get_or_init(|| async { login_shell_path().await.map(OsString::from) })
        .await
        .as_ref()?;
    let merged = merge_paths(&process_path, login_path);
    if merged == process_path {
        return None;
    }
    tracing::debug!(executable, ?merged, "searching login shell PATH");
    search_async(executable, merged).await
}

/// Merge two PATH strings into a single, de-duplicated PATH.
#[must_use]
pub fn merge_paths(primary: impl AsRef<OsStr>, secondary: impl AsRef<OsStr>) -> OsString {
    let mut seen = HashSet::<PathBuf>::new();
    let mut merged = Vec::<PathBuf>::new();

    for p in split_paths(primary.as_ref()).chain(split_paths(secondary.as_ref())) {
        if !p.as_os_str().is_empty() && seen.insert(p.clone()) {
            merged.push(p);
        }
    }

    join_paths(merged).unwrap_or_default()
}

/// Look `executable` up in the directories of `search_path` only.
fn search(executable: &str, search_path: &OsStr) -> Option<PathBuf> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    which::which_in(executable, Some(search_path), cwd).ok()
}

async fn search_async(executable: &str, search_path: OsString) -> Option<PathBuf> {
    let executable = executable.to_string();
    tokio::task::spawn_blocking(move || search(&executable, &search_path))
        .await
        .ok()
        .flatten()
}

/// Unix shell types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnixShell {
    Zsh(PathBuf),
    Bash(PathBuf),
    Sh(PathBuf),
    Other(PathBuf),
}

impl UnixShell {
    /// Get the shell path.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Zsh(p) | Self::Bash(p) | Self::Sh(p) | Self::Other(p) => p,
        }
    }

    /// Whether this shell supports login mode.
    #[must_use]
    pub const fn login(&self) -> bool {
        matches!(self, Self::Zsh(_) | Self::Bash(_))
    }

    /// Whether command strings written for `sh` run unchanged.
    #[must_use]
    pub const fn posix(&self) -> bool {
        !matches!(self, Self::Other(_))
    }

    /// Startup file sourced before reading PATH.
    #[must_use]
    pub fn config_file(&self) -> Option<PathBuf> {
        let home = dirs::home_dir()?;
        let config_file = match self {
            Self::Zsh(_) => home.join(".zshrc"),
            Self::Bash(_) => home.join(".bashrc"),
            Self::Sh(_) | Self::Other(_) => return None,
        };
        config_file.is_file().then_some(config_file)
    }

    /// Get the current shell from `$SHELL`.
    #[must_use]
    pub fn current_shell() -> Self {
        std::env::var("SHELL")
            .ok()
            .and_then(|shell| Self::from_path(Path::new(&shell)))
            .filter(Self::posix)
            .unwrap_or_else(|| Self::Sh(PathBuf::from("/bin/sh")))
    }

    /// Classify an absolute path to an existing shell binary.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        if !(path.is_absolute() && path.is_file()) {
            return None;
        }
        let path_buf = path.to_path_buf();
        Some(match path.file_name().and_then(OsStr::to_str) {
            Some("zsh") => Self::Zsh(path_buf),
            Some("bash") => Self::Bash(path_buf),
            Some("sh") => Self::Sh(path_buf),
            _ => Self::Other(path_buf),
        })
    }

    /// Get shell command tuple.
    #[must_use]
    pub fn get_shell_command(&self) -> (String, &'static str) {
        (self.path().to_string_lossy().into_owned(), "-c")
    }
}

#[cfg(not(windows))]
async fn login_shell_path() -> Option<String> {
    use std::{process::Stdio, time::Duration};

    use tokio::process::Command;

    const PATH_REFRESH_TIMEOUT: Duration = Duration::from_secs(5);

    let shell = UnixShell::current_shell();
    let mut script = String::from("printf '%s' \"$PATH\"");
    if let Some(config) = shell.config_file() {
        if let Ok(escaped) = shlex::try_quote(config.to_string_lossy().as_ref()) {
            script = format!(". {escaped}; {script}");
        }
    }

    let mut cmd = Command::new(shell.path());
    if shell.login() {
        cmd.arg("-l");
    }
    cmd.arg("-c")
        .arg(script)
        .env("TERM", "dumb")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let child = cmd.spawn().ok()?;
    let output = match tokio::time::timeout(PATH_REFRESH_TIMEOUT, child.wait_with_output()).await {
        Ok(Ok(output)) if output.status.success() => output,
        Ok(Ok(_)) => return None,
        Ok(Err(err)) => {
            tracing::debug!(shell = %shell.path().display(), ?err, "Failed to read PATH from login shell");
            return None;
        }
        Err(_) => {
            tracing::warn!(shell = %shell.path().display(), "Timed out reading PATH from login shell");
            return None;
        }
    };

    let path = String::from_utf8(output.stdout).ok()?.trim().to_string();
    (!path.is_empty()).then_some(path)
}

#[cfg(windows)]
async fn login_shell_path() -> Option<String> {
    None
}
