//! Sandboxed command execution backends.
//!
//! Provides:
//! - `LocalAdapter`, `ContainerAdapter`, `RemoteSandboxAdapter`
//! - `AdapterFactory` - Verified backend selection with local fallback
//! - `SandboxConfig` - Serde-backed backend configuration
//! - Shell detection and command building utilities

pub mod command;
pub mod config;
pub mod container;
pub mod factory;
pub mod local;
pub mod remote;
pub mod shell;

pub use command::{CommandBuildError, CommandBuilder, CommandParts};
pub use config::{ContainerConfig, LocalConfig, RemoteSandboxConfig, SandboxConfig};
pub use container::{ComposeManager, ContainerAdapter, ContainerError};
pub use factory::{AdapterFactory, AdapterSelection, FactoryError, create_adapter, smoke_test};
pub use local::LocalAdapter;
pub use remote::RemoteSandboxAdapter;
pub use shell::{get_shell_command, resolve_executable_path};
