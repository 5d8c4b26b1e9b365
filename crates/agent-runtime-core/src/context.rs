//! Execution context handed to tool invocations.

use std::{collections::HashMap, fmt, path::PathBuf, sync::Arc};

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::ExecutionAdapter;

/// Context for executing tool calls.
///
/// Carries the optional cancellation signal the executor races against,
/// the execution adapter tools should run commands through, and arbitrary
/// metadata for app-specific needs.
#[derive(Clone, Default)]
pub struct ExecutionContext {
    /// Working directory for the agent session.
    pub working_dir: PathBuf,

    /// Cancellation signal. `None` means the invocation cannot be aborted.
    pub cancel: Option<CancellationToken>,

    /// Backend tools run commands through.
    pub adapter: Option<Arc<dyn ExecutionAdapter>>,

    /// Arbitrary metadata for app-specific needs.
    pub metadata: HashMap<String, Value>,
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("working_dir", &self.working_dir)
            .field("cancel", &self.cancel)
            .field("adapter", &self.adapter.as_ref().map(|a| a.kind()))
            .field("metadata", &self.metadata)
            .finish()
    }
}

impl ExecutionContext {
    /// Create a new execution context with just a working directory.
    #[must_use]
    pub fn new(working_dir: PathBuf) -> Self {
        Self {
            working_dir,
            ..Self::default()
        }
    }

    /// Attach a cancellation signal.
    #[must_use]
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Attach an execution adapter.
    #[must_use]
    pub fn with_adapter(mut self, adapter: Arc<dyn ExecutionAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    /// Whether the cancellation signal has fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    /// Get a metadata value by key.
    #[must_use]
    pub fn get_metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Set a metadata value.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
    }
}
