//! Caller-owned session state.

use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::ConversationEntry;

/// Session identifier. An empty string means "missing".
pub type SessionId = String;

/// Permission mode forwarded to the model and the approval layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    #[default]
    Default,
    AcceptEdits,
    Plan,
    BypassPermissions,
}

/// Per-session model configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Model identity.
    pub model: String,
    /// Permission mode.
    pub permission_mode: PermissionMode,
    /// Allowed tool names. `None` allows every tool.
    pub allowed_tools: Option<Vec<String>>,
    /// Whether prompt caching is requested from the model.
    pub caching: bool,
}

impl SessionConfig {
    /// Whether the named tool may be invoked in this session.
    #[must_use]
    pub fn allows(&self, tool: &str) -> bool {
        self.allowed_tools
            .as_ref()
            .is_none_or(|allowed| allowed.iter().any(|name| name == tool))
    }
}

/// Conversation state for one agent session.
///
/// The caller owns the session and must not run two turns on it at once;
/// `&mut` access enforces that for a single owner.
#[derive(Debug, Clone, Default)]
pub struct Session {
    /// Session identifier.
    pub id: SessionId,
    /// Ordered conversation log.
    pub context: Vec<ConversationEntry>,
    /// Cancellation token for the in-flight turn.
    pub cancel_token: Option<CancellationToken>,
    /// Invocation id of the tool currently executing, if any.
    pub current_tool: Option<String>,
    /// Model configuration.
    pub config: SessionConfig,
}

impl Session {
    /// Create an empty session.
    #[must_use]
    pub fn new(id: impl Into<SessionId>, config: SessionConfig) -> Self {
        Self {
            id: id.into(),
            config,
            ..Self::default()
        }
    }

    /// Last entry of the conversation log.
    #[must_use]
    pub fn last_entry(&self) -> Option<&ConversationEntry> {
        self.context.last()
    }

    /// Append an entry to the conversation log.
    pub fn push(&mut self, entry: ConversationEntry) {
        self.context.push(entry);
    }

    /// Return the session's cancellation token, creating one if absent.
    pub fn ensure_cancel_token(&mut self) -> CancellationToken {
        self.cancel_token
            .get_or_insert_with(CancellationToken::new)
            .clone()
    }

    /// Replace the cancellation token with a fresh one.
    pub fn rotate_cancel_token(&mut self) -> CancellationToken {
        let token = CancellationToken::new();
        self.cancel_token = Some(token.clone());
        token
    }

    /// Mark `invocation_id` as the executing tool until the guard drops.
    ///
    /// The previous marker is restored on drop, so nested executions unwind
    /// correctly on success, error and abort alike.
    pub fn enter_tool(&mut self, invocation_id: impl Into<String>) -> CurrentToolGuard<'_> {
        let previous = self.current_tool.replace(invocation_id.into());
        CurrentToolGuard {
            session: self,
            previous,
        }
    }
}

/// Scope guard returned by [`Session::enter_tool`].
pub struct CurrentToolGuard<'a> {
    session: &'a mut Session,
    previous: Option<String>,
}

impl Deref for CurrentToolGuard<'_> {
    type Target = Session;

    fn deref(&self) -> &Session {
        self.session
    }
}

impl DerefMut for CurrentToolGuard<'_> {
    fn deref_mut(&mut self) -> &mut Session {
        self.session
    }
}

impl Drop for CurrentToolGuard<'_> {
    fn drop(&mut self) {
        self.session.current_tool = self.previous.take();
    }
}
