//! Session-keyed abort registry.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use tokio_util::sync::CancellationToken;

use crate::{EventBus, SessionId};

/// Abort flags and cancellation tokens keyed by session id.
///
/// Shared between concurrently running sessions through an `Arc`. A flag set
/// for one session never affects another.
///
/// Tokens stay registered until [`AbortRegistry::detach`] is called, so
/// owners must detach a session once it ends.
#[derive(Default)]
pub struct AbortRegistry {
    state: RwLock<AbortState>,
    events: Option<Arc<EventBus>>,
}

/// Flags and tokens share one lock so an abort request and a token
/// attachment never interleave.
#[derive(Default)]
struct AbortState {
    flags: HashSet<SessionId>,
    tokens: HashMap<SessionId, CancellationToken>,
}

impl AbortRegistry {
    /// Create a registry without a notification channel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry that announces abort requests on `events`.
    #[must_use]
    pub fn with_events(events: Arc<EventBus>) -> Self {
        Self {
            events: Some(events),
            ..Self::default()
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, AbortState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, AbortState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Flag a session as aborted and cancel its attached token.
    pub fn request_abort(&self, session_id: &str) {
        tracing::info!(session_id, "abort requested");
        {
            let mut state = self.write();
            state.flags.insert(session_id.to_string());
            if let Some(token) = state.tokens.get(session_id) {
                token.cancel();
            }
        }

        if let Some(events) = &self.events {
            events.publish_abort_requested(session_id);
        }
    }

    /// Whether the session is flagged.
    #[must_use]
    pub fn is_aborted(&self, session_id: &str) -> bool {
        self.read().flags.contains(session_id)
    }

    /// Clear the session's flag. Returns whether it was set.
    pub fn clear(&self, session_id: &str) -> bool {
        self.write().flags.remove(session_id)
    }

    /// Register the token an abort request should cancel.
    ///
    /// Replaces any previously attached token for the session. If the
    /// session is already flagged the token is cancelled immediately.
    pub fn attach_token(&self, session_id: &str, token: CancellationToken) {
        let mut state = self.write();
        if state.flags.contains(session_id) {
            token.cancel();
        }
        state.tokens.insert(session_id.to_string(), token);
    }

    /// Whether a token is currently attached for the session.
    #[must_use]
    pub fn has_token(&self, session_id: &str) -> bool {
        self.read().tokens.contains_key(session_id)
    }

    /// Forget the session entirely: drop its token and clear its flag.
    pub fn detach(&self, session_id: &str) {
        let mut state = self.write();
        state.tokens.remove(session_id);
        state.flags.remove(session_id);
    }
}
