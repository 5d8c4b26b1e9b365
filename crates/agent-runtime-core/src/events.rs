//! Broadcast + history notification channel for runtime events.

use std::{
    collections::VecDeque,
    sync::{Arc, PoisonError, RwLock},
};

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::{BackendKind, SessionId};

/// Number of events retained for late subscribers.
const HISTORY_LIMIT: usize = 1024;

/// Events published by the runtime for external listeners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuntimeEvent {
    /// An abort was requested for a session.
    SessionAbortRequested { session_id: SessionId },
    /// A turn finished processing.
    ProcessingCompleted {
        session_id: SessionId,
        response: Option<String>,
    },
    /// A tool invocation started.
    ToolStarted {
        session_id: SessionId,
        invocation_id: String,
        tool: String,
    },
    /// A tool invocation was recorded.
    ToolFinished {
        session_id: SessionId,
        invocation_id: String,
        tool: String,
        aborted: bool,
        is_error: bool,
    },
    /// The adapter factory settled on a backend.
    BackendSelected {
        kind: BackendKind,
        fallback_reason: Option<String>,
    },
}

/// Event bus with broadcast and history support.
///
/// Late subscribers receive the retained history, then live events.
/// Owned by the caller; there is no process-global instance.
pub struct EventBus {
    history: RwLock<VecDeque<RuntimeEvent>>,
    sender: broadcast::Sender<RuntimeEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create a new event bus.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(HISTORY_LIMIT);
        Self {
            history: RwLock::new(VecDeque::with_capacity(32)),
            sender,
        }
    }

    /// Publish an event to live listeners and history.
    pub fn publish(&self, event: RuntimeEvent) {
        tracing::trace!(?event, "publishing runtime event");
        let _ = self.sender.send(event.clone()); // no listeners is fine

        let mut history = self
            .history
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if history.len() >= HISTORY_LIMIT {
            history.pop_front();
        }
        history.push_back(event);
    }

    /// Publish a session abort request.
    pub fn publish_abort_requested(&self, session_id: &str) {
        self.publish(RuntimeEvent::SessionAbortRequested {
            session_id: session_id.to_string(),
        });
    }

    /// Publish a processing-completed notification.
    pub fn publish_completed(&self, session_id: &str, response: Option<String>) {
        self.publish(RuntimeEvent::ProcessingCompleted {
            session_id: session_id.to_string(),
            response,
        });
    }

    /// Get a receiver for live events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.sender.subscribe()
    }

    /// Snapshot of the retained history.
    #[must_use]
    pub fn history(&self) -> Vec<RuntimeEvent> {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Stream that yields history first, then live events.
    #[must_use]
    pub fn history_plus_stream(&self) -> futures::stream::BoxStream<'static, RuntimeEvent> {
        let (history, rx) = (self.history(), self.subscribe());

        let hist = futures::stream::iter(history);
        let live = BroadcastStream::new(rx).filter_map(|res| async move { res.ok() });

        Box::pin(hist.chain(live))
    }

    /// Forward a stream of events into this bus.
    pub fn spawn_forwarder<S>(self: Arc<Self>, stream: S) -> tokio::task::JoinHandle<()>
    where
        S: futures::Stream<Item = RuntimeEvent> + Send + 'static,
    {
        tokio::spawn(async move {
            tokio::pin!(stream);

            while let Some(event) = stream.next().await {
                self.publish(event);
            }
        })
    }
}
