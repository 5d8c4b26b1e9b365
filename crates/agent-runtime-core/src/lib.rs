//! Core abstractions for the agent runtime.
//!
//! This crate provides the fundamental building blocks:
//! - `Session` / `ConversationEntry` - Conversation state owned by the caller
//! - `AbortRegistry` - Session-keyed cancellation flags
//! - `EventBus` - Broadcast + history notification channel
//! - `ExecutionContext` - Per-invocation context (cancellation, adapter)
//! - Model, tool and execution adapter traits

pub mod abort;
pub mod context;
pub mod conversation;
pub mod events;
pub mod session;
pub mod traits;

pub use abort::AbortRegistry;
pub use context::ExecutionContext;
pub use conversation::{ConversationEntry, ToolCall, ToolOutcome, ToolResultRecord};
pub use events::{EventBus, RuntimeEvent};
pub use session::{CurrentToolGuard, PermissionMode, Session, SessionConfig, SessionId};
pub use traits::{
    AdapterError, BackendKind, CommandOutput, ExecutionAdapter, ModelClient, ModelError,
    ModelResponse, ToolContext, ToolError, ToolInvoker,
};
pub use tokio_util::sync::CancellationToken;
