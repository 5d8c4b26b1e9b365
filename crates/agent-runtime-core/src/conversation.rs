//! Conversation log entries, tool calls and tool result records.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// A model-issued request to invoke a named tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Correlation id used to pair the call with its result in the log.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Tool name.
    pub name: String,
    /// Tool arguments.
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    /// Create a tool call without a correlation id.
    #[must_use]
    pub fn new(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            id: None,
            name: name.into(),
            arguments,
        }
    }

    /// Attach a correlation id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Arguments as a JSON object value.
    #[must_use]
    pub fn arguments_value(&self) -> Value {
        Value::Object(self.arguments.clone())
    }
}

/// One entry of the conversation log (context window).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum ConversationEntry {
    /// A user message.
    User { content: String },
    /// An assistant message, possibly requesting tools.
    Assistant {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    /// The result of a tool call, answering the preceding assistant entry.
    ToolResult {
        tool_call_id: String,
        content: Value,
        #[serde(default)]
        is_error: bool,
    },
}

impl ConversationEntry {
    /// Create a user entry.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    /// Create an assistant entry.
    #[must_use]
    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self::Assistant {
            content: content.into(),
            tool_calls,
        }
    }

    /// Whether this is a user entry.
    #[must_use]
    pub const fn is_user(&self) -> bool {
        matches!(self, Self::User { .. })
    }
}

/// Outcome of a single tool invocation.
///
/// Abort is kept distinct from error so callers never have to inspect the
/// payload to find out whether the turn should stop.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    /// The tool returned a value.
    Success(Value),
    /// The tool failed; the message is shown to the model as the tool output.
    Error(String),
    /// Cancellation won the race against the tool.
    Aborted,
}

impl ToolOutcome {
    /// Whether cancellation won.
    #[must_use]
    pub const fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }

    /// Whether the tool failed.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// The value recorded in the result log and the conversation.
    #[must_use]
    pub fn payload(&self) -> Value {
        match self {
            Self::Success(value) => value.clone(),
            Self::Error(message) => json!({ "error": message }),
            Self::Aborted => json!({ "aborted": true }),
        }
    }
}

/// Record of one tool invocation, accumulated per turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultRecord {
    /// Tool name.
    pub tool: String,
    /// Arguments the tool was called with.
    pub arguments: Map<String, Value>,
    /// Success payload, `{"error": ..}` or `{"aborted": true}`.
    pub result: Value,
    /// Correlation id of the originating call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Whether cancellation won the race.
    pub aborted: bool,
}

impl ToolResultRecord {
    /// Build a record from a call and its outcome.
    #[must_use]
    pub fn from_outcome(call: &ToolCall, outcome: &ToolOutcome) -> Self {
        Self {
            tool: call.name.clone(),
            arguments: call.arguments.clone(),
            result: outcome.payload(),
            tool_call_id: call.id.clone(),
            aborted: outcome.is_aborted(),
        }
    }
}
