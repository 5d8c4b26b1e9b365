//! Scripted collaborators shared by the driver and runner tests.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use agent_runtime_core::{
    ConversationEntry, ModelClient, ModelError, ModelResponse, SessionConfig, ToolCall,
    ToolContext, ToolError, ToolInvoker,
};
use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Notify;

use crate::runner::BACKEND_METADATA_KEY;

pub fn tool_call(name: &str, arguments: Value) -> ToolCall {
    let Value::Object(map) = arguments else {
        panic!("tool arguments must be an object");
    };
    ToolCall::new(name, map)
}

/// Replays a fixed list of responses and records what it was asked.
pub struct ScriptedModel {
    script: Mutex<VecDeque<Result<ModelResponse, ModelError>>>,
    seen: Mutex<Vec<Vec<ConversationEntry>>>,
}

impl ScriptedModel {
    pub fn new(script: Vec<Result<ModelResponse, ModelError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn queries(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn seen_lengths(&self) -> Vec<usize> {
        self.seen.lock().unwrap().iter().map(Vec::len).collect()
    }

    pub fn seen(&self) -> Vec<Vec<ConversationEntry>> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn query(
        &self,
        context: &[ConversationEntry],
        _config: &SessionConfig,
    ) -> Result<ModelResponse, ModelError> {
        self.seen.lock().unwrap().push(context.to_vec());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ModelError::Request("script exhausted".into())))
    }
}

/// Tool behaviour selected by name:
/// `echo` returns its arguments, `fail` errors, `block` never settles,
/// `context` reports the working directory and backend it was handed.
pub struct TestTool {
    invocations: AtomicUsize,
    started: Arc<Notify>,
}

impl TestTool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            invocations: AtomicUsize::new(0),
            started: Arc::new(Notify::new()),
        })
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    /// Notified once a `block` invocation is running.
    pub fn started(&self) -> Arc<Notify> {
        Arc::clone(&self.started)
    }
}

#[async_trait]
impl ToolInvoker for TestTool {
    async fn invoke(&self, call: ToolCall, ctx: ToolContext) -> Result<Value, ToolError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        match call.name.as_str() {
            "fail" => Err(ToolError::Failed("boom".into())),
            "context" => Ok(json!({
                "working_dir": ctx.execution.working_dir,
                "backend": ctx.execution.get_metadata(BACKEND_METADATA_KEY),
            })),
            "block" => {
                self.started.notify_one();
                std::future::pending::<()>().await;
                Ok(Value::Null)
            }
            _ => Ok(call.arguments_value()),
        }
    }
}
