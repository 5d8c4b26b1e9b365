//! Scripted agent demo: a canned model driving real tools through the
//! configured execution backend.
//!
//! Run with: cargo run -p scripted-agent -- [sandbox-config.json] [prompt]
//!
//! Without a config file the local backend is used in the current directory.
//! Press Ctrl-C to abort the running turn.

use std::{path::PathBuf, sync::Arc, time::Duration};

use agent_runtime_core::{
    AbortRegistry, ConversationEntry, EventBus, ModelClient, ModelError, ModelResponse,
    RuntimeEvent, Session, SessionConfig, ToolCall, ToolContext, ToolError, ToolInvoker,
};
use agent_runtime_executor::{AutoApproveHandler, GatedInvoker};
use agent_runtime_sandbox::SandboxConfig;
use agent_runtime_session::{AgentRunner, BACKEND_METADATA_KEY, CONTINUE_QUERY};
use anyhow::Context;
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SESSION_ID: &str = "demo";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => {
            let raw = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("reading {path}"))?;
            SandboxConfig::from_json_str(&raw).with_context(|| format!("parsing {path}"))?
        }
        None => SandboxConfig::local(std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))),
    };
    let prompt = args
        .next()
        .unwrap_or_else(|| "What is in this directory?".to_string());

    let events = Arc::new(EventBus::new());
    let registry = Arc::new(AbortRegistry::with_events(Arc::clone(&events)));
    let tools: Arc<dyn ToolInvoker> = Arc::new(
        GatedInvoker::new(Arc::new(SandboxTools), Arc::new(AutoApproveHandler))
            .with_timeout(Duration::from_secs(30)),
    );

    let runner = AgentRunner::with_sandbox(
        Arc::new(ScriptedModel),
        tools,
        Arc::clone(&registry),
        Arc::clone(&events),
        &config,
    )
    .await
    .context("creating execution backend")?;

    let mut live = events.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = live.recv().await {
            match event {
                RuntimeEvent::ToolStarted { tool, .. } => println!("  -> {tool}"),
                RuntimeEvent::ToolFinished {
                    tool,
                    aborted,
                    is_error,
                    ..
                } => println!("  <- {tool} (aborted: {aborted}, error: {is_error})"),
                other => tracing::debug!(?other, "event"),
            }
        }
    });

    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            registry.request_abort(SESSION_ID);
        }
    });

    let mut session = Session::new(SESSION_ID, SessionConfig::default());
    let outcome = runner.run_conversation(&prompt, &mut session, 3).await;

    for response in &outcome.responses {
        println!("{response}");
    }
    if outcome.aborted {
        println!("(aborted)");
    }

    interrupt.abort();
    printer.abort();
    runner.release(SESSION_ID);

    match outcome.error {
        Some(error) => Err(anyhow::anyhow!(error)),
        None => Ok(()),
    }
}

/// Lists the working directory, then summarises what the tool returned.
struct ScriptedModel;

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn query(
        &self,
        context: &[ConversationEntry],
        _config: &SessionConfig,
    ) -> Result<ModelResponse, ModelError> {
        match context.last() {
            Some(ConversationEntry::User { content }) if content == CONTINUE_QUERY => {
                Ok(ModelResponse::text("Nothing more to do."))
            }
            Some(ConversationEntry::User { .. }) => Ok(ModelResponse::tool_calls(
                "Let me look around.",
                vec![ToolCall::new("list_dir", object(json!({ "path": "." })))],
            )),
            Some(ConversationEntry::ToolResult {
                content,
                is_error: false,
                ..
            }) => {
                let count = content.as_array().map_or(0, Vec::len);
                Ok(ModelResponse::text(format!(
                    "The directory holds {count} entries."
                )))
            }
            Some(ConversationEntry::ToolResult { content, .. }) => Ok(ModelResponse::text(
                format!("Listing failed: {}", content["error"]),
            )),
            _ => Err(ModelError::InvalidResponse(
                "nothing to answer".to_string(),
            )),
        }
    }
}

/// Filesystem and shell tools backed by the session's execution adapter.
struct SandboxTools;

#[async_trait]
impl ToolInvoker for SandboxTools {
    async fn invoke(&self, call: ToolCall, ctx: ToolContext) -> Result<Value, ToolError> {
        tracing::debug!(
            tool = %call.name,
            backend = ?ctx.execution.get_metadata(BACKEND_METADATA_KEY),
            "running sandbox tool"
        );
        let adapter = ctx
            .execution
            .adapter
            .ok_or_else(|| ToolError::Failed("no execution backend".to_string()))?;

        match call.name.as_str() {
            "list_dir" => {
                let entries = adapter.list_dir(string_arg(&call, "path")?).await?;
                Ok(json!(entries))
            }
            "read_file" => Ok(json!(adapter.read_file(string_arg(&call, "path")?).await?)),
            "write_file" => {
                adapter
                    .write_file(string_arg(&call, "path")?, string_arg(&call, "contents")?)
                    .await?;
                Ok(json!({ "written": true }))
            }
            "shell" => {
                let output = adapter.run_command(string_arg(&call, "command")?).await?;
                Ok(json!({
                    "exit_code": output.exit_code,
                    "stdout": output.stdout,
                    "stderr": output.stderr,
                }))
            }
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }
}

fn string_arg<'a>(call: &'a ToolCall, key: &str) -> Result<&'a str, ToolError> {
    call.arguments
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidArguments(format!("`{key}` must be a string")))
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
