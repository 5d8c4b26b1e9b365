//! Agent runner: per-turn entry point with abort fast path and error capture.

use std::{panic::AssertUnwindSafe, path::PathBuf, sync::Arc};

use agent_runtime_core::{
    AbortRegistry, ConversationEntry, EventBus, ExecutionAdapter, ExecutionContext, ModelClient,
    Session, ToolInvoker, ToolResultRecord,
};
use agent_runtime_executor::ToolCallExecutor;
use agent_runtime_sandbox::{AdapterFactory, FactoryError, SandboxConfig};
use futures::FutureExt;
use serde::Serialize;
use serde_json::json;

use crate::driver::{ConversationDriver, TurnEnd, TurnProgress};

/// User-facing response of a turn stopped by an abort request.
pub const ABORTED_MESSAGE: &str = "Operation aborted by user";

/// Query sent for every turn after the first in [`AgentRunner::run_conversation`].
pub const CONTINUE_QUERY: &str = "Continue.";

/// Metadata key under which each turn's context names the execution backend.
pub const BACKEND_METADATA_KEY: &str = "backend";

const MISSING_SESSION_ID: &str = "missing session id";

/// Result of one turn. Never an `Err`: failures land in `error`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TurnResult {
    /// Final assistant text, or [`ABORTED_MESSAGE`] for aborted turns.
    pub response: Option<String>,
    /// Failure message, if the turn failed.
    pub error: Option<String>,
    /// Whether the turn was stopped by an abort.
    pub aborted: bool,
    /// Tool result records of the turn, in execution order.
    pub result_log: Vec<ToolResultRecord>,
    /// Number of model queries issued.
    pub iterations: usize,
}

impl TurnResult {
    fn failed(error: impl Into<String>, aborted: bool, progress: TurnProgress) -> Self {
        Self {
            response: None,
            error: Some(error.into()),
            aborted,
            result_log: progress.results,
            iterations: progress.iterations,
        }
    }

    fn aborted(progress: TurnProgress) -> Self {
        Self {
            response: Some(ABORTED_MESSAGE.to_string()),
            error: None,
            aborted: true,
            result_log: progress.results,
            iterations: progress.iterations,
        }
    }

    /// Whether the turn ended without error.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Whether a multi-turn loop should stop after this turn.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.aborted || self.error.is_some() || self.result_log.is_empty()
    }
}

/// Outcome of [`AgentRunner::run_conversation`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConversationResult {
    /// Final responses, one per completed turn.
    pub responses: Vec<String>,
    /// Number of turns run.
    pub turns: usize,
    /// Failure of the last turn, if any.
    pub error: Option<String>,
    /// Whether the loop stopped on an abort.
    pub aborted: bool,
}

/// Drives turns for any number of sessions.
///
/// Sessions share only the abort registry and the event bus; each turn
/// borrows its session mutably, so one session never runs two turns at once.
pub struct AgentRunner {
    driver: ConversationDriver,
    registry: Arc<AbortRegistry>,
    events: Arc<EventBus>,
    adapter: Option<Arc<dyn ExecutionAdapter>>,
    working_dir: PathBuf,
}

impl AgentRunner {
    /// Create a runner whose tools publish on `events`.
    #[must_use]
    pub fn new(
        model: Arc<dyn ModelClient>,
        invoker: Arc<dyn ToolInvoker>,
        registry: Arc<AbortRegistry>,
        events: Arc<EventBus>,
    ) -> Self {
        let executor = ToolCallExecutor::new(invoker).with_events(Arc::clone(&events));
        Self::from_driver(ConversationDriver::new(model, executor), registry, events)
    }

    /// Create a runner around a preconfigured driver.
    #[must_use]
    pub fn from_driver(
        driver: ConversationDriver,
        registry: Arc<AbortRegistry>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            driver,
            registry,
            events,
            adapter: None,
            working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Create a runner and its execution adapter from sandbox configuration.
    ///
    /// The adapter is built once here and reused for every turn.
    ///
    /// # Errors
    /// Returns error if the requested backend is unavailable and fallback is
    /// disabled.
    pub async fn with_sandbox(
        model: Arc<dyn ModelClient>,
        invoker: Arc<dyn ToolInvoker>,
        registry: Arc<AbortRegistry>,
        events: Arc<EventBus>,
        config: &SandboxConfig,
    ) -> Result<Self, FactoryError> {
        let selection = AdapterFactory::with_events(Arc::clone(&events))
            .create(config)
            .await?;
        let runner = Self::new(model, invoker, registry, events).with_adapter(selection.adapter);
        Ok(match &config.local.working_dir {
            Some(dir) => runner.with_working_dir(dir.clone()),
            None => runner,
        })
    }

    /// Attach the execution adapter tools run commands through.
    #[must_use]
    pub fn with_adapter(mut self, adapter: Arc<dyn ExecutionAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    /// Set the working directory reported to tools.
    #[must_use]
    pub fn with_working_dir(mut self, working_dir: impl Into<PathBuf>) -> Self {
        self.working_dir = working_dir.into();
        self
    }

    /// The shared abort registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<AbortRegistry> {
        &self.registry
    }

    /// The shared event bus.
    #[must_use]
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Request that the session's current or next turn stop.
    pub fn abort(&self, session_id: &str) {
        self.registry.request_abort(session_id);
    }

    /// Run one turn: append the query, drive the model and tools to a final
    /// answer, and report the outcome.
    ///
    /// The user entry is appended only if the log does not already end with
    /// one, so retrying a failed turn does not duplicate it.
    pub async fn process_turn(&self, query: &str, session: &mut Session) -> TurnResult {
        if session.id.trim().is_empty() {
            tracing::error!("turn requested without a session id");
            return TurnResult::failed(MISSING_SESSION_ID, false, TurnProgress::default());
        }

        if self.registry.is_aborted(&session.id) {
            tracing::info!(session_id = %session.id, "abort pending, skipping turn");
            self.reset_abort(session);
            return TurnResult::aborted(TurnProgress::default());
        }

        let token = session.ensure_cancel_token();
        self.registry.attach_token(&session.id, token.clone());

        if !session.last_entry().is_some_and(ConversationEntry::is_user) {
            session.push(ConversationEntry::user(query));
        }

        let mut ctx = ExecutionContext::new(self.working_dir.clone()).with_cancel(token);
        if let Some(adapter) = &self.adapter {
            ctx.set_metadata(BACKEND_METADATA_KEY, json!(adapter.kind()));
            ctx = ctx.with_adapter(Arc::clone(adapter));
        }

        let mut progress = TurnProgress::default();
        let run = AssertUnwindSafe(self.driver.run(session, &ctx, &mut progress))
            .catch_unwind()
            .await;

        let result = match run {
            Ok(Ok(TurnEnd::Completed(text))) => TurnResult {
                response: Some(text),
                error: None,
                aborted: false,
                result_log: progress.results,
                iterations: progress.iterations,
            },
            Ok(Ok(TurnEnd::Aborted)) => {
                self.reset_abort(session);
                TurnResult::aborted(progress)
            }
            Ok(Err(err)) => {
                tracing::error!(session_id = %session.id, error = %err, "turn failed");
                TurnResult::failed(err.to_string(), self.registry.is_aborted(&session.id), progress)
            }
            Err(_) => {
                tracing::error!(session_id = %session.id, "turn panicked");
                TurnResult::failed(
                    "Turn failed unexpectedly",
                    self.registry.is_aborted(&session.id),
                    progress,
                )
            }
        };

        if result.is_ok() {
            tracing::info!(
                session_id = %session.id,
                aborted = result.aborted,
                iterations = result.iterations,
                tools = result.result_log.len(),
                "turn completed"
            );
            self.events
                .publish_completed(&session.id, result.response.clone());
        }
        result
    }

    /// Run turns until one finishes without tool activity, aborts or fails,
    /// for at most `max_turns` turns.
    ///
    /// The first turn sends `initial_query`; later turns send
    /// [`CONTINUE_QUERY`].
    pub async fn run_conversation(
        &self,
        initial_query: &str,
        session: &mut Session,
        max_turns: usize,
    ) -> ConversationResult {
        let mut outcome = ConversationResult::default();
        let mut query = initial_query;

        while outcome.turns < max_turns {
            let turn = self.process_turn(query, session).await;
            outcome.turns += 1;

            if !turn.aborted {
                outcome.responses.extend(turn.response.clone());
            }
            if turn.is_done() {
                outcome.error = turn.error;
                outcome.aborted = turn.aborted;
                break;
            }
            query = CONTINUE_QUERY;
        }
        outcome
    }

    /// Forget the session: drop its pending abort flag and registered token.
    ///
    /// The registry keeps a token for every session that ran a turn, so call
    /// this once a session ends.
    pub fn release(&self, session_id: &str) {
        self.registry.detach(session_id);
    }

    /// Consume the abort flag and give the session a fresh token.
    fn reset_abort(&self, session: &mut Session) {
        self.registry.clear(&session.id);
        let token = session.rotate_cancel_token();
        self.registry.attach_token(&session.id, token);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use agent_runtime_core::{BackendKind, ModelError, ModelResponse, RuntimeEvent, SessionConfig};
    use agent_runtime_sandbox::LocalAdapter;

    use super::*;
    use crate::test_support::{ScriptedModel, TestTool, tool_call};

    fn runner(model: &Arc<ScriptedModel>, tool: &Arc<TestTool>) -> AgentRunner {
        AgentRunner::new(
            model.clone(),
            tool.clone(),
            Arc::new(AbortRegistry::new()),
            Arc::new(EventBus::new()),
        )
    }

    fn session() -> Session {
        Session::new("s1", SessionConfig::default())
    }

    #[tokio::test]
    async fn plain_answer() {
        let model = ScriptedModel::new(vec![Ok(ModelResponse::text("Hello!"))]);
        let runner = runner(&model, &TestTool::new());
        let mut session = session();

        let result = runner.process_turn("Hi", &mut session).await;

        assert_eq!(result.response.as_deref(), Some("Hello!"));
        assert!(!result.aborted);
        assert!(result.error.is_none());
        assert!(result.result_log.is_empty());
        assert_eq!(
            session.context,
            vec![
                ConversationEntry::user("Hi"),
                ConversationEntry::assistant("Hello!", Vec::new()),
            ]
        );
        assert!(runner.events().history().contains(&RuntimeEvent::ProcessingCompleted {
            session_id: "s1".into(),
            response: Some("Hello!".into()),
        }));
    }

    #[tokio::test]
    async fn tool_then_answer() {
        let model = ScriptedModel::new(vec![
            Ok(ModelResponse::tool_calls(
                "",
                vec![tool_call("read_file", json!({ "path": "a.txt" })).with_id("c1")],
            )),
            Ok(ModelResponse::text("The file says hi")),
        ]);
        let runner = runner(&model, &TestTool::new());
        let mut session = session();

        let result = runner.process_turn("Read a.txt", &mut session).await;

        assert_eq!(result.response.as_deref(), Some("The file says hi"));
        assert_eq!(result.iterations, 2);
        assert_eq!(result.result_log.len(), 1);
        let record = &result.result_log[0];
        assert_eq!(record.tool, "read_file");
        assert_eq!(record.result, json!({ "path": "a.txt" }));
        assert!(!record.aborted);
        assert!(matches!(
            &session.context[2],
            ConversationEntry::ToolResult { tool_call_id, is_error: false, .. } if tool_call_id == "c1"
        ));
    }

    #[tokio::test]
    async fn tool_error_is_reported_to_model() {
        let model = ScriptedModel::new(vec![
            Ok(ModelResponse::tool_calls("", vec![tool_call("fail", json!({}))])),
            Ok(ModelResponse::text("That failed")),
        ]);
        let runner = runner(&model, &TestTool::new());
        let mut session = session();

        let result = runner.process_turn("Try it", &mut session).await;

        assert!(result.is_ok());
        assert_eq!(result.response.as_deref(), Some("That failed"));
        assert_eq!(result.result_log[0].result, json!({ "error": "boom" }));

        let second_query = &model.seen()[1];
        assert!(matches!(
            second_query.last(),
            Some(ConversationEntry::ToolResult { is_error: true, .. })
        ));
    }

    #[tokio::test]
    async fn abort_during_tool_stops_turn_and_resets() {
        let model = ScriptedModel::new(vec![
            Ok(ModelResponse::tool_calls("", vec![tool_call("block", json!({}))])),
            Ok(ModelResponse::text("next turn")),
        ]);
        let tool = TestTool::new();
        let runner = runner(&model, &tool);
        let mut session = session();

        let registry = Arc::clone(runner.registry());
        let started = tool.started();
        tokio::spawn(async move {
            started.notified().await;
            registry.request_abort("s1");
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            runner.process_turn("Run the long thing", &mut session),
        )
        .await
        .unwrap();

        assert!(result.aborted);
        assert_eq!(result.response.as_deref(), Some(ABORTED_MESSAGE));
        assert_eq!(result.result_log.len(), 1);
        assert!(result.result_log[0].aborted);
        assert_eq!(model.queries(), 1);

        assert!(!runner.registry().is_aborted("s1"));
        let token = session.cancel_token.clone().unwrap();
        assert!(!token.is_cancelled());

        let next = runner.process_turn("Anything else?", &mut session).await;
        assert!(!next.aborted);
        assert_eq!(next.response.as_deref(), Some("next turn"));
    }

    #[tokio::test]
    async fn pending_abort_short_circuits_turn() {
        let model = ScriptedModel::new(vec![Ok(ModelResponse::text("after"))]);
        let runner = runner(&model, &TestTool::new());
        let mut session = session();
        let stale = session.ensure_cancel_token();
        runner.registry().attach_token("s1", stale.clone());

        runner.abort("s1");
        assert!(stale.is_cancelled());

        let result = runner.process_turn("Hi", &mut session).await;
        assert!(result.aborted);
        assert_eq!(result.response.as_deref(), Some(ABORTED_MESSAGE));
        assert_eq!(model.queries(), 0);
        assert!(session.context.is_empty());
        assert!(!runner.registry().is_aborted("s1"));
        assert!(!session.cancel_token.clone().unwrap().is_cancelled());

        let result = runner.process_turn("Hi", &mut session).await;
        assert_eq!(result.response.as_deref(), Some("after"));
    }

    #[tokio::test]
    async fn abort_is_scoped_to_its_session() {
        let model = ScriptedModel::new(vec![Ok(ModelResponse::text("fine"))]);
        let runner = runner(&model, &TestTool::new());
        runner.abort("other");

        let result = runner.process_turn("Hi", &mut session()).await;
        assert!(!result.aborted);
        assert!(runner.registry().is_aborted("other"));
    }

    #[tokio::test]
    async fn missing_session_id_fails_without_side_effects() {
        let model = ScriptedModel::new(vec![Ok(ModelResponse::text("unused"))]);
        let runner = runner(&model, &TestTool::new());
        let mut session = Session::new("", SessionConfig::default());

        let result = runner.process_turn("Hi", &mut session).await;

        assert_eq!(result.error.as_deref(), Some("missing session id"));
        assert!(!result.aborted);
        assert!(session.context.is_empty());
        assert_eq!(model.queries(), 0);
    }

    #[tokio::test]
    async fn model_failure_becomes_error_and_retry_keeps_single_user_entry() {
        let model = ScriptedModel::new(vec![
            Err(ModelError::Request("upstream down".into())),
            Ok(ModelResponse::text("recovered")),
        ]);
        let runner = runner(&model, &TestTool::new());
        let mut session = session();

        let failed = runner.process_turn("Hi", &mut session).await;
        assert_eq!(failed.error.as_deref(), Some("Model request failed: upstream down"));
        assert!(!failed.aborted);
        assert_eq!(session.context, vec![ConversationEntry::user("Hi")]);

        let retried = runner.process_turn("Hi", &mut session).await;
        assert_eq!(retried.response.as_deref(), Some("recovered"));
        assert_eq!(
            session.context.iter().filter(|e| e.is_user()).count(),
            1,
            "user entry must not be duplicated"
        );
    }

    #[tokio::test]
    async fn conversation_continues_until_a_turn_uses_no_tools() {
        let model = ScriptedModel::new(vec![
            Ok(ModelResponse::tool_calls("", vec![tool_call("echo", json!({}))])),
            Ok(ModelResponse::text("first")),
            Ok(ModelResponse::text("second")),
        ]);
        let runner = runner(&model, &TestTool::new());
        let mut session = session();

        let outcome = runner.run_conversation("Start", &mut session, 5).await;

        assert_eq!(outcome.responses, vec!["first", "second"]);
        assert_eq!(outcome.turns, 2);
        assert!(outcome.error.is_none());
        assert!(!outcome.aborted);
        assert!(session.context.contains(&ConversationEntry::user(CONTINUE_QUERY)));
    }

    #[tokio::test]
    async fn conversation_respects_turn_limit() {
        let model = ScriptedModel::new(vec![
            Ok(ModelResponse::tool_calls("", vec![tool_call("echo", json!({}))])),
            Ok(ModelResponse::text("first")),
        ]);
        let runner = runner(&model, &TestTool::new());

        let outcome = runner.run_conversation("Start", &mut session(), 1).await;

        assert_eq!(outcome.turns, 1);
        assert_eq!(outcome.responses, vec!["first"]);
    }

    #[tokio::test]
    async fn conversation_stops_on_pending_abort() {
        let model = ScriptedModel::new(vec![Ok(ModelResponse::text("unused"))]);
        let runner = runner(&model, &TestTool::new());
        runner.abort("s1");

        let outcome = runner.run_conversation("Start", &mut session(), 3).await;

        assert!(outcome.aborted);
        assert_eq!(outcome.turns, 1);
        assert!(outcome.responses.is_empty());
    }

    #[tokio::test]
    async fn sandbox_runner_uses_local_adapter() {
        let dir = tempfile::tempdir().unwrap();
        let model = ScriptedModel::new(vec![Ok(ModelResponse::text("ok"))]);
        let runner = AgentRunner::with_sandbox(
            model,
            TestTool::new(),
            Arc::new(AbortRegistry::new()),
            Arc::new(EventBus::new()),
            &SandboxConfig::local(dir.path()),
        )
        .await
        .unwrap();

        assert_eq!(runner.working_dir, dir.path());
        assert!(matches!(
            runner.events().history().first(),
            Some(RuntimeEvent::BackendSelected { .. })
        ));
    }

    #[tokio::test]
    async fn tools_see_working_dir_and_backend() {
        let dir = tempfile::tempdir().unwrap();
        let model = ScriptedModel::new(vec![
            Ok(ModelResponse::tool_calls("", vec![tool_call("context", json!({}))])),
            Ok(ModelResponse::text("seen")),
        ]);
        let runner = runner(&model, &TestTool::new())
            .with_adapter(Arc::new(LocalAdapter::new(dir.path())))
            .with_working_dir(dir.path());

        let result = runner.process_turn("Where am I?", &mut session()).await;

        assert_eq!(
            result.result_log[0].result,
            json!({
                "working_dir": dir.path(),
                "backend": BackendKind::Local,
            })
        );
    }

    #[tokio::test]
    async fn turn_without_adapter_has_no_backend_metadata() {
        let model = ScriptedModel::new(vec![
            Ok(ModelResponse::tool_calls("", vec![tool_call("context", json!({}))])),
            Ok(ModelResponse::text("seen")),
        ]);
        let runner = runner(&model, &TestTool::new());

        let result = runner.process_turn("Where am I?", &mut session()).await;

        assert_eq!(result.result_log[0].result["backend"], json!(null));
    }

    #[tokio::test]
    async fn release_detaches_the_session_token() {
        let model = ScriptedModel::new(vec![Ok(ModelResponse::text("done"))]);
        let runner = runner(&model, &TestTool::new());
        let mut session = session();

        runner.process_turn("Hi", &mut session).await;
        assert!(runner.registry().has_token("s1"));
        let token = session.ensure_cancel_token();

        runner.release("s1");
        assert!(!runner.registry().has_token("s1"));
        runner.abort("s1");
        assert!(!token.is_cancelled());
        runner.release("s1");
    }
}
