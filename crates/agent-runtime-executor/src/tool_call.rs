//! Tool call execution with cancellation racing and exactly-once recording.

use std::{any::Any, sync::Arc};

use agent_runtime_core::{
    CancellationToken, ConversationEntry, EventBus, ExecutionContext, RuntimeEvent, Session,
    ToolCall, ToolContext, ToolError, ToolInvoker, ToolOutcome, ToolResultRecord,
};
use serde_json::Value;
use tokio::task::JoinError;
use uuid::Uuid;

/// What happens to a tool task once cancellation wins the race.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CancelPolicy {
    /// Leave the task running unobserved. Its eventual result is discarded.
    #[default]
    Detach,
    /// Abort the spawned task at its next await point.
    AbortTask,
}

/// Runs single tool calls and records their outcome.
///
/// Every call that enters [`ToolCallExecutor::execute`] leaves exactly one
/// record in the result sequence and, when it carries a correlation id,
/// exactly one tool-result entry in the conversation log.
#[derive(Clone)]
pub struct ToolCallExecutor {
    invoker: Arc<dyn ToolInvoker>,
    events: Option<Arc<EventBus>>,
    cancel_policy: CancelPolicy,
}

impl ToolCallExecutor {
    /// Create an executor around a tool invoker.
    #[must_use]
    pub fn new(invoker: Arc<dyn ToolInvoker>) -> Self {
        Self {
            invoker,
            events: None,
            cancel_policy: CancelPolicy::default(),
        }
    }

    /// Publish tool start/finish events on `events`.
    #[must_use]
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Choose what happens to a tool task that loses to cancellation.
    #[must_use]
    pub const fn with_cancel_policy(mut self, cancel_policy: CancelPolicy) -> Self {
        self.cancel_policy = cancel_policy;
        self
    }

    /// Execute one tool call on behalf of `session`.
    ///
    /// Never fails: tool errors and panics become [`ToolOutcome::Error`], and
    /// cancellation becomes [`ToolOutcome::Aborted`] after the abort has been
    /// recorded.
    pub async fn execute(
        &self,
        call: &ToolCall,
        session: &mut Session,
        results: &mut Vec<ToolResultRecord>,
        ctx: &ExecutionContext,
    ) -> ToolOutcome {
        let invocation_id = Uuid::new_v4().to_string();
        let mut session = session.enter_tool(invocation_id.clone());

        tracing::debug!(
            session_id = %session.id,
            tool = %call.name,
            %invocation_id,
            "executing tool"
        );
        self.publish(RuntimeEvent::ToolStarted {
            session_id: session.id.clone(),
            invocation_id: invocation_id.clone(),
            tool: call.name.clone(),
        });

        let tool_ctx = ToolContext {
            session_id: session.id.clone(),
            invocation_id: invocation_id.clone(),
            tool_call_id: call.id.clone(),
            permission_mode: session.config.permission_mode,
            execution: ctx.clone(),
        };
        let outcome = self.race(call.clone(), tool_ctx).await;

        match &outcome {
            ToolOutcome::Success(_) => {
                tracing::debug!(tool = %call.name, %invocation_id, "tool succeeded");
            }
            ToolOutcome::Error(error) => {
                tracing::debug!(tool = %call.name, %invocation_id, %error, "tool failed");
            }
            ToolOutcome::Aborted => {
                tracing::warn!(tool = %call.name, %invocation_id, "tool aborted");
            }
        }

        record_outcome(call, &outcome, &mut session, results);
        self.publish(RuntimeEvent::ToolFinished {
            session_id: session.id.clone(),
            invocation_id,
            tool: call.name.clone(),
            aborted: outcome.is_aborted(),
            is_error: outcome.is_error(),
        });
        outcome
    }

    /// Race the invocation against the context's cancellation signal.
    async fn race(&self, call: ToolCall, ctx: ToolContext) -> ToolOutcome {
        let cancel = ctx.execution.cancel.clone();
        if cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return ToolOutcome::Aborted;
        }

        let invoker = Arc::clone(&self.invoker);
        let mut task = tokio::spawn(async move { invoker.invoke(call, ctx).await });

        let Some(cancel) = cancel else {
            return settle(task.await);
        };

        // A task that already settled wins over a late cancellation.
        tokio::select! {
            biased;
            joined = &mut task => settle(joined),
            () = cancel.cancelled() => {
                if self.cancel_policy == CancelPolicy::AbortTask {
                    task.abort();
                }
                ToolOutcome::Aborted
            }
        }
    }

    fn publish(&self, event: RuntimeEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }
}

/// Append the outcome to the conversation log and the result sequence.
///
/// Used for calls that settle without being invoked, so they obey the same
/// recording rule as executed ones.
pub fn record_outcome(
    call: &ToolCall,
    outcome: &ToolOutcome,
    session: &mut Session,
    results: &mut Vec<ToolResultRecord>,
) {
    if let Some(id) = &call.id {
        session.push(ConversationEntry::ToolResult {
            tool_call_id: id.clone(),
            content: outcome.payload(),
            is_error: !matches!(outcome, ToolOutcome::Success(_)),
        });
    }
    results.push(ToolResultRecord::from_outcome(call, outcome));
}

fn settle(joined: Result<Result<Value, ToolError>, JoinError>) -> ToolOutcome {
    match joined {
        Ok(Ok(value)) => ToolOutcome::Success(value),
        Ok(Err(err)) => ToolOutcome::Error(err.to_string()),
        Err(err) if err.is_panic() => {
            let payload = err.into_panic();
            ToolOutcome::Error(format!("Tool panicked: {}", panic_message(payload.as_ref())))
        }
        Err(err) => ToolOutcome::Error(format!("Tool task failed: {err}")),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use agent_runtime_core::SessionConfig;
    use async_trait::async_trait;
    use serde_json::{Map, json};
    use tokio::sync::{Notify, mpsc, oneshot};

    use super::*;

    enum Behavior {
        Return(Value),
        Fail(&'static str),
        Panic,
        /// Fire the call's cancellation signal, then return the value.
        CancelThenReturn(Value),
        /// Wait for `release`, then report completion on `done`.
        Block {
            release: Arc<Notify>,
            done: mpsc::UnboundedSender<()>,
        },
        /// Never settles; reports on `dropped` when the future is dropped.
        Hang { dropped: mpsc::UnboundedSender<()> },
    }

    struct StubTool {
        behavior: Behavior,
        calls: AtomicUsize,
    }

    impl StubTool {
        fn new(behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                calls: AtomicUsize::new(0),
            })
        }
    }

    struct DropSignal(mpsc::UnboundedSender<()>);

    impl Drop for DropSignal {
        fn drop(&mut self) {
            let _ = self.0.send(());
        }
    }

    #[async_trait]
    impl ToolInvoker for StubTool {
        async fn invoke(&self, call: ToolCall, ctx: ToolContext) -> Result<Value, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(ctx.tool_call_id, call.id);
            match &self.behavior {
                Behavior::Return(value) => Ok(value.clone()),
                Behavior::Fail(message) => Err(ToolError::Failed((*message).to_string())),
                Behavior::Panic => panic!("kaboom"),
                Behavior::CancelThenReturn(value) => {
                    if let Some(cancel) = &ctx.execution.cancel {
                        cancel.cancel();
                    }
                    Ok(value.clone())
                }
                Behavior::Block { release, done } => {
                    release.notified().await;
                    let _ = done.send(());
                    Ok(json!("late"))
                }
                Behavior::Hang { dropped } => {
                    let _signal = DropSignal(dropped.clone());
                    std::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }
    }

    fn session() -> Session {
        let mut session = Session::new("s1", SessionConfig::default());
        session.current_tool = Some("outer".into());
        session
    }

    fn call() -> ToolCall {
        let mut args = Map::new();
        args.insert("x".into(), json!(1));
        ToolCall::new("stub", args).with_id("call_1")
    }

    fn assert_recorded_once(session: &Session, results: &[ToolResultRecord]) {
        assert_eq!(results.len(), 1);
        let tool_results = session
            .context
            .iter()
            .filter(|e| matches!(e, ConversationEntry::ToolResult { .. }))
            .count();
        assert_eq!(tool_results, 1);
        assert_eq!(session.current_tool.as_deref(), Some("outer"));
    }

    #[tokio::test]
    async fn success_is_recorded_once() {
        let tool = StubTool::new(Behavior::Return(json!({ "sum": 3 })));
        let executor = ToolCallExecutor::new(tool.clone());
        let (mut session, mut results) = (session(), Vec::new());

        let outcome = executor
            .execute(&call(), &mut session, &mut results, &ExecutionContext::default())
            .await;

        assert_eq!(outcome, ToolOutcome::Success(json!({ "sum": 3 })));
        assert_recorded_once(&session, &results);
        assert_eq!(results[0].result, json!({ "sum": 3 }));
        assert!(!results[0].aborted);
        assert_eq!(
            session.context[0],
            ConversationEntry::ToolResult {
                tool_call_id: "call_1".into(),
                content: json!({ "sum": 3 }),
                is_error: false,
            }
        );
    }

    #[tokio::test]
    async fn tool_error_becomes_payload() {
        let tool = StubTool::new(Behavior::Fail("disk full"));
        let executor = ToolCallExecutor::new(tool);
        let (mut session, mut results) = (session(), Vec::new());

        let outcome = executor
            .execute(&call(), &mut session, &mut results, &ExecutionContext::default())
            .await;

        assert_eq!(outcome, ToolOutcome::Error("disk full".into()));
        assert_recorded_once(&session, &results);
        assert_eq!(results[0].result, json!({ "error": "disk full" }));
        assert!(!results[0].aborted);
    }

    #[tokio::test]
    async fn panic_becomes_error() {
        let executor = ToolCallExecutor::new(StubTool::new(Behavior::Panic));
        let (mut session, mut results) = (session(), Vec::new());

        let outcome = executor
            .execute(&call(), &mut session, &mut results, &ExecutionContext::default())
            .await;

        assert_eq!(outcome, ToolOutcome::Error("Tool panicked: kaboom".into()));
        assert_recorded_once(&session, &results);
    }

    #[tokio::test]
    async fn pre_cancelled_signal_aborts_without_invoking() {
        let tool = StubTool::new(Behavior::Return(json!(1)));
        let executor = ToolCallExecutor::new(tool.clone());
        let token = CancellationToken::new();
        token.cancel();
        let ctx = ExecutionContext::default().with_cancel(token);
        let (mut session, mut results) = (session(), Vec::new());

        let outcome = executor
            .execute(&call(), &mut session, &mut results, &ctx)
            .await;

        assert_eq!(outcome, ToolOutcome::Aborted);
        assert_eq!(tool.calls.load(Ordering::SeqCst), 0);
        assert_recorded_once(&session, &results);
        assert!(results[0].aborted);
        assert_eq!(results[0].result, json!({ "aborted": true }));
    }

    #[tokio::test]
    async fn cancellation_wins_and_detached_tool_keeps_running() {
        let release = Arc::new(Notify::new());
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let tool = StubTool::new(Behavior::Block {
            release: Arc::clone(&release),
            done: done_tx,
        });
        let executor = ToolCallExecutor::new(tool);
        let token = CancellationToken::new();
        let ctx = ExecutionContext::default().with_cancel(token.clone());
        let (mut session, mut results) = (session(), Vec::new());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });
        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            executor.execute(&call(), &mut session, &mut results, &ctx),
        )
        .await
        .expect("abort must resolve without waiting for the tool");
        canceller.await.unwrap();

        assert_eq!(outcome, ToolOutcome::Aborted);
        assert_recorded_once(&session, &results);
        assert!(results[0].aborted);

        release.notify_one();
        tokio::time::timeout(Duration::from_secs(5), done_rx.recv())
            .await
            .expect("detached tool should finish")
            .unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn abort_task_policy_drops_the_tool() {
        let (dropped_tx, mut dropped_rx) = mpsc::unbounded_channel();
        let tool = StubTool::new(Behavior::Hang {
            dropped: dropped_tx,
        });
        let executor = ToolCallExecutor::new(tool.clone()).with_cancel_policy(CancelPolicy::AbortTask);
        let token = CancellationToken::new();
        let ctx = ExecutionContext::default().with_cancel(token.clone());
        let (mut session, mut results) = (session(), Vec::new());

        let (started_tx, started_rx) = oneshot::channel();
        let watcher = tokio::spawn({
            let tool = Arc::clone(&tool);
            async move {
                while tool.calls.load(Ordering::SeqCst) == 0 {
                    tokio::task::yield_now().await;
                }
                let _ = started_tx.send(());
                token.cancel();
            }
        });

        let outcome = executor
            .execute(&call(), &mut session, &mut results, &ctx)
            .await;
        watcher.await.unwrap();
        started_rx.await.unwrap();

        assert_eq!(outcome, ToolOutcome::Aborted);
        tokio::time::timeout(Duration::from_secs(5), dropped_rx.recv())
            .await
            .expect("aborted task should be dropped")
            .unwrap();
    }

    #[tokio::test]
    async fn cancellation_fired_as_tool_settles_keeps_real_result() {
        // The signal fires inside the tool, so both select arms are ready
        // when the executor is next polled.
        let tool = StubTool::new(Behavior::CancelThenReturn(json!("real")));
        let executor = ToolCallExecutor::new(tool.clone());
        let token = CancellationToken::new();
        let ctx = ExecutionContext::default().with_cancel(token.clone());
        let (mut session, mut results) = (session(), Vec::new());

        let outcome = executor
            .execute(&call(), &mut session, &mut results, &ctx)
            .await;

        assert!(token.is_cancelled());
        assert_eq!(tool.calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome, ToolOutcome::Success(json!("real")));
        assert_recorded_once(&session, &results);
        assert!(!results[0].aborted);
        assert_eq!(results[0].result, json!("real"));
    }

    #[tokio::test]
    async fn call_without_id_only_records_result() {
        let executor = ToolCallExecutor::new(StubTool::new(Behavior::Return(json!(1))));
        let (mut session, mut results) = (session(), Vec::new());
        let anonymous = ToolCall::new("stub", Map::new());

        executor
            .execute(&anonymous, &mut session, &mut results, &ExecutionContext::default())
            .await;

        assert!(session.context.is_empty());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].tool_call_id, None);
    }

    #[tokio::test]
    async fn publishes_start_and_finish() {
        let events = Arc::new(EventBus::new());
        let executor = ToolCallExecutor::new(StubTool::new(Behavior::Fail("nope")))
            .with_events(Arc::clone(&events));
        let (mut session, mut results) = (session(), Vec::new());

        executor
            .execute(&call(), &mut session, &mut results, &ExecutionContext::default())
            .await;

        let history = events.history();
        assert!(matches!(history[0], RuntimeEvent::ToolStarted { .. }));
        assert!(matches!(
            history[1],
            RuntimeEvent::ToolFinished {
                aborted: false,
                is_error: true,
                ..
            }
        ));
    }
}
