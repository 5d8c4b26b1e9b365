//! Turn-loop state machine: query the model, run requested tools, requery.

use std::sync::Arc;

use agent_runtime_core::{
    ConversationEntry, ExecutionContext, ModelClient, ModelError, Session, ToolCall, ToolError,
    ToolOutcome, ToolResultRecord,
};
use agent_runtime_executor::{ToolCallExecutor, record_outcome};
use thiserror::Error;
use uuid::Uuid;

/// Conversation driver error.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("Turn exceeded {0} model queries")]
    IterationLimit(usize),
}

/// Driver states. `Done` and `Aborted` are terminal.
#[derive(Debug, Clone, PartialEq)]
enum TurnState {
    Querying,
    ExecutingTools(Vec<ToolCall>),
    Done(String),
    Aborted,
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEnd {
    /// The model produced a final answer.
    Completed(String),
    /// A tool execution or an external abort stopped the turn.
    Aborted,
}

/// Caller-owned progress of one turn, kept even when the turn fails.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnProgress {
    /// Tool result records across every iteration of the turn.
    pub results: Vec<ToolResultRecord>,
    /// Number of model queries issued.
    pub iterations: usize,
}

/// Drives one turn of a session to completion.
pub struct ConversationDriver {
    model: Arc<dyn ModelClient>,
    executor: ToolCallExecutor,
    max_iterations: Option<usize>,
}

impl ConversationDriver {
    /// Create a driver.
    #[must_use]
    pub fn new(model: Arc<dyn ModelClient>, executor: ToolCallExecutor) -> Self {
        Self {
            model,
            executor,
            max_iterations: None,
        }
    }

    /// Fail the turn instead of issuing more than `max` model queries.
    #[must_use]
    pub const fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = Some(max);
        self
    }

    /// Run the turn loop until the model answers or the turn is aborted.
    ///
    /// Tool calls run sequentially, so every tool-result entry follows the
    /// assistant entry that requested it, in request order. Once one tool
    /// reports an abort, the remaining calls of that batch are recorded as
    /// aborted without being invoked and no further query is issued.
    ///
    /// # Errors
    /// Returns error if the model fails or the iteration limit is exceeded.
    /// Records gathered so far stay in `progress`.
    pub async fn run(
        &self,
        session: &mut Session,
        ctx: &ExecutionContext,
        progress: &mut TurnProgress,
    ) -> Result<TurnEnd, DriverError> {
        let mut state = TurnState::Querying;

        loop {
            state = match state {
                TurnState::Querying => self.query(session, ctx, progress).await?,
                TurnState::ExecutingTools(calls) => {
                    self.execute_tools(&calls, session, ctx, progress).await
                }
                TurnState::Done(text) => return Ok(TurnEnd::Completed(text)),
                TurnState::Aborted => {
                    tracing::info!(session_id = %session.id, iterations = progress.iterations, "turn aborted");
                    return Ok(TurnEnd::Aborted);
                }
            };
        }
    }

    async fn query(
        &self,
        session: &mut Session,
        ctx: &ExecutionContext,
        progress: &mut TurnProgress,
    ) -> Result<TurnState, DriverError> {
        if ctx.is_cancelled() {
            return Ok(TurnState::Aborted);
        }
        if let Some(max) = self.max_iterations {
            if progress.iterations >= max {
                return Err(DriverError::IterationLimit(max));
            }
        }

        progress.iterations += 1;
        tracing::debug!(
            session_id = %session.id,
            iteration = progress.iterations,
            entries = session.context.len(),
            "querying model"
        );

        let request = self.model.query(&session.context, &session.config);
        let response = match &ctx.cancel {
            Some(cancel) => tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(TurnState::Aborted),
                response = request => response?,
            },
            None => request.await?,
        };

        if !response.has_tool_calls() {
            session.push(ConversationEntry::assistant(response.text.clone(), Vec::new()));
            return Ok(TurnState::Done(response.text));
        }

        let calls: Vec<ToolCall> = response
            .tool_calls
            .into_iter()
            .map(|mut call| {
                call.id
                    .get_or_insert_with(|| format!("call_{}", Uuid::new_v4().simple()));
                call
            })
            .collect();
        session.push(ConversationEntry::assistant(response.text, calls.clone()));
        Ok(TurnState::ExecutingTools(calls))
    }

    async fn execute_tools(
        &self,
        calls: &[ToolCall],
        session: &mut Session,
        ctx: &ExecutionContext,
        progress: &mut TurnProgress,
    ) -> TurnState {
        let mut pending = calls.iter();

        for call in pending.by_ref() {
            let outcome = if session.config.allows(&call.name) {
                self.executor
                    .execute(call, session, &mut progress.results, ctx)
                    .await
            } else {
                tracing::debug!(tool = %call.name, "tool not in allowed set");
                let outcome = ToolOutcome::Error(ToolError::NotAllowed(call.name.clone()).to_string());
                record_outcome(call, &outcome, session, &mut progress.results);
                outcome
            };

            if outcome.is_aborted() {
                for skipped in pending {
                    record_outcome(skipped, &ToolOutcome::Aborted, session, &mut progress.results);
                }
                return TurnState::Aborted;
            }
        }

        TurnState::Querying
    }
}
