//! Approval gate in front of tool invocations.
//!
//! [`GatedInvoker`] wraps the session's [`ToolInvoker`] and asks an
//! [`ApprovalHandler`] about every call before it runs. The handler may let
//! the call through, rewrite its arguments, or refuse it. A refusal never
//! fails the turn: it becomes the tool's error output, which the model reads
//! on its next query.

use std::{sync::Arc, time::Duration};

use agent_runtime_core::{PermissionMode, ToolCall, ToolContext, ToolError, ToolInvoker};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Decision returned by an [`ApprovalHandler`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "behavior", rename_all = "camelCase")]
pub enum ApprovalResult {
    /// Run the call. An object replaces its arguments, `null` keeps them.
    Allow {
        #[serde(rename = "updatedInput")]
        updated_input: Value,
    },
    /// Refuse the call; `message` is shown to the model.
    Deny {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        interrupt: Option<bool>,
    },
}

/// Failure to obtain a decision. The gate treats it as a denial.
#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("Approval request failed: {0}")]
    RequestFailed(String),
    #[error("Approval request timed out")]
    TimedOut,
}

/// Decides whether a tool call may run.
///
/// Consulted by [`GatedInvoker`] once per call, after the driver's
/// allowed-tool check and before the wrapped invoker. Sessions in
/// [`PermissionMode::BypassPermissions`] never reach it.
#[async_trait]
pub trait ApprovalHandler: Send + Sync {
    /// Decide on `tool_name` with `tool_input`.
    ///
    /// `tool_call_id` is the model's call id, or the invocation id for calls
    /// that carry none.
    async fn request_approval(
        &self,
        tool_name: &str,
        tool_input: Value,
        tool_call_id: &str,
    ) -> Result<ApprovalResult, ApprovalError>;
}

/// Handler that allows every call unchanged.
#[derive(Debug, Default, Clone)]
pub struct AutoApproveHandler;

#[async_trait]
impl ApprovalHandler for AutoApproveHandler {
    async fn request_approval(
        &self,
        _tool_name: &str,
        tool_input: Value,
        _tool_call_id: &str,
    ) -> Result<ApprovalResult, ApprovalError> {
        Ok(ApprovalResult::Allow {
            updated_input: tool_input,
        })
    }
}

/// Tool invoker that asks an [`ApprovalHandler`] before delegating.
///
/// Denials and handler failures surface as [`ToolError::Denied`].
pub struct GatedInvoker {
    inner: Arc<dyn ToolInvoker>,
    handler: Arc<dyn ApprovalHandler>,
    timeout: Option<Duration>,
}

impl GatedInvoker {
    /// Gate `inner` behind `handler`.
    #[must_use]
    pub fn new(inner: Arc<dyn ToolInvoker>, handler: Arc<dyn ApprovalHandler>) -> Self {
        Self {
            inner,
            handler,
            timeout: None,
        }
    }

    /// Deny calls whose decision takes longer than `timeout`.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    async fn decide(
        &self,
        call: &ToolCall,
        request_id: &str,
    ) -> Result<ApprovalResult, ApprovalError> {
        let request = self
            .handler
            .request_approval(&call.name, call.arguments_value(), request_id);
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, request)
                .await
                .map_err(|_| ApprovalError::TimedOut)?,
            None => request.await,
        }
    }
}

#[async_trait]
impl ToolInvoker for GatedInvoker {
    async fn invoke(&self, mut call: ToolCall, ctx: ToolContext) -> Result<Value, ToolError> {
        if ctx.permission_mode == PermissionMode::BypassPermissions {
            return self.inner.invoke(call, ctx).await;
        }

        let request_id = ctx
            .tool_call_id
            .clone()
            .unwrap_or_else(|| ctx.invocation_id.clone());
        let decision = self.decide(&call, &request_id).await.map_err(|e| {
            tracing::warn!(tool = %call.name, %request_id, error = %e, "no approval decision");
            ToolError::Denied(e.to_string())
        })?;

        match decision {
            ApprovalResult::Allow { updated_input } => {
                call.arguments = match updated_input {
                    Value::Object(map) => map,
                    Value::Null => call.arguments,
                    other => {
                        return Err(ToolError::InvalidArguments(format!(
                            "approval returned non-object input: {other}"
                        )));
                    }
                };
                self.inner.invoke(call, ctx).await
            }
            ApprovalResult::Deny { message, .. } => {
                tracing::info!(tool = %call.name, %request_id, "tool invocation denied");
                Err(ToolError::Denied(message))
            }
        }
    }
}
