//! Tool call execution for the agent runtime.
//!
//! Provides:
//! - `ToolCallExecutor` - Races a tool against cancellation, records exactly once
//! - Approval handler trait and the `GatedInvoker` wrapper

pub mod approvals;
pub mod tool_call;

pub use approvals::{
    ApprovalError, ApprovalHandler, ApprovalResult, AutoApproveHandler, GatedInvoker,
};
pub use tool_call::{CancelPolicy, ToolCallExecutor, record_outcome};
