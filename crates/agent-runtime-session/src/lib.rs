//! Turn orchestration for the agent runtime.
//!
//! Provides:
//! - `ConversationDriver` - Query/execute/requery state machine for one turn
//! - `AgentRunner` - Per-turn entry point with abort handling and error capture

pub mod driver;
pub mod runner;

#[cfg(test)]
mod test_support;

pub use driver::{ConversationDriver, DriverError, TurnEnd, TurnProgress};
pub use runner::{
    ABORTED_MESSAGE, AgentRunner, BACKEND_METADATA_KEY, CONTINUE_QUERY, ConversationResult,
    TurnResult,
};
