//! Task lifecycle orchestration.

pub mod snapshots;
pub mod state_machine;

pub use snapshots::{spawn_status_feed, status_stream, StatusSnapshot, TaskSummary};
pub use state_machine::{
    AgentEvent, AgentEventOutcome, ReviewApplied, ShipOutcome, StartOutcome, TaskWorkflow,
    TransitionResult, WorkflowError,
};
