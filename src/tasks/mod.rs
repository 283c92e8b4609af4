//! Task model and storage seams.

pub mod store;
pub mod types;

pub use store::{
    ExecutionStore, InMemoryExecutionStore, InMemoryTaskStore, JsonExecutionStore, JsonTaskStore,
    StoreError, TaskStore,
};
pub use types::{
    Execution, ExecutionStatus, PullRequestRef, SyncMeta, SyncStatus, Task, TaskStatus, TrackerRef,
};
