//! Bidirectional synchronization between local tasks and tracker issues.

pub mod auto_sync;
pub mod conflicts;
pub mod dedup;
pub mod engine;
pub mod mapping;
pub mod markers;

pub use auto_sync::{
    AutoSync, AutoSyncPolicy, AutoSyncStatus, ConnectivityProbe, SkipReason, SyncRunner, SyncTrigger,
    TriggerOutcome,
};
pub use conflicts::{ConflictLog, LocalSnapshot, RemoteSnapshot, SyncConflict};
pub use dedup::{find_duplicates, DedupReport, DuplicateGroup};
pub use engine::{Resolution, SyncEngine, SyncError, SyncReport};
pub use markers::{embed_marker, extract_task_id, task_marker};
