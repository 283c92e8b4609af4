//! External tool abstractions
//!
//! Trait-based access to subprocesses so the engines can be driven by scripted
//! executors in tests.

pub mod command;
pub mod git;

pub use command::{CommandError, CommandExecutor, CommandOutput, ProcessCommandExecutor};
pub use git::{GitClient, GitError, WorktreeEntry};
