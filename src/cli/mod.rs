use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::api::AgentEventKind;

pub mod commands;

#[derive(Parser)]
#[command(name = "tackle")]
#[command(about = "Local task backlog with git worktrees, AI review and GitHub issue sync")]
#[command(long_about = "Tackle gives every task its own git worktree, reviews finished work with an AI \
                       reviewer, opens and merges pull requests, and keeps the local backlog in step \
                       with GitHub issues. Start with 'tackle start <task>'.")]
pub struct Cli {
    /// Emit JSON log lines on stderr
    #[arg(long, global = true)]
    pub json_logs: bool,
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KeepSide {
    Local,
    Remote,
}

impl KeepSide {
    pub fn as_str(self) -> &'static str {
        match self {
            KeepSide::Local => "local",
            KeepSide::Remote => "remote",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EventKind {
    Session,
    Subagent,
}

impl From<EventKind> for AgentEventKind {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::Session => AgentEventKind::Session,
            EventKind::Subagent => AgentEventKind::Subagent,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the task's worktree and move it to in_progress
    Start {
        /// Task identifier
        task: String,
    },
    /// Commit, diff and AI-review the task's workspace
    Review {
        /// Task identifier
        task: String,
    },
    /// Merge the task's pull request and schedule its workspace for removal
    Ship {
        /// Task identifier
        task: String,
    },
    /// Run one synchronization pass against GitHub issues
    Sync,
    /// Keep synchronizing in the background until Ctrl-C
    AutoSync,
    /// Settle a sync conflict by keeping one side
    Resolve {
        /// Task identifier
        task: String,
        /// Which side wins
        #[arg(long, value_enum)]
        keep: KeepSide,
    },
    /// List unresolved sync conflicts
    Conflicts,
    /// Close issues that duplicate another issue's task marker
    Dedupe {
        /// Show what would be closed without making changes
        #[arg(long, help = "Preview duplicates without closing anything")]
        dry_run: bool,
    },
    /// Remove stale task workspaces
    Cleanup {
        /// Show what would be removed without making changes
        #[arg(long, help = "Preview removals without deleting anything")]
        dry_run: bool,
        /// Also remove workspace directories no record points at
        #[arg(long, help = "Include orphaned workspace directories")]
        orphans: bool,
    },
    /// Receive a lifecycle signal from a coding agent
    AgentEvent {
        #[arg(long, value_enum)]
        kind: EventKind,
        /// Directory the agent was working in
        #[arg(long)]
        cwd: PathBuf,
    },
    /// Show task counts by status
    Status,
    /// Show circuit breaker and pipeline health
    Health,
}
