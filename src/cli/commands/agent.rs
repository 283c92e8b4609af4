use anyhow::Result;
use std::path::PathBuf;

use super::task::print_review;
use crate::api::{AgentEventKind, TackleService};
use crate::workflows::AgentEventOutcome;

/// Entry point for agent hooks: `tackle agent-event --kind session --cwd <dir>`.
pub struct AgentEventCommand {
    pub kind: AgentEventKind,
    pub cwd: PathBuf,
}

impl AgentEventCommand {
    pub fn new(kind: AgentEventKind, cwd: PathBuf) -> Self {
        Self { kind, cwd }
    }

    pub async fn execute(&self, service: &TackleService) -> Result<()> {
        match service.agent_event(self.kind, self.cwd.clone()).await? {
            AgentEventOutcome::Reviewed(applied) => {
                println!("🤖 Agent session finished for {}", applied.task.id);
                print_review(&applied.outcome);
                println!("   📌 Status: {}", applied.task.status);
                if let Some(feedback) = &applied.task.review_feedback {
                    println!();
                    println!("📝 Feedback for the next session:");
                    println!("{feedback}");
                }
            }
            AgentEventOutcome::Recorded { task_id } => {
                println!("🤖 Subagent finished in {task_id}; waiting for the session to end");
            }
            AgentEventOutcome::Ignored { reason } => {
                println!("ℹ️  Nothing to do: {reason}");
            }
        }
        Ok(())
    }
}
