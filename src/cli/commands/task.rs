use anyhow::Result;

use super::print_warnings;
use crate::api::TackleService;
use crate::review::ReviewOutcome;
use crate::workflows::ShipOutcome;

pub struct StartCommand {
    pub task_id: String,
}

impl StartCommand {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self { task_id: task_id.into() }
    }

    pub async fn execute(&self, service: &TackleService) -> Result<()> {
        println!("🚀 Starting task {}...", self.task_id);
        let started = service.start(&self.task_id).await?;

        println!("✅ {} is in progress", started.task.title);
        println!("   🌿 Branch: {}", started.workspace.branch);
        println!("   📁 Workspace: {}", started.workspace.path.display());
        if let Some(issue) = started.task.issue_number() {
            println!("   📋 Issue #{issue}");
        }
        print_warnings(&started.warnings);
        println!();
        println!("💡 cd {} and start working", started.workspace.path.display());
        Ok(())
    }
}

pub fn print_review(outcome: &ReviewOutcome) {
    let result = &outcome.result;
    if result.passed {
        println!("✅ Review passed: {}", result.summary);
    } else {
        println!("❌ Review failed: {}", result.summary);
    }
    for issue in &result.issues {
        let location = match (&issue.file, issue.line) {
            (Some(file), Some(line)) => format!("{file}:{line} "),
            (Some(file), None) => format!("{file} "),
            _ => String::new(),
        };
        println!("   • [{}] {location}{}", issue.severity, issue.message);
    }
    if result.needs_rescope() {
        println!("   📐 Scope needs rework before this can pass");
    }
    if let Some(pr) = &outcome.pr {
        println!("   🔗 Pull request #{}: {}", pr.number, pr.url);
    }
    print_warnings(&outcome.warnings);
}

pub struct ReviewCommand {
    pub task_id: String,
}

impl ReviewCommand {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self { task_id: task_id.into() }
    }

    pub async fn execute(&self, service: &TackleService) -> Result<()> {
        println!("🔍 Reviewing task {}...", self.task_id);
        let applied = service.review(&self.task_id).await?;
        print_review(&applied.outcome);
        println!("   📌 Status: {}", applied.task.status);
        Ok(())
    }
}

pub struct ShipCommand {
    pub task_id: String,
}

impl ShipCommand {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self { task_id: task_id.into() }
    }

    pub async fn execute(&self, service: &TackleService) -> Result<()> {
        println!("🚢 Shipping task {}...", self.task_id);
        match service.ship(&self.task_id).await? {
            ShipOutcome::Shipped {
                task,
                pr_number,
                cleanup,
                warnings,
            } => {
                println!("✅ Merged pull request #{pr_number}; {} is {}", task.title, task.status);
                print_warnings(&warnings);
                if let Some(cleanup) = cleanup {
                    println!();
                    println!("🧹 Workspace kept at {}", cleanup.path.display());
                    println!("   Remove it now with: {}", cleanup.instructions);
                    println!("   or later with: tackle cleanup");
                }
            }
            ShipOutcome::Refused { reason } => {
                println!("⛔ Not merged: {reason}");
            }
        }
        Ok(())
    }
}
