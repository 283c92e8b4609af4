use anyhow::Result;
use std::future::Future;
use std::io::Write;

use crate::api::TackleService;
use crate::config::TackleConfig;

pub mod agent;
pub mod cleanup;
pub mod status;
pub mod sync;
pub mod task;

pub async fn with_service<F, Fut, R>(config: &TackleConfig, f: F) -> Result<R>
where
    F: FnOnce(TackleService) -> Fut,
    Fut: Future<Output = Result<R>>,
{
    print!("🔄 Connecting to GitHub... ");
    std::io::stdout().flush()?;

    match TackleService::from_config(config) {
        Ok(service) => {
            println!("✅");
            f(service).await
        }
        Err(e) => {
            println!("❌ {e:#}");
            Err(e)
        }
    }
}

pub fn print_warnings(warnings: &[String]) {
    for warning in warnings {
        println!("   ⚠️  {warning}");
    }
}

pub fn show_how_to_get_work() -> Result<()> {
    println!("🎯 Tackle - local tasks, isolated worktrees, reviewed merges");
    println!();
    println!("Task flow:");
    println!("  🚀 tackle start <task>     # Create the worktree and begin");
    println!("  🔍 tackle review <task>    # Review the work with AI");
    println!("  🚢 tackle ship <task>      # Merge the pull request");
    println!();
    println!("Keeping GitHub in step:");
    println!("  🔄 tackle sync             # One sync pass");
    println!("  ⏱️  tackle auto-sync        # Sync in the background");
    println!("  ⚖️  tackle resolve <task> --keep local|remote");
    println!();
    println!("Housekeeping:");
    println!("  🧹 tackle cleanup --dry-run");
    println!("  📊 tackle status | tackle health");
    Ok(())
}
