use anyhow::Result;

use crate::api::TackleService;
use crate::workspace::CleanupOutcome;

pub struct CleanupCommand {
    pub dry_run: bool,
    pub orphans: bool,
}

impl CleanupCommand {
    pub fn new(dry_run: bool, orphans: bool) -> Self {
        Self { dry_run, orphans }
    }

    pub async fn execute(&self, service: &TackleService) -> Result<()> {
        if self.dry_run {
            println!("🧹 TACKLE CLEANUP (DRY RUN)");
        } else {
            println!("🧹 TACKLE CLEANUP");
        }
        println!("==================");

        let summary = service.cleanup(self.dry_run, self.orphans).await?;
        if summary.stale.entries.is_empty() {
            println!("✅ No stale workspaces");
        }
        for entry in &summary.stale.entries {
            let line = match &entry.outcome {
                CleanupOutcome::Removed => "🗑️  removed".to_string(),
                CleanupOutcome::Cleaned => "🧽 record dropped (directory already gone)".to_string(),
                CleanupOutcome::WouldRemove => "🔍 would remove".to_string(),
                CleanupOutcome::WouldClean => "🔍 would drop record".to_string(),
                CleanupOutcome::SkippedRunning => "⏭️  skipped: agent still running".to_string(),
                CleanupOutcome::SkippedDirty(reason) => format!("⏭️  skipped: {reason}"),
                CleanupOutcome::Failed(reason) => format!("❌ failed: {reason}"),
            };
            println!("   {} {} ({})", line, entry.task_id, entry.path.display());
        }

        if let Some(orphans) = &summary.orphans {
            println!();
            if orphans.orphans.is_empty() {
                println!("✅ No orphaned directories");
            }
            for path in &orphans.orphans {
                let verb = if self.dry_run { "would remove" } else { "orphan" };
                println!("   👻 {verb}: {}", path.display());
            }
            if !self.dry_run {
                println!("   🗑️  Removed {} orphaned director(ies)", orphans.removed.len());
            }
            for error in &orphans.errors {
                println!("   ❌ {error}");
            }
        }
        Ok(())
    }
}
