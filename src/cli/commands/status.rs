use anyhow::Result;

use crate::api::TackleService;
use crate::resilience::{CircuitState, HealthStatus};

pub struct StatusCommand;

impl StatusCommand {
    pub async fn execute(&self, service: &TackleService) -> Result<()> {
        println!("📊 TACKLE STATUS");
        println!("================");
        let snapshot = service.status().await?;
        if snapshot.tasks.is_empty() {
            println!("📋 No tasks yet");
            return Ok(());
        }

        for (status, count) in &snapshot.counts {
            println!("   {:<14} {count}", status.as_str());
        }
        println!();
        for task in &snapshot.tasks {
            let issue = task.issue_number.map(|n| format!(" #{n}")).unwrap_or_default();
            println!("   [{}] {}{} - {}", task.status, task.id, issue, task.title);
        }

        let conflicts = service.conflicts().len();
        if conflicts > 0 {
            println!();
            println!("⚠️  {conflicts} unresolved sync conflict(s); see: tackle conflicts");
        }
        Ok(())
    }
}

pub struct HealthCommand;

impl HealthCommand {
    pub fn execute(&self, service: &TackleService) -> Result<()> {
        let health = service.health();
        let icon = match health.breakers.status {
            HealthStatus::Healthy => "🟢",
            HealthStatus::Degraded => "🟡",
            HealthStatus::Unhealthy => "🔴",
        };
        println!("{icon} Overall: {:?}", health.breakers.status);
        for breaker in &health.breakers.breakers {
            let icon = match breaker.state {
                CircuitState::Closed => "🟢",
                CircuitState::HalfOpen => "🟡",
                CircuitState::Open => "🔴",
            };
            println!(
                "   {icon} {} - {} ({} recent failures)",
                breaker.name,
                breaker.state.as_str(),
                breaker.failure_count
            );
        }
        println!();
        println!("📈 Sync passes: {} ({} failed)", health.pipeline.sync_passes, health.pipeline.sync_failures);
        println!("   Conflicts detected: {}", health.pipeline.conflicts_detected);
        println!("   Unresolved conflicts: {}", health.unresolved_conflicts);
        Ok(())
    }
}
