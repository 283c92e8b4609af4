use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::print_warnings;
use crate::api::TackleService;
use crate::cli::KeepSide;
use crate::config::SyncConfig;
use crate::shutdown::ShutdownCoordinator;
use crate::sync::{AutoSync, AutoSyncPolicy, SyncReport, SyncTrigger};

fn list(label: &str, items: &[String]) {
    if !items.is_empty() {
        println!("   {label}: {}", items.join(", "));
    }
}

pub fn print_report(report: &SyncReport) {
    println!(
        "✅ Sync complete: {} written, {} unchanged",
        report.writes(),
        report.unchanged
    );
    list("🆕 Issues created", &report.created);
    list("🔗 Linked", &report.linked);
    list("📤 Pushed", &report.pushed);
    list("📥 Pulled", &report.pulled);
    list("📥 New from GitHub", &report.pulled_new);
    if !report.conflicts.is_empty() || !report.unresolved.is_empty() {
        list("⚠️  New conflicts", &report.conflicts);
        list("⚠️  Still unresolved", &report.unresolved);
        println!("   💡 Resolve with: tackle resolve <task> --keep local|remote");
    }
    if !report.errors.is_empty() {
        println!("   ❌ Errors:");
        print_warnings(&report.errors);
    }
}

pub struct SyncCommand;

impl SyncCommand {
    pub async fn execute(&self, service: &TackleService) -> Result<()> {
        println!("🔄 Synchronizing tasks with GitHub issues...");
        let report = service.sync().await?;
        print_report(&report);
        Ok(())
    }
}

pub struct AutoSyncCommand {
    pub config: SyncConfig,
}

impl AutoSyncCommand {
    pub fn new(config: SyncConfig) -> Self {
        Self { config }
    }

    pub async fn execute(&self, service: &TackleService) -> Result<()> {
        let policy = AutoSyncPolicy::from(&self.config);
        println!(
            "⏱️  Auto-sync every {}s (Ctrl-C to stop)",
            policy.base_interval().as_secs()
        );

        let shutdown = ShutdownCoordinator::new();
        shutdown.install_signal_handlers();

        let engine = service.sync_engine();
        let probe_every = policy.min_interval;
        let driver = Arc::new(AutoSync::new(engine.clone(), policy));
        let (triggers, rx) = mpsc::channel(8);
        triggers.send(SyncTrigger::Manual).await?;
        let handle = tokio::spawn(driver.clone().run(rx, shutdown.subscribe()));
        let watcher = tokio::spawn(driver.clone().watch_connectivity(
            engine,
            probe_every,
            triggers.clone(),
            shutdown.subscribe(),
        ));

        let mut stop = shutdown.subscribe();
        while !*stop.borrow() {
            if stop.changed().await.is_err() {
                break;
            }
        }

        println!();
        println!("🛑 Stopping auto-sync...");
        let drained = shutdown
            .drain(
                async {
                    let _ = tokio::join!(handle, watcher);
                },
                Duration::from_secs(30),
            )
            .await;
        drop(triggers);
        service.store().flush().await?;

        let status = driver.status();
        if status.paused {
            println!("⏸️  Auto-sync was paused after {} consecutive failures", status.consecutive_failures);
        }
        service.metrics().log_stats();
        if drained {
            println!("✅ Auto-sync stopped");
        } else {
            println!("⚠️  A sync pass was still running when auto-sync stopped");
        }
        Ok(())
    }
}

pub struct ResolveCommand {
    pub task_id: String,
    pub keep: KeepSide,
}

impl ResolveCommand {
    pub fn new(task_id: impl Into<String>, keep: KeepSide) -> Self {
        Self {
            task_id: task_id.into(),
            keep,
        }
    }

    pub async fn execute(&self, service: &TackleService) -> Result<()> {
        println!("⚖️  Resolving conflict for {} (keeping {})...", self.task_id, self.keep.as_str());
        let task = service.resolve(&self.task_id, self.keep.as_str()).await?;
        println!("✅ Resolved: {} is {}", task.title, task.status);
        Ok(())
    }
}

pub struct ConflictsCommand;

impl ConflictsCommand {
    pub fn execute(&self, service: &TackleService) -> Result<()> {
        let conflicts = service.conflicts();
        if conflicts.is_empty() {
            println!("✅ No unresolved sync conflicts");
            return Ok(());
        }
        println!("⚠️  {} unresolved conflict(s):", conflicts.len());
        for conflict in conflicts {
            println!("   📋 {} ↔ issue #{}", conflict.task_id, conflict.remote.issue_number);
            println!(
                "      local:  \"{}\" ({}, {})",
                conflict.local.title, conflict.local.status, conflict.local.modified_at
            );
            println!(
                "      remote: \"{}\" ({:?}, {})",
                conflict.remote.title, conflict.remote.state, conflict.remote.updated_at
            );
        }
        println!();
        println!("💡 tackle resolve <task> --keep local|remote");
        Ok(())
    }
}

pub struct DedupeCommand {
    pub dry_run: bool,
}

impl DedupeCommand {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }

    pub async fn execute(&self, service: &TackleService) -> Result<()> {
        if self.dry_run {
            println!("🔎 Looking for duplicate issues (DRY RUN)...");
        } else {
            println!("🔎 Looking for duplicate issues...");
        }
        let report = service.dedupe(self.dry_run).await?;
        if report.groups.is_empty() {
            println!("✅ No duplicates found");
            return Ok(());
        }
        for group in &report.groups {
            let closing: Vec<String> = group.close.iter().map(|n| format!("#{n}")).collect();
            let verb = if self.dry_run { "would close" } else { "closing" };
            println!("   📋 {}: keeping #{}, {verb} {}", group.task_id, group.keep, closing.join(", "));
        }
        if !self.dry_run {
            println!("✅ Closed {} duplicate(s)", report.closed.len());
        }
        list("🔗 Relinked tasks", &report.relinked);
        print_warnings(&report.errors);
        Ok(())
    }
}
