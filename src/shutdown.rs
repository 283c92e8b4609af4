use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{info, warn};

/// Broadcasts a single shutdown request to every long-running loop.
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    tx: watch::Sender<bool>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Receiver that flips to `true` once shutdown is requested.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    pub fn trigger(&self) {
        if !*self.tx.borrow() {
            info!("Shutdown requested");
        }
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Trigger shutdown on Ctrl-C.
    pub fn install_signal_handlers(&self) {
        let coordinator = self.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => coordinator.trigger(),
                Err(e) => warn!(error = %e, "Could not listen for Ctrl-C"),
            }
        });
        info!("Shutdown coordinator ready - will shut down gracefully on Ctrl-C");
    }

    /// Wait for `work` to finish after shutdown, giving up after `grace`.
    pub async fn drain<F>(&self, work: F, grace: Duration) -> bool
    where
        F: std::future::Future<Output = ()>,
    {
        match timeout(grace, work).await {
            Ok(()) => {
                info!("Graceful shutdown completed successfully");
                true
            }
            Err(_) => {
                warn!(grace_secs = grace.as_secs(), "Timed out waiting for background work to stop");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_see_trigger() {
        let coordinator = ShutdownCoordinator::new();
        let mut rx = coordinator.subscribe();
        assert!(!coordinator.is_triggered());

        coordinator.trigger();

        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_gives_up_after_grace() {
        let coordinator = ShutdownCoordinator::new();
        let finished = coordinator
            .drain(tokio::time::sleep(Duration::from_secs(60)), Duration::from_secs(5))
            .await;
        assert!(!finished);
    }
}
