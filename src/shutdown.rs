use anyhow::Result;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};

/// Graceful shutdown coordinator for the swarm field.
///
/// Long-running loops (sweeper, workers) hold a receiver and stop when it
/// flips to `true`. Tracked tasks get a bounded time to drain.
pub struct ShutdownCoordinator {
    sender: watch::Sender<bool>,
    tasks: Vec<(String, JoinHandle<()>)>,
    drain_timeout: Duration,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender,
            tasks: Vec::new(),
            drain_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }

    pub fn is_triggered(&self) -> bool {
        *self.sender.borrow()
    }

    /// Ask every subscriber to stop
    pub fn trigger(&self) {
        if !self.is_triggered() {
            info!("Shutdown requested");
            self.sender.send_replace(true);
        }
    }

    /// Wait for this task to finish during shutdown
    pub fn track(&mut self, name: impl Into<String>, handle: JoinHandle<()>) {
        self.tasks.push((name.into(), handle));
    }

    /// Trigger shutdown on Ctrl-C. The returned task ends after the signal.
    pub fn install_signal_handlers(&self) -> JoinHandle<()> {
        info!("Installing signal handlers for graceful shutdown");
        let sender = self.sender.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received interrupt, shutting down gracefully");
                    sender.send_replace(true);
                }
                Err(e) => warn!("Failed to listen for interrupt signal: {}", e),
            }
        })
    }

    /// Block until shutdown is triggered
    pub async fn wait_for_shutdown(&self) {
        let mut receiver = self.subscribe();
        // Err only when the sender is gone, which cannot happen while &self lives
        let _ = receiver.wait_for(|stopped| *stopped).await;
    }

    /// Trigger shutdown and wait for tracked tasks to drain
    pub async fn shutdown_all_services(self) -> Result<()> {
        self.trigger();
        info!("Initiating graceful shutdown of {} services...", self.tasks.len());

        let mut failures = 0;
        for (name, handle) in self.tasks {
            match timeout(self.drain_timeout, handle).await {
                Ok(Ok(())) => info!("{} stopped", name),
                Ok(Err(e)) => {
                    failures += 1;
                    warn!("{} ended abnormally: {}", name, e);
                }
                Err(_) => {
                    failures += 1;
                    warn!("Timeout waiting for {} to stop", name);
                }
            }
        }

        if failures > 0 {
            return Err(anyhow::anyhow!("{failures} services did not stop cleanly"));
        }
        info!("Graceful shutdown completed successfully");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_reaches_subscribers() {
        let coordinator = ShutdownCoordinator::new();
        let mut rx = coordinator.subscribe();
        assert!(!*rx.borrow());

        coordinator.trigger();
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
        assert!(coordinator.is_triggered());
    }

    #[tokio::test]
    async fn test_tracked_tasks_drain() {
        let mut coordinator = ShutdownCoordinator::new();
        let mut rx = coordinator.subscribe();
        let handle = tokio::spawn(async move {
            let _ = rx.wait_for(|stopped| *stopped).await;
        });
        coordinator.track("waiter", handle);
        coordinator.shutdown_all_services().await.unwrap();
    }

    #[tokio::test]
    async fn test_stuck_task_reports_failure() {
        let mut coordinator =
            ShutdownCoordinator::new().with_drain_timeout(Duration::from_millis(10));
        coordinator.track(
            "stuck",
            tokio::spawn(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }),
        );
        assert!(coordinator.shutdown_all_services().await.is_err());
    }
}
