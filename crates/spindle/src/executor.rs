//! Main loop of the node: poll for pending jobs, react to notifications,
//! sweep old workspaces, and shut down cleanly.

use spindle_core::NodeConfig;
use spindle_engine::JobManager;
use spindle_remote::{JobService, NotificationMessage};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use tokio::time::interval;

/// Timing of the executor loop.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Interval between polls for pending jobs.
    pub pending_poll_interval: Duration,
    /// Interval between sweeps of stale workspaces.
    pub cleanup_interval: Duration,
    /// How long running jobs get to report after being killed on shutdown.
    pub shutdown_grace: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            pending_poll_interval: Duration::from_secs(60 * 5),
            cleanup_interval: Duration::from_secs(60 * 10),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

pub struct Executor {
    manager: Arc<JobManager>,
    service: Arc<dyn JobService>,
    /// Signalled whenever a job finishes, freeing a slot
    wake: Arc<Notify>,
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(
        node: Arc<NodeConfig>,
        service: Arc<dyn JobService>,
        config: ExecutorConfig,
    ) -> Self {
        let wake = Arc::new(Notify::new());
        let on_finished = wake.clone();
        let manager = JobManager::new(node, service.clone())
            .with_finished_hook(move |_| on_finished.notify_one());
        Self {
            manager: Arc::new(manager),
            service,
            wake,
            config,
        }
    }

    #[cfg(test)]
    fn manager(&self) -> &JobManager {
        &self.manager
    }

    /// Run until `shutdown` resolves, then stop every job.
    ///
    /// Notifications whose type is not the service's "new pending job"
    /// type are ignored. A closed notification channel just means the
    /// loop relies on polling alone.
    pub async fn run(
        &self,
        mut notifications: mpsc::Receiver<NotificationMessage>,
        shutdown: impl Future<Output = ()>,
    ) {
        let mut poll_ticker = interval(self.config.pending_poll_interval);
        let mut cleanup_ticker = interval(self.config.cleanup_interval);
        let mut notifications_open = true;
        let new_job_type = self.service.notification_type().to_string();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                _ = poll_ticker.tick() => {
                    self.poll_pending_jobs().await;
                }
                _ = cleanup_ticker.tick() => {
                    self.manager.reclaim_stale_workspaces().await;
                }
                () = self.wake.notified() => {
                    self.poll_pending_jobs().await;
                }
                message = notifications.recv(), if notifications_open => match message {
                    Some(message) if message.message_type == new_job_type => {
                        self.poll_pending_jobs().await;
                    }
                    Some(message) => {
                        tracing::debug!("Ignoring notification: {}", message.message_type);
                    }
                    None => {
                        tracing::debug!("Notification channel closed");
                        notifications_open = false;
                    }
                },
            }
        }

        self.shutdown().await;
    }

    /// Fetch pending jobs and offer each to the manager until it is full.
    pub async fn poll_pending_jobs(&self) {
        let cap = self.manager.config().max_concurrent_jobs;
        if self.manager.active_count() >= cap {
            return;
        }
        let jobs = match self.service.pending_jobs().await {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::error!("Error polling pending jobs: {}", e);
                return;
            }
        };
        if !jobs.is_empty() {
            tracing::info!("Found {} pending jobs", jobs.len());
        }
        for job in jobs {
            if self.manager.active_count() >= cap {
                break;
            }
            self.manager.admit(job).await;
        }
    }

    async fn shutdown(&self) {
        tracing::info!("Shutting down: stopping {} active jobs", self.manager.active_count());
        self.manager.stop();
        let drained = tokio::time::timeout(self.config.shutdown_grace, async {
            while self.manager.active_count() > 0 {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                "Jobs still active after shutdown grace: {:?}",
                self.manager.active_job_ids()
            );
        }
    }
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
                    _ = tokio::signal::ctrl_c() => tracing::info!("Received SIGINT"),
                }
                return;
            }
            Err(e) => tracing::warn!("Unable to install SIGTERM handler: {}", e),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Unable to listen for SIGINT: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Received SIGINT");
}
