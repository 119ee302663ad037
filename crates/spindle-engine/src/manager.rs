//! Admission of pending jobs.

use crate::running_job::RunningJob;
use spindle_core::{JobDescriptor, NodeConfig, ReclaimReport, WorkspaceStore};
use spindle_remote::JobService;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

type FinishedHook = Arc<dyn Fn(&RunningJob) + Send + Sync>;
type ActiveJobs = Arc<Mutex<HashMap<String, RunningJob>>>;

/// Owns the active jobs and enforces the concurrency cap.
///
/// Admission is serialized: two concurrent offers can never both pass the
/// cap check while the first one is still talking to the service.
pub struct JobManager {
    config: Arc<NodeConfig>,
    service: Arc<dyn JobService>,
    active: ActiveJobs,
    admission: tokio::sync::Mutex<()>,
    on_finished: Option<FinishedHook>,
}

fn lock(active: &Mutex<HashMap<String, RunningJob>>) -> MutexGuard<'_, HashMap<String, RunningJob>> {
    active.lock().unwrap_or_else(|e| e.into_inner())
}

impl JobManager {
    pub fn new(config: Arc<NodeConfig>, service: Arc<dyn JobService>) -> Self {
        Self {
            config,
            service,
            active: Arc::new(Mutex::new(HashMap::new())),
            admission: tokio::sync::Mutex::new(()),
            on_finished: None,
        }
    }

    /// Called after each job has left the active set.
    pub fn with_finished_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&RunningJob) + Send + Sync + 'static,
    {
        self.on_finished = Some(Arc::new(hook));
        self
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn active_count(&self) -> usize {
        lock(&self.active).len()
    }

    pub fn active_job_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.active).keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Offer a pending job to this node.
    ///
    /// Returns true if the job was taken: it is not already active, there
    /// is room under the cap, and the service confirmed the move to
    /// `running`. A job that is not taken leaves no trace.
    pub async fn admit(&self, descriptor: JobDescriptor) -> bool {
        let _admission = self.admission.lock().await;
        let job_id = descriptor.job_id.clone();

        {
            let active = lock(&self.active);
            if active.contains_key(&job_id) {
                tracing::debug!(job_id = %job_id, "Job already active");
                return false;
            }
            if active.len() >= self.config.max_concurrent_jobs {
                tracing::debug!(
                    job_id = %job_id,
                    "At capacity ({} active), not taking job",
                    active.len()
                );
                return false;
            }
        }

        let job = RunningJob::new(descriptor, self.config.clone(), self.service.clone());
        let active = self.active.clone();
        let hook = self.on_finished.clone();
        job.on_completed_or_failed(move |finished| {
            lock(&active).remove(&finished.job().job_id);
            tracing::info!(
                job_id = %finished.job().job_id,
                "Job finished with status {}",
                finished.status()
            );
            if let Some(hook) = hook {
                hook(finished);
            }
        });
        lock(&self.active).insert(job_id.clone(), job.clone());

        if !job.initiate().await {
            lock(&self.active).remove(&job_id);
            return false;
        }
        tracing::info!(job_id = %job_id, "Job admitted");
        true
    }

    /// Kill the subprocess of every active job.
    pub fn stop(&self) {
        let jobs: Vec<RunningJob> = lock(&self.active).values().cloned().collect();
        for job in jobs {
            job.stop();
        }
    }

    /// Remove workspaces older than the retention window.
    pub async fn reclaim_stale_workspaces(&self) -> ReclaimReport {
        let store = WorkspaceStore::new(self.config.workspace_root.clone());
        let max_age = self.config.workspace_retention;
        match tokio::task::spawn_blocking(move || store.reclaim_stale(max_age)).await {
            Ok(report) => {
                if !report.removed.is_empty() || report.failed > 0 {
                    tracing::info!(
                        "Workspace cleanup: {} removed, {} failed",
                        report.removed.len(),
                        report.failed
                    );
                }
                report
            }
            Err(e) => {
                tracing::warn!("Workspace cleanup task failed: {}", e);
                ReclaimReport::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8Path;
    use spindle_core::{JobStatus, NodeIdentity};
    use spindle_remote::{JobProperty, MemoryJobService};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    fn config(temp: &TempDir, max: usize) -> Arc<NodeConfig> {
        let mut cfg = NodeConfig::new(
            NodeIdentity {
                compute_resource_id: "cr".to_string(),
                compute_resource_private_key: "k".to_string(),
                node_id: "n".to_string(),
                node_name: "h".to_string(),
            },
            Utf8Path::from_path(temp.path()).unwrap(),
        )
        .with_max_concurrent_jobs(max);
        cfg.interpreter = "sh".to_string();
        Arc::new(cfg)
    }

    fn manager(
        temp: &TempDir,
        max: usize,
        service: Arc<MemoryJobService>,
    ) -> (JobManager, mpsc::UnboundedReceiver<(String, JobStatus)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = JobManager::new(config(temp, max), service).with_finished_hook(move |job| {
            let _ = tx.send((job.job().job_id.clone(), job.status()));
        });
        (manager, rx)
    }

    async fn next_finished(rx: &mut mpsc::UnboundedReceiver<(String, JobStatus)>) -> (String, JobStatus) {
        tokio::time::timeout(Duration::from_secs(30), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    async fn wait_for_processes(manager: &JobManager, count: usize) {
        loop {
            let live = lock(&manager.active)
                .values()
                .filter(|job| job.has_process())
                .count();
            if live >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn job(id: &str) -> JobDescriptor {
        JobDescriptor::new(id, "w", "p", "main.py")
    }

    #[tokio::test]
    async fn test_admit_runs_to_completion() {
        let temp = TempDir::new().unwrap();
        let service = Arc::new(MemoryJobService::new().with_file("main.py", "echo done"));
        let (manager, mut rx) = manager(&temp, 1, service.clone());

        assert!(manager.admit(job("j1")).await);
        assert_eq!(next_finished(&mut rx).await, ("j1".to_string(), JobStatus::Completed));
        assert_eq!(manager.active_count(), 0);
        assert_eq!(
            service.properties_for("j1")[0],
            JobProperty::Status(JobStatus::Running)
        );
    }

    #[tokio::test]
    async fn test_duplicate_and_capacity() {
        let temp = TempDir::new().unwrap();
        let service = Arc::new(MemoryJobService::new().with_file("main.py", "sleep 30"));
        let (manager, mut rx) = manager(&temp, 1, service.clone());

        assert!(manager.admit(job("j1")).await);
        assert!(!manager.admit(job("j1")).await);
        assert!(!manager.admit(job("j2")).await);
        assert_eq!(manager.active_job_ids(), vec!["j1"]);
        // Rejected offers are never reported
        assert!(service.properties_for("j2").is_empty());

        wait_for_processes(&manager, 1).await;
        manager.stop();
        assert_eq!(next_finished(&mut rx).await, ("j1".to_string(), JobStatus::Failed));
        assert_eq!(manager.active_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_offers_respect_cap() {
        let temp = TempDir::new().unwrap();
        let service = Arc::new(MemoryJobService::new().with_file("main.py", "sleep 30"));
        let (manager, mut rx) = manager(&temp, 2, service);
        let manager = Arc::new(manager);

        let offers: Vec<_> = ["a", "b", "c", "d"]
            .into_iter()
            .map(|id| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.admit(job(id)).await })
            })
            .collect();
        let mut taken = 0;
        for offer in offers {
            if offer.await.unwrap() {
                taken += 1;
            }
        }
        assert_eq!(taken, 2);
        assert_eq!(manager.active_count(), 2);

        wait_for_processes(&manager, 2).await;
        manager.stop();
        next_finished(&mut rx).await;
        next_finished(&mut rx).await;
    }

    #[tokio::test]
    async fn test_refused_transition_is_discarded() {
        let temp = TempDir::new().unwrap();
        let service = Arc::new(MemoryJobService::new().with_file("main.py", "echo hi"));
        service.refuse_status_updates();
        let (manager, _rx) = manager(&temp, 1, service);

        assert!(!manager.admit(job("j1")).await);
        assert_eq!(manager.active_count(), 0);
        assert!(!temp.path().join("script_jobs/j1").exists());
    }

    #[tokio::test]
    async fn test_unreachable_service_is_discarded() {
        let temp = TempDir::new().unwrap();
        let service = Arc::new(MemoryJobService::new().with_file("main.py", "echo hi"));
        service.set_unreachable(true);
        let (manager, _rx) = manager(&temp, 1, service.clone());

        assert!(!manager.admit(job("j1")).await);
        assert_eq!(manager.active_count(), 0);

        // Offered again once the service is back
        service.set_unreachable(false);
        assert!(manager.admit(job("j1")).await);
    }

    #[tokio::test]
    async fn test_slot_freed_after_failure() {
        let temp = TempDir::new().unwrap();
        let service = Arc::new(MemoryJobService::new().with_file("main.py", "exit 1"));
        let (manager, mut rx) = manager(&temp, 1, service);

        assert!(manager.admit(job("j1")).await);
        assert_eq!(next_finished(&mut rx).await.1, JobStatus::Failed);
        assert!(manager.admit(job("j2")).await);
        assert_eq!(next_finished(&mut rx).await.0, "j2");
    }

    #[tokio::test]
    async fn test_reclaim_missing_root() {
        let temp = TempDir::new().unwrap();
        let service = Arc::new(MemoryJobService::new());
        let (manager, _rx) = manager(&temp, 1, service);
        let report = manager.reclaim_stale_workspaces().await;
        assert!(report.removed.is_empty());
        assert_eq!(report.failed, 0);
    }

    #[tokio::test]
    async fn test_reclaim_keeps_recent_workspaces() {
        let temp = TempDir::new().unwrap();
        let service = Arc::new(MemoryJobService::new());
        let (manager, _rx) = manager(&temp, 1, service);
        let ws = manager.config().workspace_root.join("old-job");
        std::fs::create_dir_all(&ws).unwrap();

        let report = manager.reclaim_stale_workspaces().await;
        assert!(report.removed.is_empty());
        assert!(ws.exists());
    }
}
