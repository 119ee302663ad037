//! In-memory [`JobService`] for tests.

use crate::error::RemoteError;
use crate::service::{JobProperty, JobService};
use async_trait::async_trait;
use spindle_core::JobDescriptor;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct State {
    pending: Vec<JobDescriptor>,
    files: HashMap<String, String>,
    url_files: HashMap<String, String>,
    properties: Vec<(String, JobProperty)>,
    uploads: Vec<(String, String, String)>,
    url_uploads: Vec<(String, String, String, u64)>,
    refuse_status: bool,
    unreachable: bool,
}

/// Records every property push and upload; serves project files from a map.
#[derive(Default)]
pub struct MemoryJobService {
    state: Mutex<State>,
}

impl MemoryJobService {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a project file (shared by every project).
    pub fn with_file(self, name: &str, content: &str) -> Self {
        self.state().files.insert(name.to_string(), content.to_string());
        self
    }

    /// Add a project file whose content is hosted at `url`.
    pub fn with_url_file(self, name: &str, url: &str) -> Self {
        self.state().url_files.insert(name.to_string(), url.to_string());
        self
    }

    pub fn push_pending(&self, job: JobDescriptor) {
        self.state().pending.push(job);
    }

    /// Answer status updates with `success: false`.
    pub fn refuse_status_updates(&self) {
        self.state().refuse_status = true;
    }

    /// Fail every call as if the service could not be reached.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state().unreachable = unreachable;
    }

    /// Properties pushed for `job_id`, in order.
    pub fn properties_for(&self, job_id: &str) -> Vec<JobProperty> {
        self.state()
            .properties
            .iter()
            .filter(|(id, _)| id == job_id)
            .map(|(_, p)| p.clone())
            .collect()
    }

    /// `(file name, content)` uploaded for `job_id`, in order.
    pub fn uploads_for(&self, job_id: &str) -> Vec<(String, String)> {
        self.state()
            .uploads
            .iter()
            .filter(|(id, _, _)| id == job_id)
            .map(|(_, name, content)| (name.clone(), content.clone()))
            .collect()
    }

    /// `(file name, url, size)` recorded for `job_id`, in order.
    pub fn url_uploads_for(&self, job_id: &str) -> Vec<(String, String, u64)> {
        self.state()
            .url_uploads
            .iter()
            .filter(|(id, _, _, _)| id == job_id)
            .map(|(_, name, url, size)| (name.clone(), url.clone(), *size))
            .collect()
    }

    fn check_reachable(&self) -> Result<(), RemoteError> {
        if self.state().unreachable {
            return Err(RemoteError::Rejected("service unreachable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl JobService for MemoryJobService {
    async fn pending_jobs(&self) -> Result<Vec<JobDescriptor>, RemoteError> {
        self.check_reachable()?;
        Ok(self.state().pending.clone())
    }

    async fn set_job_property(
        &self,
        job: &JobDescriptor,
        property: JobProperty,
    ) -> Result<bool, RemoteError> {
        self.check_reachable()?;
        let mut state = self.state();
        if state.refuse_status && matches!(property, JobProperty::Status(_)) {
            return Ok(false);
        }
        if matches!(property, JobProperty::Status(_)) {
            // Picked up: no longer offered
            state.pending.retain(|p| p.job_id != job.job_id);
        }
        state.properties.push((job.job_id.clone(), property));
        Ok(true)
    }

    async fn file_content(
        &self,
        _job: &JobDescriptor,
        file_name: &str,
    ) -> Result<String, RemoteError> {
        self.check_reachable()?;
        self.state()
            .files
            .get(file_name)
            .cloned()
            .ok_or_else(|| RemoteError::UnloadableContent(file_name.to_string()))
    }

    async fn project_files(&self, _job: &JobDescriptor) -> Result<Vec<String>, RemoteError> {
        self.check_reachable()?;
        let state = self.state();
        let mut names: Vec<String> = state
            .files
            .keys()
            .chain(state.url_files.keys())
            .cloned()
            .collect();
        names.sort();
        Ok(names)
    }

    async fn upload_file(
        &self,
        job: &JobDescriptor,
        file_name: &str,
        content: &str,
    ) -> Result<(), RemoteError> {
        self.check_reachable()?;
        self.state().uploads.push((
            job.job_id.clone(),
            file_name.to_string(),
            content.to_string(),
        ));
        Ok(())
    }

    async fn file_url(&self, _job: &JobDescriptor, file_name: &str) -> Result<String, RemoteError> {
        self.check_reachable()?;
        self.state()
            .url_files
            .get(file_name)
            .cloned()
            .ok_or_else(|| RemoteError::NotAUrl(file_name.to_string()))
    }

    async fn set_url_file(
        &self,
        job: &JobDescriptor,
        file_name: &str,
        url: &str,
        size: u64,
    ) -> Result<(), RemoteError> {
        self.check_reachable()?;
        self.state().url_uploads.push((
            job.job_id.clone(),
            file_name.to_string(),
            url.to_string(),
            size,
        ));
        Ok(())
    }

    fn notification_type(&self) -> &str {
        "newPendingScriptJob"
    }
}
