use crate::dialect::{FileContent, JobDialect};
use crate::error::RemoteError;
use crate::protocol::{RequestPayload, ResponsePayload};
use crate::pubsub::SubscriptionInfo;
use crate::transport::Transport;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use spindle_core::{JobDescriptor, JobStatus, NodeIdentity};
use std::sync::Arc;

/// A job property the node reports back.
#[derive(Debug, Clone, PartialEq)]
pub enum JobProperty {
    Status(JobStatus),
    Error(String),
    ConsoleOutput(String),
    ElapsedTimeSec(f64),
}

impl JobProperty {
    /// Wire name of the property.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Status(_) => "status",
            Self::Error(_) => "error",
            Self::ConsoleOutput(_) => "consoleOutput",
            Self::ElapsedTimeSec(_) => "elapsedTimeSec",
        }
    }

    pub fn value(&self) -> Value {
        match self {
            Self::Status(status) => json!(status.as_str()),
            Self::Error(msg) | Self::ConsoleOutput(msg) => json!(msg),
            Self::ElapsedTimeSec(secs) => json!(secs),
        }
    }
}

/// Operations the execution engine needs from the coordination service.
#[async_trait]
pub trait JobService: Send + Sync {
    /// Pending jobs offered to this node.
    async fn pending_jobs(&self) -> Result<Vec<JobDescriptor>, RemoteError>;

    /// Push one property; `Ok(false)` means the service refused it.
    async fn set_job_property(
        &self,
        job: &JobDescriptor,
        property: JobProperty,
    ) -> Result<bool, RemoteError>;

    /// Resolved content of a project file.
    async fn file_content(&self, job: &JobDescriptor, file_name: &str)
    -> Result<String, RemoteError>;

    /// Names of every file in the job's project.
    async fn project_files(&self, job: &JobDescriptor) -> Result<Vec<String>, RemoteError>;

    async fn upload_file(
        &self,
        job: &JobDescriptor,
        file_name: &str,
        content: &str,
    ) -> Result<(), RemoteError>;

    /// URL a `url:` project file points at; the content is not fetched.
    async fn file_url(&self, job: &JobDescriptor, file_name: &str) -> Result<String, RemoteError>;

    /// Record a project file whose `size` bytes live at `url`.
    async fn set_url_file(
        &self,
        job: &JobDescriptor,
        file_name: &str,
        url: &str,
        size: u64,
    ) -> Result<(), RemoteError>;

    /// Notification type that announces new pending jobs.
    fn notification_type(&self) -> &str;
}

/// Seconds since the epoch, millisecond precision.
fn timestamp() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

/// [`JobService`] backed by the real service.
pub struct RemoteJobService {
    transport: Arc<dyn Transport>,
    dialect: Arc<dyn JobDialect>,
    identity: NodeIdentity,
}

impl RemoteJobService {
    pub fn new(
        transport: Arc<dyn Transport>,
        dialect: Arc<dyn JobDialect>,
        identity: NodeIdentity,
    ) -> Self {
        Self {
            transport,
            dialect,
            identity,
        }
    }

    /// Fetch the notification channel settings for this compute resource.
    pub async fn subscription_info(&self) -> Result<SubscriptionInfo, RemoteError> {
        let req = RequestPayload::GetPubsubSubscription {
            timestamp: timestamp(),
            compute_resource_id: self.identity.compute_resource_id.clone(),
        };
        match self.transport.post(&req).await? {
            ResponsePayload::GetPubsubSubscription { subscription_info } => {
                if subscription_info.is_null() {
                    return Ok(SubscriptionInfo::default());
                }
                Ok(serde_json::from_value(subscription_info)?)
            }
            _ => Err(RemoteError::UnexpectedResponse("getPubsubSubscription")),
        }
    }

    async fn load_blob(&self, job: &JobDescriptor, sha1: String) -> Result<String, RemoteError> {
        let req = RequestPayload::GetDataBlob {
            timestamp: timestamp(),
            workspace_id: job.workspace_id.clone(),
            project_id: job.project_id.clone(),
            sha1,
        };
        match self.transport.post(&req).await? {
            ResponsePayload::GetDataBlob { content } => Ok(content),
            _ => Err(RemoteError::UnexpectedResponse("getDataBlob")),
        }
    }
}

#[async_trait]
impl JobService for RemoteJobService {
    async fn pending_jobs(&self) -> Result<Vec<JobDescriptor>, RemoteError> {
        let req = self.dialect.pending_jobs_request(&self.identity, timestamp());
        let resp = self.transport.post(&req).await?;
        self.dialect.parse_pending_jobs(resp)
    }

    async fn set_job_property(
        &self,
        job: &JobDescriptor,
        property: JobProperty,
    ) -> Result<bool, RemoteError> {
        let req = self.dialect.set_property_request(
            job,
            &self.identity,
            property.name(),
            property.value(),
            timestamp(),
        );
        let resp = self.transport.post(&req).await?;
        self.dialect.parse_set_property(resp)
    }

    async fn file_content(
        &self,
        job: &JobDescriptor,
        file_name: &str,
    ) -> Result<String, RemoteError> {
        let req = self.dialect.file_request(job, file_name, timestamp());
        let resp = self.transport.post(&req).await?;
        match self.dialect.parse_file(file_name, resp)? {
            FileContent::Inline(content) => Ok(content),
            FileContent::Blob(sha1) => self.load_blob(job, sha1).await,
            FileContent::Url(_) => Err(RemoteError::UnloadableContent(file_name.to_string())),
        }
    }

    async fn file_url(&self, job: &JobDescriptor, file_name: &str) -> Result<String, RemoteError> {
        let req = self.dialect.file_request(job, file_name, timestamp());
        let resp = self.transport.post(&req).await?;
        match self.dialect.parse_file(file_name, resp)? {
            FileContent::Url(url) => Ok(url),
            _ => Err(RemoteError::NotAUrl(file_name.to_string())),
        }
    }

    async fn project_files(&self, job: &JobDescriptor) -> Result<Vec<String>, RemoteError> {
        let req = self.dialect.project_files_request(job, timestamp());
        let resp = self.transport.post(&req).await?;
        self.dialect.parse_project_files(resp)
    }

    async fn upload_file(
        &self,
        job: &JobDescriptor,
        file_name: &str,
        content: &str,
    ) -> Result<(), RemoteError> {
        let req = self.dialect.upload_request(job, file_name, content, timestamp());
        let resp = self.transport.post(&req).await?;
        self.dialect.parse_upload(resp)
    }

    async fn set_url_file(
        &self,
        job: &JobDescriptor,
        file_name: &str,
        url: &str,
        size: u64,
    ) -> Result<(), RemoteError> {
        let req = self
            .dialect
            .url_file_request(job, file_name, url, size, timestamp())
            .ok_or(RemoteError::Unsupported("url files"))?;
        let resp = self.transport.post(&req).await?;
        self.dialect.parse_upload(resp)
    }

    fn notification_type(&self) -> &str {
        self.dialect.notification_type()
    }
}
