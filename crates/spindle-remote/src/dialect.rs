//! Job families known to the coordination service.
//!
//! Script jobs and processing jobs share one execution pipeline. They only
//! differ in request names, id field names and how file content is stored,
//! so each family is a [`JobDialect`] that builds its requests and
//! unpacks its responses.

use crate::error::RemoteError;
use crate::protocol::{RawJob, RawJobFile, RawScriptJob, RequestPayload, ResponsePayload};
use serde_json::{Value, json};
use spindle_core::{JobDescriptor, JobStatus, NodeIdentity, ToolRun};

/// Where a file's bytes live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContent {
    /// Content carried in the file record itself
    Inline(String),
    /// Content-addressed blob, fetched by SHA-1
    Blob(String),
    /// Content hosted elsewhere; only the URL is handed to the job
    Url(String),
}

impl FileContent {
    /// Decode a prefixed content string (`data:...`, `blob:<sha1>` or
    /// `url:<url>`). Anything unprefixed is an error.
    pub fn parse(file_name: &str, content: &str) -> Result<Self, RemoteError> {
        if let Some(data) = content.strip_prefix("data:") {
            Ok(Self::Inline(data.to_string()))
        } else if let Some(sha1) = content.strip_prefix("blob:") {
            Ok(Self::Blob(sha1.to_string()))
        } else if let Some(url) = content.strip_prefix("url:") {
            Ok(Self::Url(url.to_string()))
        } else {
            Err(RemoteError::UnloadableContent(file_name.to_string()))
        }
    }
}

pub trait JobDialect: Send + Sync {
    /// Label used in log lines ("script job", "job").
    fn label(&self) -> &'static str;

    /// Notification `type` announcing new pending work for this family.
    fn notification_type(&self) -> &'static str;

    fn pending_jobs_request(&self, identity: &NodeIdentity, timestamp: f64) -> RequestPayload;

    fn parse_pending_jobs(&self, resp: ResponsePayload) -> Result<Vec<JobDescriptor>, RemoteError>;

    fn set_property_request(
        &self,
        job: &JobDescriptor,
        identity: &NodeIdentity,
        property: &str,
        value: Value,
        timestamp: f64,
    ) -> RequestPayload;

    /// Whether the service accepted the property update.
    fn parse_set_property(&self, resp: ResponsePayload) -> Result<bool, RemoteError>;

    fn file_request(&self, job: &JobDescriptor, file_name: &str, timestamp: f64) -> RequestPayload;

    fn parse_file(&self, file_name: &str, resp: ResponsePayload)
    -> Result<FileContent, RemoteError>;

    fn project_files_request(&self, job: &JobDescriptor, timestamp: f64) -> RequestPayload;

    /// Names of all files in the job's project.
    fn parse_project_files(&self, resp: ResponsePayload) -> Result<Vec<String>, RemoteError>;

    fn upload_request(
        &self,
        job: &JobDescriptor,
        file_name: &str,
        content: &str,
        timestamp: f64,
    ) -> RequestPayload;

    /// Request recording a project file whose content lives at `url`.
    ///
    /// `None` when the family has no such files.
    fn url_file_request(
        &self,
        job: &JobDescriptor,
        file_name: &str,
        url: &str,
        size: u64,
        timestamp: f64,
    ) -> Option<RequestPayload>;

    fn parse_upload(&self, resp: ResponsePayload) -> Result<(), RemoteError>;
}

fn property_accepted(label: &str, success: Option<bool>, error: Option<String>) -> bool {
    if let Some(error) = error {
        tracing::warn!("Service refused {} property update: {}", label, error);
    }
    success.unwrap_or(false)
}

/// `getScriptJobs` / `setScriptJobProperty` family; files are blobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptJobDialect;

impl ScriptJobDialect {
    fn descriptor(raw: RawScriptJob) -> JobDescriptor {
        JobDescriptor {
            job_id: raw.script_job_id,
            workspace_id: raw.workspace_id,
            project_id: raw.project_id,
            script_file_name: raw.script_file_name,
            required_resources: raw.required_resources,
            status: raw.status,
            tool_run: None,
        }
    }
}

impl JobDialect for ScriptJobDialect {
    fn label(&self) -> &'static str {
        "script job"
    }

    fn notification_type(&self) -> &'static str {
        "newPendingScriptJob"
    }

    fn pending_jobs_request(&self, identity: &NodeIdentity, timestamp: f64) -> RequestPayload {
        RequestPayload::GetScriptJobs {
            timestamp,
            compute_resource_id: identity.compute_resource_id.clone(),
            status: JobStatus::Pending,
            node_id: identity.node_id.clone(),
            node_name: identity.node_name.clone(),
        }
    }

    fn parse_pending_jobs(&self, resp: ResponsePayload) -> Result<Vec<JobDescriptor>, RemoteError> {
        match resp {
            ResponsePayload::GetScriptJobs { script_jobs } => {
                Ok(script_jobs.into_iter().map(Self::descriptor).collect())
            }
            _ => Err(RemoteError::UnexpectedResponse("getScriptJobs")),
        }
    }

    fn set_property_request(
        &self,
        job: &JobDescriptor,
        identity: &NodeIdentity,
        property: &str,
        value: Value,
        timestamp: f64,
    ) -> RequestPayload {
        RequestPayload::SetScriptJobProperty {
            timestamp,
            workspace_id: job.workspace_id.clone(),
            project_id: job.project_id.clone(),
            script_job_id: job.job_id.clone(),
            property: property.to_string(),
            value,
            compute_resource_node_id: identity.node_id.clone(),
            compute_resource_node_name: identity.node_name.clone(),
        }
    }

    fn parse_set_property(&self, resp: ResponsePayload) -> Result<bool, RemoteError> {
        match resp {
            ResponsePayload::SetScriptJobProperty { success, error } => {
                Ok(property_accepted(self.label(), success, error))
            }
            _ => Err(RemoteError::UnexpectedResponse("setScriptJobProperty")),
        }
    }

    fn file_request(&self, job: &JobDescriptor, file_name: &str, timestamp: f64) -> RequestPayload {
        RequestPayload::GetProjectFile {
            timestamp,
            project_id: job.project_id.clone(),
            file_name: file_name.to_string(),
        }
    }

    fn parse_file(
        &self,
        _file_name: &str,
        resp: ResponsePayload,
    ) -> Result<FileContent, RemoteError> {
        match resp {
            ResponsePayload::GetProjectFile { project_file } => {
                Ok(FileContent::Blob(project_file.content_sha1))
            }
            _ => Err(RemoteError::UnexpectedResponse("getProjectFile")),
        }
    }

    fn project_files_request(&self, job: &JobDescriptor, timestamp: f64) -> RequestPayload {
        RequestPayload::GetProjectFiles {
            timestamp,
            project_id: job.project_id.clone(),
        }
    }

    fn parse_project_files(&self, resp: ResponsePayload) -> Result<Vec<String>, RemoteError> {
        match resp {
            ResponsePayload::GetProjectFiles { project_files } => {
                Ok(project_files.into_iter().map(|f| f.file_name).collect())
            }
            _ => Err(RemoteError::UnexpectedResponse("getProjectFiles")),
        }
    }

    fn upload_request(
        &self,
        job: &JobDescriptor,
        file_name: &str,
        content: &str,
        timestamp: f64,
    ) -> RequestPayload {
        RequestPayload::SetProjectFile {
            timestamp,
            workspace_id: job.workspace_id.clone(),
            project_id: job.project_id.clone(),
            file_name: file_name.to_string(),
            file_content: content.to_string(),
        }
    }

    fn url_file_request(
        &self,
        _job: &JobDescriptor,
        _file_name: &str,
        _url: &str,
        _size: u64,
        _timestamp: f64,
    ) -> Option<RequestPayload> {
        None
    }

    fn parse_upload(&self, resp: ResponsePayload) -> Result<(), RemoteError> {
        match resp {
            ResponsePayload::SetProjectFile {} => Ok(()),
            _ => Err(RemoteError::UnexpectedResponse("setProjectFile")),
        }
    }
}

/// `getJobs` / `setJobProperty` family; file content is prefixed.
///
/// This node executes jobs of the `script` tool that carry a `script_file`
/// parameter, and jobs of the spike-sorting tools, whose recording is
/// bound to the `input` input file and whose result goes to the `output`
/// output file.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessingJobDialect;

fn bound_file(files: &[RawJobFile], name: &str) -> Option<String> {
    files
        .iter()
        .find(|f| f.name == name)
        .map(|f| f.file_name.clone())
}

impl ProcessingJobDialect {
    pub const SCRIPT_TOOL: &'static str = "script";
    pub const SCRIPT_FILE_PARAMETER: &'static str = "script_file";
    pub const ANALYSIS_TOOLS: [&'static str; 2] = ["mountainsort5", "kilosort3"];
    pub const INPUT_FILE: &'static str = "input";
    pub const OUTPUT_FILE: &'static str = "output";

    fn descriptor(raw: RawJob) -> Option<JobDescriptor> {
        if Self::ANALYSIS_TOOLS.contains(&raw.tool_name.as_str()) {
            let tool = ToolRun {
                input_file_name: bound_file(&raw.input_files, Self::INPUT_FILE),
                output_file_name: bound_file(&raw.output_files, Self::OUTPUT_FILE),
                tool: raw.tool_name,
            };
            let mut job = JobDescriptor::tool(raw.job_id, raw.workspace_id, raw.project_id, tool);
            job.required_resources = raw.required_resources;
            job.status = raw.status;
            return Some(job);
        }
        if raw.tool_name != Self::SCRIPT_TOOL {
            tracing::warn!(
                job_id = %raw.job_id,
                "Skipping job with unsupported tool: {}",
                raw.tool_name
            );
            return None;
        }
        let script_file = raw
            .input_parameters
            .iter()
            .find(|p| p.name == Self::SCRIPT_FILE_PARAMETER)
            .and_then(|p| p.value.as_ref())
            .and_then(Value::as_str);
        let Some(script_file) = script_file else {
            tracing::warn!(job_id = %raw.job_id, "Skipping job without a script_file parameter");
            return None;
        };
        Some(JobDescriptor {
            job_id: raw.job_id,
            workspace_id: raw.workspace_id,
            project_id: raw.project_id,
            script_file_name: script_file.to_string(),
            required_resources: raw.required_resources,
            status: raw.status,
            tool_run: None,
        })
    }
}

impl JobDialect for ProcessingJobDialect {
    fn label(&self) -> &'static str {
        "job"
    }

    fn notification_type(&self) -> &'static str {
        "newPendingJob"
    }

    fn pending_jobs_request(&self, identity: &NodeIdentity, timestamp: f64) -> RequestPayload {
        RequestPayload::GetJobs {
            timestamp,
            compute_resource_id: identity.compute_resource_id.clone(),
            status: JobStatus::Pending,
            node_id: identity.node_id.clone(),
            node_name: identity.node_name.clone(),
        }
    }

    fn parse_pending_jobs(&self, resp: ResponsePayload) -> Result<Vec<JobDescriptor>, RemoteError> {
        match resp {
            ResponsePayload::GetJobs { jobs } => {
                Ok(jobs.into_iter().filter_map(Self::descriptor).collect())
            }
            _ => Err(RemoteError::UnexpectedResponse("getJobs")),
        }
    }

    fn set_property_request(
        &self,
        job: &JobDescriptor,
        identity: &NodeIdentity,
        property: &str,
        value: Value,
        timestamp: f64,
    ) -> RequestPayload {
        RequestPayload::SetJobProperty {
            timestamp,
            workspace_id: job.workspace_id.clone(),
            project_id: job.project_id.clone(),
            job_id: job.job_id.clone(),
            property: property.to_string(),
            value,
            compute_resource_node_id: identity.node_id.clone(),
            compute_resource_node_name: identity.node_name.clone(),
        }
    }

    fn parse_set_property(&self, resp: ResponsePayload) -> Result<bool, RemoteError> {
        match resp {
            ResponsePayload::SetJobProperty { success, error } => {
                Ok(property_accepted(self.label(), success, error))
            }
            _ => Err(RemoteError::UnexpectedResponse("setJobProperty")),
        }
    }

    fn file_request(&self, job: &JobDescriptor, file_name: &str, timestamp: f64) -> RequestPayload {
        RequestPayload::GetFile {
            timestamp,
            project_id: job.project_id.clone(),
            file_name: file_name.to_string(),
        }
    }

    fn parse_file(&self, file_name: &str, resp: ResponsePayload) -> Result<FileContent, RemoteError> {
        match resp {
            ResponsePayload::GetFile { file } => FileContent::parse(file_name, &file.content),
            _ => Err(RemoteError::UnexpectedResponse("getFile")),
        }
    }

    fn project_files_request(&self, job: &JobDescriptor, timestamp: f64) -> RequestPayload {
        RequestPayload::GetFiles {
            timestamp,
            project_id: job.project_id.clone(),
        }
    }

    fn parse_project_files(&self, resp: ResponsePayload) -> Result<Vec<String>, RemoteError> {
        match resp {
            ResponsePayload::GetFiles { files } => {
                Ok(files.into_iter().map(|f| f.file_name).collect())
            }
            _ => Err(RemoteError::UnexpectedResponse("getFiles")),
        }
    }

    fn upload_request(
        &self,
        job: &JobDescriptor,
        file_name: &str,
        content: &str,
        timestamp: f64,
    ) -> RequestPayload {
        RequestPayload::SetFile {
            timestamp,
            workspace_id: job.workspace_id.clone(),
            project_id: job.project_id.clone(),
            file_name: file_name.to_string(),
            content: None,
            file_data: Some(content.to_string()),
            size: content.len() as u64,
            job_id: None,
            metadata: json!({}),
        }
    }

    fn url_file_request(
        &self,
        job: &JobDescriptor,
        file_name: &str,
        url: &str,
        size: u64,
        timestamp: f64,
    ) -> Option<RequestPayload> {
        Some(RequestPayload::SetFile {
            timestamp,
            workspace_id: job.workspace_id.clone(),
            project_id: job.project_id.clone(),
            file_name: file_name.to_string(),
            content: Some(format!("url:{url}")),
            file_data: None,
            size,
            job_id: None,
            metadata: json!({}),
        })
    }

    fn parse_upload(&self, resp: ResponsePayload) -> Result<(), RemoteError> {
        match resp {
            ResponsePayload::SetFile {} => Ok(()),
            _ => Err(RemoteError::UnexpectedResponse("setFile")),
        }
    }
}
