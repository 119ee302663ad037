//! Wire types for the coordination service.
//!
//! Every payload is a JSON object tagged by `type` and carrying a
//! `timestamp` in seconds since the epoch. Responses echo the request type.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use spindle_core::{JobStatus, RequiredResources};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum RequestPayload {
    GetScriptJobs {
        timestamp: f64,
        compute_resource_id: String,
        status: JobStatus,
        node_id: String,
        node_name: String,
    },
    GetJobs {
        timestamp: f64,
        compute_resource_id: String,
        status: JobStatus,
        node_id: String,
        node_name: String,
    },
    SetScriptJobProperty {
        timestamp: f64,
        workspace_id: String,
        project_id: String,
        script_job_id: String,
        property: String,
        value: Value,
        compute_resource_node_id: String,
        compute_resource_node_name: String,
    },
    SetJobProperty {
        timestamp: f64,
        workspace_id: String,
        project_id: String,
        job_id: String,
        property: String,
        value: Value,
        compute_resource_node_id: String,
        compute_resource_node_name: String,
    },
    GetProjectFile {
        timestamp: f64,
        project_id: String,
        file_name: String,
    },
    GetFile {
        timestamp: f64,
        project_id: String,
        file_name: String,
    },
    GetProjectFiles {
        timestamp: f64,
        project_id: String,
    },
    GetFiles {
        timestamp: f64,
        project_id: String,
    },
    GetDataBlob {
        timestamp: f64,
        workspace_id: String,
        project_id: String,
        sha1: String,
    },
    SetProjectFile {
        timestamp: f64,
        workspace_id: String,
        project_id: String,
        file_name: String,
        file_content: String,
    },
    SetFile {
        timestamp: f64,
        workspace_id: String,
        project_id: String,
        file_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_data: Option<String>,
        size: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        job_id: Option<String>,
        metadata: Value,
    },
    GetPubsubSubscription {
        timestamp: f64,
        compute_resource_id: String,
    },
}

impl RequestPayload {
    /// Wire name of the request, as found in its `type` field.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::GetScriptJobs { .. } => "getScriptJobs",
            Self::GetJobs { .. } => "getJobs",
            Self::SetScriptJobProperty { .. } => "setScriptJobProperty",
            Self::SetJobProperty { .. } => "setJobProperty",
            Self::GetProjectFile { .. } => "getProjectFile",
            Self::GetFile { .. } => "getFile",
            Self::GetProjectFiles { .. } => "getProjectFiles",
            Self::GetFiles { .. } => "getFiles",
            Self::GetDataBlob { .. } => "getDataBlob",
            Self::SetProjectFile { .. } => "setProjectFile",
            Self::SetFile { .. } => "setFile",
            Self::GetPubsubSubscription { .. } => "getPubsubSubscription",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ResponsePayload {
    GetScriptJobs {
        script_jobs: Vec<RawScriptJob>,
    },
    GetJobs {
        jobs: Vec<RawJob>,
    },
    SetScriptJobProperty {
        #[serde(default)]
        success: Option<bool>,
        #[serde(default)]
        error: Option<String>,
    },
    SetJobProperty {
        #[serde(default)]
        success: Option<bool>,
        #[serde(default)]
        error: Option<String>,
    },
    GetProjectFile {
        project_file: RawProjectFile,
    },
    GetFile {
        file: RawFile,
    },
    GetProjectFiles {
        project_files: Vec<RawProjectFile>,
    },
    GetFiles {
        files: Vec<RawFile>,
    },
    GetDataBlob {
        content: String,
    },
    SetProjectFile {},
    SetFile {},
    GetPubsubSubscription {
        #[serde(default)]
        subscription_info: Value,
    },
    /// Any response type this node does not understand
    #[serde(other)]
    Other,
}

impl ResponsePayload {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::GetScriptJobs { .. } => "getScriptJobs",
            Self::GetJobs { .. } => "getJobs",
            Self::SetScriptJobProperty { .. } => "setScriptJobProperty",
            Self::SetJobProperty { .. } => "setJobProperty",
            Self::GetProjectFile { .. } => "getProjectFile",
            Self::GetFile { .. } => "getFile",
            Self::GetProjectFiles { .. } => "getProjectFiles",
            Self::GetFiles { .. } => "getFiles",
            Self::GetDataBlob { .. } => "getDataBlob",
            Self::SetProjectFile {} => "setProjectFile",
            Self::SetFile {} => "setFile",
            Self::GetPubsubSubscription { .. } => "getPubsubSubscription",
            Self::Other => "other",
        }
    }
}

/// Script job record as returned by `getScriptJobs`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawScriptJob {
    pub script_job_id: String,
    pub workspace_id: String,
    pub project_id: String,
    pub script_file_name: String,
    pub status: JobStatus,
    #[serde(default)]
    pub required_resources: Option<RequiredResources>,
}

/// Processing job record as returned by `getJobs`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawJob {
    pub job_id: String,
    pub workspace_id: String,
    pub project_id: String,
    #[serde(alias = "processType")]
    pub tool_name: String,
    #[serde(default)]
    pub input_parameters: Vec<RawInputParameter>,
    #[serde(default)]
    pub input_files: Vec<RawJobFile>,
    #[serde(default)]
    pub output_files: Vec<RawJobFile>,
    pub status: JobStatus,
    #[serde(default)]
    pub required_resources: Option<RequiredResources>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawInputParameter {
    pub name: String,
    #[serde(default)]
    pub value: Option<Value>,
}

/// Binding of a named job input or output to a project file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawJobFile {
    pub name: String,
    pub file_name: String,
}

/// Project file record; content lives in a data blob.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawProjectFile {
    pub file_name: String,
    pub content_sha1: String,
}

/// File record; `content` is prefixed with `data:`, `blob:` or `url:`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawFile {
    pub file_name: String,
    pub content: String,
}

/// Envelope actually posted to the service.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedRequest<'a> {
    pub payload: &'a RequestPayload,
    pub from_client_id: &'a str,
    pub signature: String,
}
