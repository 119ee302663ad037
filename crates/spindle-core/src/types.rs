//! Job descriptor and status types shared by every spindle crate.

use serde::{Deserialize, Serialize};

/// Job status as stored by the coordination service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting for a node to pick it up
    Pending,
    /// Accepted by the service but not yet started
    Queued,
    /// Executing on a node
    Running,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Whether no further transitions are allowed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Resources a job declares it needs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequiredResources {
    pub num_cpus: Option<u32>,
    pub ram_gb: Option<f64>,
    pub timeout_sec: Option<u64>,
}

/// A processing job that runs a packaged analysis tool instead of a script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolRun {
    /// Tool name, e.g. `mountainsort5`
    pub tool: String,
    /// Project file bound to the job's `input` input
    #[serde(default)]
    pub input_file_name: Option<String>,
    /// Project file bound to the job's `output` output
    #[serde(default)]
    pub output_file_name: Option<String>,
}

/// One unit of work as supplied by the coordination service.
///
/// Never mutated locally: all changes are pushed back through property
/// updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDescriptor {
    pub job_id: String,
    pub workspace_id: String,
    pub project_id: String,
    /// Name of the project file to execute (`.py` or `.nba`); empty for
    /// tool runs
    pub script_file_name: String,
    #[serde(default)]
    pub required_resources: Option<RequiredResources>,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_run: Option<ToolRun>,
}

impl JobDescriptor {
    pub fn new(
        job_id: impl Into<String>,
        workspace_id: impl Into<String>,
        project_id: impl Into<String>,
        script_file_name: impl Into<String>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            workspace_id: workspace_id.into(),
            project_id: project_id.into(),
            script_file_name: script_file_name.into(),
            required_resources: None,
            status: JobStatus::Pending,
            tool_run: None,
        }
    }

    /// A processing job running `tool.tool`; it has no script file.
    pub fn tool(
        job_id: impl Into<String>,
        workspace_id: impl Into<String>,
        project_id: impl Into<String>,
        tool: ToolRun,
    ) -> Self {
        Self {
            tool_run: Some(tool),
            ..Self::new(job_id, workspace_id, project_id, "")
        }
    }

    pub fn with_resources(mut self, resources: RequiredResources) -> Self {
        self.required_resources = Some(resources);
        self
    }

    /// What the job runs, for log lines: the script file or the tool name.
    pub fn runnable_name(&self) -> &str {
        match &self.tool_run {
            Some(run) => &run.tool,
            None => &self.script_file_name,
        }
    }
}

/// Identity of this compute node as known to the coordination service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdentity {
    /// Compute resource id (hex Ed25519 public key)
    pub compute_resource_id: String,
    /// Hex Ed25519 private key seed used to sign requests
    pub compute_resource_private_key: String,
    pub node_id: String,
    pub node_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_names() {
        let json = serde_json::to_string(&JobStatus::Running).unwrap();
        assert_eq!(json, "\"running\"");
        let status: JobStatus = serde_json::from_str("\"queued\"").unwrap();
        assert_eq!(status, JobStatus::Queued);
        assert_eq!(JobStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
    }

    #[test]
    fn test_descriptor_from_service_json() {
        let json = r#"{
            "jobId": "j1",
            "workspaceId": "w1",
            "projectId": "p1",
            "scriptFileName": "analysis.py",
            "requiredResources": {"numCpus": 4, "ramGb": 8},
            "status": "pending"
        }"#;
        let job: JobDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(job.job_id, "j1");
        assert_eq!(job.script_file_name, "analysis.py");
        let resources = job.required_resources.as_ref().unwrap();
        assert_eq!(resources.num_cpus, Some(4));
        assert_eq!(resources.ram_gb, Some(8.0));
        assert!(resources.timeout_sec.is_none());
        assert!(job.tool_run.is_none());
        assert_eq!(job.runnable_name(), "analysis.py");
    }

    #[test]
    fn test_tool_run_descriptor() {
        let job = JobDescriptor::tool(
            "j2",
            "w",
            "p",
            ToolRun {
                tool: "kilosort3".to_string(),
                input_file_name: Some("rec.nwb".to_string()),
                output_file_name: None,
            },
        );
        assert_eq!(job.script_file_name, "");
        assert_eq!(job.runnable_name(), "kilosort3");
        assert_eq!(job.status, JobStatus::Pending);
    }
}
