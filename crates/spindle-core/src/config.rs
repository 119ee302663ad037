//! Node configuration.
//!
//! Built once at startup from command-line arguments and the node identity
//! file, then passed by value into the engine. Nothing below this layer
//! reads environment variables.

use crate::types::NodeIdentity;
use camino::Utf8PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid container method: {0}")]
    InvalidSandboxMethod(String),
    #[error("Invalid preset: {0}")]
    InvalidPreset(String),
}

/// How plain scripts are isolated from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SandboxMethod {
    /// Run the generated script directly on the host
    #[default]
    None,
    /// `docker run` with the workspace bound to `/working`
    Docker,
    /// `singularity exec` with the workspace bound to `/working`
    Singularity,
}

impl SandboxMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Docker => "docker",
            Self::Singularity => "singularity",
        }
    }
}

impl FromStr for SandboxMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "docker" => Ok(Self::Docker),
            "singularity" => Ok(Self::Singularity),
            other => Err(ConfigError::InvalidSandboxMethod(other.to_string())),
        }
    }
}

impl std::fmt::Display for SandboxMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Deployment preset that selects built-in defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Preset {
    /// Flatiron cluster: GPU analyses go through `srun`
    #[default]
    Flatiron,
    /// No site-specific defaults
    Generic,
}

impl FromStr for Preset {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "flatiron" => Ok(Self::Flatiron),
            "generic" => Ok(Self::Generic),
            other => Err(ConfigError::InvalidPreset(other.to_string())),
        }
    }
}

/// Settings for declarative analysis jobs.
#[derive(Debug, Clone, Default)]
pub struct AnalysisConfig {
    /// Directory holding `analysis_<type>.py` drivers and a `helpers/` dir
    pub scripts_dir: Option<Utf8PathBuf>,
    /// Prefix placed before the interpreter; overrides the preset
    pub run_prefix: Option<String>,
    pub preset: Preset,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub identity: NodeIdentity,
    /// Maximum number of jobs running at once
    pub max_concurrent_jobs: usize,
    pub sandbox: SandboxMethod,
    /// Directory holding one workspace per job
    pub workspace_root: Utf8PathBuf,
    /// Workspaces older than this are removed by the periodic sweep
    pub workspace_retention: Duration,
    /// Plain scripts producing more files than this fail
    pub max_output_files: usize,
    /// Wall-clock limit for one job's subprocess
    pub job_timeout: Duration,
    /// Minimum gap between console-output pushes while a job runs
    pub console_flush_interval: Duration,
    /// Container image for docker/singularity
    pub container_image: String,
    /// CPU limit for plain scripts when the job declares none
    pub default_num_cpus: u32,
    /// Memory limit (GB) for plain scripts when the job declares none
    pub default_ram_gb: f64,
    /// Interpreter named in the generated run script
    pub interpreter: String,
    pub analysis: AnalysisConfig,
}

impl NodeConfig {
    /// Create a configuration with defaults for everything but the identity
    /// and the node directory.
    pub fn new(identity: NodeIdentity, node_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            identity,
            max_concurrent_jobs: 1,
            sandbox: SandboxMethod::None,
            workspace_root: node_dir.into().join("script_jobs"),
            workspace_retention: Duration::from_secs(60 * 60 * 24),
            max_output_files: 5,
            job_timeout: Duration::from_secs(60 * 60 * 3),
            console_flush_interval: Duration::from_secs(10),
            container_image: "magland/neurobass-default".to_string(),
            default_num_cpus: 2,
            default_ram_gb: 2.0,
            interpreter: "python3".to_string(),
            analysis: AnalysisConfig::default(),
        }
    }

    pub fn with_sandbox(mut self, sandbox: SandboxMethod) -> Self {
        self.sandbox = sandbox;
        self
    }

    pub fn with_max_concurrent_jobs(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max;
        self
    }
}
