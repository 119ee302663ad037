//! CLI argument parsing for spindle.

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Parser, ValueEnum};
use spindle_core::{ConfigError, NodeConfig, NodeIdentity, Preset, SandboxMethod};
use thiserror::Error;

/// Node identity file inside the node directory.
pub const IDENTITY_FILE_NAME: &str = ".spindle-node.yaml";

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Unable to read {path}: {source}")]
    ReadIdentity {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid node identity file {path}: {source}")]
    ParseIdentity {
        path: Utf8PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(
        "Container method is set to none. Pass --allow-host-execution (or set SPINDLE_ALLOW_HOST_EXECUTION=true) to allow this."
    )]
    HostExecutionNotAllowed,
    #[error("--max-concurrent-jobs must be at least 1")]
    ZeroConcurrency,
}

/// Which job family this node serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum JobFamily {
    /// Script jobs attached to project files
    #[default]
    Script,
    /// Processing jobs running the `script` tool or a sorting tool
    Processing,
}

#[derive(Parser, Debug)]
#[command(name = "spindle")]
#[command(about = "Compute node agent: runs jobs offered by the coordination service")]
pub struct Args {
    /// Node directory (holds the identity file and job workspaces)
    #[arg(default_value = ".")]
    pub dir: Utf8PathBuf,

    /// Coordination service base URL
    #[arg(long, env = "SPINDLE_URL", default_value = "https://neurobass.vercel.app")]
    pub service_url: String,

    /// How plain scripts are isolated: none, docker or singularity
    #[arg(long, env = "SPINDLE_CONTAINER_METHOD", default_value = "none")]
    pub container_method: String,

    /// Required to run with container method none
    #[arg(long, env = "SPINDLE_ALLOW_HOST_EXECUTION")]
    pub allow_host_execution: bool,

    /// Maximum number of jobs running at once
    #[arg(long, env = "SPINDLE_MAX_CONCURRENT_JOBS", default_value = "1")]
    pub max_concurrent_jobs: usize,

    /// Job family to serve
    #[arg(long, env = "SPINDLE_JOB_FAMILY", value_enum, default_value_t = JobFamily::Script)]
    pub job_family: JobFamily,

    /// Directory holding analysis driver scripts
    #[arg(long, env = "ANALYSIS_SCRIPTS_DIR")]
    pub analysis_scripts_dir: Option<Utf8PathBuf>,

    /// Prefix placed before the interpreter for analysis jobs
    #[arg(long, env = "ANALYSIS_RUN_PREFIX")]
    pub analysis_run_prefix: Option<String>,

    /// Deployment preset: flatiron or generic
    #[arg(long, env = "SPINDLE_PRESET", default_value = "flatiron")]
    pub preset: String,

    /// Interpreter named in generated run scripts
    #[arg(long, default_value = "python3")]
    pub interpreter: String,

    /// Container image for docker/singularity
    #[arg(long, env = "SPINDLE_CONTAINER_IMAGE")]
    pub container_image: Option<String>,
}

/// Read the node identity from `<dir>/.spindle-node.yaml`.
pub fn load_identity(dir: &Utf8Path) -> Result<NodeIdentity, CliError> {
    let path = dir.join(IDENTITY_FILE_NAME);
    let text = std::fs::read_to_string(&path).map_err(|source| CliError::ReadIdentity {
        path: path.clone(),
        source,
    })?;
    serde_yaml::from_str(&text).map_err(|source| CliError::ParseIdentity { path, source })
}

impl Args {
    /// Build the node configuration from these arguments and `identity`.
    pub fn build_config(&self, identity: NodeIdentity) -> Result<NodeConfig, CliError> {
        let sandbox: SandboxMethod = self.container_method.parse()?;
        if sandbox == SandboxMethod::None && !self.allow_host_execution {
            return Err(CliError::HostExecutionNotAllowed);
        }
        if self.max_concurrent_jobs == 0 {
            return Err(CliError::ZeroConcurrency);
        }
        let preset: Preset = self.preset.parse()?;

        let mut config = NodeConfig::new(identity, self.dir.clone())
            .with_sandbox(sandbox)
            .with_max_concurrent_jobs(self.max_concurrent_jobs);
        config.interpreter = self.interpreter.clone();
        if let Some(image) = &self.container_image {
            config.container_image = image.clone();
        }
        config.analysis.scripts_dir = self.analysis_scripts_dir.clone();
        config.analysis.run_prefix = self.analysis_run_prefix.clone();
        config.analysis.preset = preset;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn identity() -> NodeIdentity {
        NodeIdentity {
            compute_resource_id: "abc".to_string(),
            compute_resource_private_key: "def".to_string(),
            node_id: "node-1".to_string(),
            node_name: "host".to_string(),
        }
    }

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("spindle").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let args = parse(&["/data/node"]);
        assert_eq!(args.dir, "/data/node");
        assert_eq!(args.max_concurrent_jobs, 1);
        assert_eq!(args.job_family, JobFamily::Script);
        assert!(!args.allow_host_execution);
    }

    #[test]
    fn test_job_family_reads_environment() {
        use clap::CommandFactory;
        let command = Args::command();
        let arg = command
            .get_arguments()
            .find(|a| a.get_id() == "job_family")
            .unwrap();
        assert_eq!(
            arg.get_env().and_then(|e| e.to_str()),
            Some("SPINDLE_JOB_FAMILY")
        );
    }

    #[test]
    fn test_host_execution_requires_opt_in() {
        let args = parse(&["/data/node"]);
        assert!(matches!(
            args.build_config(identity()),
            Err(CliError::HostExecutionNotAllowed)
        ));

        let args = parse(&["/data/node", "--allow-host-execution"]);
        let config = args.build_config(identity()).unwrap();
        assert_eq!(config.sandbox, SandboxMethod::None);
        assert_eq!(config.workspace_root, "/data/node/script_jobs");
    }

    #[test]
    fn test_container_config() {
        let args = parse(&[
            "/n",
            "--container-method",
            "singularity",
            "--max-concurrent-jobs",
            "3",
            "--preset",
            "generic",
            "--analysis-run-prefix",
            "srun -p gpu",
            "--job-family",
            "processing",
        ]);
        assert_eq!(args.job_family, JobFamily::Processing);
        let config = args.build_config(identity()).unwrap();
        assert_eq!(config.sandbox, SandboxMethod::Singularity);
        assert_eq!(config.max_concurrent_jobs, 3);
        assert_eq!(config.analysis.preset, Preset::Generic);
        assert_eq!(config.analysis.run_prefix.as_deref(), Some("srun -p gpu"));
    }

    #[test]
    fn test_invalid_values() {
        let args = parse(&["/n", "--container-method", "podman"]);
        assert!(matches!(
            args.build_config(identity()),
            Err(CliError::Config(ConfigError::InvalidSandboxMethod(_)))
        ));
        let args = parse(&["/n", "--container-method", "docker", "--max-concurrent-jobs", "0"]);
        assert!(matches!(args.build_config(identity()), Err(CliError::ZeroConcurrency)));
    }

    #[test]
    fn test_load_identity() {
        let temp = TempDir::new().unwrap();
        let dir = Utf8Path::from_path(temp.path()).unwrap();
        assert!(matches!(load_identity(dir), Err(CliError::ReadIdentity { .. })));

        std::fs::write(
            dir.join(IDENTITY_FILE_NAME),
            "compute_resource_id: abc\ncompute_resource_private_key: def\nnode_id: node-1\nnode_name: host\n",
        )
        .unwrap();
        assert_eq!(load_identity(dir).unwrap(), identity());

        std::fs::write(dir.join(IDENTITY_FILE_NAME), "node_id: [").unwrap();
        assert!(matches!(load_identity(dir), Err(CliError::ParseIdentity { .. })));
    }
}
