//! Command lines for the three sandbox methods.
//!
//! Container methods bind the workspace to `/working` and run `run.sh`
//! there. Only docker applies CPU/memory limits; on singularity hosts the
//! batch scheduler is expected to enforce them.

use crate::kind::JobKind;
use crate::run_script::RUN_SCRIPT_NAME;
use camino::Utf8Path;
use spindle_core::{NodeConfig, RequiredResources, SandboxMethod};

/// Working directory inside containers.
pub const CONTAINER_WORKDIR: &str = "/working";

/// A program and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

impl std::fmt::Display for CommandLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// CPU and memory limits for a containerized plain script.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceLimits {
    pub num_cpus: u32,
    pub ram_gb: f64,
}

impl ResourceLimits {
    /// Declared requirements, falling back to the node defaults.
    pub fn resolve(declared: Option<&RequiredResources>, config: &NodeConfig) -> Self {
        Self {
            num_cpus: declared
                .and_then(|r| r.num_cpus)
                .unwrap_or(config.default_num_cpus),
            ram_gb: declared
                .and_then(|r| r.ram_gb)
                .unwrap_or(config.default_ram_gb),
        }
    }
}

/// Analysis jobs always run on the host.
pub fn effective_method(configured: SandboxMethod, kind: JobKind) -> SandboxMethod {
    if kind.is_analysis() {
        SandboxMethod::None
    } else {
        configured
    }
}

/// Build the command for `method`.
///
/// `workspace` must be absolute for the container methods. Returns `None`
/// for combinations that are not supported (analysis jobs in a container).
pub fn command_line(
    method: SandboxMethod,
    kind: JobKind,
    workspace: &Utf8Path,
    image: &str,
    limits: ResourceLimits,
) -> Option<CommandLine> {
    let bind = format!("{}:{}", workspace, CONTAINER_WORKDIR);
    match (method, kind) {
        (SandboxMethod::None, _) => Some(CommandLine::new("bash").arg(RUN_SCRIPT_NAME)),
        (SandboxMethod::Docker, JobKind::PlainScript) => Some(
            CommandLine::new("docker")
                .arg("run")
                .arg("--rm")
                .arg("-v")
                .arg(bind)
                .arg("-w")
                .arg(CONTAINER_WORKDIR)
                .arg("--cpus")
                .arg(limits.num_cpus.to_string())
                .arg("--memory")
                .arg(format!("{}g", limits.ram_gb))
                .arg(image)
                .arg("bash")
                .arg("-c")
                // Passed as one argument so the container shell sees it whole
                .arg(format!("bash {}", RUN_SCRIPT_NAME)),
        ),
        (SandboxMethod::Singularity, JobKind::PlainScript) => Some(
            CommandLine::new("singularity")
                .arg("exec")
                // No home, tmp or other host mounts
                .arg("-C")
                .arg("--pwd")
                .arg(CONTAINER_WORKDIR)
                .arg("--bind")
                .arg(bind)
                .arg(format!("docker://{}", image))
                .arg("bash")
                .arg(RUN_SCRIPT_NAME),
        ),
        (_, JobKind::Analysis(_) | JobKind::Tool(_)) => None,
    }
}
