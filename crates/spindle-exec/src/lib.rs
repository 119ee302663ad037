//! Execution pipeline for one job.
//!
//! [`Provisioner`] turns a job descriptor into a populated workspace and a
//! command line, [`Supervisor`] runs that command under a timeout while
//! streaming console output, and [`artifacts`] ships the results back.

pub mod artifacts;
pub mod kind;
pub mod manifest;
pub mod provision;
pub mod run_script;
pub mod sandbox;
pub mod scan;
pub mod supervisor;

pub use artifacts::{ArtifactError, collect_artifacts};
pub use kind::{AnalysisTemplate, JobKind, ScriptType};
pub use provision::{PreparedJob, ProvisionError, Provisioner};
pub use sandbox::{CommandLine, ResourceLimits};
pub use supervisor::{ConsoleSink, ExecError, FlushThrottle, ProcessSlot, Supervised, Supervisor};
