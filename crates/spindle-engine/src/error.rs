use spindle_exec::{ArtifactError, ExecError, ProvisionError};
use spindle_remote::RemoteError;
use thiserror::Error;

/// Anything that ends a job as failed. The message is what gets reported
/// as the job's `error` property.
#[derive(Error, Debug)]
pub enum JobError {
    #[error(transparent)]
    Provision(#[from] ProvisionError),
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
}
