//! Output collection after a successful run.

use crate::kind::JobKind;
use crate::run_script::RUN_SCRIPT_NAME;
use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use spindle_core::JobDescriptor;
use spindle_remote::{JobService, RemoteError};
use std::fs;
use thiserror::Error;

/// Subdirectory analysis drivers write their results to.
pub const ANALYSIS_OUTPUT_DIR: &str = "output";
pub const ANALYSIS_OUTPUT_FILE: &str = "out.json";

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("Too many output files.")]
    TooManyOutputFiles { count: usize, max: usize },
    #[error("Unable to read output {path}: {source}")]
    Read {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid analysis output: {0}")]
    InvalidAnalysisOutput(#[from] serde_json::Error),
    #[error("No output file specified")]
    NoOutputFile,
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

fn read_error(path: &Utf8Path) -> impl FnOnce(std::io::Error) -> ArtifactError + '_ {
    move |source| ArtifactError::Read {
        path: path.to_owned(),
        source,
    }
}

/// Regular files in `workspace` other than the script and `run.sh`, by name.
///
/// Fails without listing anything useful when there are more than `max`.
pub fn plain_output_files(
    workspace: &Utf8Path,
    script_file_name: &str,
    max: usize,
) -> Result<Vec<String>, ArtifactError> {
    let mut names = Vec::new();
    for entry in fs::read_dir(workspace).map_err(read_error(workspace))? {
        let entry = entry.map_err(read_error(workspace))?;
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if name == script_file_name || name == RUN_SCRIPT_NAME {
            continue;
        }
        let path = workspace.join(&name);
        let metadata = fs::metadata(&path).map_err(read_error(&path))?;
        if metadata.is_file() {
            names.push(name);
        }
    }
    if names.len() > max {
        return Err(ArtifactError::TooManyOutputFiles {
            count: names.len(),
            max,
        });
    }
    names.sort();
    Ok(names)
}

/// `output/out.json`, re-serialized compactly.
pub fn analysis_output(workspace: &Utf8Path) -> Result<String, ArtifactError> {
    let path = workspace.join(ANALYSIS_OUTPUT_DIR).join(ANALYSIS_OUTPUT_FILE);
    let text = fs::read_to_string(&path).map_err(read_error(&path))?;
    let value: serde_json::Value = serde_json::from_str(&text)?;
    Ok(serde_json::to_string(&value)?)
}

/// What a sorting tool's driver leaves in `output/out.json`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SortingOutput {
    pub output_file_url: String,
    pub output_file_size: u64,
}

pub fn sorting_output(workspace: &Utf8Path) -> Result<SortingOutput, ArtifactError> {
    let path = workspace.join(ANALYSIS_OUTPUT_DIR).join(ANALYSIS_OUTPUT_FILE);
    let text = fs::read_to_string(&path).map_err(read_error(&path))?;
    Ok(serde_json::from_str(&text)?)
}

/// Upload the job's results.
///
/// Analysis jobs upload their output manifest as `<script>.out`. Plain
/// scripts upload every output file under its own name, or nothing at all
/// if there are more than `max_output_files`. Tool runs record the hosted
/// result as the job's `output` file.
pub async fn collect_artifacts(
    kind: JobKind,
    workspace: &Utf8Path,
    job: &JobDescriptor,
    service: &dyn JobService,
    max_output_files: usize,
) -> Result<(), ArtifactError> {
    match kind {
        JobKind::Analysis(_) => {
            let output = analysis_output(workspace)?;
            let name = format!("{}.out", job.script_file_name);
            tracing::info!(job_id = %job.job_id, "Uploading analysis output to {}", name);
            service.upload_file(job, &name, &output).await?;
        }
        JobKind::Tool(_) => {
            let output = sorting_output(workspace)?;
            let name = job
                .tool_run
                .as_ref()
                .and_then(|run| run.output_file_name.as_deref())
                .ok_or(ArtifactError::NoOutputFile)?;
            tracing::info!(
                job_id = %job.job_id,
                "Recording {} at {} ({} bytes)",
                name,
                output.output_file_url,
                output.output_file_size
            );
            service
                .set_url_file(job, name, &output.output_file_url, output.output_file_size)
                .await?;
        }
        JobKind::PlainScript => {
            let names = plain_output_files(workspace, &job.script_file_name, max_output_files)?;
            for name in names {
                let path = workspace.join(&name);
                let bytes = fs::read(&path).map_err(read_error(&path))?;
                let content = String::from_utf8_lossy(&bytes);
                tracing::info!(job_id = %job.job_id, "Uploading output file {}", name);
                service.upload_file(job, &name, &content).await?;
            }
        }
    }
    Ok(())
}
