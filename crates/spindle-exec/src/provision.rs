//! Workspace provisioning.
//!
//! Fetches the job's script and whatever it needs into a fresh workspace,
//! writes `run.sh` and picks the command that runs it. Sorting tool jobs
//! get the tool's driver instead of a script and read their recording by
//! URL, so nothing is downloaded for them.

use crate::kind::{AnalysisTemplate, JobKind, ScriptType};
use crate::manifest::AnalysisManifest;
use crate::run_script::{
    ANALYSIS_DRIVER_NAME, RUN_SCRIPT_NAME, analysis_run_script, plain_run_script, tool_run_script,
};
use crate::sandbox::{CommandLine, ResourceLimits, command_line, effective_method};
use crate::scan::referenced_files;
use camino::{Utf8Path, Utf8PathBuf};
use spindle_core::{
    AnalysisConfig, JobDescriptor, NameError, NodeConfig, Preset, SandboxMethod, StoreError,
    ToolRun, WorkspaceStore, validate_file_name,
};
use spindle_remote::{JobService, RemoteError};
use std::time::Duration;
use thiserror::Error;

/// Prefix used for GPU analyses on the Flatiron cluster.
pub const FLATIRON_GPU_PREFIX: &str = "srun -p gpu --gpus-per-task 1 --gpus 1 -t 0-4:00";

const HELPERS_DIR: &str = "helpers";

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("Unsupported script file name: {0}")]
    UnsupportedScript(String),
    #[error("Unexpected process type: {0}")]
    UnsupportedTool(String),
    #[error("Missing input file")]
    MissingInputFile,
    #[error("Unable to parse analysis manifest: {0}")]
    Manifest(#[from] serde_yaml::Error),
    #[error("Unexpected nba type: {0}")]
    UnexpectedNbaType(String),
    #[error("Missing recording_nwb_file")]
    MissingRecordingFile,
    #[error("Unable to find recording_nwb_file: {0}")]
    RecordingNotFound(String),
    #[error("Missing recording_electrical_series_path")]
    MissingElectricalSeriesPath,
    #[error("Analysis scripts directory is not configured.")]
    ScriptsDirNotConfigured,
    #[error("Unable to read {path}: {source}")]
    ReadLocal {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Unsupported container method {method} for {script}")]
    UnsupportedSandbox {
        method: SandboxMethod,
        script: String,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Name(#[from] NameError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// A workspace ready to run.
#[derive(Debug, Clone)]
pub struct PreparedJob {
    pub kind: JobKind,
    pub workspace: Utf8PathBuf,
    pub command: CommandLine,
    /// Wall-clock limit: always the node's configured job timeout
    pub timeout: Duration,
}

/// Run prefix for an analysis: the configured override, else the preset's.
pub fn run_prefix(analysis: &AnalysisConfig, template: AnalysisTemplate) -> Option<String> {
    match analysis.run_prefix.as_deref() {
        Some(prefix) if !prefix.is_empty() => Some(prefix.to_string()),
        _ if analysis.preset == Preset::Flatiron && template.needs_gpu() => {
            Some(FLATIRON_GPU_PREFIX.to_string())
        }
        _ => None,
    }
}

pub struct Provisioner<'a> {
    config: &'a NodeConfig,
    service: &'a dyn JobService,
    store: WorkspaceStore,
}

impl<'a> Provisioner<'a> {
    pub fn new(config: &'a NodeConfig, service: &'a dyn JobService) -> Self {
        Self {
            config,
            service,
            store: WorkspaceStore::new(config.workspace_root.clone()),
        }
    }

    pub async fn prepare(&self, job: &JobDescriptor) -> Result<PreparedJob, ProvisionError> {
        let (kind, workspace) = match &job.tool_run {
            Some(run) => {
                let template = AnalysisTemplate::from_name(&run.tool)
                    .ok_or_else(|| ProvisionError::UnsupportedTool(run.tool.clone()))?;
                let workspace = self.store.create(&job.job_id)?;
                self.prepare_tool(job, run, template, &workspace).await?;
                (JobKind::Tool(template), workspace)
            }
            None => self.prepare_script(job).await?,
        };

        let method = effective_method(self.config.sandbox, kind);
        let absolute = workspace.canonicalize_utf8()?;
        let limits = ResourceLimits::resolve(job.required_resources.as_ref(), self.config);
        let command = command_line(method, kind, &absolute, &self.config.container_image, limits)
            .ok_or_else(|| ProvisionError::UnsupportedSandbox {
                method,
                script: job.runnable_name().to_string(),
            })?;

        Ok(PreparedJob {
            kind,
            workspace,
            command,
            timeout: self.config.job_timeout,
        })
    }

    async fn prepare_script(
        &self,
        job: &JobDescriptor,
    ) -> Result<(JobKind, Utf8PathBuf), ProvisionError> {
        let script_name = validate_file_name(&job.script_file_name)?;
        let script_type = ScriptType::from_file_name(script_name)
            .ok_or_else(|| ProvisionError::UnsupportedScript(script_name.to_string()))?;

        let workspace = self.store.create(&job.job_id)?;
        let script = self.service.file_content(job, script_name).await?;
        tokio::fs::write(workspace.join(script_name), &script).await?;
        let project_files = self.service.project_files(job).await?;

        let kind = match script_type {
            ScriptType::Python => {
                for name in referenced_files(&script, script_name, &project_files) {
                    self.fetch(job, name, &workspace).await?;
                }
                let run_sh = plain_run_script(&self.config.interpreter, script_name);
                tokio::fs::write(workspace.join(RUN_SCRIPT_NAME), run_sh).await?;
                JobKind::PlainScript
            }
            ScriptType::Nba => {
                let template = self
                    .prepare_analysis(job, script_name, &script, &project_files, &workspace)
                    .await?;
                JobKind::Analysis(template)
            }
        };
        Ok((kind, workspace))
    }

    async fn fetch(
        &self,
        job: &JobDescriptor,
        file_name: &str,
        workspace: &Utf8Path,
    ) -> Result<(), ProvisionError> {
        let name = validate_file_name(file_name)?;
        let content = self.service.file_content(job, name).await?;
        tokio::fs::write(workspace.join(name), content).await?;
        Ok(())
    }

    async fn prepare_analysis(
        &self,
        job: &JobDescriptor,
        manifest_name: &str,
        manifest_text: &str,
        project_files: &[String],
        workspace: &Utf8Path,
    ) -> Result<AnalysisTemplate, ProvisionError> {
        let manifest = AnalysisManifest::parse(manifest_text)?;
        let nba_type = manifest.nba_type_text();
        let template = AnalysisTemplate::from_name(&nba_type)
            .ok_or(ProvisionError::UnexpectedNbaType(nba_type))?;
        let prefix = run_prefix(&self.config.analysis, template);

        let recording = manifest
            .recording_nwb_file()
            .ok_or(ProvisionError::MissingRecordingFile)?;
        if !project_files.iter().any(|f| *f == recording) {
            return Err(ProvisionError::RecordingNotFound(recording));
        }
        self.fetch(job, &recording, workspace).await?;
        if manifest.recording_electrical_series_path().is_none() {
            return Err(ProvisionError::MissingElectricalSeriesPath);
        }

        let scripts_dir = self.scripts_dir()?;
        install_driver(scripts_dir, template, workspace).await?;

        let run_sh = analysis_run_script(&self.config.interpreter, manifest_name, prefix.as_deref());
        tokio::fs::write(workspace.join(RUN_SCRIPT_NAME), run_sh).await?;
        Ok(template)
    }

    async fn prepare_tool(
        &self,
        job: &JobDescriptor,
        run: &ToolRun,
        template: AnalysisTemplate,
        workspace: &Utf8Path,
    ) -> Result<(), ProvisionError> {
        let prefix = run_prefix(&self.config.analysis, template);
        let scripts_dir = self.scripts_dir()?;
        let recording = run
            .input_file_name
            .as_deref()
            .ok_or(ProvisionError::MissingInputFile)?;
        let project_files = self.service.project_files(job).await?;
        if !project_files.iter().any(|f| f == recording) {
            return Err(ProvisionError::RecordingNotFound(recording.to_string()));
        }
        let url = self.service.file_url(job, recording).await?;
        install_driver(scripts_dir, template, workspace).await?;

        let run_sh = tool_run_script(&self.config.interpreter, &url, prefix.as_deref());
        tokio::fs::write(workspace.join(RUN_SCRIPT_NAME), run_sh).await?;
        Ok(())
    }

    fn scripts_dir(&self) -> Result<&Utf8Path, ProvisionError> {
        self.config
            .analysis
            .scripts_dir
            .as_deref()
            .ok_or(ProvisionError::ScriptsDirNotConfigured)
    }
}

/// Copy the template's driver in as `run.py`, with the shared helpers.
async fn install_driver(
    scripts_dir: &Utf8Path,
    template: AnalysisTemplate,
    workspace: &Utf8Path,
) -> Result<(), ProvisionError> {
    let driver = scripts_dir.join(template.driver_file_name());
    let driver_text = read_local(&driver).await?;
    tokio::fs::write(workspace.join(ANALYSIS_DRIVER_NAME), driver_text).await?;
    copy_helpers(&scripts_dir.join(HELPERS_DIR), &workspace.join(HELPERS_DIR)).await
}

async fn read_local(path: &Utf8Path) -> Result<String, ProvisionError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ProvisionError::ReadLocal {
            path: path.to_owned(),
            source,
        })
}

/// Copy every `.py` file from `from` into `to`; a missing `from` copies nothing.
async fn copy_helpers(from: &Utf8Path, to: &Utf8Path) -> Result<(), ProvisionError> {
    if !from.is_dir() {
        return Ok(());
    }
    tokio::fs::create_dir_all(to).await?;
    let mut entries = tokio::fs::read_dir(from).await?;
    while let Some(entry) = entries.next_entry().await? {
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if !name.ends_with(".py") || !entry.file_type().await?.is_file() {
            continue;
        }
        let text = read_local(&from.join(&name)).await?;
        tokio::fs::write(to.join(&name), text).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use spindle_core::{NodeIdentity, RequiredResources};
    use spindle_remote::RemoteError;
    use spindle_remote::MemoryJobService;
    use std::fs;
    use tempfile::TempDir;

    fn config(temp: &TempDir) -> NodeConfig {
        let dir = Utf8Path::from_path(temp.path()).unwrap();
        NodeConfig::new(
            NodeIdentity {
                compute_resource_id: "cr".to_string(),
                compute_resource_private_key: "k".to_string(),
                node_id: "n".to_string(),
                node_name: "h".to_string(),
            },
            dir,
        )
    }

    /// Analysis scripts dir with both drivers and one helper.
    fn scripts_dir(temp: &TempDir) -> Utf8PathBuf {
        let dir = Utf8Path::from_path(temp.path()).unwrap().join("analysis_scripts");
        fs::create_dir_all(dir.join("helpers")).unwrap();
        fs::write(dir.join("analysis_mountainsort5.py"), "# ms5 driver").unwrap();
        fs::write(dir.join("analysis_kilosort3.py"), "# ks3 driver").unwrap();
        fs::write(dir.join("helpers/nwb.py"), "# helper").unwrap();
        fs::write(dir.join("helpers/README.md"), "not copied").unwrap();
        dir
    }

    fn nba_service(manifest: &str) -> MemoryJobService {
        MemoryJobService::new()
            .with_file("sort.nba", manifest)
            .with_file("rec.nwb", "recording-bytes")
    }

    const FULL_MANIFEST: &str =
        "nba_type: kilosort3\nrecording_nwb_file: rec.nwb\nrecording_electrical_series_path: /acquisition/es\n";

    #[tokio::test]
    async fn test_plain_script_with_dependencies() {
        let temp = TempDir::new().unwrap();
        let cfg = config(&temp);
        let service = MemoryJobService::new()
            .with_file("main.py", "import helpers\nopen('data.csv')\n")
            .with_file("helpers.py", "X = 1")
            .with_file("data.csv", "a,b")
            .with_file("unrelated.txt", "nope");
        let job = JobDescriptor::new("job1", "w", "p", "main.py");

        let prepared = Provisioner::new(&cfg, &service).prepare(&job).await.unwrap();
        assert_eq!(prepared.kind, JobKind::PlainScript);
        assert_eq!(prepared.command.to_string(), "bash run.sh");
        assert_eq!(prepared.timeout, Duration::from_secs(3 * 60 * 60));

        let ws = &prepared.workspace;
        assert_eq!(ws, &cfg.workspace_root.join("job1"));
        assert_eq!(fs::read_to_string(ws.join("helpers.py")).unwrap(), "X = 1");
        assert!(ws.join("data.csv").exists());
        assert!(!ws.join("unrelated.txt").exists());
        let run_sh = fs::read_to_string(ws.join("run.sh")).unwrap();
        assert!(run_sh.ends_with("python3 main.py\n"));
    }

    #[tokio::test]
    async fn test_docker_uses_absolute_workspace_and_limits() {
        let temp = TempDir::new().unwrap();
        let cfg = config(&temp).with_sandbox(SandboxMethod::Docker);
        let service = MemoryJobService::new().with_file("main.py", "print(1)");
        let job = JobDescriptor::new("job1", "w", "p", "main.py").with_resources(RequiredResources {
            num_cpus: Some(3),
            ram_gb: Some(4.5),
            timeout_sec: Some(60),
        });

        let prepared = Provisioner::new(&cfg, &service).prepare(&job).await.unwrap();
        let abs = prepared.workspace.canonicalize_utf8().unwrap();
        assert_eq!(prepared.command.program, "docker");
        assert!(prepared.command.args.contains(&format!("{}:/working", abs)));
        assert!(prepared.command.args.contains(&"3".to_string()));
        assert!(prepared.command.args.contains(&"4.5g".to_string()));
        assert_eq!(prepared.timeout, cfg.job_timeout);
    }

    #[tokio::test]
    async fn test_declared_timeout_does_not_override_node_limit() {
        let temp = TempDir::new().unwrap();
        let cfg = config(&temp);
        let service = MemoryJobService::new().with_file("main.py", "print(1)");
        let job = JobDescriptor::new("job1", "w", "p", "main.py").with_resources(RequiredResources {
            num_cpus: None,
            ram_gb: None,
            timeout_sec: Some(864000),
        });

        let prepared = Provisioner::new(&cfg, &service).prepare(&job).await.unwrap();
        assert_eq!(prepared.timeout, Duration::from_secs(10800));
    }

    #[tokio::test]
    async fn test_copies_names_with_spaces() {
        let temp = TempDir::new().unwrap();
        let cfg = config(&temp);
        let service = MemoryJobService::new()
            .with_file("main.py", "df = open('my data.csv').read()\n")
            .with_file("my data.csv", "x,y");
        let job = JobDescriptor::new("job1", "w", "p", "main.py");

        let prepared = Provisioner::new(&cfg, &service).prepare(&job).await.unwrap();
        assert_eq!(
            fs::read_to_string(prepared.workspace.join("my data.csv")).unwrap(),
            "x,y"
        );
    }

    #[tokio::test]
    async fn test_unsupported_script_suffix() {
        let temp = TempDir::new().unwrap();
        let cfg = config(&temp);
        let service = MemoryJobService::new().with_file("run.R", "1");
        let job = JobDescriptor::new("job1", "w", "p", "run.R");
        let err = Provisioner::new(&cfg, &service).prepare(&job).await.unwrap_err();
        assert_eq!(err.to_string(), "Unsupported script file name: run.R");
        assert!(!cfg.workspace_root.join("job1").exists());
    }

    #[tokio::test]
    async fn test_rejects_path_like_job_id() {
        let temp = TempDir::new().unwrap();
        let cfg = config(&temp);
        let service = MemoryJobService::new().with_file("main.py", "1");
        let job = JobDescriptor::new("../escape", "w", "p", "main.py");
        let err = Provisioner::new(&cfg, &service).prepare(&job).await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid file name: ../escape");
    }

    #[tokio::test]
    async fn test_unexpected_nba_type() {
        let temp = TempDir::new().unwrap();
        let cfg = config(&temp);
        let service = nba_service("nba_type: kilosort2\nrecording_nwb_file: rec.nwb\n");
        let job = JobDescriptor::new("job1", "w", "p", "sort.nba");
        let err = Provisioner::new(&cfg, &service).prepare(&job).await.unwrap_err();
        assert_eq!(err.to_string(), "Unexpected nba type: kilosort2");
        assert!(!cfg.workspace_root.join("job1/run.sh").exists());
    }

    #[tokio::test]
    async fn test_missing_recording_fields() {
        let temp = TempDir::new().unwrap();
        let cfg = config(&temp);
        let job = JobDescriptor::new("job1", "w", "p", "sort.nba");

        let service = nba_service("nba_type: mountainsort5\n");
        let err = Provisioner::new(&cfg, &service).prepare(&job).await.unwrap_err();
        assert_eq!(err.to_string(), "Missing recording_nwb_file");

        let service = nba_service("nba_type: mountainsort5\nrecording_nwb_file: other.nwb\n");
        let err = Provisioner::new(&cfg, &service).prepare(&job).await.unwrap_err();
        assert_eq!(err.to_string(), "Unable to find recording_nwb_file: other.nwb");

        let service = nba_service("nba_type: mountainsort5\nrecording_nwb_file: rec.nwb\n");
        let err = Provisioner::new(&cfg, &service).prepare(&job).await.unwrap_err();
        assert_eq!(err.to_string(), "Missing recording_electrical_series_path");
    }

    #[tokio::test]
    async fn test_analysis_needs_scripts_dir() {
        let temp = TempDir::new().unwrap();
        let cfg = config(&temp);
        let service = nba_service(FULL_MANIFEST);
        let job = JobDescriptor::new("job1", "w", "p", "sort.nba");
        let err = Provisioner::new(&cfg, &service).prepare(&job).await.unwrap_err();
        assert_eq!(err.to_string(), "Analysis scripts directory is not configured.");
    }

    #[tokio::test]
    async fn test_analysis_workspace() {
        let temp = TempDir::new().unwrap();
        let mut cfg = config(&temp).with_sandbox(SandboxMethod::Singularity);
        cfg.analysis.scripts_dir = Some(scripts_dir(&temp));
        let service = nba_service(FULL_MANIFEST);
        let job = JobDescriptor::new("job1", "w", "p", "sort.nba");

        let prepared = Provisioner::new(&cfg, &service).prepare(&job).await.unwrap();
        assert_eq!(prepared.kind, JobKind::Analysis(AnalysisTemplate::Kilosort3));
        // Analysis jobs ignore the configured container method
        assert_eq!(prepared.command.to_string(), "bash run.sh");

        let ws = &prepared.workspace;
        assert_eq!(fs::read_to_string(ws.join("run.py")).unwrap(), "# ks3 driver");
        assert_eq!(fs::read_to_string(ws.join("rec.nwb")).unwrap(), "recording-bytes");
        assert!(ws.join("helpers/nwb.py").exists());
        assert!(!ws.join("helpers/README.md").exists());
        let run_sh = fs::read_to_string(ws.join("run.sh")).unwrap();
        assert!(run_sh.ends_with(&format!(
            "export NBA_FILE_NAME=\"sort.nba\"\n{} python3 run.py\n",
            FLATIRON_GPU_PREFIX
        )));
    }

    fn tool_job(tool: &str, input: Option<&str>) -> JobDescriptor {
        JobDescriptor::tool(
            "job1",
            "w",
            "p",
            ToolRun {
                tool: tool.to_string(),
                input_file_name: input.map(str::to_string),
                output_file_name: Some("sorting.nwb".to_string()),
            },
        )
    }

    #[tokio::test]
    async fn test_tool_workspace() {
        let temp = TempDir::new().unwrap();
        let mut cfg = config(&temp).with_sandbox(SandboxMethod::Docker);
        cfg.analysis.scripts_dir = Some(scripts_dir(&temp));
        let service = MemoryJobService::new().with_url_file("rec.nwb", "https://dandi/rec.nwb");
        let job = tool_job("kilosort3", Some("rec.nwb"));

        let prepared = Provisioner::new(&cfg, &service).prepare(&job).await.unwrap();
        assert_eq!(prepared.kind, JobKind::Tool(AnalysisTemplate::Kilosort3));
        assert_eq!(prepared.command.to_string(), "bash run.sh");
        assert_eq!(prepared.timeout, cfg.job_timeout);

        let ws = &prepared.workspace;
        assert_eq!(fs::read_to_string(ws.join("run.py")).unwrap(), "# ks3 driver");
        assert!(ws.join("helpers/nwb.py").exists());
        // The recording stays remote
        assert!(!ws.join("rec.nwb").exists());
        let run_sh = fs::read_to_string(ws.join("run.sh")).unwrap();
        assert!(run_sh.ends_with(&format!(
            "export INPUT_NWB_URL=\"https://dandi/rec.nwb\"\n{} python3 run.py\n",
            FLATIRON_GPU_PREFIX
        )));
    }

    #[tokio::test]
    async fn test_tool_without_gpu_prefix() {
        let temp = TempDir::new().unwrap();
        let mut cfg = config(&temp);
        cfg.analysis.scripts_dir = Some(scripts_dir(&temp));
        let service = MemoryJobService::new().with_url_file("rec.nwb", "https://dandi/rec.nwb");
        let job = tool_job("mountainsort5", Some("rec.nwb"));

        let prepared = Provisioner::new(&cfg, &service).prepare(&job).await.unwrap();
        let ws = &prepared.workspace;
        assert_eq!(fs::read_to_string(ws.join("run.py")).unwrap(), "# ms5 driver");
        let run_sh = fs::read_to_string(ws.join("run.sh")).unwrap();
        assert!(run_sh.ends_with("trap clean_up EXIT\nexport INPUT_NWB_URL=\"https://dandi/rec.nwb\"\npython3 run.py\n"));
    }

    #[tokio::test]
    async fn test_tool_input_errors() {
        let temp = TempDir::new().unwrap();
        let mut cfg = config(&temp);
        let service = MemoryJobService::new()
            .with_url_file("rec.nwb", "https://dandi/rec.nwb")
            .with_file("local.nwb", "bytes");

        let err = Provisioner::new(&cfg, &service)
            .prepare(&tool_job("mountainsort5", Some("rec.nwb")))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Analysis scripts directory is not configured.");

        cfg.analysis.scripts_dir = Some(scripts_dir(&temp));
        let provisioner = Provisioner::new(&cfg, &service);
        let err = provisioner
            .prepare(&tool_job("mountainsort5", None))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Missing input file");

        let err = provisioner
            .prepare(&tool_job("mountainsort5", Some("gone.nwb")))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Unable to find recording_nwb_file: gone.nwb");

        let err = provisioner
            .prepare(&tool_job("mountainsort5", Some("local.nwb")))
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Remote(RemoteError::NotAUrl(_))));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let temp = TempDir::new().unwrap();
        let cfg = config(&temp);
        let service = MemoryJobService::new();
        let err = Provisioner::new(&cfg, &service)
            .prepare(&tool_job("spikesort", Some("rec.nwb")))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Unexpected process type: spikesort");
        assert!(!cfg.workspace_root.join("job1").exists());
    }

    #[test]
    fn test_run_prefix() {
        let mut analysis = AnalysisConfig::default();
        assert_eq!(
            run_prefix(&analysis, AnalysisTemplate::Kilosort3).as_deref(),
            Some(FLATIRON_GPU_PREFIX)
        );
        assert_eq!(run_prefix(&analysis, AnalysisTemplate::Mountainsort5), None);

        analysis.preset = Preset::Generic;
        assert_eq!(run_prefix(&analysis, AnalysisTemplate::Kilosort3), None);

        analysis.run_prefix = Some("sbatch --wrap".to_string());
        assert_eq!(
            run_prefix(&analysis, AnalysisTemplate::Mountainsort5).as_deref(),
            Some("sbatch --wrap")
        );
    }
}
