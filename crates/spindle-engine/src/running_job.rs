//! The live execution record for one admitted job.
//!
//! Status moves `pending -> running -> completed | failed` exactly once.
//! `initiate` confirms the transition to `running` with the service and
//! launches the pipeline on a background task without waiting for it.
//! Every pipeline error ends up as a `failed` status with the error
//! message reported; nothing escapes the task.

use crate::error::JobError;
use async_trait::async_trait;
use spindle_core::{JobDescriptor, JobStatus, NodeConfig};
use spindle_exec::{ConsoleSink, ProcessSlot, Provisioner, Supervisor, collect_artifacts};
use spindle_remote::{JobProperty, JobService, RemoteError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

type Callback = Box<dyn FnOnce(&RunningJob) + Send>;

struct State {
    status: JobStatus,
    callbacks: Vec<Callback>,
    /// Set once callbacks have been handed out
    settled: bool,
    console: String,
}

struct Inner {
    job: JobDescriptor,
    config: Arc<NodeConfig>,
    service: Arc<dyn JobService>,
    state: Mutex<State>,
    process: ProcessSlot,
}

/// Cheap to clone; clones share the same job.
#[derive(Clone)]
pub struct RunningJob {
    inner: Arc<Inner>,
}

/// A pipeline error plus whether console output was already pushed.
struct Failure {
    error: JobError,
    console_flushed: bool,
}

impl Failure {
    fn before_run(error: impl Into<JobError>) -> Self {
        Self {
            error: error.into(),
            console_flushed: false,
        }
    }

    fn after_run(error: impl Into<JobError>) -> Self {
        Self {
            error: error.into(),
            console_flushed: true,
        }
    }
}

/// Pushes console output as the job's `consoleOutput` property.
struct PropertySink<'a> {
    service: &'a dyn JobService,
    job: &'a JobDescriptor,
}

#[async_trait]
impl ConsoleSink for PropertySink<'_> {
    async fn publish(&self, output: &str) -> Result<(), RemoteError> {
        self.service
            .set_job_property(self.job, JobProperty::ConsoleOutput(output.to_string()))
            .await?;
        Ok(())
    }
}

impl RunningJob {
    pub fn new(job: JobDescriptor, config: Arc<NodeConfig>, service: Arc<dyn JobService>) -> Self {
        Self {
            inner: Arc::new(Inner {
                job,
                config,
                service,
                state: Mutex::new(State {
                    status: JobStatus::Pending,
                    callbacks: Vec::new(),
                    settled: false,
                    console: String::new(),
                }),
                process: ProcessSlot::default(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn job(&self) -> &JobDescriptor {
        &self.inner.job
    }

    pub fn status(&self) -> JobStatus {
        self.state().status
    }

    /// Console output captured so far (complete once the process ended).
    pub fn console_output(&self) -> String {
        self.state().console.clone()
    }

    /// Whether a subprocess is currently running for this job.
    pub fn has_process(&self) -> bool {
        self.inner.process.is_live()
    }

    /// Ask the service to mark the job running and start the pipeline.
    ///
    /// Returns false, leaving the job pending, if the service refuses or
    /// cannot be reached. The caller must then discard the job.
    pub async fn initiate(&self) -> bool {
        let job = &self.inner.job;
        if self.status() != JobStatus::Pending {
            tracing::warn!(job_id = %job.job_id, "Job already initiated");
            return false;
        }
        tracing::info!(job_id = %job.job_id, "Initiating job: {}", job.runnable_name());

        match self
            .inner
            .service
            .set_job_property(job, JobProperty::Status(JobStatus::Running))
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(job_id = %job.job_id, "Unable to set job status to running");
                return false;
            }
            Err(e) => {
                tracing::warn!(job_id = %job.job_id, "Unable to set job status to running: {}", e);
                return false;
            }
        }

        self.state().status = JobStatus::Running;
        let this = self.clone();
        tokio::spawn(async move {
            this.run().await;
        });
        true
    }

    /// Kill the subprocess if there is one. Never fails.
    pub fn stop(&self) {
        if self.inner.process.kill() {
            tracing::info!(job_id = %self.inner.job.job_id, "Stopping job");
        } else {
            tracing::debug!(job_id = %self.inner.job.job_id, "No process to stop");
        }
    }

    /// Register `callback` to run once the job has finished and reported.
    ///
    /// Runs immediately if that has already happened.
    pub fn on_completed_or_failed<F>(&self, callback: F)
    where
        F: FnOnce(&RunningJob) + Send + 'static,
    {
        let mut state = self.state();
        if state.settled {
            drop(state);
            callback(self);
        } else {
            state.callbacks.push(Box::new(callback));
        }
    }

    async fn run(&self) {
        let started = Instant::now();
        match self.execute().await {
            Ok(()) => {
                self.state().status = JobStatus::Completed;
                tracing::info!(job_id = %self.inner.job.job_id, "Job completed");
            }
            Err(failure) => self.fail(failure).await,
        }
        self.push_best_effort(JobProperty::ElapsedTimeSec(started.elapsed().as_secs_f64()))
            .await;
        self.settle();
    }

    async fn execute(&self) -> Result<(), Failure> {
        let job = &self.inner.job;
        let config = self.inner.config.as_ref();
        let service = self.inner.service.as_ref();

        let prepared = Provisioner::new(config, service)
            .prepare(job)
            .await
            .map_err(Failure::before_run)?;

        let supervisor = Supervisor::new(prepared.timeout, config.console_flush_interval);
        let sink = PropertySink { service, job };
        let run = supervisor
            .run(&prepared.command, &prepared.workspace, &sink, &self.inner.process)
            .await;
        self.state().console = run.console;
        run.result.map_err(Failure::after_run)?;

        collect_artifacts(prepared.kind, &prepared.workspace, job, service, config.max_output_files)
            .await
            .map_err(Failure::after_run)?;

        service
            .set_job_property(job, JobProperty::Status(JobStatus::Completed))
            .await
            .map_err(Failure::after_run)?;
        Ok(())
    }

    async fn fail(&self, failure: Failure) {
        let message = failure.error.to_string();
        tracing::info!(job_id = %self.inner.job.job_id, "Job failed: {}", message);

        if !failure.console_flushed {
            let console = self.console_output();
            self.push_best_effort(JobProperty::ConsoleOutput(console)).await;
        }
        self.push_best_effort(JobProperty::Error(message)).await;
        self.push_best_effort(JobProperty::Status(JobStatus::Failed))
            .await;
        self.state().status = JobStatus::Failed;
    }

    async fn push_best_effort(&self, property: JobProperty) {
        let name = property.name();
        if let Err(e) = self
            .inner
            .service
            .set_job_property(&self.inner.job, property)
            .await
        {
            tracing::warn!(job_id = %self.inner.job.job_id, "Unable to set job property {}: {}", name, e);
        }
    }

    /// Hand every registered callback its single invocation.
    fn settle(&self) {
        let callbacks = {
            let mut state = self.state();
            state.settled = true;
            std::mem::take(&mut state.callbacks)
        };
        for callback in callbacks {
            callback(self);
        }
    }
}

impl std::fmt::Debug for RunningJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningJob")
            .field("job_id", &self.inner.job.job_id)
            .field("status", &self.status())
            .finish()
    }
}
