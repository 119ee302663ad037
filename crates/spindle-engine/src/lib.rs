//! Job admission and execution engine.
//!
//! [`JobManager`] admits pending jobs under a concurrency cap and owns the
//! set of active [`RunningJob`]s. Each running job drives its own pipeline
//! (provision, supervise, collect, report) on a background task.

pub mod error;
pub mod manager;
pub mod running_job;

pub use error::JobError;
pub use manager::JobManager;
pub use running_job::RunningJob;
