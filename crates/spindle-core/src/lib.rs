//! Core types for spindle compute nodes.
//!
//! Job descriptors as supplied by the coordination service, the node
//! configuration, and the on-disk store of per-job workspaces.

pub mod config;
pub mod names;
pub mod types;
pub mod workspace;

pub use config::{AnalysisConfig, ConfigError, NodeConfig, Preset, SandboxMethod};
pub use names::{validate_file_name, NameError};
pub use types::{JobDescriptor, JobStatus, NodeIdentity, RequiredResources, ToolRun};
pub use workspace::{ReclaimReport, StoreError, WorkspaceStore};
