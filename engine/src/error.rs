//! Error types for the relocation engine.
//!
//! Three layers of failure exist:
//! - `ValidationError`: a submission was rejected before any job was created.
//! - `EngineError`: a filesystem operation failed. Inside a job most of these
//!   are item-level and end up as an `error` outcome in the detail log; the
//!   fatal variants (`SourceRootVanished`, `DestinationUnavailable`) stop the job.
//! - `RegistryError`: a registry call could not be honoured.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::model::{JobId, JobStatus};

/// Errors raised by filesystem work inside a job.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The declared source root disappeared while the job was running
    #[error("source root vanished: {}", path.display())]
    SourceRootVanished { path: PathBuf },

    /// The declared destination root cannot be reached or created
    #[error("destination root unavailable: {}: {source}", path.display())]
    DestinationUnavailable { path: PathBuf, source: io::Error },

    /// Failed to read from a file
    #[error("failed to read {}: {source}", path.display())]
    ReadError { path: PathBuf, source: io::Error },

    /// Failed to write to a file
    #[error("failed to write {}: {source}", path.display())]
    WriteError { path: PathBuf, source: io::Error },

    /// Failed to rename a file into place
    #[error("failed to rename {} to {}: {source}", from.display(), to.display())]
    RenameFailed {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },

    /// Failed to delete a file
    #[error("failed to delete {}: {source}", path.display())]
    DeleteFailed { path: PathBuf, source: io::Error },

    /// Failed to create a directory
    #[error("failed to create directory {}: {source}", path.display())]
    DirectoryCreationFailed { path: PathBuf, source: io::Error },

    /// Failed to enumerate a directory while building a plan
    #[error("failed to enumerate directory {}: {source}", path.display())]
    EnumerationFailed { path: PathBuf, source: io::Error },

    /// The copy does not hash to the same digest as its source
    #[error("integrity verification failed: {} (source {expected}, copy {actual})", path.display())]
    IntegrityMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },
}

impl EngineError {
    /// Extract the OS error code from this error, if available.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::DestinationUnavailable { source, .. }
            | Self::ReadError { source, .. }
            | Self::WriteError { source, .. }
            | Self::RenameFailed { source, .. }
            | Self::DeleteFailed { source, .. }
            | Self::DirectoryCreationFailed { source, .. }
            | Self::EnumerationFailed { source, .. } => source.raw_os_error(),
            Self::SourceRootVanished { .. } | Self::IntegrityMismatch { .. } => None,
        }
    }
}

/// Reasons a plan submission is rejected without creating a job.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("plan contains no items")]
    EmptyPlan,

    #[error("source root not found: {}", path.display())]
    SourceRootNotFound { path: PathBuf },

    #[error("source root is not a directory: {}", path.display())]
    SourceRootNotDirectory { path: PathBuf },
}

/// Errors returned by `JobRegistry` calls.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error("job {id} already finished ({status})")]
    AlreadyTerminal { id: JobId, status: JobStatus },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Errors raised while loading an `EngineConfig`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}
