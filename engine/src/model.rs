//! Core data model for relocation jobs.
//!
//! This module defines the main data structures:
//! - Plan / FileMoveItem: the ordered list of moves a job will execute
//! - TransferOutcome: the immutable result of executing one item
//! - JobSnapshot: a point-in-time view of a job, shared by polling and streaming
//! - MoveKind, OutcomeKind, JobStatus, TransferOptions: enums and flags controlling behavior

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::checksums::ChecksumValue;

/// Unique identifier of a job.
pub type JobId = Uuid;

/// The policy that produced a planned move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveKind {
    Photo,
    Video,
    Screenshot,
    TypeBucket,
    CacheCleanup,
    #[default]
    Other,
}

impl fmt::Display for MoveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MoveKind::Photo => write!(f, "photo"),
            MoveKind::Video => write!(f, "video"),
            MoveKind::Screenshot => write!(f, "screenshot"),
            MoveKind::TypeBucket => write!(f, "type bucket"),
            MoveKind::CacheCleanup => write!(f, "cache cleanup"),
            MoveKind::Other => write!(f, "move"),
        }
    }
}

/// One planned move. Immutable once the plan is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMoveItem {
    /// Full source path
    pub source: PathBuf,

    /// Desired destination path (collisions are resolved at execution time)
    pub destination: PathBuf,

    /// Policy that planned this move
    #[serde(default)]
    pub kind: MoveKind,

    /// File size in bytes, used to weight progress
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_hint: Option<u64>,

    /// Why the planner chose this destination
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl FileMoveItem {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>, kind: MoveKind) -> Self {
        FileMoveItem {
            source: source.into(),
            destination: destination.into(),
            kind,
            size_hint: None,
            reason: None,
        }
    }

    pub fn with_size_hint(mut self, bytes: u64) -> Self {
        self.size_hint = Some(bytes);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// The reason recorded in outcomes: the planner's, or the kind label.
    pub fn describe(&self) -> String {
        self.reason.clone().unwrap_or_else(|| self.kind.to_string())
    }
}

/// An ordered list of moves plus the roots they operate within.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Directory the items were collected from; must exist at submission
    pub source_root: PathBuf,

    /// Directory the items are moved into, if the planner used a single root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_root: Option<PathBuf>,

    pub items: Vec<FileMoveItem>,
}

impl Plan {
    pub fn new(source_root: impl Into<PathBuf>, items: Vec<FileMoveItem>) -> Self {
        Plan {
            source_root: source_root.into(),
            destination_root: None,
            items,
        }
    }

    pub fn with_destination_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.destination_root = Some(root.into());
        self
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Sum of size hints, only if every item carries one and the sum fits.
    pub fn total_size_hint(&self) -> Option<u64> {
        self.items
            .iter()
            .try_fold(0u64, |total, item| total.checked_add(item.size_hint?))
    }
}

/// Execution flags for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOptions {
    /// Simulate: report what would happen, never touch the filesystem
    pub dry_run: bool,
    /// Copy, verify digests, then delete instead of a plain rename
    pub safe_mode: bool,
}

impl Default for TransferOptions {
    fn default() -> Self {
        TransferOptions {
            dry_run: false,
            safe_mode: true,
        }
    }
}

/// Classification of an executed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Moved,
    Skipped,
    DryRun,
    Error,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeKind::Moved => write!(f, "moved"),
            OutcomeKind::Skipped => write!(f, "skipped"),
            OutcomeKind::DryRun => write!(f, "dry_run"),
            OutcomeKind::Error => write!(f, "error"),
        }
    }
}

/// The result of executing one `FileMoveItem`. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOutcome {
    pub kind: OutcomeKind,

    pub source: PathBuf,

    /// Resolved destination, once one was determined
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<PathBuf>,

    pub reason: String,

    /// Verified digest, present for safe-mode moves
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<ChecksumValue>,
}

impl TransferOutcome {
    pub fn moved(source: &Path, destination: PathBuf, reason: String, digest: Option<ChecksumValue>) -> Self {
        TransferOutcome {
            kind: OutcomeKind::Moved,
            source: source.to_path_buf(),
            destination: Some(destination),
            reason,
            digest,
        }
    }

    pub fn dry_run(source: &Path, destination: PathBuf, reason: String) -> Self {
        TransferOutcome {
            kind: OutcomeKind::DryRun,
            source: source.to_path_buf(),
            destination: Some(destination),
            reason,
            digest: None,
        }
    }

    pub fn skipped(source: &Path, reason: impl Into<String>) -> Self {
        TransferOutcome {
            kind: OutcomeKind::Skipped,
            source: source.to_path_buf(),
            destination: None,
            reason: reason.into(),
            digest: None,
        }
    }

    pub fn error(source: &Path, destination: Option<PathBuf>, reason: impl Into<String>) -> Self {
        TransferOutcome {
            kind: OutcomeKind::Error,
            source: source.to_path_buf(),
            destination,
            reason: reason.into(),
            digest: None,
        }
    }
}

/// The lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, worker not started yet
    Queued,
    /// Worker is iterating the plan
    Running,
    /// Plan exhausted (individual items may have failed)
    Completed,
    /// Cancellation observed at an item boundary
    Aborted,
    /// A whole-job precondition broke mid-run
    Failed,
}

impl JobStatus {
    /// Returns true if this state is terminal (no further changes expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Aborted | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Aborted => write!(f, "aborted"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Aggregate outcome counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultSummary {
    pub moved: usize,
    pub errors: usize,
    pub skipped: usize,
    pub dry_run: usize,
}

impl ResultSummary {
    pub fn record(&mut self, kind: OutcomeKind) {
        match kind {
            OutcomeKind::Moved => self.moved += 1,
            OutcomeKind::Error => self.errors += 1,
            OutcomeKind::Skipped => self.skipped += 1,
            OutcomeKind::DryRun => self.dry_run += 1,
        }
    }
}

/// An immutable point-in-time view of a job.
///
/// `get` and `subscribe` hand out the same type so a polling caller observes
/// exactly what a streaming caller does. While the job runs, `last_outcome`
/// carries the outcome that produced the update; the full ordered `details`
/// log is attached once the job is terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub job_type: String,
    pub status: JobStatus,
    pub dry_run: bool,
    pub safe_mode: bool,

    /// Items processed so far
    pub processed: usize,
    /// Items in the plan
    pub total: usize,
    /// 0-100, non-decreasing until terminal
    pub percent: u8,
    pub current_item: Option<PathBuf>,
    pub message: String,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,

    pub summary: ResultSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_outcome: Option<TransferOutcome>,
    #[serde(default)]
    pub details: Vec<TransferOutcome>,
}

impl JobSnapshot {
    pub(crate) fn queued(id: JobId, job_type: String, total: usize, options: TransferOptions) -> Self {
        JobSnapshot {
            id,
            job_type,
            status: JobStatus::Queued,
            dry_run: options.dry_run,
            safe_mode: options.safe_mode,
            processed: 0,
            total,
            percent: 0,
            current_item: None,
            message: "Initializing...".to_string(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            summary: ResultSummary::default(),
            last_outcome: None,
            details: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
