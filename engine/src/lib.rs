//! # relocate engine - job execution and safe file transfer
//!
//! A headless library that relocates files as cancellable background jobs.
//! Designed as the foundation for multiple front ends (CLI, HTTP service,
//! automation) that hand it a plan of moves and watch the result.
//!
//! ## Overview
//!
//! The engine features:
//! - One worker thread per job, cooperative cancellation between items
//! - Safe moves: copy, compare digests, and only then delete the source
//! - Collision-free destination naming (`IMG_0001_1.jpg`), never overwriting
//! - Dry runs that report every would-be destination without touching disk
//! - Live progress via subscriptions, with an identical polling snapshot
//!
//! ## Basic Usage
//!
//! ```no_run
//! use engine::{EngineConfig, JobRegistry, PlanBuilder, TransferOptions};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = JobRegistry::new(EngineConfig::default());
//!
//! // Build a plan from a directory walk (or deserialize one from JSON)
//! let plan = PlanBuilder::new("/phone/DCIM", "/archive/photos")
//!     .extensions(["jpg", "heic", "mp4"])
//!     .build()?;
//!
//! let id = registry.submit("organize-media", plan, TransferOptions::default())?;
//!
//! for snapshot in registry.subscribe(id)? {
//!     println!("{}% {}", snapshot.percent, snapshot.message);
//! }
//!
//! if let Some(result) = registry.get(id) {
//!     println!("{} moved, {} errors", result.summary.moved, result.summary.errors);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **model**: Core data structures (Plan, FileMoveItem, JobSnapshot, enums)
//! - **error**: Error types and handling
//! - **config**: Engine configuration (TOML)
//! - **checksums**: Streaming digests for copy verification
//! - **fs_ops**: Filesystem abstraction and naming helpers
//! - **transfer**: Per-file safe transfer engine
//! - **job**: Job worker loop and cancellation
//! - **progress**: Snapshot broadcasting to subscribers
//! - **registry**: Job lifecycle (submit, get, list, abort, subscribe)
//! - **plan**: Plan building from a directory walk

pub mod model;
pub mod error;
pub mod config;
pub mod checksums;
pub mod fs_ops;
pub mod transfer;
pub mod job;
pub mod progress;
pub mod registry;
pub mod plan;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export main types and functions
pub use model::{
    FileMoveItem, JobId, JobSnapshot, JobStatus, MoveKind, OutcomeKind, Plan, ResultSummary,
    TransferOptions, TransferOutcome,
};
pub use error::{ConfigError, EngineError, RegistryError, ValidationError};
pub use config::EngineConfig;
pub use checksums::{compute_file_checksum, ChecksumAlgorithm, ChecksumValue};
pub use fs_ops::{FileSystem, LocalFs};
pub use transfer::TransferEngine;
pub use progress::Subscription;
pub use registry::JobRegistry;
pub use plan::{Layout, PlanBuilder};
