//! Job execution.
//!
//! A job is split in two halves:
//! - `JobHandle`: the part shared with the registry (id, cancellation flag,
//!   progress broadcaster). Any thread may read it or request cancellation.
//! - `JobWorker`: the part owned by the job's worker thread (plan, private
//!   progress state, detail log). Only the worker mutates progress; other
//!   threads observe it through published snapshots.
//!
//! Cancellation is cooperative and checked between items only, so an
//! in-flight safe-mode copy-verify-delete always runs to completion.
//!
//! A panic inside the worker is contained: the job ends `failed` with the
//! panic message, so waiters and subscribers are always released.

use std::any::Any;
use std::collections::HashSet;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::error::EngineError;
use crate::fs_ops::FileSystem;
use crate::model::{
    FileMoveItem, JobId, JobSnapshot, JobStatus, OutcomeKind, Plan, ResultSummary, TransferOptions,
    TransferOutcome,
};
use crate::progress::{ProgressBroadcaster, Subscription};
use crate::transfer::TransferEngine;

/// Shown on a running job between an abort request and the next item boundary.
pub const ABORT_REQUESTED_MESSAGE: &str = "Abort requested...";

/// The registry's view of a job.
pub struct JobHandle {
    id: JobId,
    cancel: AtomicBool,
    broadcaster: ProgressBroadcaster,
}

impl JobHandle {
    pub fn new(initial: JobSnapshot, subscriber_buffer: usize) -> Self {
        JobHandle {
            id: initial.id,
            cancel: AtomicBool::new(false),
            broadcaster: ProgressBroadcaster::new(initial, subscriber_buffer),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    /// Raise the cancellation flag and acknowledge it in the job's message.
    /// Write-once; never waits for the worker.
    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
        self.broadcaster.pin_message(ABORT_REQUESTED_MESSAGE);
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> JobSnapshot {
        self.broadcaster.latest()
    }

    pub fn subscribe(&self) -> Subscription {
        self.broadcaster.subscribe()
    }

    pub fn wait(&self) -> JobSnapshot {
        self.broadcaster.wait_terminal()
    }

    /// Force the job into `failed` from outside the worker.
    ///
    /// Has no effect once the job is terminal.
    pub fn fail(&self, message: String) -> JobSnapshot {
        let mut snapshot = self.snapshot();
        if snapshot.is_terminal() {
            return snapshot;
        }

        snapshot.status = JobStatus::Failed;
        snapshot.message = message;
        snapshot.current_item = None;
        snapshot.last_outcome = None;
        snapshot.finished_at = Some(Utc::now());
        self.broadcaster.publish(snapshot);
        self.snapshot()
    }
}

/// Tracks percent complete, weighted by size hints when every item has one.
struct ProgressMeter {
    total_items: usize,
    total_bytes: Option<u64>,
    done_bytes: u64,
}

impl ProgressMeter {
    fn new(plan: &Plan) -> Self {
        ProgressMeter {
            total_items: plan.len(),
            total_bytes: plan.total_size_hint().filter(|&bytes| bytes > 0),
            done_bytes: 0,
        }
    }

    fn advance(&mut self, item: &FileMoveItem) {
        self.done_bytes = self.done_bytes.saturating_add(item.size_hint.unwrap_or(0));
    }

    fn percent(&self, processed: usize) -> u8 {
        let ratio = match self.total_bytes {
            Some(total) => self.done_bytes as f64 / total as f64,
            None if self.total_items > 0 => processed as f64 / self.total_items as f64,
            None => 1.0,
        };
        (ratio * 100.0).floor().clamp(0.0, 100.0) as u8
    }
}

/// Executes a job's plan on the current thread.
pub struct JobWorker {
    handle: Arc<JobHandle>,
    plan: Plan,
    options: TransferOptions,
    engine: TransferEngine,
    fs: Arc<dyn FileSystem>,
    progress: JobSnapshot,
    details: Vec<TransferOutcome>,
    claimed: HashSet<PathBuf>,
    meter: ProgressMeter,
}

impl JobWorker {
    pub fn new(
        handle: Arc<JobHandle>,
        plan: Plan,
        options: TransferOptions,
        engine: TransferEngine,
        fs: Arc<dyn FileSystem>,
    ) -> Self {
        let progress = handle.snapshot();
        let meter = ProgressMeter::new(&plan);
        JobWorker {
            handle,
            plan,
            options,
            engine,
            fs,
            progress,
            details: Vec::new(),
            claimed: HashSet::new(),
            meter,
        }
    }

    /// Like `run`, but a panic fails the job instead of leaving it running.
    pub fn run_contained(self) -> JobSnapshot {
        let handle = self.handle.clone();
        match panic::catch_unwind(AssertUnwindSafe(|| self.run())) {
            Ok(result) => result,
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                error!(job = %handle.id(), panic = %reason, "job worker panicked");
                handle.fail(format!("worker panicked: {}", reason))
            }
        }
    }

    /// Run the plan to a terminal state and return the final snapshot.
    pub fn run(mut self) -> JobSnapshot {
        let total = self.plan.len();
        info!(
            job = %self.handle.id(),
            job_type = %self.progress.job_type,
            total,
            dry_run = self.options.dry_run,
            safe_mode = self.options.safe_mode,
            "job started"
        );

        self.progress.status = JobStatus::Running;
        self.progress.started_at = Some(Utc::now());
        self.progress.message = format!("Processing {} items", total);
        self.publish();

        let items = std::mem::take(&mut self.plan.items);
        for item in &items {
            if self.handle.is_cancel_requested() {
                let message = format!(
                    "Aborted after processing {} of {} items",
                    self.progress.processed, total
                );
                return self.finish(JobStatus::Aborted, message);
            }

            if let Err(e) = self.check_preconditions() {
                error!(job = %self.handle.id(), error = %e, "job failed");
                return self.finish(JobStatus::Failed, e.to_string());
            }

            self.progress.current_item = Some(item.source.clone());
            self.progress.message = format!("Processing {}", item.source.display());
            self.progress.last_outcome = None;
            self.publish();

            let outcome = self.engine.transfer(item, self.options, &mut self.claimed);
            self.record(item, outcome);
        }

        let message = completion_message(&self.progress.summary, self.options.dry_run);
        self.finish(JobStatus::Completed, message)
    }

    /// Whole-job preconditions, checked before every item.
    fn check_preconditions(&self) -> Result<(), EngineError> {
        if !self.fs.is_dir(&self.plan.source_root) {
            return Err(EngineError::SourceRootVanished {
                path: self.plan.source_root.clone(),
            });
        }

        if self.options.dry_run {
            return Ok(());
        }
        let Some(root) = &self.plan.destination_root else {
            return Ok(());
        };
        if self.fs.is_dir(root) {
            return Ok(());
        }
        if self.fs.exists(root) {
            return Err(EngineError::DestinationUnavailable {
                path: root.clone(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "not a directory"),
            });
        }
        self.fs
            .create_dir_all(root)
            .map_err(|e| EngineError::DestinationUnavailable {
                path: root.clone(),
                source: e,
            })
    }

    fn record(&mut self, item: &FileMoveItem, outcome: TransferOutcome) {
        match outcome.kind {
            OutcomeKind::Error => {
                warn!(job = %self.handle.id(), source = %outcome.source.display(), reason = %outcome.reason, "item failed")
            }
            kind => {
                debug!(job = %self.handle.id(), source = %outcome.source.display(), %kind, "item done")
            }
        }

        self.progress.summary.record(outcome.kind);
        self.progress.processed += 1;
        self.meter.advance(item);
        self.progress.percent = self
            .meter
            .percent(self.progress.processed)
            .max(self.progress.percent);
        self.progress.last_outcome = Some(outcome.clone());
        self.details.push(outcome);
        self.publish();
    }

    fn finish(mut self, status: JobStatus, message: String) -> JobSnapshot {
        self.progress.status = status;
        self.progress.message = message;
        self.progress.current_item = None;
        self.progress.finished_at = Some(Utc::now());
        if status == JobStatus::Completed {
            self.progress.percent = 100;
        }
        self.progress.details = std::mem::take(&mut self.details);

        info!(
            job = %self.handle.id(),
            %status,
            processed = self.progress.processed,
            total = self.progress.total,
            moved = self.progress.summary.moved,
            errors = self.progress.summary.errors,
            "job finished"
        );

        self.publish();
        self.progress
    }

    fn publish(&self) {
        self.handle.broadcaster.publish(self.progress.clone());
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn completion_message(summary: &ResultSummary, dry_run: bool) -> String {
    if dry_run {
        format!(
            "Dry run complete: {} would move, {} skipped, {} errors",
            summary.dry_run, summary.skipped, summary.errors
        )
    } else {
        format!(
            "Completed: {} moved, {} skipped, {} errors",
            summary.moved, summary.skipped, summary.errors
        )
    }
}
