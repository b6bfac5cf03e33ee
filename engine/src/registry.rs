//! Job registry.
//!
//! `JobRegistry` is the entry point for running relocation jobs. It validates
//! a submitted plan, creates the job in `queued`, and hands it to a dedicated
//! worker thread (`job-<id>`). Callers then observe the job by id through
//! `get`, `list`, `subscribe` or `wait`, and may request cancellation with
//! `abort`.
//!
//! The job table sits behind one mutex. Job progress does not: each job
//! publishes snapshots through its own broadcaster, so readers never contend
//! with the registry lock for more than a map lookup.
//!
//! The registry keeps at most `max_retained_jobs` jobs. When a submission
//! pushes it over the bound, the oldest finished jobs are evicted; queued and
//! running jobs are never evicted, so the bound can be exceeded temporarily.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use tracing::{debug, info};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{RegistryError, ValidationError};
use crate::fs_ops::{FileSystem, LocalFs};
use crate::job::{JobHandle, JobWorker};
use crate::model::{JobId, JobSnapshot, Plan, TransferOptions};
use crate::progress::Subscription;
use crate::transfer::TransferEngine;

#[derive(Default)]
struct JobTable {
    jobs: HashMap<JobId, Arc<JobHandle>>,
    /// Submission order, oldest first
    order: VecDeque<JobId>,
}

/// Creates, runs and tracks relocation jobs.
pub struct JobRegistry {
    config: EngineConfig,
    fs: Arc<dyn FileSystem>,
    table: Mutex<JobTable>,
}

impl JobRegistry {
    /// A registry operating on the local disk.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_filesystem(config, Arc::new(LocalFs))
    }

    /// A registry operating through the given filesystem.
    pub fn with_filesystem(config: EngineConfig, fs: Arc<dyn FileSystem>) -> Self {
        JobRegistry {
            config: config.normalized(),
            fs,
            table: Mutex::new(JobTable::default()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, JobTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle(&self, id: JobId) -> Result<Arc<JobHandle>, RegistryError> {
        self.lock()
            .jobs
            .get(&id)
            .cloned()
            .ok_or(RegistryError::JobNotFound(id))
    }

    /// Validate a plan, create a queued job, and start its worker.
    ///
    /// Returns as soon as the worker thread has been spawned.
    ///
    /// # Errors
    /// `RegistryError::Validation` if the plan is empty or its source root is
    /// missing or not a directory; no job is created in that case.
    /// `RegistryError::Spawn` if the worker thread could not be started.
    pub fn submit(
        &self,
        job_type: impl Into<String>,
        plan: Plan,
        options: TransferOptions,
    ) -> Result<JobId, RegistryError> {
        self.validate(&plan)?;

        let id = Uuid::new_v4();
        let job_type = job_type.into();
        let snapshot = JobSnapshot::queued(id, job_type.clone(), plan.len(), options);
        let handle = Arc::new(JobHandle::new(snapshot, self.config.subscriber_buffer));

        let engine = TransferEngine::new(self.fs.clone(), &self.config);
        let worker = JobWorker::new(handle.clone(), plan, options, engine, self.fs.clone());

        // Registered before the worker starts so the id is immediately visible.
        {
            let mut table = self.lock();
            evict_finished(&mut table, self.config.max_retained_jobs - 1);
            table.jobs.insert(id, handle);
            table.order.push_back(id);
        }

        let spawned = thread::Builder::new()
            .name(format!("job-{}", id))
            .spawn(move || {
                worker.run_contained();
            });

        if let Err(e) = spawned {
            let mut table = self.lock();
            table.jobs.remove(&id);
            table.order.retain(|queued| *queued != id);
            return Err(RegistryError::Spawn(e));
        }

        info!(job = %id, %job_type, "job submitted");
        Ok(id)
    }

    /// The job's latest snapshot.
    pub fn get(&self, id: JobId) -> Option<JobSnapshot> {
        self.handle(id).ok().map(|handle| handle.snapshot())
    }

    /// Up to `limit` jobs, most recently submitted first.
    pub fn list(&self, limit: usize) -> Vec<JobSnapshot> {
        let handles: Vec<Arc<JobHandle>> = {
            let table = self.lock();
            table
                .order
                .iter()
                .rev()
                .take(limit)
                .filter_map(|id| table.jobs.get(id).cloned())
                .collect()
        };
        handles.iter().map(|handle| handle.snapshot()).collect()
    }

    /// Request cancellation. The worker stops at its next item boundary;
    /// until then the job's message reads "Abort requested...".
    ///
    /// # Errors
    /// `JobNotFound` for an unknown id, `AlreadyTerminal` if the job has
    /// already finished.
    pub fn abort(&self, id: JobId) -> Result<(), RegistryError> {
        let handle = self.handle(id)?;
        let status = handle.snapshot().status;
        if status.is_terminal() {
            return Err(RegistryError::AlreadyTerminal { id, status });
        }

        handle.request_cancel();
        info!(job = %id, "abort requested");
        Ok(())
    }

    /// Stream the job's snapshots from its current state to its terminal one.
    pub fn subscribe(&self, id: JobId) -> Result<Subscription, RegistryError> {
        Ok(self.handle(id)?.subscribe())
    }

    /// Block until the job is terminal and return its final snapshot.
    pub fn wait(&self, id: JobId) -> Option<JobSnapshot> {
        let handle = self.handle(id).ok()?;
        Some(handle.wait())
    }

    /// Number of jobs currently retained.
    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn validate(&self, plan: &Plan) -> Result<(), ValidationError> {
        if plan.is_empty() {
            return Err(ValidationError::EmptyPlan);
        }

        let root = &plan.source_root;
        if self.fs.is_dir(root) {
            Ok(())
        } else if self.fs.exists(root) {
            Err(ValidationError::SourceRootNotDirectory { path: root.clone() })
        } else {
            Err(ValidationError::SourceRootNotFound { path: root.clone() })
        }
    }
}

/// Drop the oldest finished jobs until at most `limit` remain.
fn evict_finished(table: &mut JobTable, limit: usize) {
    let mut excess = table.jobs.len().saturating_sub(limit);
    if excess == 0 {
        return;
    }

    let JobTable { jobs, order } = table;
    order.retain(|id| {
        if excess == 0 {
            return true;
        }
        let finished = jobs
            .get(id)
            .map(|handle| handle.snapshot().is_terminal())
            .unwrap_or(true);
        if finished {
            jobs.remove(id);
            excess -= 1;
            debug!(job = %id, "evicted finished job");
            return false;
        }
        true
    });
}
