//! Progress broadcasting.
//!
//! Each job owns one `ProgressBroadcaster`. The worker publishes a fresh
//! `JobSnapshot` after every state change; the broadcaster caches the latest
//! one (backing `JobRegistry::get`) and fans it out to any number of
//! subscribers over bounded channels.
//!
//! Publishing never blocks. A subscriber that falls a full buffer behind, or
//! whose receiving side was dropped, is removed from the list; its iterator
//! simply ends early and the caller can fall back to polling.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use tracing::debug;

use crate::model::JobSnapshot;

struct BroadcastState {
    last: JobSnapshot,
    subscribers: Vec<Sender<JobSnapshot>>,
    /// Replaces the message of every later non-terminal snapshot
    pinned_message: Option<String>,
}

/// Fan-out of job snapshots plus a last-known-snapshot cache.
pub struct ProgressBroadcaster {
    state: Mutex<BroadcastState>,
    finished: Condvar,
    buffer: usize,
}

impl ProgressBroadcaster {
    /// Create a broadcaster seeded with the job's initial snapshot.
    ///
    /// `buffer` is the number of snapshots a subscriber may have pending
    /// before it is dropped.
    pub fn new(initial: JobSnapshot, buffer: usize) -> Self {
        ProgressBroadcaster {
            state: Mutex::new(BroadcastState {
                last: initial,
                subscribers: Vec::new(),
                pinned_message: None,
            }),
            finished: Condvar::new(),
            buffer: buffer.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BroadcastState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the cached snapshot and push it to every subscriber.
    ///
    /// Once a terminal snapshot has been published, later calls are ignored.
    pub fn publish(&self, mut snapshot: JobSnapshot) {
        let mut state = self.lock();
        if state.last.is_terminal() {
            return;
        }

        if let Some(pinned) = &state.pinned_message {
            if !snapshot.is_terminal() {
                snapshot.message = pinned.clone();
            }
        }
        self.broadcast(&mut state, snapshot);
    }

    /// Show `message` on the current snapshot and on every later one until
    /// the job finishes. The terminal snapshot keeps its own message.
    pub fn pin_message(&self, message: impl Into<String>) {
        let mut state = self.lock();
        if state.last.is_terminal() {
            return;
        }

        let message = message.into();
        let snapshot = JobSnapshot {
            message: message.clone(),
            ..state.last.clone()
        };
        state.pinned_message = Some(message);
        self.broadcast(&mut state, snapshot);
    }

    fn broadcast(&self, state: &mut BroadcastState, snapshot: JobSnapshot) {
        state.subscribers.retain(|tx| match tx.try_send(snapshot.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!(job = %snapshot.id, "dropping slow progress subscriber");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        });

        let terminal = snapshot.is_terminal();
        state.last = snapshot;

        if terminal {
            // Dropping the senders ends every subscription after the terminal snapshot.
            state.subscribers.clear();
            self.finished.notify_all();
        }
    }

    /// The most recently published snapshot.
    pub fn latest(&self) -> JobSnapshot {
        self.lock().last.clone()
    }

    /// Start a new subscription from the current state.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = crossbeam_channel::bounded(self.buffer);
        let mut state = self.lock();

        // The channel is empty and has capacity, so this cannot fail.
        let _ = tx.try_send(state.last.clone());
        if !state.last.is_terminal() {
            state.subscribers.push(tx);
        }

        Subscription {
            receiver: rx,
            done: false,
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Block until a terminal snapshot has been published and return it.
    pub fn wait_terminal(&self) -> JobSnapshot {
        let mut state = self.lock();
        while !state.last.is_terminal() {
            state = self
                .finished
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.last.clone()
    }
}

/// A finite, blocking stream of snapshots for one job.
///
/// Yields the snapshot current at subscription time, then every later update,
/// and ends after the terminal snapshot. Not restartable: subscribe again to
/// reconnect from the then-current state.
pub struct Subscription {
    receiver: Receiver<JobSnapshot>,
    done: bool,
}

impl Iterator for Subscription {
    type Item = JobSnapshot;

    fn next(&mut self) -> Option<JobSnapshot> {
        if self.done {
            return None;
        }
        match self.receiver.recv() {
            Ok(snapshot) => {
                self.done = snapshot.is_terminal();
                Some(snapshot)
            }
            Err(_) => {
                self.done = true;
                None
            }
        }
    }
}
