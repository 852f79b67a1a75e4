//! Shared engine state, snapshots, and change notification.
//!
//! All job and queue state lives behind one `RwLock`; queue workers and the
//! export packager are the only writers. Collaborators read through
//! serializable [`JobSnapshot`] views and learn about changes through a
//! `watch` channel carrying a monotonically increasing version, so no UI
//! framework is assumed on the listening side.

use crate::job::{DownloadState, Job, JobState, TaskKind};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{watch, RwLock, RwLockReadGuard};

/// Per-queue coordination state.
///
/// `busy` is true iff some job of this queue is running; it is flipped in
/// the same critical section as the head pop. `epoch` increments on every
/// clear so a worker can tell that the job it just finished was orphaned.
#[derive(Debug, Default)]
pub struct QueueState {
    pub pending: VecDeque<String>,
    pub busy: bool,
    pub epoch: u64,
}

/// The full mutable state of the engine: the job table plus both queues.
#[derive(Debug, Default)]
pub struct EngineState {
    jobs: HashMap<String, Job>,
    insertion_order: Vec<String>,
    compression: QueueState,
    conversion: QueueState,
}

impl EngineState {
    pub fn insert_job(&mut self, job: Job) {
        self.insertion_order.push(job.id().to_string());
        self.jobs.insert(job.id().to_string(), job);
    }

    pub fn job(&self, id: &str) -> Option<&Job> {
        self.jobs.get(id)
    }

    pub fn job_mut(&mut self, id: &str) -> Option<&mut Job> {
        self.jobs.get_mut(id)
    }

    pub fn queue(&self, kind: TaskKind) -> &QueueState {
        match kind {
            TaskKind::Compression => &self.compression,
            TaskKind::Conversion => &self.conversion,
        }
    }

    pub fn queue_mut(&mut self, kind: TaskKind) -> &mut QueueState {
        match kind {
            TaskKind::Compression => &mut self.compression,
            TaskKind::Conversion => &mut self.conversion,
        }
    }

    /// Remove every job of one kind and reset its queue. Running jobs become
    /// orphans; their eventual state-writes are discarded by the epoch check.
    ///
    /// Returns the number of jobs removed.
    pub fn clear_kind(&mut self, kind: TaskKind) -> usize {
        let queue = self.queue_mut(kind);
        queue.pending.clear();
        queue.epoch += 1;

        let before = self.jobs.len();
        self.jobs.retain(|_, job| job.kind() != kind);
        let jobs = &self.jobs;
        self.insertion_order.retain(|id| jobs.contains_key(id));
        before - self.jobs.len()
    }

    /// Remove all jobs and reset both queues.
    pub fn clear_all(&mut self) {
        self.jobs.clear();
        self.insertion_order.clear();
        for kind in [TaskKind::Compression, TaskKind::Conversion] {
            let queue = self.queue_mut(kind);
            queue.pending.clear();
            queue.epoch += 1;
        }
    }

    /// Snapshot every known job in submission order.
    pub fn snapshot(&self) -> Vec<JobSnapshot> {
        self.insertion_order
            .iter()
            .filter_map(|id| self.jobs.get(id))
            .map(JobSnapshot::from)
            .collect()
    }
}

/// Read-only view of one job, safe to hand to a presentation layer.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct JobSnapshot {
    pub id: String,
    pub name: String,
    pub kind: TaskKind,
    pub state: JobState,
    pub download_state: DownloadState,
    pub progress: f32,
    pub input_size: Option<u64>,
    pub output_size: Option<u64>,
    pub compression_ratio: f64,
    pub error_reason: Option<String>,
}

impl From<&Job> for JobSnapshot {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id().to_string(),
            name: job.name().to_string(),
            kind: job.kind(),
            state: job.state(),
            download_state: job.download_state(),
            progress: job.progress(),
            input_size: job.input_size(),
            output_size: job.output_size(),
            compression_ratio: job.compression_ratio(),
            error_reason: job.error_reason().map(|r| r.to_string()),
        }
    }
}

/// Engine state behind a lock, paired with its change-notification channel.
pub struct EngineStateHandle {
    inner: RwLock<EngineState>,
    notify: watch::Sender<u64>,
}

/// Shared handle for concurrent access across engine components.
pub type SharedState = Arc<EngineStateHandle>;

/// Creates a new SharedState instance with empty queues.
pub fn new_shared_state() -> SharedState {
    let (notify, _) = watch::channel(0);
    Arc::new(EngineStateHandle {
        inner: RwLock::new(EngineState::default()),
        notify,
    })
}

impl EngineStateHandle {
    /// Read access without notification.
    pub async fn read(&self) -> RwLockReadGuard<'_, EngineState> {
        self.inner.read().await
    }

    /// Run a mutation as one critical section and publish a state version
    /// bump to subscribers afterwards.
    pub async fn mutate<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut EngineState) -> R,
    {
        let result = {
            let mut state = self.inner.write().await;
            f(&mut state)
        };
        self.notify.send_modify(|version| *version += 1);
        result
    }

    /// Subscribe to state version changes.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.notify.subscribe()
    }

    /// Snapshot every job for the read API.
    pub async fn snapshot(&self) -> Vec<JobSnapshot> {
        self.inner.read().await.snapshot()
    }
}
