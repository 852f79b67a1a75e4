//! Job queue manager.
//!
//! Two independent queues (compression, conversion), each executing strictly
//! FIFO with at most one job running at a time. A worker task per busy queue
//! takes the current head, marks it running, hands it to the backend under
//! `spawn_blocking`, writes the terminal state, pops the head, and moves on.
//! A failed job never blocks the jobs behind it. Clearing a queue empties
//! the pending list and bumps the queue epoch; a job that was already
//! running finishes on its own, and its terminal write is discarded when the
//! epoch no longer matches.

use crate::backend::{materialize_outcome, EncodeRequest, TransformBackend};
use crate::job::{Job, TaskKind};
use crate::naming::temp_output_path;
use crate::quality::QualityLevel;
use crate::state::SharedState;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Serialized FIFO execution over the two job queues.
#[derive(Clone)]
pub struct QueueManager {
    state: SharedState,
    backend: Arc<dyn TransformBackend>,
    temp_dir: PathBuf,
    quality: QualityLevel,
}

/// Head-of-queue data captured inside one critical section.
struct HeadTicket {
    job_id: String,
    epoch: u64,
    request: EncodeRequest,
}

impl QueueManager {
    pub fn new(
        state: SharedState,
        backend: Arc<dyn TransformBackend>,
        temp_dir: PathBuf,
        quality: QualityLevel,
    ) -> Self {
        Self {
            state,
            backend,
            temp_dir,
            quality,
        }
    }

    /// Append a batch to its queues in submission order and start a worker
    /// for any queue that was idle.
    pub async fn enqueue(&self, jobs: Vec<Job>) {
        let to_start = self
            .state
            .mutate(|s| {
                for job in jobs {
                    let kind = job.kind();
                    let id = job.id().to_string();
                    s.insert_job(job);
                    s.queue_mut(kind).pending.push_back(id);
                }

                let mut to_start = Vec::new();
                for kind in [TaskKind::Compression, TaskKind::Conversion] {
                    let queue = s.queue_mut(kind);
                    if !queue.busy && !queue.pending.is_empty() {
                        queue.busy = true;
                        to_start.push(kind);
                    }
                }
                to_start
            })
            .await;

        for kind in to_start {
            let manager = self.clone();
            tokio::spawn(async move {
                manager.drive(kind).await;
            });
        }
    }

    /// Remove every job of this kind immediately. A running job is not
    /// interrupted; its result is dropped by the epoch check.
    pub async fn clear(&self, kind: TaskKind) -> usize {
        self.state.mutate(|s| s.clear_kind(kind)).await
    }

    /// Worker loop for one queue. Exits when the pending list drains.
    async fn drive(self, kind: TaskKind) {
        loop {
            let ticket = self.take_head(kind).await;

            let Some(ticket) = ticket else {
                break;
            };

            debug!(job = %ticket.job_id, queue = %kind, "job started");

            let backend = self.backend.clone();
            let request = ticket.request.clone();
            let result = tokio::task::spawn_blocking(move || {
                backend
                    .try_encode(&request)
                    .and_then(|outcome| materialize_outcome(&request, outcome))
            })
            .await;

            // Flatten the join error into the per-job failure path so a
            // panicking backend cannot wedge the queue.
            let result = match result {
                Ok(inner) => inner.map_err(|e| e.to_string()),
                Err(join_err) => Err(format!("backend task panicked: {}", join_err)),
            };

            self.finish_head(kind, ticket, result).await;
        }
    }

    /// Mark the current head running and capture its encode request.
    /// Clears the busy flag and returns None when the queue is empty.
    async fn take_head(&self, kind: TaskKind) -> Option<HeadTicket> {
        let temp_dir = self.temp_dir.clone();
        let quality = self.quality;

        self.state
            .mutate(|s| {
                loop {
                    let queue = s.queue_mut(kind);
                    let epoch = queue.epoch;
                    let Some(job_id) = queue.pending.front().cloned() else {
                        queue.busy = false;
                        return None;
                    };

                    let Some(job) = s.job_mut(&job_id) else {
                        // Stale id with no job behind it; drop and retry.
                        s.queue_mut(kind).pending.pop_front();
                        continue;
                    };

                    job.mark_running();
                    let output_path =
                        temp_output_path(&temp_dir, job.id(), &job.output_extension());
                    let request = EncodeRequest {
                        source_path: job.source_path().to_path_buf(),
                        output_path,
                        kind: job.kind(),
                        source_format: job.source_format(),
                        target_format: job.target_format(),
                        quality,
                    };

                    return Some(HeadTicket {
                        job_id,
                        epoch,
                        request,
                    });
                }
            })
            .await
    }

    /// Write the terminal state and pop the head in one critical section.
    /// When the queue was cleared while the job ran, the write is discarded.
    async fn finish_head(&self, kind: TaskKind, ticket: HeadTicket, result: Result<u64, String>) {
        self.state
            .mutate(|s| {
                let queue = s.queue_mut(kind);
                if queue.epoch != ticket.epoch {
                    debug!(
                        job = %ticket.job_id,
                        queue = %kind,
                        "queue cleared while job ran; discarding orphaned result"
                    );
                    return;
                }

                if queue.pending.front() == Some(&ticket.job_id) {
                    queue.pending.pop_front();
                }

                match s.job_mut(&ticket.job_id) {
                    Some(job) => match result {
                        Ok(output_bytes) => {
                            job.complete(output_bytes);
                            debug!(job = %ticket.job_id, output_bytes, "job completed");
                        }
                        Err(reason) => {
                            job.fail(&reason);
                            warn!(job = %ticket.job_id, %reason, "job failed");
                        }
                    },
                    None => {
                        debug!(job = %ticket.job_id, "job vanished before terminal write");
                    }
                }
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, EncodeOutcome};
    use crate::job::{ImageFormat, JobState};
    use crate::state::new_shared_state;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Backend double that records call order and concurrency, sleeps a
    /// little, and fails any request whose file stem contains "bad".
    struct RecordingBackend {
        calls: Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        delay: Duration,
    }

    impl RecordingBackend {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                delay,
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl TransformBackend for RecordingBackend {
        fn try_encode(&self, req: &EncodeRequest) -> Result<EncodeOutcome, BackendError> {
            let stem = req
                .source_path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            self.calls.lock().unwrap().push(stem.clone());

            if stem.contains("bad") {
                Err(BackendError::Decode("unreadable".to_string()))
            } else {
                Ok(EncodeOutcome::Written { output_bytes: 10 })
            }
        }
    }

    /// Backend double that always reports the input as already optimal.
    struct UnchangedBackend;

    impl TransformBackend for UnchangedBackend {
        fn try_encode(&self, _req: &EncodeRequest) -> Result<EncodeOutcome, BackendError> {
            Ok(EncodeOutcome::Unchanged)
        }
    }

    fn make_job(name: &str, kind: TaskKind) -> Job {
        let mut job = Job::new(
            name.to_string(),
            PathBuf::from(format!("/pictures/{}.png", name)),
            ImageFormat::Png,
            kind,
            ImageFormat::Png,
        );
        job.set_input_size(100);
        job
    }

    fn manager(state: SharedState, backend: Arc<dyn TransformBackend>) -> QueueManager {
        QueueManager::new(
            state,
            backend,
            PathBuf::from("/tmp/pixelpress-test"),
            QualityLevel::Balanced,
        )
    }

    async fn wait_until_settled(state: &SharedState) {
        let mut rx = state.subscribe();
        loop {
            {
                let guard = state.read().await;
                let settled = !guard.queue(TaskKind::Compression).busy
                    && !guard.queue(TaskKind::Conversion).busy;
                if settled {
                    return;
                }
            }
            rx.changed().await.expect("state sender alive");
        }
    }

    // Jobs reach a terminal state in exactly the order they were appended,
    // even when some of them fail.
    #[tokio::test]
    async fn test_fifo_completion_order_with_failures() {
        let state = new_shared_state();
        let backend = RecordingBackend::new(Duration::from_millis(5));
        let mgr = manager(state.clone(), backend.clone());

        let names = ["a", "bad_b", "c", "d", "bad_e"];
        let jobs: Vec<Job> = names
            .iter()
            .map(|n| make_job(n, TaskKind::Compression))
            .collect();
        mgr.enqueue(jobs).await;

        wait_until_settled(&state).await;

        assert_eq!(backend.calls(), names.to_vec());

        let snapshot = state.snapshot().await;
        assert_eq!(snapshot.len(), 5);
        for view in &snapshot {
            if view.name.contains("bad") {
                assert_eq!(view.state, JobState::Failed);
                assert!(view.error_reason.is_some());
            } else {
                assert_eq!(view.state, JobState::Completed);
                assert_eq!(view.output_size, Some(10));
            }
        }
    }

    // At most one job of a queue is ever in flight at once.
    #[tokio::test]
    async fn test_single_flight_within_queue() {
        let state = new_shared_state();
        let backend = RecordingBackend::new(Duration::from_millis(10));
        let mgr = manager(state.clone(), backend.clone());

        let jobs: Vec<Job> = (0..6)
            .map(|i| make_job(&format!("img{}", i), TaskKind::Compression))
            .collect();
        mgr.enqueue(jobs).await;

        wait_until_settled(&state).await;

        assert_eq!(backend.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(backend.calls().len(), 6);
    }

    // The two queues are independent and may run concurrently with each
    // other; each alone stays single-flight.
    #[tokio::test]
    async fn test_queues_run_independently() {
        let state = new_shared_state();
        let backend = RecordingBackend::new(Duration::from_millis(10));
        let mgr = manager(state.clone(), backend.clone());

        let mut jobs = Vec::new();
        for i in 0..3 {
            jobs.push(make_job(&format!("comp{}", i), TaskKind::Compression));
            jobs.push(make_job(&format!("conv{}", i), TaskKind::Conversion));
        }
        mgr.enqueue(jobs).await;

        wait_until_settled(&state).await;

        let snapshot = state.snapshot().await;
        assert_eq!(snapshot.len(), 6);
        assert!(snapshot.iter().all(|j| j.state == JobState::Completed));

        // Per-queue order is preserved even if the global interleaving isn't.
        let calls = backend.calls();
        let comp: Vec<&String> = calls.iter().filter(|c| c.starts_with("comp")).collect();
        let conv: Vec<&String> = calls.iter().filter(|c| c.starts_with("conv")).collect();
        assert_eq!(comp, vec!["comp0", "comp1", "comp2"]);
        assert_eq!(conv, vec!["conv0", "conv1", "conv2"]);
    }

    // Clearing while a job runs drops pending jobs immediately, lets the
    // running job finish, and discards its orphaned terminal write.
    #[tokio::test]
    async fn test_clear_discards_orphaned_write() {
        let state = new_shared_state();
        let backend = RecordingBackend::new(Duration::from_millis(60));
        let mgr = manager(state.clone(), backend.clone());

        let jobs: Vec<Job> = (0..3)
            .map(|i| make_job(&format!("img{}", i), TaskKind::Compression))
            .collect();
        mgr.enqueue(jobs).await;

        // Let the first job get picked up, then clear.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let removed = mgr.clear(TaskKind::Compression).await;
        assert_eq!(removed, 3);

        wait_until_settled(&state).await;

        // Only the in-flight job ever reached the backend.
        assert_eq!(backend.calls().len(), 1);
        assert!(state.snapshot().await.is_empty());

        // The queue is reusable after a clear.
        mgr.enqueue(vec![make_job("later", TaskKind::Compression)])
            .await;
        wait_until_settled(&state).await;
        let snapshot = state.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].state, JobState::Completed);
    }

    // A backend reporting "input already optimal" completes the job with
    // the original bytes as its output, so the ratio reads as zero savings.
    #[tokio::test]
    async fn test_unchanged_outcome_completes_with_original_bytes() {
        let sources = tempfile::TempDir::new().unwrap();
        let work = tempfile::TempDir::new().unwrap();
        let source = sources.path().join("already_small.png");
        std::fs::write(&source, b"tiny but optimal").unwrap();

        let state = new_shared_state();
        let mgr = QueueManager::new(
            state.clone(),
            Arc::new(UnchangedBackend),
            work.path().to_path_buf(),
            QualityLevel::Balanced,
        );

        let mut job = Job::new(
            "already_small".to_string(),
            source.clone(),
            ImageFormat::Png,
            TaskKind::Compression,
            ImageFormat::Png,
        );
        job.set_input_size(16);
        let id = job.id().to_string();
        mgr.enqueue(vec![job]).await;
        wait_until_settled(&state).await;

        let snapshot = state.snapshot().await;
        assert_eq!(snapshot[0].state, JobState::Completed);
        assert_eq!(snapshot[0].output_size, Some(16));
        assert_eq!(snapshot[0].compression_ratio, 0.0);

        let output = crate::naming::temp_output_path(work.path(), &id, "png");
        assert_eq!(std::fs::read(&output).unwrap(), b"tiny but optimal");
    }

    // Enqueueing onto a busy queue must not spawn a second worker.
    #[tokio::test]
    async fn test_enqueue_while_busy_keeps_single_flight() {
        let state = new_shared_state();
        let backend = RecordingBackend::new(Duration::from_millis(15));
        let mgr = manager(state.clone(), backend.clone());

        mgr.enqueue(vec![make_job("first", TaskKind::Compression)])
            .await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        mgr.enqueue(vec![
            make_job("second", TaskKind::Compression),
            make_job("third", TaskKind::Compression),
        ])
        .await;

        wait_until_settled(&state).await;

        assert_eq!(backend.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(backend.calls(), vec!["first", "second", "third"]);
    }
}
