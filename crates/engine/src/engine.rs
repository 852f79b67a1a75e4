//! Engine facade.
//!
//! Wires configuration, shared state, the backend dispatcher, the queue
//! manager, and the export packager into one handle. Nothing here is a
//! global: the engine owns its state and collaborators get handles, so two
//! engines in one process stay fully independent.

use crate::backend::BackendDispatcher;
use crate::destination::{DestinationError, DestinationStore};
use crate::export::{ExportError, ExportPackager, ExportPolicy, ExportReport, ProgressFn};
use crate::ingest::ingest_batch;
use crate::job::{ImageFormat, JobState, TaskKind};
use crate::quality::QualityLevel;
use crate::queue::QueueManager;
use crate::state::{new_shared_state, JobSnapshot, SharedState};
use pixelpress_config::Config;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::info;
use uuid::Uuid;

/// Umbrella error for facade operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error("Destination error: {0}")]
    Destination(#[from] DestinationError),
}

/// The assembled processing engine.
pub struct Engine {
    state: SharedState,
    queue: QueueManager,
    packager: ExportPackager,
    destinations: DestinationStore,
    default_target_format: ImageFormat,
}

impl Engine {
    /// Build an engine with a fresh per-instance temp directory.
    pub fn new(config: Config) -> Result<Self, EngineError> {
        let temp_dir = std::env::temp_dir().join(format!("pixelpress-{}", Uuid::new_v4()));
        Self::with_temp_dir(config, temp_dir)
    }

    /// Build an engine writing in-flight outputs under `temp_dir`.
    pub fn with_temp_dir(config: Config, temp_dir: PathBuf) -> Result<Self, EngineError> {
        std::fs::create_dir_all(&temp_dir)?;

        let state = new_shared_state();
        let dispatcher = Arc::new(BackendDispatcher::from_config(&config));
        let quality = QualityLevel::from_rate(config.compression.rate);
        let queue = QueueManager::new(state.clone(), dispatcher, temp_dir.clone(), quality);

        let policy = if config.export.unrestricted {
            ExportPolicy::Unrestricted
        } else {
            ExportPolicy::FreeTier {
                max_input_bytes: config.export.free_tier_max_input_bytes,
            }
        };
        let packager = ExportPackager::new(
            state.clone(),
            temp_dir.clone(),
            config.export.app_name.clone(),
            policy,
        );

        let state_dir = config
            .export
            .state_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("pixelpress-state"));
        let destinations = DestinationStore::new(state_dir);

        let default_target_format =
            ImageFormat::from_extension(&config.conversion.default_target_format);

        info!(temp_dir = %temp_dir.display(), quality = ?quality, "engine ready");

        Ok(Self {
            state,
            queue,
            packager,
            destinations,
            default_target_format,
        })
    }

    /// Ingest a batch and enqueue it. Returns the new job ids in submission
    /// order; files that failed at ingestion surface as already-failed jobs.
    pub async fn submit(
        &self,
        paths: Vec<PathBuf>,
        kind: TaskKind,
        target_format: Option<ImageFormat>,
    ) -> Vec<String> {
        let target = target_format.unwrap_or(self.default_target_format);
        let jobs = ingest_batch(paths, kind, target).await;
        let ids: Vec<String> = jobs.iter().map(|j| j.id().to_string()).collect();

        // Jobs that died at ingestion are recorded but never queued.
        let (runnable, dead): (Vec<_>, Vec<_>) = jobs.into_iter().partition(|j| !j.is_terminal());
        if !dead.is_empty() {
            self.state
                .mutate(|s| {
                    for job in dead {
                        s.insert_job(job);
                    }
                })
                .await;
        }
        self.queue.enqueue(runnable).await;
        ids
    }

    /// Drop every job of one kind; a running job finishes quietly off-record.
    pub async fn clear_queue(&self, kind: TaskKind) -> usize {
        self.queue.clear(kind).await
    }

    pub async fn snapshot(&self) -> Vec<JobSnapshot> {
        self.state.snapshot().await
    }

    /// Change-notification channel; the value is a state version counter.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.state.subscribe()
    }

    /// Ids of every completed job, in submission order.
    pub async fn completed_job_ids(&self) -> Vec<String> {
        self.snapshot()
            .await
            .into_iter()
            .filter(|j| j.state == JobState::Completed)
            .map(|j| j.id)
            .collect()
    }

    /// Persist `dir` as the export destination for future runs.
    pub fn save_destination(&self, dir: &Path) -> Result<(), EngineError> {
        self.destinations.save(dir)?;
        Ok(())
    }

    /// Export jobs to a zip archive.
    ///
    /// With an explicit `destination` the directory is persisted for next
    /// time; without one the saved destination is resolved and re-validated.
    pub async fn export(
        &self,
        job_ids: &[String],
        destination: Option<&Path>,
        keep_original_names: bool,
        progress: ProgressFn,
    ) -> Result<ExportReport, EngineError> {
        let destination = match destination {
            Some(dir) => {
                self.destinations.save(dir)?;
                dir.to_path_buf()
            }
            None => self.destinations.resolve()?,
        };

        let report = self
            .packager
            .export(job_ids, &destination, keep_original_names, progress)
            .await?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::DownloadState;
    use image::{ImageBuffer, Rgb};
    use tempfile::TempDir;

    fn test_config(state_dir: &Path) -> Config {
        let mut cfg = Config::default();
        // External tools stay off so everything routes to the native codec.
        cfg.tools.tool_a_enabled = false;
        cfg.tools.tool_b_enabled = false;
        cfg.export.state_dir = Some(state_dir.to_path_buf());
        cfg
    }

    fn write_png(dir: &Path, name: &str, side: u32) -> PathBuf {
        let img = ImageBuffer::from_fn(side, side, |x, y| {
            Rgb([(x % 251) as u8, (y % 241) as u8, ((x * y) % 239) as u8])
        });
        let path = dir.join(name);
        img.save(&path).unwrap();
        path
    }

    async fn wait_terminal(engine: &Engine, expected: usize) {
        let mut rx = engine.subscribe();
        loop {
            let done = engine
                .snapshot()
                .await
                .iter()
                .filter(|j| {
                    matches!(j.state, JobState::Completed | JobState::Failed)
                })
                .count();
            if done >= expected {
                return;
            }
            rx.changed().await.expect("engine alive");
        }
    }

    // Submit, process, export: the full pipeline through the facade.
    #[tokio::test]
    async fn test_submit_process_export_round_trip() {
        let sources = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        let state_dir = TempDir::new().unwrap();

        let paths = vec![
            write_png(sources.path(), "one.png", 64),
            write_png(sources.path(), "two.png", 48),
        ];

        let engine = Engine::with_temp_dir(
            test_config(state_dir.path()),
            work.path().join("jobs"),
        )
        .unwrap();

        let ids = engine
            .submit(paths, TaskKind::Compression, None)
            .await;
        assert_eq!(ids.len(), 2);

        wait_terminal(&engine, 2).await;
        let snapshot = engine.snapshot().await;
        assert!(snapshot.iter().all(|j| j.state == JobState::Completed));
        assert!(snapshot.iter().all(|j| j.compression_ratio >= 0.0));

        let completed = engine.completed_job_ids().await;
        let report = engine
            .export(&completed, Some(dest.path()), false, Arc::new(|_| {}))
            .await
            .unwrap();
        assert_eq!(report.exported.len(), 2);
        assert!(report.archive_path.exists());

        let snapshot = engine.snapshot().await;
        assert!(snapshot
            .iter()
            .all(|j| j.download_state == DownloadState::Complete));
    }

    // An explicit export destination is remembered for the next run.
    #[tokio::test]
    async fn test_export_destination_persists() {
        let sources = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        let state_dir = TempDir::new().unwrap();

        let engine = Engine::with_temp_dir(
            test_config(state_dir.path()),
            work.path().join("jobs"),
        )
        .unwrap();

        let paths = vec![write_png(sources.path(), "pic.png", 32)];
        engine.submit(paths, TaskKind::Compression, None).await;
        wait_terminal(&engine, 1).await;

        let completed = engine.completed_job_ids().await;
        engine
            .export(&completed, Some(dest.path()), true, Arc::new(|_| {}))
            .await
            .unwrap();

        // Second export leans on the persisted destination.
        let report = engine
            .export(&completed, None, true, Arc::new(|_| {}))
            .await
            .unwrap();
        assert!(report.archive_path.starts_with(dest.path()));
    }

    #[tokio::test]
    async fn test_export_without_destination_fails_cleanly() {
        let work = TempDir::new().unwrap();
        let state_dir = TempDir::new().unwrap();
        let engine = Engine::with_temp_dir(
            test_config(&state_dir.path().join("empty")),
            work.path().join("jobs"),
        )
        .unwrap();

        let err = engine
            .export(&["nope".to_string()], None, false, Arc::new(|_| {}))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Destination(DestinationError::NotConfigured)
        ));
    }

    // Unreadable inputs land in the snapshot as failed without queueing.
    #[tokio::test]
    async fn test_unreadable_input_surfaces_as_failed_job() {
        let work = TempDir::new().unwrap();
        let state_dir = TempDir::new().unwrap();
        let engine = Engine::with_temp_dir(
            test_config(state_dir.path()),
            work.path().join("jobs"),
        )
        .unwrap();

        let ids = engine
            .submit(
                vec![PathBuf::from("/no/such/file.png")],
                TaskKind::Compression,
                None,
            )
            .await;
        assert_eq!(ids.len(), 1);

        let snapshot = engine.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].state, JobState::Failed);
    }

    #[tokio::test]
    async fn test_clear_queue_counts_jobs() {
        let sources = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let state_dir = TempDir::new().unwrap();
        let engine = Engine::with_temp_dir(
            test_config(state_dir.path()),
            work.path().join("jobs"),
        )
        .unwrap();

        let paths = vec![write_png(sources.path(), "gone.png", 32)];
        engine.submit(paths, TaskKind::Compression, None).await;
        wait_terminal(&engine, 1).await;

        // All compression jobs vanish, terminal or not.
        let removed = engine.clear_queue(TaskKind::Compression).await;
        assert_eq!(removed, 1);
        assert!(engine.snapshot().await.is_empty());
    }
}
