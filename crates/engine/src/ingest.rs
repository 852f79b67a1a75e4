//! Batch ingestion of source files into pending jobs.
//!
//! Each path becomes one job. Metadata reads fan out across tokio tasks
//! bounded by a semaphore sized to the CPU count, and the batch is returned
//! only after every task finished, so the whole batch enters the queue at
//! once and in the caller's order. A file whose metadata cannot be read still
//! yields a job, already failed, so one bad path never aborts the batch.

use crate::job::{ImageFormat, Job, TaskKind};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Extensions the pipeline accepts as image sources.
pub const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "jfif", "png", "gif", "bmp", "tif", "tiff", "heic", "heif", "webp", "pdf",
    "ico", "jp2", "jpx", "j2k", "j2c", "exr",
];

/// Check whether a path carries a recognized image extension.
pub fn is_image_path(path: &std::path::Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Build one pending job for each source path, reading file sizes
/// concurrently. Returns jobs in the same order as `paths`.
pub async fn ingest_batch(
    paths: Vec<PathBuf>,
    kind: TaskKind,
    target_format: ImageFormat,
) -> Vec<Job> {
    let semaphore = Arc::new(Semaphore::new(num_cpus::get()));

    let handles: Vec<_> = paths
        .into_iter()
        .map(|path| {
            let semaphore = semaphore.clone();
            tokio::spawn(async move {
                // The semaphore is never closed while we hold a clone.
                let _permit = semaphore.acquire_owned().await;
                ingest_one(path, kind, target_format).await
            })
        })
        .collect();

    let mut jobs = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(Ok(job)) => jobs.push(job),
            Ok(Err(job)) => {
                warn!(job = %job.id(), name = %job.name(), "source unreadable at ingestion");
                jobs.push(job);
            }
            Err(join_err) => {
                warn!(error = %join_err, "ingestion task panicked; dropping entry");
            }
        }
    }

    debug!(count = jobs.len(), %kind, "batch ingested");
    jobs
}

/// Ingest a single path. `Err` carries the job already marked failed.
async fn ingest_one(path: PathBuf, kind: TaskKind, target_format: ImageFormat) -> Result<Job, Job> {
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("untitled")
        .to_string();
    let source_format = ImageFormat::from_path(&path);
    let mut job = Job::new(name, path.clone(), source_format, kind, target_format);

    match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => {
            job.set_input_size(meta.len());
            Ok(job)
        }
        Ok(_) => {
            job.mark_running();
            job.fail("source is not a regular file");
            Err(job)
        }
        Err(e) => {
            job.mark_running();
            job.fail(&format!("cannot read source: {}", e));
            Err(job)
        }
    }
}
