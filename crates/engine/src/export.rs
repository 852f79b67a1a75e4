//! Export packager.
//!
//! Collects the outputs of completed jobs, filters them through the tier
//! policy, stages collision-free copies in a throwaway directory, and packs
//! them into a timestamped zip archive at the destination. The staging
//! directory is a `TempDir`, so it disappears on every path out of here,
//! success or failure. Export-level errors abort the export only; job state
//! is never corrupted, and excluded jobs are reported, not failed.

use crate::job::{DownloadState, JobState};
use crate::naming::{export_name, temp_output_path, NamingError};
use crate::state::SharedState;
use chrono::Local;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// Which jobs the current tier may export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportPolicy {
    /// Jobs whose input exceeds the threshold are excluded from the archive.
    FreeTier { max_input_bytes: u64 },
    /// Everything completed is exported.
    Unrestricted,
}

impl ExportPolicy {
    pub fn allows(&self, input_size: Option<u64>) -> bool {
        match self {
            ExportPolicy::Unrestricted => true,
            ExportPolicy::FreeTier { max_input_bytes } => {
                input_size.map(|n| n <= *max_input_bytes).unwrap_or(false)
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    /// Every candidate was excluded or not completed.
    #[error("Nothing to export")]
    Empty,

    #[error("Naming error: {0}")]
    Naming(#[from] NamingError),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// What an export run produced.
#[derive(Debug)]
pub struct ExportReport {
    pub archive_path: PathBuf,
    /// Job ids that made it into the archive.
    pub exported: Vec<String>,
    /// Job ids the tier policy filtered out.
    pub excluded: Vec<String>,
}

/// One staged archive entry, captured from state before any IO happens.
struct ExportEntry {
    job_id: String,
    output_path: PathBuf,
    entry_name: String,
}

/// Progress callback, called with a fraction in [0, 1].
pub type ProgressFn = Arc<dyn Fn(f32) + Send + Sync>;

/// Packs completed jobs into a zip archive at `destination`.
pub struct ExportPackager {
    state: SharedState,
    temp_dir: PathBuf,
    app_name: String,
    policy: ExportPolicy,
}

impl ExportPackager {
    pub fn new(state: SharedState, temp_dir: PathBuf, app_name: String, policy: ExportPolicy) -> Self {
        Self {
            state,
            temp_dir,
            app_name,
            policy,
        }
    }

    /// Export the given jobs to a fresh archive in `destination`.
    ///
    /// Only completed jobs are considered; the policy filter decides which of
    /// those enter the archive. `keep_original_names` is passed through to
    /// the name resolver.
    pub async fn export(
        &self,
        job_ids: &[String],
        destination: &Path,
        keep_original_names: bool,
        progress: ProgressFn,
    ) -> Result<ExportReport, ExportError> {
        let (entries, excluded) = self.plan(job_ids, keep_original_names).await?;
        if entries.is_empty() {
            return Err(ExportError::Empty);
        }

        let exported: Vec<String> = entries.iter().map(|e| e.job_id.clone()).collect();
        self.set_download_states(&exported, DownloadState::Running)
            .await;

        let archive_path = archive_path(destination, &self.app_name);
        let result = {
            let archive_path = archive_path.clone();
            tokio::task::spawn_blocking(move || stage_and_pack(entries, &archive_path, progress))
                .await
        };

        // Flatten the join error; a panic in packaging fails the export.
        let result = match result {
            Ok(inner) => inner,
            Err(join_err) => Err(ExportError::Io(io::Error::other(format!(
                "packaging task panicked: {}",
                join_err
            )))),
        };

        match result {
            Ok(()) => {
                self.set_download_states(&exported, DownloadState::Complete)
                    .await;
                info!(
                    archive = %archive_path.display(),
                    entries = exported.len(),
                    excluded = excluded.len(),
                    "export complete"
                );
                Ok(ExportReport {
                    archive_path,
                    exported,
                    excluded,
                })
            }
            Err(e) => {
                warn!(error = %e, "export failed");
                self.set_download_states(&exported, DownloadState::Failed)
                    .await;
                Err(e)
            }
        }
    }

    /// Select completed jobs, apply the policy filter, and resolve entry
    /// names, all from one state read.
    async fn plan(
        &self,
        job_ids: &[String],
        keep_original_names: bool,
    ) -> Result<(Vec<ExportEntry>, Vec<String>), ExportError> {
        let guard = self.state.read().await;
        let mut entries = Vec::new();
        let mut excluded = Vec::new();
        let mut taken: HashSet<String> = HashSet::new();

        for id in job_ids {
            let Some(job) = guard.job(id) else {
                debug!(job = %id, "unknown job skipped at export");
                continue;
            };
            if job.state() != JobState::Completed {
                debug!(job = %id, state = %job.state(), "non-completed job skipped at export");
                continue;
            }
            if !self.policy.allows(job.input_size()) {
                excluded.push(id.clone());
                continue;
            }

            let ext = job.output_extension();
            let entry_name = export_name(job.name(), &ext, keep_original_names, &taken)?;
            taken.insert(entry_name.clone());
            entries.push(ExportEntry {
                job_id: id.clone(),
                output_path: temp_output_path(&self.temp_dir, job.id(), &ext),
                entry_name,
            });
        }

        Ok((entries, excluded))
    }

    async fn set_download_states(&self, ids: &[String], state: DownloadState) {
        self.state
            .mutate(|s| {
                for id in ids {
                    if let Some(job) = s.job_mut(id) {
                        job.set_download_state(state);
                    }
                }
            })
            .await;
    }
}

/// Archive path `<dest>/<app_name>_<Y-m-d H.M.S>.zip`, nudged with a numeric
/// suffix if that exact file already exists.
fn archive_path(destination: &Path, app_name: &str) -> PathBuf {
    let stamp = Local::now().format("%Y-%-m-%d %-H.%-M.%-S");
    let base = format!("{}_{}", app_name, stamp);

    let candidate = destination.join(format!("{}.zip", base));
    if !candidate.exists() {
        return candidate;
    }
    for n in 1.. {
        let candidate = destination.join(format!("{}_{}.zip", base, n));
        if !candidate.exists() {
            return candidate;
        }
    }
    unreachable!()
}

/// Copy every entry into a staging directory, then write the archive.
/// Blocking; runs under `spawn_blocking`.
fn stage_and_pack(
    entries: Vec<ExportEntry>,
    archive_path: &Path,
    progress: ProgressFn,
) -> Result<(), ExportError> {
    let staging = TempDir::new()?;
    let total = entries.len() as f32;
    progress(0.0);

    let mut staged = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        let staged_path = staging.path().join(&entry.entry_name);
        fs::copy(&entry.output_path, &staged_path)?;
        staged.push((entry.entry_name.clone(), staged_path));
        // Staging is the bulk of the IO; reserve the tail for the archive.
        progress(0.9 * (i + 1) as f32 / total);
    }

    let file = File::create(archive_path)?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default();
    for (name, path) in &staged {
        writer.start_file(name.as_str(), options)?;
        let bytes = fs::read(path)?;
        writer.write_all(&bytes)?;
    }
    writer.finish()?;

    progress(1.0);
    Ok(())
}
