//! Job model for the processing pipeline.
//!
//! A job captures one source file's compression or conversion task and its
//! lifecycle state. Identity fields (id, name, source path, source format)
//! and the target format are fixed at submission; only the queue manager and
//! the export packager mutate the remaining state.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Kind of transform a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Size reduction within the same container format.
    Compression,
    /// Container format change.
    Conversion,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::Compression => write!(f, "compression"),
            TaskKind::Conversion => write!(f, "conversion"),
        }
    }
}

/// Image container formats known to the pipeline.
///
/// The set covers every container the backends can route; anything else maps
/// to `Other` and falls back to PNG (compression) or the configured default
/// (conversion) inside the native codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageFormat {
    Jpeg,
    Png,
    Gif,
    Bmp,
    Tiff,
    Heic,
    Webp,
    Pdf,
    Ico,
    /// JPEG 2000 family (jp2, jpx, j2k, j2c).
    Jpeg2000,
    Exr,
    Other,
}

impl ImageFormat {
    /// Parse a format from a file extension (case-insensitive, family aliases).
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "jpg" | "jpeg" | "jfif" => ImageFormat::Jpeg,
            "png" => ImageFormat::Png,
            "gif" => ImageFormat::Gif,
            "bmp" => ImageFormat::Bmp,
            "tif" | "tiff" => ImageFormat::Tiff,
            "heic" | "heif" => ImageFormat::Heic,
            "webp" => ImageFormat::Webp,
            "pdf" => ImageFormat::Pdf,
            "ico" => ImageFormat::Ico,
            "jp2" | "jpx" | "j2k" | "j2c" => ImageFormat::Jpeg2000,
            "exr" => ImageFormat::Exr,
            _ => ImageFormat::Other,
        }
    }

    /// Parse a format from a file path's extension.
    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .map(Self::from_extension)
            .unwrap_or(ImageFormat::Other)
    }

    /// Canonical file extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Png => "png",
            ImageFormat::Gif => "gif",
            ImageFormat::Bmp => "bmp",
            ImageFormat::Tiff => "tiff",
            ImageFormat::Heic => "heic",
            ImageFormat::Webp => "webp",
            ImageFormat::Pdf => "pdf",
            ImageFormat::Ico => "ico",
            ImageFormat::Jpeg2000 => "jp2",
            ImageFormat::Exr => "exr",
            ImageFormat::Other => "png",
        }
    }
}

/// Lifecycle state of a job. Advances forward only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Job is waiting in its queue.
    #[default]
    Pending,
    /// Job is currently being transformed.
    Running,
    /// Transform finished and the output file exists.
    Completed,
    /// Transform failed; the reason is on the job.
    Failed,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Pending => write!(f, "pending"),
            JobState::Running => write!(f, "running"),
            JobState::Completed => write!(f, "completed"),
            JobState::Failed => write!(f, "failed"),
        }
    }
}

/// Export-side lifecycle of a job's output, mutated only by the export packager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    #[default]
    Idle,
    Running,
    Complete,
    Failed,
}

impl std::fmt::Display for DownloadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DownloadState::Idle => write!(f, "idle"),
            DownloadState::Running => write!(f, "running"),
            DownloadState::Complete => write!(f, "complete"),
            DownloadState::Failed => write!(f, "failed"),
        }
    }
}

/// A single source file's compression or conversion task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    id: String,
    name: String,
    source_path: PathBuf,
    source_format: ImageFormat,
    kind: TaskKind,
    // Fixed at submission; there is deliberately no setter.
    target_format: ImageFormat,
    state: JobState,
    download_state: DownloadState,
    progress: f32,
    input_size: Option<u64>,
    output_size: Option<u64>,
    error_reason: Option<String>,
}

impl Job {
    /// Create a new pending job. Identity and target format are frozen here.
    pub fn new(
        name: String,
        source_path: PathBuf,
        source_format: ImageFormat,
        kind: TaskKind,
        target_format: ImageFormat,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            source_path,
            source_format,
            kind,
            target_format,
            state: JobState::Pending,
            download_state: DownloadState::Idle,
            progress: 0.0,
            input_size: None,
            output_size: None,
            error_reason: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn source_format(&self) -> ImageFormat {
        self.source_format
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn target_format(&self) -> ImageFormat {
        self.target_format
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn download_state(&self) -> DownloadState {
        self.download_state
    }

    pub fn progress(&self) -> f32 {
        self.progress
    }

    pub fn input_size(&self) -> Option<u64> {
        self.input_size
    }

    /// Only meaningful once the job is completed.
    pub fn output_size(&self) -> Option<u64> {
        self.output_size
    }

    pub fn error_reason(&self) -> Option<&str> {
        self.error_reason.as_deref()
    }

    /// Effective extension of the job's output file: the source extension for
    /// compression (same container), the target format's for conversion.
    pub fn output_extension(&self) -> String {
        match self.kind {
            TaskKind::Compression => self
                .source_path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_lowercase())
                .unwrap_or_else(|| self.source_format.extension().to_string()),
            TaskKind::Conversion => self.target_format.extension().to_string(),
        }
    }

    /// Fraction of the input size saved by the transform.
    ///
    /// `1 - output/input` when the output is smaller, otherwise exactly 0.
    /// Never negative, always below 1.
    pub fn compression_ratio(&self) -> f64 {
        match (self.input_size, self.output_size) {
            (Some(input), Some(output)) if output < input && input > 0 => {
                1.0 - (output as f64 / input as f64)
            }
            _ => 0.0,
        }
    }

    /// Record the cached input size; set once at ingestion.
    pub fn set_input_size(&mut self, bytes: u64) {
        if self.input_size.is_none() {
            self.input_size = Some(bytes);
        }
    }

    /// Update fractional progress, clamped into [0, 1].
    pub fn set_progress(&mut self, progress: f32) {
        self.progress = progress.clamp(0.0, 1.0);
    }

    /// Transition Pending -> Running. Other states are left untouched.
    pub fn mark_running(&mut self) {
        if self.state == JobState::Pending {
            self.state = JobState::Running;
        }
    }

    /// Transition Running -> Completed and record the output size.
    pub fn complete(&mut self, output_size: u64) {
        if self.state == JobState::Running {
            self.state = JobState::Completed;
            self.output_size = Some(output_size);
            self.progress = 1.0;
        }
    }

    /// Transition Running -> Failed with a reason.
    pub fn fail(&mut self, reason: &str) {
        if self.state == JobState::Running {
            self.state = JobState::Failed;
            self.error_reason = Some(reason.to_string());
        }
    }

    pub fn set_download_state(&mut self, state: DownloadState) {
        self.download_state = state;
    }

    /// Check if the job is in a terminal state (completed or failed).
    pub fn is_terminal(&self) -> bool {
        matches!(self.state, JobState::Completed | JobState::Failed)
    }
}
