//! Transform backends and the dispatcher that selects between them.
//!
//! Backends form a small closed set behind one trait: the in-process native
//! codec and the two external tools. The dispatcher picks a backend per job
//! from its decision table; adding a backend means adding a variant here,
//! not scattering conditionals through the queue.

pub mod external;
pub mod native;

use crate::job::{ImageFormat, TaskKind};
use crate::process::ProcessError;
use crate::quality::QualityLevel;
use external::ExternalTool;
use native::NativeCodec;
use pixelpress_config::Config;
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

/// Errors a backend can report for a single job.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Source bytes unreadable as an image.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Codec could not produce output.
    #[error("Encode error: {0}")]
    Encode(String),

    /// External tool could not be launched or died on a signal.
    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    /// External tool exited with a failing code; combined log attached.
    #[error("Tool failed with exit code {code}: {log}")]
    ToolFailed { code: i32, log: String },

    /// File IO error around the transform.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// What a backend produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeOutcome {
    /// Output written to the request's output path.
    Written { output_bytes: u64 },
    /// Input already optimal; no output was produced.
    Unchanged,
}

/// Everything a backend needs to perform one transform.
#[derive(Debug, Clone)]
pub struct EncodeRequest {
    pub source_path: PathBuf,
    pub output_path: PathBuf,
    pub kind: TaskKind,
    pub source_format: ImageFormat,
    pub target_format: ImageFormat,
    pub quality: QualityLevel,
}

/// A transform engine: native codec or external tool.
///
/// Blocking by design; the queue wraps calls in `spawn_blocking`.
pub trait TransformBackend: Send + Sync {
    fn try_encode(&self, req: &EncodeRequest) -> Result<EncodeOutcome, BackendError>;
}

/// Which backend the dispatcher routed a job to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendChoice {
    ToolA,
    ToolB,
    Native,
}

impl std::fmt::Display for BackendChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendChoice::ToolA => write!(f, "tool_a"),
            BackendChoice::ToolB => write!(f, "tool_b"),
            BackendChoice::Native => write!(f, "native"),
        }
    }
}

/// Selects a backend per job from the configured tool set.
///
/// Decision table, in priority order:
/// 1. tool A enabled and source is PNG/TIFF/EXR -> tool A
/// 2. tool B enabled and source is GIF -> tool B
/// 3. otherwise -> native codec
///
/// A failed external invocation fails the job outright; there is no fallback
/// to the native codec.
pub struct BackendDispatcher {
    native: NativeCodec,
    tool_a: Option<ExternalTool>,
    tool_b: Option<ExternalTool>,
}

impl BackendDispatcher {
    /// Build the backend set from configuration.
    pub fn from_config(cfg: &Config) -> Self {
        let native = NativeCodec::new(ImageFormat::from_extension(
            &cfg.conversion.default_target_format,
        ));
        let tool_a = cfg
            .tools
            .tool_a_enabled
            .then(|| ExternalTool::tool_a(PathBuf::from(&cfg.tools.tool_a_path)));
        let tool_b = cfg.tools.tool_b_enabled.then(|| {
            ExternalTool::tool_b(PathBuf::from(&cfg.tools.tool_b_path), cfg.tools.tool_b_colors)
        });
        Self {
            native,
            tool_a,
            tool_b,
        }
    }

    /// Apply the decision table to a source format.
    pub fn select(&self, source_format: ImageFormat) -> BackendChoice {
        if self.tool_a.is_some()
            && matches!(
                source_format,
                ImageFormat::Png | ImageFormat::Tiff | ImageFormat::Exr
            )
        {
            BackendChoice::ToolA
        } else if self.tool_b.is_some() && source_format == ImageFormat::Gif {
            BackendChoice::ToolB
        } else {
            BackendChoice::Native
        }
    }
}

impl TransformBackend for BackendDispatcher {
    fn try_encode(&self, req: &EncodeRequest) -> Result<EncodeOutcome, BackendError> {
        match self.select(req.source_format) {
            // Selection implies presence; the unreachable arms fall through
            // to native to stay total.
            BackendChoice::ToolA => match &self.tool_a {
                Some(tool) => tool.try_encode(req),
                None => self.native.try_encode(req),
            },
            BackendChoice::ToolB => match &self.tool_b {
                Some(tool) => tool.try_encode(req),
                None => self.native.try_encode(req),
            },
            BackendChoice::Native => self.native.try_encode(req),
        }
    }
}

/// Turn an [`EncodeOutcome`] into concrete output bytes on disk.
///
/// `Unchanged` means the tool produced nothing: the original bytes are copied
/// to the output path so downstream packaging sees a completed job whose
/// output equals its input.
pub fn materialize_outcome(
    req: &EncodeRequest,
    outcome: EncodeOutcome,
) -> Result<u64, BackendError> {
    match outcome {
        EncodeOutcome::Written { output_bytes } => Ok(output_bytes),
        EncodeOutcome::Unchanged => {
            let bytes = fs::copy(&req.source_path, &req.output_path)?;
            Ok(bytes)
        }
    }
}
