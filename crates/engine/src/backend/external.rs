//! External tool backends.
//!
//! Two pluggable binaries reached through the process runner. Tool A covers
//! PNG/TIFF/EXR sources, tool B covers GIF. The tool writes its output
//! directly to the path in its argument vector; this module only builds the
//! argv, interprets the exit outcome, and stats the result.

use super::{BackendError, EncodeOutcome, EncodeRequest, TransformBackend};
use crate::process::{run_tool, ExitOutcome};
use std::fs;
use std::path::PathBuf;
use tracing::warn;

/// Argument convention of the two supported tools.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ToolVariant {
    /// `tool --quality=<range> --force --output <path> <input>`
    A,
    /// `tool --optimize=3 --colors <N> <input> --output <path>`
    B { colors: u32 },
}

/// An external transform tool invoked as a subprocess.
pub struct ExternalTool {
    program: PathBuf,
    variant: ToolVariant,
}

impl ExternalTool {
    /// Tool A: the PNG/TIFF/EXR quantizer.
    pub fn tool_a(program: PathBuf) -> Self {
        Self {
            program,
            variant: ToolVariant::A,
        }
    }

    /// Tool B: the GIF optimizer with a bounded palette.
    pub fn tool_b(program: PathBuf, colors: u32) -> Self {
        Self {
            program,
            variant: ToolVariant::B { colors },
        }
    }

    /// Build the argument vector for one request.
    fn build_args(&self, req: &EncodeRequest) -> Vec<String> {
        let input = req.source_path.display().to_string();
        let output = req.output_path.display().to_string();

        match &self.variant {
            ToolVariant::A => vec![
                format!("--quality={}", req.quality.tool_a_range()),
                "--force".to_string(),
                "--output".to_string(),
                output,
                input,
            ],
            ToolVariant::B { colors } => vec![
                "--optimize=3".to_string(),
                "--colors".to_string(),
                req.quality.tool_b_colors(*colors).to_string(),
                input,
                "--output".to_string(),
                output,
            ],
        }
    }
}

impl TransformBackend for ExternalTool {
    fn try_encode(&self, req: &EncodeRequest) -> Result<EncodeOutcome, BackendError> {
        let args = self.build_args(req);

        match run_tool(&self.program, &args)? {
            ExitOutcome::Success => {
                // Verify the tool held up its side of the contract.
                let meta = fs::metadata(&req.output_path).map_err(|e| {
                    BackendError::Encode(format!(
                        "tool reported success but output is missing: {}",
                        e
                    ))
                })?;
                Ok(EncodeOutcome::Written {
                    output_bytes: meta.len(),
                })
            }
            ExitOutcome::Unchanged => Ok(EncodeOutcome::Unchanged),
            ExitOutcome::Failed { code, log } => {
                warn!(
                    program = %self.program.display(),
                    code,
                    "external tool failed"
                );
                Err(BackendError::ToolFailed { code, log })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{ImageFormat, TaskKind};
    use crate::quality::QualityLevel;
    use tempfile::TempDir;

    fn request(quality: QualityLevel) -> EncodeRequest {
        EncodeRequest {
            source_path: PathBuf::from("/in/banner.png"),
            output_path: PathBuf::from("/tmp/out/banner.png"),
            kind: TaskKind::Compression,
            source_format: ImageFormat::Png,
            target_format: ImageFormat::Png,
            quality,
        }
    }

    #[test]
    fn test_tool_a_argument_order() {
        let tool = ExternalTool::tool_a(PathBuf::from("pngpress"));
        let args = tool.build_args(&request(QualityLevel::Balanced));

        assert_eq!(
            args,
            vec![
                "--quality=65-80".to_string(),
                "--force".to_string(),
                "--output".to_string(),
                "/tmp/out/banner.png".to_string(),
                "/in/banner.png".to_string(),
            ]
        );
    }

    #[test]
    fn test_tool_b_argument_order() {
        let tool = ExternalTool::tool_b(PathBuf::from("gifpress"), 256);
        let args = tool.build_args(&request(QualityLevel::Low));

        assert_eq!(
            args,
            vec![
                "--optimize=3".to_string(),
                "--colors".to_string(),
                "128".to_string(),
                "/in/banner.png".to_string(),
                "--output".to_string(),
                "/tmp/out/banner.png".to_string(),
            ]
        );
    }

    #[test]
    fn test_tool_b_colors_respect_configured_max() {
        let tool = ExternalTool::tool_b(PathBuf::from("gifpress"), 64);
        let args = tool.build_args(&request(QualityLevel::Lossless));
        // Level would allow 256 but the configured max wins.
        assert!(args.contains(&"64".to_string()));
    }

    // A fake tool that succeeds without producing output violates the
    // contract and must surface as an encode error, not silent success.
    #[test]
    fn test_success_without_output_is_error() {
        let dir = TempDir::new().unwrap();
        let mut req = request(QualityLevel::Balanced);
        req.output_path = dir.path().join("never-written.png");

        // /bin/true ignores its arguments and exits 0.
        let tool = ExternalTool::tool_a(PathBuf::from("/bin/true"));
        let err = tool.try_encode(&req).unwrap_err();
        assert!(matches!(err, BackendError::Encode(_)));
    }

    #[test]
    fn test_failing_tool_surfaces_exit_code() {
        let tool = ExternalTool::tool_a(PathBuf::from("/bin/false"));
        let err = tool.try_encode(&request(QualityLevel::Balanced)).unwrap_err();
        match err {
            BackendError::ToolFailed { code, .. } => assert_eq!(code, 1),
            other => panic!("expected ToolFailed, got {:?}", other),
        }
    }
}
