//! Native codec backend.
//!
//! Decodes the source into an in-memory raster with the `image` crate and
//! re-encodes it into the container the format table selects. Compression
//! jobs carry a never-inflate guarantee: when the re-encoded bytes are not
//! smaller than the input, the original bytes are written unchanged and the
//! job still succeeds. Conversion jobs always write the converted bytes,
//! since the format change is the goal.

use super::{BackendError, EncodeOutcome, EncodeRequest, TransformBackend};
use crate::job::{ImageFormat, TaskKind};
use crate::quality::QualityLevel;
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use std::fs;
use std::io::Cursor;
use tracing::debug;

/// In-process decode/re-encode backend.
pub struct NativeCodec {
    /// Fallback container for conversions whose target the codec cannot write.
    default_conversion_format: ImageFormat,
}

impl NativeCodec {
    pub fn new(default_conversion_format: ImageFormat) -> Self {
        Self {
            default_conversion_format,
        }
    }

    /// Container the encoder will actually write for this request.
    ///
    /// Formats the in-process codec cannot encode (HEIC, PDF, JPEG 2000,
    /// unrecognized) fall back to PNG for compression and to the configured
    /// default for conversion.
    fn select_container(&self, req: &EncodeRequest) -> image::ImageFormat {
        let wanted = match req.kind {
            TaskKind::Compression => req.source_format,
            TaskKind::Conversion => req.target_format,
        };

        match encodable_container(wanted) {
            Some(format) => format,
            None => match req.kind {
                TaskKind::Compression => image::ImageFormat::Png,
                TaskKind::Conversion => encodable_container(self.default_conversion_format)
                    .unwrap_or(image::ImageFormat::Png),
            },
        }
    }
}

/// Format table: which containers the in-process codec can encode, and the
/// encoder format for each. `None` falls back per the dispatch rules above.
fn encodable_container(format: ImageFormat) -> Option<image::ImageFormat> {
    match format {
        ImageFormat::Jpeg => Some(image::ImageFormat::Jpeg),
        ImageFormat::Png => Some(image::ImageFormat::Png),
        ImageFormat::Gif => Some(image::ImageFormat::Gif),
        ImageFormat::Bmp => Some(image::ImageFormat::Bmp),
        ImageFormat::Tiff => Some(image::ImageFormat::Tiff),
        ImageFormat::Webp => Some(image::ImageFormat::WebP),
        ImageFormat::Ico => Some(image::ImageFormat::Ico),
        ImageFormat::Exr => Some(image::ImageFormat::OpenExr),
        ImageFormat::Heic | ImageFormat::Pdf | ImageFormat::Jpeg2000 | ImageFormat::Other => None,
    }
}

/// Re-encode a raster into `container` with the quality the level maps to.
fn encode_to_vec(
    img: &DynamicImage,
    container: image::ImageFormat,
    quality: QualityLevel,
) -> Result<Vec<u8>, BackendError> {
    let mut buf = Cursor::new(Vec::new());

    match container {
        image::ImageFormat::Jpeg => {
            // JPEG has no alpha channel; flatten before encoding.
            let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
            let encoder = JpegEncoder::new_with_quality(&mut buf, quality.jpeg_quality());
            rgb.write_with_encoder(encoder)
                .map_err(|e| BackendError::Encode(e.to_string()))?;
        }
        image::ImageFormat::OpenExr => {
            // The EXR encoder wants a float raster.
            let float = DynamicImage::ImageRgb32F(img.to_rgb32f());
            float
                .write_to(&mut buf, container)
                .map_err(|e| BackendError::Encode(e.to_string()))?;
        }
        _ => {
            img.write_to(&mut buf, container)
                .map_err(|e| BackendError::Encode(e.to_string()))?;
        }
    }

    Ok(buf.into_inner())
}

impl TransformBackend for NativeCodec {
    fn try_encode(&self, req: &EncodeRequest) -> Result<EncodeOutcome, BackendError> {
        let input = fs::read(&req.source_path)?;

        let img = image::load_from_memory(&input)
            .map_err(|e| BackendError::Decode(e.to_string()))?;

        let container = self.select_container(req);
        let encoded = encode_to_vec(&img, container, req.quality)?;

        // Never let compression inflate a file: fall back to the original
        // bytes when the re-encode is not an improvement.
        if req.kind == TaskKind::Compression && encoded.len() as u64 >= input.len() as u64 {
            debug!(
                source = %req.source_path.display(),
                encoded = encoded.len(),
                input = input.len(),
                "re-encode not smaller, writing original bytes"
            );
            fs::write(&req.output_path, &input)?;
            return Ok(EncodeOutcome::Written {
                output_bytes: input.len() as u64,
            });
        }

        fs::write(&req.output_path, &encoded)?;
        Ok(EncodeOutcome::Written {
            output_bytes: encoded.len() as u64,
        })
    }
}
