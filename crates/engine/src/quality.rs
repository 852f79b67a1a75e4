//! Quality level quantization.
//!
//! The configured compression rate is a continuous value in [0, 1]. Backends
//! never branch on the float directly; the rate is quantized into one of five
//! discrete levels and each backend looks its parameters up in a table.

/// Discrete quality levels, highest fidelity first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QualityLevel {
    Lossless,
    High,
    Balanced,
    Low,
    Lowest,
}

impl QualityLevel {
    /// Quantize a compression rate into a level.
    ///
    /// The rate is clamped into [0, 1] and split into five equal bands; a
    /// higher rate means stronger compression (lower fidelity).
    pub fn from_rate(rate: f32) -> Self {
        let rate = rate.clamp(0.0, 1.0);
        match (rate * 5.0) as u32 {
            0 => QualityLevel::Lossless,
            1 => QualityLevel::High,
            2 => QualityLevel::Balanced,
            3 => QualityLevel::Low,
            _ => QualityLevel::Lowest,
        }
    }

    /// JPEG encoder quality (1-100) for this level.
    pub fn jpeg_quality(&self) -> u8 {
        match self {
            QualityLevel::Lossless => 100,
            QualityLevel::High => 90,
            QualityLevel::Balanced => 75,
            QualityLevel::Low => 50,
            QualityLevel::Lowest => 35,
        }
    }

    /// Quality range argument for external tool A (`--quality=<range>`).
    pub fn tool_a_range(&self) -> &'static str {
        match self {
            QualityLevel::Lossless => "90-100",
            QualityLevel::High => "80-95",
            QualityLevel::Balanced => "65-80",
            QualityLevel::Low => "45-65",
            QualityLevel::Lowest => "20-45",
        }
    }

    /// Palette size cap for external tool B (`--colors <N>`), bounded by the
    /// configured maximum.
    pub fn tool_b_colors(&self, configured_max: u32) -> u32 {
        let level_cap = match self {
            QualityLevel::Lossless => 256,
            QualityLevel::High => 256,
            QualityLevel::Balanced => 192,
            QualityLevel::Low => 128,
            QualityLevel::Lowest => 64,
        };
        level_cap.min(configured_max.max(2))
    }
}
