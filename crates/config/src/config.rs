//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Compression-related configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompressionConfig {
    /// Compression rate (0.0-1.0), quantized to five quality levels
    #[serde(default = "default_compression_rate")]
    pub rate: f32,
}

fn default_compression_rate() -> f32 {
    0.6
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            rate: default_compression_rate(),
        }
    }
}

/// Conversion-related configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversionConfig {
    /// Default target container when a conversion format is unrecognized
    #[serde(default = "default_target_format")]
    pub default_target_format: String,
}

fn default_target_format() -> String {
    "png".to_string()
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            default_target_format: default_target_format(),
        }
    }
}

/// External tool configuration
///
/// Tool A handles PNG/TIFF/EXR sources; tool B handles GIF sources.
/// Both are disabled by default, routing everything to the native codec.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolsConfig {
    /// Whether external tool A is enabled
    #[serde(default)]
    pub tool_a_enabled: bool,
    /// Executable path or name for tool A
    #[serde(default = "default_tool_a_path")]
    pub tool_a_path: String,
    /// Whether external tool B is enabled
    #[serde(default)]
    pub tool_b_enabled: bool,
    /// Executable path or name for tool B
    #[serde(default = "default_tool_b_path")]
    pub tool_b_path: String,
    /// Palette size passed to tool B via --colors
    #[serde(default = "default_tool_b_colors")]
    pub tool_b_colors: u32,
}

fn default_tool_a_path() -> String {
    "pngpress".to_string()
}

fn default_tool_b_path() -> String {
    "gifpress".to_string()
}

fn default_tool_b_colors() -> u32 {
    256
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            tool_a_enabled: false,
            tool_a_path: default_tool_a_path(),
            tool_b_enabled: false,
            tool_b_path: default_tool_b_path(),
            tool_b_colors: default_tool_b_colors(),
        }
    }
}

/// Export packaging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExportConfig {
    /// Application name prefix for archive file names
    #[serde(default = "default_app_name")]
    pub app_name: String,
    /// Free-tier input size limit in bytes; larger jobs are excluded from export
    #[serde(default = "default_free_tier_max_input_bytes")]
    pub free_tier_max_input_bytes: u64,
    /// Whether the tier policy is lifted (all jobs exportable)
    #[serde(default)]
    pub unrestricted: bool,
    /// Directory where the persisted export destination record lives
    /// (system temp dir if None)
    pub state_dir: Option<PathBuf>,
}

fn default_app_name() -> String {
    "PixelPress".to_string()
}

fn default_free_tier_max_input_bytes() -> u64 {
    5_000_000
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            free_tier_max_input_bytes: default_free_tier_max_input_bytes(),
            unrestricted: false,
            state_dir: None,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub compression: CompressionConfig,
    #[serde(default)]
    pub conversion: ConversionConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub export: ExportConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config.toml file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(content)?;
        config.compression.rate = config.compression.rate.clamp(0.0, 1.0);
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - PIXELPRESS_COMPRESSION_RATE -> compression.rate
    /// - PIXELPRESS_TOOL_A_ENABLED -> tools.tool_a_enabled
    /// - PIXELPRESS_TOOL_A_PATH -> tools.tool_a_path
    /// - PIXELPRESS_TOOL_B_ENABLED -> tools.tool_b_enabled
    /// - PIXELPRESS_TOOL_B_PATH -> tools.tool_b_path
    /// - PIXELPRESS_UNRESTRICTED -> export.unrestricted
    /// - PIXELPRESS_STATE_DIR -> export.state_dir
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("PIXELPRESS_COMPRESSION_RATE") {
            if let Ok(rate) = val.parse::<f32>() {
                self.compression.rate = rate.clamp(0.0, 1.0);
            }
        }

        if let Ok(val) = env::var("PIXELPRESS_TOOL_A_ENABLED") {
            if let Some(flag) = parse_bool(&val) {
                self.tools.tool_a_enabled = flag;
            }
        }

        if let Ok(val) = env::var("PIXELPRESS_TOOL_A_PATH") {
            if !val.is_empty() {
                self.tools.tool_a_path = val;
            }
        }

        if let Ok(val) = env::var("PIXELPRESS_TOOL_B_ENABLED") {
            if let Some(flag) = parse_bool(&val) {
                self.tools.tool_b_enabled = flag;
            }
        }

        if let Ok(val) = env::var("PIXELPRESS_TOOL_B_PATH") {
            if !val.is_empty() {
                self.tools.tool_b_path = val;
            }
        }

        if let Ok(val) = env::var("PIXELPRESS_UNRESTRICTED") {
            if let Some(flag) = parse_bool(&val) {
                self.export.unrestricted = flag;
            }
        }

        if let Ok(val) = env::var("PIXELPRESS_STATE_DIR") {
            if !val.is_empty() {
                self.export.state_dir = Some(PathBuf::from(val));
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }
}

/// Accept "true", "1", "yes" as true; "false", "0", "no" as false
fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}
