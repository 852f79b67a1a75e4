//! Output path resolver.
//!
//! Naming authority for in-flight temp outputs and exported copies. Temp
//! paths are keyed by the job's uuid so they are collision-free by
//! construction; export names get a suffix plus a bounded numeric
//! disambiguator so duplicate base names within one run never collide.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Suffix appended to exported names when the original name is not kept.
pub const EXPORT_SUFFIX: &str = "_compress";

/// Upper bound on disambiguation attempts before the export fails loudly.
pub const MAX_NAME_ATTEMPTS: usize = 1000;

/// Errors from export name resolution.
#[derive(Debug, Error, PartialEq)]
pub enum NamingError {
    /// Collision-avoidance retry budget exceeded.
    #[error("Could not find a free name for '{base}.{ext}' after {attempts} attempts")]
    Exhausted {
        base: String,
        ext: String,
        attempts: usize,
    },
}

/// Temp output path for an in-flight job: `<temp_dir>/<job_id>.<ext>`.
pub fn temp_output_path(temp_dir: &Path, job_id: &str, ext: &str) -> PathBuf {
    temp_dir.join(format!("{}.{}", job_id, ext))
}

/// Resolve a collision-free export file name.
///
/// When `keep_original_name` is false the base name gets the `_compress`
/// suffix. While the candidate is taken in `existing`, a numeric `_1`, `_2`,
/// ... disambiguator is appended, up to [`MAX_NAME_ATTEMPTS`].
pub fn export_name(
    base: &str,
    ext: &str,
    keep_original_name: bool,
    existing: &HashSet<String>,
) -> Result<String, NamingError> {
    let stem = if keep_original_name {
        base.to_string()
    } else {
        format!("{}{}", base, EXPORT_SUFFIX)
    };

    let candidate = format!("{}.{}", stem, ext);
    if !existing.contains(&candidate) {
        return Ok(candidate);
    }

    for n in 1..MAX_NAME_ATTEMPTS {
        let candidate = format!("{}_{}.{}", stem, n, ext);
        if !existing.contains(&candidate) {
            return Ok(candidate);
        }
    }

    Err(NamingError::Exhausted {
        base: base.to_string(),
        ext: ext.to_string(),
        attempts: MAX_NAME_ATTEMPTS,
    })
}
