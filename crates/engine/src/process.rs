//! Process runner for external transform tools.
//!
//! Spawns a tool binary with an argument vector, captures stdout and stderr
//! into one combined diagnostic log, and maps the exit status onto the three
//! outcomes the pipeline distinguishes. The tool writes its result straight
//! to the output path passed in its arguments; the runner never copies bytes.

use std::path::Path;
use std::process::{Command, Stdio};
use thiserror::Error;

/// Exit code external tools use to signal "input already optimal, no output
/// produced". Mapped to [`ExitOutcome::Unchanged`] rather than failure.
pub const UNCHANGED_EXIT_CODE: i32 = 99;

/// Errors from launching or waiting on an external tool.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// Binary missing or not executable.
    #[error("Failed to launch '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Process was terminated by a signal before exiting.
    #[error("Process '{program}' was terminated by signal")]
    Terminated { program: String },

    /// IO error while collecting output.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of an external tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Exit code 0: the tool wrote its output.
    Success,
    /// Exit code 99: the input was already optimal; no output was produced.
    Unchanged,
    /// Any other non-zero exit code, with the combined output log attached.
    Failed { code: i32, log: String },
}

/// Run an external tool to completion and interpret its exit status.
///
/// Blocking; callers on the async side wrap this in `spawn_blocking` so the
/// queue worker slot is not held hostage by the wait.
pub fn run_tool(program: &Path, args: &[String]) -> Result<ExitOutcome, ProcessError> {
    let output = Command::new(program)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| ProcessError::Launch {
            program: program.display().to_string(),
            source: e,
        })?;

    let log = combine_output(&output.stdout, &output.stderr);

    match output.status.code() {
        Some(0) => Ok(ExitOutcome::Success),
        Some(code) if code == UNCHANGED_EXIT_CODE => Ok(ExitOutcome::Unchanged),
        Some(code) => Ok(ExitOutcome::Failed { code, log }),
        None => Err(ProcessError::Terminated {
            program: program.display().to_string(),
        }),
    }
}

/// Merge captured stdout and stderr into a single diagnostic log string.
fn combine_output(stdout: &[u8], stderr: &[u8]) -> String {
    let mut log = String::from_utf8_lossy(stdout).into_owned();
    let err = String::from_utf8_lossy(stderr);
    if !err.is_empty() {
        if !log.is_empty() && !log.ends_with('\n') {
            log.push('\n');
        }
        log.push_str(&err);
    }
    log
}
