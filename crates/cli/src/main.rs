//! CLI entry point for PixelPress
//!
//! Parses command line arguments, builds the engine, runs one batch to
//! completion, and optionally packs the results into a zip archive.

use clap::{Parser, ValueEnum};
use pixelpress::{Engine, ImageFormat, JobState, TaskKind};
use pixelpress_config::Config;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// PixelPress - batch image compression and conversion
#[derive(Parser, Debug)]
#[command(name = "pixelpress")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (config.toml)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Base directory for in-flight output files
    #[arg(short, long)]
    temp_dir: Option<PathBuf>,

    /// What to do with the inputs
    #[arg(short, long, value_enum, default_value_t = Mode::Compress)]
    mode: Mode,

    /// Target format for conversion (png, jpg, webp, ...)
    #[arg(short, long)]
    format: Option<String>,

    /// Export the results as a zip archive into this directory
    #[arg(long)]
    export_dir: Option<PathBuf>,

    /// Keep original file names in the archive (no _compress suffix)
    #[arg(long, default_value = "false")]
    keep_names: bool,

    /// Source image files
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Mode {
    Compress,
    Convert,
}

impl From<Mode> for TaskKind {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Compress => TaskKind::Compression,
            Mode::Convert => TaskKind::Conversion,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config = if args.config.exists() {
        match Config::load(&args.config) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load config: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        Config::default()
    };

    let engine = match &args.temp_dir {
        Some(dir) => Engine::with_temp_dir(config, dir.clone()),
        None => Engine::new(config),
    };
    let engine = match engine {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Failed to initialize engine: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let kind: TaskKind = args.mode.into();
    let target_format = args.format.as_deref().map(ImageFormat::from_extension);

    let total = args.inputs.len();
    println!("Submitting {} file(s) for {}", total, kind);
    let ids = engine.submit(args.inputs, kind, target_format).await;

    wait_for_terminal(&engine, ids.len()).await;

    let snapshot = engine.snapshot().await;
    let mut failures = 0usize;
    for job in &snapshot {
        match job.state {
            JobState::Completed => {
                let saved = job.compression_ratio * 100.0;
                println!(
                    "  {} -> {} bytes ({:.1}% saved)",
                    job.name,
                    job.output_size.unwrap_or(0),
                    saved
                );
            }
            JobState::Failed => {
                failures += 1;
                println!(
                    "  {} FAILED: {}",
                    job.name,
                    job.error_reason.as_deref().unwrap_or("unknown error")
                );
            }
            _ => {}
        }
    }

    if let Some(export_dir) = &args.export_dir {
        let completed = engine.completed_job_ids().await;
        if completed.is_empty() {
            eprintln!("Nothing to export");
            return ExitCode::FAILURE;
        }
        let progress = Arc::new(|f: f32| {
            tracing::debug!(fraction = f, "export progress");
        });
        match engine
            .export(&completed, Some(export_dir), args.keep_names, progress)
            .await
        {
            Ok(report) => {
                println!(
                    "Exported {} file(s) to {} ({} excluded by tier policy)",
                    report.exported.len(),
                    report.archive_path.display(),
                    report.excluded.len()
                );
            }
            Err(e) => {
                eprintln!("Export failed: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    if failures > 0 {
        eprintln!("{} of {} job(s) failed", failures, total);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// Block until every submitted job reaches a terminal state.
async fn wait_for_terminal(engine: &Engine, expected: usize) {
    let mut rx = engine.subscribe();
    loop {
        let done = engine
            .snapshot()
            .await
            .iter()
            .filter(|j| matches!(j.state, JobState::Completed | JobState::Failed))
            .count();
        if done >= expected {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
