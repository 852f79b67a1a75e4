//! PixelPress engine: a local image-processing pipeline core.
//!
//! Batches of source files become jobs on two independent FIFO queues
//! (compression and conversion). Each job is routed by the backend
//! dispatcher to the in-process codec or one of two external tools, runs
//! strictly one-at-a-time per queue, and lands in a snapshotable job table.
//! Completed outputs can be packaged into a timestamped zip archive at a
//! persisted destination.
//!
//! [`Engine`] is the assembled facade; the submodules are usable on their
//! own for embedding.

pub mod backend;
pub mod destination;
pub mod engine;
pub mod export;
pub mod ingest;
pub mod job;
pub mod naming;
pub mod process;
pub mod quality;
pub mod queue;
pub mod state;

pub use backend::{
    BackendChoice, BackendDispatcher, BackendError, EncodeOutcome, EncodeRequest, TransformBackend,
};
pub use destination::{DestinationError, DestinationStore};
pub use engine::{Engine, EngineError};
pub use export::{ExportError, ExportPackager, ExportPolicy, ExportReport, ProgressFn};
pub use ingest::{ingest_batch, is_image_path, IMAGE_EXTENSIONS};
pub use job::{DownloadState, ImageFormat, Job, JobState, TaskKind};
pub use naming::{export_name, temp_output_path, NamingError, EXPORT_SUFFIX};
pub use process::{run_tool, ExitOutcome, ProcessError, UNCHANGED_EXIT_CODE};
pub use quality::QualityLevel;
pub use queue::QueueManager;
pub use state::{new_shared_state, EngineStateHandle, JobSnapshot, SharedState};
