//! Tennis rally extraction: ball detection over a video, arc tracking and
//! rally assembly, with resumable ball logs.

pub mod backend;
pub mod ball_log;
pub mod cli;
pub mod error;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod rally_log;
pub mod settings;

pub use ball_log::{BallLog, BallLogState};
pub use error::RallyCutError;
pub use orchestrator::{
    ExtractionOutcome, ExtractorSettings, ProgressCallback, ProgressUpdate, VideoBallsExtractor,
};
pub use pipeline::{PipelineConfig, PipelineSummary, run_pipeline};
pub use rally_cut_decoder::{Backend, Configuration, StopHandle, StopSignal, stop_channel};
pub use rally_log::RallyLogEntry;
