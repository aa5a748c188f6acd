//! Ball candidate detection: background synthesis, motion masks and the
//! per-frame extractor that turns them into sub-pixel ball positions.

pub mod background;
pub mod components;
pub mod error;
pub mod extractor;
pub mod kmeans;
pub mod mask;
pub mod preview;

pub use background::{Background, BackgroundConfig, BackgroundModel, FrameFetcher};
pub use error::{DetectorError, DetectorResult};
pub use extractor::{DetectionParams, DetectionThresholds, FrameBallExtractor};
pub use preview::PreviewWriter;
