use rally_cut_types::{FrameError, FrameSize};
use thiserror::Error;

pub type DetectorResult<T> = Result<T, DetectorError>;

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("extractor is still busy with frame {frame}")]
    Busy { frame: u64 },

    #[error("no frame has been assigned to the extractor")]
    NotAssigned,

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("frame {frame} has size {actual}, expected {expected}")]
    SizeMismatch {
        frame: u64,
        actual: FrameSize,
        expected: FrameSize,
    },

    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl DetectorError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}
