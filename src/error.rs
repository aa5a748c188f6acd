use std::path::PathBuf;

use rally_cut_decoder::FrameError;
use rally_cut_detector::DetectorError;
use rally_cut_rally::RallyError;
use rally_cut_types::BallListError;
use thiserror::Error;

use crate::settings::ConfigError;

#[derive(Debug, Error)]
pub enum RallyCutError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Detector(#[from] DetectorError),

    #[error(transparent)]
    Rally(#[from] RallyError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed JSON in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("ball log {} has an invalid entry for frame {frame}: {source}", path.display())]
    BallEntry {
        path: PathBuf,
        frame: u64,
        source: BallListError,
    },

    #[error("video does not report its frame count")]
    UnknownLength,

    #[error("decoder produced no frame to analyse")]
    NoFrames,

    #[error("no background could be built for frame {frame}")]
    NoBackground { frame: u64 },

    #[error("ball log {} is incomplete ({processed}/{total} frames); run detection first", path.display())]
    IncompleteBallLog {
        path: PathBuf,
        processed: u64,
        total: u64,
    },
}

impl RallyCutError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }
}
