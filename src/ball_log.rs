//! Persisted per-frame ball candidates, used to resume an interrupted run.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use rally_cut_types::{BallTable, format_ball_list, parse_ball_list};
use serde::{Deserialize, Serialize};

use crate::error::RallyCutError;

#[derive(Debug, Serialize, Deserialize)]
struct BallLogDocument {
    last_parsed_frame: Option<u64>,
    total_frames: u64,
    /// Frame index to `(x|y);(x|y)`; absent frames were never analysed.
    frames: BTreeMap<u64, String>,
}

/// Contents of a ball log.
#[derive(Debug, Clone, PartialEq)]
pub struct BallLogState {
    pub table: BallTable,
    pub total_frames: u64,
    /// Last frame of the analysed prefix.
    pub last_parsed_frame: Option<u64>,
}

impl BallLogState {
    pub fn new(total_frames: u64) -> Self {
        Self {
            table: BallTable::new(total_frames as usize),
            total_frames,
            last_parsed_frame: None,
        }
    }

    pub fn from_table(table: BallTable, total_frames: u64) -> Self {
        let last_parsed_frame = table.last_contiguous_processed().map(|frame| frame as u64);
        Self {
            table,
            total_frames,
            last_parsed_frame,
        }
    }

    /// First frame that still needs analysis.
    pub fn resume_frame(&self) -> u64 {
        self.last_parsed_frame.map_or(0, |frame| frame + 1)
    }

    pub fn is_complete(&self) -> bool {
        self.resume_frame() >= self.total_frames
    }
}

#[derive(Debug, Clone)]
pub struct BallLog {
    path: PathBuf,
}

impl BallLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the log; `Ok(None)` when it does not exist yet.
    pub fn load(&self) -> Result<Option<BallLogState>, RallyCutError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(RallyCutError::io(&self.path, err)),
        };
        let document: BallLogDocument =
            serde_json::from_slice(&bytes).map_err(|err| RallyCutError::json(&self.path, err))?;

        let mut table = BallTable::new(document.total_frames as usize);
        for (frame, text) in &document.frames {
            let balls = parse_ball_list(text).map_err(|source| RallyCutError::BallEntry {
                path: self.path.clone(),
                frame: *frame,
                source,
            })?;
            table.set(*frame as usize, balls);
        }
        // The stored marker wins over a prefix that only looks complete.
        let derived = table.last_contiguous_processed().map(|frame| frame as u64);
        let last_parsed_frame = match (document.last_parsed_frame, derived) {
            (Some(stored), Some(derived)) => Some(stored.min(derived)),
            _ => None,
        };
        Ok(Some(BallLogState {
            table,
            total_frames: document.total_frames,
            last_parsed_frame,
        }))
    }

    /// Writes the whole table through a temporary file and a rename.
    pub fn save(&self, table: &BallTable, total_frames: u64) -> Result<(), RallyCutError> {
        let document = BallLogDocument {
            last_parsed_frame: table.last_contiguous_processed().map(|frame| frame as u64),
            total_frames,
            frames: table
                .iter_processed()
                .map(|(frame, balls)| (frame as u64, format_ball_list(balls)))
                .collect(),
        };
        let bytes = serde_json::to_vec_pretty(&document)
            .map_err(|err| RallyCutError::json(&self.path, err))?;
        if let Some(parent) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| RallyCutError::io(parent, err))?;
        }
        let temp = self.temp_path();
        fs::write(&temp, bytes).map_err(|err| RallyCutError::io(&temp, err))?;
        fs::rename(&temp, &self.path).map_err(|err| RallyCutError::io(&self.path, err))
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

/// Default log location next to the video: `match.mp4` becomes `match.balls.json`.
pub fn default_ball_log_path(input: &Path) -> PathBuf {
    input.with_extension("balls.json")
}
