use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sub-pixel ball candidate position in analysis-resolution coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BallPosition {
    pub x: f64,
    pub y: f64,
}

impl BallPosition {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_sq(&self, other: &BallPosition) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }
}

/// Per-frame ball candidates for a whole video.
///
/// `None` marks a frame that was never analysed; `Some(vec![])` marks a frame
/// that was analysed and contained no ball.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BallTable {
    frames: Vec<Option<Vec<BallPosition>>>,
}

impl BallTable {
    pub fn new(total_frames: usize) -> Self {
        Self {
            frames: vec![None; total_frames],
        }
    }

    /// Builds a fully processed table from per-frame lists.
    pub fn from_frames(frames: Vec<Vec<BallPosition>>) -> Self {
        Self {
            frames: frames.into_iter().map(Some).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn set(&mut self, frame: usize, balls: Vec<BallPosition>) {
        if frame >= self.frames.len() {
            self.frames.resize(frame + 1, None);
        }
        self.frames[frame] = Some(balls);
    }

    /// Drops every frame at or past `len`.
    pub fn truncate(&mut self, len: usize) {
        self.frames.truncate(len);
    }

    pub fn is_processed(&self, frame: usize) -> bool {
        matches!(self.frames.get(frame), Some(Some(_)))
    }

    /// Balls detected at `frame`; unprocessed and out-of-range frames are empty.
    pub fn balls(&self, frame: usize) -> &[BallPosition] {
        match self.frames.get(frame) {
            Some(Some(balls)) => balls,
            _ => &[],
        }
    }

    pub fn ball(&self, frame: usize, index: usize) -> Option<BallPosition> {
        self.balls(frame).get(index).copied()
    }

    /// Index of the last frame of the processed prefix `[0, n]`.
    pub fn last_contiguous_processed(&self) -> Option<usize> {
        let processed = self.frames.iter().take_while(|f| f.is_some()).count();
        processed.checked_sub(1)
    }

    pub fn processed_count(&self) -> usize {
        self.frames.iter().filter(|f| f.is_some()).count()
    }

    pub fn iter_processed(&self) -> impl Iterator<Item = (usize, &[BallPosition])> {
        self.frames
            .iter()
            .enumerate()
            .filter_map(|(index, balls)| balls.as_deref().map(|b| (index, b)))
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum BallListError {
    #[error("ball entry '{entry}' is not of the form (x|y)")]
    Malformed { entry: String },

    #[error("ball entry '{entry}' has an invalid coordinate")]
    InvalidNumber { entry: String },
}

/// Encodes positions as `(x|y);(x|y)`.
pub fn format_ball_list(balls: &[BallPosition]) -> String {
    let mut out = String::new();
    for (index, ball) in balls.iter().enumerate() {
        if index > 0 {
            out.push(';');
        }
        let _ = write!(out, "({}|{})", ball.x, ball.y);
    }
    out
}

pub fn parse_ball_list(text: &str) -> Result<Vec<BallPosition>, BallListError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(Vec::new());
    }
    text.split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(parse_entry)
        .collect()
}

fn parse_entry(entry: &str) -> Result<BallPosition, BallListError> {
    let malformed = || BallListError::Malformed {
        entry: entry.to_string(),
    };
    let inner = entry
        .strip_prefix('(')
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or_else(malformed)?;
    let (x, y) = inner.split_once('|').ok_or_else(malformed)?;
    let invalid = || BallListError::InvalidNumber {
        entry: entry.to_string(),
    };
    let x = x.trim().parse::<f64>().map_err(|_| invalid())?;
    let y = y.trim().parse::<f64>().map_err(|_| invalid())?;
    if !x.is_finite() || !y.is_finite() {
        return Err(invalid());
    }
    Ok(BallPosition::new(x, y))
}
