//! Shared domain models for the rally-cut workspace.
//!
//! This crate centralizes the lightweight data structures exchanged between the
//! decoder, detector, rally and application crates. Keep it backend-agnostic so
//! every crate can depend on it without pulling native SDKs or heavy features.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod balls;
pub mod pool;
pub mod scale;

pub use balls::{BallListError, BallPosition, BallTable, format_ball_list, parse_ball_list};
pub use pool::BufferPool;
pub use scale::{REFERENCE_HEIGHT, ResolutionDependent, ScaleContext};

pub type FrameResult<T> = Result<T, FrameError>;

/// Number of interleaved channels in every frame buffer.
pub const RGB_CHANNELS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn byte_len(&self) -> usize {
        self.pixel_count() * RGB_CHANNELS
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Scales to `height` keeping the aspect ratio; the width is rounded to an
    /// even number of pixels.
    pub fn with_target_height(&self, height: u32) -> Self {
        if self.height == 0 || height == 0 {
            return *self;
        }
        let ratio = self.width as f64 / self.height as f64;
        let width = (height as f64 * ratio / 2.0).round() as u32 * 2;
        Self {
            width: width.max(2),
            height,
        }
    }
}

impl fmt::Display for FrameSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A dense, tightly packed RGB8 frame.
#[derive(Clone)]
pub struct RgbFrame {
    width: u32,
    height: u32,
    frame_index: Option<u64>,
    timestamp: Option<Duration>,
    data: Vec<u8>,
}

impl fmt::Debug for RgbFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RgbFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("timestamp", &self.timestamp)
            .field("bytes", &self.data.len())
            .field("frame_index", &self.frame_index)
            .finish()
    }
}

impl RgbFrame {
    pub fn from_owned(
        width: u32,
        height: u32,
        timestamp: Option<Duration>,
        data: Vec<u8>,
    ) -> FrameResult<Self> {
        let required = (width as usize)
            .checked_mul(height as usize)
            .and_then(|pixels| pixels.checked_mul(RGB_CHANNELS))
            .ok_or_else(|| FrameError::InvalidFrame {
                reason: "calculated RGB buffer length overflowed".into(),
            })?;
        if data.len() != required {
            return Err(FrameError::InvalidFrame {
                reason: format!(
                    "unexpected RGB buffer length: got {} expected {}",
                    data.len(),
                    required
                ),
            });
        }
        Ok(Self {
            width,
            height,
            frame_index: None,
            timestamp,
            data,
        })
    }

    /// Builds a frame where every pixel has the same color.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize * RGB_CHANNELS);
        for _ in 0..width as usize * height as usize {
            data.extend_from_slice(&rgb);
        }
        Self {
            width,
            height,
            frame_index: None,
            timestamp: None,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> FrameSize {
        FrameSize::new(self.width, self.height)
    }

    pub fn timestamp(&self) -> Option<Duration> {
        self.timestamp
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn frame_index(&self) -> Option<u64> {
        self.frame_index
    }

    pub fn with_frame_index(mut self, index: Option<u64>) -> Self {
        self.frame_index = index;
        self
    }

    pub fn with_timestamp(mut self, timestamp: Option<Duration>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn set_frame_index(&mut self, index: Option<u64>) {
        self.frame_index = index;
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let offset = (y as usize * self.width as usize + x as usize) * RGB_CHANNELS;
        [self.data[offset], self.data[offset + 1], self.data[offset + 2]]
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, rgb: [u8; 3]) {
        let offset = (y as usize * self.width as usize + x as usize) * RGB_CHANNELS;
        self.data[offset..offset + RGB_CHANNELS].copy_from_slice(&rgb);
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("backend {backend} is not supported in this build")]
    Unsupported { backend: &'static str },

    #[error("{backend} backend failed: {message}")]
    BackendFailure {
        backend: &'static str,
        message: String,
    },

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("invalid frame: {reason}")]
    InvalidFrame { reason: String },

    #[error("frame {index} is not available and will never be produced")]
    FrameNotFound { index: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    pub fn unsupported(backend: &'static str) -> Self {
        Self::Unsupported { backend }
    }

    pub fn backend_failure(backend: &'static str, message: impl Into<String>) -> Self {
        Self::BackendFailure {
            backend,
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn not_found(index: u64) -> Self {
        Self::FrameNotFound { index }
    }
}
