use std::fs;
use std::path::{Path, PathBuf};

use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder};
use rally_cut_types::{BallPosition, RgbFrame};
use thiserror::Error;
use tracing::warn;

const CROSS_COLOR: [u8; 3] = [255, 0, 0];
const CROSS_ARM: i64 = 6;

#[derive(Debug, Error)]
pub enum PreviewError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encoding error: {0}")]
    Encode(#[from] image::ImageError),
}

/// Writes `frame_<index>.png` annotated with the detected balls.
#[derive(Debug, Clone)]
pub struct PreviewWriter {
    directory: PathBuf,
}

impl PreviewWriter {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn path_for(&self, frame_index: u64) -> PathBuf {
        self.directory.join(format!("frame_{frame_index:06}.png"))
    }

    /// Failures are logged and swallowed.
    pub fn write(&self, frame_index: u64, frame: &RgbFrame, balls: &[BallPosition]) {
        if let Err(err) = self.try_write(frame_index, frame, balls) {
            warn!(frame = frame_index, error = %err, "failed to write preview image");
        }
    }

    pub fn try_write(
        &self,
        frame_index: u64,
        frame: &RgbFrame,
        balls: &[BallPosition],
    ) -> Result<PathBuf, PreviewError> {
        let mut annotated = frame.clone();
        for ball in balls {
            draw_cross(&mut annotated, ball);
        }
        let mut encoded = Vec::new();
        PngEncoder::new(&mut encoded).write_image(
            annotated.data(),
            annotated.width(),
            annotated.height(),
            ColorType::Rgb8,
        )?;
        fs::create_dir_all(&self.directory)?;
        let path = self.path_for(frame_index);
        fs::write(&path, encoded)?;
        Ok(path)
    }
}

fn draw_cross(frame: &mut RgbFrame, ball: &BallPosition) {
    let (width, height) = (frame.width() as i64, frame.height() as i64);
    let cx = ball.x.floor() as i64;
    let cy = ball.y.floor() as i64;
    for offset in -CROSS_ARM..=CROSS_ARM {
        for (x, y) in [(cx + offset, cy), (cx, cy + offset)] {
            if (0..width).contains(&x) && (0..height).contains(&y) {
                frame.set_pixel(x as u32, y as u32, CROSS_COLOR);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_png_with_crosses() {
        let dir = tempfile::tempdir().unwrap();
        let writer = PreviewWriter::new(dir.path().join("previews"));
        let frame = RgbFrame::filled(32, 16, [0, 80, 0]);
        let path = writer
            .try_write(7, &frame, &[BallPosition::new(10.5, 8.5), BallPosition::new(40.0, 2.0)])
            .unwrap();
        assert_eq!(path.file_name().unwrap(), "frame_000007.png");
        let bytes = fs::read(&path).unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
    }

    #[test]
    fn unwritable_directory_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"x").unwrap();
        let writer = PreviewWriter::new(blocker.join("nested"));
        let frame = RgbFrame::filled(4, 4, [0, 0, 0]);
        assert!(writer.try_write(0, &frame, &[]).is_err());
        writer.write(0, &frame, &[]);
    }
}
