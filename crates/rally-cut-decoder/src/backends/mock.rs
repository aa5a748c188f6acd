use std::thread;
use std::time::Duration;

use tokio::sync::mpsc::Sender;

use crate::core::{
    DynFrameProvider, FrameResult, FrameStream, FrameStreamProvider, RgbFrame, VideoMetadata,
    spawn_stream_from_channel,
};

const COURT_COLOR: [u8; 3] = [40, 120, 70];
const SURROUND_COLOR: [u8; 3] = [30, 60, 110];
const LINE_COLOR: [u8; 3] = [235, 235, 235];
const BALL_COLOR: [u8; 3] = [225, 235, 80];
const PLAYER_COLOR: [u8; 3] = [70, 40, 30];

/// A ball flying in a straight line (plus optional vertical acceleration).
#[derive(Debug, Clone, PartialEq)]
pub struct MockBall {
    pub start_frame: u64,
    /// Inclusive.
    pub end_frame: u64,
    pub origin: (f64, f64),
    pub velocity: (f64, f64),
    pub gravity: f64,
}

impl MockBall {
    pub fn linear(start_frame: u64, end_frame: u64, origin: (f64, f64), velocity: (f64, f64)) -> Self {
        Self {
            start_frame,
            end_frame,
            origin,
            velocity,
            gravity: 0.0,
        }
    }

    pub fn position(&self, frame: u64) -> Option<(f64, f64)> {
        if frame < self.start_frame || frame > self.end_frame {
            return None;
        }
        let t = (frame - self.start_frame) as f64;
        Some((
            self.origin.0 + self.velocity.0 * t,
            self.origin.1 + self.velocity.1 * t + 0.5 * self.gravity * t * t,
        ))
    }
}

/// A dark rectangle drifting across the court.
#[derive(Debug, Clone, PartialEq)]
pub struct MockPlayer {
    pub origin: (f64, f64),
    pub velocity: (f64, f64),
    pub size: (u32, u32),
}

impl MockPlayer {
    fn top_left(&self, frame: u64) -> (f64, f64) {
        let t = frame as f64;
        (
            self.origin.0 + self.velocity.0 * t,
            self.origin.1 + self.velocity.1 * t,
        )
    }
}

/// Deterministic synthetic broadcast used when no real decoder is wanted.
#[derive(Debug, Clone, PartialEq)]
pub struct MockScene {
    pub width: u32,
    pub height: u32,
    pub frame_count: u64,
    pub fps: f64,
    pub ball_radius: f64,
    pub balls: Vec<MockBall>,
    pub players: Vec<MockPlayer>,
    /// Frames where every ball is occluded.
    pub hidden_frames: Vec<u64>,
    /// Frames actually emitted; models containers that end before their declared length.
    pub truncate_at: Option<u64>,
    pub frame_interval: Duration,
}

impl Default for MockScene {
    fn default() -> Self {
        let near = (340.0, 480.0);
        let far = (940.0, 250.0);
        let shot_frames = 30u64;
        let mut balls = Vec::new();
        let mut start = 40u64;
        for shot in 0..6 {
            let (from, to) = if shot % 2 == 0 { (near, far) } else { (far, near) };
            let velocity = (
                (to.0 - from.0) / shot_frames as f64,
                (to.1 - from.1) / shot_frames as f64,
            );
            balls.push(MockBall::linear(start, start + shot_frames - 1, from, velocity));
            start += shot_frames;
        }
        Self {
            width: 1280,
            height: 720,
            frame_count: 300,
            fps: 25.0,
            ball_radius: 5.0,
            balls,
            players: vec![
                MockPlayer {
                    origin: (240.0, 430.0),
                    velocity: (0.3, 0.0),
                    size: (44, 120),
                },
                MockPlayer {
                    origin: (1000.0, 170.0),
                    velocity: (-0.2, 0.1),
                    size: (32, 90),
                },
            ],
            hidden_frames: Vec::new(),
            truncate_at: None,
            frame_interval: Duration::ZERO,
        }
    }
}

impl MockScene {
    /// An empty court with no moving objects.
    pub fn empty(width: u32, height: u32, frame_count: u64) -> Self {
        Self {
            width,
            height,
            frame_count,
            balls: Vec::new(),
            players: Vec::new(),
            ..Self::default()
        }
    }

    pub fn ball_positions(&self, frame: u64) -> Vec<(f64, f64)> {
        if self.hidden_frames.contains(&frame) {
            return Vec::new();
        }
        self.balls
            .iter()
            .filter_map(|ball| ball.position(frame))
            .collect()
    }

    pub fn render(&self, frame: u64) -> RgbFrame {
        let mut image = RgbFrame::filled(self.width, self.height, SURROUND_COLOR);
        let (w, h) = (self.width as i64, self.height as i64);
        let court = (w / 8, h / 6, w - w / 8, h - h / 12);
        fill_rect(&mut image, court.0, court.1, court.2, court.3, COURT_COLOR);
        let line = (h / 240).max(1);
        fill_rect(&mut image, court.0, court.1, court.2, court.1 + line, LINE_COLOR);
        fill_rect(&mut image, court.0, court.3 - line, court.2, court.3, LINE_COLOR);
        fill_rect(&mut image, court.0, court.1, court.0 + line, court.3, LINE_COLOR);
        fill_rect(&mut image, court.2 - line, court.1, court.2, court.3, LINE_COLOR);
        let net = (court.1 + court.3) / 2;
        fill_rect(&mut image, court.0, net - line, court.2, net + line, LINE_COLOR);

        for player in &self.players {
            let (x, y) = player.top_left(frame);
            let (x, y) = (x.round() as i64, y.round() as i64);
            fill_rect(
                &mut image,
                x,
                y,
                x + player.size.0 as i64,
                y + player.size.1 as i64,
                PLAYER_COLOR,
            );
        }
        for (x, y) in self.ball_positions(frame) {
            fill_disc(&mut image, x, y, self.ball_radius, BALL_COLOR);
        }
        image
    }
}

fn fill_rect(image: &mut RgbFrame, x0: i64, y0: i64, x1: i64, y1: i64, rgb: [u8; 3]) {
    let width = image.width() as usize;
    let x0 = x0.clamp(0, width as i64) as usize;
    let x1 = x1.clamp(0, width as i64) as usize;
    let y0 = y0.clamp(0, image.height() as i64) as usize;
    let y1 = y1.clamp(0, image.height() as i64) as usize;
    if x0 >= x1 {
        return;
    }
    let data = image.data_mut();
    for y in y0..y1 {
        let row = &mut data[(y * width + x0) * 3..(y * width + x1) * 3];
        for pixel in row.chunks_exact_mut(3) {
            pixel.copy_from_slice(&rgb);
        }
    }
}

fn fill_disc(image: &mut RgbFrame, cx: f64, cy: f64, radius: f64, rgb: [u8; 3]) {
    let r2 = radius * radius;
    let x0 = (cx - radius).floor().max(0.0) as u32;
    let y0 = (cy - radius).floor().max(0.0) as u32;
    let x1 = ((cx + radius).ceil() as i64).clamp(0, image.width() as i64 - 1);
    let y1 = ((cy + radius).ceil() as i64).clamp(0, image.height() as i64 - 1);
    if x1 < 0 || y1 < 0 {
        return;
    }
    for y in y0..=y1 as u32 {
        for x in x0..=x1 as u32 {
            let dx = x as f64 + 0.5 - cx;
            let dy = y as f64 + 0.5 - cy;
            if dx * dx + dy * dy <= r2 {
                image.set_pixel(x, y, rgb);
            }
        }
    }
}

pub struct MockProvider {
    scene: MockScene,
    channel_capacity: usize,
}

impl MockProvider {
    const DEFAULT_CHANNEL_CAPACITY: usize = 8;

    pub fn new(scene: MockScene, channel_capacity: Option<usize>) -> Self {
        Self {
            scene,
            channel_capacity: channel_capacity
                .unwrap_or(Self::DEFAULT_CHANNEL_CAPACITY)
                .max(1),
        }
    }

    fn emit_frames(&self, tx: Sender<FrameResult<RgbFrame>>) {
        let end = self
            .scene
            .truncate_at
            .unwrap_or(self.scene.frame_count)
            .min(self.scene.frame_count);
        for index in 0..end {
            if tx.is_closed() {
                break;
            }
            let timestamp = Duration::from_secs_f64(index as f64 / self.scene.fps);
            let frame = self
                .scene
                .render(index)
                .with_timestamp(Some(timestamp))
                .with_frame_index(Some(index));
            if tx.blocking_send(Ok(frame)).is_err() {
                break;
            }
            if !self.scene.frame_interval.is_zero() {
                thread::sleep(self.scene.frame_interval);
            }
        }
    }
}

impl FrameStreamProvider for MockProvider {
    fn metadata(&self) -> VideoMetadata {
        VideoMetadata {
            duration: Some(Duration::from_secs_f64(
                self.scene.frame_count as f64 / self.scene.fps,
            )),
            fps: Some(self.scene.fps),
            width: Some(self.scene.width),
            height: Some(self.scene.height),
            total_frames: Some(self.scene.frame_count),
        }
    }

    fn into_stream(self: Box<Self>) -> FrameStream {
        let provider = *self;
        let capacity = provider.channel_capacity;
        spawn_stream_from_channel(capacity, move |tx| {
            provider.emit_frames(tx);
        })
    }
}

pub fn boxed_mock(scene: MockScene, channel_capacity: Option<usize>) -> FrameResult<DynFrameProvider> {
    Ok(Box::new(MockProvider::new(scene, channel_capacity)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[tokio::test(flavor = "multi_thread")]
    async fn mock_backend_emits_frames() {
        let provider = boxed_mock(MockScene::default(), None).unwrap();
        let metadata = provider.metadata();
        assert_eq!(metadata.total_frames, Some(300));
        let mut stream = provider.into_stream();
        let frame = stream.next().await.unwrap().unwrap();
        assert_eq!(frame.width(), 1280);
        assert_eq!(frame.height(), 720);
        assert_eq!(frame.data().len(), 1280 * 720 * 3);
        assert_eq!(frame.frame_index(), Some(0));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn truncated_scene_stops_early() {
        let mut scene = MockScene::empty(32, 18, 20);
        scene.truncate_at = Some(5);
        let provider = boxed_mock(scene, Some(2)).unwrap();
        assert_eq!(provider.metadata().total_frames, Some(20));
        let frames: Vec<_> = provider.into_stream().collect().await;
        assert_eq!(frames.len(), 5);
    }

    #[test]
    fn ball_is_drawn_unless_hidden() {
        let mut scene = MockScene::empty(200, 100, 10);
        scene.balls.push(MockBall::linear(0, 9, (50.0, 50.0), (10.0, 0.0)));
        scene.hidden_frames.push(3);
        let frame = scene.render(2);
        assert_eq!(frame.pixel(70, 50), BALL_COLOR);
        let hidden = scene.render(3);
        assert_ne!(hidden.pixel(80, 50), BALL_COLOR);
        assert!(scene.ball_positions(3).is_empty());
        assert_eq!(scene.ball_positions(4), vec![(90.0, 50.0)]);
    }
}
