//! Per-frame ball candidate extraction from motion and background masks.

use std::sync::Arc;

use rally_cut_types::{BallPosition, FrameSize, ResolutionDependent, RgbFrame, ScaleContext};
use serde::{Deserialize, Serialize};

use crate::background::Background;
use crate::components::{Component, Labeler};
use crate::error::{DetectorError, DetectorResult};
use crate::mask;
use crate::preview::PreviewWriter;

// Dilation that fuses the moving parts of one player into a single blob.
const CONNECTION_DILATION: ResolutionDependent = ResolutionDependent::length(4.0);
// Dilated blobs at or below this area are noise.
const CONNECTION_AREA: ResolutionDependent = ResolutionDependent::area(100.0);
// Opening applied to the background delta before looking for players.
const PLAYER_OPENING: ResolutionDependent = ResolutionDependent::length(1.0);
// Safety margin grown around every player blob.
const PLAYER_MARGIN: ResolutionDependent = ResolutionDependent::length(6.0);
const BALL_EROSION: ResolutionDependent = ResolutionDependent::length(1.0);
// Squared distance between a candidate and the eroded blob confirming it.
const CONFIRM_DISTANCE_SQ: ResolutionDependent = ResolutionDependent::area(100.0);
const MIN_ASPECT_RATIO: f64 = 0.5;
const MAX_ASPECT_RATIO: f64 = 2.0;

/// User-tunable detection settings, expressed at the 720p reference.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionParams {
    /// Per-channel difference that counts as a change. Not resolution dependent.
    pub min_brightness: u8,
    pub min_player_area: f64,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            min_brightness: 25,
            min_player_area: 1200.0,
        }
    }
}

impl DetectionParams {
    pub fn resolve(&self, scale: &ScaleContext) -> DetectionThresholds {
        DetectionThresholds {
            min_brightness: self.min_brightness,
            min_player_area: scale.resolve(ResolutionDependent::area(self.min_player_area)),
            connection_dilation: scale.resolve_count(CONNECTION_DILATION),
            connection_area: scale.resolve(CONNECTION_AREA),
            player_opening: scale.resolve_count(PLAYER_OPENING),
            player_margin: scale.resolve_count(PLAYER_MARGIN),
            ball_erosion: scale.resolve_count(BALL_EROSION),
            confirm_distance_sq: scale.resolve(CONFIRM_DISTANCE_SQ),
        }
    }
}

/// Detection thresholds resolved for one analysis resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionThresholds {
    pub min_brightness: u8,
    pub min_player_area: f64,
    pub connection_dilation: usize,
    pub connection_area: f64,
    pub player_opening: usize,
    pub player_margin: usize,
    pub ball_erosion: usize,
    pub confirm_distance_sq: f64,
}

struct Job {
    frame_index: u64,
    previous: Arc<RgbFrame>,
    current: Arc<RgbFrame>,
    background: Arc<Background>,
}

#[derive(Default)]
struct Workspace {
    time_delta: Vec<u8>,
    background_delta: Vec<u8>,
    dilated: Vec<u8>,
    scratch: Vec<u8>,
    opened: Vec<u8>,
    players: Vec<u8>,
    player_zone: Vec<u8>,
    cleaned: Vec<u8>,
    eroded: Vec<u8>,
    labeler: Labeler,
    pixel_sums: Vec<(f64, f64, usize)>,
}

/// Holds at most one assigned frame; reuses its mask buffers between frames.
pub struct FrameBallExtractor {
    thresholds: DetectionThresholds,
    size: FrameSize,
    job: Option<Job>,
    workspace: Workspace,
    preview: Option<PreviewWriter>,
}

impl FrameBallExtractor {
    pub fn new(thresholds: DetectionThresholds, size: FrameSize) -> Self {
        Self {
            thresholds,
            size,
            job: None,
            workspace: Workspace::default(),
            preview: None,
        }
    }

    pub fn with_preview(mut self, preview: Option<PreviewWriter>) -> Self {
        self.preview = preview;
        self
    }

    pub fn thresholds(&self) -> &DetectionThresholds {
        &self.thresholds
    }

    pub fn assigned_frame(&self) -> Option<u64> {
        self.job.as_ref().map(|job| job.frame_index)
    }

    pub fn is_idle(&self) -> bool {
        self.job.is_none()
    }

    pub fn assign(
        &mut self,
        frame_index: u64,
        previous: Arc<RgbFrame>,
        current: Arc<RgbFrame>,
        background: Arc<Background>,
    ) -> DetectorResult<()> {
        if let Some(job) = &self.job {
            return Err(DetectorError::Busy {
                frame: job.frame_index,
            });
        }
        for image in [previous.as_ref(), current.as_ref(), background.image()] {
            if image.size() != self.size {
                return Err(DetectorError::SizeMismatch {
                    frame: frame_index,
                    actual: image.size(),
                    expected: self.size,
                });
            }
        }
        self.job = Some(Job {
            frame_index,
            previous,
            current,
            background,
        });
        Ok(())
    }

    /// Runs the assigned job and releases it.
    pub fn extract(&mut self) -> DetectorResult<Vec<BallPosition>> {
        let job = self.job.take().ok_or(DetectorError::NotAssigned)?;
        let balls = self.find_balls(&job);
        if let Some(preview) = &self.preview {
            preview.write(job.frame_index, &job.current, &balls);
        }
        Ok(balls)
    }

    fn find_balls(&mut self, job: &Job) -> Vec<BallPosition> {
        let width = self.size.width as usize;
        let height = self.size.height as usize;
        let t = self.thresholds;
        let ws = &mut self.workspace;

        mask::delta_mask_into(&job.current, &job.previous, t.min_brightness, &mut ws.time_delta);
        mask::delta_mask_into(
            job.background.image(),
            &job.current,
            t.min_brightness,
            &mut ws.background_delta,
        );
        mask::and_in_place(&mut ws.time_delta, &ws.background_delta);

        let candidates = round_blob_candidates(ws, width, height, &t);
        if candidates.is_empty() {
            return candidates;
        }

        // Large blobs in the background delta are players or scene noise.
        mask::erode_into(
            &ws.background_delta,
            width,
            height,
            t.player_opening,
            &mut ws.dilated,
            &mut ws.scratch,
        );
        mask::dilate_into(
            &ws.dilated,
            width,
            height,
            t.player_opening,
            &mut ws.opened,
            &mut ws.scratch,
        );
        let blobs = ws.labeler.label(&ws.opened, width, height);
        ws.players.clear();
        ws.players.resize(width * height, 0);
        let labels = ws.labeler.labels();
        for (pixel, label) in labels.iter().enumerate() {
            if *label != 0 && blobs[*label as usize - 1].area as f64 > 2.0 * t.min_player_area {
                ws.players[pixel] = 1;
            }
        }
        mask::dilate_into(
            &ws.players,
            width,
            height,
            t.player_margin,
            &mut ws.player_zone,
            &mut ws.scratch,
        );
        mask::remove_isolated_into(&ws.time_delta, width, height, &mut ws.cleaned);
        mask::subtract_in_place(&mut ws.cleaned, &ws.player_zone);

        mask::erode_into(
            &ws.cleaned,
            width,
            height,
            t.ball_erosion,
            &mut ws.eroded,
            &mut ws.scratch,
        );
        let confirmations: Vec<(f64, f64)> = ws
            .labeler
            .label(&ws.eroded, width, height)
            .iter()
            .map(Component::centroid)
            .collect();
        candidates
            .into_iter()
            .filter(|candidate| {
                confirmations.iter().any(|(x, y)| {
                    let dx = candidate.x - x;
                    let dy = candidate.y - y;
                    dx * dx + dy * dy <= t.confirm_distance_sq
                })
            })
            .collect()
    }
}

/// Roughly round, mid-sized blobs of the dilated motion mask, located at the
/// centroid of their undilated motion pixels.
fn round_blob_candidates(
    ws: &mut Workspace,
    width: usize,
    height: usize,
    t: &DetectionThresholds,
) -> Vec<BallPosition> {
    mask::dilate_into(
        &ws.time_delta,
        width,
        height,
        t.connection_dilation,
        &mut ws.dilated,
        &mut ws.scratch,
    );
    let blobs = ws.labeler.label(&ws.dilated, width, height);
    if blobs.is_empty() {
        return Vec::new();
    }
    ws.pixel_sums.clear();
    ws.pixel_sums.resize(blobs.len(), (0.0, 0.0, 0));
    let labels = ws.labeler.labels();
    for (pixel, value) in ws.time_delta.iter().enumerate() {
        let label = labels[pixel];
        if *value == 0 || label == 0 {
            continue;
        }
        let entry = &mut ws.pixel_sums[label as usize - 1];
        entry.0 += (pixel % width) as f64 + 0.5;
        entry.1 += (pixel / width) as f64 + 0.5;
        entry.2 += 1;
    }
    blobs
        .iter()
        .zip(ws.pixel_sums.iter())
        .filter(|(blob, sums)| {
            let area = blob.area as f64;
            let aspect = blob.aspect_ratio();
            sums.2 > 0
                && area > t.connection_area
                && area < t.min_player_area
                && (MIN_ASPECT_RATIO..=MAX_ASPECT_RATIO).contains(&aspect)
        })
        .map(|(_, sums)| BallPosition::new(sums.0 / sums.2 as f64, sums.1 / sums.2 as f64))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rally_cut_decoder::MockBall;
    use rally_cut_decoder::MockScene;

    fn thresholds_for(height: u32) -> DetectionThresholds {
        DetectionParams::default().resolve(&ScaleContext::for_height(height))
    }

    fn background_for(scene: &MockScene) -> Arc<Background> {
        let empty = MockScene {
            balls: Vec::new(),
            players: Vec::new(),
            ..scene.clone()
        };
        Arc::new(Background::from_image(0, 100, empty.render(0)))
    }

    #[test]
    fn resolved_thresholds_follow_the_scale() {
        let full = thresholds_for(720);
        let half = thresholds_for(360);
        assert_eq!(full.connection_dilation, 4);
        assert_eq!(half.connection_dilation, 2);
        assert_eq!(half.min_player_area, 300.0);
        assert_eq!(half.confirm_distance_sq, 25.0);
        assert_eq!(half.min_brightness, full.min_brightness);
    }

    #[test]
    fn busy_extractor_rejects_second_assignment() {
        let scene = MockScene::empty(64, 36, 2);
        let frame = Arc::new(scene.render(0));
        let background = background_for(&scene);
        let mut extractor = FrameBallExtractor::new(thresholds_for(36), FrameSize::new(64, 36));
        extractor
            .assign(1, Arc::clone(&frame), Arc::clone(&frame), Arc::clone(&background))
            .unwrap();
        let err = extractor
            .assign(2, Arc::clone(&frame), Arc::clone(&frame), Arc::clone(&background))
            .unwrap_err();
        assert!(matches!(err, DetectorError::Busy { frame: 1 }));
        assert!(extractor.extract().unwrap().is_empty());
        assert!(extractor.is_idle());
        assert!(matches!(extractor.extract(), Err(DetectorError::NotAssigned)));
    }

    #[test]
    fn mismatched_sizes_are_rejected() {
        let scene = MockScene::empty(64, 36, 2);
        let frame = Arc::new(scene.render(0));
        let background = background_for(&scene);
        let mut extractor = FrameBallExtractor::new(thresholds_for(36), FrameSize::new(32, 18));
        assert!(matches!(
            extractor.assign(0, Arc::clone(&frame), frame, background),
            Err(DetectorError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn moving_ball_is_found() {
        let mut scene = MockScene::empty(640, 360, 10);
        scene.ball_radius = 3.0;
        scene.balls.push(MockBall::linear(0, 9, (200.0, 150.0), (12.0, 4.0)));
        let background = background_for(&scene);
        let mut extractor = FrameBallExtractor::new(thresholds_for(360), FrameSize::new(640, 360));
        extractor
            .assign(5, Arc::new(scene.render(4)), Arc::new(scene.render(5)), background)
            .unwrap();
        let balls = extractor.extract().unwrap();
        assert_eq!(balls.len(), 1);
        let expected = BallPosition::new(260.0, 170.0);
        assert!(balls[0].distance_sq(&expected) < 1.0, "{balls:?}");
    }

    #[test]
    fn static_scene_has_no_candidates() {
        let scene = MockScene::empty(320, 180, 3);
        let background = background_for(&scene);
        let mut extractor = FrameBallExtractor::new(thresholds_for(180), FrameSize::new(320, 180));
        let frame = Arc::new(scene.render(1));
        extractor
            .assign(1, Arc::new(scene.render(0)), frame, background)
            .unwrap();
        assert!(extractor.extract().unwrap().is_empty());
    }

    #[test]
    fn ball_touching_a_player_is_suppressed() {
        let mut scene = MockScene::empty(640, 360, 10);
        scene.ball_radius = 3.0;
        scene.players.push(rally_cut_decoder::MockPlayer {
            origin: (250.0, 140.0),
            velocity: (0.0, 0.0),
            size: (30, 60),
        });
        scene.balls.push(MockBall::linear(0, 9, (230.0, 160.0), (6.0, 0.0)));
        let background = background_for(&scene);
        let mut extractor = FrameBallExtractor::new(thresholds_for(360), FrameSize::new(640, 360));
        extractor
            .assign(3, Arc::new(scene.render(2)), Arc::new(scene.render(3)), background)
            .unwrap();
        assert!(extractor.extract().unwrap().is_empty());
    }
}
