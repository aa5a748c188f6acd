//! Grows smooth ball trajectories out of the per-frame candidate table.

use std::collections::HashSet;

use rally_cut_types::{BallPosition, BallTable, ResolutionDependent, ScaleContext};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::arc::{ArcBallData, BallArc, angle_between, norm_sq, velocity_between};

/// Arc extraction settings, expressed at the 720p reference.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArcParams {
    /// Frames searched on each side of an arc end.
    pub search_window: u64,
    pub max_speed_sq: f64,
    /// Squared per-frame speed under which direction is not trusted.
    pub noise_speed_sq: f64,
    /// Largest accepted ratio between consecutive speeds.
    pub speed_ratio: f64,
    pub max_turn_angle: f64,
    pub relaxed_turn_angle: f64,
    /// Squared speed under which the relaxed turn angle applies.
    pub slow_speed_sq: f64,
    /// Arcs this long may accept sharper turns that fit their extrapolation.
    pub long_arc_points: usize,
    pub extrapolation_distance_sq: f64,
    pub min_points: usize,
    pub consistency_points: usize,
    pub consistency_displacement_sq: f64,
    pub consistency_density: f64,
}

impl Default for ArcParams {
    fn default() -> Self {
        Self {
            search_window: 10,
            max_speed_sq: 3600.0,
            noise_speed_sq: 4.0,
            speed_ratio: 2.5,
            max_turn_angle: 15.0,
            relaxed_turn_angle: 45.0,
            slow_speed_sq: 25.0,
            long_arc_points: 8,
            extrapolation_distance_sq: 36.0,
            min_points: 4,
            consistency_points: 4,
            consistency_displacement_sq: 1000.0,
            consistency_density: 0.5,
        }
    }
}

impl ArcParams {
    pub fn resolve(&self, scale: &ScaleContext) -> ArcThresholds {
        let area = |value| scale.resolve(ResolutionDependent::area(value));
        ArcThresholds {
            search_window: self.search_window.max(1),
            max_speed_sq: area(self.max_speed_sq),
            noise_speed_sq: area(self.noise_speed_sq),
            speed_ratio: self.speed_ratio,
            max_turn_angle: self.max_turn_angle,
            relaxed_turn_angle: self.relaxed_turn_angle,
            slow_speed_sq: area(self.slow_speed_sq),
            long_arc_points: self.long_arc_points,
            extrapolation_distance_sq: area(self.extrapolation_distance_sq),
            min_points: self.min_points,
            consistency_points: self.consistency_points,
            consistency_displacement_sq: area(self.consistency_displacement_sq),
            consistency_density: self.consistency_density,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArcThresholds {
    pub search_window: u64,
    pub max_speed_sq: f64,
    pub noise_speed_sq: f64,
    pub speed_ratio: f64,
    pub max_turn_angle: f64,
    pub relaxed_turn_angle: f64,
    pub slow_speed_sq: f64,
    pub long_arc_points: usize,
    pub extrapolation_distance_sq: f64,
    pub min_points: usize,
    pub consistency_points: usize,
    pub consistency_displacement_sq: f64,
    pub consistency_density: f64,
}

impl Default for ArcThresholds {
    fn default() -> Self {
        ArcParams::default().resolve(&ScaleContext::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

struct Pick {
    frame: u64,
    ball_index: usize,
    position: BallPosition,
    correlation: f64,
}

pub struct ArcExtractor<'a> {
    table: &'a BallTable,
    thresholds: ArcThresholds,
}

impl<'a> ArcExtractor<'a> {
    pub fn new(table: &'a BallTable, thresholds: ArcThresholds) -> Self {
        Self { table, thresholds }
    }

    pub fn thresholds(&self) -> &ArcThresholds {
        &self.thresholds
    }

    /// Arc grown around ball `ball_index` of `frame`, or `None` when no smooth
    /// trajectory passes through it.
    pub fn get_arc(&self, frame: u64, ball_index: usize) -> Option<BallArc> {
        self.grow(frame, ball_index, &HashSet::new())
    }

    /// Like [`Self::get_arc`], ignoring balls listed in `used`.
    fn grow(&self, frame: u64, ball_index: usize, used: &HashSet<(u64, usize)>) -> Option<BallArc> {
        let seed = self.table.ball(frame as usize, ball_index)?;
        let mut arc = self.seed_arc(frame, ball_index, seed, used)?;
        self.propagate(&mut arc, Direction::Forward, used);
        self.propagate(&mut arc, Direction::Backward, used);

        if arc.len() < self.thresholds.min_points {
            return None;
        }
        let stats = arc.stats();
        if stats.average_speed_sq < self.thresholds.noise_speed_sq / 2.0 {
            debug!(
                frame,
                ball = ball_index,
                speed = stats.average_speed_sq,
                "dropping slow arc"
            );
            return None;
        }
        Some(arc)
    }

    /// Seed is the best back/forward pair around the ball: colinear and short.
    fn seed_arc(
        &self,
        frame: u64,
        ball_index: usize,
        seed: BallPosition,
        used: &HashSet<(u64, usize)>,
    ) -> Option<BallArc> {
        let window = self.thresholds.search_window;
        let mut best: Option<(f64, Pick, Pick)> = None;

        for back_frame in (frame.saturating_sub(window)..frame).rev() {
            for (back_index, back) in self.balls_at(back_frame, used) {
                let back_vec = velocity_between(&back, &seed, frame - back_frame);
                if norm_sq(back_vec) >= self.thresholds.max_speed_sq {
                    continue;
                }
                for forward_frame in frame + 1..=frame + window {
                    for (forward_index, forward) in self.balls_at(forward_frame, used) {
                        let forward_vec = velocity_between(&seed, &forward, forward_frame - frame);
                        if norm_sq(forward_vec) >= self.thresholds.max_speed_sq {
                            continue;
                        }
                        let angle = angle_between(forward_vec, back_vec);
                        if angle >= self.seed_turn_limit(back_vec, forward_vec) {
                            continue;
                        }
                        let cost = angle + norm_sq(forward_vec) + norm_sq(back_vec);
                        if best.as_ref().is_none_or(|(best_cost, _, _)| cost < *best_cost) {
                            best = Some((
                                cost,
                                Pick {
                                    frame: back_frame,
                                    ball_index: back_index,
                                    position: back,
                                    correlation: cost,
                                },
                                Pick {
                                    frame: forward_frame,
                                    ball_index: forward_index,
                                    position: forward,
                                    correlation: cost,
                                },
                            ));
                        }
                    }
                }
            }
        }

        let (cost, back, forward) = best?;
        if cost > 2.0 * self.thresholds.max_speed_sq + self.thresholds.max_turn_angle {
            return None;
        }
        BallArc::from_balls([
            ArcBallData::new(back.frame, back.ball_index, back.position)
                .with_correlation(back.correlation),
            ArcBallData::new(frame, ball_index, seed).with_correlation(cost),
            ArcBallData::new(forward.frame, forward.ball_index, forward.position)
                .with_correlation(forward.correlation),
        ])
    }

    /// Turn allowed between the two seed steps; slow steps get the relaxed angle.
    fn seed_turn_limit(&self, back_vec: (f64, f64), forward_vec: (f64, f64)) -> f64 {
        let t = &self.thresholds;
        if norm_sq(back_vec).min(norm_sq(forward_vec)) < t.slow_speed_sq {
            t.relaxed_turn_angle
        } else {
            t.max_turn_angle
        }
    }

    fn propagate(&self, arc: &mut BallArc, direction: Direction, used: &HashSet<(u64, usize)>) {
        while let Some(pick) = self.next_ball(arc, direction, used) {
            let ball = ArcBallData::new(pick.frame, pick.ball_index, pick.position)
                .with_correlation(pick.correlation);
            match direction {
                Direction::Forward => arc.push_back(ball),
                Direction::Backward => arc.push_front(ball),
            }
            arc.refresh_kinematics();
        }
    }

    /// Best accepted candidate at the nearest frame in the search window.
    fn next_ball(
        &self,
        arc: &BallArc,
        direction: Direction,
        used: &HashSet<(u64, usize)>,
    ) -> Option<Pick> {
        let anchor = match direction {
            Direction::Forward => arc.last(),
            Direction::Backward => arc.first(),
        };
        let window = self.thresholds.search_window;
        let frames: Vec<u64> = match direction {
            Direction::Forward => (anchor.frame + 1..=anchor.frame + window).collect(),
            Direction::Backward => (anchor.frame.saturating_sub(window)..anchor.frame)
                .rev()
                .collect(),
        };

        for frame in frames {
            let mut best: Option<Pick> = None;
            for (ball_index, position) in self.balls_at(frame, used) {
                let Some(correlation) = self.score(arc, anchor, frame, position, direction) else {
                    continue;
                };
                if best.as_ref().is_none_or(|b| correlation < b.correlation) {
                    best = Some(Pick {
                        frame,
                        ball_index,
                        position,
                        correlation,
                    });
                }
            }
            if best.is_some() {
                return best;
            }
        }
        None
    }

    /// Correlation of extending `arc` with `position` at `frame`, or `None` if rejected.
    fn score(
        &self,
        arc: &BallArc,
        anchor: &ArcBallData,
        frame: u64,
        position: BallPosition,
        direction: Direction,
    ) -> Option<f64> {
        let t = &self.thresholds;
        let gap = frame.abs_diff(anchor.frame);
        let velocity = match direction {
            Direction::Forward => velocity_between(&anchor.position, &position, gap),
            Direction::Backward => velocity_between(&position, &anchor.position, gap),
        };
        let speed_sq = norm_sq(velocity);
        if speed_sq >= t.max_speed_sq {
            return None;
        }

        let previous_speed_sq = anchor.speed_sq;
        let both_noisy = speed_sq < t.noise_speed_sq && previous_speed_sq < t.noise_speed_sq;
        if !both_noisy {
            let (low, high) = if speed_sq < previous_speed_sq {
                (speed_sq, previous_speed_sq)
            } else {
                (previous_speed_sq, speed_sq)
            };
            if low <= 0.0 || (high / low).sqrt() > t.speed_ratio {
                return None;
            }
        }

        let angle = angle_between(anchor.velocity, velocity);
        let max_angle = if speed_sq.min(previous_speed_sq) < t.slow_speed_sq {
            t.relaxed_turn_angle
        } else {
            t.max_turn_angle
        };
        if angle >= max_angle && !self.fits_extrapolation(arc, anchor, position, gap, direction) {
            return None;
        }

        let dv = (velocity.0 - anchor.velocity.0, velocity.1 - anchor.velocity.1);
        Some(angle + norm_sq(dv))
    }

    fn fits_extrapolation(
        &self,
        arc: &BallArc,
        anchor: &ArcBallData,
        position: BallPosition,
        gap: u64,
        direction: Direction,
    ) -> bool {
        if arc.len() < self.thresholds.long_arc_points {
            return false;
        }
        let sign = match direction {
            Direction::Forward => 1.0,
            Direction::Backward => -1.0,
        };
        let steps = gap as f64 * sign;
        let predicted = BallPosition::new(
            anchor.position.x + anchor.velocity.0 * steps,
            anchor.position.y + anchor.velocity.1 * steps,
        );
        predicted.distance_sq(&position) <= self.thresholds.extrapolation_distance_sq
    }

    fn balls_at<'s>(
        &'s self,
        frame: u64,
        used: &'s HashSet<(u64, usize)>,
    ) -> impl Iterator<Item = (usize, BallPosition)> + 's {
        self.table
            .balls(frame as usize)
            .iter()
            .copied()
            .enumerate()
            .filter(move |(index, _)| !used.contains(&(frame, *index)))
    }

    pub fn is_consistent(&self, arc: &BallArc) -> bool {
        arc.is_consistent(
            self.thresholds.consistency_points,
            self.thresholds.consistency_displacement_sq,
            self.thresholds.consistency_density,
        )
    }

    /// Every consistent arc of the table in frame order. Balls claimed by an
    /// arc are not reused by later ones.
    pub fn extract_arcs(&self) -> Vec<BallArc> {
        let mut used: HashSet<(u64, usize)> = HashSet::new();
        let mut arcs = Vec::new();
        for (frame, balls) in self.table.iter_processed() {
            let frame = frame as u64;
            for ball_index in 0..balls.len() {
                if used.contains(&(frame, ball_index)) {
                    continue;
                }
                let Some(arc) = self.grow(frame, ball_index, &used) else {
                    continue;
                };
                if !self.is_consistent(&arc) {
                    continue;
                }
                used.extend(arc.balls().map(|ball| (ball.frame, ball.ball_index)));
                arcs.push(arc);
            }
        }
        debug!(arcs = arcs.len(), "arc extraction finished");
        arcs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_table(
        frames: usize,
        range: std::ops::RangeInclusive<usize>,
        skip: &[usize],
        origin: (f64, f64),
        velocity: (f64, f64),
    ) -> BallTable {
        let mut table = BallTable::new(frames);
        for frame in 0..frames {
            let balls = if range.contains(&frame) && !skip.contains(&frame) {
                let t = (frame - range.start()) as f64;
                vec![BallPosition::new(origin.0 + velocity.0 * t, origin.1 + velocity.1 * t)]
            } else {
                Vec::new()
            };
            table.set(frame, balls);
        }
        table
    }

    #[test]
    fn constant_velocity_yields_one_straight_arc() {
        let table = linear_table(100, 10..=40, &[], (100.0, 200.0), (6.0, 2.0));
        let extractor = ArcExtractor::new(&table, ArcThresholds::default());
        let arcs = extractor.extract_arcs();
        assert_eq!(arcs.len(), 1);
        let arc = &arcs[0];
        assert_eq!(arc.start_frame(), 10);
        assert_eq!(arc.end_frame(), 40);
        assert_eq!(arc.len(), 31);
        assert!(arc.stats().average_angle < 1e-6);
        assert!(arc.frames_strictly_increasing());
    }

    #[test]
    fn short_dropout_is_bridged() {
        let table = linear_table(100, 10..=40, &[20, 21], (100.0, 200.0), (6.0, 2.0));
        let extractor = ArcExtractor::new(&table, ArcThresholds::default());
        let arcs = extractor.extract_arcs();
        assert_eq!(arcs.len(), 1);
        assert_eq!(arcs[0].start_frame(), 10);
        assert_eq!(arcs[0].end_frame(), 40);
        assert_eq!(arcs[0].len(), 29);
        let after_gap = arcs[0].get(22).unwrap();
        assert!((after_gap.velocity.0 - 6.0).abs() < 1e-9);
    }

    #[test]
    fn noise_ball_off_the_line_is_ignored() {
        let mut table = linear_table(60, 5..=30, &[], (50.0, 50.0), (5.0, 5.0));
        let mut frame_15 = table.balls(15).to_vec();
        frame_15.insert(0, BallPosition::new(600.0, 20.0));
        table.set(15, frame_15);
        let extractor = ArcExtractor::new(&table, ArcThresholds::default());
        let arc = extractor.get_arc(10, 0).unwrap();
        let picked = arc.get(15).unwrap();
        assert_eq!(picked.ball_index, 1);
        assert_eq!(arc.start_frame(), 5);
        assert_eq!(arc.end_frame(), 30);
    }

    #[test]
    fn sharp_turn_splits_the_trajectory() {
        let mut table = BallTable::new(40);
        for frame in 0..40usize {
            let t = frame as f64;
            let ball = if frame <= 15 {
                BallPosition::new(100.0 + 8.0 * t, 300.0)
            } else {
                BallPosition::new(220.0, 300.0 - 8.0 * (t - 15.0))
            };
            table.set(frame, vec![ball]);
        }
        let extractor = ArcExtractor::new(&table, ArcThresholds::default());
        let arc = extractor.get_arc(5, 0).unwrap();
        assert_eq!(arc.start_frame(), 0);
        assert_eq!(arc.end_frame(), 15);
    }

    #[test]
    fn slow_zigzag_is_not_seeded() {
        let mut table = BallTable::new(30);
        for frame in 0..30 {
            table.set(frame, Vec::new());
        }
        // Two pixels per frame, reversing at every step.
        table.set(10, vec![BallPosition::new(200.0, 200.0)]);
        table.set(11, vec![BallPosition::new(202.0, 200.0)]);
        table.set(12, vec![BallPosition::new(200.0, 200.3)]);
        let extractor = ArcExtractor::new(&table, ArcThresholds::default());
        assert!(extractor.seed_arc(11, 0, BallPosition::new(202.0, 200.0), &HashSet::new()).is_none());
        assert!(extractor.get_arc(11, 0).is_none());
    }

    #[test]
    fn fast_seed_must_be_nearly_straight() {
        let mut table = BallTable::new(30);
        for frame in 0..30 {
            table.set(frame, Vec::new());
        }
        table.set(10, vec![BallPosition::new(100.0, 100.0)]);
        table.set(11, vec![BallPosition::new(120.0, 100.0)]);
        // 30 degree turn at 20 px/frame.
        table.set(12, vec![BallPosition::new(137.32, 110.0)]);
        let extractor = ArcExtractor::new(&table, ArcThresholds::default());
        let seed = BallPosition::new(120.0, 100.0);
        assert!(extractor.seed_arc(11, 0, seed, &HashSet::new()).is_none());

        table.set(12, vec![BallPosition::new(140.0, 101.0)]);
        let extractor = ArcExtractor::new(&table, ArcThresholds::default());
        assert_eq!(extractor.seed_arc(11, 0, seed, &HashSet::new()).unwrap().len(), 3);
    }

    #[test]
    fn isolated_points_give_no_arc() {
        let mut table = BallTable::new(30);
        for frame in 0..30 {
            table.set(frame, Vec::new());
        }
        table.set(12, vec![BallPosition::new(10.0, 10.0)]);
        table.set(13, vec![BallPosition::new(15.0, 12.0)]);
        table.set(14, vec![BallPosition::new(20.0, 14.0)]);
        let extractor = ArcExtractor::new(&table, ArcThresholds::default());
        assert!(extractor.get_arc(13, 0).is_none());
        assert!(extractor.get_arc(12, 0).is_none());
        assert!(extractor.extract_arcs().is_empty());
    }

    #[test]
    fn stationary_blob_is_too_slow() {
        let table = linear_table(30, 0..=29, &[], (300.0, 300.0), (0.5, 0.0));
        let extractor = ArcExtractor::new(&table, ArcThresholds::default());
        assert!(extractor.get_arc(10, 0).is_none());
    }

    #[test]
    fn params_deserialize_with_defaults() {
        let params: ArcParams = serde_json::from_str(r#"{ "search_window": 6 }"#).unwrap();
        assert_eq!(params.search_window, 6);
        assert_eq!(params.max_turn_angle, 15.0);
        let half = params.resolve(&ScaleContext::for_height(360));
        assert_eq!(half.max_speed_sq, 900.0);
        assert_eq!(half.noise_speed_sq, 1.0);
    }
}
