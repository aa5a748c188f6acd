//! Ball trajectory segments.

use std::collections::BTreeMap;

use rally_cut_types::BallPosition;

/// One ball of an arc together with its local kinematics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArcBallData {
    pub frame: u64,
    /// Index of the ball inside its frame's candidate list.
    pub ball_index: usize,
    pub position: BallPosition,
    /// Displacement per frame arriving at this ball; the first ball uses the leaving one.
    pub velocity: (f64, f64),
    pub speed_sq: f64,
    /// Score assigned when the ball was chosen; lower is better.
    pub correlation: f64,
    /// Turn between arriving and leaving velocity, in degrees.
    pub angle: f64,
}

impl ArcBallData {
    pub fn new(frame: u64, ball_index: usize, position: BallPosition) -> Self {
        Self {
            frame,
            ball_index,
            position,
            velocity: (0.0, 0.0),
            speed_sq: 0.0,
            correlation: 0.0,
            angle: 0.0,
        }
    }

    pub fn with_correlation(mut self, correlation: f64) -> Self {
        self.correlation = correlation;
        self
    }
}

/// Per-frame velocity from `from` to `to` over `frames` frames.
pub fn velocity_between(from: &BallPosition, to: &BallPosition, frames: u64) -> (f64, f64) {
    let frames = frames.max(1) as f64;
    ((to.x - from.x) / frames, (to.y - from.y) / frames)
}

pub fn norm_sq(v: (f64, f64)) -> f64 {
    v.0 * v.0 + v.1 * v.1
}

/// Unsigned angle between two vectors in degrees; zero when either is null.
pub fn angle_between(a: (f64, f64), b: (f64, f64)) -> f64 {
    if norm_sq(a) == 0.0 || norm_sq(b) == 0.0 {
        return 0.0;
    }
    let cross = a.0 * b.1 - a.1 * b.0;
    let dot = a.0 * b.0 + a.1 * b.1;
    cross.atan2(dot).abs().to_degrees()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArcStats {
    /// Mean over interior balls of the running minimum of three neighbouring squared speeds.
    pub average_speed_sq: f64,
    pub average_angle: f64,
}

/// An ordered run of ball positions keyed by strictly increasing frame index.
///
/// Arcs are values: trimming and concatenation return new arcs.
#[derive(Debug, Clone, PartialEq)]
pub struct BallArc {
    balls: BTreeMap<u64, ArcBallData>,
}

impl BallArc {
    pub fn new(first: ArcBallData) -> Self {
        let mut balls = BTreeMap::new();
        balls.insert(first.frame, first);
        Self { balls }
    }

    /// Builds an arc from balls in any order; duplicates keep the last entry.
    /// Returns `None` when `balls` is empty.
    pub fn from_balls(balls: impl IntoIterator<Item = ArcBallData>) -> Option<Self> {
        let balls: BTreeMap<u64, ArcBallData> =
            balls.into_iter().map(|ball| (ball.frame, ball)).collect();
        if balls.is_empty() {
            return None;
        }
        let mut arc = Self { balls };
        arc.refresh_kinematics();
        Some(arc)
    }

    pub fn len(&self) -> usize {
        self.balls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.balls.is_empty()
    }

    pub fn balls(&self) -> impl DoubleEndedIterator<Item = &ArcBallData> + ExactSizeIterator {
        self.balls.values()
    }

    pub fn get(&self, frame: u64) -> Option<&ArcBallData> {
        self.balls.get(&frame)
    }

    pub fn first(&self) -> &ArcBallData {
        self.balls
            .values()
            .next()
            .unwrap_or_else(|| unreachable!("arcs hold at least one ball"))
    }

    pub fn last(&self) -> &ArcBallData {
        self.balls
            .values()
            .next_back()
            .unwrap_or_else(|| unreachable!("arcs hold at least one ball"))
    }

    pub fn start_frame(&self) -> u64 {
        self.first().frame
    }

    pub fn end_frame(&self) -> u64 {
        self.last().frame
    }

    /// Frames spanned, inclusive of both ends.
    pub fn frame_span(&self) -> u64 {
        self.end_frame() - self.start_frame() + 1
    }

    pub(crate) fn push_back(&mut self, ball: ArcBallData) {
        debug_assert!(ball.frame > self.end_frame());
        self.balls.insert(ball.frame, ball);
    }

    pub(crate) fn push_front(&mut self, ball: ArcBallData) {
        debug_assert!(ball.frame < self.start_frame());
        self.balls.insert(ball.frame, ball);
    }

    /// Recomputes velocity, speed and turn angle of every ball from positions.
    pub fn refresh_kinematics(&mut self) {
        let snapshot: Vec<(u64, BallPosition)> = self
            .balls
            .values()
            .map(|ball| (ball.frame, ball.position))
            .collect();
        for (index, ball) in self.balls.values_mut().enumerate() {
            let incoming = index.checked_sub(1).map(|prev| {
                let (frame, position) = snapshot[prev];
                velocity_between(&position, &ball.position, ball.frame - frame)
            });
            let outgoing = snapshot.get(index + 1).map(|&(frame, position)| {
                velocity_between(&ball.position, &position, frame - ball.frame)
            });
            ball.velocity = incoming.or(outgoing).unwrap_or((0.0, 0.0));
            ball.speed_sq = norm_sq(ball.velocity);
            ball.angle = match (incoming, outgoing) {
                (Some(a), Some(b)) => angle_between(a, b),
                _ => 0.0,
            };
        }
    }

    pub fn stats(&self) -> ArcStats {
        let speeds: Vec<f64> = self.balls.values().map(|ball| ball.speed_sq).collect();
        let average_angle =
            self.balls.values().map(|ball| ball.angle).sum::<f64>() / self.len() as f64;
        let average_speed_sq = if speeds.len() < 3 {
            speeds.iter().sum::<f64>() / speeds.len() as f64
        } else {
            let interior: Vec<f64> = speeds
                .windows(3)
                .map(|triple| triple[0].min(triple[1]).min(triple[2]))
                .collect();
            interior.iter().sum::<f64>() / interior.len() as f64
        };
        ArcStats {
            average_speed_sq,
            average_angle,
        }
    }

    /// True if some run of at least `min_points` consecutive balls moves farther
    /// than `min_displacement_sq` with more than `min_density` balls per frame.
    pub fn is_consistent(&self, min_points: usize, min_displacement_sq: f64, min_density: f64) -> bool {
        let balls: Vec<&ArcBallData> = self.balls.values().collect();
        if balls.len() < min_points || min_points == 0 {
            return false;
        }
        for start in 0..balls.len() {
            for end in (start + min_points - 1)..balls.len() {
                let first = balls[start];
                let last = balls[end];
                let span = (last.frame - first.frame + 1) as f64;
                let density = (end - start + 1) as f64 / span;
                if density > min_density
                    && first.position.distance_sq(&last.position) > min_displacement_sq
                {
                    return true;
                }
            }
        }
        false
    }

    /// Drops `count` balls from the end. Returns `None` if nothing would remain.
    pub fn trim_end(&self, count: usize) -> Option<Self> {
        if count == 0 {
            return Some(self.clone());
        }
        if count >= self.len() {
            return None;
        }
        Self::from_balls(self.balls.values().take(self.len() - count).copied())
    }

    /// Drops `count` balls from the start. Returns `None` if nothing would remain.
    pub fn trim_start(&self, count: usize) -> Option<Self> {
        if count == 0 {
            return Some(self.clone());
        }
        if count >= self.len() {
            return None;
        }
        Self::from_balls(self.balls.values().skip(count).copied())
    }

    /// Appends `other`, which must start after this arc ends.
    pub fn concat(&self, other: &BallArc) -> Option<Self> {
        if other.start_frame() <= self.end_frame() {
            return None;
        }
        Self::from_balls(self.balls().chain(other.balls()).copied())
    }

    /// Same ball count, same frame range and endpoints within `tolerance_sq`.
    pub fn is_similar(&self, other: &BallArc, tolerance_sq: f64) -> bool {
        self.len() == other.len()
            && self.start_frame() == other.start_frame()
            && self.end_frame() == other.end_frame()
            && self.first().position.distance_sq(&other.first().position) <= tolerance_sq
            && self.last().position.distance_sq(&other.last().position) <= tolerance_sq
    }

    /// Sum of squared displacements between consecutive balls.
    pub fn travel_distance(&self) -> f64 {
        self.balls
            .values()
            .zip(self.balls.values().skip(1))
            .map(|(a, b)| a.position.distance_sq(&b.position))
            .sum()
    }

    pub fn frames_strictly_increasing(&self) -> bool {
        self.balls
            .values()
            .zip(self.balls.values().skip(1))
            .all(|(a, b)| a.frame < b.frame)
    }
}
