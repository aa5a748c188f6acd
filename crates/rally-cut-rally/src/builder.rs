//! Links arcs across undetected gaps into rallies.

use rally_cut_types::{ResolutionDependent, ScaleContext};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::arc::BallArc;
use crate::rally::Rally;

// Cap on merged candidate chains kept per extension step.
const MAX_CHAINS: usize = 64;

/// Rally assembly settings, expressed at the 720p reference.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RallyParams {
    /// Gaps up to this many frames use the loose distance budget.
    pub max_undetected_frames_short: u64,
    /// Longest bridgeable gap; uses the tight distance budget.
    pub max_undetected_frames_long: u64,
    pub short_gap_distance_sq: f64,
    pub long_gap_distance_sq: f64,
    /// Seeds must start this far inside the frame.
    pub border_margin: f64,
    pub min_duration: u64,
    pub min_arcs: usize,
    pub min_travel_distance: f64,
    /// Squared speed at least one arc must exceed.
    pub min_arc_speed_sq: f64,
    pub max_discarded_balls: usize,
    pub similarity_distance_sq: f64,
}

impl Default for RallyParams {
    fn default() -> Self {
        Self {
            max_undetected_frames_short: 15,
            max_undetected_frames_long: 40,
            short_gap_distance_sq: 22500.0,
            long_gap_distance_sq: 3600.0,
            border_margin: 20.0,
            min_duration: 30,
            min_arcs: 2,
            min_travel_distance: 5000.0,
            min_arc_speed_sq: 4.0,
            max_discarded_balls: 100,
            similarity_distance_sq: 4.0,
        }
    }
}

impl RallyParams {
    pub fn resolve(&self, scale: &ScaleContext) -> RallyThresholds {
        let area = |value| scale.resolve(ResolutionDependent::area(value));
        RallyThresholds {
            max_undetected_frames_short: self.max_undetected_frames_short,
            max_undetected_frames_long: self
                .max_undetected_frames_long
                .max(self.max_undetected_frames_short),
            short_gap_distance_sq: area(self.short_gap_distance_sq),
            long_gap_distance_sq: area(self.long_gap_distance_sq),
            border_margin: scale.resolve(ResolutionDependent::length(self.border_margin)),
            min_duration: self.min_duration,
            min_arcs: self.min_arcs,
            min_travel_distance: area(self.min_travel_distance),
            min_arc_speed_sq: area(self.min_arc_speed_sq),
            max_discarded_balls: self.max_discarded_balls,
            similarity_distance_sq: area(self.similarity_distance_sq),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RallyThresholds {
    pub max_undetected_frames_short: u64,
    pub max_undetected_frames_long: u64,
    pub short_gap_distance_sq: f64,
    pub long_gap_distance_sq: f64,
    pub border_margin: f64,
    pub min_duration: u64,
    pub min_arcs: usize,
    pub min_travel_distance: f64,
    pub min_arc_speed_sq: f64,
    pub max_discarded_balls: usize,
    pub similarity_distance_sq: f64,
}

impl Default for RallyThresholds {
    fn default() -> Self {
        RallyParams::default().resolve(&ScaleContext::default())
    }
}

/// Candidate continuation: one or more arcs chained after the anchor.
#[derive(Debug, Clone)]
struct Chain {
    pieces: Vec<BallArc>,
    members: Vec<usize>,
}

impl Chain {
    fn first(&self) -> &BallArc {
        &self.pieces[0]
    }

    fn last(&self) -> &BallArc {
        &self.pieces[self.pieces.len() - 1]
    }

    fn ball_count(&self) -> usize {
        self.pieces.iter().map(BallArc::len).sum()
    }

    fn is_similar(&self, other: &Chain, tolerance_sq: f64) -> bool {
        self.ball_count() == other.ball_count()
            && self.first().start_frame() == other.first().start_frame()
            && self.last().end_frame() == other.last().end_frame()
            && self
                .first()
                .first()
                .position
                .distance_sq(&other.first().first().position)
                <= tolerance_sq
            && self
                .last()
                .last()
                .position
                .distance_sq(&other.last().last().position)
                <= tolerance_sq
    }
}

/// Chosen extension of a rally.
#[derive(Debug, Clone)]
pub struct NextArc {
    /// Balls dropped from the end of the rally's last arc.
    pub discarded: usize,
    /// The last arc after dropping `discarded` balls.
    pub anchor: BallArc,
    /// Arcs to append, already trimmed at their start.
    pub pieces: Vec<BallArc>,
    /// Indexes of the source arcs the pieces come from.
    pub members: Vec<usize>,
    /// Undetected frames between the anchor and the first piece.
    pub gap: u64,
}

impl NextArc {
    pub fn new_balls(&self) -> i64 {
        self.pieces.iter().map(BallArc::len).sum::<usize>() as i64 - self.discarded as i64
    }
}

/// Grows rallies over a frame-ordered arc list.
pub struct RallyBuilder<'a> {
    arcs: &'a [BallArc],
    thresholds: RallyThresholds,
}

impl<'a> RallyBuilder<'a> {
    /// `arcs` must be sorted by start frame.
    pub fn new(arcs: &'a [BallArc], thresholds: RallyThresholds) -> Self {
        Self { arcs, thresholds }
    }

    pub fn thresholds(&self) -> &RallyThresholds {
        &self.thresholds
    }

    /// Leading balls of `candidate` to drop so it continues `anchor`, or `None`
    /// if the two cannot be connected.
    pub fn test_arc_connection(&self, anchor: &BallArc, candidate: &BallArc) -> Option<usize> {
        let t = &self.thresholds;
        let end = anchor.last();
        let mut discarded = 0usize;
        for ball in candidate.balls() {
            if ball.frame > end.frame {
                let gap = ball.frame - end.frame;
                if gap > t.max_undetected_frames_long {
                    return None;
                }
                let budget = if gap <= t.max_undetected_frames_short {
                    t.short_gap_distance_sq
                } else {
                    t.long_gap_distance_sq
                };
                if end.position.distance_sq(&ball.position) < budget {
                    return Some(discarded);
                }
            }
            discarded += 1;
            if 2 * discarded > anchor.len() || 2 * discarded > candidate.len() {
                return None;
            }
        }
        None
    }

    /// Best continuation for a rally whose last arc is `last`.
    ///
    /// `skip(index)` excludes arcs already decided or already in the rally.
    pub fn get_next_arc_in_rally(
        &self,
        last: &BallArc,
        skip: impl Fn(usize) -> bool,
    ) -> Option<NextArc> {
        let t = &self.thresholds;
        let levels = t.max_discarded_balls.min(last.len().saturating_sub(1));
        for discarded in 0..=levels {
            let Some(anchor) = last.trim_end(discarded) else {
                break;
            };
            let chains = self.direct_candidates(&anchor, last.end_frame(), &skip);
            if chains.is_empty() {
                continue;
            }
            let chains = self.merge_chains(chains);
            let best = chains
                .into_iter()
                .map(|chain| {
                    let gap = chain.first().start_frame() - anchor.end_frame();
                    NextArc {
                        discarded,
                        anchor: anchor.clone(),
                        pieces: chain.pieces,
                        members: chain.members,
                        gap,
                    }
                })
                .fold(None::<NextArc>, |best, next| match best {
                    Some(best)
                        if best.new_balls() > next.new_balls()
                            || (best.new_balls() == next.new_balls() && best.gap <= next.gap) =>
                    {
                        Some(best)
                    }
                    _ => Some(next),
                })?;
            trace!(
                discarded,
                new_balls = best.new_balls(),
                gap = best.gap,
                "best rally extension"
            );
            return (best.new_balls() > 0).then_some(best);
        }
        None
    }

    fn direct_candidates(
        &self,
        anchor: &BallArc,
        current_end: u64,
        skip: &impl Fn(usize) -> bool,
    ) -> Vec<Chain> {
        let horizon = anchor.end_frame() + self.thresholds.max_undetected_frames_long;
        let mut chains = Vec::new();
        for (index, arc) in self.arcs.iter().enumerate() {
            if arc.start_frame() > horizon {
                break;
            }
            if skip(index) || arc.end_frame() <= current_end {
                continue;
            }
            let Some(lead) = self.test_arc_connection(anchor, arc) else {
                continue;
            };
            if let Some(trimmed) = arc.trim_start(lead) {
                chains.push(Chain {
                    pieces: vec![trimmed],
                    members: vec![index],
                });
            }
        }
        chains
    }

    /// Adds every chain formed by appending one candidate after another, until stable.
    fn merge_chains(&self, mut chains: Vec<Chain>) -> Vec<Chain> {
        let tolerance = self.thresholds.similarity_distance_sq;
        let mut changed = true;
        while changed && chains.len() < MAX_CHAINS {
            changed = false;
            let count = chains.len();
            'outer: for i in 0..count {
                for j in 0..count {
                    if i == j || chains[j].members.len() != 1 {
                        continue;
                    }
                    let head = &chains[i];
                    let tail = chains[j].first();
                    if head.members.contains(&chains[j].members[0])
                        || tail.end_frame() <= head.last().end_frame()
                    {
                        continue;
                    }
                    let Some(lead) = self.test_arc_connection(head.last(), tail) else {
                        continue;
                    };
                    let Some(trimmed) = tail.trim_start(lead) else {
                        continue;
                    };
                    let mut merged = head.clone();
                    merged.pieces.push(trimmed);
                    merged.members.push(chains[j].members[0]);
                    if chains.iter().any(|chain| chain.is_similar(&merged, tolerance)) {
                        continue;
                    }
                    chains.push(merged);
                    changed = true;
                    if chains.len() >= MAX_CHAINS {
                        break 'outer;
                    }
                }
            }
        }
        chains
    }

    /// Grows a rally from `seed` until no extension adds balls.
    ///
    /// `is_decided(index)` marks arcs owned by earlier rallies.
    pub fn build(&self, seed: usize, is_decided: impl Fn(usize) -> bool) -> (Rally, Vec<usize>) {
        let mut rally = Rally::new(self.arcs[seed].clone());
        let mut members = vec![seed];
        // Untrimmed version of the rally's last arc.
        let mut last = self.arcs[seed].clone();
        loop {
            let next = self.get_next_arc_in_rally(&last, |index| {
                is_decided(index) || members.contains(&index)
            });
            let Some(next) = next else {
                break;
            };
            if next.discarded > 0 {
                rally.replace_last(next.anchor);
            }
            let mut appended = false;
            for piece in next.pieces {
                last = piece.clone();
                appended |= rally.push(piece).is_ok();
            }
            members.extend(next.members);
            if !appended {
                break;
            }
        }
        (rally, members)
    }

    pub fn accepts(&self, rally: &Rally) -> bool {
        let t = &self.thresholds;
        rally.duration() > t.min_duration
            && rally.arc_count() >= t.min_arcs
            && rally.travel_distance() > t.min_travel_distance
            && rally
                .arcs()
                .iter()
                .any(|arc| arc.stats().average_speed_sq > t.min_arc_speed_sq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arc::ArcBallData;
    use rally_cut_types::BallPosition;

    fn arc(frames: std::ops::Range<u64>, origin: (f64, f64), step: (f64, f64)) -> BallArc {
        BallArc::from_balls(frames.clone().map(|frame| {
            let t = (frame - frames.start) as f64;
            ArcBallData::new(
                frame,
                0,
                BallPosition::new(origin.0 + step.0 * t, origin.1 + step.1 * t),
            )
        }))
        .unwrap()
    }

    #[test]
    fn connection_drops_leading_overlap() {
        let arcs = [
            arc(0..20, (100.0, 100.0), (10.0, 0.0)),
            arc(15..40, (400.0, 100.0), (0.0, 10.0)),
        ];
        let builder = RallyBuilder::new(&arcs, RallyThresholds::default());
        // frames 15..=19 overlap the anchor; frame 20 is within the short-gap budget
        assert_eq!(builder.test_arc_connection(&arcs[0], &arcs[1]), Some(5));
        assert_eq!(builder.test_arc_connection(&arcs[0], &arcs[1]), Some(5));
    }

    #[test]
    fn long_gap_needs_tight_budget() {
        let anchor = arc(0..10, (100.0, 100.0), (5.0, 0.0));
        let near = arc(35..45, (190.0, 100.0), (5.0, 0.0));
        let far = arc(35..45, (300.0, 100.0), (5.0, 0.0));
        let too_late = arc(60..70, (150.0, 100.0), (5.0, 0.0));
        let arcs = [anchor.clone(), near.clone(), far.clone(), too_late.clone()];
        let builder = RallyBuilder::new(&arcs, RallyThresholds::default());
        assert_eq!(builder.test_arc_connection(&anchor, &near), Some(0));
        assert_eq!(builder.test_arc_connection(&anchor, &far), None);
        assert_eq!(builder.test_arc_connection(&anchor, &too_late), None);
    }

    #[test]
    fn extension_prefers_more_new_balls() {
        let arcs = [
            arc(0..20, (100.0, 300.0), (10.0, -5.0)),
            arc(22..30, (300.0, 200.0), (5.0, 5.0)),
            arc(24..50, (310.0, 210.0), (-5.0, 5.0)),
        ];
        let builder = RallyBuilder::new(&arcs, RallyThresholds::default());
        let next = builder.get_next_arc_in_rally(&arcs[0], |i| i == 0).unwrap();
        assert_eq!(next.discarded, 0);
        assert_eq!(next.members, vec![2]);
        assert_eq!(next.new_balls(), 26);
    }

    #[test]
    fn chains_merge_transitively() {
        let arcs = [
            arc(0..20, (100.0, 300.0), (10.0, -5.0)),
            arc(22..30, (300.0, 200.0), (5.0, 5.0)),
            arc(32..52, (350.0, 250.0), (-10.0, 10.0)),
        ];
        let builder = RallyBuilder::new(&arcs, RallyThresholds::default());
        let next = builder.get_next_arc_in_rally(&arcs[0], |i| i == 0).unwrap();
        assert_eq!(next.members, vec![1, 2]);
        assert_eq!(next.new_balls(), 28);
        assert_eq!(next.gap, 3);

        let (rally, members) = builder.build(0, |_| false);
        assert_eq!(members, vec![0, 1, 2]);
        assert_eq!(rally.arc_count(), 3);
        assert_eq!(rally.end_frame(), 51);
        assert!(rally.is_ordered());
        assert!(builder.accepts(&rally));
    }

    #[test]
    fn short_blips_are_rejected() {
        let arcs = [
            arc(100..105, (300.0, 300.0), (1.0, 1.0)),
            arc(400..405, (500.0, 200.0), (1.0, -1.0)),
        ];
        let builder = RallyBuilder::new(&arcs, RallyThresholds::default());
        for seed in 0..arcs.len() {
            let (rally, members) = builder.build(seed, |_| false);
            assert_eq!(members, vec![seed]);
            assert!(!builder.accepts(&rally));
        }
    }
}
