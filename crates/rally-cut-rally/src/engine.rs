//! Turns the per-frame ball table into selected rallies.

use rally_cut_types::{BallTable, FrameSize, ScaleContext};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::arc::BallArc;
use crate::arc_extractor::{ArcExtractor, ArcParams, ArcThresholds};
use crate::builder::{RallyBuilder, RallyParams, RallyThresholds};
use crate::error::{RallyError, RallyResult};
use crate::rally::Rally;

const MIN_ASPECT_RATIO: f64 = 0.2;
const MAX_ASPECT_RATIO: f64 = 6.0;
const KMEANS_ITERATIONS: usize = 50;

/// Rally property used to separate noise from real points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterMode {
    #[default]
    None,
    Duration,
    DetectedPercentage,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterParams {
    pub mode: ClusterMode,
    pub clusters: usize,
    /// Clustering only runs with at least this many rallies.
    pub min_rallies: usize,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            mode: ClusterMode::None,
            clusters: 2,
            min_rallies: 6,
        }
    }
}

impl ClusterParams {
    pub fn validate(&self) -> RallyResult<()> {
        if self.mode != ClusterMode::None && self.clusters < 2 {
            return Err(RallyError::configuration(format!(
                "rally clustering needs at least 2 clusters, got {}",
                self.clusters
            )));
        }
        Ok(())
    }
}

/// One accepted rally in output order.
#[derive(Debug, Clone, PartialEq)]
pub struct RallyRecord {
    pub original_index: usize,
    pub start: u64,
    pub stop: u64,
    pub is_selected: bool,
    pub rally: Rally,
}

#[derive(Debug, Clone, Default)]
pub struct RallyReport {
    pub arcs: Vec<BallArc>,
    pub rallies: Vec<RallyRecord>,
}

impl RallyReport {
    pub fn selected(&self) -> impl Iterator<Item = &RallyRecord> {
        self.rallies.iter().filter(|record| record.is_selected)
    }
}

pub struct RallyEngine {
    arc_thresholds: ArcThresholds,
    rally_thresholds: RallyThresholds,
    cluster: ClusterParams,
    frame_size: FrameSize,
}

impl RallyEngine {
    pub fn new(
        arc_params: &ArcParams,
        rally_params: &RallyParams,
        cluster: ClusterParams,
        frame_size: FrameSize,
    ) -> RallyResult<Self> {
        cluster.validate()?;
        if frame_size.is_empty() {
            return Err(RallyError::configuration("analysis frame size is empty"));
        }
        let scale = ScaleContext::for_height(frame_size.height);
        Ok(Self {
            arc_thresholds: arc_params.resolve(&scale),
            rally_thresholds: rally_params.resolve(&scale),
            cluster,
            frame_size,
        })
    }

    pub fn with_thresholds(
        arc_thresholds: ArcThresholds,
        rally_thresholds: RallyThresholds,
        cluster: ClusterParams,
        frame_size: FrameSize,
    ) -> RallyResult<Self> {
        cluster.validate()?;
        Ok(Self {
            arc_thresholds,
            rally_thresholds,
            cluster,
            frame_size,
        })
    }

    pub fn run(&self, table: &BallTable) -> RallyReport {
        let mut arcs = ArcExtractor::new(table, self.arc_thresholds).extract_arcs();
        arcs.sort_by_key(|arc| (arc.start_frame(), arc.end_frame()));
        let rallies = self.assemble(&arcs);
        let rallies: Vec<Rally> = rallies
            .into_iter()
            .filter(|rally| {
                let aspect = rally.bounding_box().aspect_ratio();
                let keep = (MIN_ASPECT_RATIO..=MAX_ASPECT_RATIO).contains(&aspect);
                if !keep {
                    debug!(
                        start = rally.start_frame(),
                        stop = rally.end_frame(),
                        aspect,
                        "dropping rally with degenerate extent"
                    );
                }
                keep
            })
            .collect();
        let selected = self.select(&rallies);
        info!(
            arcs = arcs.len(),
            rallies = rallies.len(),
            selected = selected.iter().filter(|s| **s).count(),
            "rally extraction finished"
        );
        let rallies = rallies
            .into_iter()
            .zip(selected)
            .enumerate()
            .map(|(original_index, (rally, is_selected))| RallyRecord {
                original_index,
                start: rally.start_frame(),
                stop: rally.end_frame(),
                is_selected,
                rally,
            })
            .collect();
        RallyReport { arcs, rallies }
    }

    /// Builds rallies from `arcs`, which must be sorted by start frame.
    ///
    /// Once a rally is accepted, arcs starting before its end never seed another
    /// rally, even when no rally consumed them.
    pub fn assemble(&self, arcs: &[BallArc]) -> Vec<Rally> {
        let builder = RallyBuilder::new(arcs, self.rally_thresholds);
        let mut decided = vec![false; arcs.len()];
        let mut end_of_last_rally: Option<u64> = None;
        let mut rallies = Vec::new();

        for seed in 0..arcs.len() {
            if decided[seed] {
                continue;
            }
            let arc = &arcs[seed];
            if end_of_last_rally.is_some_and(|end| arc.start_frame() < end) {
                continue;
            }
            if !self.starts_inside(arc) {
                continue;
            }
            let (rally, members) = builder.build(seed, |index| decided[index]);
            if builder.accepts(&rally) {
                debug!(
                    start = rally.start_frame(),
                    stop = rally.end_frame(),
                    arcs = rally.arc_count(),
                    "rally accepted"
                );
                for member in members {
                    decided[member] = true;
                }
                end_of_last_rally = Some(rally.end_frame());
                rallies.push(rally);
            } else {
                decided[seed] = true;
            }
        }
        rallies
    }

    fn starts_inside(&self, arc: &BallArc) -> bool {
        let margin = self.rally_thresholds.border_margin;
        let position = arc.first().position;
        let width = self.frame_size.width as f64;
        let height = self.frame_size.height as f64;
        position.x >= margin
            && position.y >= margin
            && position.x <= width - margin
            && position.y <= height - margin
    }

    fn select(&self, rallies: &[Rally]) -> Vec<bool> {
        let mut selected = vec![true; rallies.len()];
        if self.cluster.mode == ClusterMode::None || rallies.len() < self.cluster.min_rallies {
            return selected;
        }
        let values: Vec<f64> = rallies
            .iter()
            .map(|rally| match self.cluster.mode {
                ClusterMode::Duration => rally.duration() as f64,
                _ => rally.detected_percentage(),
            })
            .collect();
        let (assignment, centers) = kmeans_1d(&values, self.cluster.clusters);
        let noise = centers
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))
            .map(|(index, _)| index);
        for (flag, cluster) in selected.iter_mut().zip(&assignment) {
            if Some(*cluster) == noise {
                *flag = false;
            }
        }
        selected
    }
}

/// Lloyd's algorithm on scalars with quantile seeding. Ties go to the lower cluster.
pub fn kmeans_1d(values: &[f64], k: usize) -> (Vec<usize>, Vec<f64>) {
    if values.is_empty() || k == 0 {
        return (vec![0; values.len()], Vec::new());
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mut centers: Vec<f64> = (0..k)
        .map(|j| {
            let position = ((j as f64 + 0.5) / k as f64 * sorted.len() as f64) as usize;
            sorted[position.min(sorted.len() - 1)]
        })
        .collect();

    let mut assignment = vec![0usize; values.len()];
    for _ in 0..KMEANS_ITERATIONS {
        let mut changed = false;
        for (slot, value) in assignment.iter_mut().zip(values) {
            let nearest = centers
                .iter()
                .enumerate()
                .fold((0usize, f64::INFINITY), |best, (index, center)| {
                    let distance = (value - center).abs();
                    if distance < best.1 { (index, distance) } else { best }
                })
                .0;
            if *slot != nearest {
                *slot = nearest;
                changed = true;
            }
        }
        for (index, center) in centers.iter_mut().enumerate() {
            let (sum, count) = assignment
                .iter()
                .zip(values)
                .filter(|(cluster, _)| **cluster == index)
                .fold((0.0, 0usize), |(sum, count), (_, value)| (sum + value, count + 1));
            if count > 0 {
                *center = sum / count as f64;
            }
        }
        if !changed {
            break;
        }
    }
    (assignment, centers)
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

    fn engine(cluster: ClusterParams) -> RallyEngine {
        RallyEngine::with_thresholds(
            ArcThresholds::default(),
            RallyThresholds::default(),
            cluster,
            FrameSize::new(1280, 720),
        )
        .unwrap()
    }

    fn two_shot_rally(start: u64) -> [BallArc; 2] {
        [
            arc(start..start + 20, (300.0, 500.0), (15.0, -10.0)),
            arc(start + 24..start + 44, (610.0, 290.0), (-12.0, 8.0)),
        ]
    }

    #[test]
    fn kmeans_splits_two_groups() {
        let (assignment, centers) = kmeans_1d(&[1.0, 2.0, 100.0, 3.0, 98.0, 102.0], 2);
        assert_eq!(assignment, vec![0, 0, 1, 0, 1, 1]);
        assert!((centers[0] - 2.0).abs() < 1e-9);
        assert!((centers[1] - 100.0).abs() < 1e-9);
    }

    #[test]
    fn assembles_separate_rallies() {
        let mut arcs: Vec<BallArc> = two_shot_rally(0).into_iter().collect();
        arcs.extend(two_shot_rally(200));
        let rallies = engine(ClusterParams::default()).assemble(&arcs);
        assert_eq!(rallies.len(), 2);
        assert_eq!((rallies[0].start_frame(), rallies[0].end_frame()), (0, 43));
        assert_eq!((rallies[1].start_frame(), rallies[1].end_frame()), (200, 243));
        assert!(rallies.iter().all(Rally::is_ordered));
    }

    #[test]
    fn seeds_near_the_border_are_skipped() {
        let arcs = [
            arc(0..20, (5.0, 500.0), (15.0, -10.0)),
            arc(24..44, (305.0, 290.0), (-12.0, 8.0)),
        ];
        let rallies = engine(ClusterParams::default()).assemble(&arcs);
        assert!(rallies.is_empty());
    }

    /// Arcs starting inside an accepted rally's span never seed a new rally,
    /// even if the rally did not absorb them.
    #[test]
    fn arcs_overlapping_an_accepted_rally_do_not_seed() {
        let mut arcs: Vec<BallArc> = two_shot_rally(0).into_iter().collect();
        // Unrelated play on the far side that overlaps the first rally in time.
        arcs.push(arc(30..50, (1000.0, 150.0), (-10.0, 6.0)));
        arcs.push(arc(54..74, (790.0, 270.0), (9.0, 8.0)));
        arcs.sort_by_key(|arc| (arc.start_frame(), arc.end_frame()));

        let engine = engine(ClusterParams::default());
        let rallies = engine.assemble(&arcs);
        assert_eq!(rallies.len(), 1);
        assert_eq!(rallies[0].start_frame(), 0);

        let alone = engine.assemble(&arcs[2..]);
        assert_eq!(alone.len(), 1);
        assert_eq!(alone[0].start_frame(), 30);
    }

    #[test]
    fn assembly_is_repeatable() {
        let mut arcs: Vec<BallArc> = two_shot_rally(10).into_iter().collect();
        arcs.extend(two_shot_rally(120));
        let engine = engine(ClusterParams::default());
        assert_eq!(engine.assemble(&arcs), engine.assemble(&arcs));
    }

    #[test]
    fn duration_clustering_deselects_short_rallies() {
        let mut arcs = Vec::new();
        for start in [0u64, 200, 400] {
            arcs.extend(two_shot_rally(start));
        }
        for start in [600u64, 800, 1000] {
            let [first, second] = two_shot_rally(start);
            arcs.push(first);
            arcs.push(second);
            arcs.push(arc(start + 48..start + 68, (380.0, 470.0), (12.0, -9.0)));
            arcs.push(arc(start + 72..start + 92, (640.0, 270.0), (-11.0, 9.0)));
        }
        let engine = engine(ClusterParams {
            mode: ClusterMode::Duration,
            clusters: 2,
            min_rallies: 6,
        });
        let rallies = engine.assemble(&arcs);
        let durations: Vec<u64> = rallies.iter().map(Rally::duration).collect();
        assert_eq!(durations, vec![43, 43, 43, 91, 91, 91]);
        let selected = engine.select(&rallies);
        assert_eq!(selected, vec![false, false, false, true, true, true]);
    }

    #[test]
    fn clustering_needs_two_clusters() {
        let err = ClusterParams {
            mode: ClusterMode::DetectedPercentage,
            clusters: 1,
            min_rallies: 6,
        }
        .validate()
        .unwrap_err();
        assert!(matches!(err, RallyError::Configuration { .. }));
        assert!(ClusterParams::default().validate().is_ok());
    }
}
