use rally_cut_types::BallPosition;

use crate::arc::BallArc;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    fn around(position: &BallPosition) -> Self {
        Self {
            min_x: position.x,
            min_y: position.y,
            max_x: position.x,
            max_y: position.y,
        }
    }

    fn include(&mut self, position: &BallPosition) {
        self.min_x = self.min_x.min(position.x);
        self.min_y = self.min_y.min(position.y);
        self.max_x = self.max_x.max(position.x);
        self.max_y = self.max_y.max(position.y);
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Width over height; infinite for a horizontal line, NaN for a point.
    pub fn aspect_ratio(&self) -> f64 {
        self.width() / self.height()
    }
}

/// Arcs of one point of play, in increasing frame order.
#[derive(Debug, Clone, PartialEq)]
pub struct Rally {
    arcs: Vec<BallArc>,
}

impl Rally {
    pub fn new(seed: BallArc) -> Self {
        Self { arcs: vec![seed] }
    }

    pub fn arcs(&self) -> &[BallArc] {
        &self.arcs
    }

    pub fn arc_count(&self) -> usize {
        self.arcs.len()
    }

    pub fn last_arc(&self) -> &BallArc {
        // A rally always holds its seed.
        &self.arcs[self.arcs.len() - 1]
    }

    pub fn start_frame(&self) -> u64 {
        self.arcs[0].start_frame()
    }

    pub fn end_frame(&self) -> u64 {
        self.last_arc().end_frame()
    }

    pub fn duration(&self) -> u64 {
        self.end_frame() - self.start_frame()
    }

    pub fn ball_count(&self) -> usize {
        self.arcs.iter().map(BallArc::len).sum()
    }

    pub fn positions(&self) -> impl Iterator<Item = &BallPosition> {
        self.arcs
            .iter()
            .flat_map(|arc| arc.balls().map(|ball| &ball.position))
    }

    pub fn bounding_box(&self) -> BoundingBox {
        let mut positions = self.positions();
        let first = positions
            .next()
            .map(BoundingBox::around)
            .unwrap_or(BoundingBox {
                min_x: 0.0,
                min_y: 0.0,
                max_x: 0.0,
                max_y: 0.0,
            });
        positions.fold(first, |mut bbox, position| {
            bbox.include(position);
            bbox
        })
    }

    /// Sum of squared deltas between consecutive balls, across arc boundaries.
    pub fn travel_distance(&self) -> f64 {
        let positions: Vec<&BallPosition> = self.positions().collect();
        positions
            .windows(2)
            .map(|pair| pair[0].distance_sq(pair[1]))
            .sum()
    }

    /// Share of the rally's frames with a ball, in percent.
    pub fn detected_percentage(&self) -> f64 {
        100.0 * self.ball_count() as f64 / (self.duration() + 1) as f64
    }

    /// Appends `arc` if it starts after the current end. Returns the arc back otherwise.
    pub fn push(&mut self, arc: BallArc) -> Result<(), BallArc> {
        if arc.start_frame() <= self.end_frame() {
            return Err(arc);
        }
        self.arcs.push(arc);
        Ok(())
    }

    /// Swaps the last arc for a version trimmed at its end.
    pub(crate) fn replace_last(&mut self, trimmed: BallArc) {
        let last = self.arcs.len() - 1;
        debug_assert_eq!(self.arcs[last].start_frame(), trimmed.start_frame());
        self.arcs[last] = trimmed;
    }

    pub fn is_ordered(&self) -> bool {
        self.arcs
            .windows(2)
            .all(|pair| pair[0].end_frame() < pair[1].start_frame())
    }
}
