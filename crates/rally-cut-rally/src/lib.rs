//! Trajectory analysis over a per-frame ball table.
//!
//! [`ArcExtractor`] grows smooth ball trajectories ("arcs") around every
//! candidate, [`RallyBuilder`] links arcs across undetected gaps and
//! [`RallyEngine`] runs both and filters the resulting rallies.

pub mod arc;
pub mod arc_extractor;
pub mod builder;
pub mod engine;
mod error;
pub mod rally;

pub use arc::{ArcBallData, ArcStats, BallArc};
pub use arc_extractor::{ArcExtractor, ArcParams, ArcThresholds};
pub use builder::{NextArc, RallyBuilder, RallyParams, RallyThresholds};
pub use engine::{ClusterMode, ClusterParams, RallyEngine, RallyRecord, RallyReport, kmeans_1d};
pub use error::{RallyError, RallyResult};
pub use rally::{BoundingBox, Rally};
