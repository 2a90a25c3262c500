pub mod angles;
pub mod metrics;

pub use angles::{registry, AngleDefinition, AngleEngine, AngleKind, AngleSet, Reference};
pub use metrics::{Metrics, MetricsComputer, MovementDirection, VisibleSide};
