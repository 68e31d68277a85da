//! Stage graph, steps, and the stage builder state machine

pub mod builder;
pub mod graph;
pub mod step;

pub use builder::{StageBuilder, StageReport, StageStatus};
pub use graph::{ImageSpec, StageGraph, StageKind, StageSpec};
pub use step::Step;
