pub mod config;
pub mod energy;
pub mod planner;

mod detector;

pub use config::SegmenterConfig;
pub use planner::{SegmentPlanner, SegmentSpan};
