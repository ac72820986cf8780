// src/counting/mod.rs

pub mod aggregator;
pub mod run;
pub mod state_table;
pub mod stats;

pub use aggregator::{is_vehicle_class, FrameAggregator, FrameOutcome, VEHICLE_CLASSES};
pub use run::{run_counter, RunOutput};
pub use state_table::{CrossingState, CrossingStateTable};
pub use stats::{reconstruct, StatsSummary};
