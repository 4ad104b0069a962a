//! `nuclink-recon`: Multi-dataset level and gamma grouping engine.
//!
//! Pure engine crate: receives pre-parsed dataset records, returns canonical
//! level groups with their gamma subgroups. No CLI or IO dependencies.

pub mod arena;
pub mod averaging;
pub mod backprop;
pub mod binner;
pub mod config;
pub mod engine;
pub mod error;
pub mod gamma;
pub mod group;
pub mod model;
pub mod pipeline;
pub mod resolver;
pub mod strength;
pub mod summary;

pub use averaging::{AveragingEngine, AveragingOutcome, AveragingRequest};
pub use config::GroupingConfig;
pub use engine::{group_observations, load_input_json, run, run_with_averager, GroupingOutcome};
pub use error::ReconError;
pub use model::{GroupView, GroupingResult, GroupingSummary};
