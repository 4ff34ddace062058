//! Transformation module.
//!
//! This module handles table cleaning:
//! - Steps: duplicate removal, header standardization, trimming, type casts
//! - Missing: drop or fill missing cells
//! - Pipeline: runs the enabled steps in their fixed order

pub mod missing;
pub mod pipeline;
pub mod steps;

pub use missing::{handle_missing, MissingOutcome};
pub use pipeline::{run_pipeline, run_pipeline_with_progress, PipelineOutput, Stage, StageProgress};
