// Deepfake Prep - Library Entry Point
//
// Stages: dataset (inventory, split, manifests) -> extract (face crops)
// -> loader (crop-backed samples and batches) -> training boundary.

pub mod constants;
pub mod error;
pub mod tools;
pub mod config;
pub mod progress;
pub mod dataset;
pub mod metadata;
pub mod extract;
pub mod loader;
pub mod training;

pub use config::PipelineConfig;
pub use error::{PrepError, Result};
