// Loader module: crop index, transforms, datasets and batching

pub mod batch;
pub mod dataset;
pub mod index;
pub mod transform;


pub use batch::{Batch, DataLoader};
pub use dataset::{FaceDataset, FolderDataset, LoadCounts, PlaceholderReason, Sample, SampleOrigin, SampleSource};
pub use index::{CropIndex, MatchMode};
pub use transform::TransformPipeline;
