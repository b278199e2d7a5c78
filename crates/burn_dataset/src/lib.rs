//! Multi-label folder datasets and Burn-compatible batching.
//!
//! This crate provides utilities for:
//! - Reading `image_name,tags` label files and building a class vocabulary
//! - Resolving label rows against an image folder
//! - Seeded train/val splitting
//! - Image transform pipelines (resize, flip, normalise)
//! - Burn-compatible batch iteration

// Module declarations
pub mod aug;
pub mod folder;
pub mod labels;
pub mod splits;
pub mod types;
pub mod validation;

#[cfg(feature = "burn-runtime")]
pub mod batch;

// Re-export public API
pub use aug::{
    DatasetConfig, TransformPipeline, TransformPipelineBuilder, IMAGENET_MEAN, IMAGENET_STD,
};
pub use folder::{index_unlabeled_images, DatasetPathConfig};
pub use labels::{parse_tags, read_label_records, write_label_records, ClassVocabulary};
pub use splits::split_records;
pub use types::*;
pub use validation::{summarize_folder, summarize_records, validate_folder, validate_summary};

#[cfg(feature = "burn-runtime")]
pub use batch::{BatchIter, MultiLabelBatch, MultiLabelLoader};
