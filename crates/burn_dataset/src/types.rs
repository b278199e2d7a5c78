//! Core types, error definitions, and data structures for burn_dataset.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, BurnDatasetError>;

#[derive(Debug, Error)]
pub enum BurnDatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json parse error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("csv error at {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("label validation failed at {path}: {msg}")]
    Validation { path: PathBuf, msg: String },
    #[error("image file missing for {image_name}: {path}")]
    MissingImage { image_name: String, path: PathBuf },
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("{0}")]
    Other(String),
}

/// One row of a label file: an image name and its space-separated tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelRecord {
    pub image_name: String,
    pub tags: Vec<String>,
}

/// A resolved, encoded sample ready to be loaded.
#[derive(Debug, Clone)]
pub struct SampleIndex {
    pub image_name: String,
    pub image_path: PathBuf,
    /// Multi-hot target over the class vocabulary (empty for unlabeled folders).
    pub target: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct DatasetSample {
    pub image_name: String,
    /// Image in CHW layout, normalised with the pipeline's mean/std.
    pub image_chw: Vec<f32>,
    pub width: u32,
    pub height: u32,
    pub target: Vec<f32>,
}

// CSV row as stored on disk.
#[derive(Debug, Deserialize, Serialize)]
pub(crate) struct RawLabelRow {
    pub(crate) image_name: String,
    #[serde(default)]
    pub(crate) tags: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub root: PathBuf,
    pub total: usize,
    pub missing_images: usize,
    pub empty_tags: usize,
    pub duplicates: usize,
    /// Tag occurrences that are not part of the vocabulary.
    pub unknown_tags: usize,
    pub class_counts: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationOutcome {
    Pass,
    Warn,
    Fail,
}

impl ValidationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationOutcome::Pass => "pass",
            ValidationOutcome::Warn => "warn",
            ValidationOutcome::Fail => "fail",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationThresholds {
    pub max_missing: Option<usize>,
    pub max_empty: Option<usize>,
    pub max_unknown: Option<usize>,
    pub max_missing_ratio: Option<f32>,
    pub max_empty_ratio: Option<f32>,
    pub max_unknown_ratio: Option<f32>,
}

impl ValidationThresholds {
    pub fn from_env() -> Self {
        fn parse_usize(key: &str) -> Option<usize> {
            std::env::var(key).ok()?.parse().ok()
        }
        fn parse_ratio(key: &str) -> Option<f32> {
            std::env::var(key).ok()?.parse().ok()
        }
        ValidationThresholds {
            max_missing: parse_usize("BURN_DATASET_MAX_MISSING"),
            max_empty: parse_usize("BURN_DATASET_MAX_EMPTY"),
            max_unknown: parse_usize("BURN_DATASET_MAX_UNKNOWN"),
            max_missing_ratio: parse_ratio("BURN_DATASET_MAX_MISSING_RATIO"),
            max_empty_ratio: parse_ratio("BURN_DATASET_MAX_EMPTY_RATIO"),
            max_unknown_ratio: parse_ratio("BURN_DATASET_MAX_UNKNOWN_RATIO"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub outcome: ValidationOutcome,
    pub reasons: Vec<String>,
    pub summary: DatasetSummary,
}
