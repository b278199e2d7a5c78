//! Multi-class folder layout: a label CSV next to a directory of images.

use crate::labels::{read_label_records, ClassVocabulary};
use crate::types::{BurnDatasetError, DatasetResult, LabelRecord, SampleIndex};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct DatasetPathConfig {
    pub root: PathBuf,
    /// Label CSV, relative to `root` unless absolute.
    pub labels_file: PathBuf,
    /// Image directory, relative to `root` unless absolute.
    pub images_subdir: PathBuf,
    /// Extension appended to `image_name` (without the dot).
    pub image_extension: String,
}

impl DatasetPathConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            labels_file: PathBuf::from("labels.csv"),
            images_subdir: PathBuf::from("."),
            image_extension: "jpg".to_string(),
        }
    }

    pub fn with_labels_file(mut self, labels_file: impl Into<PathBuf>) -> Self {
        self.labels_file = labels_file.into();
        self
    }

    pub fn with_images_subdir(mut self, images_subdir: impl Into<PathBuf>) -> Self {
        self.images_subdir = images_subdir.into();
        self
    }

    pub fn with_image_extension(mut self, ext: impl Into<String>) -> Self {
        self.image_extension = ext.into().trim_start_matches('.').to_string();
        self
    }

    pub fn labels_path(&self) -> PathBuf {
        self.root.join(&self.labels_file)
    }

    pub fn images_dir(&self) -> PathBuf {
        self.root.join(&self.images_subdir)
    }

    pub fn image_path(&self, image_name: &str) -> PathBuf {
        self.images_dir()
            .join(format!("{image_name}.{}", self.image_extension))
    }

    pub fn read_records(&self) -> DatasetResult<Vec<LabelRecord>> {
        read_label_records(&self.labels_path())
    }

    /// Reads the label file and resolves every row against `vocab`.
    pub fn load(&self, vocab: &ClassVocabulary) -> DatasetResult<Vec<SampleIndex>> {
        let records = self.read_records()?;
        self.index_records(&records, vocab)
    }

    pub fn index_records(
        &self,
        records: &[LabelRecord],
        vocab: &ClassVocabulary,
    ) -> DatasetResult<Vec<SampleIndex>> {
        let mut out = Vec::with_capacity(records.len());
        let mut unknown_total = 0usize;
        for record in records {
            let image_path = self.image_path(&record.image_name);
            if !image_path.is_file() {
                return Err(BurnDatasetError::MissingImage {
                    image_name: record.image_name.clone(),
                    path: image_path,
                });
            }
            let (target, unknown) = vocab.encode(&record.tags);
            if !unknown.is_empty() {
                log::debug!(
                    "{}: ignoring tags outside the vocabulary: {}",
                    record.image_name,
                    unknown.join(" ")
                );
                unknown_total += unknown.len();
            }
            out.push(SampleIndex {
                image_name: record.image_name.clone(),
                image_path,
                target,
            });
        }
        if unknown_total > 0 {
            log::warn!(
                "{}: {} tag occurrence(s) not in the {}-class vocabulary were ignored",
                self.labels_path().display(),
                unknown_total,
                vocab.len()
            );
        }
        Ok(out)
    }
}

/// Every file in `dir` with the given extension, sorted by name, with empty targets.
pub fn index_unlabeled_images(dir: &Path, extension: &str) -> DatasetResult<Vec<SampleIndex>> {
    let extension = extension.trim_start_matches('.');
    let entries = fs::read_dir(dir).map_err(|source| BurnDatasetError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut out = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| BurnDatasetError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case(extension))
            .unwrap_or(false);
        if !matches || !path.is_file() {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        out.push(SampleIndex {
            image_name: stem.to_string(),
            image_path: path.clone(),
            target: Vec::new(),
        });
    }
    out.sort_by(|a, b| a.image_name.cmp(&b.image_name));
    Ok(out)
}
