//! Label files (`image_name,tags`) and the class vocabulary.

use crate::types::{BurnDatasetError, DatasetResult, LabelRecord, RawLabelRow};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

/// Splits a space-separated tag string, dropping empty entries.
pub fn parse_tags(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

pub fn read_label_records(path: &Path) -> DatasetResult<Vec<LabelRecord>> {
    let csv_err = |source| BurnDatasetError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(csv_err)?;

    let mut records = Vec::new();
    for (row, result) in reader.deserialize::<RawLabelRow>().enumerate() {
        let raw = result.map_err(csv_err)?;
        if raw.image_name.is_empty() {
            return Err(BurnDatasetError::Validation {
                path: path.to_path_buf(),
                // +2: header line and 1-based numbering.
                msg: format!("line {} has an empty image_name", row + 2),
            });
        }
        records.push(LabelRecord {
            tags: parse_tags(&raw.tags),
            image_name: raw.image_name,
        });
    }
    Ok(records)
}

pub fn write_label_records(path: &Path, records: &[LabelRecord]) -> DatasetResult<()> {
    let csv_err = |source| BurnDatasetError::Csv {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| BurnDatasetError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let mut writer = csv::Writer::from_path(path).map_err(csv_err)?;
    for record in records {
        writer
            .serialize(RawLabelRow {
                image_name: record.image_name.clone(),
                tags: record.tags.join(" "),
            })
            .map_err(csv_err)?;
    }
    writer.flush().map_err(|source| BurnDatasetError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Ordered class names; a name's position is its output index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassVocabulary {
    classes: Vec<String>,
}

impl ClassVocabulary {
    /// Sorted union of every tag seen in `records`.
    pub fn from_records(records: &[LabelRecord]) -> Self {
        let classes: BTreeSet<&str> = records
            .iter()
            .flat_map(|r| r.tags.iter().map(String::as_str))
            .collect();
        Self {
            classes: classes.into_iter().map(str::to_string).collect(),
        }
    }

    pub fn from_names<I, S>(names: I) -> DatasetResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut classes: Vec<String> = Vec::new();
        for name in names {
            let name = name.into();
            if name.trim().is_empty() {
                return Err(BurnDatasetError::Other("empty class name".to_string()));
            }
            if classes.contains(&name) {
                return Err(BurnDatasetError::Other(format!("duplicate class name '{name}'")));
            }
            classes.push(name);
        }
        Ok(Self { classes })
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.classes
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.classes.iter().position(|c| c == name)
    }

    /// Multi-hot encoding of `tags`; tags outside the vocabulary are returned separately.
    pub fn encode<'a>(&self, tags: &'a [String]) -> (Vec<f32>, Vec<&'a str>) {
        let mut target = vec![0.0f32; self.classes.len()];
        let mut unknown = Vec::new();
        for tag in tags {
            match self.index_of(tag) {
                Some(i) => target[i] = 1.0,
                None => unknown.push(tag.as_str()),
            }
        }
        (target, unknown)
    }

    /// Names whose probability reaches `threshold`, in vocabulary order.
    pub fn decode(&self, probabilities: &[f32], threshold: f32) -> Vec<&str> {
        self.classes
            .iter()
            .zip(probabilities)
            .filter(|(_, p)| **p >= threshold)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn load(path: &Path) -> DatasetResult<Self> {
        let raw = fs::read(path).map_err(|source| BurnDatasetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let vocab: Self = serde_json::from_slice(&raw).map_err(|source| BurnDatasetError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_names(vocab.classes)
    }

    pub fn save(&self, path: &Path) -> DatasetResult<()> {
        let json = serde_json::to_vec_pretty(self).map_err(|source| BurnDatasetError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, json).map_err(|source| BurnDatasetError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, tags: &str) -> LabelRecord {
        LabelRecord {
            image_name: name.to_string(),
            tags: parse_tags(tags),
        }
    }

    #[test]
    fn vocabulary_is_sorted_union_of_tags() {
        let records = vec![
            record("train_0", "haze primary"),
            record("train_1", "clear primary road"),
            record("train_2", ""),
        ];
        let vocab = ClassVocabulary::from_records(&records);
        assert_eq!(vocab.names(), ["clear", "haze", "primary", "road"]);
    }

    #[test]
    fn encode_reports_unknown_tags() {
        let vocab = ClassVocabulary::from_names(["clear", "haze", "primary"]).unwrap();
        let tags = parse_tags("primary  cloudy clear");
        let (target, unknown) = vocab.encode(&tags);
        assert_eq!(target, vec![1.0, 0.0, 1.0]);
        assert_eq!(unknown, vec!["cloudy"]);
    }

    #[test]
    fn decode_applies_threshold() {
        let vocab = ClassVocabulary::from_names(["a", "b", "c"]).unwrap();
        assert_eq!(vocab.decode(&[0.9, 0.2, 0.5], 0.5), vec!["a", "c"]);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        assert!(ClassVocabulary::from_names(["a", "a"]).is_err());
    }
}
