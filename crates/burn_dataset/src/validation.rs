//! Label-file quality checks before training.

use crate::folder::DatasetPathConfig;
use crate::labels::ClassVocabulary;
use crate::types::{
    DatasetResult, DatasetSummary, LabelRecord, ValidationOutcome, ValidationReport,
    ValidationThresholds,
};
use std::collections::{BTreeMap, HashSet};

fn apply_thresholds(
    label: &str,
    count: usize,
    ratio: f32,
    max_count: Option<usize>,
    max_ratio: Option<f32>,
    outcome: &mut ValidationOutcome,
    reasons: &mut Vec<String>,
) {
    if let Some(max) = max_count {
        if count > max {
            *outcome = ValidationOutcome::Fail;
            reasons.push(format!("{label}: {count} exceeds max {max}"));
        }
    }
    if let Some(max_r) = max_ratio {
        if ratio > max_r {
            *outcome = ValidationOutcome::Fail;
            reasons.push(format!(
                "{label}: ratio {:.3} exceeds max {:.3}",
                ratio, max_r
            ));
        }
    }
    if count > 0 {
        if *outcome == ValidationOutcome::Pass {
            *outcome = ValidationOutcome::Warn;
        }
        reasons.push(format!("{label}: {count} observed"));
    }
}

/// Counts missing images, empty tag lists, duplicate names and (given a vocabulary) unknown tags.
pub fn summarize_records(
    paths: &DatasetPathConfig,
    records: &[LabelRecord],
    vocab: Option<&ClassVocabulary>,
) -> DatasetSummary {
    let mut summary = DatasetSummary {
        root: paths.root.clone(),
        total: records.len(),
        ..Default::default()
    };
    let mut seen = HashSet::with_capacity(records.len());
    let mut class_counts: BTreeMap<String, usize> = BTreeMap::new();
    for record in records {
        if !seen.insert(record.image_name.as_str()) {
            summary.duplicates += 1;
        }
        if !paths.image_path(&record.image_name).is_file() {
            summary.missing_images += 1;
        }
        if record.tags.is_empty() {
            summary.empty_tags += 1;
        }
        for tag in &record.tags {
            if vocab.is_some_and(|v| v.index_of(tag).is_none()) {
                summary.unknown_tags += 1;
                continue;
            }
            *class_counts.entry(tag.clone()).or_default() += 1;
        }
    }
    summary.class_counts = class_counts;
    summary
}

pub fn summarize_folder(
    paths: &DatasetPathConfig,
    vocab: Option<&ClassVocabulary>,
) -> DatasetResult<DatasetSummary> {
    let records = paths.read_records()?;
    Ok(summarize_records(paths, &records, vocab))
}

pub fn validate_summary(
    summary: DatasetSummary,
    thresholds: &ValidationThresholds,
) -> ValidationReport {
    let denom = summary.total.max(1) as f32;
    let mut outcome = ValidationOutcome::Pass;
    let mut reasons = Vec::new();

    apply_thresholds(
        "missing images",
        summary.missing_images,
        summary.missing_images as f32 / denom,
        thresholds.max_missing,
        thresholds.max_missing_ratio,
        &mut outcome,
        &mut reasons,
    );
    apply_thresholds(
        "empty tags",
        summary.empty_tags,
        summary.empty_tags as f32 / denom,
        thresholds.max_empty,
        thresholds.max_empty_ratio,
        &mut outcome,
        &mut reasons,
    );
    apply_thresholds(
        "unknown tags",
        summary.unknown_tags,
        summary.unknown_tags as f32 / denom,
        thresholds.max_unknown,
        thresholds.max_unknown_ratio,
        &mut outcome,
        &mut reasons,
    );
    if summary.duplicates > 0 {
        if outcome == ValidationOutcome::Pass {
            outcome = ValidationOutcome::Warn;
        }
        reasons.push(format!("duplicate image names: {}", summary.duplicates));
    }

    ValidationReport {
        outcome,
        reasons,
        summary,
    }
}

pub fn validate_folder(
    paths: &DatasetPathConfig,
    vocab: Option<&ClassVocabulary>,
    thresholds: &ValidationThresholds,
) -> DatasetResult<ValidationReport> {
    let summary = summarize_folder(paths, vocab)?;
    Ok(validate_summary(summary, thresholds))
}
