//! Deterministic train/validation splitting of label records.

use crate::types::LabelRecord;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Shuffles `records` with `seed` and moves `round(len * val_ratio)` of them to validation.
///
/// A non-zero ratio on a dataset with at least two records always leaves one
/// record on each side.
pub fn split_records(
    mut records: Vec<LabelRecord>,
    val_ratio: f32,
    seed: u64,
) -> (Vec<LabelRecord>, Vec<LabelRecord>) {
    let ratio = val_ratio.clamp(0.0, 1.0);
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    records.shuffle(&mut rng);

    let len = records.len();
    let mut val_len = (len as f32 * ratio).round() as usize;
    if ratio > 0.0 && len >= 2 {
        val_len = val_len.clamp(1, len - 1);
    }
    let val = records.split_off(len - val_len.min(len));
    (records, val)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(n: usize) -> Vec<LabelRecord> {
        (0..n)
            .map(|i| LabelRecord {
                image_name: format!("train_{i}"),
                tags: vec!["primary".to_string()],
            })
            .collect()
    }

    #[test]
    fn split_is_deterministic_and_disjoint() {
        let (train_a, val_a) = split_records(records(10), 0.2, 42);
        let (train_b, val_b) = split_records(records(10), 0.2, 42);
        assert_eq!(val_a, val_b);
        assert_eq!(train_a, train_b);
        assert_eq!(val_a.len(), 2);
        assert_eq!(train_a.len(), 8);
        assert!(val_a.iter().all(|v| !train_a.contains(v)));
    }

    #[test]
    fn tiny_datasets_keep_both_sides() {
        let (train, val) = split_records(records(3), 0.01, 0);
        assert_eq!((train.len(), val.len()), (2, 1));
        let (train, val) = split_records(records(3), 0.0, 0);
        assert_eq!((train.len(), val.len()), (3, 0));
    }
}
