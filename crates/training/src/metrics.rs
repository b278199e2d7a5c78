//! Thresholded multi-label metrics computed on host vectors.

use serde::Serialize;

/// Competition metric: recall weighted four times as heavily as precision.
pub const F2_BETA: f32 = 2.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ClassCounts {
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    /// Number of samples whose target includes the class.
    pub support: usize,
}

impl ClassCounts {
    pub fn precision(&self) -> f32 {
        ratio(
            self.true_positives,
            self.true_positives + self.false_positives,
        )
    }

    pub fn recall(&self) -> f32 {
        ratio(
            self.true_positives,
            self.true_positives + self.false_negatives,
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MultiLabelMetrics {
    pub threshold: f32,
    pub samples: usize,
    /// Sample-averaged F2.
    pub f2: f32,
    pub per_class: Vec<ClassCounts>,
}

fn ratio(num: usize, den: usize) -> f32 {
    if den == 0 {
        0.0
    } else {
        num as f32 / den as f32
    }
}

/// Per-sample F-beta. A sample with no positive targets and no positive
/// predictions scores 1.
pub fn sample_fbeta(probs: &[f32], targets: &[f32], threshold: f32, beta: f32) -> f32 {
    let mut tp = 0usize;
    let mut fp = 0usize;
    let mut fn_ = 0usize;
    for (p, t) in probs.iter().zip(targets) {
        match (*p >= threshold, *t > 0.5) {
            (true, true) => tp += 1,
            (true, false) => fp += 1,
            (false, true) => fn_ += 1,
            (false, false) => {}
        }
    }
    if tp + fp + fn_ == 0 {
        return 1.0;
    }
    let precision = ratio(tp, tp + fp);
    let recall = ratio(tp, tp + fn_);
    let b2 = beta * beta;
    let denom = b2 * precision + recall;
    if denom == 0.0 {
        0.0
    } else {
        (1.0 + b2) * precision * recall / denom
    }
}

/// `probs` and `targets` are row-major `[samples, num_classes]`.
pub fn evaluate(
    probs: &[f32],
    targets: &[f32],
    num_classes: usize,
    threshold: f32,
) -> MultiLabelMetrics {
    let mut per_class = vec![ClassCounts::default(); num_classes];
    let mut f2_sum = 0.0f32;
    let mut samples = 0usize;
    if num_classes > 0 {
        for (p_row, t_row) in probs
            .chunks_exact(num_classes)
            .zip(targets.chunks_exact(num_classes))
        {
            for (c, (p, t)) in p_row.iter().zip(t_row).enumerate() {
                let counts = &mut per_class[c];
                let predicted = *p >= threshold;
                let actual = *t > 0.5;
                if actual {
                    counts.support += 1;
                }
                match (predicted, actual) {
                    (true, true) => counts.true_positives += 1,
                    (true, false) => counts.false_positives += 1,
                    (false, true) => counts.false_negatives += 1,
                    (false, false) => {}
                }
            }
            f2_sum += sample_fbeta(p_row, t_row, threshold, F2_BETA);
            samples += 1;
        }
    }
    MultiLabelMetrics {
        threshold,
        samples,
        f2: if samples == 0 {
            0.0
        } else {
            f2_sum / samples as f32
        },
        per_class,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_predictions_score_one() {
        let targets = [1.0, 0.0, 1.0, 0.0, 1.0, 0.0];
        let probs = [0.9, 0.1, 0.8, 0.2, 0.7, 0.3];
        let m = evaluate(&probs, &targets, 3, 0.5);
        assert_eq!(m.samples, 2);
        assert!((m.f2 - 1.0).abs() < 1e-6);
        assert_eq!(m.per_class[0].true_positives, 1);
        assert_eq!(m.per_class[0].support, 1);
        assert_eq!(m.per_class[1].precision(), 1.0);
    }

    #[test]
    fn f2_weights_recall() {
        // tp = 1, fp = 1, fn = 0: precision 0.5, recall 1.
        let f2 = sample_fbeta(&[0.9, 0.9], &[1.0, 0.0], 0.5, F2_BETA);
        assert!((f2 - 5.0 * 0.5 / (4.0 * 0.5 + 1.0)).abs() < 1e-6);
        // tp = 1, fp = 0, fn = 1: precision 1, recall 0.5.
        let f2 = sample_fbeta(&[0.9, 0.1], &[1.0, 1.0], 0.5, F2_BETA);
        assert!((f2 - 5.0 * 0.5 / (4.0 + 0.5)).abs() < 1e-6);
    }

    #[test]
    fn class_without_predictions_has_zero_precision() {
        let m = evaluate(&[0.1, 0.1], &[1.0, 1.0], 1, 0.5);
        assert_eq!(m.per_class[0].precision(), 0.0);
        assert_eq!(m.per_class[0].recall(), 0.0);
        assert_eq!(m.f2, 0.0);
    }
}
