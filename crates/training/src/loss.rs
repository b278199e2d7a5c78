//! Multi-label losses.

use burn::tensor::activation::{log_sigmoid, sigmoid};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use models::MultiLabelOutput;

/// Lower bound applied to each log term of the binary cross entropy.
pub const LOG_CLAMP: f32 = -100.0;

/// `-mean(t * log(sigmoid(x)) + (1 - t) * log(sigmoid(-x)))` over every element.
pub fn multilabel_soft_margin_loss<B: Backend>(
    logits: Tensor<B, 2>,
    targets: Tensor<B, 2>,
) -> Tensor<B, 1> {
    let pos = log_sigmoid(logits.clone()) * targets.clone();
    let neg = log_sigmoid(logits.neg()) * targets.neg().add_scalar(1.0);
    (pos + neg).mean().neg()
}

/// Binary cross entropy on probabilities, each log term clamped at [`LOG_CLAMP`].
pub fn binary_cross_entropy<B: Backend>(
    probs: Tensor<B, 2>,
    targets: Tensor<B, 2>,
) -> Tensor<B, 1> {
    let log_p = probs.clone().log().clamp_min(LOG_CLAMP);
    let log_not_p = probs.neg().add_scalar(1.0).log().clamp_min(LOG_CLAMP);
    let pos = targets.clone() * log_p;
    let neg = targets.neg().add_scalar(1.0) * log_not_p;
    (pos + neg).mean().neg()
}

pub struct LossTerms<B: Backend> {
    /// Quantity to back-propagate.
    pub total: Tensor<B, 1>,
    /// BCE of the cross-label head; this is the reported training loss.
    pub main: Tensor<B, 1>,
}

#[derive(Debug, Clone, Copy)]
pub struct MultiLabelLoss {
    pub aux_weight: f32,
}

impl Default for MultiLabelLoss {
    fn default() -> Self {
        Self { aux_weight: 0.4 }
    }
}

impl MultiLabelLoss {
    pub fn new(aux_weight: f32) -> Self {
        Self { aux_weight }
    }

    pub fn forward<B: Backend>(
        &self,
        output: MultiLabelOutput<B>,
        targets: Tensor<B, 2>,
    ) -> LossTerms<B> {
        let MultiLabelOutput {
            backbone_logits,
            aux_logits,
            cross_label_logits,
        } = output;
        let backbone = multilabel_soft_margin_loss(backbone_logits, targets.clone());
        let main = binary_cross_entropy(sigmoid(cross_label_logits), targets.clone());
        let mut total = backbone + main.clone();
        if let Some(aux) = aux_logits {
            total = total + multilabel_soft_margin_loss(aux, targets).mul_scalar(self.aux_weight);
        }
        LossTerms { total, main }
    }
}

/// First element of a loss tensor as `f32`.
pub fn scalar<B: Backend>(value: Tensor<B, 1>) -> f32 {
    value
        .into_data()
        .to_vec::<f32>()
        .unwrap_or_default()
        .into_iter()
        .next()
        .unwrap_or(f32::NAN)
}

#[cfg(test)]
mod tests {
    use super::*;

    type B = burn_ndarray::NdArray<f32>;

    fn tensor(values: &[f32], shape: [usize; 2]) -> Tensor<B, 2> {
        Tensor::<B, 1>::from_floats(values, &Default::default()).reshape(shape)
    }

    #[test]
    fn soft_margin_at_zero_logits_is_ln2() {
        let loss = multilabel_soft_margin_loss(
            tensor(&[0.0; 6], [2, 3]),
            tensor(&[1.0, 0.0, 1.0, 0.0, 0.0, 1.0], [2, 3]),
        );
        assert!((scalar(loss) - std::f32::consts::LN_2).abs() < 1e-5);
    }

    #[test]
    fn soft_margin_matches_closed_form() {
        let x = [2.0f32, -1.0];
        let t = [1.0f32, 1.0];
        let expected = -(x
            .iter()
            .zip(t)
            .map(|(x, t)| {
                let s = 1.0 / (1.0 + (-x).exp());
                t * s.ln() + (1.0 - t) * (1.0 - s).ln()
            })
            .sum::<f32>()
            / 2.0);
        let loss = multilabel_soft_margin_loss(tensor(&x, [1, 2]), tensor(&t, [1, 2]));
        assert!((scalar(loss) - expected).abs() < 1e-5);
    }

    #[test]
    fn bce_clamps_log_of_zero() {
        let loss = binary_cross_entropy(tensor(&[0.0, 1.0], [1, 2]), tensor(&[1.0, 0.0], [1, 2]));
        assert!((scalar(loss) - 100.0).abs() < 1e-3);
    }

    #[test]
    fn bce_of_half_is_ln2() {
        let loss = binary_cross_entropy(tensor(&[0.5; 4], [2, 2]), tensor(&[1.0, 0.0, 0.0, 1.0], [2, 2]));
        assert!((scalar(loss) - std::f32::consts::LN_2).abs() < 1e-5);
    }
}
