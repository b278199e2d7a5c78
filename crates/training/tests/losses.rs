use burn::tensor::Tensor;
use training::loss::{multilabel_soft_margin_loss, binary_cross_entropy, scalar, MultiLabelLoss};
use training::MultiLabelOutput;

type B = burn_ndarray::NdArray<f32>;

fn tensor(values: &[f32], shape: [usize; 2]) -> Tensor<B, 2> {
    Tensor::<B, 1>::from_floats(values, &Default::default()).reshape(shape)
}

fn output(aux: Option<Tensor<B, 2>>) -> MultiLabelOutput<B> {
    MultiLabelOutput {
        backbone_logits: tensor(&[1.0, -2.0, 0.5, 0.0], [2, 2]),
        aux_logits: aux,
        cross_label_logits: tensor(&[0.3, -0.3, 2.0, -1.0], [2, 2]),
    }
}

#[test]
fn total_is_soft_margin_plus_bce() {
    let targets = tensor(&[1.0, 0.0, 1.0, 1.0], [2, 2]);
    let terms = MultiLabelLoss::default().forward(output(None), targets.clone());
    let expected_main = scalar(binary_cross_entropy(
        burn::tensor::activation::sigmoid(tensor(&[0.3, -0.3, 2.0, -1.0], [2, 2])),
        targets.clone(),
    ));
    let expected_backbone =
        scalar(multilabel_soft_margin_loss(tensor(&[1.0, -2.0, 0.5, 0.0], [2, 2]), targets));
    assert!((scalar(terms.main) - expected_main).abs() < 1e-6);
    assert!((scalar(terms.total) - (expected_main + expected_backbone)).abs() < 1e-5);
}

#[test]
fn aux_logits_are_weighted() {
    let targets = tensor(&[1.0, 0.0, 0.0, 1.0], [2, 2]);
    let aux = tensor(&[0.0; 4], [2, 2]);
    let without = scalar(MultiLabelLoss::new(0.4).forward(output(None), targets.clone()).total);
    let with = scalar(MultiLabelLoss::new(0.4).forward(output(Some(aux)), targets).total);
    // Zero logits give a soft-margin loss of ln 2.
    assert!((with - without - 0.4 * std::f32::consts::LN_2).abs() < 1e-5);
}
