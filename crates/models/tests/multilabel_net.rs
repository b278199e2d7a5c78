use burn::backend::Autodiff;
use burn::module::{AutodiffModule, Module};
use burn::nn::Linear;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::{Distribution, Tensor};
use burn_ndarray::NdArray;
use models::layers::he_linear;
use models::resnet::{ResNet, ResNetConfig, ResNetFeatures};
use models::{Backbone, BackboneKind, MultiLabelNet, MultiLabelNetConfig};

type B = NdArray<f32>;
type ADBackend = Autodiff<B>;

fn heavy_tests_enabled() -> bool {
    std::env::var("PLANET_HEAVY_TESTS").is_ok()
}

#[test]
fn resnet18_head_emits_backbone_and_cross_label_logits() {
    let device = Default::default();
    let net = MultiLabelNet::<B>::new(MultiLabelNetConfig::new(BackboneKind::ResNet18, 17), &device);
    let images = Tensor::<B, 4>::random([2, 3, 32, 32], Distribution::Default, &device);

    let out = net.forward(images);
    assert_eq!(out.backbone_logits.dims(), [2, 17]);
    assert_eq!(out.cross_label_logits.dims(), [2, 17]);
    assert!(out.aux_logits.is_none());

    let probs = out.probabilities().into_data().to_vec::<f32>().unwrap();
    assert!(probs.iter().all(|p| *p > 0.0 && *p < 1.0));
}

#[test]
fn he_linear_has_zero_bias_and_scaled_weights() {
    let device = Default::default();
    let linear = he_linear::<B>(256, 256, &device);

    let bias = linear.bias.as_ref().unwrap().val().into_data().to_vec::<f32>().unwrap();
    assert!(bias.iter().all(|b| *b == 0.0));

    let weights = linear.weight.val().into_data().to_vec::<f32>().unwrap();
    let n = weights.len() as f32;
    let mean = weights.iter().sum::<f32>() / n;
    let var = weights.iter().map(|w| (w - mean).powi(2)).sum::<f32>() / n;
    let expected = (2.0f32 / 256.0).sqrt();
    assert!(mean.abs() < 0.01, "mean {mean}");
    assert!((var.sqrt() - expected).abs() < expected * 0.1, "std {}", var.sqrt());
}

#[test]
fn snapshot_round_trip_restores_outputs() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("snapshot.bin");
    let device = Default::default();
    let cfg = MultiLabelNetConfig::new(BackboneKind::ResNet18, 5);

    let trained = MultiLabelNet::<B>::new(cfg.clone(), &device);
    trained.save_snapshot(&path).unwrap();
    let restored = MultiLabelNet::<B>::new(cfg, &device)
        .load_snapshot(&path, &device)
        .unwrap();

    let images = Tensor::<B, 4>::random([1, 3, 32, 32], Distribution::Default, &device);
    let a = trained.forward(images.clone()).cross_label_logits;
    let b = restored.forward(images).cross_label_logits;
    let a = a.into_data().to_vec::<f32>().unwrap();
    let b = b.into_data().to_vec::<f32>().unwrap();
    for (x, y) in a.iter().zip(b.iter()) {
        assert!((x - y).abs() < 1e-5);
    }
}

fn to_vec<const D: usize>(t: Tensor<B, D>) -> Vec<f32> {
    t.into_data().to_vec::<f32>().unwrap()
}

fn assert_close(a: &[f32], b: &[f32]) {
    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(b) {
        assert!((x - y).abs() < 1e-5, "{x} vs {y}");
    }
}

fn linear_weights(linear: &Linear<B>) -> Vec<f32> {
    to_vec(linear.weight.val())
}

fn resnet_of(net: &MultiLabelNet<B>) -> &ResNet<B> {
    match net.backbone() {
        Backbone::ResNet(resnet) => resnet,
        other => panic!("expected a resnet backbone, got {other:?}"),
    }
}

#[test]
fn pretrained_features_replace_only_the_extractor() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("resnet18_features.bin");
    let device = Default::default();

    let pretrained = ResNetFeatures::<B>::new(&ResNetConfig::resnet18(), &device);
    pretrained
        .clone()
        .save_file(&path, &BinFileRecorder::<FullPrecisionSettings>::new())
        .unwrap();

    let fresh = MultiLabelNet::<B>::new(MultiLabelNetConfig::new(BackboneKind::ResNet18, 6), &device);
    let loaded = fresh
        .clone()
        .load_pretrained_features(&path, &device)
        .unwrap();

    let images = Tensor::<B, 4>::random([2, 3, 32, 32], Distribution::Default, &device);
    let expected = to_vec(pretrained.forward(images.clone()));
    let before = to_vec(resnet_of(&fresh).features().forward(images.clone()));
    let after = to_vec(resnet_of(&loaded).features().forward(images));
    assert_close(&after, &expected);
    assert!(before.iter().zip(&expected).any(|(x, y)| (x - y).abs() > 1e-5));

    assert_close(
        &linear_weights(resnet_of(&loaded).fc()),
        &linear_weights(resnet_of(&fresh).fc()),
    );
    assert_close(
        &linear_weights(loaded.cross_label()),
        &linear_weights(fresh.cross_label()),
    );
}

#[test]
fn resnet50_bottleneck_forward_shape() {
    if !heavy_tests_enabled() {
        eprintln!("PLANET_HEAVY_TESTS not set; skipping resnet50 forward.");
        return;
    }
    let device = Default::default();
    let net = MultiLabelNet::<B>::new(MultiLabelNetConfig::new(BackboneKind::ResNet50, 5), &device);
    let images = Tensor::<B, 4>::random([2, 3, 32, 32], Distribution::Default, &device);
    let out = net.forward(images);
    assert_eq!(out.backbone_logits.dims(), [2, 5]);
    assert_eq!(out.cross_label_logits.dims(), [2, 5]);
    assert!(out.aux_logits.is_none());
}

#[test]
fn vgg19_forward_shape() {
    if !heavy_tests_enabled() {
        eprintln!("PLANET_HEAVY_TESTS not set; skipping vgg19 forward.");
        return;
    }
    let device = Default::default();
    let net = MultiLabelNet::<B>::new(MultiLabelNetConfig::new(BackboneKind::Vgg19, 4), &device);
    let images = Tensor::<B, 4>::random([1, 3, 32, 32], Distribution::Default, &device);
    let out = net.forward(images);
    assert_eq!(out.backbone_logits.dims(), [1, 4]);
    assert_eq!(out.cross_label_logits.dims(), [1, 4]);
}

#[test]
fn densenet121_forward_shape() {
    if !heavy_tests_enabled() {
        eprintln!("PLANET_HEAVY_TESTS not set; skipping densenet forward.");
        return;
    }
    let device = Default::default();
    let net =
        MultiLabelNet::<B>::new(MultiLabelNetConfig::new(BackboneKind::DenseNet121, 4), &device);
    let images = Tensor::<B, 4>::random([1, 3, 32, 32], Distribution::Default, &device);
    assert_eq!(net.forward(images).cross_label_logits.dims(), [1, 4]);
}

#[test]
fn inception_aux_logits_only_in_training_mode() {
    if !heavy_tests_enabled() {
        eprintln!("PLANET_HEAVY_TESTS not set; skipping inception forward.");
        return;
    }
    let device = Default::default();
    let net = MultiLabelNet::<ADBackend>::new(
        MultiLabelNetConfig::new(BackboneKind::InceptionV3, 3),
        &device,
    );
    let size = BackboneKind::InceptionV3.min_input_size();
    let images = Tensor::<ADBackend, 4>::random([2, 3, size, size], Distribution::Default, &device);

    let train_out = net.forward(images.clone());
    assert_eq!(train_out.aux_logits.map(|t| t.dims()), Some([2, 3]));

    let eval_out = net.valid().forward(images.inner());
    assert!(eval_out.aux_logits.is_none());
    assert_eq!(eval_out.cross_label_logits.dims(), [2, 3]);
}
