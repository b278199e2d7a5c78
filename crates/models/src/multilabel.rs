//! Multi-label wrapper: backbone logits re-projected by a cross-label layer.

use burn::module::Module;
use burn::nn;
use burn::record::{BinFileRecorder, FullPrecisionSettings, RecorderError};
use burn::tensor::activation::sigmoid;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use std::path::Path;

use crate::backbone::{Backbone, BackboneKind, BackboneOutput};
use crate::layers::he_linear;

#[derive(Debug, Clone)]
pub struct MultiLabelNetConfig {
    pub backbone: BackboneKind,
    pub num_classes: usize,
    /// Dropout before the classifier (VGG and Inception only).
    pub dropout: f64,
    /// Inception only: map ImageNet-normalised input to `[-1, 1]`.
    pub transform_input: bool,
}

impl MultiLabelNetConfig {
    pub fn new(backbone: BackboneKind, num_classes: usize) -> Self {
        Self {
            backbone,
            num_classes,
            dropout: 0.5,
            transform_input: true,
        }
    }
}

/// Forward pass result.
///
/// `backbone_logits` are the backbone's own per-label logits; the
/// `cross_label_logits` mix them through a learned label-to-label layer.
#[derive(Debug, Clone)]
pub struct MultiLabelOutput<B: Backend> {
    pub backbone_logits: Tensor<B, 2>,
    pub aux_logits: Option<Tensor<B, 2>>,
    pub cross_label_logits: Tensor<B, 2>,
}

impl<B: Backend> MultiLabelOutput<B> {
    /// Per-label probabilities of the main (cross-label) head.
    pub fn probabilities(&self) -> Tensor<B, 2> {
        sigmoid(self.cross_label_logits.clone())
    }
}

#[derive(Debug, Module)]
pub struct MultiLabelNet<B: Backend> {
    backbone: Backbone<B>,
    cross_label: nn::Linear<B>,
    num_classes: usize,
}

impl<B: Backend> MultiLabelNet<B> {
    pub fn new(cfg: MultiLabelNetConfig, device: &B::Device) -> Self {
        Self {
            backbone: Backbone::new(
                cfg.backbone,
                cfg.num_classes,
                cfg.dropout,
                cfg.transform_input,
                device,
            ),
            cross_label: he_linear(cfg.num_classes, cfg.num_classes, device),
            num_classes: cfg.num_classes,
        }
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn backbone(&self) -> &Backbone<B> {
        &self.backbone
    }

    pub fn cross_label(&self) -> &nn::Linear<B> {
        &self.cross_label
    }

    pub fn forward(&self, images: Tensor<B, 4>) -> MultiLabelOutput<B> {
        let BackboneOutput { logits, aux_logits } = self.backbone.forward(images);
        let cross_label_logits = self.cross_label.forward(logits.clone());
        MultiLabelOutput {
            backbone_logits: logits,
            aux_logits,
            cross_label_logits,
        }
    }

    /// Replaces the backbone's feature extractor with pretrained weights.
    pub fn load_pretrained_features(
        mut self,
        path: &Path,
        device: &B::Device,
    ) -> Result<Self, RecorderError> {
        self.backbone = self.backbone.load_features(path, device)?;
        log::info!("loaded pretrained features {}", path.display());
        Ok(self)
    }

    pub fn load_snapshot(self, path: &Path, device: &B::Device) -> Result<Self, RecorderError> {
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        let net = self.load_file(path, &recorder, device)?;
        log::info!("load snapshot {}", path.display());
        Ok(net)
    }

    pub fn save_snapshot(&self, path: &Path) -> Result<(), RecorderError> {
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        self.clone().save_file(path, &recorder)
    }
}
