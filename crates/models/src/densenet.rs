//! Densely connected networks (Huang et al.), BC variant with compression 0.5.

use burn::module::Module;
use burn::nn;
use burn::nn::conv::Conv2d;
use burn::nn::pool::{AdaptiveAvgPool2d, AvgPool2d, MaxPool2d};
use burn::nn::BatchNorm;
use burn::record::{BinFileRecorder, FullPrecisionSettings, RecorderError};
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use std::path::Path;

use crate::backbone::BackboneOutput;
use crate::layers::{
    adaptive_pool, avg_pool, batch_norm, conv2d, flatten, he_linear, max_pool,
};

const BN_EPS: f64 = 1e-5;

#[derive(Debug, Clone)]
pub struct DenseNetConfig {
    pub growth_rate: usize,
    pub block_config: [usize; 4],
    pub num_init_features: usize,
    pub bn_size: usize,
}

impl DenseNetConfig {
    pub fn densenet121() -> Self {
        Self::with_blocks([6, 12, 24, 16])
    }

    pub fn densenet169() -> Self {
        Self::with_blocks([6, 12, 32, 32])
    }

    pub fn densenet201() -> Self {
        Self::with_blocks([6, 12, 48, 32])
    }

    fn with_blocks(block_config: [usize; 4]) -> Self {
        Self {
            growth_rate: 32,
            block_config,
            num_init_features: 64,
            bn_size: 4,
        }
    }

    /// Channels after the last dense block.
    pub fn out_channels(&self) -> usize {
        let mut channels = self.num_init_features;
        for (i, layers) in self.block_config.iter().enumerate() {
            channels += layers * self.growth_rate;
            if i + 1 < self.block_config.len() {
                channels /= 2;
            }
        }
        channels
    }
}

#[derive(Debug, Module)]
pub struct DenseLayer<B: Backend> {
    norm1: BatchNorm<B>,
    conv1: Conv2d<B>,
    norm2: BatchNorm<B>,
    conv2: Conv2d<B>,
}

impl<B: Backend> DenseLayer<B> {
    fn new(in_channels: usize, cfg: &DenseNetConfig, device: &B::Device) -> Self {
        let inner = cfg.bn_size * cfg.growth_rate;
        Self {
            norm1: batch_norm(in_channels, BN_EPS, device),
            conv1: conv2d([in_channels, inner], [1, 1], 1, [0, 0], false, device),
            norm2: batch_norm(inner, BN_EPS, device),
            conv2: conv2d([inner, cfg.growth_rate], [3, 3], 1, [1, 1], false, device),
        }
    }

    /// Returns only the `growth_rate` new channels.
    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv1.forward(relu(self.norm1.forward(input)));
        self.conv2.forward(relu(self.norm2.forward(x)))
    }
}

#[derive(Debug, Module)]
pub struct DenseBlock<B: Backend> {
    layers: Vec<DenseLayer<B>>,
}

impl<B: Backend> DenseBlock<B> {
    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut features = input;
        for layer in &self.layers {
            let new_features = layer.forward(features.clone());
            features = Tensor::cat(vec![features, new_features], 1);
        }
        features
    }
}

#[derive(Debug, Module)]
pub struct Transition<B: Backend> {
    norm: BatchNorm<B>,
    conv: Conv2d<B>,
    pool: AvgPool2d,
}

impl<B: Backend> Transition<B> {
    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(relu(self.norm.forward(input)));
        self.pool.forward(x)
    }
}

#[derive(Debug, Module)]
pub struct DenseNetFeatures<B: Backend> {
    conv0: Conv2d<B>,
    norm0: BatchNorm<B>,
    pool0: MaxPool2d,
    blocks: Vec<DenseBlock<B>>,
    transitions: Vec<Transition<B>>,
    norm5: BatchNorm<B>,
    avgpool: AdaptiveAvgPool2d,
}

impl<B: Backend> DenseNetFeatures<B> {
    pub fn new(cfg: &DenseNetConfig, device: &B::Device) -> Self {
        let mut channels = cfg.num_init_features;
        let mut blocks = Vec::with_capacity(cfg.block_config.len());
        let mut transitions = Vec::with_capacity(cfg.block_config.len() - 1);

        for (i, &num_layers) in cfg.block_config.iter().enumerate() {
            let mut layers = Vec::with_capacity(num_layers);
            for _ in 0..num_layers {
                layers.push(DenseLayer::new(channels, cfg, device));
                channels += cfg.growth_rate;
            }
            blocks.push(DenseBlock { layers });

            if i + 1 < cfg.block_config.len() {
                transitions.push(Transition {
                    norm: batch_norm(channels, BN_EPS, device),
                    conv: conv2d([channels, channels / 2], [1, 1], 1, [0, 0], false, device),
                    pool: avg_pool(2, 2, 0),
                });
                channels /= 2;
            }
        }

        Self {
            conv0: conv2d([3, cfg.num_init_features], [7, 7], 2, [3, 3], false, device),
            norm0: batch_norm(cfg.num_init_features, BN_EPS, device),
            pool0: max_pool(3, 2, 1),
            blocks,
            transitions,
            norm5: batch_norm(channels, BN_EPS, device),
            avgpool: adaptive_pool([1, 1]),
        }
    }

    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = relu(self.norm0.forward(self.conv0.forward(images)));
        let mut x = self.pool0.forward(x);
        for (i, block) in self.blocks.iter().enumerate() {
            x = block.forward(x);
            if let Some(transition) = self.transitions.get(i) {
                x = transition.forward(x);
            }
        }
        let x = relu(self.norm5.forward(x));
        flatten(self.avgpool.forward(x))
    }
}

#[derive(Debug, Module)]
pub struct DenseNet<B: Backend> {
    features: DenseNetFeatures<B>,
    classifier: nn::Linear<B>,
}

impl<B: Backend> DenseNet<B> {
    pub fn new(cfg: &DenseNetConfig, num_classes: usize, device: &B::Device) -> Self {
        Self {
            features: DenseNetFeatures::new(cfg, device),
            classifier: he_linear(cfg.out_channels(), num_classes, device),
        }
    }

    pub fn forward(&self, images: Tensor<B, 4>) -> BackboneOutput<B> {
        BackboneOutput::single(self.classifier.forward(self.features.forward(images)))
    }

    pub fn load_features(
        mut self,
        path: &Path,
        recorder: &BinFileRecorder<FullPrecisionSettings>,
        device: &B::Device,
    ) -> Result<Self, RecorderError> {
        self.features = self.features.load_file(path, recorder, device)?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_channels_match_torchvision() {
        assert_eq!(DenseNetConfig::densenet121().out_channels(), 1024);
        assert_eq!(DenseNetConfig::densenet169().out_channels(), 1664);
        assert_eq!(DenseNetConfig::densenet201().out_channels(), 1920);
    }
}
