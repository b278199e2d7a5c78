//! Residual networks (He et al.) in the torchvision layout.
//!
//! Field names follow torchvision (`conv1`, `bn1`, `layer1.0.conv1`, ...) so a
//! converted ImageNet checkpoint maps onto [`ResNetFeatures`] with only the
//! `downsample.{0,1}` keys renamed.

use burn::module::Module;
use burn::nn;
use burn::nn::conv::Conv2d;
use burn::nn::pool::{AdaptiveAvgPool2d, MaxPool2d};
use burn::nn::BatchNorm;
use burn::record::{BinFileRecorder, FullPrecisionSettings, RecorderError};
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use std::path::Path;

use crate::backbone::BackboneOutput;
use crate::layers::{adaptive_pool, batch_norm, conv2d, flatten, he_linear, max_pool};

const BN_EPS: f64 = 1e-5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// Two 3x3 convolutions (ResNet-18/34).
    Basic,
    /// 1x1 -> 3x3 -> 1x1 with 4x channel expansion (ResNet-50 and deeper).
    Bottleneck,
}

impl BlockKind {
    pub fn expansion(&self) -> usize {
        match self {
            BlockKind::Basic => 1,
            BlockKind::Bottleneck => 4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResNetConfig {
    pub block: BlockKind,
    pub layers: [usize; 4],
}

impl ResNetConfig {
    pub fn resnet18() -> Self {
        Self {
            block: BlockKind::Basic,
            layers: [2, 2, 2, 2],
        }
    }

    pub fn resnet34() -> Self {
        Self {
            block: BlockKind::Basic,
            layers: [3, 4, 6, 3],
        }
    }

    pub fn resnet50() -> Self {
        Self {
            block: BlockKind::Bottleneck,
            layers: [3, 4, 6, 3],
        }
    }

    pub fn resnet101() -> Self {
        Self {
            block: BlockKind::Bottleneck,
            layers: [3, 4, 23, 3],
        }
    }

    pub fn resnet152() -> Self {
        Self {
            block: BlockKind::Bottleneck,
            layers: [3, 8, 36, 3],
        }
    }

    /// Width of the pooled feature vector.
    pub fn out_channels(&self) -> usize {
        512 * self.block.expansion()
    }
}

#[derive(Debug, Module)]
pub struct Downsample<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B>,
}

impl<B: Backend> Downsample<B> {
    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn.forward(self.conv.forward(input))
    }
}

#[derive(Debug, Module)]
pub struct ResidualBlock<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B>,
    conv2: Conv2d<B>,
    bn2: BatchNorm<B>,
    conv3: Option<Conv2d<B>>,
    bn3: Option<BatchNorm<B>>,
    downsample: Option<Downsample<B>>,
}

impl<B: Backend> ResidualBlock<B> {
    pub fn new(
        kind: BlockKind,
        in_channels: usize,
        planes: usize,
        stride: usize,
        device: &B::Device,
    ) -> Self {
        let out_channels = planes * kind.expansion();
        let downsample = (stride != 1 || in_channels != out_channels).then(|| Downsample {
            conv: conv2d([in_channels, out_channels], [1, 1], stride, [0, 0], false, device),
            bn: batch_norm(out_channels, BN_EPS, device),
        });

        match kind {
            BlockKind::Basic => Self {
                conv1: conv2d([in_channels, planes], [3, 3], stride, [1, 1], false, device),
                bn1: batch_norm(planes, BN_EPS, device),
                conv2: conv2d([planes, planes], [3, 3], 1, [1, 1], false, device),
                bn2: batch_norm(planes, BN_EPS, device),
                conv3: None,
                bn3: None,
                downsample,
            },
            // Stride sits on the 3x3 convolution (torchvision "v1.5").
            BlockKind::Bottleneck => Self {
                conv1: conv2d([in_channels, planes], [1, 1], 1, [0, 0], false, device),
                bn1: batch_norm(planes, BN_EPS, device),
                conv2: conv2d([planes, planes], [3, 3], stride, [1, 1], false, device),
                bn2: batch_norm(planes, BN_EPS, device),
                conv3: Some(conv2d([planes, out_channels], [1, 1], 1, [0, 0], false, device)),
                bn3: Some(batch_norm(out_channels, BN_EPS, device)),
                downsample,
            },
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(downsample) => downsample.forward(input.clone()),
            None => input.clone(),
        };

        let x = relu(self.bn1.forward(self.conv1.forward(input)));
        let x = self.bn2.forward(self.conv2.forward(x));
        let x = match (&self.conv3, &self.bn3) {
            (Some(conv3), Some(bn3)) => bn3.forward(conv3.forward(relu(x))),
            _ => x,
        };

        relu(x + identity)
    }
}

/// Everything up to and including global average pooling.
#[derive(Debug, Module)]
pub struct ResNetFeatures<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B>,
    maxpool: MaxPool2d,
    layer1: Vec<ResidualBlock<B>>,
    layer2: Vec<ResidualBlock<B>>,
    layer3: Vec<ResidualBlock<B>>,
    layer4: Vec<ResidualBlock<B>>,
    avgpool: AdaptiveAvgPool2d,
}

impl<B: Backend> ResNetFeatures<B> {
    pub fn new(cfg: &ResNetConfig, device: &B::Device) -> Self {
        let mut in_channels = 64;
        let mut stage = |planes: usize, blocks: usize, stride: usize| {
            let mut layer = Vec::with_capacity(blocks);
            for i in 0..blocks {
                let block_stride = if i == 0 { stride } else { 1 };
                layer.push(ResidualBlock::new(
                    cfg.block,
                    in_channels,
                    planes,
                    block_stride,
                    device,
                ));
                in_channels = planes * cfg.block.expansion();
            }
            layer
        };

        let layer1 = stage(64, cfg.layers[0], 1);
        let layer2 = stage(128, cfg.layers[1], 2);
        let layer3 = stage(256, cfg.layers[2], 2);
        let layer4 = stage(512, cfg.layers[3], 2);

        Self {
            conv1: conv2d([3, 64], [7, 7], 2, [3, 3], false, device),
            bn1: batch_norm(64, BN_EPS, device),
            maxpool: max_pool(3, 2, 1),
            layer1,
            layer2,
            layer3,
            layer4,
            avgpool: adaptive_pool([1, 1]),
        }
    }

    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = relu(self.bn1.forward(self.conv1.forward(images)));
        x = self.maxpool.forward(x);
        for block in self
            .layer1
            .iter()
            .chain(&self.layer2)
            .chain(&self.layer3)
            .chain(&self.layer4)
        {
            x = block.forward(x);
        }
        flatten(self.avgpool.forward(x))
    }
}

#[derive(Debug, Module)]
pub struct ResNet<B: Backend> {
    features: ResNetFeatures<B>,
    fc: nn::Linear<B>,
}

impl<B: Backend> ResNet<B> {
    pub fn new(cfg: &ResNetConfig, num_classes: usize, device: &B::Device) -> Self {
        Self {
            features: ResNetFeatures::new(cfg, device),
            fc: he_linear(cfg.out_channels(), num_classes, device),
        }
    }

    pub fn forward(&self, images: Tensor<B, 4>) -> BackboneOutput<B> {
        BackboneOutput::single(self.fc.forward(self.features.forward(images)))
    }

    pub fn features(&self) -> &ResNetFeatures<B> {
        &self.features
    }

    pub fn fc(&self) -> &nn::Linear<B> {
        &self.fc
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
