//! Inception v3 (Szegedy et al., 2015) with its auxiliary classifier.
//!
//! Module and branch names mirror torchvision in snake case
//! (`Mixed_5b.branch5x5_1` becomes `mixed_5b.branch5x5_1`). The auxiliary
//! classifier only runs when the backend tracks gradients, which is how the
//! training loop distinguishes train from eval passes.

use burn::module::Module;
use burn::nn;
use burn::nn::conv::Conv2d;
use burn::nn::pool::{AdaptiveAvgPool2d, AvgPool2d, MaxPool2d};
use burn::nn::{BatchNorm, Dropout, DropoutConfig};
use burn::record::{BinFileRecorder, FullPrecisionSettings, RecorderError};
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use std::path::Path;

use crate::backbone::BackboneOutput;
use crate::layers::{adaptive_pool, avg_pool, batch_norm, conv2d, flatten, he_linear, max_pool};

const BN_EPS: f64 = 1e-3;
const AUX_CHANNELS: usize = 768;
const OUT_CHANNELS: usize = 2048;

/// Smallest square input that keeps the auxiliary classifier's 5x5 pool and
/// convolution valid (Mixed_6e must still be 17x17).
pub const MIN_INPUT_SIZE: usize = 299;

#[derive(Debug, Module)]
pub struct BasicConv2d<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B>,
}

impl<B: Backend> BasicConv2d<B> {
    fn new(
        channels: [usize; 2],
        kernel: [usize; 2],
        stride: usize,
        padding: [usize; 2],
        device: &B::Device,
    ) -> Self {
        Self {
            conv: conv2d(channels, kernel, stride, padding, false, device),
            bn: batch_norm(channels[1], BN_EPS, device),
        }
    }

    fn square(in_ch: usize, out_ch: usize, kernel: usize, device: &B::Device) -> Self {
        Self::new([in_ch, out_ch], [kernel, kernel], 1, [kernel / 2, kernel / 2], device)
    }

    fn strided(in_ch: usize, out_ch: usize, kernel: usize, device: &B::Device) -> Self {
        Self::new([in_ch, out_ch], [kernel, kernel], 2, [0, 0], device)
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        relu(self.bn.forward(self.conv.forward(x)))
    }
}

/// 1x7 / 7x1 (and 1x3 / 3x1) factorised convolutions.
fn row<B: Backend>(in_ch: usize, out_ch: usize, k: usize, device: &B::Device) -> BasicConv2d<B> {
    BasicConv2d::new([in_ch, out_ch], [1, k], 1, [0, k / 2], device)
}

fn col<B: Backend>(in_ch: usize, out_ch: usize, k: usize, device: &B::Device) -> BasicConv2d<B> {
    BasicConv2d::new([in_ch, out_ch], [k, 1], 1, [k / 2, 0], device)
}

#[derive(Debug, Module)]
pub struct InceptionA<B: Backend> {
    branch1x1: BasicConv2d<B>,
    branch5x5_1: BasicConv2d<B>,
    branch5x5_2: BasicConv2d<B>,
    branch3x3dbl_1: BasicConv2d<B>,
    branch3x3dbl_2: BasicConv2d<B>,
    branch3x3dbl_3: BasicConv2d<B>,
    branch_pool: BasicConv2d<B>,
    pool: AvgPool2d,
}

impl<B: Backend> InceptionA<B> {
    fn new(in_ch: usize, pool_features: usize, device: &B::Device) -> Self {
        Self {
            branch1x1: BasicConv2d::square(in_ch, 64, 1, device),
            branch5x5_1: BasicConv2d::square(in_ch, 48, 1, device),
            branch5x5_2: BasicConv2d::square(48, 64, 5, device),
            branch3x3dbl_1: BasicConv2d::square(in_ch, 64, 1, device),
            branch3x3dbl_2: BasicConv2d::square(64, 96, 3, device),
            branch3x3dbl_3: BasicConv2d::square(96, 96, 3, device),
            branch_pool: BasicConv2d::square(in_ch, pool_features, 1, device),
            pool: avg_pool(3, 1, 1),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let b1 = self.branch1x1.forward(x.clone());
        let b5 = self
            .branch5x5_2
            .forward(self.branch5x5_1.forward(x.clone()));
        let b3 = self.branch3x3dbl_1.forward(x.clone());
        let b3 = self.branch3x3dbl_3.forward(self.branch3x3dbl_2.forward(b3));
        let bp = self.branch_pool.forward(self.pool.forward(x));
        Tensor::cat(vec![b1, b5, b3, bp], 1)
    }
}

#[derive(Debug, Module)]
pub struct InceptionB<B: Backend> {
    branch3x3: BasicConv2d<B>,
    branch3x3dbl_1: BasicConv2d<B>,
    branch3x3dbl_2: BasicConv2d<B>,
    branch3x3dbl_3: BasicConv2d<B>,
    pool: MaxPool2d,
}

impl<B: Backend> InceptionB<B> {
    fn new(in_ch: usize, device: &B::Device) -> Self {
        Self {
            branch3x3: BasicConv2d::strided(in_ch, 384, 3, device),
            branch3x3dbl_1: BasicConv2d::square(in_ch, 64, 1, device),
            branch3x3dbl_2: BasicConv2d::square(64, 96, 3, device),
            branch3x3dbl_3: BasicConv2d::strided(96, 96, 3, device),
            pool: max_pool(3, 2, 0),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let b3 = self.branch3x3.forward(x.clone());
        let bd = self.branch3x3dbl_1.forward(x.clone());
        let bd = self.branch3x3dbl_3.forward(self.branch3x3dbl_2.forward(bd));
        let bp = self.pool.forward(x);
        Tensor::cat(vec![b3, bd, bp], 1)
    }
}

#[derive(Debug, Module)]
pub struct InceptionC<B: Backend> {
    branch1x1: BasicConv2d<B>,
    branch7x7_1: BasicConv2d<B>,
    branch7x7_2: BasicConv2d<B>,
    branch7x7_3: BasicConv2d<B>,
    branch7x7dbl_1: BasicConv2d<B>,
    branch7x7dbl_2: BasicConv2d<B>,
    branch7x7dbl_3: BasicConv2d<B>,
    branch7x7dbl_4: BasicConv2d<B>,
    branch7x7dbl_5: BasicConv2d<B>,
    branch_pool: BasicConv2d<B>,
    pool: AvgPool2d,
}

impl<B: Backend> InceptionC<B> {
    fn new(in_ch: usize, c7: usize, device: &B::Device) -> Self {
        Self {
            branch1x1: BasicConv2d::square(in_ch, 192, 1, device),
            branch7x7_1: BasicConv2d::square(in_ch, c7, 1, device),
            branch7x7_2: row(c7, c7, 7, device),
            branch7x7_3: col(c7, 192, 7, device),
            branch7x7dbl_1: BasicConv2d::square(in_ch, c7, 1, device),
            branch7x7dbl_2: col(c7, c7, 7, device),
            branch7x7dbl_3: row(c7, c7, 7, device),
            branch7x7dbl_4: col(c7, c7, 7, device),
            branch7x7dbl_5: row(c7, 192, 7, device),
            branch_pool: BasicConv2d::square(in_ch, 192, 1, device),
            pool: avg_pool(3, 1, 1),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let b1 = self.branch1x1.forward(x.clone());

        let b7 = self.branch7x7_1.forward(x.clone());
        let b7 = self.branch7x7_3.forward(self.branch7x7_2.forward(b7));

        let bd = self.branch7x7dbl_1.forward(x.clone());
        let bd = self.branch7x7dbl_2.forward(bd);
        let bd = self.branch7x7dbl_3.forward(bd);
        let bd = self.branch7x7dbl_4.forward(bd);
        let bd = self.branch7x7dbl_5.forward(bd);

        let bp = self.branch_pool.forward(self.pool.forward(x));
        Tensor::cat(vec![b1, b7, bd, bp], 1)
    }
}

#[derive(Debug, Module)]
pub struct InceptionD<B: Backend> {
    branch3x3_1: BasicConv2d<B>,
    branch3x3_2: BasicConv2d<B>,
    branch7x7x3_1: BasicConv2d<B>,
    branch7x7x3_2: BasicConv2d<B>,
    branch7x7x3_3: BasicConv2d<B>,
    branch7x7x3_4: BasicConv2d<B>,
    pool: MaxPool2d,
}

impl<B: Backend> InceptionD<B> {
    fn new(in_ch: usize, device: &B::Device) -> Self {
        Self {
            branch3x3_1: BasicConv2d::square(in_ch, 192, 1, device),
            branch3x3_2: BasicConv2d::strided(192, 320, 3, device),
            branch7x7x3_1: BasicConv2d::square(in_ch, 192, 1, device),
            branch7x7x3_2: row(192, 192, 7, device),
            branch7x7x3_3: col(192, 192, 7, device),
            branch7x7x3_4: BasicConv2d::strided(192, 192, 3, device),
            pool: max_pool(3, 2, 0),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let b3 = self.branch3x3_1.forward(x.clone());
        let b3 = self.branch3x3_2.forward(b3);

        let b7 = self.branch7x7x3_1.forward(x.clone());
        let b7 = self.branch7x7x3_2.forward(b7);
        let b7 = self.branch7x7x3_3.forward(b7);
        let b7 = self.branch7x7x3_4.forward(b7);

        let bp = self.pool.forward(x);
        Tensor::cat(vec![b3, b7, bp], 1)
    }
}

#[derive(Debug, Module)]
pub struct InceptionE<B: Backend> {
    branch1x1: BasicConv2d<B>,
    branch3x3_1: BasicConv2d<B>,
    branch3x3_2a: BasicConv2d<B>,
    branch3x3_2b: BasicConv2d<B>,
    branch3x3dbl_1: BasicConv2d<B>,
    branch3x3dbl_2: BasicConv2d<B>,
    branch3x3dbl_3a: BasicConv2d<B>,
    branch3x3dbl_3b: BasicConv2d<B>,
    branch_pool: BasicConv2d<B>,
    pool: AvgPool2d,
}

impl<B: Backend> InceptionE<B> {
    fn new(in_ch: usize, device: &B::Device) -> Self {
        Self {
            branch1x1: BasicConv2d::square(in_ch, 320, 1, device),
            branch3x3_1: BasicConv2d::square(in_ch, 384, 1, device),
            branch3x3_2a: row(384, 384, 3, device),
            branch3x3_2b: col(384, 384, 3, device),
            branch3x3dbl_1: BasicConv2d::square(in_ch, 448, 1, device),
            branch3x3dbl_2: BasicConv2d::square(448, 384, 3, device),
            branch3x3dbl_3a: row(384, 384, 3, device),
            branch3x3dbl_3b: col(384, 384, 3, device),
            branch_pool: BasicConv2d::square(in_ch, 192, 1, device),
            pool: avg_pool(3, 1, 1),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let b1 = self.branch1x1.forward(x.clone());

        let b3 = self.branch3x3_1.forward(x.clone());
        let b3 = Tensor::cat(
            vec![
                self.branch3x3_2a.forward(b3.clone()),
                self.branch3x3_2b.forward(b3),
            ],
            1,
        );

        let bd = self.branch3x3dbl_1.forward(x.clone());
        let bd = self.branch3x3dbl_2.forward(bd);
        let bd = Tensor::cat(
            vec![
                self.branch3x3dbl_3a.forward(bd.clone()),
                self.branch3x3dbl_3b.forward(bd),
            ],
            1,
        );

        let bp = self.branch_pool.forward(self.pool.forward(x));
        Tensor::cat(vec![b1, b3, bd, bp], 1)
    }
}

/// Convolutional trunk of the auxiliary classifier; its linear head lives on
/// [`InceptionV3`] so the trunk can be loaded from pretrained weights.
#[derive(Debug, Module)]
pub struct InceptionAux<B: Backend> {
    conv0: BasicConv2d<B>,
    conv1: BasicConv2d<B>,
    pool: AvgPool2d,
    avgpool: AdaptiveAvgPool2d,
}

impl<B: Backend> InceptionAux<B> {
    fn new(in_ch: usize, device: &B::Device) -> Self {
        Self {
            conv0: BasicConv2d::square(in_ch, 128, 1, device),
            conv1: BasicConv2d::new([128, AUX_CHANNELS], [5, 5], 1, [0, 0], device),
            pool: avg_pool(5, 3, 0),
            avgpool: adaptive_pool([1, 1]),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.conv0.forward(self.pool.forward(x));
        let x = self.conv1.forward(x);
        flatten(self.avgpool.forward(x))
    }
}

/// Pooled 2048-wide features plus, in training mode, the 768-wide auxiliary features.
pub struct InceptionFeatureMaps<B: Backend> {
    pub pooled: Tensor<B, 2>,
    pub aux: Option<Tensor<B, 2>>,
}

#[derive(Debug, Module)]
pub struct InceptionFeatures<B: Backend> {
    conv2d_1a_3x3: BasicConv2d<B>,
    conv2d_2a_3x3: BasicConv2d<B>,
    conv2d_2b_3x3: BasicConv2d<B>,
    conv2d_3b_1x1: BasicConv2d<B>,
    conv2d_4a_3x3: BasicConv2d<B>,
    mixed_5b: InceptionA<B>,
    mixed_5c: InceptionA<B>,
    mixed_5d: InceptionA<B>,
    mixed_6a: InceptionB<B>,
    mixed_6b: InceptionC<B>,
    mixed_6c: InceptionC<B>,
    mixed_6d: InceptionC<B>,
    mixed_6e: InceptionC<B>,
    aux_logits: InceptionAux<B>,
    mixed_7a: InceptionD<B>,
    mixed_7b: InceptionE<B>,
    mixed_7c: InceptionE<B>,
    pool: MaxPool2d,
    avgpool: AdaptiveAvgPool2d,
    transform_input: bool,
}

impl<B: Backend> InceptionFeatures<B> {
    pub fn new(transform_input: bool, device: &B::Device) -> Self {
        Self {
            conv2d_1a_3x3: BasicConv2d::strided(3, 32, 3, device),
            conv2d_2a_3x3: BasicConv2d::new([32, 32], [3, 3], 1, [0, 0], device),
            conv2d_2b_3x3: BasicConv2d::square(32, 64, 3, device),
            conv2d_3b_1x1: BasicConv2d::square(64, 80, 1, device),
            conv2d_4a_3x3: BasicConv2d::new([80, 192], [3, 3], 1, [0, 0], device),
            mixed_5b: InceptionA::new(192, 32, device),
            mixed_5c: InceptionA::new(256, 64, device),
            mixed_5d: InceptionA::new(288, 64, device),
            mixed_6a: InceptionB::new(288, device),
            mixed_6b: InceptionC::new(768, 128, device),
            mixed_6c: InceptionC::new(768, 160, device),
            mixed_6d: InceptionC::new(768, 160, device),
            mixed_6e: InceptionC::new(768, 192, device),
            aux_logits: InceptionAux::new(768, device),
            mixed_7a: InceptionD::new(768, device),
            mixed_7b: InceptionE::new(1280, device),
            mixed_7c: InceptionE::new(2048, device),
            pool: max_pool(3, 2, 0),
            avgpool: adaptive_pool([1, 1]),
            transform_input,
        }
    }

    /// Re-normalises ImageNet-standardised input to the `[-1, 1]` range the
    /// original Inception weights were trained on.
    fn transform(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        const MEAN: [f64; 3] = [0.485, 0.456, 0.406];
        const STD: [f64; 3] = [0.229, 0.224, 0.225];
        let [n, _, h, w] = x.dims();
        let channels: Vec<Tensor<B, 4>> = (0..3)
            .map(|c| {
                x.clone()
                    .slice([0..n, c..c + 1, 0..h, 0..w])
                    .mul_scalar(STD[c] / 0.5)
                    .add_scalar((MEAN[c] - 0.5) / 0.5)
            })
            .collect();
        Tensor::cat(channels, 1)
    }

    pub fn forward(&self, images: Tensor<B, 4>) -> InceptionFeatureMaps<B> {
        let mut x = if self.transform_input {
            self.transform(images)
        } else {
            images
        };

        x = self.conv2d_1a_3x3.forward(x);
        x = self.conv2d_2a_3x3.forward(x);
        x = self.conv2d_2b_3x3.forward(x);
        x = self.pool.forward(x);
        x = self.conv2d_3b_1x1.forward(x);
        x = self.conv2d_4a_3x3.forward(x);
        x = self.pool.forward(x);
        x = self.mixed_5b.forward(x);
        x = self.mixed_5c.forward(x);
        x = self.mixed_5d.forward(x);
        x = self.mixed_6a.forward(x);
        x = self.mixed_6b.forward(x);
        x = self.mixed_6c.forward(x);
        x = self.mixed_6d.forward(x);
        x = self.mixed_6e.forward(x);

        let aux = B::ad_enabled().then(|| self.aux_logits.forward(x.clone()));

        x = self.mixed_7a.forward(x);
        x = self.mixed_7b.forward(x);
        x = self.mixed_7c.forward(x);

        InceptionFeatureMaps {
            pooled: flatten(self.avgpool.forward(x)),
            aux,
        }
    }
}

#[derive(Debug, Module)]
pub struct InceptionV3<B: Backend> {
    features: InceptionFeatures<B>,
    aux_fc: nn::Linear<B>,
    dropout: Dropout,
    fc: nn::Linear<B>,
}

impl<B: Backend> InceptionV3<B> {
    pub fn new(
        num_classes: usize,
        dropout: f64,
        transform_input: bool,
        device: &B::Device,
    ) -> Self {
        Self {
            features: InceptionFeatures::new(transform_input, device),
            aux_fc: he_linear(AUX_CHANNELS, num_classes, device),
            dropout: DropoutConfig::new(dropout).init(),
            fc: he_linear(OUT_CHANNELS, num_classes, device),
        }
    }

    pub fn forward(&self, images: Tensor<B, 4>) -> BackboneOutput<B> {
        let maps = self.features.forward(images);
        let logits = self.fc.forward(self.dropout.forward(maps.pooled));
        BackboneOutput {
            logits,
            aux_logits: maps.aux.map(|aux| self.aux_fc.forward(aux)),
        }
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
