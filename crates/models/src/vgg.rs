//! VGG-19 (configuration "E") without batch norm.

use burn::module::Module;
use burn::nn;
use burn::nn::conv::Conv2d;
use burn::nn::pool::{AdaptiveAvgPool2d, MaxPool2d};
use burn::nn::{Dropout, DropoutConfig};
use burn::record::{BinFileRecorder, FullPrecisionSettings, RecorderError};
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use std::path::Path;

use crate::backbone::BackboneOutput;
use crate::layers::{adaptive_pool, conv2d, flatten, he_linear, max_pool};

/// Output channels per convolution, grouped by max-pooled stage.
const VGG19_STAGES: [&[usize]; 5] = [
    &[64, 64],
    &[128, 128],
    &[256, 256, 256, 256],
    &[512, 512, 512, 512],
    &[512, 512, 512, 512],
];

/// Position of each convolution inside torchvision's `features` Sequential
/// (ReLU and MaxPool entries take the gaps).
pub const VGG19_TORCH_CONV_INDICES: [usize; 16] =
    [0, 2, 5, 7, 10, 12, 14, 16, 19, 21, 23, 25, 28, 30, 32, 34];

const POOLED_SIZE: usize = 7;
const HIDDEN: usize = 4096;

#[derive(Debug, Module)]
pub struct VggFeatures<B: Backend> {
    convs: Vec<Conv2d<B>>,
    pool: MaxPool2d,
    avgpool: AdaptiveAvgPool2d,
}

impl<B: Backend> VggFeatures<B> {
    pub fn new(device: &B::Device) -> Self {
        let mut convs = Vec::new();
        let mut in_channels = 3;
        for stage in VGG19_STAGES {
            for &out_channels in stage {
                convs.push(conv2d(
                    [in_channels, out_channels],
                    [3, 3],
                    1,
                    [1, 1],
                    true,
                    device,
                ));
                in_channels = out_channels;
            }
        }
        Self {
            convs,
            pool: max_pool(2, 2, 0),
            avgpool: adaptive_pool([POOLED_SIZE, POOLED_SIZE]),
        }
    }

    pub fn out_features() -> usize {
        512 * POOLED_SIZE * POOLED_SIZE
    }

    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = images;
        let mut convs = self.convs.iter();
        for stage in VGG19_STAGES {
            for conv in convs.by_ref().take(stage.len()) {
                x = relu(conv.forward(x));
            }
            x = self.pool.forward(x);
        }
        flatten(self.avgpool.forward(x))
    }
}

#[derive(Debug, Module)]
pub struct VggClassifier<B: Backend> {
    fc1: nn::Linear<B>,
    fc2: nn::Linear<B>,
    fc3: nn::Linear<B>,
    dropout: Dropout,
}

impl<B: Backend> VggClassifier<B> {
    fn new(num_classes: usize, dropout: f64, device: &B::Device) -> Self {
        Self {
            fc1: he_linear(VggFeatures::<B>::out_features(), HIDDEN, device),
            fc2: he_linear(HIDDEN, HIDDEN, device),
            fc3: he_linear(HIDDEN, num_classes, device),
            dropout: DropoutConfig::new(dropout).init(),
        }
    }

    fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.dropout.forward(relu(self.fc1.forward(x)));
        let x = self.dropout.forward(relu(self.fc2.forward(x)));
        self.fc3.forward(x)
    }
}

#[derive(Debug, Module)]
pub struct Vgg<B: Backend> {
    features: VggFeatures<B>,
    classifier: VggClassifier<B>,
}

impl<B: Backend> Vgg<B> {
    pub fn new(num_classes: usize, dropout: f64, device: &B::Device) -> Self {
        Self {
            features: VggFeatures::new(device),
            classifier: VggClassifier::new(num_classes, dropout, device),
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
