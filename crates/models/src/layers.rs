//! Small constructors shared by the backbones.

use burn::module::Param;
use burn::nn;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{
    AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, AvgPool2d, AvgPool2dConfig, MaxPool2d,
    MaxPool2dConfig,
};
use burn::nn::{BatchNorm, BatchNormConfig, Initializer, PaddingConfig2d};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Linear layer with weights drawn from `N(0, sqrt(2 / fan_in))` and a zero bias.
///
/// Every classifier head in this crate (the replaced backbone classifier, the
/// Inception auxiliary classifier and the cross-label layer) is built this way.
pub fn he_linear<B: Backend>(d_input: usize, d_output: usize, device: &B::Device) -> nn::Linear<B> {
    let std = (2.0 / d_input.max(1) as f64).sqrt();
    let mut linear = nn::LinearConfig::new(d_input, d_output)
        .with_initializer(Initializer::Normal { mean: 0.0, std })
        .init(device);
    linear.bias = linear
        .bias
        .map(|_| Param::from_tensor(Tensor::<B, 1>::zeros([d_output], device)));
    linear
}

pub(crate) fn conv2d<B: Backend>(
    channels: [usize; 2],
    kernel: [usize; 2],
    stride: usize,
    padding: [usize; 2],
    bias: bool,
    device: &B::Device,
) -> Conv2d<B> {
    Conv2dConfig::new(channels, kernel)
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(padding[0], padding[1]))
        .with_bias(bias)
        .with_initializer(Initializer::KaimingNormal {
            gain: std::f64::consts::SQRT_2,
            fan_out_only: true,
        })
        .init(device)
}

pub(crate) fn batch_norm<B: Backend>(
    channels: usize,
    epsilon: f64,
    device: &B::Device,
) -> BatchNorm<B> {
    BatchNormConfig::new(channels)
        .with_epsilon(epsilon)
        .init(device)
}

pub(crate) fn max_pool(kernel: usize, stride: usize, padding: usize) -> MaxPool2d {
    MaxPool2dConfig::new([kernel, kernel])
        .with_strides([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(padding, padding))
        .init()
}

pub(crate) fn avg_pool(kernel: usize, stride: usize, padding: usize) -> AvgPool2d {
    AvgPool2dConfig::new([kernel, kernel])
        .with_strides([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(padding, padding))
        .init()
}

pub(crate) fn adaptive_pool(size: [usize; 2]) -> AdaptiveAvgPool2d {
    AdaptiveAvgPool2dConfig::new(size).init()
}

/// `[N, C, H, W]` -> `[N, C * H * W]`.
pub(crate) fn flatten<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 2> {
    x.flatten(1, 3)
}
