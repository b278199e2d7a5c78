//! Burn networks for multi-label image classification.
//!
//! This crate defines the architectures used by the training pipeline:
//! - Backbones in the torchvision layout: ResNet-18..152, VGG-19,
//!   DenseNet-121/169/201 and Inception v3.
//! - `MultiLabelNet`: a backbone whose classifier is resized to the label
//!   count, followed by a label-to-label "cross-label" linear layer.
//!
//! Everything here is a plain Burn `Module`; data loading, losses and the
//! training loop live in the `burn_dataset` and `training` crates.
//!
//! ## Pretrained weights
//! Each backbone splits into a `*Features` module and its classifier head.
//! Pretrained weights are stored as a Burn record of the features module only,
//! so the resized heads always start from fresh He-normal initialisation.

pub mod backbone;
pub mod densenet;
pub mod inception;
pub mod layers;
pub mod multilabel;
pub mod resnet;
pub mod vgg;

pub use backbone::{Backbone, BackboneKind, BackboneOutput};
pub use multilabel::{MultiLabelNet, MultiLabelNetConfig, MultiLabelOutput};

pub mod prelude {
    pub use super::{
        BackboneKind, BackboneOutput, MultiLabelNet, MultiLabelNetConfig, MultiLabelOutput,
    };
}
