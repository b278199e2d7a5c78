//! Backbone selection and dispatch.

use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings, RecorderError};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::densenet::{DenseNet, DenseNetConfig};
use crate::inception::InceptionV3;
use crate::resnet::{ResNet, ResNetConfig};
use crate::vgg::Vgg;

/// Logits produced by a backbone whose classifier was resized to the label count.
#[derive(Debug, Clone)]
pub struct BackboneOutput<B: Backend> {
    pub logits: Tensor<B, 2>,
    /// Auxiliary classifier logits (Inception v3, training passes only).
    pub aux_logits: Option<Tensor<B, 2>>,
}

impl<B: Backend> BackboneOutput<B> {
    pub fn single(logits: Tensor<B, 2>) -> Self {
        Self {
            logits,
            aux_logits: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BackboneKind {
    ResNet18,
    ResNet34,
    ResNet50,
    ResNet101,
    #[default]
    ResNet152,
    Vgg19,
    DenseNet121,
    DenseNet169,
    DenseNet201,
    InceptionV3,
}

impl BackboneKind {
    pub const ALL: [BackboneKind; 10] = [
        BackboneKind::ResNet18,
        BackboneKind::ResNet34,
        BackboneKind::ResNet50,
        BackboneKind::ResNet101,
        BackboneKind::ResNet152,
        BackboneKind::Vgg19,
        BackboneKind::DenseNet121,
        BackboneKind::DenseNet169,
        BackboneKind::DenseNet201,
        BackboneKind::InceptionV3,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackboneKind::ResNet18 => "resnet18",
            BackboneKind::ResNet34 => "resnet34",
            BackboneKind::ResNet50 => "resnet50",
            BackboneKind::ResNet101 => "resnet101",
            BackboneKind::ResNet152 => "resnet152",
            BackboneKind::Vgg19 => "vgg19",
            BackboneKind::DenseNet121 => "densenet121",
            BackboneKind::DenseNet169 => "densenet169",
            BackboneKind::DenseNet201 => "densenet201",
            BackboneKind::InceptionV3 => "inception_v3",
        }
    }

    /// Smallest square input (pixels) the network reduces without collapsing.
    pub fn min_input_size(&self) -> usize {
        match self {
            BackboneKind::InceptionV3 => crate::inception::MIN_INPUT_SIZE,
            _ => 32,
        }
    }

    pub fn resnet_config(&self) -> Option<ResNetConfig> {
        match self {
            BackboneKind::ResNet18 => Some(ResNetConfig::resnet18()),
            BackboneKind::ResNet34 => Some(ResNetConfig::resnet34()),
            BackboneKind::ResNet50 => Some(ResNetConfig::resnet50()),
            BackboneKind::ResNet101 => Some(ResNetConfig::resnet101()),
            BackboneKind::ResNet152 => Some(ResNetConfig::resnet152()),
            _ => None,
        }
    }

    pub fn densenet_config(&self) -> Option<DenseNetConfig> {
        match self {
            BackboneKind::DenseNet121 => Some(DenseNetConfig::densenet121()),
            BackboneKind::DenseNet169 => Some(DenseNetConfig::densenet169()),
            BackboneKind::DenseNet201 => Some(DenseNetConfig::densenet201()),
            _ => None,
        }
    }
}

impl fmt::Display for BackboneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackboneKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        let normalized = match normalized.as_str() {
            "inceptionv3" | "inception" => "inception_v3",
            other => other,
        };
        BackboneKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| {
                let names: Vec<&str> = BackboneKind::ALL.iter().map(|k| k.as_str()).collect();
                format!("unknown backbone '{s}' (expected one of: {})", names.join(", "))
            })
    }
}

impl TryFrom<String> for BackboneKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BackboneKind> for String {
    fn from(kind: BackboneKind) -> Self {
        kind.as_str().to_string()
    }
}

#[derive(Debug, Module)]
pub enum Backbone<B: Backend> {
    ResNet(ResNet<B>),
    Vgg(Vgg<B>),
    DenseNet(DenseNet<B>),
    Inception(InceptionV3<B>),
}

impl<B: Backend> Backbone<B> {
    pub fn new(
        kind: BackboneKind,
        num_classes: usize,
        dropout: f64,
        transform_input: bool,
        device: &B::Device,
    ) -> Self {
        if let Some(cfg) = kind.resnet_config() {
            return Backbone::ResNet(ResNet::new(&cfg, num_classes, device));
        }
        if let Some(cfg) = kind.densenet_config() {
            return Backbone::DenseNet(DenseNet::new(&cfg, num_classes, device));
        }
        match kind {
            BackboneKind::InceptionV3 => Backbone::Inception(InceptionV3::new(
                num_classes,
                dropout,
                transform_input,
                device,
            )),
            _ => Backbone::Vgg(Vgg::new(num_classes, dropout, device)),
        }
    }

    pub fn forward(&self, images: Tensor<B, 4>) -> BackboneOutput<B> {
        match self {
            Backbone::ResNet(net) => net.forward(images),
            Backbone::Vgg(net) => net.forward(images),
            Backbone::DenseNet(net) => net.forward(images),
            Backbone::Inception(net) => net.forward(images),
        }
    }

    /// Loads a feature-extractor record (everything except the resized heads).
    pub fn load_features(self, path: &Path, device: &B::Device) -> Result<Self, RecorderError> {
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        Ok(match self {
            Backbone::ResNet(net) => Backbone::ResNet(net.load_features(path, &recorder, device)?),
            Backbone::Vgg(net) => Backbone::Vgg(net.load_features(path, &recorder, device)?),
            Backbone::DenseNet(net) => {
                Backbone::DenseNet(net.load_features(path, &recorder, device)?)
            }
            Backbone::Inception(net) => {
                Backbone::Inception(net.load_features(path, &recorder, device)?)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_case_insensitively() {
        assert_eq!("ResNet152".parse::<BackboneKind>(), Ok(BackboneKind::ResNet152));
        assert_eq!("inception-v3".parse::<BackboneKind>(), Ok(BackboneKind::InceptionV3));
        assert_eq!("densenet201".parse::<BackboneKind>(), Ok(BackboneKind::DenseNet201));
        assert!("alexnet".parse::<BackboneKind>().is_err());
    }

    #[test]
    fn display_round_trips_through_from_str() {
        for kind in BackboneKind::ALL {
            assert_eq!(kind.to_string().parse::<BackboneKind>(), Ok(kind));
        }
    }
}
