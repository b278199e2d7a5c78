//! Conversion of torchvision `.pth` state dicts into Burn feature records.
//!
//! Only the feature extractor of each backbone is converted; classifier
//! heads are resized for the label set and always start from fresh weights.

use anyhow::anyhow;
use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings, Recorder};
use burn::tensor::backend::Backend;
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};
use models::densenet::DenseNetFeatures;
use models::inception::InceptionFeatures;
use models::resnet::ResNetFeatures;
use models::vgg::{VggFeatures, VGG19_TORCH_CONV_INDICES};
use models::BackboneKind;
use std::path::Path;

/// Key rewrites from torchvision parameter names to the Burn module layout.
pub fn key_remaps(kind: BackboneKind) -> Vec<(String, String)> {
    if let Some(cfg) = kind.densenet_config() {
        let mut pairs = vec![
            // Legacy checkpoints spell `norm.1` where current ones use `norm1`.
            (r"\.(norm|relu|conv)\.([12])\.".to_string(), ".$1$2.".to_string()),
            (r"^features\.(conv0|norm0|norm5)\.".to_string(), "$1.".to_string()),
        ];
        for (b, &layers) in cfg.block_config.iter().enumerate() {
            for l in 0..layers {
                pairs.push((
                    format!(r"^features\.denseblock{}\.denselayer{}\.", b + 1, l + 1),
                    format!("blocks.{b}.layers.{l}."),
                ));
            }
        }
        for t in 0..cfg.block_config.len() - 1 {
            pairs.push((
                format!(r"^features\.transition{}\.", t + 1),
                format!("transitions.{t}."),
            ));
        }
        return pairs;
    }
    match kind {
        BackboneKind::Vgg19 => VGG19_TORCH_CONV_INDICES
            .iter()
            .enumerate()
            .map(|(k, torch)| (format!(r"^features\.{torch}\."), format!("convs.{k}.")))
            .collect(),
        BackboneKind::InceptionV3 => vec![
            (r"^Conv2d_".to_string(), "conv2d_".to_string()),
            (r"^Mixed_".to_string(), "mixed_".to_string()),
            (r"^AuxLogits\.".to_string(), "aux_logits.".to_string()),
        ],
        _ => vec![
            (r"\.downsample\.0\.".to_string(), ".downsample.conv.".to_string()),
            (r"\.downsample\.1\.".to_string(), ".downsample.bn.".to_string()),
        ],
    }
}

/// Reads `input` (a torchvision state dict for `kind`) and writes the feature
/// record to `output`.
pub fn import_torchvision_features<B: Backend>(
    kind: BackboneKind,
    input: &Path,
    output: &Path,
    device: &B::Device,
) -> anyhow::Result<()> {
    let mut args = LoadArgs::new(input.to_path_buf());
    for (pattern, replacement) in key_remaps(kind) {
        args = args.with_key_remap(&pattern, &replacement);
    }
    log::info!("converting {} ({kind}) to {}", input.display(), output.display());

    if let Some(cfg) = kind.resnet_config() {
        return convert(ResNetFeatures::<B>::new(&cfg, device), args, output, device);
    }
    if let Some(cfg) = kind.densenet_config() {
        return convert(DenseNetFeatures::<B>::new(&cfg, device), args, output, device);
    }
    match kind {
        BackboneKind::InceptionV3 => {
            convert(InceptionFeatures::<B>::new(true, device), args, output, device)
        }
        _ => convert(VggFeatures::<B>::new(device), args, output, device),
    }
}

fn convert<B: Backend, M: Module<B>>(
    module: M,
    args: LoadArgs,
    output: &Path,
    device: &B::Device,
) -> anyhow::Result<()> {
    let record: M::Record = PyTorchFileRecorder::<FullPrecisionSettings>::default()
        .load(args, device)
        .map_err(|e| anyhow!("failed to read torch weights: {e}"))?;
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    module
        .load_record(record)
        .save_file(output, &recorder)
        .map_err(|e| anyhow!("failed to write {}: {e}", output.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vgg_remaps_skip_relu_and_pool_slots() {
        let remaps = key_remaps(BackboneKind::Vgg19);
        assert_eq!(remaps.len(), 16);
        assert_eq!(remaps[2], (r"^features\.5\.".to_string(), "convs.2.".to_string()));
    }

    #[test]
    fn densenet_layers_are_zero_based() {
        let remaps = key_remaps(BackboneKind::DenseNet121);
        assert_eq!(remaps.len(), 2 + 6 + 12 + 24 + 16 + 3);
        assert!(remaps.contains(&(
            r"^features\.denseblock1\.denselayer1\.".to_string(),
            "blocks.0.layers.0.".to_string()
        )));
    }
}
