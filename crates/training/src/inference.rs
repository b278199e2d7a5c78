//! Loading trained checkpoints for evaluation and prediction.

use anyhow::{anyhow, Context};
use burn::tensor::backend::Backend;
use burn_dataset::{
    index_unlabeled_images, ClassVocabulary, DatasetConfig, DatasetPathConfig, LabelRecord,
    MultiLabelLoader,
};
use models::{BackboneKind, MultiLabelNet, MultiLabelNetConfig};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::checkpoint::{checkpoint_dir_of, resolve_checkpoint, TrainingState};
use crate::util::{load_classes_near, validate, ValidationResult};

#[derive(Debug, Clone, Default)]
pub struct InferenceOptions {
    /// Checkpoint file, or a directory whose best checkpoint is used.
    pub checkpoint: PathBuf,
    /// Class list; defaults to `classes.json` next to the checkpoint.
    pub classes: Option<PathBuf>,
    /// Defaults to the backbone recorded in `training_state.json`.
    pub backbone: Option<BackboneKind>,
    pub image_size: Option<u32>,
}

pub struct LoadedModel<B: Backend> {
    pub net: MultiLabelNet<B>,
    pub vocab: ClassVocabulary,
    pub backbone: BackboneKind,
    pub image_size: u32,
    pub checkpoint: PathBuf,
}

impl<B: Backend> LoadedModel<B> {
    fn loader_config(&self) -> DatasetConfig {
        DatasetConfig {
            target_size: Some((self.image_size, self.image_size)),
            ..Default::default()
        }
        .for_validation()
    }
}

pub fn load_for_inference<B: Backend>(
    opts: &InferenceOptions,
    device: &B::Device,
) -> anyhow::Result<LoadedModel<B>> {
    let checkpoint = resolve_checkpoint(&opts.checkpoint)?;
    let state = TrainingState::load_if_present(&checkpoint_dir_of(&checkpoint))?;

    let vocab = match &opts.classes {
        Some(path) => ClassVocabulary::load(path)?,
        None => load_classes_near(&checkpoint).context("no --classes given")?,
    };
    let backbone = opts
        .backbone
        .or(state.as_ref().map(|s| s.backbone))
        .context("backbone unknown: pass --backbone or keep training_state.json next to the checkpoint")?;
    let image_size = opts
        .image_size
        .or(state.as_ref().map(|s| s.image_size))
        .unwrap_or(224);
    if let Some(state) = &state {
        if state.num_classes != vocab.len() {
            anyhow::bail!(
                "checkpoint was trained with {} classes but the class list has {}",
                state.num_classes,
                vocab.len()
            );
        }
    }

    let net = MultiLabelNet::<B>::new(MultiLabelNetConfig::new(backbone, vocab.len()), device)
        .load_snapshot(&checkpoint, device)
        .map_err(|e| anyhow!("failed to load checkpoint {}: {e}", checkpoint.display()))?;
    Ok(LoadedModel {
        net,
        vocab,
        backbone,
        image_size,
        checkpoint,
    })
}

/// Validation BCE and metrics over a labelled folder.
pub fn evaluate_folder<B: Backend>(
    model: &LoadedModel<B>,
    paths: &DatasetPathConfig,
    batch_size: usize,
    threshold: f32,
    device: &B::Device,
) -> anyhow::Result<ValidationResult> {
    let indices = paths.load(&model.vocab)?;
    let loader = MultiLabelLoader::new(indices, model.vocab.len(), model.loader_config())?;
    validate(&model.net, &loader, batch_size, threshold, device)
}

/// Tags every image in `images_dir` whose probability reaches `threshold`.
pub fn predict_folder<B: Backend>(
    model: &LoadedModel<B>,
    images_dir: &Path,
    extension: &str,
    batch_size: usize,
    threshold: f32,
    device: &B::Device,
) -> anyhow::Result<Vec<LabelRecord>> {
    let indices = index_unlabeled_images(images_dir, extension)?;
    if indices.is_empty() {
        anyhow::bail!("no .{extension} images in {}", images_dir.display());
    }
    let loader = MultiLabelLoader::new(indices, model.vocab.len(), model.loader_config())?;
    let num_classes = model.vocab.len();
    let mut out = Vec::with_capacity(loader.len());
    let mut iter = loader.iter(0);
    while let Some(batch) = iter.next_batch::<B>(batch_size, device)? {
        let probs = model
            .net
            .forward(batch.images)
            .probabilities()
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| anyhow!("reading probabilities: {e:?}"))?;
        for (name, row) in batch.names.into_iter().zip(probs.chunks_exact(num_classes)) {
            out.push(LabelRecord {
                image_name: name,
                tags: model
                    .vocab
                    .decode(row, threshold)
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
            });
        }
    }
    Ok(out)
}

/// Human-readable evaluation report with one row per class.
pub fn format_report(vocab: &ClassVocabulary, result: &ValidationResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "samples: {}", result.metrics.samples);
    let _ = writeln!(out, "val_loss (bce): {:.4}", result.loss);
    let _ = writeln!(
        out,
        "f2 @ {:.2}: {:.4}",
        result.metrics.threshold, result.metrics.f2
    );
    let width = vocab.names().iter().map(String::len).max().unwrap_or(5).max(5);
    let _ = writeln!(
        out,
        "{:<width$}  {:>9}  {:>6}  {:>7}",
        "class", "precision", "recall", "support"
    );
    for (name, counts) in vocab.names().iter().zip(&result.metrics.per_class) {
        let _ = writeln!(
            out,
            "{:<width$}  {:>9.4}  {:>6.4}  {:>7}",
            name,
            counts.precision(),
            counts.recall(),
            counts.support
        );
    }
    out
}
