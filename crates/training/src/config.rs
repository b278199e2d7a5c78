//! Training configuration file (TOML).
//!
//! Resolution order is built-in defaults, then the file, then explicit CLI
//! flags. The file comes from `--config` or the `PLANET_TRAIN_CONFIG`
//! environment variable.

use anyhow::Context;
use burn_dataset::DatasetPathConfig;
use models::BackboneKind;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::scheduler::PlateauConfig;

pub const CONFIG_ENV: &str = "PLANET_TRAIN_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainConfig {
    pub backbone: BackboneKind,
    /// Folder with the training label file and images.
    pub train_dir: PathBuf,
    /// Optional validation folder; when absent the training labels are split.
    pub val_dir: Option<PathBuf>,
    pub labels_file: PathBuf,
    pub images_subdir: PathBuf,
    pub image_extension: String,
    /// Square input size fed to the backbone.
    pub image_size: u32,
    pub val_ratio: f32,
    pub seed: u64,
    pub batch_size: usize,
    pub val_batch_size: usize,
    pub epochs: usize,
    /// Print the training batch loss every N iterations.
    pub log_every: usize,
    pub lr: f64,
    pub weight_decay: f64,
    pub aux_loss_weight: f32,
    pub dropout: f64,
    pub flip_prob: f32,
    /// Probability threshold for the validation F2 and per-class metrics.
    pub metric_threshold: f32,
    /// Burn record of the backbone feature extractor.
    pub pretrained: Option<PathBuf>,
    /// Full-network snapshot to resume from.
    pub snapshot: Option<PathBuf>,
    pub checkpoint_dir: PathBuf,
    /// Skip unreadable images instead of failing.
    pub permissive_errors: bool,
    pub scheduler: PlateauConfig,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            backbone: BackboneKind::ResNet152,
            train_dir: PathBuf::from("data/train"),
            val_dir: None,
            labels_file: PathBuf::from("labels.csv"),
            images_subdir: PathBuf::from("."),
            image_extension: "jpg".to_string(),
            image_size: 224,
            val_ratio: 0.1,
            seed: 42,
            batch_size: 32,
            val_batch_size: 32,
            epochs: 100,
            log_every: 200,
            lr: 1e-3,
            weight_decay: 1e-4,
            aux_loss_weight: 0.4,
            dropout: 0.5,
            flip_prob: 0.5,
            metric_threshold: 0.2,
            pretrained: None,
            snapshot: None,
            checkpoint_dir: PathBuf::from("checkpoints"),
            permissive_errors: false,
            scheduler: PlateauConfig::default(),
        }
    }
}

impl TrainConfig {
    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Loads `explicit`, else the file named by `PLANET_TRAIN_CONFIG`, else defaults.
    pub fn load_or_default(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let from_env = std::env::var_os(CONFIG_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        match explicit.map(Path::to_path_buf).or(from_env) {
            Some(path) => {
                log::info!("loading training config {}", path.display());
                Self::load(&path)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.batch_size == 0 || self.val_batch_size == 0 {
            anyhow::bail!("batch sizes must be positive");
        }
        if self.epochs == 0 {
            anyhow::bail!("epochs must be positive");
        }
        if !(0.0..1.0).contains(&self.val_ratio) {
            anyhow::bail!("val_ratio must be in [0, 1), got {}", self.val_ratio);
        }
        if self.val_dir.is_none() && self.val_ratio == 0.0 {
            anyhow::bail!("no val_dir given and val_ratio is 0; nothing to validate on");
        }
        let min = self.backbone.min_input_size();
        if (self.image_size as usize) < min {
            anyhow::bail!(
                "{} needs image_size >= {min}, got {}",
                self.backbone,
                self.image_size
            );
        }
        self.scheduler.validate()?;
        Ok(())
    }

    pub fn dataset_paths(&self, root: &Path) -> DatasetPathConfig {
        DatasetPathConfig::new(root)
            .with_labels_file(&self.labels_file)
            .with_images_subdir(&self.images_subdir)
            .with_image_extension(self.image_extension.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::PlateauMode;

    #[test]
    fn partial_file_keeps_defaults() {
        let cfg = TrainConfig::from_toml_str(
            r#"
            backbone = "densenet121"
            epochs = 5
            [scheduler]
            patience = 1
            mode = "max"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.backbone, BackboneKind::DenseNet121);
        assert_eq!(cfg.epochs, 5);
        assert_eq!(cfg.batch_size, 32);
        assert_eq!(cfg.scheduler.patience, 1);
        assert_eq!(cfg.scheduler.mode, PlateauMode::Max);
        assert_eq!(cfg.scheduler.factor, 0.1);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(TrainConfig::from_toml_str("epochz = 3").is_err());
        assert!(TrainConfig::from_toml_str("backbone = \"alexnet\"").is_err());
    }

    #[test]
    fn inception_needs_large_inputs() {
        let cfg = TrainConfig {
            backbone: BackboneKind::InceptionV3,
            image_size: 224,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
        let cfg = TrainConfig {
            image_size: 299,
            ..cfg
        };
        assert!(cfg.validate().is_ok());
    }
}
