//! Checkpoint naming, discovery and the per-run training state file.

use anyhow::Context;
use models::BackboneKind;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::scheduler::ReduceLrOnPlateau;

pub const CLASSES_FILE: &str = "classes.json";
pub const STATE_FILE: &str = "training_state.json";
pub const CHECKPOINT_EXTENSION: &str = "bin";

/// `epoch_{epoch}_validation_loss_{loss:.4}.bin`
pub fn checkpoint_file_name(epoch: usize, val_loss: f32) -> String {
    format!("epoch_{epoch}_validation_loss_{val_loss:.4}.{CHECKPOINT_EXTENSION}")
}

/// Recovers `(epoch, validation_loss)` from a checkpoint file name.
pub fn parse_checkpoint_name(name: &str) -> Option<(usize, f32)> {
    let stem = name.strip_suffix(&format!(".{CHECKPOINT_EXTENSION}"))?;
    let rest = stem.strip_prefix("epoch_")?;
    let (epoch, loss) = rest.split_once("_validation_loss_")?;
    Some((epoch.parse().ok()?, loss.parse().ok()?))
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointEntry {
    pub path: PathBuf,
    pub epoch: usize,
    /// None when the epoch's loss was not finite.
    pub val_loss: Option<f32>,
}

/// Checkpoints in `dir` ordered by epoch.
pub fn list_checkpoints(dir: &Path) -> anyhow::Result<Vec<CheckpointEntry>> {
    let mut out = Vec::new();
    for entry in
        fs::read_dir(dir).with_context(|| format!("reading checkpoint dir {}", dir.display()))?
    {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some((epoch, val_loss)) = parse_checkpoint_name(name) {
            out.push(CheckpointEntry {
                path: path.clone(),
                epoch,
                val_loss: Some(val_loss).filter(|v| v.is_finite()),
            });
        }
    }
    out.sort_by_key(|c| c.epoch);
    Ok(out)
}

/// Lowest-loss checkpoint in `dir` by file name; ties go to the earlier epoch.
/// Checkpoints without a finite loss are never picked.
pub fn best_checkpoint_in(dir: &Path) -> anyhow::Result<Option<CheckpointEntry>> {
    Ok(list_checkpoints(dir)?
        .into_iter()
        .filter_map(|c| c.val_loss.map(|loss| (loss, c)))
        .min_by(|(la, a), (lb, b)| la.total_cmp(lb).then(a.epoch.cmp(&b.epoch)))
        .map(|(_, c)| c))
}

/// Best checkpoint recorded in `dir`'s training state, if it still exists.
fn recorded_best(dir: &Path) -> anyhow::Result<Option<PathBuf>> {
    let Some(recorded) = TrainingState::load_if_present(dir)?.and_then(|s| s.best_checkpoint)
    else {
        return Ok(None);
    };
    if recorded.is_file() {
        return Ok(Some(recorded));
    }
    // The state may hold a path relative to another working directory.
    Ok(recorded
        .file_name()
        .map(|name| dir.join(name))
        .filter(|p| p.is_file()))
}

/// A file path is returned as is. A directory resolves to the best checkpoint
/// recorded in its training state, else the best one by file name.
pub fn resolve_checkpoint(path: &Path) -> anyhow::Result<PathBuf> {
    if path.is_dir() {
        if let Some(best) = recorded_best(path)? {
            log::info!("using recorded best checkpoint {}", best.display());
            return Ok(best);
        }
        let best = best_checkpoint_in(path)?
            .with_context(|| format!("no checkpoints found in {}", path.display()))?;
        log::info!(
            "using best checkpoint {} (epoch {}, val_loss {:?})",
            best.path.display(),
            best.epoch,
            best.val_loss
        );
        Ok(best.path)
    } else if path.is_file() {
        Ok(path.to_path_buf())
    } else {
        anyhow::bail!("checkpoint {} does not exist", path.display())
    }
}

/// Directory holding `checkpoint` (itself if it is a directory).
pub fn checkpoint_dir_of(checkpoint: &Path) -> PathBuf {
    if checkpoint.is_dir() {
        checkpoint.to_path_buf()
    } else {
        checkpoint
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingState {
    pub backbone: BackboneKind,
    pub num_classes: usize,
    pub image_size: u32,
    pub epoch: usize,
    /// None when the epoch's loss was not finite.
    pub val_loss: Option<f32>,
    pub best_val_loss: Option<f32>,
    pub best_epoch: usize,
    pub best_checkpoint: Option<PathBuf>,
    pub learning_rate: f64,
    pub scheduler: ReduceLrOnPlateau,
}

impl TrainingState {
    pub fn save(&self, dir: &Path) -> anyhow::Result<()> {
        let path = dir.join(STATE_FILE);
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json).with_context(|| format!("writing {}", path.display()))
    }

    pub fn load(dir: &Path) -> anyhow::Result<Self> {
        let path = dir.join(STATE_FILE);
        let raw = fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    /// `None` when the directory has no state file.
    pub fn load_if_present(dir: &Path) -> anyhow::Result<Option<Self>> {
        if dir.join(STATE_FILE).is_file() {
            Self::load(dir).map(Some)
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_round_trips() {
        let name = checkpoint_file_name(12, 0.083_14);
        assert_eq!(name, "epoch_12_validation_loss_0.0831.bin");
        assert_eq!(parse_checkpoint_name(&name), Some((12, 0.0831)));
    }

    #[test]
    fn rejects_foreign_names() {
        assert_eq!(parse_checkpoint_name("classes.json"), None);
        assert_eq!(parse_checkpoint_name("epoch_x_validation_loss_0.1.bin"), None);
        assert_eq!(parse_checkpoint_name("epoch_1_validation_loss_0.1.pth"), None);
    }

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, b"").unwrap();
        path
    }

    fn state_with_best(best: Option<PathBuf>) -> TrainingState {
        TrainingState {
            backbone: BackboneKind::ResNet18,
            num_classes: 3,
            image_size: 32,
            epoch: 3,
            val_loss: Some(0.5),
            best_val_loss: Some(0.2),
            best_epoch: 2,
            best_checkpoint: best,
            learning_rate: 1e-3,
            scheduler: ReduceLrOnPlateau::new(Default::default(), 1e-3).unwrap(),
        }
    }

    #[test]
    fn non_finite_losses_are_listed_but_never_best() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "epoch_3_validation_loss_NaN.bin");
        touch(dir.path(), "epoch_1_validation_loss_0.4000.bin");
        touch(dir.path(), "epoch_2_validation_loss_inf.bin");

        let listed = list_checkpoints(dir.path()).unwrap();
        assert_eq!(listed.iter().map(|c| c.epoch).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(listed[0].val_loss, Some(0.4));
        assert_eq!(listed[1].val_loss, None);
        assert_eq!(listed[2].val_loss, None);

        let best = best_checkpoint_in(dir.path()).unwrap().unwrap();
        assert_eq!(best.epoch, 1);
    }

    #[test]
    fn only_nan_checkpoints_have_no_best() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "epoch_3_validation_loss_NaN.bin");
        assert!(best_checkpoint_in(dir.path()).unwrap().is_none());
        assert!(resolve_checkpoint(dir.path()).is_err());
    }

    #[test]
    fn tied_names_resolve_to_earlier_epoch() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "epoch_2_validation_loss_0.3000.bin");
        let first = touch(dir.path(), "epoch_1_validation_loss_0.3000.bin");
        assert_eq!(resolve_checkpoint(dir.path()).unwrap(), first);
    }

    #[test]
    fn directory_prefers_recorded_best_over_file_names() {
        let dir = tempfile::tempdir().unwrap();
        // Rounded names tie; the unrounded comparison during training chose epoch 2.
        touch(dir.path(), "epoch_1_validation_loss_0.3000.bin");
        let recorded = touch(dir.path(), "epoch_2_validation_loss_0.3000.bin");
        state_with_best(Some(recorded.clone())).save(dir.path()).unwrap();
        assert_eq!(resolve_checkpoint(dir.path()).unwrap(), recorded);
    }

    #[test]
    fn recorded_best_is_found_by_name_when_path_is_stale() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "epoch_1_validation_loss_0.1000.bin");
        let recorded = touch(dir.path(), "epoch_2_validation_loss_0.3000.bin");
        state_with_best(Some(PathBuf::from("elsewhere/epoch_2_validation_loss_0.3000.bin")))
            .save(dir.path())
            .unwrap();
        assert_eq!(resolve_checkpoint(dir.path()).unwrap(), recorded);
    }

    #[test]
    fn missing_recorded_best_falls_back_to_file_names() {
        let dir = tempfile::tempdir().unwrap();
        let best = touch(dir.path(), "epoch_1_validation_loss_0.1000.bin");
        touch(dir.path(), "epoch_2_validation_loss_0.3000.bin");
        state_with_best(Some(dir.path().join("epoch_9_validation_loss_0.0100.bin")))
            .save(dir.path())
            .unwrap();
        assert_eq!(resolve_checkpoint(dir.path()).unwrap(), best);

        state_with_best(None).save(dir.path()).unwrap();
        assert_eq!(resolve_checkpoint(dir.path()).unwrap(), best);
    }
}
