use std::fs;
use std::path::Path;
use training::checkpoint::{best_checkpoint_in, list_checkpoints, CLASSES_FILE};
use training::inference::{evaluate_folder, load_for_inference, predict_folder, InferenceOptions};
use training::{run_training, BackboneKind, TrainBackend, TrainConfig, TrainingState};

const ROWS: [(&str, &str); 6] = [
    ("train_0", "clear primary"),
    ("train_1", "haze"),
    ("train_2", "clear"),
    ("train_3", "primary haze"),
    ("train_4", "clear primary"),
    ("train_5", "haze"),
];

fn write_dataset(root: &Path) {
    fs::create_dir_all(root).unwrap();
    let mut csv = String::from("image_name,tags\n");
    for (i, (name, tags)) in ROWS.iter().enumerate() {
        let shade = (i * 40) as u8;
        let img = image::RgbImage::from_fn(40, 36, |x, y| {
            image::Rgb([shade, (x * 6) as u8, (y * 7) as u8])
        });
        img.save(root.join(format!("{name}.png"))).unwrap();
        csv.push_str(&format!("{name},{tags}\n"));
    }
    fs::write(root.join("labels.csv"), csv).unwrap();
}

fn tiny_config(root: &Path) -> TrainConfig {
    TrainConfig {
        backbone: BackboneKind::ResNet18,
        train_dir: root.join("train"),
        image_extension: "png".into(),
        image_size: 32,
        val_ratio: 0.34,
        seed: 7,
        batch_size: 2,
        val_batch_size: 2,
        epochs: 2,
        log_every: 1,
        checkpoint_dir: root.join("ckpt"),
        ..Default::default()
    }
}

#[test]
fn trains_checkpoints_and_reloads() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    write_dataset(&dir.path().join("train"));
    let cfg = tiny_config(dir.path());

    let summary = run_training(&cfg)?;
    assert_eq!(summary.history.len(), 2);
    assert!(summary.history.iter().all(|e| e.val_loss.is_finite()));
    assert!(summary.best_epoch >= 1);

    let ckpts = list_checkpoints(&cfg.checkpoint_dir)?;
    assert_eq!(ckpts.iter().map(|c| c.epoch).collect::<Vec<_>>(), vec![1, 2]);
    let best = best_checkpoint_in(&cfg.checkpoint_dir)?.expect("best checkpoint");
    let best_loss = best.val_loss.expect("finite best loss");
    assert!(ckpts
        .iter()
        .filter_map(|c| c.val_loss)
        .all(|loss| best_loss <= loss));
    assert!(summary.best_checkpoint.as_ref().is_some_and(|p| p.is_file()));
    assert!(cfg.checkpoint_dir.join(CLASSES_FILE).is_file());

    let state = TrainingState::load(&cfg.checkpoint_dir)?;
    assert_eq!(state.epoch, 2);
    assert_eq!(state.backbone, BackboneKind::ResNet18);
    assert_eq!(state.num_classes, 3);
    assert_eq!(state.image_size, 32);

    let device = Default::default();
    let model = load_for_inference::<TrainBackend>(
        &InferenceOptions {
            checkpoint: cfg.checkpoint_dir.clone(),
            ..Default::default()
        },
        &device,
    )?;
    assert_eq!(model.vocab.names(), ["clear", "haze", "primary"]);
    assert_eq!(model.backbone, BackboneKind::ResNet18);

    let paths = cfg.dataset_paths(&cfg.train_dir);
    let result = evaluate_folder(&model, &paths, 4, 0.5, &device)?;
    assert_eq!(result.metrics.samples, ROWS.len());
    assert!(result.loss.is_finite());
    assert_eq!(result.probabilities.len(), ROWS.len() * 3);

    let predictions = predict_folder(&model, &cfg.train_dir, "png", 4, 0.5, &device)?;
    let names: Vec<_> = predictions.iter().map(|r| r.image_name.as_str()).collect();
    assert_eq!(names, ROWS.iter().map(|(n, _)| *n).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn resumes_from_snapshot_with_separate_val_folder() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    write_dataset(&dir.path().join("train"));
    write_dataset(&dir.path().join("val"));
    let first = TrainConfig {
        epochs: 1,
        val_dir: Some(dir.path().join("val")),
        ..tiny_config(dir.path())
    };
    let summary = run_training(&first)?;
    let snapshot = summary.best_checkpoint.expect("checkpoint");

    let resumed = TrainConfig {
        snapshot: Some(snapshot),
        checkpoint_dir: dir.path().join("ckpt2"),
        ..first
    };
    let summary = run_training(&resumed)?;
    assert_eq!(summary.history.len(), 1);
    assert_eq!(list_checkpoints(&resumed.checkpoint_dir)?.len(), 1);
    Ok(())
}

#[test]
fn empty_validation_split_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write_dataset(&dir.path().join("train"));
    let cfg = TrainConfig {
        val_ratio: 0.0,
        ..tiny_config(dir.path())
    };
    assert!(run_training(&cfg).is_err());
}
