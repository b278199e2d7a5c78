use std::fs;
use std::path::PathBuf;
use training::util::TrainArgs;
use training::BackboneKind;

#[test]
fn cli_flags_override_file_values() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("train.toml");
    fs::write(
        &path,
        r#"
backbone = "vgg19"
epochs = 3
batch_size = 8
train_dir = "/data/planet/train"

[scheduler]
patience = 5
"#,
    )?;
    let args = TrainArgs {
        config: Some(path),
        epochs: Some(7),
        patience: Some(2),
        val_dir: Some(PathBuf::from("/data/planet/val")),
        ..Default::default()
    };
    let cfg = args.resolve()?;
    assert_eq!(cfg.backbone, BackboneKind::Vgg19);
    assert_eq!(cfg.epochs, 7);
    assert_eq!(cfg.batch_size, 8);
    assert_eq!(cfg.val_batch_size, 32);
    assert_eq!(cfg.scheduler.patience, 2);
    assert_eq!(cfg.train_dir, PathBuf::from("/data/planet/train"));
    assert_eq!(cfg.val_dir, Some(PathBuf::from("/data/planet/val")));
    assert_eq!(cfg.lr, 1e-3);
    Ok(())
}

#[test]
fn parses_command_line() {
    use clap::Parser;
    let args = TrainArgs::parse_from([
        "train",
        "--backbone",
        "densenet169",
        "--lr",
        "0.0005",
        "--permissive-errors",
    ]);
    assert_eq!(args.backbone, Some(BackboneKind::DenseNet169));
    assert_eq!(args.lr, Some(5e-4));
    assert!(args.permissive_errors);
}

#[test]
fn missing_config_file_is_an_error() {
    let args = TrainArgs {
        config: Some(PathBuf::from("/nonexistent/train.toml")),
        ..Default::default()
    };
    assert!(args.resolve().is_err());
}
