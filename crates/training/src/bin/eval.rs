use clap::Parser;
use std::path::PathBuf;
use training::inference::{evaluate_folder, format_report, load_for_inference, InferenceOptions};
use training::util::{init_logging, validate_backend_choice, BackendKind};
use training::{BackboneKind, TrainBackend};

#[derive(Parser, Debug)]
#[command(
    name = "eval",
    about = "Evaluate a multi-label checkpoint on a labelled folder (BCE, F2, per-class precision/recall)"
)]
struct Args {
    /// Checkpoint file, or a checkpoint directory (its lowest-loss epoch is used).
    #[arg(long, default_value = "checkpoints")]
    checkpoint: PathBuf,
    /// Folder containing the label CSV and images.
    #[arg(long)]
    data_dir: PathBuf,
    /// Label CSV name relative to the data folder.
    #[arg(long, default_value = "labels.csv")]
    labels_file: PathBuf,
    /// Image subdirectory relative to the data folder.
    #[arg(long, default_value = ".")]
    images_subdir: PathBuf,
    #[arg(long, default_value = "jpg")]
    image_extension: String,
    /// Class list (defaults to classes.json next to the checkpoint).
    #[arg(long)]
    classes: Option<PathBuf>,
    /// Backbone (defaults to the one recorded in training_state.json).
    #[arg(long)]
    backbone: Option<BackboneKind>,
    #[arg(long)]
    image_size: Option<u32>,
    #[arg(long, default_value_t = 32)]
    batch_size: usize,
    /// Probability threshold for F2 and precision/recall.
    #[arg(long, default_value_t = 0.2)]
    threshold: f32,
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    backend: BackendKind,
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let args = Args::parse();
    validate_backend_choice(args.backend)?;

    let device = <TrainBackend as burn::tensor::backend::Backend>::Device::default();
    let model = load_for_inference::<TrainBackend>(
        &InferenceOptions {
            checkpoint: args.checkpoint,
            classes: args.classes,
            backbone: args.backbone,
            image_size: args.image_size,
        },
        &device,
    )?;
    let paths = burn_dataset::DatasetPathConfig::new(&args.data_dir)
        .with_labels_file(args.labels_file)
        .with_images_subdir(args.images_subdir)
        .with_image_extension(args.image_extension);
    log::info!(
        "evaluating {} ({}) on {}",
        model.checkpoint.display(),
        model.backbone,
        paths.labels_path().display()
    );
    let result = evaluate_folder(&model, &paths, args.batch_size, args.threshold, &device)?;
    print!("{}", format_report(&model.vocab, &result));
    Ok(())
}
