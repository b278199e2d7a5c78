use clap::Parser;
use std::path::PathBuf;
use training::inference::{load_for_inference, predict_folder, InferenceOptions};
use training::util::{init_logging, validate_backend_choice, BackendKind};
use training::{BackboneKind, TrainBackend};

#[derive(Parser, Debug)]
#[command(
    name = "predict",
    about = "Tag every image in a folder with a trained checkpoint and write image_name,tags CSV"
)]
struct Args {
    /// Checkpoint file, or a checkpoint directory (its lowest-loss epoch is used).
    #[arg(long, default_value = "checkpoints")]
    checkpoint: PathBuf,
    /// Folder of unlabeled images.
    #[arg(long)]
    images_dir: PathBuf,
    #[arg(long, default_value = "jpg")]
    image_extension: String,
    /// Output CSV path.
    #[arg(long, default_value = "predictions.csv")]
    output: PathBuf,
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
    /// Tags with probability at or above this are emitted.
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
    let records = predict_folder(
        &model,
        &args.images_dir,
        &args.image_extension,
        args.batch_size,
        args.threshold,
        &device,
    )?;
    burn_dataset::write_label_records(&args.output, &records)?;
    log::info!(
        "wrote {} predictions to {}",
        records.len(),
        args.output.display()
    );
    Ok(())
}
