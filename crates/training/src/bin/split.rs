use clap::Parser;
use std::path::PathBuf;
use training::util::init_logging;

#[derive(Parser, Debug)]
#[command(
    name = "split",
    about = "Split an image_name,tags label CSV into seeded train/val files"
)]
struct Args {
    /// Input label CSV.
    #[arg(long)]
    labels: PathBuf,
    #[arg(long, default_value = "train.csv")]
    train_out: PathBuf,
    #[arg(long, default_value = "val.csv")]
    val_out: PathBuf,
    /// Fraction of rows moved to validation.
    #[arg(long, default_value_t = 0.1)]
    val_ratio: f32,
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let args = Args::parse();
    if !(0.0..1.0).contains(&args.val_ratio) {
        anyhow::bail!("--val-ratio must be in [0, 1), got {}", args.val_ratio);
    }
    let records = burn_dataset::read_label_records(&args.labels)?;
    let total = records.len();
    let (train, val) = burn_dataset::split_records(records, args.val_ratio, args.seed);
    burn_dataset::write_label_records(&args.train_out, &train)?;
    burn_dataset::write_label_records(&args.val_out, &val)?;
    log::info!(
        "split {total} rows: {} -> {}, {} -> {}",
        train.len(),
        args.train_out.display(),
        val.len(),
        args.val_out.display()
    );
    Ok(())
}
