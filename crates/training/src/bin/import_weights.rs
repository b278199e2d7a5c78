use clap::Parser;
use std::path::PathBuf;
use training::import::import_torchvision_features;
use training::util::init_logging;
use training::{BackboneKind, TrainBackend};

#[derive(Parser, Debug)]
#[command(
    name = "import_weights",
    about = "Convert a torchvision .pth backbone into a Burn feature record for --pretrained"
)]
struct Args {
    /// torchvision state dict (e.g. resnet152-b121ed2d.pth).
    #[arg(long)]
    input: PathBuf,
    #[arg(long, default_value_t = BackboneKind::ResNet152)]
    backbone: BackboneKind,
    /// Output record path (.bin).
    #[arg(long)]
    output: PathBuf,
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let args = Args::parse();
    let device = <TrainBackend as burn::tensor::backend::Backend>::Device::default();
    import_torchvision_features::<TrainBackend>(args.backbone, &args.input, &args.output, &device)?;
    log::info!("wrote {}", args.output.display());
    Ok(())
}
