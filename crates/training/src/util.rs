use anyhow::anyhow;
use burn::backend::Autodiff;
use burn::module::AutodiffModule;
use burn::optim::decay::WeightDecayConfig;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::Tensor;
use burn_dataset::{
    split_records, validate_folder, ClassVocabulary, DatasetConfig, DatasetPathConfig,
    LabelRecord, MultiLabelLoader, ValidationOutcome, ValidationThresholds,
};
use clap::{Parser, ValueEnum};
use models::{BackboneKind, MultiLabelNet, MultiLabelNetConfig};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::checkpoint::{
    checkpoint_dir_of, checkpoint_file_name, TrainingState, CLASSES_FILE,
};
use crate::config::TrainConfig;
use crate::loss::{binary_cross_entropy, scalar, MultiLabelLoss};
use crate::metrics::{evaluate, MultiLabelMetrics};
use crate::scheduler::ReduceLrOnPlateau;
use crate::TrainBackend;

#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BackendKind {
    #[default]
    NdArray,
    Wgpu,
}

/// Installs `env_logger`, defaulting to `info` when `RUST_LOG` is unset.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .try_init();
}

pub fn validate_backend_choice(kind: BackendKind) -> anyhow::Result<()> {
    let built_wgpu = cfg!(feature = "backend-wgpu");
    match (kind, built_wgpu) {
        (BackendKind::Wgpu, false) => {
            anyhow::bail!("backend-wgpu feature not enabled; rebuild with --features backend-wgpu or choose ndarray backend")
        }
        (BackendKind::NdArray, true) => {
            log::warn!("built with backend-wgpu; the WGPU backend is used despite --backend nd-array");
        }
        _ => {}
    }
    Ok(())
}

#[derive(Parser, Debug, Default)]
#[command(
    name = "train",
    about = "Train a multi-label classifier (pretrained backbone + cross-label head)"
)]
pub struct TrainArgs {
    /// TOML config file (falls back to $PLANET_TRAIN_CONFIG). Flags below override it.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,
    /// Backbone architecture (resnet18..resnet152, vgg19, densenet121/169/201, inception_v3).
    #[arg(long)]
    pub backbone: Option<BackboneKind>,
    /// Training folder containing the label CSV and images.
    #[arg(long)]
    pub train_dir: Option<PathBuf>,
    /// Validation folder; when omitted the training labels are split by --val-ratio.
    #[arg(long)]
    pub val_dir: Option<PathBuf>,
    /// Label CSV name relative to each folder.
    #[arg(long)]
    pub labels_file: Option<PathBuf>,
    /// Image subdirectory relative to each folder.
    #[arg(long)]
    pub images_subdir: Option<PathBuf>,
    /// Image file extension.
    #[arg(long)]
    pub image_extension: Option<String>,
    /// Square input size.
    #[arg(long)]
    pub image_size: Option<u32>,
    #[arg(long)]
    pub val_ratio: Option<f32>,
    #[arg(long)]
    pub seed: Option<u64>,
    #[arg(long)]
    pub batch_size: Option<usize>,
    #[arg(long)]
    pub val_batch_size: Option<usize>,
    #[arg(long)]
    pub epochs: Option<usize>,
    /// Log the training batch loss every N iterations.
    #[arg(long)]
    pub log_every: Option<usize>,
    #[arg(long)]
    pub lr: Option<f64>,
    #[arg(long)]
    pub weight_decay: Option<f64>,
    /// Weight of the Inception auxiliary loss.
    #[arg(long)]
    pub aux_loss_weight: Option<f32>,
    #[arg(long)]
    pub dropout: Option<f64>,
    /// Horizontal flip probability for training images.
    #[arg(long)]
    pub flip_prob: Option<f32>,
    /// Probability threshold for validation F2 / precision / recall.
    #[arg(long)]
    pub metric_threshold: Option<f32>,
    /// Plateau patience in epochs.
    #[arg(long)]
    pub patience: Option<usize>,
    /// Burn record with pretrained backbone features.
    #[arg(long)]
    pub pretrained: Option<PathBuf>,
    /// Full-network snapshot to start from (applied after --pretrained).
    #[arg(long)]
    pub snapshot: Option<PathBuf>,
    /// Directory for per-epoch checkpoints.
    #[arg(long)]
    pub checkpoint_dir: Option<PathBuf>,
    /// Skip unreadable images instead of failing.
    #[arg(long)]
    pub permissive_errors: bool,
}

impl TrainArgs {
    /// Defaults, then the config file, then explicit flags.
    pub fn resolve(&self) -> anyhow::Result<TrainConfig> {
        let mut cfg = TrainConfig::load_or_default(self.config.as_deref())?;
        macro_rules! apply {
            ($args:ident, $cfg:ident; $($field:ident),* $(,)?) => {
                $(
                    if let Some(v) = $args.$field.clone() {
                        $cfg.$field = v;
                    }
                )*
            };
        }
        let args = self;
        apply!(args, cfg;
            backbone, train_dir, labels_file, images_subdir, image_extension, image_size,
            val_ratio, seed, batch_size, val_batch_size, epochs, log_every, lr, weight_decay,
            aux_loss_weight, dropout, flip_prob, metric_threshold, checkpoint_dir,
        );
        if let Some(dir) = &self.val_dir {
            cfg.val_dir = Some(dir.clone());
        }
        if let Some(path) = &self.pretrained {
            cfg.pretrained = Some(path.clone());
        }
        if let Some(path) = &self.snapshot {
            cfg.snapshot = Some(path.clone());
        }
        if let Some(patience) = self.patience {
            cfg.scheduler.patience = patience;
        }
        if self.permissive_errors {
            cfg.permissive_errors = true;
        }
        Ok(cfg)
    }
}

pub fn run_train(args: TrainArgs) -> anyhow::Result<()> {
    validate_backend_choice(args.backend)?;
    let cfg = args.resolve()?;
    let summary = run_training(&cfg)?;
    match &summary.best_checkpoint {
        Some(path) => log::info!(
            "best epoch {} (val_loss {:.4}): {}",
            summary.best_epoch,
            summary.best_val_loss,
            path.display()
        ),
        None => log::warn!("no epoch produced a finite validation loss"),
    }
    Ok(())
}

type ADBackend = Autodiff<TrainBackend>;

#[derive(Debug, Clone, Serialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub train_loss: f32,
    pub val_loss: f32,
    pub val_f2: f32,
    pub lr: f64,
}

#[derive(Debug, Clone)]
pub struct TrainingSummary {
    pub best_val_loss: f32,
    pub best_epoch: usize,
    pub best_checkpoint: Option<PathBuf>,
    pub final_lr: f64,
    pub history: Vec<EpochRecord>,
}

/// Runs the full train/validate/checkpoint loop described by `cfg`.
pub fn run_training(cfg: &TrainConfig) -> anyhow::Result<TrainingSummary> {
    cfg.validate()?;
    fs::create_dir_all(&cfg.checkpoint_dir)?;

    let data = prepare_data(cfg)?;
    data.vocab.save(&cfg.checkpoint_dir.join(CLASSES_FILE))?;
    log::info!(
        "{} classes, {} training / {} validation images, backbone {}",
        data.vocab.len(),
        data.train.len(),
        data.val.len(),
        cfg.backbone
    );
    log::info!("train transform: {}", data.train.pipeline().describe());

    let device = <ADBackend as Backend>::Device::default();
    let mut model = build_model::<ADBackend>(cfg, data.vocab.len(), &device)?;
    let mut optim = AdamConfig::new()
        .with_weight_decay(Some(WeightDecayConfig::new(cfg.weight_decay as f32)))
        .init();
    let mut scheduler = ReduceLrOnPlateau::new(cfg.scheduler.clone(), cfg.lr)?;
    let criterion = MultiLabelLoss::new(cfg.aux_loss_weight);

    let mut lr = cfg.lr;
    let mut best_val_loss = f32::INFINITY;
    let mut best_epoch = 0usize;
    let mut best_checkpoint = None;
    let mut history = Vec::with_capacity(cfg.epochs);

    for epoch in 1..=cfg.epochs {
        let (trained, stats) = train_epoch(
            model,
            &mut optim,
            &data.train,
            &criterion,
            epoch,
            lr,
            cfg.batch_size,
            cfg.log_every,
            &device,
        )?;
        model = trained;

        let eval_model = model.valid();
        let val = validate(
            &eval_model,
            &data.val,
            cfg.val_batch_size,
            cfg.metric_threshold,
            &device,
        )?;
        log::info!("--------------------------------------------------------");
        log::info!("[val_loss {:.4}]", val.loss);
        log::info!(
            "[val_f2 {:.4}] at threshold {:.2}",
            val.metrics.f2,
            cfg.metric_threshold
        );

        let ckpt = cfg
            .checkpoint_dir
            .join(checkpoint_file_name(epoch, val.loss));
        if val.loss < best_val_loss {
            best_val_loss = val.loss;
            best_epoch = epoch;
            best_checkpoint = Some(ckpt.clone());
        }
        log::info!("[best_val_loss {best_val_loss:.4}], [best_epoch {best_epoch}]");
        log::info!("--------------------------------------------------------");

        eval_model
            .save_snapshot(&ckpt)
            .map_err(|e| anyhow!("failed to save checkpoint {}: {e}", ckpt.display()))?;

        lr = scheduler.step(val.loss as f64);

        TrainingState {
            backbone: cfg.backbone,
            num_classes: data.vocab.len(),
            image_size: cfg.image_size,
            epoch,
            val_loss: Some(val.loss).filter(|v| v.is_finite()),
            best_val_loss: Some(best_val_loss).filter(|v| v.is_finite()),
            best_epoch,
            best_checkpoint: best_checkpoint.clone(),
            learning_rate: lr,
            scheduler: scheduler.clone(),
        }
        .save(&cfg.checkpoint_dir)?;

        history.push(EpochRecord {
            epoch,
            train_loss: stats.mean_loss,
            val_loss: val.loss,
            val_f2: val.metrics.f2,
            lr,
        });
    }

    Ok(TrainingSummary {
        best_val_loss,
        best_epoch,
        best_checkpoint,
        final_lr: lr,
        history,
    })
}

pub struct PreparedData {
    pub vocab: ClassVocabulary,
    pub train: MultiLabelLoader,
    pub val: MultiLabelLoader,
}

/// Reads label files, fixes the vocabulary and builds both loaders.
pub fn prepare_data(cfg: &TrainConfig) -> anyhow::Result<PreparedData> {
    let train_paths = cfg.dataset_paths(&cfg.train_dir);
    check_folder(&train_paths)?;
    let train_records = train_paths.read_records()?;

    let (train_records, val_records, val_paths) = match &cfg.val_dir {
        Some(dir) => {
            let val_paths = cfg.dataset_paths(dir);
            check_folder(&val_paths)?;
            let val_records = val_paths.read_records()?;
            (train_records, val_records, val_paths)
        }
        None => {
            let (train, val) = split_records(train_records, cfg.val_ratio, cfg.seed);
            log::info!(
                "no validation folder; holding out {} of {} labelled images (seed {})",
                val.len(),
                train.len() + val.len(),
                cfg.seed
            );
            (train, val, train_paths.clone())
        }
    };

    let vocab = training_vocabulary(cfg, &train_records, &val_records)?;
    if vocab.is_empty() {
        anyhow::bail!("no tags found in {}", train_paths.labels_path().display());
    }

    let train_indices = train_paths.index_records(&train_records, &vocab)?;
    let val_indices = val_paths.index_records(&val_records, &vocab)?;
    if train_indices.is_empty() {
        anyhow::bail!("training set is empty");
    }
    if val_indices.is_empty() {
        anyhow::bail!("validation set is empty");
    }

    let size = cfg.image_size;
    let train_cfg = DatasetConfig {
        target_size: Some((size, size)),
        flip_horizontal_prob: cfg.flip_prob,
        shuffle: true,
        seed: Some(cfg.seed),
        permissive_errors: cfg.permissive_errors,
        ..Default::default()
    };
    let val_cfg = train_cfg.for_validation();
    Ok(PreparedData {
        train: MultiLabelLoader::new(train_indices, vocab.len(), train_cfg)?,
        val: MultiLabelLoader::new(val_indices, vocab.len(), val_cfg)?,
        vocab,
    })
}

// A snapshot's sibling classes.json pins the output order.
fn training_vocabulary(
    cfg: &TrainConfig,
    train: &[LabelRecord],
    val: &[LabelRecord],
) -> anyhow::Result<ClassVocabulary> {
    if let Some(snapshot) = &cfg.snapshot {
        let classes = checkpoint_dir_of(snapshot).join(CLASSES_FILE);
        if classes.is_file() {
            log::info!("using class list {}", classes.display());
            return Ok(ClassVocabulary::load(&classes)?);
        }
    }
    let all: Vec<LabelRecord> = train.iter().chain(val).cloned().collect();
    Ok(ClassVocabulary::from_records(&all))
}

fn check_folder(paths: &DatasetPathConfig) -> anyhow::Result<()> {
    let report = validate_folder(paths, None, &ValidationThresholds::from_env())?;
    match report.outcome {
        ValidationOutcome::Pass => {}
        ValidationOutcome::Warn => {
            for reason in &report.reasons {
                log::warn!("{}: {reason}", paths.labels_path().display());
            }
        }
        ValidationOutcome::Fail => {
            anyhow::bail!(
                "dataset {} failed validation: {}",
                paths.labels_path().display(),
                report.reasons.join("; ")
            );
        }
    }
    Ok(())
}

pub fn build_model<B: Backend>(
    cfg: &TrainConfig,
    num_classes: usize,
    device: &B::Device,
) -> anyhow::Result<MultiLabelNet<B>> {
    let net_cfg = MultiLabelNetConfig {
        dropout: cfg.dropout,
        ..MultiLabelNetConfig::new(cfg.backbone, num_classes)
    };
    let mut net = MultiLabelNet::new(net_cfg, device);
    if let Some(path) = &cfg.pretrained {
        net = net.load_pretrained_features(path, device).map_err(|e| {
            anyhow!("failed to load pretrained features {}: {e}", path.display())
        })?;
    }
    if let Some(path) = &cfg.snapshot {
        net = net
            .load_snapshot(path, device)
            .map_err(|e| anyhow!("failed to load snapshot {}: {e}", path.display()))?;
    }
    Ok(net)
}

#[derive(Debug, Clone, Copy)]
pub struct EpochStats {
    pub iterations: usize,
    /// Mean of the reported (cross-label BCE) batch losses.
    pub mean_loss: f32,
}

/// One pass over `loader`, updating `model` after every batch.
#[allow(clippy::too_many_arguments)]
pub fn train_epoch<B, O>(
    mut model: MultiLabelNet<B>,
    optim: &mut O,
    loader: &MultiLabelLoader,
    criterion: &MultiLabelLoss,
    epoch: usize,
    lr: f64,
    batch_size: usize,
    log_every: usize,
    device: &B::Device,
) -> anyhow::Result<(MultiLabelNet<B>, EpochStats)>
where
    B: AutodiffBackend,
    O: Optimizer<MultiLabelNet<B>, B>,
{
    let mut iter = loader.iter(epoch);
    let mut losses = Vec::with_capacity(loader.num_batches(batch_size));
    while let Some(batch) = iter.next_batch::<B>(batch_size, device)? {
        let output = model.forward(batch.images);
        let terms = criterion.forward(output, batch.targets);
        let batch_loss = scalar(terms.main.detach());
        let grads = GradientsParams::from_grads(terms.total.backward(), &model);
        model = optim.step(lr, model, grads);

        losses.push(batch_loss);
        let iteration = losses.len();
        if log_every > 0 && iteration % log_every == 0 {
            log::info!("[epoch {epoch}], [iter {iteration}], [training_batch_loss {batch_loss:.4}]");
        }
    }
    let mean_loss = if losses.is_empty() {
        f32::NAN
    } else {
        losses.iter().sum::<f32>() / losses.len() as f32
    };
    Ok((
        model,
        EpochStats {
            iterations: losses.len(),
            mean_loss,
        },
    ))
}

#[derive(Debug, Clone)]
pub struct ValidationResult {
    /// BCE over every validation probability at once.
    pub loss: f32,
    pub metrics: MultiLabelMetrics,
    pub names: Vec<String>,
    /// Row-major `[samples, classes]`.
    pub probabilities: Vec<f32>,
}

/// Evaluates `model` (an inference-mode module) over the whole loader.
pub fn validate<B: Backend>(
    model: &MultiLabelNet<B>,
    loader: &MultiLabelLoader,
    batch_size: usize,
    threshold: f32,
    device: &B::Device,
) -> anyhow::Result<ValidationResult> {
    let mut probs = Vec::new();
    let mut targets = Vec::new();
    let mut names = Vec::with_capacity(loader.len());
    let mut iter = loader.iter(0);
    while let Some(batch) = iter.next_batch::<B>(batch_size, device)? {
        probs.push(model.forward(batch.images).probabilities());
        targets.push(batch.targets);
        names.extend(batch.names);
    }
    if probs.is_empty() {
        anyhow::bail!("validation loader produced no batches");
    }
    let probs = Tensor::cat(probs, 0);
    let targets = Tensor::cat(targets, 0);
    let loss = scalar(binary_cross_entropy(probs.clone(), targets.clone()));

    let probabilities = probs
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| anyhow!("reading probabilities: {e:?}"))?;
    let target_vec = targets
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| anyhow!("reading targets: {e:?}"))?;
    let metrics = evaluate(&probabilities, &target_vec, model.num_classes(), threshold);
    Ok(ValidationResult {
        loss,
        metrics,
        names,
        probabilities,
    })
}

/// Loads the vocabulary saved next to a checkpoint.
pub fn load_classes_near(checkpoint: &Path) -> anyhow::Result<ClassVocabulary> {
    let path = checkpoint_dir_of(checkpoint).join(CLASSES_FILE);
    Ok(ClassVocabulary::load(&path)?)
}
