#![recursion_limit = "256"]

pub mod checkpoint;
pub mod config;
#[cfg(feature = "pytorch-weights")]
pub mod import;
pub mod inference;
pub mod loss;
pub mod metrics;
pub mod scheduler;
pub mod util;

pub use checkpoint::{best_checkpoint_in, checkpoint_file_name, parse_checkpoint_name, TrainingState};
pub use config::TrainConfig;
pub use inference::{evaluate_folder, load_for_inference, predict_folder, InferenceOptions};
pub use loss::{binary_cross_entropy, multilabel_soft_margin_loss, MultiLabelLoss};
pub use metrics::{evaluate, MultiLabelMetrics};
pub use models::{BackboneKind, MultiLabelNet, MultiLabelNetConfig, MultiLabelOutput};
pub use scheduler::{PlateauConfig, ReduceLrOnPlateau, SchedulerError};
pub use util::{run_train, run_training, TrainArgs, TrainingSummary};
/// Backend alias for training/eval (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn_ndarray::NdArray<f32>;
