//! Training for the FCN-8 road segmentation network.
//!
//! - `objective`: pixel-wise softmax cross-entropy plus weight decay, and the
//!   Adam update that minimizes it.
//! - `train`: the epoch/minibatch loop over any `BatchSource`.
//! - `checkpoint`: `model.bin` / `model.json` persistence.
//! - `util`: the `train` binary's orchestration.

#![recursion_limit = "256"]

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod objective;
pub mod train;
pub mod util;

pub use checkpoint::{load_checkpoint, save_checkpoint, CheckpointError, CheckpointManifest};
pub use config::{ConfigError, Hyperparameters, TrainConfig};
pub use error::TrainError;
pub use objective::{adam_update, optimize, softmax_cross_entropy, AdamUpdate, LossTerms};
pub use train::{
    train_nn, SegmentationTrainer, StepFeed, StepReport, TrainSummary, UpdateStep,
    TRAIN_KEEP_PROB, TRAIN_LEARNING_RATE,
};
pub use util::{run_train, TrainArgs};

/// Backend alias for training (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn_ndarray::NdArray<f32>;

pub type ADBackend = burn::backend::Autodiff<TrainBackend>;
