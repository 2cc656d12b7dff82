use crate::checkpoint::{save_checkpoint, CheckpointManifest, CheckpointPaths};
use crate::config::TrainConfig;
use crate::objective::adam_update;
use crate::train::{train_nn, SegmentationTrainer, TrainSummary};
use crate::{ADBackend, TrainBackend};
use anyhow::Context;
use burn::module::AutodiffModule;
use burn::tensor::backend::Backend;
use burn_dataset::{check_kitti_layout, training_dir, RoadBatchIter, RoadDatasetConfig, NUM_ROAD_CLASSES};
use clap::{Parser, ValueEnum};
use cli_support::DataPathArgs;
use inference::save_inference_samples;
use models::{load_vgg, BackboneError, DecoderInit, Fcn8, InputSpec, Vgg16Config};
use std::path::PathBuf;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    NdArray,
    Wgpu,
}

#[derive(Parser, Debug)]
#[command(name = "train", about = "Train the FCN-8 road segmentation network on KITTI road")]
pub struct TrainArgs {
    /// Config file (defaults to $FCN_ROAD_CONFIG, then ./fcn-road.toml).
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[command(flatten)]
    pub paths: DataPathArgs,
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,
    /// Start from randomly initialized backbone weights when vgg16.bin is absent.
    #[arg(long, default_value_t = false)]
    pub random_backbone: bool,
}

/// What a completed run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub summary: TrainSummary,
    pub samples: Vec<PathBuf>,
    pub checkpoint: CheckpointPaths,
}

pub fn run_train(args: TrainArgs) -> anyhow::Result<()> {
    validate_backend_choice(args.backend)?;
    warn_if_cpu_only();

    let cfg = TrainConfig::load(args.config.as_deref())
        .context("failed to load training config")?
        .with_overrides(&args.paths);
    let outcome = run_with_config(&cfg, &Vgg16Config::default(), args.random_backbone)?;
    tracing::info!(
        steps = outcome.summary.steps,
        samples = outcome.samples.len(),
        "checkpoint written to {}",
        outcome.checkpoint.weights.display()
    );
    Ok(())
}

/// Check resources, build the network, train, export samples and save the
/// checkpoint. Nothing is written to the checkpoint directory unless every
/// earlier step succeeded.
pub fn run_with_config(
    cfg: &TrainConfig,
    backbone_config: &Vgg16Config,
    random_backbone: bool,
) -> anyhow::Result<RunOutcome> {
    let hyper = &cfg.hyper;
    hyper.validate()?;
    if hyper.num_classes != NUM_ROAD_CLASSES {
        anyhow::bail!(
            "KITTI road labels have {NUM_ROAD_CLASSES} classes; config asks for {}",
            hyper.num_classes
        );
    }
    check_kitti_layout(&cfg.data_dir)
        .with_context(|| format!("KITTI road dataset not usable at {}", cfg.data_dir.display()))?;

    let device = <ADBackend as Backend>::Device::default();
    let image = InputSpec::rgb(
        hyper.image_shape.height as usize,
        hyper.image_shape.width as usize,
    );
    let (backbone, handles) = match load_vgg::<ADBackend>(&cfg.vgg_dir, backbone_config, image, &device) {
        Ok(loaded) => loaded,
        Err(err @ (BackboneError::MissingDirectory { .. } | BackboneError::MissingWeights { .. }))
            if random_backbone =>
        {
            tracing::warn!("{err}; continuing with a randomly initialized backbone");
            let handles = backbone_config.handles(image)?;
            (backbone_config.init_seeded::<ADBackend>(cfg.seed, &device), handles)
        }
        Err(err) => return Err(err).context("failed to load pretrained backbone"),
    };

    let init = cfg.seed.map(DecoderInit::seeded).unwrap_or_default();
    let (model, graph) = Fcn8::assemble(
        backbone,
        backbone_config,
        handles,
        hyper.num_classes,
        &init,
        &device,
    )
    .context("failed to build decoder")?;

    let mut dataset_cfg = RoadDatasetConfig::new(hyper.image_shape);
    dataset_cfg.seed = cfg.seed;
    let mut batches = RoadBatchIter::from_training_dir(&training_dir(&cfg.data_dir), dataset_cfg)?;

    let update = adam_update::<ADBackend, Fcn8<ADBackend>>(hyper.learning_rate);
    let mut trainer = SegmentationTrainer::new(model, update, device.clone());
    let summary = train_nn(
        hyper.epochs,
        hyper.batch_size,
        &mut batches,
        &mut trainer,
        hyper.step_feed(),
        |_| {},
    )?;

    let model = trainer.into_model().valid();
    let samples = save_inference_samples::<TrainBackend, _>(
        &cfg.runs_dir,
        &cfg.data_dir,
        &model,
        hyper.image_shape,
        &device,
    )
    .context("failed to export inference samples")?;

    let manifest = CheckpointManifest {
        graph,
        hyperparameters: hyper.clone(),
    };
    let checkpoint = save_checkpoint(&model, &manifest, &cfg.checkpoint_dir)
        .context("failed to save checkpoint")?;

    Ok(RunOutcome {
        summary,
        samples,
        checkpoint,
    })
}

pub fn validate_backend_choice(kind: BackendKind) -> anyhow::Result<()> {
    let built_wgpu = cfg!(feature = "backend-wgpu");
    match (kind, built_wgpu) {
        (BackendKind::Wgpu, false) => {
            anyhow::bail!("backend-wgpu feature not enabled; rebuild with --features backend-wgpu or choose ndarray backend")
        }
        (BackendKind::NdArray, true) => {
            tracing::warn!("built with backend-wgpu; training will still use the WGPU backend despite --backend ndarray");
        }
        _ => {}
    }
    Ok(())
}

fn warn_if_cpu_only() {
    if !cfg!(feature = "backend-wgpu") {
        tracing::warn!("no GPU backend compiled in; training runs on the CPU and will be slow");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wgpu_requires_feature() {
        let res = validate_backend_choice(BackendKind::Wgpu);
        assert_eq!(res.is_ok(), cfg!(feature = "backend-wgpu"));
        assert!(validate_backend_choice(BackendKind::NdArray).is_ok());
    }

    #[test]
    fn args_parse_path_overrides() {
        let args = TrainArgs::parse_from([
            "train",
            "--data-dir",
            "/srv/kitti",
            "--checkpoint-dir",
            "/tmp/ckpt",
            "--random-backbone",
        ]);
        assert_eq!(args.paths.data_dir, Some(PathBuf::from("/srv/kitti")));
        assert_eq!(args.paths.checkpoint_dir, Some(PathBuf::from("/tmp/ckpt")));
        assert!(args.random_backbone);
        assert_eq!(args.backend, BackendKind::NdArray);
    }
}
