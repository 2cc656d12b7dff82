use burn::tensor::{Tensor, TensorData};
use burn_dataset::{ImageShape, ROAD_BACKGROUND};
use burn_ndarray::NdArray;
use image::{Rgb, RgbImage};
use models::{save_vgg, KeepProb, Vgg16Config};
use std::fs;
use std::path::Path;
use training::util::run_with_config;
use training::{load_checkpoint, Hyperparameters, TrainConfig};

type Backend = NdArray<f32>;

/// KITTI-shaped tree with `count` training pairs and `count` test images.
fn synthetic_kitti(root: &Path, count: usize, width: u32, height: u32) {
    let training = root.join("data_road/training");
    let testing = root.join("data_road/testing/image_2");
    fs::create_dir_all(training.join("image_2")).unwrap();
    fs::create_dir_all(training.join("gt_image_2")).unwrap();
    fs::create_dir_all(&testing).unwrap();
    for i in 0..count {
        let img = RgbImage::from_fn(width, height, |x, _| {
            if x < width / 2 {
                Rgb([200, 200, 200])
            } else {
                Rgb([30, 30, 30])
            }
        });
        img.save(training.join(format!("image_2/um_{i:06}.png"))).unwrap();
        img.save(testing.join(format!("um_{i:06}.png"))).unwrap();
        let gt = RgbImage::from_fn(width, height, |x, _| {
            if x < width / 2 {
                Rgb([255, 0, 255])
            } else {
                Rgb(ROAD_BACKGROUND)
            }
        });
        gt.save(training.join(format!("gt_image_2/um_road_{i:06}.png"))).unwrap();
    }
}

fn small_config(root: &Path) -> TrainConfig {
    TrainConfig {
        data_dir: root.join("data"),
        vgg_dir: root.join("data/vgg"),
        runs_dir: root.join("runs"),
        checkpoint_dir: root.join("checkpoints"),
        seed: Some(11),
        hyper: Hyperparameters {
            image_shape: ImageShape::new(32, 64),
            epochs: 1,
            batch_size: 2,
            keep_prob: 1.0,
            ..Hyperparameters::default()
        },
    }
}

#[test]
fn full_run_exports_samples_and_checkpoint() {
    let temp = tempfile::tempdir().unwrap();
    let cfg = small_config(temp.path());
    synthetic_kitti(&cfg.data_dir, 3, 80, 40);
    let backbone = Vgg16Config::compact();
    save_vgg(backbone.init::<Backend>(&Default::default()), &cfg.vgg_dir).unwrap();

    let outcome = run_with_config(&cfg, &backbone, false).unwrap();

    assert_eq!(outcome.summary.steps, 2);
    assert_eq!(outcome.samples.len(), 3);
    for sample in &outcome.samples {
        assert!(sample.starts_with(&cfg.runs_dir));
        let written = image::open(sample).unwrap();
        assert_eq!((written.width(), written.height()), (64, 32));
    }
    assert!(outcome.checkpoint.weights.is_file());
    assert!(outcome.checkpoint.graph.is_file());

    let device = Default::default();
    let (model, manifest) = load_checkpoint::<Backend>(&cfg.checkpoint_dir, &device).unwrap();
    assert_eq!(manifest.hyperparameters, cfg.hyper);
    assert_eq!(manifest.graph.backbone, backbone);
    let images = Tensor::<Backend, 4>::from_data(
        TensorData::new(vec![0.5f32; 3 * 32 * 64], [1, 3, 32, 64]),
        &device,
    );
    assert_eq!(model.forward(images, KeepProb::ONE).dims(), [1, 2, 32, 64]);
}

#[test]
fn missing_backbone_needs_opt_in() {
    let temp = tempfile::tempdir().unwrap();
    let cfg = small_config(temp.path());
    synthetic_kitti(&cfg.data_dir, 2, 64, 32);
    let backbone = Vgg16Config::compact();

    let err = run_with_config(&cfg, &backbone, false).unwrap_err();
    assert!(format!("{err:#}").contains("backbone"));
    assert!(!cfg.checkpoint_dir.exists());

    let outcome = run_with_config(&cfg, &backbone, true).unwrap();
    assert_eq!(outcome.samples.len(), 2);
}

#[test]
fn failed_preconditions_write_nothing() {
    let temp = tempfile::tempdir().unwrap();
    let mut cfg = small_config(temp.path());

    // No dataset at all.
    assert!(run_with_config(&cfg, &Vgg16Config::compact(), true).is_err());

    synthetic_kitti(&cfg.data_dir, 2, 64, 32);
    cfg.hyper.num_classes = 3;
    assert!(run_with_config(&cfg, &Vgg16Config::compact(), true).is_err());
    assert!(!cfg.checkpoint_dir.exists());
    assert!(!cfg.runs_dir.exists());
}
