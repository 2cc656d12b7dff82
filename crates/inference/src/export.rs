//! Inference samples over the held-out KITTI test images.

use crate::overlay::{overlay_road, ROAD_OVERLAY};
use burn::tensor::activation::softmax;
use burn::tensor::{backend::Backend, Tensor, TensorData};
use burn_dataset::road::{image_to_hwc, load_rgb_resized};
use burn_dataset::{png_files, testing_images_dir, BurnDatasetError, ImageShape};
use image::imageops::FilterType;
use image::RgbImage;
use models::{KeepProb, SegmentationModel};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Road probability above which a pixel is painted.
pub const ROAD_THRESHOLD: f32 = 0.5;
const ROAD_CLASS: usize = 1;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Dataset(#[from] BurnDatasetError),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("model has {num_classes} classes; road overlays need at least 2")]
    TooFewClasses { num_classes: usize },
    #[error("model produced scores {actual:?}; expected {expected:?}")]
    ScoreShape {
        expected: [usize; 4],
        actual: [usize; 4],
    },
    #[error("{probs} probabilities do not cover a {width}x{height} image")]
    Overlay { probs: usize, width: u32, height: u32 },
    #[error("failed to read back probabilities: {0}")]
    Readback(String),
}

/// Class-1 softmax probability per pixel, row-major, for one HWC image.
pub fn road_probabilities<B, M>(
    model: &M,
    image_hwc: &[f32],
    shape: ImageShape,
    device: &B::Device,
) -> Result<Vec<f32>, ExportError>
where
    B: Backend,
    M: SegmentationModel<B>,
{
    let num_classes = model.num_classes();
    if num_classes <= ROAD_CLASS {
        return Err(ExportError::TooFewClasses { num_classes });
    }
    let (h, w) = (shape.height as usize, shape.width as usize);
    let images = Tensor::<B, 4>::from_data(TensorData::new(image_hwc.to_vec(), [1, h, w, 3]), device)
        .permute([0, 3, 1, 2]);
    let scores = model.forward_scores(images, KeepProb::ONE);
    let expected = [1, num_classes, h, w];
    if scores.dims() != expected {
        return Err(ExportError::ScoreShape {
            expected,
            actual: scores.dims(),
        });
    }
    let probs = softmax(scores, 1)
        .slice([0..1, ROAD_CLASS..ROAD_CLASS + 1, 0..h, 0..w])
        .reshape([h * w]);
    probs
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| ExportError::Readback(format!("{e:?}")))
}

/// Resize one test image, segment it and paint the road.
pub fn gen_test_output<B, M>(
    model: &M,
    image_path: &Path,
    shape: ImageShape,
    device: &B::Device,
) -> Result<RgbImage, ExportError>
where
    B: Backend,
    M: SegmentationModel<B>,
{
    let mut img = load_rgb_resized(image_path, shape, FilterType::Triangle)?;
    let probs = road_probabilities(model, &image_to_hwc(&img), shape, device)?;
    let painted = overlay_road(&mut img, &probs, ROAD_THRESHOLD, ROAD_OVERLAY).ok_or(
        ExportError::Overlay {
            probs: probs.len(),
            width: img.width(),
            height: img.height(),
        },
    )?;
    tracing::debug!(painted, "segmented {}", image_path.display());
    Ok(img)
}

/// Segment every `data_road/testing/image_2/*.png` under `data_dir` and write the
/// overlays into a fresh `<runs_dir>/<unix-timestamp>/` directory.
pub fn save_inference_samples<B, M>(
    runs_dir: &Path,
    data_dir: &Path,
    model: &M,
    shape: ImageShape,
    device: &B::Device,
) -> Result<Vec<PathBuf>, ExportError>
where
    B: Backend,
    M: SegmentationModel<B>,
{
    let test_images = png_files(&testing_images_dir(data_dir))?;
    let output_dir = fresh_run_dir(runs_dir)?;
    tracing::info!(
        images = test_images.len(),
        "training finished; saving test images to {}",
        output_dir.display()
    );

    let mut written = Vec::with_capacity(test_images.len());
    for image_path in &test_images {
        let Some(name) = image_path.file_name() else {
            continue;
        };
        let overlay = gen_test_output(model, image_path, shape, device)?;
        let out = output_dir.join(name);
        overlay.save(&out).map_err(|source| ExportError::Image {
            path: out.clone(),
            source,
        })?;
        written.push(out);
    }
    Ok(written)
}

fn fresh_run_dir(runs_dir: &Path) -> Result<PathBuf, ExportError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| ExportError::Io { path, source }
    };
    fs::create_dir_all(runs_dir).map_err(io_err(runs_dir))?;
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let mut candidate = runs_dir.join(stamp.to_string());
    let mut suffix = 1;
    while candidate.exists() {
        candidate = runs_dir.join(format!("{stamp}_{suffix}"));
        suffix += 1;
    }
    fs::create_dir(&candidate).map_err(io_err(&candidate))?;
    Ok(candidate)
}
