//! KITTI road dataset layout: indexing, loading and one-hot label encoding.
//!
//! ```text
//! <data_dir>/data_road/training/image_2/um_000000.png
//! <data_dir>/data_road/training/gt_image_2/um_road_000000.png
//! <data_dir>/data_road/testing/image_2/um_000000.png
//! ```

use crate::types::{BurnDatasetError, DatasetResult, ImageShape, SegmentationSample};
use image::imageops::FilterType;
use image::RgbImage;
use std::fs;
use std::path::{Path, PathBuf};

/// Ground-truth colour of non-road pixels.
pub const ROAD_BACKGROUND: [u8; 3] = [255, 0, 0];
/// Background and road.
pub const NUM_ROAD_CLASSES: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoadSampleIndex {
    pub image: PathBuf,
    pub gt_image: PathBuf,
}

/// File counts found by [`check_kitti_layout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KittiLayout {
    pub training_images: usize,
    pub training_labels: usize,
    pub testing_images: usize,
}

pub fn training_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("data_road").join("training")
}

pub fn testing_images_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("data_road").join("testing").join("image_2")
}

/// Verify the KITTI road directories exist and are populated.
pub fn check_kitti_layout(data_dir: &Path) -> DatasetResult<KittiLayout> {
    let training = training_dir(data_dir);
    let count = |dir: PathBuf| -> DatasetResult<usize> {
        let files = png_files(&dir)?;
        if files.is_empty() {
            return Err(BurnDatasetError::EmptyDirectory { path: dir });
        }
        Ok(files.len())
    };
    let layout = KittiLayout {
        training_images: count(training.join("image_2"))?,
        training_labels: count(training.join("gt_image_2"))?,
        testing_images: count(testing_images_dir(data_dir))?,
    };
    tracing::info!(
        training_images = layout.training_images,
        training_labels = layout.training_labels,
        testing_images = layout.testing_images,
        "found KITTI road dataset at {}",
        data_dir.display()
    );
    Ok(layout)
}

/// Sorted `.png` files directly under `dir`.
pub fn png_files(dir: &Path) -> DatasetResult<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(BurnDatasetError::MissingDirectory {
            path: dir.to_path_buf(),
        });
    }
    let entries = fs::read_dir(dir).map_err(|source| BurnDatasetError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| BurnDatasetError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) == Some("png") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Map a ground-truth file name to its camera image (`um_road_000000.png` -> `um_000000.png`).
pub fn image_name_for_label(label_name: &str) -> String {
    label_name.replace("_road_", "_").replace("_lane_", "_")
}

/// Pair every `gt_image_2/*_road_*.png` with its `image_2` counterpart.
pub fn index_road_samples(training_dir: &Path) -> DatasetResult<Vec<RoadSampleIndex>> {
    let images_dir = training_dir.join("image_2");
    let labels_dir = training_dir.join("gt_image_2");
    let mut indices = Vec::new();
    for gt_image in png_files(&labels_dir)? {
        let Some(name) = gt_image.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        if !name.contains("_road_") {
            continue;
        }
        let image = images_dir.join(image_name_for_label(name));
        if !image.is_file() {
            return Err(BurnDatasetError::MissingImage {
                label: gt_image,
                image,
            });
        }
        indices.push(RoadSampleIndex { image, gt_image });
    }
    Ok(indices)
}

pub fn load_rgb_resized(path: &Path, shape: ImageShape, filter: FilterType) -> DatasetResult<RgbImage> {
    let img = image::open(path)
        .map_err(|source| BurnDatasetError::Image {
            path: path.to_path_buf(),
            source,
        })?
        .to_rgb8();
    if img.dimensions() == (shape.width, shape.height) {
        return Ok(img);
    }
    Ok(image::imageops::resize(
        &img,
        shape.width,
        shape.height,
        filter,
    ))
}

/// RGB pixels in HWC order scaled to [0, 1].
pub fn image_to_hwc(img: &RgbImage) -> Vec<f32> {
    img.as_raw().iter().map(|v| *v as f32 / 255.0).collect()
}

/// Two-channel one-hot map: channel 0 is `background`, channel 1 everything else.
pub fn one_hot_labels(gt: &RgbImage, background: [u8; 3]) -> Vec<f32> {
    let mut out = Vec::with_capacity(gt.width() as usize * gt.height() as usize * NUM_ROAD_CLASSES);
    for pixel in gt.pixels() {
        if pixel.0 == background {
            out.extend_from_slice(&[1.0, 0.0]);
        } else {
            out.extend_from_slice(&[0.0, 1.0]);
        }
    }
    out
}

pub fn load_road_sample(
    idx: &RoadSampleIndex,
    shape: ImageShape,
    background: [u8; 3],
) -> DatasetResult<SegmentationSample> {
    let image = load_rgb_resized(&idx.image, shape, FilterType::Triangle)?;
    // Nearest keeps label colours exact at class boundaries.
    let gt = load_rgb_resized(&idx.gt_image, shape, FilterType::Nearest)?;
    Ok(SegmentationSample {
        image_hwc: image_to_hwc(&image),
        labels_hwc: one_hot_labels(&gt, background),
        height: shape.height,
        width: shape.width,
        num_classes: NUM_ROAD_CLASSES,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_names_map_to_images() {
        assert_eq!(image_name_for_label("um_road_000000.png"), "um_000000.png");
        assert_eq!(image_name_for_label("uu_lane_000094.png"), "uu_000094.png");
        assert_eq!(image_name_for_label("umm_000001.png"), "umm_000001.png");
    }

    #[test]
    fn red_is_background() {
        let gt = RgbImage::from_fn(2, 1, |x, _| {
            if x == 0 {
                image::Rgb(ROAD_BACKGROUND)
            } else {
                image::Rgb([255, 0, 255])
            }
        });
        assert_eq!(one_hot_labels(&gt, ROAD_BACKGROUND), vec![1.0, 0.0, 0.0, 1.0]);
    }
}
