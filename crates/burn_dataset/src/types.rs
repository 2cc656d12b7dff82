//! Core types and error definitions for burn_dataset.

use burn::tensor::{backend::Backend, Tensor};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, BurnDatasetError>;

#[derive(Debug, Error)]
pub enum BurnDatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("dataset directory {path} does not exist")]
    MissingDirectory { path: PathBuf },
    #[error("dataset directory {path} contains no png files")]
    EmptyDirectory { path: PathBuf },
    #[error("image file missing for label {label}: {image}")]
    MissingImage { label: PathBuf, image: PathBuf },
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
    #[error("{0}")]
    Other(String),
}

/// Target spatial size every image and label map is resized to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageShape {
    pub height: u32,
    pub width: u32,
}

impl ImageShape {
    pub fn new(height: u32, width: u32) -> Self {
        Self { height, width }
    }

    pub fn pixels(&self) -> usize {
        self.height as usize * self.width as usize
    }
}

#[derive(Debug, Clone)]
pub struct SegmentationSample {
    /// RGB image in HWC layout, normalized to [0, 1].
    pub image_hwc: Vec<f32>,
    /// One-hot labels in HWC layout.
    pub labels_hwc: Vec<f32>,
    pub height: u32,
    pub width: u32,
    pub num_classes: usize,
}

impl SegmentationSample {
    fn check(&self) -> DatasetResult<()> {
        let pixels = self.height as usize * self.width as usize;
        if self.image_hwc.len() != pixels * 3 || self.labels_hwc.len() != pixels * self.num_classes
        {
            return Err(BurnDatasetError::ShapeMismatch(format!(
                "sample buffers ({} image, {} label values) do not match {}x{}x{}",
                self.image_hwc.len(),
                self.labels_hwc.len(),
                self.height,
                self.width,
                self.num_classes
            )));
        }
        Ok(())
    }
}

/// Host-side minibatch: images `(batch, H, W, 3)` and one-hot labels
/// `(batch, H, W, num_classes)`, both row-major.
#[derive(Debug, Clone)]
pub struct Minibatch {
    pub images: Vec<f32>,
    pub labels: Vec<f32>,
    pub batch: usize,
    pub height: usize,
    pub width: usize,
    pub num_classes: usize,
}

impl Minibatch {
    pub fn from_samples(samples: &[SegmentationSample]) -> DatasetResult<Self> {
        let Some(first) = samples.first() else {
            return Err(BurnDatasetError::Other(
                "cannot assemble an empty minibatch".to_string(),
            ));
        };
        let mut images = Vec::with_capacity(samples.len() * first.image_hwc.len());
        let mut labels = Vec::with_capacity(samples.len() * first.labels_hwc.len());
        for sample in samples {
            sample.check()?;
            if (sample.height, sample.width, sample.num_classes)
                != (first.height, first.width, first.num_classes)
            {
                return Err(BurnDatasetError::ShapeMismatch(format!(
                    "batch mixes {}x{}x{} with {}x{}x{}",
                    first.height,
                    first.width,
                    first.num_classes,
                    sample.height,
                    sample.width,
                    sample.num_classes
                )));
            }
            images.extend_from_slice(&sample.image_hwc);
            labels.extend_from_slice(&sample.labels_hwc);
        }
        Ok(Self {
            images,
            labels,
            batch: samples.len(),
            height: first.height as usize,
            width: first.width as usize,
            num_classes: first.num_classes,
        })
    }

    pub fn image_dims(&self) -> [usize; 4] {
        [self.batch, self.height, self.width, 3]
    }

    pub fn label_dims(&self) -> [usize; 4] {
        [self.batch, self.height, self.width, self.num_classes]
    }

    /// Move the batch onto `device`: images channels-first for the convolutions,
    /// labels kept channels-last.
    pub fn to_burn<B: Backend>(&self, device: &B::Device) -> SegmentationBatch<B> {
        let images = Tensor::<B, 1>::from_floats(self.images.as_slice(), device)
            .reshape(self.image_dims())
            .permute([0, 3, 1, 2]);
        let labels =
            Tensor::<B, 1>::from_floats(self.labels.as_slice(), device).reshape(self.label_dims());
        SegmentationBatch { images, labels }
    }
}

pub struct SegmentationBatch<B: Backend> {
    /// `[batch, 3, H, W]`
    pub images: Tensor<B, 4>,
    /// `[batch, H, W, num_classes]`
    pub labels: Tensor<B, 4>,
}
