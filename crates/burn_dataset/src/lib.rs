//! Dataset loading and Burn-compatible batching for road segmentation.
//!
//! This crate provides utilities for:
//! - Checking and indexing the KITTI road directory layout
//! - Decoding, resizing and one-hot encoding image/label pairs
//! - Restartable per-epoch minibatch iteration (`BatchSource`)

pub mod batch;
pub mod road;
pub mod types;

pub use batch::{BatchSource, InMemoryBatches, RoadBatchIter, RoadDatasetConfig};
pub use road::{
    check_kitti_layout, image_name_for_label, index_road_samples, load_road_sample,
    one_hot_labels, png_files, testing_images_dir, training_dir, KittiLayout, RoadSampleIndex,
    NUM_ROAD_CLASSES, ROAD_BACKGROUND,
};
pub use types::*;
