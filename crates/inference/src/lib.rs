//! Inference samples for trained road segmentation networks.
//!
//! - `overlay`: probability maps painted over camera images.
//! - `export`: runs a network over the KITTI test split and writes overlays
//!   into a timestamped run directory.

#![recursion_limit = "256"]

pub mod export;
pub mod overlay;

/// Backend alias for inference (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type InferenceBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type InferenceBackend = burn_ndarray::NdArray<f32>;

pub use export::{
    gen_test_output, road_probabilities, save_inference_samples, ExportError, ROAD_THRESHOLD,
};
pub use overlay::{overlay_road, ROAD_OVERLAY};

pub mod prelude {
    pub use crate::export::{save_inference_samples, ExportError};
    pub use crate::overlay::overlay_road;
    pub use crate::InferenceBackend;
}
