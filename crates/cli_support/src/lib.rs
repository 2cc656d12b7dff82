//! Shared CLI helpers for the road segmentation tools.

pub mod common;
pub mod logging;

pub use common::{DataPathArgs, DataPaths};
pub use logging::{init_tracing, InitError};
