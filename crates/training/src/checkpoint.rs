//! Trained-model checkpoints: `model.bin` (Burn record) plus `model.json`
//! (graph definition and the hyperparameters it was trained with).

use crate::config::Hyperparameters;
use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::Backend;
use models::{Fcn8, FcnGraph, GraphError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const WEIGHTS_FILE: &str = "model.bin";
pub const GRAPH_FILE: &str = "model.json";

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid graph definition {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to record weights at {path}: {msg}")]
    Record { path: PathBuf, msg: String },
    #[error(transparent)]
    Graph(#[from] GraphError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointManifest {
    pub graph: FcnGraph,
    pub hyperparameters: Hyperparameters,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointPaths {
    pub weights: PathBuf,
    pub graph: PathBuf,
}

impl CheckpointPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            weights: dir.join(WEIGHTS_FILE),
            graph: dir.join(GRAPH_FILE),
        }
    }
}

pub fn save_checkpoint<B: Backend>(
    model: &Fcn8<B>,
    manifest: &CheckpointManifest,
    dir: &Path,
) -> Result<CheckpointPaths, CheckpointError> {
    fs::create_dir_all(dir).map_err(|source| CheckpointError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let paths = CheckpointPaths::in_dir(dir);

    let json = serde_json::to_string_pretty(manifest).map_err(|source| CheckpointError::Json {
        path: paths.graph.clone(),
        source,
    })?;
    fs::write(&paths.graph, json).map_err(|source| CheckpointError::Io {
        path: paths.graph.clone(),
        source,
    })?;

    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    model
        .clone()
        .save_file(paths.weights.as_path(), &recorder)
        .map_err(|e| CheckpointError::Record {
            path: paths.weights.clone(),
            msg: e.to_string(),
        })?;
    tracing::info!("saved checkpoint to {}", dir.display());
    Ok(paths)
}

/// Rebuild the network described by `model.json` and restore `model.bin` into it.
pub fn load_checkpoint<B: Backend>(
    dir: &Path,
    device: &B::Device,
) -> Result<(Fcn8<B>, CheckpointManifest), CheckpointError> {
    let paths = CheckpointPaths::in_dir(dir);
    let raw = fs::read_to_string(&paths.graph).map_err(|source| CheckpointError::Io {
        path: paths.graph.clone(),
        source,
    })?;
    let manifest: CheckpointManifest =
        serde_json::from_str(&raw).map_err(|source| CheckpointError::Json {
            path: paths.graph.clone(),
            source,
        })?;
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    let model = Fcn8::<B>::from_graph(&manifest.graph, device)?
        .load_file(paths.weights.as_path(), &recorder, device)
        .map_err(|e| CheckpointError::Record {
            path: paths.weights.clone(),
            msg: e.to_string(),
        })?;
    Ok((model, manifest))
}
