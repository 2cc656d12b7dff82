use crate::train::{StepFeed, TRAIN_KEEP_PROB, TRAIN_LEARNING_RATE};
use burn_dataset::ImageShape;
use cli_support::{DataPathArgs, DataPaths};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_CONFIG_NAME: &str = "fcn-road.toml";
/// Environment variable pointing at an alternative config file.
pub const CONFIG_ENV: &str = "FCN_ROAD_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid hyperparameter {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    pub num_classes: usize,
    pub image_shape: ImageShape,
    pub epochs: usize,
    pub batch_size: usize,
    pub keep_prob: f64,
    pub learning_rate: f64,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            num_classes: 2,
            image_shape: ImageShape::new(160, 576),
            epochs: 20,
            batch_size: 4,
            keep_prob: TRAIN_KEEP_PROB,
            learning_rate: TRAIN_LEARNING_RATE,
        }
    }
}

impl Hyperparameters {
    pub fn step_feed(&self) -> StepFeed {
        StepFeed {
            keep_prob: self.keep_prob,
            learning_rate: self.learning_rate,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |name, reason: &str| {
            Err(ConfigError::Invalid {
                name,
                reason: reason.to_string(),
            })
        };
        if self.num_classes == 0 {
            return invalid("num_classes", "must be at least 1");
        }
        if self.image_shape.height == 0 || self.image_shape.width == 0 {
            return invalid("image_shape", "must be non-zero");
        }
        if self.batch_size == 0 {
            return invalid("batch_size", "must be at least 1");
        }
        if !(self.keep_prob > 0.0 && self.keep_prob <= 1.0) {
            return invalid("keep_prob", "must lie in (0, 1]");
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return invalid("learning_rate", "must be positive");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainConfig {
    pub data_dir: PathBuf,
    pub vgg_dir: PathBuf,
    pub runs_dir: PathBuf,
    pub checkpoint_dir: PathBuf,
    /// Pins dataset shuffling and decoder initialization when set.
    pub seed: Option<u64>,
    pub hyper: Hyperparameters,
}

impl Default for TrainConfig {
    fn default() -> Self {
        let data_dir = PathBuf::from("data");
        Self {
            vgg_dir: data_dir.join("vgg"),
            data_dir,
            runs_dir: PathBuf::from("runs"),
            checkpoint_dir: PathBuf::from("checkpoints"),
            seed: None,
            hyper: Hyperparameters::default(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct TrainConfigFile {
    data_dir: Option<String>,
    vgg_dir: Option<String>,
    runs_dir: Option<String>,
    checkpoint_dir: Option<String>,
    seed: Option<u64>,
    hyperparameters: Option<HyperparameterSection>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct HyperparameterSection {
    num_classes: Option<usize>,
    image_height: Option<u32>,
    image_width: Option<u32>,
    epochs: Option<usize>,
    batch_size: Option<usize>,
    keep_prob: Option<f64>,
    learning_rate: Option<f64>,
}

impl TrainConfig {
    /// Resolve the config: an explicit path, then `$FCN_ROAD_CONFIG`, then
    /// `fcn-road.toml` in the working directory, then built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_path(path);
        }
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::from_path(Path::new(&path));
        }
        let default = Path::new(DEFAULT_CONFIG_NAME);
        if default.exists() {
            return Self::from_path(default);
        }
        tracing::debug!("no {DEFAULT_CONFIG_NAME} found; using built-in defaults");
        Ok(Self::default())
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: TrainConfigFile = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg = Self::from_file(file);
        cfg.hyper.validate()?;
        Ok(cfg)
    }

    /// Parse config text directly; relative paths are kept as written.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let file: TrainConfigFile = toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        let cfg = Self::from_file(file);
        cfg.hyper.validate()?;
        Ok(cfg)
    }

    fn from_file(file: TrainConfigFile) -> Self {
        let defaults = Self::default();
        let data_dir = file
            .data_dir
            .map(|v| expand_path(&v))
            .unwrap_or(defaults.data_dir);
        let vgg_dir = file
            .vgg_dir
            .map(|v| expand_path(&v))
            .unwrap_or_else(|| data_dir.join("vgg"));

        let h = file.hyperparameters.unwrap_or_default();
        let base = defaults.hyper;
        let hyper = Hyperparameters {
            num_classes: h.num_classes.unwrap_or(base.num_classes),
            image_shape: ImageShape::new(
                h.image_height.unwrap_or(base.image_shape.height),
                h.image_width.unwrap_or(base.image_shape.width),
            ),
            epochs: h.epochs.unwrap_or(base.epochs),
            batch_size: h.batch_size.unwrap_or(base.batch_size),
            keep_prob: h.keep_prob.unwrap_or(base.keep_prob),
            learning_rate: h.learning_rate.unwrap_or(base.learning_rate),
        };

        TrainConfig {
            data_dir,
            vgg_dir,
            runs_dir: file
                .runs_dir
                .map(|v| expand_path(&v))
                .unwrap_or(defaults.runs_dir),
            checkpoint_dir: file
                .checkpoint_dir
                .map(|v| expand_path(&v))
                .unwrap_or(defaults.checkpoint_dir),
            seed: file.seed,
            hyper,
        }
    }

    pub fn paths(&self) -> DataPaths {
        DataPaths {
            data_dir: self.data_dir.clone(),
            vgg_dir: self.vgg_dir.clone(),
            runs_dir: self.runs_dir.clone(),
            checkpoint_dir: self.checkpoint_dir.clone(),
        }
    }

    /// Apply command-line directory overrides.
    pub fn with_overrides(mut self, args: &DataPathArgs) -> Self {
        let paths = args.resolve(self.paths());
        self.data_dir = paths.data_dir;
        self.vgg_dir = paths.vgg_dir;
        self.runs_dir = paths.runs_dir;
        self.checkpoint_dir = paths.checkpoint_dir;
        self
    }
}

/// Expand a leading `~` and `${VAR}` references.
fn expand_path(raw: &str) -> PathBuf {
    let expanded = expand_env(raw);
    match (expanded.strip_prefix('~'), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => PathBuf::from(format!("{home}{rest}")),
        _ => PathBuf::from(expanded),
    }
}

/// Unset variables are left verbatim.
fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                match std::env::var(key) {
                    Ok(val) => out.push_str(&val),
                    Err(_) => out.push_str(&rest[start..start + end + 3]),
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_references_expand() {
        std::env::set_var("FCN_ROAD_TEST_ROOT", "/srv/kitti");
        assert_eq!(expand_env("${FCN_ROAD_TEST_ROOT}/data"), "/srv/kitti/data");
        assert_eq!(expand_env("${FCN_ROAD_UNSET_VAR}/x"), "${FCN_ROAD_UNSET_VAR}/x");
        assert_eq!(expand_env("plain/${unterminated"), "plain/${unterminated");
    }

    #[test]
    fn defaults_match_fixed_hyperparameters() {
        let hyper = Hyperparameters::default();
        assert_eq!(hyper.num_classes, 2);
        assert_eq!(hyper.image_shape, ImageShape::new(160, 576));
        assert_eq!(hyper.epochs, 20);
        assert_eq!(hyper.batch_size, 4);
        assert_eq!(hyper.step_feed(), StepFeed::default());
        assert!(hyper.validate().is_ok());
    }
}
