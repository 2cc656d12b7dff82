use clap::Args;
use std::path::PathBuf;

/// Directory overrides shared by the training tools.
///
/// Every flag is optional; unset values fall back to the config file.
#[derive(Debug, Clone, Default, Args)]
pub struct DataPathArgs {
    /// Dataset root containing `data_road/` and `vgg/`.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    /// Directory holding the pretrained `vgg16.bin` (defaults to `<data_dir>/vgg`).
    #[arg(long)]
    pub vgg_dir: Option<PathBuf>,
    /// Root for timestamped inference sample runs.
    #[arg(long)]
    pub runs_dir: Option<PathBuf>,
    /// Where `model.bin` and `model.json` are written.
    #[arg(long)]
    pub checkpoint_dir: Option<PathBuf>,
}

/// Fully resolved directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    pub data_dir: PathBuf,
    pub vgg_dir: PathBuf,
    pub runs_dir: PathBuf,
    pub checkpoint_dir: PathBuf,
}

impl DataPathArgs {
    /// Apply the flags that were given on top of `base`.
    ///
    /// Overriding the data directory moves the backbone directory along with it
    /// unless `--vgg-dir` is also given or `base` had a custom one.
    pub fn resolve(&self, base: DataPaths) -> DataPaths {
        let mut out = base;
        if let Some(data_dir) = &self.data_dir {
            if out.vgg_dir == out.data_dir.join("vgg") {
                out.vgg_dir = data_dir.join("vgg");
            }
            out.data_dir = data_dir.clone();
        }
        if let Some(vgg_dir) = &self.vgg_dir {
            out.vgg_dir = vgg_dir.clone();
        }
        if let Some(runs_dir) = &self.runs_dir {
            out.runs_dir = runs_dir.clone();
        }
        if let Some(checkpoint_dir) = &self.checkpoint_dir {
            out.checkpoint_dir = checkpoint_dir.clone();
        }
        out
    }
}
