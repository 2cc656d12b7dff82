//! VGG16 feature extractor used as the FCN encoder.
//!
//! Shapes:
//! - Input images: `[B, 3, H, W]`, H and W multiples of 32
//! - layer3 (pool3): `[B, widths[2], H/8, W/8]`
//! - layer4 (pool4): `[B, widths[3], H/16, W/16]`
//! - layer7 (fc7 after dropout): `[B, fc_width, H/32, W/32]`

use crate::init::{init_rng, TruncatedNormal};
use crate::plan::FeatureMapSpec;
use burn::module::{Module, Param};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::PaddingConfig2d;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::activation::relu;
use burn::tensor::{backend::Backend, Distribution, Tensor};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Tag naming both the architecture and the persisted weights file.
pub const VGG_TAG: &str = "vgg16";
/// Total downsampling factor between the input and layer7.
pub const BACKBONE_STRIDE: usize = 32;

#[derive(Debug, Error)]
pub enum BackboneError {
    #[error("backbone directory {path} does not exist")]
    MissingDirectory { path: PathBuf },
    #[error("backbone weights {path} not found (expected a '{tag}' record)", tag = VGG_TAG)]
    MissingWeights { path: PathBuf },
    #[error("failed to restore backbone from {path}: {msg}")]
    Record { path: PathBuf, msg: String },
    #[error("image shape {height}x{width} is not a non-zero multiple of {stride}", stride = BACKBONE_STRIDE)]
    InputShape { height: usize, width: usize },
    #[error("fc6 kernel {kernel} must be odd for same padding")]
    Fc6Kernel { kernel: usize },
    #[error("backbone io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Handle for the input image batch (NHWC, batch size left open).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSpec {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl InputSpec {
    pub fn rgb(height: usize, width: usize) -> Self {
        Self {
            height,
            width,
            channels: 3,
        }
    }
}

/// Handle for the keep-probability input; lists the layers it drives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropoutSpec {
    pub layers: Vec<String>,
}

/// Probability of keeping a unit in the backbone dropout layers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeepProb(f64);

impl KeepProb {
    /// Dropout disabled.
    pub const ONE: KeepProb = KeepProb(1.0);

    /// Clamped into `(0, 1]`.
    pub fn new(value: f64) -> Self {
        if value.is_nan() || value >= 1.0 {
            Self(1.0)
        } else {
            Self(value.max(f64::EPSILON))
        }
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

/// The five handles the rest of the system may use to reach the backbone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackboneHandles {
    pub image_input: InputSpec,
    pub keep_prob: DropoutSpec,
    pub layer3: FeatureMapSpec,
    pub layer4: FeatureMapSpec,
    pub layer7: FeatureMapSpec,
}

/// Feature maps produced by one backbone forward pass.
#[derive(Debug, Clone)]
pub struct BackboneFeatures<B: Backend> {
    pub layer3: Tensor<B, 4>,
    pub layer4: Tensor<B, 4>,
    pub layer7: Tensor<B, 4>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vgg16Config {
    pub block_widths: [usize; 5],
    pub convs_per_block: [usize; 5],
    pub fc_width: usize,
    /// Kernel of the fc6 convolution; must be odd.
    pub fc6_kernel: usize,
}

impl Default for Vgg16Config {
    fn default() -> Self {
        Self {
            block_widths: [64, 128, 256, 512, 512],
            convs_per_block: [2, 2, 3, 3, 3],
            fc_width: 4096,
            fc6_kernel: 7,
        }
    }
}

impl Vgg16Config {
    /// Same topology with a handful of channels per layer.
    pub fn compact() -> Self {
        Self {
            block_widths: [4, 8, 8, 8, 8],
            convs_per_block: [1, 1, 1, 1, 1],
            fc_width: 16,
            fc6_kernel: 3,
        }
    }

    pub fn validate(&self) -> Result<(), BackboneError> {
        if self.fc6_kernel % 2 == 0 {
            return Err(BackboneError::Fc6Kernel {
                kernel: self.fc6_kernel,
            });
        }
        Ok(())
    }

    /// Describe the feature maps for `image`; fails for configs [`init`](Self::init)
    /// cannot build or images the backbone cannot downsample evenly.
    pub fn handles(&self, image: InputSpec) -> Result<BackboneHandles, BackboneError> {
        self.validate()?;
        let (h, w) = (image.height, image.width);
        if h == 0 || w == 0 || h % BACKBONE_STRIDE != 0 || w % BACKBONE_STRIDE != 0 {
            return Err(BackboneError::InputShape {
                height: h,
                width: w,
            });
        }
        Ok(BackboneHandles {
            image_input: image,
            keep_prob: DropoutSpec {
                layers: vec!["fc6".to_string(), "fc7".to_string()],
            },
            layer3: FeatureMapSpec::new(h / 8, w / 8, self.block_widths[2]),
            layer4: FeatureMapSpec::new(h / 16, w / 16, self.block_widths[3]),
            layer7: FeatureMapSpec::new(h / 32, w / 32, self.fc_width),
        })
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Vgg16Backbone<B> {
        let w = self.block_widths;
        let n = self.convs_per_block;
        let fc6 = Conv2dConfig::new([w[4], self.fc_width], [self.fc6_kernel, self.fc6_kernel])
            .with_padding(PaddingConfig2d::Same)
            .init(device);
        let fc7 = Conv2dConfig::new([self.fc_width, self.fc_width], [1, 1])
            .with_padding(PaddingConfig2d::Valid)
            .init(device);
        Vgg16Backbone {
            block1: ConvBlock::new(3, w[0], n[0], device),
            block2: ConvBlock::new(w[0], w[1], n[1], device),
            block3: ConvBlock::new(w[1], w[2], n[2], device),
            block4: ConvBlock::new(w[2], w[3], n[3], device),
            block5: ConvBlock::new(w[3], w[4], n[4], device),
            fc6,
            fc7,
        }
    }

    /// Like [`init`](Self::init), but with He-normal conv weights drawn from a
    /// seedable RNG and zero biases. Used when no pretrained weights exist.
    pub fn init_seeded<B: Backend>(&self, seed: Option<u64>, device: &B::Device) -> Vgg16Backbone<B> {
        let mut backbone = self.init::<B>(device);
        let mut rng = init_rng(seed);
        for block in [
            &mut backbone.block1,
            &mut backbone.block2,
            &mut backbone.block3,
            &mut backbone.block4,
            &mut backbone.block5,
        ] {
            for conv in block.convs.iter_mut() {
                he_reset(conv, &mut rng, device);
            }
        }
        he_reset(&mut backbone.fc6, &mut rng, device);
        he_reset(&mut backbone.fc7, &mut rng, device);
        backbone
    }
}

fn he_reset<B: Backend>(conv: &mut Conv2d<B>, rng: &mut StdRng, device: &B::Device) {
    let [out, inp, kh, kw] = conv.weight.dims();
    let std = (2.0 / (inp * kh * kw) as f64).sqrt();
    conv.weight = TruncatedNormal::new(0.0, std).param([out, inp, kh, kw], rng, device);
    if let Some(bias) = conv.bias.as_mut() {
        *bias = Param::from_tensor(Tensor::zeros([out], device));
    }
}

/// 3x3 convolutions with relu followed by a 2x2 max-pool.
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    convs: Vec<Conv2d<B>>,
    pool: MaxPool2d,
}

impl<B: Backend> ConvBlock<B> {
    fn new(channels_in: usize, channels_out: usize, depth: usize, device: &B::Device) -> Self {
        let mut convs = Vec::with_capacity(depth.max(1));
        let mut c_in = channels_in;
        for _ in 0..depth.max(1) {
            convs.push(
                Conv2dConfig::new([c_in, channels_out], [3, 3])
                    .with_padding(PaddingConfig2d::Same)
                    .init(device),
            );
            c_in = channels_out;
        }
        let pool = MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init();
        Self { convs, pool }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = input;
        for conv in &self.convs {
            x = relu(conv.forward(x));
        }
        self.pool.forward(x)
    }
}

#[derive(Module, Debug)]
pub struct Vgg16Backbone<B: Backend> {
    block1: ConvBlock<B>,
    block2: ConvBlock<B>,
    block3: ConvBlock<B>,
    block4: ConvBlock<B>,
    block5: ConvBlock<B>,
    fc6: Conv2d<B>,
    fc7: Conv2d<B>,
}

impl<B: Backend> Vgg16Backbone<B> {
    pub fn forward(&self, images: Tensor<B, 4>, keep: KeepProb) -> BackboneFeatures<B> {
        let x = self.block1.forward(images);
        let x = self.block2.forward(x);
        let layer3 = self.block3.forward(x);
        let layer4 = self.block4.forward(layer3.clone());
        let x = self.block5.forward(layer4.clone());
        let x = dropout(relu(self.fc6.forward(x)), keep);
        let layer7 = dropout(relu(self.fc7.forward(x)), keep);
        BackboneFeatures {
            layer3,
            layer4,
            layer7,
        }
    }
}

/// Inverted dropout; only active while gradients are tracked.
fn dropout<B: Backend>(x: Tensor<B, 4>, keep: KeepProb) -> Tensor<B, 4> {
    if !B::ad_enabled() || keep.value() >= 1.0 {
        return x;
    }
    let mask = x.random_like(Distribution::Bernoulli(keep.value()));
    (x * mask).div_scalar(keep.value())
}

pub fn weights_path(vgg_dir: &Path) -> PathBuf {
    vgg_dir.join(format!("{VGG_TAG}.bin"))
}

/// Restore the pretrained backbone from `vgg_dir` and describe its handles.
pub fn load_vgg<B: Backend>(
    vgg_dir: &Path,
    config: &Vgg16Config,
    image: InputSpec,
    device: &B::Device,
) -> Result<(Vgg16Backbone<B>, BackboneHandles), BackboneError> {
    if !vgg_dir.is_dir() {
        return Err(BackboneError::MissingDirectory {
            path: vgg_dir.to_path_buf(),
        });
    }
    let path = weights_path(vgg_dir);
    if !path.is_file() {
        return Err(BackboneError::MissingWeights { path });
    }
    let handles = config.handles(image)?;
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    let backbone = config
        .init::<B>(device)
        .load_file(path.as_path(), &recorder, device)
        .map_err(|e| BackboneError::Record {
            path: path.clone(),
            msg: e.to_string(),
        })?;
    tracing::info!(
        path = %path.display(),
        params = backbone.num_params(),
        "restored {VGG_TAG} backbone"
    );
    Ok((backbone, handles))
}

/// Persist backbone weights under `vgg_dir` in the layout [`load_vgg`] reads.
pub fn save_vgg<B: Backend>(
    backbone: Vgg16Backbone<B>,
    vgg_dir: &Path,
) -> Result<PathBuf, BackboneError> {
    std::fs::create_dir_all(vgg_dir).map_err(|source| BackboneError::Io {
        path: vgg_dir.to_path_buf(),
        source,
    })?;
    let path = weights_path(vgg_dir);
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    backbone
        .save_file(path.as_path(), &recorder)
        .map_err(|e| BackboneError::Record {
            path: path.clone(),
            msg: e.to_string(),
        })?;
    Ok(path)
}
