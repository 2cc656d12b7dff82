//! Build phase of the decoder: a pure-data description of the FCN-8 head.
//!
//! The plan names every layer, records the shape it produces and lists the
//! weight-decay terms the executable decoder will contribute. Nothing here
//! touches a backend, so plans can be compared, serialized and checked in
//! isolation before any parameter is allocated.

use crate::regularization::WeightDecay;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

pub const LAYER3: &str = "layer3";
pub const LAYER4: &str = "layer4";
pub const LAYER7: &str = "layer7";

pub const SCORE_LAYER7: &str = "score_layer7";
pub const UPSAMPLE_LAYER7: &str = "upsample_layer7";
pub const SCORE_LAYER4: &str = "score_layer4";
pub const SKIP_LAYER4: &str = "skip_layer4";
pub const UPSAMPLE_LAYER4: &str = "upsample_layer4";
pub const SCORE_LAYER3: &str = "score_layer3";
pub const SKIP_LAYER3: &str = "skip_layer3";
pub const UPSAMPLE_OUTPUT: &str = "upsample_output";

/// Weight-decay factor applied to every decoder convolution.
pub const L2_WEIGHT_DECAY: f64 = 1e-3;

/// Shape of one feature map, batch dimension excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeatureMapSpec {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl FeatureMapSpec {
    pub fn new(height: usize, width: usize, channels: usize) -> Self {
        Self {
            height,
            width,
            channels,
        }
    }

    pub fn resolution(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    fn with_channels(&self, channels: usize) -> Self {
        Self { channels, ..*self }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum LayerKind {
    /// 1x1 convolution reprojecting channels to the class count.
    Score,
    /// Learned transposed-convolution upsampling with "same" padding.
    Upsample { kernel: usize, stride: usize },
    /// Element-wise sum of a coarse and a fine map.
    Skip,
}

impl LayerKind {
    pub fn label(&self) -> &'static str {
        match self {
            LayerKind::Score => "score",
            LayerKind::Upsample { .. } => "upsample",
            LayerKind::Skip => "skip",
        }
    }

    pub fn has_weights(&self) -> bool {
        !matches!(self, LayerKind::Skip)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSpec {
    pub name: String,
    pub kind: LayerKind,
    pub inputs: Vec<String>,
    /// Shape of the first input.
    pub input: FeatureMapSpec,
    pub output: FeatureMapSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecoderPlan {
    pub num_classes: usize,
    pub layers: Vec<LayerSpec>,
    pub output: FeatureMapSpec,
    pub regularization: Vec<WeightDecay>,
}

impl DecoderPlan {
    pub fn layer(&self, name: &str) -> Option<&LayerSpec> {
        self.layers.iter().find(|l| l.name == name)
    }

    /// Operation count per kind, used to compare plan structure.
    pub fn op_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for layer in &self.layers {
            *counts.entry(layer.kind.label()).or_insert(0) += 1;
        }
        counts
    }

    pub fn weighted_layers(&self) -> usize {
        self.layers.iter().filter(|l| l.kind.has_weights()).count()
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum PlanError {
    #[error("num_classes must be at least 1")]
    NoClasses,
    #[error("feature map {name} has an empty extent: {spec:?}")]
    EmptyFeatureMap { name: String, spec: FeatureMapSpec },
    #[error("{layer}: kernel {kernel} with stride {stride} cannot keep 'same' output size")]
    UpsampleGeometry {
        layer: String,
        kernel: usize,
        stride: usize,
    },
    #[error("{layer}: upsampled map is {upsampled:?} but {skip_from} is {skip:?}")]
    SkipMismatch {
        layer: String,
        skip_from: String,
        upsampled: (usize, usize),
        skip: (usize, usize),
    },
    #[error("decoder plan has no layer named {0}")]
    MissingLayer(String),
}

struct PlanBuilder {
    num_classes: usize,
    weight_decay: f64,
    layers: Vec<LayerSpec>,
    regularization: Vec<WeightDecay>,
}

impl PlanBuilder {
    fn push(&mut self, layer: LayerSpec) -> FeatureMapSpec {
        if layer.kind.has_weights() {
            self.regularization.push(WeightDecay {
                layer: layer.name.clone(),
                factor: self.weight_decay,
            });
        }
        let out = layer.output;
        self.layers.push(layer);
        out
    }

    fn score(&mut self, name: &str, input: &str, spec: FeatureMapSpec) -> FeatureMapSpec {
        self.push(LayerSpec {
            name: name.to_string(),
            kind: LayerKind::Score,
            inputs: vec![input.to_string()],
            input: spec,
            output: spec.with_channels(self.num_classes),
        })
    }

    fn upsample(
        &mut self,
        name: &str,
        input: &str,
        spec: FeatureMapSpec,
        kernel: usize,
        stride: usize,
    ) -> Result<FeatureMapSpec, PlanError> {
        if stride == 0 || kernel < stride || (kernel - stride) % 2 != 0 {
            return Err(PlanError::UpsampleGeometry {
                layer: name.to_string(),
                kernel,
                stride,
            });
        }
        Ok(self.push(LayerSpec {
            name: name.to_string(),
            kind: LayerKind::Upsample { kernel, stride },
            inputs: vec![input.to_string()],
            input: spec,
            output: FeatureMapSpec::new(
                spec.height * stride,
                spec.width * stride,
                self.num_classes,
            ),
        }))
    }

    fn skip(
        &mut self,
        name: &str,
        coarse: (&str, FeatureMapSpec),
        fine: (&str, FeatureMapSpec),
    ) -> Result<FeatureMapSpec, PlanError> {
        if coarse.1 != fine.1 {
            return Err(PlanError::SkipMismatch {
                layer: name.to_string(),
                skip_from: fine.0.to_string(),
                upsampled: coarse.1.resolution(),
                skip: fine.1.resolution(),
            });
        }
        Ok(self.push(LayerSpec {
            name: name.to_string(),
            kind: LayerKind::Skip,
            inputs: vec![coarse.0.to_string(), fine.0.to_string()],
            input: coarse.1,
            output: coarse.1,
        }))
    }
}

/// Plan the FCN-8 decoder over the three backbone feature maps.
///
/// layer7 is scored and upsampled 2x, fused with scored layer4, upsampled 2x
/// again, fused with scored layer3 and finally upsampled 8x back to the input
/// resolution.
pub fn plan_decoder(
    layer3: &FeatureMapSpec,
    layer4: &FeatureMapSpec,
    layer7: &FeatureMapSpec,
    num_classes: usize,
    weight_decay: f64,
) -> Result<DecoderPlan, PlanError> {
    if num_classes == 0 {
        return Err(PlanError::NoClasses);
    }
    for (name, spec) in [(LAYER3, layer3), (LAYER4, layer4), (LAYER7, layer7)] {
        if spec.height == 0 || spec.width == 0 || spec.channels == 0 {
            return Err(PlanError::EmptyFeatureMap {
                name: name.to_string(),
                spec: *spec,
            });
        }
    }

    let mut b = PlanBuilder {
        num_classes,
        weight_decay,
        layers: Vec::with_capacity(8),
        regularization: Vec::with_capacity(6),
    };

    let x = b.score(SCORE_LAYER7, LAYER7, *layer7);
    let x = b.upsample(UPSAMPLE_LAYER7, SCORE_LAYER7, x, 4, 2)?;
    let s4 = b.score(SCORE_LAYER4, LAYER4, *layer4);
    let x = b.skip(SKIP_LAYER4, (UPSAMPLE_LAYER7, x), (SCORE_LAYER4, s4))?;

    let x = b.upsample(UPSAMPLE_LAYER4, SKIP_LAYER4, x, 4, 2)?;
    let s3 = b.score(SCORE_LAYER3, LAYER3, *layer3);
    let x = b.skip(SKIP_LAYER3, (UPSAMPLE_LAYER4, x), (SCORE_LAYER3, s3))?;

    let output = b.upsample(UPSAMPLE_OUTPUT, SKIP_LAYER3, x, 16, 8)?;

    Ok(DecoderPlan {
        num_classes,
        layers: b.layers,
        output,
        regularization: b.regularization,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vgg_maps(h: usize, w: usize) -> (FeatureMapSpec, FeatureMapSpec, FeatureMapSpec) {
        (
            FeatureMapSpec::new(h / 8, w / 8, 256),
            FeatureMapSpec::new(h / 16, w / 16, 512),
            FeatureMapSpec::new(h / 32, w / 32, 4096),
        )
    }

    #[test]
    fn output_matches_input_resolution() {
        let (l3, l4, l7) = vgg_maps(160, 576);
        let plan = plan_decoder(&l3, &l4, &l7, 2, L2_WEIGHT_DECAY).unwrap();
        assert_eq!(plan.output, FeatureMapSpec::new(160, 576, 2));
        assert_eq!(plan.layers.len(), 8);
        assert_eq!(plan.regularization.len(), 6);
        assert!(plan
            .regularization
            .iter()
            .all(|w| (w.factor - 1e-3).abs() < f64::EPSILON));
    }

    #[test]
    fn mismatched_skip_is_rejected() {
        let (l3, _, l7) = vgg_maps(160, 576);
        let l4 = FeatureMapSpec::new(11, 36, 512);
        let err = plan_decoder(&l3, &l4, &l7, 2, L2_WEIGHT_DECAY).unwrap_err();
        assert!(matches!(err, PlanError::SkipMismatch { ref layer, .. } if layer == SKIP_LAYER4));
    }

    #[test]
    fn zero_classes_is_rejected() {
        let (l3, l4, l7) = vgg_maps(64, 64);
        assert_eq!(
            plan_decoder(&l3, &l4, &l7, 0, L2_WEIGHT_DECAY).unwrap_err(),
            PlanError::NoClasses
        );
    }
}
