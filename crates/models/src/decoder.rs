//! Execute phase of the decoder: Burn modules instantiated from a [`DecoderPlan`].
//!
//! Shapes:
//! - Inputs: the three backbone maps, channels-first
//! - Output: class scores `[B, num_classes, H, W]` at input resolution (unnormalized)

use crate::backbone::{BackboneFeatures, BackboneHandles};
use crate::init::{init_rng, TruncatedNormal};
use crate::plan::{
    plan_decoder, DecoderPlan, LayerKind, LayerSpec, PlanError, L2_WEIGHT_DECAY, SCORE_LAYER3,
    SCORE_LAYER4, SCORE_LAYER7, UPSAMPLE_LAYER4, UPSAMPLE_LAYER7, UPSAMPLE_OUTPUT,
};
use crate::regularization::{l2_loss, RegularizationLosses};
use burn::module::{Ignored, Module};
use burn::nn::conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig};
use burn::nn::{Initializer, PaddingConfig2d};
use burn::tensor::{backend::Backend, Tensor};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

/// How decoder weights are drawn.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecoderInit {
    pub initializer: TruncatedNormal,
    pub weight_decay: f64,
    /// Pin to make weights reproducible.
    pub seed: Option<u64>,
}

impl Default for DecoderInit {
    fn default() -> Self {
        Self {
            initializer: TruncatedNormal::default(),
            weight_decay: L2_WEIGHT_DECAY,
            seed: None,
        }
    }
}

impl DecoderInit {
    pub fn seeded(seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..Self::default()
        }
    }
}

/// Layers carrying a weight tensor, and therefore a weight-decay term.
const WEIGHTED_LAYERS: [&str; 6] = [
    SCORE_LAYER7,
    UPSAMPLE_LAYER7,
    SCORE_LAYER4,
    UPSAMPLE_LAYER4,
    SCORE_LAYER3,
    UPSAMPLE_OUTPUT,
];

#[derive(Module, Debug)]
pub struct FcnDecoder<B: Backend> {
    score_layer7: Conv2d<B>,
    upsample_layer7: ConvTranspose2d<B>,
    score_layer4: Conv2d<B>,
    upsample_layer4: ConvTranspose2d<B>,
    score_layer3: Conv2d<B>,
    upsample_output: ConvTranspose2d<B>,
    plan: Ignored<DecoderPlan>,
}

impl<B: Backend> FcnDecoder<B> {
    /// Allocate parameters for every weighted layer of `plan`, in plan order.
    pub fn from_plan(
        plan: &DecoderPlan,
        init: &DecoderInit,
        device: &B::Device,
    ) -> Result<Self, PlanError> {
        if let Some(decay) = plan
            .regularization
            .iter()
            .find(|decay| !WEIGHTED_LAYERS.contains(&decay.layer.as_str()))
        {
            return Err(PlanError::MissingLayer(decay.layer.clone()));
        }
        let mut rng = init_rng(init.seed);
        let classes = plan.num_classes;
        let spec = |name: &str| {
            plan.layer(name)
                .ok_or_else(|| PlanError::MissingLayer(name.to_string()))
        };

        // Draw in plan order so a pinned seed maps to the same weights per layer.
        let score_layer7 = score_conv(spec(SCORE_LAYER7)?, classes, init, &mut rng, device);
        let upsample_layer7 = upsample_conv(spec(UPSAMPLE_LAYER7)?, classes, init, &mut rng, device)?;
        let score_layer4 = score_conv(spec(SCORE_LAYER4)?, classes, init, &mut rng, device);
        let upsample_layer4 = upsample_conv(spec(UPSAMPLE_LAYER4)?, classes, init, &mut rng, device)?;
        let score_layer3 = score_conv(spec(SCORE_LAYER3)?, classes, init, &mut rng, device);
        let upsample_output = upsample_conv(spec(UPSAMPLE_OUTPUT)?, classes, init, &mut rng, device)?;

        Ok(Self {
            score_layer7,
            upsample_layer7,
            score_layer4,
            upsample_layer4,
            score_layer3,
            upsample_output,
            plan: Ignored(plan.clone()),
        })
    }

    pub fn plan(&self) -> &DecoderPlan {
        &self.plan.0
    }

    pub fn num_classes(&self) -> usize {
        self.plan.0.num_classes
    }

    pub fn forward(&self, features: BackboneFeatures<B>) -> Tensor<B, 4> {
        let x = self.score_layer7.forward(features.layer7);
        let x = self.upsample_layer7.forward(x);
        let x = x + self.score_layer4.forward(features.layer4);

        let x = self.upsample_layer4.forward(x);
        let x = x + self.score_layer3.forward(features.layer3);

        self.upsample_output.forward(x)
    }

    /// One L2 penalty per regularized layer, in the order the plan lists them.
    pub fn regularization_losses(&self) -> RegularizationLosses<B> {
        let mut losses = RegularizationLosses::new();
        for decay in &self.plan.0.regularization {
            let term = match decay.layer.as_str() {
                SCORE_LAYER7 => l2_loss(self.score_layer7.weight.val(), decay.factor),
                UPSAMPLE_LAYER7 => l2_loss(self.upsample_layer7.weight.val(), decay.factor),
                SCORE_LAYER4 => l2_loss(self.score_layer4.weight.val(), decay.factor),
                UPSAMPLE_LAYER4 => l2_loss(self.upsample_layer4.weight.val(), decay.factor),
                SCORE_LAYER3 => l2_loss(self.score_layer3.weight.val(), decay.factor),
                UPSAMPLE_OUTPUT => l2_loss(self.upsample_output.weight.val(), decay.factor),
                // Unknown names are rejected by `from_plan`.
                _ => continue,
            };
            losses.push(term);
        }
        losses
    }
}

fn score_conv<B: Backend>(
    layer: &LayerSpec,
    classes: usize,
    init: &DecoderInit,
    rng: &mut StdRng,
    device: &B::Device,
) -> Conv2d<B> {
    let channels_in = layer.input.channels;
    let mut conv = Conv2dConfig::new([channels_in, classes], [1, 1])
        .with_padding(PaddingConfig2d::Valid)
        .with_initializer(Initializer::Zeros)
        .init(device);
    conv.weight = init
        .initializer
        .param([classes, channels_in, 1, 1], rng, device);
    conv
}

fn upsample_conv<B: Backend>(
    layer: &LayerSpec,
    classes: usize,
    init: &DecoderInit,
    rng: &mut StdRng,
    device: &B::Device,
) -> Result<ConvTranspose2d<B>, PlanError> {
    let LayerKind::Upsample { kernel, stride } = layer.kind else {
        return Err(PlanError::MissingLayer(layer.name.clone()));
    };
    let channels_in = layer.input.channels;
    // output = (in - 1) * stride - 2 * pad + kernel, i.e. in * stride for pad = (kernel - stride) / 2
    let pad = (kernel - stride) / 2;
    let mut conv = ConvTranspose2dConfig::new([channels_in, classes], [kernel, kernel])
        .with_stride([stride, stride])
        .with_padding([pad, pad])
        .with_initializer(Initializer::Zeros)
        .init(device);
    conv.weight = init
        .initializer
        .param([channels_in, classes, kernel, kernel], rng, device);
    Ok(conv)
}

/// Plan the decoder over the backbone handles and instantiate it.
pub fn build_decoder<B: Backend>(
    handles: &BackboneHandles,
    num_classes: usize,
    init: &DecoderInit,
    device: &B::Device,
) -> Result<(FcnDecoder<B>, DecoderPlan), PlanError> {
    let plan = plan_decoder(
        &handles.layer3,
        &handles.layer4,
        &handles.layer7,
        num_classes,
        init.weight_decay,
    )?;
    let decoder = FcnDecoder::from_plan(&plan, init, device)?;
    tracing::debug!(
        layers = plan.layers.len(),
        regularized = plan.regularization.len(),
        params = decoder.num_params(),
        "built FCN decoder"
    );
    Ok((decoder, plan))
}
