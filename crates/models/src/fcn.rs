//! FCN-8: VGG16 encoder plus the skip-connected decoder.

use crate::backbone::{BackboneError, BackboneHandles, KeepProb, Vgg16Backbone, Vgg16Config};
use crate::decoder::{build_decoder, DecoderInit, FcnDecoder};
use crate::plan::{DecoderPlan, PlanError};
use crate::regularization::RegularizationLosses;
use burn::module::Module;
use burn::tensor::{backend::Backend, Tensor};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What the training loop and the sample exporter need from a network.
pub trait SegmentationModel<B: Backend> {
    /// Unnormalized class scores `[B, C, H, W]` for images `[B, 3, H, W]`.
    fn forward_scores(&self, images: Tensor<B, 4>, keep: KeepProb) -> Tensor<B, 4>;

    fn regularization_losses(&self) -> RegularizationLosses<B>;

    fn num_classes(&self) -> usize;
}

/// Pure-data description of an assembled network; exported next to checkpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FcnGraph {
    pub backbone: Vgg16Config,
    pub handles: BackboneHandles,
    pub decoder: DecoderPlan,
}

/// A graph definition that cannot be rebuilt.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error(transparent)]
    Backbone(#[from] BackboneError),
    #[error(transparent)]
    Plan(#[from] PlanError),
}

#[derive(Module, Debug)]
pub struct Fcn8<B: Backend> {
    backbone: Vgg16Backbone<B>,
    decoder: FcnDecoder<B>,
}

impl<B: Backend> Fcn8<B> {
    /// Attach a freshly planned decoder to a restored backbone.
    pub fn assemble(
        backbone: Vgg16Backbone<B>,
        backbone_config: &Vgg16Config,
        handles: BackboneHandles,
        num_classes: usize,
        init: &DecoderInit,
        device: &B::Device,
    ) -> Result<(Self, FcnGraph), PlanError> {
        let (decoder, plan) = build_decoder(&handles, num_classes, init, device)?;
        let graph = FcnGraph {
            backbone: backbone_config.clone(),
            handles,
            decoder: plan,
        };
        Ok((Self { backbone, decoder }, graph))
    }

    /// Skeleton with the architecture of `graph`, ready for `load_file`.
    pub fn from_graph(graph: &FcnGraph, device: &B::Device) -> Result<Self, GraphError> {
        graph.backbone.handles(graph.handles.image_input)?;
        let backbone = graph.backbone.init(device);
        let decoder = FcnDecoder::from_plan(&graph.decoder, &DecoderInit::default(), device)?;
        Ok(Self { backbone, decoder })
    }

    pub fn forward(&self, images: Tensor<B, 4>, keep: KeepProb) -> Tensor<B, 4> {
        let features = self.backbone.forward(images, keep);
        self.decoder.forward(features)
    }

    pub fn backbone(&self) -> &Vgg16Backbone<B> {
        &self.backbone
    }

    pub fn decoder(&self) -> &FcnDecoder<B> {
        &self.decoder
    }
}

impl<B: Backend> SegmentationModel<B> for Fcn8<B> {
    fn forward_scores(&self, images: Tensor<B, 4>, keep: KeepProb) -> Tensor<B, 4> {
        self.forward(images, keep)
    }

    fn regularization_losses(&self) -> RegularizationLosses<B> {
        self.decoder.regularization_losses()
    }

    fn num_classes(&self) -> usize {
        self.decoder.num_classes()
    }
}
