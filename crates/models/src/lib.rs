//! Burn models for road segmentation.
//!
//! This crate defines the FCN-8 network used by the trainer:
//! - `Vgg16Backbone`: pretrained encoder exposing layer3/layer4/layer7 feature maps.
//! - `DecoderPlan`: pure-data plan of the skip-connected upsampling head.
//! - `FcnDecoder`: the executable head instantiated from a plan.
//! - `Fcn8`: backbone and decoder wired together.
//!
//! Building a network is split into a plan (shapes, layer list, regularization
//! entries) and the Burn modules created from it, so the structure can be
//! checked without allocating parameters.

pub mod backbone;
pub mod decoder;
pub mod fcn;
pub mod init;
pub mod plan;
pub mod regularization;

pub use backbone::{
    load_vgg, save_vgg, BackboneError, BackboneFeatures, BackboneHandles, InputSpec, KeepProb,
    Vgg16Backbone, Vgg16Config, VGG_TAG,
};
pub use decoder::{build_decoder, DecoderInit, FcnDecoder};
pub use fcn::{Fcn8, FcnGraph, GraphError, SegmentationModel};
pub use init::TruncatedNormal;
pub use plan::{plan_decoder, DecoderPlan, FeatureMapSpec, LayerKind, LayerSpec, PlanError};
pub use regularization::{l2_loss, RegularizationLosses, WeightDecay};

pub mod prelude {
    pub use super::{
        BackboneHandles, DecoderInit, DecoderPlan, Fcn8, FcnDecoder, FcnGraph, KeepProb,
        SegmentationModel, Vgg16Backbone, Vgg16Config,
    };
}
