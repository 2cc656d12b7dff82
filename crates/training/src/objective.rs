//! Training objective and the Adam update operation.
//!
//! The optimized objective is mean pixel-wise softmax cross-entropy plus the
//! decoder's weight-decay penalties. Only the cross-entropy part is reported.

use crate::error::TrainError;
use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::activation::log_softmax;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::Tensor;
use models::RegularizationLosses;
use std::marker::PhantomData;

#[derive(Debug)]
pub struct LossTerms<B: Backend> {
    /// Scores flattened to `(pixels, num_classes)`.
    pub logits: Tensor<B, 2>,
    /// Cross-entropy plus weight decay; what the update minimizes.
    pub objective: Tensor<B, 1>,
    /// Mean pixel cross-entropy alone; what gets reported.
    pub cross_entropy_loss: Tensor<B, 1>,
}

/// Mean over rows of `-sum(labels * log_softmax(logits))`.
pub fn softmax_cross_entropy<B: Backend>(logits: Tensor<B, 2>, labels: Tensor<B, 2>) -> Tensor<B, 1> {
    let log_probs = log_softmax(logits, 1);
    (labels * log_probs).sum_dim(1).mean().neg()
}

/// Build the loss terms for class scores `[B, C, H, W]` against one-hot labels
/// `[B, H, W, C]`.
pub fn optimize<B: Backend>(
    nn_last_layer: Tensor<B, 4>,
    correct_label: Tensor<B, 4>,
    regularization: RegularizationLosses<B>,
    num_classes: usize,
) -> Result<LossTerms<B>, TrainError> {
    let scores = nn_last_layer.permute([0, 2, 3, 1]);
    let dims = scores.dims();
    let label_dims = correct_label.dims();
    if dims != label_dims || dims[3] != num_classes {
        return Err(TrainError::ShapeMismatch {
            scores: dims,
            labels: label_dims,
            num_classes,
        });
    }

    let pixels = dims[0] * dims[1] * dims[2];
    let logits = scores.reshape([pixels, num_classes]);
    let labels = correct_label.reshape([pixels, num_classes]);
    let device = logits.device();

    let cross_entropy_loss = softmax_cross_entropy(logits.clone(), labels);
    let objective = cross_entropy_loss.clone() + regularization.sum(&device);

    Ok(LossTerms {
        logits,
        objective,
        cross_entropy_loss,
    })
}

/// One-step Adam update over every trainable parameter of a model.
pub struct AdamUpdate<M, B, O> {
    optim: O,
    learning_rate: f64,
    steps: usize,
    _marker: PhantomData<fn() -> (M, B)>,
}

/// Adam with β1 = 0.9, β2 = 0.999, ε = 1e-8.
pub fn adam_update<B, M>(learning_rate: f64) -> AdamUpdate<M, B, impl Optimizer<M, B>>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    let optim = AdamConfig::new()
        .with_beta_1(0.9)
        .with_beta_2(0.999)
        .with_epsilon(1e-8)
        .init::<B, M>();
    AdamUpdate {
        optim,
        learning_rate,
        steps: 0,
        _marker: PhantomData,
    }
}

impl<M, B, O> AdamUpdate<M, B, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    /// Backpropagate `objective` and apply one step to `model`.
    pub fn minimize(&mut self, model: M, objective: Tensor<B, 1>) -> M {
        let grads = GradientsParams::from_grads(objective.backward(), &model);
        self.steps += 1;
        self.optim.step(self.learning_rate, model, grads)
    }

    pub fn set_learning_rate(&mut self, learning_rate: f64) {
        self.learning_rate = learning_rate;
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn steps(&self) -> usize {
        self.steps
    }
}

/// First element of a tensor as `f32` (0.0 if it cannot be read back).
pub fn scalar_value<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> f32 {
    tensor
        .into_data()
        .to_vec::<f32>()
        .unwrap_or_default()
        .into_iter()
        .next()
        .unwrap_or(0.0)
}
