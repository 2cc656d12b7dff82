//! Explicit L2 weight-decay accumulator.
//!
//! Every regularized layer contributes one [`WeightDecay`] entry to the decoder
//! plan when it is built, and one scalar penalty to [`RegularizationLosses`]
//! when the network is evaluated. The loss builder sums the latter.

use burn::tensor::{backend::Backend, Tensor};
use serde::{Deserialize, Serialize};

/// Build-time record of a layer's weight-decay term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightDecay {
    pub layer: String,
    pub factor: f64,
}

/// Per-layer penalties computed from the current parameter values.
#[derive(Debug, Clone)]
pub struct RegularizationLosses<B: Backend> {
    terms: Vec<Tensor<B, 1>>,
}

impl<B: Backend> Default for RegularizationLosses<B> {
    fn default() -> Self {
        Self { terms: Vec::new() }
    }
}

impl<B: Backend> RegularizationLosses<B> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, term: Tensor<B, 1>) {
        self.terms.push(term);
    }

    pub fn extend(&mut self, other: RegularizationLosses<B>) {
        self.terms.extend(other.terms);
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn terms(&self) -> &[Tensor<B, 1>] {
        &self.terms
    }

    /// Total penalty as a single-element tensor (zero when nothing was collected).
    pub fn sum(self, device: &B::Device) -> Tensor<B, 1> {
        self.terms
            .into_iter()
            .reduce(|acc, term| acc + term)
            .unwrap_or_else(|| Tensor::zeros([1], device))
    }
}

/// `factor * sum(w^2) / 2`.
pub fn l2_loss<B: Backend, const D: usize>(weight: Tensor<B, D>, factor: f64) -> Tensor<B, 1> {
    weight.powf_scalar(2.0).sum().mul_scalar(factor * 0.5)
}
