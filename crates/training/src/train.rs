//! Epoch/minibatch training loop.

use crate::error::TrainError;
use crate::objective::{optimize, scalar_value, AdamUpdate};
use burn::module::AutodiffModule;
use burn::optim::Optimizer;
use burn::tensor::backend::AutodiffBackend;
use burn_dataset::{BatchSource, Minibatch};
use models::{KeepProb, SegmentationModel};

/// Keep probability fed to the backbone dropout while training.
pub const TRAIN_KEEP_PROB: f64 = 0.65;
pub const TRAIN_LEARNING_RATE: f64 = 1e-4;

/// Per-step values fed alongside every minibatch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepFeed {
    pub keep_prob: f64,
    pub learning_rate: f64,
}

impl Default for StepFeed {
    fn default() -> Self {
        Self {
            keep_prob: TRAIN_KEEP_PROB,
            learning_rate: TRAIN_LEARNING_RATE,
        }
    }
}

pub trait UpdateStep {
    /// Apply one parameter update for `batch`, returning the loss measured
    /// with the parameters as they were before the update.
    fn step(&mut self, batch: &Minibatch, feed: &StepFeed) -> Result<f32, TrainError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReport {
    pub epoch: usize,
    pub batch: usize,
    pub loss: f32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainSummary {
    pub steps: usize,
    /// Mean reported loss per epoch.
    pub epoch_losses: Vec<f32>,
}

/// Run `epochs` full passes over `batches`, one update per minibatch.
///
/// There is no early stopping or validation; any failing step aborts the run.
pub fn train_nn<S, D, F>(
    epochs: usize,
    batch_size: usize,
    batches: &mut D,
    step: &mut S,
    feed: StepFeed,
    mut on_step: F,
) -> Result<TrainSummary, TrainError>
where
    S: UpdateStep + ?Sized,
    D: BatchSource + ?Sized,
    F: FnMut(&StepReport),
{
    let batch_size = batch_size.max(1);
    let mut summary = TrainSummary::default();
    for epoch in 0..epochs {
        batches.start_epoch()?;
        let mut losses = Vec::with_capacity(batches.batches_per_epoch(batch_size));
        while let Some(batch) = batches.next_batch(batch_size)? {
            let loss = step.step(&batch, &feed)?;
            tracing::info!("Epoch {epoch} loss: {loss}");
            on_step(&StepReport {
                epoch,
                batch: losses.len(),
                loss,
            });
            losses.push(loss);
            summary.steps += 1;
        }
        let avg_loss = if losses.is_empty() {
            0.0
        } else {
            losses.iter().sum::<f32>() / losses.len() as f32
        };
        tracing::info!(steps = losses.len(), "epoch {epoch}: avg loss {avg_loss:.4}");
        summary.epoch_losses.push(avg_loss);
    }
    Ok(summary)
}

/// Owns the model and its optimizer state for the whole run.
pub struct SegmentationTrainer<B: AutodiffBackend, M, O> {
    model: M,
    update: AdamUpdate<M, B, O>,
    num_classes: usize,
    device: B::Device,
}

impl<B, M, O> SegmentationTrainer<B, M, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + SegmentationModel<B>,
    O: Optimizer<M, B>,
{
    pub fn new(model: M, update: AdamUpdate<M, B, O>, device: B::Device) -> Self {
        let num_classes = model.num_classes();
        Self {
            model,
            update,
            num_classes,
            device,
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn steps(&self) -> usize {
        self.update.steps()
    }

    pub fn into_model(self) -> M {
        self.model
    }
}

impl<B, M, O> UpdateStep for SegmentationTrainer<B, M, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + SegmentationModel<B>,
    O: Optimizer<M, B>,
{
    fn step(&mut self, batch: &Minibatch, feed: &StepFeed) -> Result<f32, TrainError> {
        let batch = batch.to_burn::<B>(&self.device);
        let scores = self
            .model
            .forward_scores(batch.images, KeepProb::new(feed.keep_prob));
        let terms = optimize(
            scores,
            batch.labels,
            self.model.regularization_losses(),
            self.num_classes,
        )?;
        let loss = scalar_value(terms.cross_entropy_loss.detach());

        self.update.set_learning_rate(feed.learning_rate);
        self.model = self.update.minimize(self.model.clone(), terms.objective);
        Ok(loss)
    }
}
