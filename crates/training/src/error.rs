use burn_dataset::BurnDatasetError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrainError {
    #[error("score map {scores:?} and label map {labels:?} differ (expected trailing dim {num_classes})")]
    ShapeMismatch {
        scores: [usize; 4],
        labels: [usize; 4],
        num_classes: usize,
    },
    #[error(transparent)]
    Dataset(#[from] BurnDatasetError),
}
