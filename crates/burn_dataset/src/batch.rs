//! Minibatch iteration over segmentation samples.

use crate::road::{index_road_samples, load_road_sample, RoadSampleIndex, ROAD_BACKGROUND};
use crate::types::{BurnDatasetError, DatasetResult, ImageShape, Minibatch, SegmentationSample};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use std::path::Path;
use std::time::{Duration, Instant};

/// A finite, restartable sequence of minibatches.
///
/// Callers rewind with [`BatchSource::start_epoch`] and then pull batches until
/// `next_batch` returns `None`; every sample appears exactly once per epoch.
pub trait BatchSource {
    /// Rewind to the first batch, reshuffling if the source is configured to.
    fn start_epoch(&mut self) -> DatasetResult<()>;

    fn next_batch(&mut self, batch_size: usize) -> DatasetResult<Option<Minibatch>>;

    /// Number of samples per epoch.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn batches_per_epoch(&self, batch_size: usize) -> usize {
        self.len().div_ceil(batch_size.max(1))
    }
}

fn shuffle_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_rng(&mut rand::rng()),
    }
}

#[derive(Debug, Clone)]
pub struct RoadDatasetConfig {
    pub image_shape: ImageShape,
    pub background: [u8; 3],
    pub shuffle: bool,
    pub seed: Option<u64>,
}

impl RoadDatasetConfig {
    pub fn new(image_shape: ImageShape) -> Self {
        Self {
            image_shape,
            background: ROAD_BACKGROUND,
            shuffle: true,
            seed: None,
        }
    }
}

/// Loads KITTI road samples from disk one batch at a time.
pub struct RoadBatchIter {
    indices: Vec<RoadSampleIndex>,
    cursor: usize,
    cfg: RoadDatasetConfig,
    rng: StdRng,
    processed_batches: usize,
    processed_samples: usize,
    total_load_time: Duration,
}

impl RoadBatchIter {
    pub fn from_training_dir(training_dir: &Path, cfg: RoadDatasetConfig) -> DatasetResult<Self> {
        let indices = index_road_samples(training_dir)?;
        if indices.is_empty() {
            return Err(BurnDatasetError::EmptyDirectory {
                path: training_dir.join("gt_image_2"),
            });
        }
        Ok(Self::from_indices(indices, cfg))
    }

    pub fn from_indices(indices: Vec<RoadSampleIndex>, cfg: RoadDatasetConfig) -> Self {
        let rng = shuffle_rng(cfg.seed);
        Self {
            indices,
            cursor: 0,
            cfg,
            rng,
            processed_batches: 0,
            processed_samples: 0,
            total_load_time: Duration::ZERO,
        }
    }

    pub fn indices(&self) -> &[RoadSampleIndex] {
        &self.indices
    }
}

impl BatchSource for RoadBatchIter {
    fn start_epoch(&mut self) -> DatasetResult<()> {
        if self.cfg.shuffle {
            self.indices.shuffle(&mut self.rng);
        }
        self.cursor = 0;
        Ok(())
    }

    fn next_batch(&mut self, batch_size: usize) -> DatasetResult<Option<Minibatch>> {
        if self.cursor >= self.indices.len() {
            return Ok(None);
        }
        let end = (self.cursor + batch_size.max(1)).min(self.indices.len());
        let slice = &self.indices[self.cursor..end];
        self.cursor = end;

        let shape = self.cfg.image_shape;
        let background = self.cfg.background;
        let t_load = Instant::now();
        let mut loaded: Vec<_> = slice
            .par_iter()
            .enumerate()
            .map(|(i, idx)| (i, load_road_sample(idx, shape, background)))
            .collect();
        loaded.sort_by_key(|(i, _)| *i);
        let samples = loaded
            .into_iter()
            .map(|(_, res)| res)
            .collect::<DatasetResult<Vec<_>>>()?;
        let load_elapsed = t_load.elapsed();

        let batch = Minibatch::from_samples(&samples)?;
        self.processed_batches += 1;
        self.processed_samples += batch.batch;
        self.total_load_time += load_elapsed;
        tracing::debug!(
            batch = self.processed_batches,
            samples = batch.batch,
            load_ms = load_elapsed.as_secs_f64() * 1000.0,
            avg_load_ms =
                self.total_load_time.as_secs_f64() * 1000.0 / self.processed_batches as f64,
            "[dataset] loaded road batch"
        );
        Ok(Some(batch))
    }

    fn len(&self) -> usize {
        self.indices.len()
    }
}

/// Samples already decoded into memory; used for synthetic data.
pub struct InMemoryBatches {
    samples: Vec<SegmentationSample>,
    order: Vec<usize>,
    cursor: usize,
    rng: Option<StdRng>,
}

impl InMemoryBatches {
    /// Fixed order, identical every epoch.
    pub fn new(samples: Vec<SegmentationSample>) -> Self {
        let order = (0..samples.len()).collect();
        Self {
            samples,
            order,
            cursor: 0,
            rng: None,
        }
    }

    /// Reshuffled at the start of every epoch.
    pub fn shuffled(samples: Vec<SegmentationSample>, seed: Option<u64>) -> Self {
        Self {
            rng: Some(shuffle_rng(seed)),
            ..Self::new(samples)
        }
    }
}

impl BatchSource for InMemoryBatches {
    fn start_epoch(&mut self) -> DatasetResult<()> {
        if let Some(rng) = self.rng.as_mut() {
            self.order.shuffle(rng);
        }
        self.cursor = 0;
        Ok(())
    }

    fn next_batch(&mut self, batch_size: usize) -> DatasetResult<Option<Minibatch>> {
        if self.cursor >= self.order.len() {
            return Ok(None);
        }
        let end = (self.cursor + batch_size.max(1)).min(self.order.len());
        let batch: Vec<SegmentationSample> = self.order[self.cursor..end]
            .iter()
            .map(|&i| self.samples[i].clone())
            .collect();
        self.cursor = end;
        Minibatch::from_samples(&batch).map(Some)
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}
