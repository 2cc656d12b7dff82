//! Weight initialization for the decoder layers.

use burn::module::Param;
use burn::tensor::{backend::Backend, Tensor, TensorData};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::Normal;
use serde::{Deserialize, Serialize};

/// Normal initializer that redraws samples falling more than two standard
/// deviations away from the mean.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TruncatedNormal {
    pub mean: f64,
    pub std: f64,
}

impl Default for TruncatedNormal {
    fn default() -> Self {
        Self {
            mean: 0.0,
            std: 0.01,
        }
    }
}

impl TruncatedNormal {
    pub fn new(mean: f64, std: f64) -> Self {
        Self { mean, std }
    }

    pub fn sample(&self, rng: &mut StdRng, count: usize) -> Vec<f32> {
        let normal = match Normal::new(self.mean, self.std) {
            Ok(normal) if self.std > 0.0 => normal,
            _ => return vec![self.mean as f32; count],
        };
        let bound = 2.0 * self.std;
        let mut out = Vec::with_capacity(count);
        while out.len() < count {
            let v: f64 = rng.sample(normal);
            if (v - self.mean).abs() <= bound {
                out.push(v as f32);
            }
        }
        out
    }

    /// Build a parameter tensor of `shape` filled from this distribution.
    pub fn param<B: Backend, const D: usize>(
        &self,
        shape: [usize; D],
        rng: &mut StdRng,
        device: &B::Device,
    ) -> Param<Tensor<B, D>> {
        let count = shape.iter().product();
        let data = TensorData::new(self.sample(rng, count), shape);
        Param::from_tensor(Tensor::from_data(data, device))
    }
}

/// Seeded RNG when a seed is pinned, entropy-seeded otherwise.
pub fn init_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_rng(&mut rand::rng()),
    }
}
