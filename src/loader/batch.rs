// Batching for the training boundary
// Batches are [B, 3, H, W] f32 with [B] i64 labels. Samples of a batch load
// in parallel; each draws from its own rng seeded by (seed, epoch, index).

use ndarray::{s, Array1, Array4};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::constants::DEFAULT_SPLIT_SEED;
use crate::error::{PrepError, Result};
use crate::loader::dataset::{Sample, SampleSource};

#[derive(Debug, Clone)]
pub struct Batch {
    pub images: Array4<f32>,
    pub labels: Array1<i64>,
    /// Dataset indices, in batch order
    pub indices: Vec<usize>,
    pub placeholders: usize,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

pub struct DataLoader<'a, S: SampleSource> {
    source: &'a S,
    batch_size: usize,
    shuffle: bool,
    seed: u64,
}

impl<'a, S: SampleSource> DataLoader<'a, S> {
    pub fn new(source: &'a S, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(PrepError::InvalidConfig("batch size must be at least 1".to_string()));
        }
        Ok(Self { source, batch_size, shuffle: false, seed: DEFAULT_SPLIT_SEED })
    }

    /// Shuffle the order every epoch, reproducibly for a given seed.
    pub fn shuffled(mut self, seed: u64) -> Self {
        self.shuffle = true;
        self.seed = seed;
        self
    }

    /// Number of batches per epoch; the last one may be short.
    pub fn num_batches(&self) -> usize {
        (self.source.len() + self.batch_size - 1) / self.batch_size
    }

    /// Sample order for `epoch`.
    pub fn order(&self, epoch: u64) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.source.len()).collect();
        if self.shuffle {
            let mut rng = StdRng::seed_from_u64(self.seed ^ epoch.wrapping_mul(0x9E37_79B9_7F4A_7C15));
            order.shuffle(&mut rng);
        }
        order
    }

    pub fn epoch(&self, epoch: u64) -> EpochIter<'_, 'a, S> {
        EpochIter { loader: self, order: self.order(epoch), pos: 0, epoch }
    }

    /// Load and stack the given indices.
    pub fn load_batch(&self, indices: &[usize], epoch: u64) -> Result<Batch> {
        let samples: Vec<Sample> = indices
            .par_iter()
            .map(|&i| {
                let mut rng = sample_rng(self.seed, epoch, i);
                self.source.load(i, &mut rng)
            })
            .collect::<Result<Vec<_>>>()?;
        stack(samples, indices.to_vec())
    }
}

fn sample_rng(seed: u64, epoch: u64, index: usize) -> StdRng {
    let mixed = seed
        .wrapping_add(epoch.wrapping_mul(0x9E37_79B9_7F4A_7C15))
        .wrapping_add((index as u64).wrapping_mul(0xBF58_476D_1CE4_E5B9));
    StdRng::seed_from_u64(mixed)
}

fn stack(samples: Vec<Sample>, indices: Vec<usize>) -> Result<Batch> {
    let first = samples
        .first()
        .ok_or_else(|| PrepError::Other("empty batch".to_string()))?;
    let (c, h, w) = first.tensor.dim();

    let mut images = Array4::<f32>::zeros((samples.len(), c, h, w));
    let mut labels = Array1::<i64>::zeros(samples.len());
    let mut placeholders = 0;

    for (k, sample) in samples.iter().enumerate() {
        if sample.tensor.dim() != (c, h, w) {
            return Err(PrepError::InvalidConfig(format!(
                "sample {} has shape {:?}, expected {:?}; add a resize transform",
                indices[k],
                sample.tensor.dim(),
                (c, h, w)
            )));
        }
        images.slice_mut(s![k, .., .., ..]).assign(&sample.tensor);
        labels[k] = sample.label.as_u8() as i64;
        if sample.origin.is_placeholder() {
            placeholders += 1;
        }
    }

    Ok(Batch { images, labels, indices, placeholders })
}

pub struct EpochIter<'l, 'a, S: SampleSource> {
    loader: &'l DataLoader<'a, S>,
    order: Vec<usize>,
    pos: usize,
    epoch: u64,
}

impl<'l, 'a, S: SampleSource> Iterator for EpochIter<'l, 'a, S> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.order.len() {
            return None;
        }
        let end = (self.pos + self.loader.batch_size).min(self.order.len());
        let indices = &self.order[self.pos..end];
        self.pos = end;
        Some(self.loader.load_batch(indices, self.epoch))
    }
}
