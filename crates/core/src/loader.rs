use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::assemble::AssembledExample;
use crate::collate::{Batch, Collator};
use crate::dataset::RankingDataset;
use crate::error::{PrepError, Result};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoaderConfig {
    pub batch_size: usize,
    /// Permute example indices each epoch. A triple's positive and negative
    /// are only guaranteed to share a batch when this is off.
    pub shuffle: bool,
    pub seed: u64,
    pub drop_last: bool,
    /// Assembly threads per batch; 1 assembles inline.
    pub workers: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 26,
            shuffle: false,
            seed: 42,
            drop_last: false,
            workers: 1,
        }
    }
}

/// Iterates a dataset in collated batches. Each index is visited at most once
/// per epoch; a batch is collated only after all of its examples assembled.
pub struct BatchLoader<'a> {
    dataset: &'a RankingDataset,
    collator: Collator,
    config: LoaderConfig,
    order: Vec<usize>,
    cursor: usize,
    epoch: u64,
    pool: Option<rayon::ThreadPool>,
}

impl<'a> BatchLoader<'a> {
    pub fn new(dataset: &'a RankingDataset, config: LoaderConfig) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(PrepError::Config("batch_size must be positive".into()));
        }
        let pool = if config.workers > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(config.workers)
                .thread_name(|idx| format!("passage-prep-assemble-{idx}"))
                .build()
                .map_err(|err| PrepError::Other(format!("failed to build worker pool: {err}")))?;
            Some(pool)
        } else {
            None
        };
        let mut loader = Self {
            dataset,
            collator: Collator::new(dataset.mode()),
            config,
            order: Vec::new(),
            cursor: 0,
            epoch: 0,
            pool,
        };
        loader.set_epoch(0);
        info!(
            examples = dataset.len(),
            batches = loader.num_batches(),
            batch_size = config.batch_size,
            workers = config.workers,
            shuffle = config.shuffle,
            "batch loader ready"
        );
        Ok(loader)
    }

    /// Restarts iteration; with shuffling on, draws a fresh permutation.
    pub fn set_epoch(&mut self, epoch: u64) {
        self.epoch = epoch;
        self.cursor = 0;
        self.order = (0..self.dataset.len()).collect();
        if self.config.shuffle {
            let mut rng = StdRng::seed_from_u64(self.config.seed.wrapping_add(epoch));
            self.order.shuffle(&mut rng);
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn num_batches(&self) -> usize {
        let len = self.order.len();
        if self.config.drop_last {
            len / self.config.batch_size
        } else {
            len.div_ceil(self.config.batch_size)
        }
    }

    fn assemble_all(&self, indices: &[usize]) -> Result<Vec<AssembledExample>> {
        let (dataset, epoch) = (self.dataset, self.epoch);
        match &self.pool {
            Some(pool) => pool.install(|| {
                indices
                    .par_iter()
                    .map(|&idx| dataset.example(idx, epoch))
                    .collect()
            }),
            None => indices
                .iter()
                .map(|&idx| dataset.example(idx, epoch))
                .collect(),
        }
    }
}

impl Iterator for BatchLoader<'_> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        let remaining = self.order.len() - self.cursor;
        if remaining == 0 || (self.config.drop_last && remaining < self.config.batch_size) {
            return None;
        }
        let end = self.cursor + remaining.min(self.config.batch_size);
        let indices = self.order[self.cursor..end].to_vec();
        self.cursor = end;
        debug!(epoch = self.epoch, first = indices[0], size = indices.len(), "assembling batch");

        let batch = self
            .assemble_all(&indices)
            .and_then(|examples| self.collator.collate(&examples));
        if batch.is_err() {
            self.cursor = self.order.len();
        }
        Some(batch)
    }
}
