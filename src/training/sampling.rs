//! Row and feature sampling.
//!
//! Sampling is fully determined by the configured seed: rows are retained
//! by Bernoulli coin flips per tree, features are shuffled and truncated
//! once per tree (`colsample_bytree`) and again per depth
//! (`colsample_bylevel`). At least one feature always survives.

use rand::prelude::*;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::data::CscMatrix;
use crate::error::TrainError;
use crate::training::gradients::GradientPair;
use crate::training::position::PositionMap;

/// Golden-ratio increment for decorrelating per-depth seeds.
const SEED_MIX: u64 = 0x9E3779B97F4A7C15;

/// Exclude rows dropped by the Bernoulli subsample.
///
/// Rows already filtered by a negative hessian do not consume a draw.
pub fn subsample_rows(
    position: &mut PositionMap,
    gpair: &[GradientPair],
    subsample: f32,
    seed: u64,
) {
    if subsample >= 1.0 {
        return;
    }
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    for ridx in 0..position.len() {
        if gpair[ridx].is_filtered() {
            continue;
        }
        if rng.gen::<f32>() >= subsample {
            position.exclude(ridx);
        }
    }
}

/// Feature index sampled once per tree, re-sampled per depth.
#[derive(Debug, Clone)]
pub struct FeatureSampler {
    /// Features retained for the whole tree (non-empty columns only).
    tree_features: Vec<u32>,
    colsample_bylevel: f32,
    seed: u64,
}

impl FeatureSampler {
    /// Sample the per-tree feature set from the matrix's non-empty columns.
    pub fn for_tree(
        matrix: &CscMatrix,
        colsample_bytree: f32,
        colsample_bylevel: f32,
        seed: u64,
    ) -> Result<Self, TrainError> {
        let mut features: Vec<u32> = (0..matrix.num_cols() as u32)
            .filter(|&fid| matrix.col_size(fid as usize) != 0)
            .collect();
        if features.is_empty() {
            return Err(TrainError::EmptyFeatureSet);
        }

        if colsample_bytree < 1.0 {
            let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
            features.shuffle(&mut rng);
            let keep = ((features.len() as f32 * colsample_bytree) as usize).max(1);
            features.truncate(keep);
            features.sort_unstable();
        }

        Ok(Self {
            tree_features: features,
            colsample_bylevel,
            seed,
        })
    }

    /// Features retained for the whole tree.
    pub fn tree_features(&self) -> &[u32] {
        &self.tree_features
    }

    /// Feature set for one depth level.
    pub fn sample_level(&self, depth: u32) -> Vec<u32> {
        if self.colsample_bylevel >= 1.0 {
            return self.tree_features.clone();
        }
        let level_seed = self
            .seed
            .wrapping_add((depth as u64 + 1).wrapping_mul(SEED_MIX));
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(level_seed);
        let mut features = self.tree_features.clone();
        features.shuffle(&mut rng);
        let keep = ((self.tree_features.len() as f32 * self.colsample_bylevel) as usize).max(1);
        features.truncate(keep);
        features.sort_unstable();
        features
    }
}
