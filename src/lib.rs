//! robustboost: adversarially robust tree growing for gradient boosting.
//!
//! This crate implements a column-wise regression tree builder that scores
//! every candidate split by the worst loss change an adversary can force by
//! perturbing feature values within a ±eps budget, then commits the split
//! with the best worst-case gain. The outer boosting loop talks to the crate
//! through the [`training::TreeUpdater`] registry.

pub mod data;
pub mod error;
pub mod testing;
pub mod training;
pub mod tree;

pub use data::{CscMatrix, Entry};
pub use error::TrainError;
pub use training::{create_updater, GradStats, GradientPair, RobustParams, TreeUpdater};
pub use tree::{NodeId, RegTree};
