//! Tree updater surface.
//!
//! The outer booster drives tree growth through the [`TreeUpdater`] trait:
//! configure with key-value pairs, then call `update` once per boosting
//! round with the gradient pairs and the feature matrix. Updaters are
//! obtained by name from [`create_updater`].

use std::sync::Arc;

use crate::data::CscMatrix;
use crate::error::TrainError;
use crate::training::builder::Builder;
use crate::training::distributed::{Collective, SingleProcess};
use crate::training::evaluator::{create_split_evaluator, SplitEvaluator};
use crate::training::gradients::{check_gradients, GradientPair};
use crate::training::params::RobustParams;
use crate::tree::RegTree;

/// A named tree-growing strategy the booster can drive.
pub trait TreeUpdater {
    /// Apply key-value configuration. Unknown keys are ignored.
    fn init(&mut self, args: &[(String, String)]) -> Result<(), TrainError>;

    /// Grow every tree in `trees` in place from the gradient pairs.
    fn update(
        &mut self,
        gpair: &[GradientPair],
        matrix: &CscMatrix,
        trees: &mut [RegTree],
    ) -> Result<(), TrainError>;
}

/// Look up an updater by its registered name.
///
/// Registered: `"robust_grow_colmaker"` (single process) and
/// `"robust_distcol"` (adds cross-worker reductions).
pub fn create_updater(name: &str) -> Result<Box<dyn TreeUpdater>, TrainError> {
    match name {
        "robust_grow_colmaker" => Ok(Box::new(RobustColMaker::new())),
        "robust_distcol" => Ok(Box::new(RobustDistColMaker::new())),
        other => Err(TrainError::UnknownUpdater(other.to_string())),
    }
}

/// Column-wise robust tree grower, single process.
pub struct RobustColMaker {
    params: RobustParams,
    spliteval: Option<Box<dyn SplitEvaluator>>,
}

impl Default for RobustColMaker {
    fn default() -> Self {
        Self::new()
    }
}

impl RobustColMaker {
    /// Updater with default configuration; call `init` to configure.
    pub fn new() -> Self {
        Self {
            params: RobustParams::default(),
            spliteval: None,
        }
    }

    fn evaluator(&mut self) -> Result<&dyn SplitEvaluator, TrainError> {
        if self.spliteval.is_none() {
            self.spliteval = Some(create_split_evaluator(&self.params)?);
        }
        Ok(self.spliteval.as_deref().expect("evaluator just created"))
    }
}

impl TreeUpdater for RobustColMaker {
    fn init(&mut self, args: &[(String, String)]) -> Result<(), TrainError> {
        self.params.update_from_args(args)?;
        self.spliteval = Some(create_split_evaluator(&self.params)?);
        Ok(())
    }

    fn update(
        &mut self,
        gpair: &[GradientPair],
        matrix: &CscMatrix,
        trees: &mut [RegTree],
    ) -> Result<(), TrainError> {
        check_gradients(gpair, matrix)?;
        // Rescale the learning rate so the sum over this round's trees
        // moves predictions by one full step.
        let mut params = self.params.clone();
        params.learning_rate /= trees.len().max(1) as f32;
        for tree in trees.iter_mut() {
            let evaluator = self.evaluator()?.host_clone();
            let mut builder = Builder::new(params.clone(), evaluator);
            builder.update(gpair, matrix, tree)?;
        }
        Ok(())
    }
}

/// Distributed variant: column-partitioned workers synchronize best splits
/// and default-direction bitmaps through an injected [`Collective`].
pub struct RobustDistColMaker {
    params: RobustParams,
    spliteval: Option<Box<dyn SplitEvaluator>>,
    collective: Arc<dyn Collective>,
    pruner: Option<Box<dyn TreeUpdater>>,
}

impl Default for RobustDistColMaker {
    fn default() -> Self {
        Self::new()
    }
}

impl RobustDistColMaker {
    /// Updater backed by the identity collective (a group of one).
    pub fn new() -> Self {
        Self::with_collective(Arc::new(SingleProcess))
    }

    /// Updater backed by the given collective.
    pub fn with_collective(collective: Arc<dyn Collective>) -> Self {
        Self {
            params: RobustParams::default(),
            spliteval: None,
            collective,
            pruner: None,
        }
    }

    /// Run `pruner` on the tree after growth; instance positions are
    /// repaired afterwards by walking deleted nodes up to live ancestors.
    pub fn set_pruner(&mut self, pruner: Box<dyn TreeUpdater>) {
        self.pruner = Some(pruner);
    }
}

impl TreeUpdater for RobustDistColMaker {
    fn init(&mut self, args: &[(String, String)]) -> Result<(), TrainError> {
        self.params.update_from_args(args)?;
        self.spliteval = Some(create_split_evaluator(&self.params)?);
        if let Some(pruner) = &mut self.pruner {
            pruner.init(args)?;
        }
        Ok(())
    }

    fn update(
        &mut self,
        gpair: &[GradientPair],
        matrix: &CscMatrix,
        trees: &mut [RegTree],
    ) -> Result<(), TrainError> {
        if trees.len() != 1 {
            return Err(TrainError::MultipleTrees { got: trees.len() });
        }
        check_gradients(gpair, matrix)?;

        if self.spliteval.is_none() {
            self.spliteval = Some(create_split_evaluator(&self.params)?);
        }
        let evaluator = self
            .spliteval
            .as_ref()
            .expect("evaluator just created")
            .host_clone();

        let mut builder = Builder::with_collective(
            self.params.clone(),
            evaluator,
            Some(Arc::clone(&self.collective)),
        );
        builder.update(gpair, matrix, &mut trees[0])?;

        // Pruning is delegated; the pruner synchronizes the tree itself.
        if let Some(pruner) = &mut self.pruner {
            pruner.update(gpair, matrix, trees)?;
        }
        builder.update_position(&trees[0]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert_approx_eq;

    fn unit_pairs(grads: &[f32]) -> Vec<GradientPair> {
        grads.iter().map(|&g| GradientPair::new(g, 1.0)).collect()
    }

    fn cluster_data() -> (CscMatrix, Vec<GradientPair>) {
        (
            CscMatrix::from_column_major(&[1.0, 1.0, 1.0, 10.0, 10.0, 10.0], 6, 1),
            unit_pairs(&[1.0, 1.0, 1.0, -1.0, -1.0, -1.0]),
        )
    }

    #[test]
    fn registry_resolves_names() {
        assert!(create_updater("robust_grow_colmaker").is_ok());
        assert!(create_updater("robust_distcol").is_ok());
        assert!(matches!(
            create_updater("grow_gpu_hist"),
            Err(TrainError::UnknownUpdater(_))
        ));
    }

    #[test]
    fn colmaker_grows_a_tree() {
        let (matrix, gpair) = cluster_data();
        let mut updater = create_updater("robust_grow_colmaker").unwrap();
        updater
            .init(&[("learning_rate".to_string(), "1.0".to_string())])
            .unwrap();

        let mut trees = vec![RegTree::new()];
        updater.update(&gpair, &matrix, &mut trees).unwrap();

        let tree = &trees[0];
        assert!(!tree.is_leaf(0));
        assert_approx_eq!(tree.split_cond(0), 5.5, 1e-5);
    }

    #[test]
    fn learning_rate_is_shared_across_round_trees() {
        let (matrix, gpair) = cluster_data();
        let mut updater = RobustColMaker::new();
        updater
            .init(&[("learning_rate".to_string(), "1.0".to_string())])
            .unwrap();

        let mut trees = vec![RegTree::new(), RegTree::new()];
        updater.update(&gpair, &matrix, &mut trees).unwrap();

        // each of the two trees gets half the step
        let left = trees[0].left_child(0);
        assert_approx_eq!(trees[0].leaf_value(left), -0.375, 1e-5);
        assert_eq!(
            trees[0].leaf_value(trees[0].left_child(0)),
            trees[1].leaf_value(trees[1].left_child(0))
        );

        // and the configured rate is untouched for the next round
        let mut next = vec![RegTree::new()];
        updater.update(&gpair, &matrix, &mut next).unwrap();
        let left = next[0].left_child(0);
        assert_approx_eq!(next[0].leaf_value(left), -0.75, 1e-5);
    }

    #[test]
    fn distcol_rejects_multiple_trees() {
        let (matrix, gpair) = cluster_data();
        let mut updater = create_updater("robust_distcol").unwrap();
        updater.init(&[]).unwrap();

        let mut trees = vec![RegTree::new(), RegTree::new()];
        assert!(matches!(
            updater.update(&gpair, &matrix, &mut trees),
            Err(TrainError::MultipleTrees { got: 2 })
        ));
    }

    #[test]
    fn distcol_single_worker_matches_colmaker() {
        let (matrix, gpair) = cluster_data();

        let mut colmaker = create_updater("robust_grow_colmaker").unwrap();
        colmaker.init(&[]).unwrap();
        let mut a = vec![RegTree::new()];
        colmaker.update(&gpair, &matrix, &mut a).unwrap();

        let mut distcol = create_updater("robust_distcol").unwrap();
        distcol.init(&[]).unwrap();
        let mut b = vec![RegTree::new()];
        distcol.update(&gpair, &matrix, &mut b).unwrap();

        assert_eq!(a[0].n_nodes(), b[0].n_nodes());
        assert_eq!(a[0].split_cond(0), b[0].split_cond(0));
        assert_eq!(a[0].default_left(0), b[0].default_left(0));
    }

    #[test]
    fn distcol_runs_pruner_and_repairs_positions() {
        struct LeafAllPruner;
        impl TreeUpdater for LeafAllPruner {
            fn init(&mut self, _args: &[(String, String)]) -> Result<(), TrainError> {
                Ok(())
            }
            fn update(
                &mut self,
                _gpair: &[GradientPair],
                _matrix: &CscMatrix,
                trees: &mut [RegTree],
            ) -> Result<(), TrainError> {
                // collapse the root split back into a leaf
                let tree = &mut trees[0];
                if !tree.is_leaf(0) {
                    tree.delete_node(tree.left_child(0));
                    tree.delete_node(tree.right_child(0));
                    tree.set_leaf(0, 0.0);
                }
                Ok(())
            }
        }

        let (matrix, gpair) = cluster_data();
        let mut updater = RobustDistColMaker::new();
        updater.set_pruner(Box::new(LeafAllPruner));
        updater.init(&[]).unwrap();

        let mut trees = vec![RegTree::new()];
        updater.update(&gpair, &matrix, &mut trees).unwrap();

        assert!(trees[0].is_leaf(0));
    }
}
