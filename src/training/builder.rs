//! Per-tree builder: the depth-wise level driver.
//!
//! One builder instance grows exactly one tree and owns all per-tree
//! scratch (position map, per-node entries, feature sampler). Per depth it
//! runs four phases with bulk-parallel joins between them: accumulate
//! per-node statistics, enumerate candidate splits over the sampled feature
//! columns, commit the winning splits, and reposition instances into the
//! new children.

use std::sync::Arc;

use fixedbitset::FixedBitSet;
use rayon::prelude::*;

use crate::data::CscMatrix;
use crate::error::TrainError;
use crate::training::distributed::Collective;
use crate::training::enumerator::{Direction, SplitEnumerator};
use crate::training::evaluator::SplitEvaluator;
use crate::training::gradients::{check_gradients, GradStats, GradientPair};
use crate::training::logger::{TrainingLogger, Verbosity};
use crate::training::params::{ParallelOption, RobustParams, RT_EPS};
use crate::training::position::PositionMap;
use crate::training::sampling::{subsample_rows, FeatureSampler};
use crate::training::scan::ScanScratch;
use crate::training::split::SplitEntry;
use crate::tree::{NodeId, NodeStat, RegTree};

/// Accumulated state of one tree node during construction.
#[derive(Debug, Clone)]
pub(crate) struct NodeEntry {
    /// Gradient statistics of every active instance at the node.
    pub stats: GradStats,
    /// Score of the node without a split.
    pub root_gain: f32,
    /// Newton-optimal weight of the node.
    pub weight: f32,
    /// Best split found for the node so far.
    pub best: SplitEntry,
}

impl Default for NodeEntry {
    fn default() -> Self {
        Self {
            stats: GradStats::default(),
            root_gain: 0.0,
            weight: 0.0,
            best: SplitEntry::none(),
        }
    }
}

/// Grows one regression tree from gradient statistics.
pub(crate) struct Builder {
    params: RobustParams,
    nthread: usize,
    spliteval: Box<dyn SplitEvaluator>,
    collective: Option<Arc<dyn Collective>>,
    logger: TrainingLogger,
    sampler: Option<FeatureSampler>,
    position: PositionMap,
    snode: Vec<NodeEntry>,
    qexpand: Vec<NodeId>,
}

impl Builder {
    /// Single-process builder.
    pub fn new(params: RobustParams, spliteval: Box<dyn SplitEvaluator>) -> Self {
        Self::with_collective(params, spliteval, None)
    }

    /// Builder whose best-split and default-direction decisions are
    /// synchronized through a collective.
    pub fn with_collective(
        params: RobustParams,
        spliteval: Box<dyn SplitEvaluator>,
        collective: Option<Arc<dyn Collective>>,
    ) -> Self {
        let nthread = if params.nthread == 0 {
            rayon::current_num_threads()
        } else {
            params.nthread
        };
        let verbosity = if params.robust_training_verbose {
            Verbosity::Debug
        } else {
            Verbosity::Silent
        };
        Self {
            params,
            nthread,
            spliteval,
            collective,
            logger: TrainingLogger::new(verbosity),
            sampler: None,
            position: PositionMap::new(0),
            snode: Vec::new(),
            qexpand: Vec::new(),
        }
    }

    /// Grow `tree` in place from the gradient pairs.
    pub fn update(
        &mut self,
        gpair: &[GradientPair],
        matrix: &CscMatrix,
        tree: &mut RegTree,
    ) -> Result<(), TrainError> {
        self.init_data(gpair, matrix, tree)?;
        let roots = self.qexpand.clone();
        self.init_new_node(&roots, gpair, tree);

        for depth in 0..self.params.max_depth {
            self.find_split(depth, gpair, matrix, tree);
            self.reset_position(matrix, tree)?;
            let new_nodes = self.update_queue_expand(tree);
            self.init_new_node(&new_nodes, gpair, tree);

            // Register committed splits so the evaluator can propagate
            // constraints to the children.
            for i in 0..self.qexpand.len() {
                let nid = self.qexpand[i];
                if tree.is_leaf(nid) {
                    continue;
                }
                let left = tree.left_child(nid);
                let right = tree.right_child(nid);
                let feature = self.snode[nid as usize].best.split_index;
                let left_weight = self.snode[left as usize].weight;
                let right_weight = self.snode[right as usize].weight;
                self.spliteval
                    .add_split(nid, left, right, feature, left_weight, right_weight);
            }

            self.qexpand = new_nodes;
            if self.qexpand.is_empty() {
                break;
            }
        }

        // Depth cap reached: everything still expanding becomes a leaf.
        for i in 0..self.qexpand.len() {
            let nid = self.qexpand[i];
            let weight = self.snode[nid as usize].weight;
            tree.set_leaf(nid, weight * self.params.learning_rate);
        }

        // Remember auxiliary statistics in the tree nodes.
        for nid in 0..tree.n_nodes() as NodeId {
            let entry = &self.snode[nid as usize];
            *tree.stat_mut(nid) = NodeStat {
                loss_chg: entry.best.loss_chg,
                base_weight: entry.weight,
                sum_hess: entry.stats.sum_hess as f32,
            };
        }
        Ok(())
    }

    /// Walk instances off deleted nodes up to the nearest live ancestor and
    /// reactivate them. Called after a pruner has run on the tree.
    pub fn update_position(&mut self, tree: &RegTree) {
        for ridx in 0..self.position.len() {
            let mut nid = self.position.node(ridx);
            while tree.is_deleted(nid) {
                nid = tree.parent(nid).expect("deleted node has a live ancestor");
            }
            self.position.set_active(ridx, nid);
        }
    }

    #[cfg(test)]
    pub fn position(&self) -> &PositionMap {
        &self.position
    }

    // ========================================================================
    // Phases
    // ========================================================================

    fn init_data(
        &mut self,
        gpair: &[GradientPair],
        matrix: &CscMatrix,
        tree: &RegTree,
    ) -> Result<(), TrainError> {
        if tree.n_nodes() != 1 {
            return Err(TrainError::TreeNotEmpty {
                n_nodes: tree.n_nodes(),
            });
        }
        self.params.validate()?;
        check_gradients(gpair, matrix)?;

        self.position = PositionMap::new(gpair.len());
        for (ridx, g) in gpair.iter().enumerate() {
            if g.is_filtered() {
                self.position.exclude(ridx);
            }
        }
        subsample_rows(
            &mut self.position,
            gpair,
            self.params.subsample,
            self.params.seed,
        );

        self.sampler = Some(FeatureSampler::for_tree(
            matrix,
            self.params.colsample_bytree,
            self.params.colsample_bylevel,
            self.params.seed,
        )?);

        self.snode.clear();
        self.qexpand = vec![0];
        Ok(())
    }

    /// Accumulate per-node statistics for `nodes` and derive their weight
    /// and no-split score.
    fn init_new_node(&mut self, nodes: &[NodeId], gpair: &[GradientPair], tree: &RegTree) {
        let num_nodes = tree.n_nodes();
        if self.snode.len() < num_nodes {
            self.snode.resize_with(num_nodes, NodeEntry::default);
        }

        let position = &self.position;
        let totals: Vec<GradStats> = (0..gpair.len())
            .into_par_iter()
            .with_min_len(1024)
            .fold(
                || vec![GradStats::default(); num_nodes],
                |mut acc, ridx| {
                    if let Some(nid) = position.active_node(ridx) {
                        acc[nid as usize].add_pair(gpair[ridx]);
                    }
                    acc
                },
            )
            .reduce(
                || vec![GradStats::default(); num_nodes],
                |mut a, b| {
                    for (x, y) in a.iter_mut().zip(&b) {
                        x.add(y);
                    }
                    a
                },
            );

        for &nid in nodes {
            let stats = totals[nid as usize];
            let parent = tree.parent(nid);
            let weight = self.spliteval.compute_weight(parent, &stats);
            let root_gain = self.spliteval.compute_score(parent, &stats, weight);
            self.snode[nid as usize] = NodeEntry {
                stats,
                root_gain,
                weight,
                best: SplitEntry::none(),
            };
        }
    }

    /// Enumerate splits over the depth's feature batch, reduce the
    /// per-task winners, and commit one decision per frontier node.
    fn find_split(
        &mut self,
        depth: u32,
        gpair: &[GradientPair],
        matrix: &CscMatrix,
        tree: &mut RegTree,
    ) {
        let feat_set = self
            .sampler
            .as_ref()
            .expect("builder is initialized")
            .sample_level(depth);
        let mode = self
            .params
            .parallel_option
            .resolve(feat_set.len(), self.nthread);
        let num_nodes = tree.n_nodes();

        let candidates: Vec<(NodeId, SplitEntry)> = {
            let enumerator = SplitEnumerator {
                params: &self.params,
                evaluator: self.spliteval.as_ref(),
                snode: &self.snode,
                position: &self.position,
                qexpand: &self.qexpand,
                gpair,
                logger: self.logger,
            };
            match mode {
                ParallelOption::Feature => feat_set
                    .par_iter()
                    .map_init(ScanScratch::new, |scratch, &fid| {
                        let col = matrix.column(fid as usize);
                        let indicator =
                            !col.is_empty() && col[0].fvalue == col[col.len() - 1].fvalue;
                        let density = matrix.col_density(fid as usize);
                        scratch.reset_feature(num_nodes, enumerator.qexpand);
                        if self.params.need_forward_search(density, indicator) {
                            enumerator.enumerate(col, Direction::Forward, fid, scratch);
                        }
                        if self.params.need_backward_search(density, indicator) {
                            enumerator.enumerate(col, Direction::Backward, fid, scratch);
                        }
                        enumerator.collect_best(scratch)
                    })
                    .flatten()
                    .collect(),
                ParallelOption::WithinColumn => {
                    let mut out = Vec::new();
                    for &fid in &feat_set {
                        let col = matrix.column(fid as usize);
                        let indicator =
                            !col.is_empty() && col[0].fvalue == col[col.len() - 1].fvalue;
                        let density = matrix.col_density(fid as usize);
                        out.extend(enumerator.parallel_find_split(
                            col,
                            fid,
                            self.nthread,
                            self.params.need_forward_search(density, indicator),
                            self.params.need_backward_search(density, indicator),
                        ));
                    }
                    out
                }
                ParallelOption::Auto => unreachable!("auto mode resolves before dispatch"),
            }
        };

        for (nid, entry) in candidates {
            self.snode[nid as usize].best.update_entry(&entry);
        }
        self.sync_best_solution();

        // Commit: split when the worst-case gain clears the threshold,
        // otherwise finalize as a leaf.
        for i in 0..self.qexpand.len() {
            let nid = self.qexpand[i];
            let best = self.snode[nid as usize].best;
            if best.loss_chg > RT_EPS {
                tree.add_children(nid);
                tree.set_split(nid, best.split_index, best.split_value, best.default_left);
            } else {
                let weight = self.snode[nid as usize].weight;
                tree.set_leaf(nid, weight * self.params.learning_rate);
            }
        }
    }

    /// Merge the frontier's best splits across workers of the collective.
    fn sync_best_solution(&mut self) {
        let Some(collective) = &self.collective else {
            return;
        };
        let mut entries: Vec<SplitEntry> = self
            .qexpand
            .iter()
            .map(|&nid| self.snode[nid as usize].best)
            .collect();
        collective.allreduce_splits(&mut entries);
        for (i, &nid) in self.qexpand.iter().enumerate() {
            self.snode[nid as usize].best = entries[i];
        }
    }

    /// Reposition every instance after the depth's splits are in the tree.
    fn reset_position(&mut self, matrix: &CscMatrix, tree: &RegTree) -> Result<(), TrainError> {
        // Instances with an observed value on their node's split feature
        // take the side the value dictates.
        self.set_non_default_position(matrix, tree)?;

        // Everyone else: finalized leaves retire their instances, split
        // nodes push them down the default branch.
        for ridx in 0..self.position.len() {
            let nid = self.position.node(ridx);
            if tree.is_leaf(nid) {
                if !tree.is_fresh_leaf(nid) {
                    self.position.retire(ridx, nid);
                }
            } else {
                let child = if tree.default_left(nid) {
                    tree.left_child(nid)
                } else {
                    tree.right_child(nid)
                };
                self.position.assign(ridx, child);
            }
        }
        Ok(())
    }

    /// Distinct split features of the frontier, ascending.
    fn split_features(&self, tree: &RegTree) -> Vec<u32> {
        let mut fsplits: Vec<u32> = self
            .qexpand
            .iter()
            .filter(|&&nid| !tree.is_leaf(nid))
            .map(|&nid| tree.split_index(nid))
            .collect();
        fsplits.sort_unstable();
        fsplits.dedup();
        fsplits
    }

    fn set_non_default_position(
        &mut self,
        matrix: &CscMatrix,
        tree: &RegTree,
    ) -> Result<(), TrainError> {
        let mut fsplits = self.split_features(tree);
        fsplits.retain(|&fid| (fid as usize) < matrix.num_cols());

        if self.collective.is_some() {
            return self.sync_non_default_position(&fsplits, matrix, tree);
        }

        for &fid in &fsplits {
            for entry in matrix.column(fid as usize) {
                let ridx = entry.index as usize;
                let nid = self.position.node(ridx);
                if !tree.is_leaf(nid) && tree.split_index(nid) == fid {
                    let child = if entry.fvalue < tree.split_cond(nid) {
                        tree.left_child(nid)
                    } else {
                        tree.right_child(nid)
                    };
                    self.position.assign(ridx, child);
                }
            }
        }
        Ok(())
    }

    /// Distributed variant: each worker only observes its own columns, so
    /// the set of instances that disagree with the default direction is
    /// synchronized as a bitwise-OR of per-worker bitmaps, then applied
    /// locally by flipping those instances off the default branch.
    fn sync_non_default_position(
        &mut self,
        fsplits: &[u32],
        matrix: &CscMatrix,
        tree: &RegTree,
    ) -> Result<(), TrainError> {
        let mut bits = FixedBitSet::with_capacity(self.position.len());
        for &fid in fsplits {
            for entry in matrix.column(fid as usize) {
                let ridx = entry.index as usize;
                let nid = self.position.node(ridx);
                if !tree.is_leaf(nid) && tree.split_index(nid) == fid {
                    let goes_left = entry.fvalue < tree.split_cond(nid);
                    if goes_left != tree.default_left(nid) {
                        bits.insert(ridx);
                    }
                }
            }
        }

        if let Some(collective) = &self.collective {
            collective.bitmap_or(&mut bits);
        }

        for ridx in 0..self.position.len() {
            if !bits.contains(ridx) {
                continue;
            }
            let nid = self.position.node(ridx);
            if tree.is_leaf(nid) {
                return Err(TrainError::InconsistentReduce { index: ridx });
            }
            let child = if tree.default_left(nid) {
                tree.right_child(nid)
            } else {
                tree.left_child(nid)
            };
            self.position.assign(ridx, child);
        }
        Ok(())
    }

    /// Children of every node that actually split this depth.
    fn update_queue_expand(&self, tree: &RegTree) -> Vec<NodeId> {
        let mut new_nodes = Vec::new();
        for &nid in &self.qexpand {
            if !tree.is_leaf(nid) {
                new_nodes.push(tree.left_child(nid));
                new_nodes.push(tree.right_child(nid));
            }
        }
        new_nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert_approx_eq;
    use crate::training::evaluator::create_split_evaluator;

    fn build_tree(params: RobustParams, gpair: &[GradientPair], matrix: &CscMatrix) -> RegTree {
        let evaluator = create_split_evaluator(&params).unwrap();
        let mut builder = Builder::new(params, evaluator);
        let mut tree = RegTree::new();
        builder.update(gpair, matrix, &mut tree).unwrap();
        tree
    }

    fn unit_pairs(grads: &[f32]) -> Vec<GradientPair> {
        grads.iter().map(|&g| GradientPair::new(g, 1.0)).collect()
    }

    #[test]
    fn two_clusters_produce_one_split() {
        let matrix =
            CscMatrix::from_column_major(&[1.0, 1.0, 1.0, 10.0, 10.0, 10.0], 6, 1);
        let gpair = unit_pairs(&[1.0, 1.0, 1.0, -1.0, -1.0, -1.0]);
        let mut params = RobustParams::default();
        params.learning_rate = 1.0;

        let tree = build_tree(params, &gpair, &matrix);

        assert!(!tree.is_leaf(0));
        assert_eq!(tree.split_index(0), 0);
        assert_approx_eq!(tree.split_cond(0), 5.5, 1e-5);
        assert_eq!(tree.n_leaves(), 2);
        // left leaf: G=3, H=3, lambda=1 -> w = -3/4
        assert_approx_eq!(tree.leaf_value(tree.left_child(0)), -0.75, 1e-5);
        assert_approx_eq!(tree.leaf_value(tree.right_child(0)), 0.75, 1e-5);
        assert_approx_eq!(tree.stat(0).loss_chg, 4.5, 1e-4);
        assert_approx_eq!(tree.stat(0).sum_hess, 6.0, 1e-5);
    }

    #[test]
    fn constant_feature_yields_single_leaf() {
        let matrix = CscMatrix::from_column_major(&[3.0; 6], 6, 1);
        let gpair = unit_pairs(&[1.0, -1.0, 1.0, -1.0, 1.0, -1.0]);
        let params = RobustParams::default();

        let tree = build_tree(params, &gpair, &matrix);

        assert_eq!(tree.n_nodes(), 1);
        assert!(tree.is_leaf(0));
    }

    #[test]
    fn max_depth_caps_growth() {
        // 8 points whose gradients split recursively on both features
        let values = [
            0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, // feature 0
            0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 1.0, // feature 1
        ];
        let matrix = CscMatrix::from_column_major(&values, 8, 2);
        let gpair = unit_pairs(&[3.0, 3.0, 1.0, 1.0, -1.0, -1.0, -3.0, -3.0]);
        let mut params = RobustParams::default();
        params.max_depth = 1;
        params.min_child_weight = 0.5;

        let tree = build_tree(params, &gpair, &matrix);

        assert!(tree.max_depth() <= 1);
        assert!(tree.n_leaves() <= 2);
    }

    #[test]
    fn deterministic_given_seed() {
        let values: Vec<f32> = (0..40).map(|i| ((i * 7919) % 40) as f32).collect();
        let grads: Vec<f32> = (0..20).map(|i| if i % 3 == 0 { 1.0 } else { -0.5 }).collect();
        let matrix = CscMatrix::from_column_major(&values, 20, 2);
        let gpair = unit_pairs(&grads);
        let mut params = RobustParams::default();
        params.subsample = 0.8;
        params.colsample_bylevel = 0.5;
        params.seed = 17;
        params.min_child_weight = 0.5;

        let a = build_tree(params.clone(), &gpair, &matrix);
        let b = build_tree(params, &gpair, &matrix);

        assert_eq!(a.n_nodes(), b.n_nodes());
        for nid in 0..a.n_nodes() as NodeId {
            assert_eq!(a.is_leaf(nid), b.is_leaf(nid));
            if a.is_leaf(nid) {
                assert_eq!(a.leaf_value(nid), b.leaf_value(nid));
            } else {
                assert_eq!(a.split_index(nid), b.split_index(nid));
                assert_eq!(a.split_cond(nid), b.split_cond(nid));
            }
        }
    }

    #[test]
    fn filtered_instance_matches_run_without_it() {
        // instance 3 deleted via negative hessian
        let with_values = [1.0, 1.0, 10.0, 5.0, 10.0, 10.0];
        let matrix_with = CscMatrix::from_column_major(&with_values, 6, 1);
        let mut gpair_with = unit_pairs(&[1.0, 1.0, -1.0, 9.0, -1.0, -1.0]);
        gpair_with[3] = GradientPair::new(9.0, -1.0);

        let without_values = [1.0, 1.0, 10.0, 10.0, 10.0];
        let matrix_without = CscMatrix::from_column_major(&without_values, 5, 1);
        let gpair_without = unit_pairs(&[1.0, 1.0, -1.0, -1.0, -1.0]);

        let mut params = RobustParams::default();
        params.learning_rate = 1.0;

        let a = build_tree(params.clone(), &gpair_with, &matrix_with);
        let b = build_tree(params, &gpair_without, &matrix_without);

        assert_eq!(a.n_nodes(), b.n_nodes());
        assert_eq!(a.max_depth(), b.max_depth());
        for nid in 0..a.n_nodes() as NodeId {
            assert_eq!(a.is_leaf(nid), b.is_leaf(nid));
            if !a.is_leaf(nid) {
                assert_eq!(a.split_cond(nid), b.split_cond(nid));
            } else {
                assert_approx_eq!(a.leaf_value(nid), b.leaf_value(nid), 1e-6);
            }
        }
    }

    #[test]
    fn non_empty_tree_is_rejected() {
        let matrix = CscMatrix::from_column_major(&[1.0, 2.0], 2, 1);
        let gpair = unit_pairs(&[1.0, -1.0]);
        let params = RobustParams::default();
        let evaluator = create_split_evaluator(&params).unwrap();
        let mut builder = Builder::new(params, evaluator);

        let mut tree = RegTree::new();
        tree.add_children(0);
        tree.set_split(0, 0, 1.5, false);

        assert!(matches!(
            builder.update(&gpair, &matrix, &mut tree),
            Err(TrainError::TreeNotEmpty { n_nodes: 3 })
        ));
    }

    #[test]
    fn finalized_leaf_instances_are_retired() {
        let matrix = CscMatrix::from_column_major(&[3.0; 4], 4, 1);
        let gpair = unit_pairs(&[1.0, -1.0, 1.0, -1.0]);
        let params = RobustParams::default();
        let evaluator = create_split_evaluator(&params).unwrap();
        let mut builder = Builder::new(params, evaluator);
        let mut tree = RegTree::new();
        builder.update(&gpair, &matrix, &mut tree).unwrap();

        // the root became a leaf; every instance is parked excluded there
        for ridx in 0..4 {
            assert_eq!(builder.position().active_node(ridx), None);
            assert_eq!(builder.position().node(ridx), 0);
        }
    }

    #[test]
    fn update_position_walks_off_deleted_nodes() {
        let matrix =
            CscMatrix::from_column_major(&[1.0, 1.0, 1.0, 10.0, 10.0, 10.0], 6, 1);
        let gpair = unit_pairs(&[1.0, 1.0, 1.0, -1.0, -1.0, -1.0]);
        let params = RobustParams::default();
        let evaluator = create_split_evaluator(&params).unwrap();
        let mut builder = Builder::new(params, evaluator);
        let mut tree = RegTree::new();
        builder.update(&gpair, &matrix, &mut tree).unwrap();
        assert!(!tree.is_leaf(0));

        // prune both children away and repair positions
        tree.delete_node(tree.left_child(0));
        tree.delete_node(tree.right_child(0));
        tree.set_leaf(0, 0.0);
        builder.update_position(&tree);

        for ridx in 0..6 {
            assert_eq!(builder.position().active_node(ridx), Some(0));
        }
    }

    #[test]
    fn within_column_mode_matches_feature_mode() {
        let values: Vec<f32> = (0..12).map(|i| i as f32).collect();
        let matrix = CscMatrix::from_column_major(&values, 12, 1);
        let gpair =
            unit_pairs(&[2.0, 2.0, 1.0, 1.0, 1.0, 0.5, -0.5, -1.0, -1.0, -1.0, -2.0, -2.0]);

        let mut feature_params = RobustParams::default();
        feature_params.learning_rate = 1.0;
        let a = build_tree(feature_params.clone(), &gpair, &matrix);

        let mut column_params = feature_params;
        column_params.parallel_option = ParallelOption::WithinColumn;
        let b = build_tree(column_params, &gpair, &matrix);

        assert_eq!(a.n_nodes(), b.n_nodes());
        for nid in 0..a.n_nodes() as NodeId {
            assert_eq!(a.is_leaf(nid), b.is_leaf(nid));
            if !a.is_leaf(nid) {
                assert_approx_eq!(a.split_cond(nid), b.split_cond(nid), 1e-5);
            }
        }
    }
}
