//! Column-wise split enumeration under the adversarial uncertainty model.
//!
//! For every frontier node, a column is scanned in ascending feature-value
//! order. Each scanned value induces a candidate threshold
//! `eta = fvalue - eps`; instances whose value lies inside the band
//! `[eta - eps, eta + eps)` can be relocated across the threshold by an
//! adversary with budget eps. At every candidate threshold four partitions
//! are scored (the nominal one plus the three extreme adversarial
//! placements of the uncertain instances) and the *minimum* loss change is
//! recorded. The outer reduction then maximizes across thresholds and
//! features, so the committed split carries a gain that is a lower bound
//! under any perturbation within the budget.
//!
//! A second, non-robust path ([`SplitEnumerator::parallel_find_split`])
//! shares row chunks of a single column across workers and stitches their
//! partial sums; it exists for problems with very few features and does not
//! carry the uncertainty queues.

use rayon::prelude::*;

use crate::data::Entry;
use crate::training::builder::NodeEntry;
use crate::training::gradients::{GradStats, GradientPair};
use crate::training::logger::TrainingLogger;
use crate::training::params::{RobustParams, RT_EPS};
use crate::training::position::PositionMap;
use crate::training::scan::{ScanScratch, ScanState};
use crate::training::split::SplitEntry;
use crate::training::SplitEvaluator;
use crate::tree::NodeId;

/// Sweep direction. The scan itself always walks values ascending; the
/// direction decides which side of the split missing values follow and the
/// argument order handed to the evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Forward,
    Backward,
}

impl Direction {
    /// Backward sweeps store `default_left = true`.
    #[inline]
    pub fn default_left(self) -> bool {
        matches!(self, Direction::Backward)
    }
}

/// Read-only context shared by every enumeration task of one depth.
pub(crate) struct SplitEnumerator<'a> {
    pub params: &'a RobustParams,
    pub evaluator: &'a dyn SplitEvaluator,
    pub snode: &'a [NodeEntry],
    pub position: &'a PositionMap,
    pub qexpand: &'a [NodeId],
    pub gpair: &'a [GradientPair],
    pub logger: TrainingLogger,
}

impl<'a> SplitEnumerator<'a> {
    /// Loss change of the partition `(low, high)` at node `nid`, with the
    /// evaluator's argument order flipped for backward sweeps.
    #[inline]
    fn split_loss(
        &self,
        nid: NodeId,
        fid: u32,
        direction: Direction,
        low: &GradStats,
        high: &GradStats,
    ) -> f32 {
        let score = match direction {
            Direction::Forward => self.evaluator.compute_split_score(nid, fid, low, high),
            Direction::Backward => self.evaluator.compute_split_score(nid, fid, high, low),
        };
        score - self.snode[nid as usize].root_gain
    }

    /// Enumerate one column in one direction, updating per-node `best` in
    /// the scratch. The slice may be sorted ascending or descending by
    /// value; the scan is normalized to ascending either way.
    pub fn enumerate(&self, col: &[Entry], direction: Direction, fid: u32, scratch: &mut ScanScratch) {
        if col.is_empty() {
            return;
        }
        scratch.reset_scan(self.qexpand);

        if self.logger.debug_enabled() {
            self.logger.debug(format_args!(
                "feature {}: {} entries, {:?} sweep, eps={}",
                fid,
                col.len(),
                direction,
                self.params.robust_eps
            ));
        }

        let descending = col[0].fvalue > col[col.len() - 1].fvalue;
        if descending {
            self.scan_column(col.iter().rev(), direction, fid, scratch);
        } else {
            self.scan_column(col.iter(), direction, fid, scratch);
        }

        self.close_column(direction, fid, scratch);

        if descending {
            self.move_thresholds(col.iter().rev(), fid, scratch);
        } else {
            self.move_thresholds(col.iter(), fid, scratch);
        }
    }

    /// Main sweep over entries in ascending value order.
    fn scan_column<'e>(
        &self,
        entries: impl Iterator<Item = &'e Entry>,
        direction: Direction,
        fid: u32,
        scratch: &mut ScanScratch,
    ) {
        let eps = self.params.robust_eps;
        let mcw = self.params.min_child_weight;

        for entry in entries {
            let ridx = entry.index as usize;
            let Some(nid) = self.position.active_node(ridx) else {
                continue;
            };
            let g = self.gpair[ridx];
            let fvalue = entry.fvalue;
            let eta = fvalue - eps;
            let snode_stats = self.snode[nid as usize].stats;
            let state = &mut scratch.nodes[nid as usize];

            // First hit for this node: seed and move on.
            if state.stats.is_empty() {
                state.stats.add_pair(g);
                state.last_fvalue = fvalue;
                state.data_unc_right.push_back(*entry);
                state.data_unc.push_back(*entry);
                state.stats_unc_right.add_pair(g);
                state.stats_unc.add_pair(g);
                continue;
            }

            // Entries that dropped out of [eta, eta+eps) are now certainly
            // left of the threshold.
            while let Some(front) = state.data_unc_right.front() {
                if front.fvalue >= eta {
                    break;
                }
                let fg = self.gpair[front.index as usize];
                state.stats_left.add_pair(fg);
                state.stats_unc_right.sub_pair(fg);
                state.data_unc_right.pop_front();
            }
            // Entries that left the whole band are out of the adversary's
            // reach for every later threshold.
            while let Some(front) = state.data_unc.front() {
                if front.fvalue >= eta - eps {
                    break;
                }
                let fg = self.gpair[front.index as usize];
                state.stats_c_left.add_pair(fg);
                state.c_left_counter += 1;
                state.stats_unc.sub_pair(fg);
                state.data_unc.pop_front();
            }

            if fvalue != state.last_fvalue && state.stats.sufficient(mcw) {
                let nominal_right = GradStats::difference(&snode_stats, &state.stats_left);
                if nominal_right.sufficient(mcw) {
                    let mut loss_chg =
                        self.split_loss(nid, fid, direction, &state.stats_left, &nominal_right);

                    // Adversarial minimization over the extreme placements
                    // of the uncertain instances. The adversary is not
                    // bound by our admissibility rules, so these are
                    // compared unguarded.
                    if !state.data_unc.is_empty() {
                        let all_left =
                            GradStats::union_of(&state.stats_c_left, &state.stats_unc);
                        let c_right = GradStats::difference(&snode_stats, &all_left);
                        loss_chg = loss_chg
                            .min(self.split_loss(nid, fid, direction, &all_left, &c_right));

                        let all_right =
                            GradStats::difference(&snode_stats, &state.stats_c_left);
                        loss_chg = loss_chg.min(self.split_loss(
                            nid,
                            fid,
                            direction,
                            &state.stats_c_left,
                            &all_right,
                        ));

                        let swap_left =
                            GradStats::union_of(&state.stats_c_left, &state.stats_unc_right);
                        let swap_right = GradStats::difference(&snode_stats, &swap_left);
                        loss_chg = loss_chg
                            .min(self.split_loss(nid, fid, direction, &swap_left, &swap_right));
                    }

                    state.best.update(loss_chg, fid, eta, direction.default_left());
                }
            }

            // Absorb the current entry.
            state.stats.add_pair(g);
            state.last_fvalue = fvalue;
            state.data_unc_right.push_back(*entry);
            state.data_unc.push_back(*entry);
            state.stats_unc_right.add_pair(g);
            state.stats_unc.add_pair(g);
        }
    }

    /// All-data closing check: everything scanned against everything not,
    /// offered at a threshold beyond the scanned range.
    fn close_column(&self, direction: Direction, fid: u32, scratch: &mut ScanScratch) {
        let mcw = self.params.min_child_weight;
        let eps = self.params.robust_eps;

        for &nid in self.qexpand {
            let snode_stats = self.snode[nid as usize].stats;
            let state = &mut scratch.nodes[nid as usize];
            let rest = GradStats::difference(&snode_stats, &state.stats);
            if state.stats.sufficient(mcw) && rest.sufficient(mcw) {
                let loss_chg = self.split_loss(nid, fid, direction, &state.stats, &rest);
                let gap = state.last_fvalue.abs() + RT_EPS + eps;
                let delta = match direction {
                    Direction::Forward => gap,
                    Direction::Backward => -gap,
                };
                state.best.update(
                    loss_chg,
                    fid,
                    state.last_fvalue + delta,
                    direction.default_left(),
                );
            }
            if self.logger.debug_enabled() && state.best.is_valid() {
                self.logger.debug(format_args!(
                    "feature {}: node {} best loss_chg={} threshold={}",
                    fid, nid, state.best.loss_chg, state.best.split_value
                ));
            }
        }
    }

    /// Second ascending pass that moves a chosen threshold to the midpoint
    /// of the two observed values bracketing it. Each node is corrected at
    /// most once per sweep; `loss_chg` and the default direction stay put.
    fn move_thresholds<'e>(
        &self,
        entries: impl Iterator<Item = &'e Entry>,
        fid: u32,
        scratch: &mut ScanScratch,
    ) {
        scratch.reset_midpoint();

        for entry in entries {
            let ridx = entry.index as usize;
            let Some(nid) = self.position.active_node(ridx) else {
                continue;
            };
            let nid_us = nid as usize;
            let state = &mut scratch.nodes[nid_us];
            if state.best.split_index != fid || scratch.corrected[nid_us] {
                continue;
            }
            let prev = scratch.prev_fvalue[nid_us];
            if !prev.is_nan()
                && prev < state.best.split_value
                && state.best.split_value <= entry.fvalue
            {
                let midpoint = (entry.fvalue + prev) * 0.5;
                if self.logger.debug_enabled() {
                    self.logger.debug(format_args!(
                        "feature {}: node {} threshold {} -> {}",
                        fid, nid, state.best.split_value, midpoint
                    ));
                }
                state.best.set_split_value(midpoint);
                scratch.corrected[nid_us] = true;
            }
            scratch.prev_fvalue[nid_us] = entry.fvalue;
        }
    }

    /// Harvest the per-node winners of one feature task.
    pub fn collect_best(&self, scratch: &ScanScratch) -> Vec<(NodeId, SplitEntry)> {
        self.qexpand
            .iter()
            .filter_map(|&nid| {
                let best = scratch.nodes[nid as usize].best;
                best.is_valid().then_some((nid, best))
            })
            .collect()
    }

    // ========================================================================
    // Within-column parallel path (non-robust)
    // ========================================================================

    /// Split one column's rows across workers: each worker accumulates its
    /// chunk, an exclusive prefix scan stitches the chunks per node, chunk
    /// boundaries become candidate thresholds, and a parallel rescan adds
    /// the in-chunk candidates. No uncertainty handling on this path.
    pub fn parallel_find_split(
        &self,
        col: &[Entry],
        fid: u32,
        nthread: usize,
        need_forward: bool,
        need_backward: bool,
    ) -> Vec<(NodeId, SplitEntry)> {
        if col.is_empty() {
            return Vec::new();
        }
        let num_nodes = self.snode.len();
        let step = col.len().div_ceil(nthread.max(1));
        let chunks: Vec<&[Entry]> = col.chunks(step).collect();

        // Per-chunk accumulation.
        let mut temps: Vec<Vec<ScanState>> = chunks
            .par_iter()
            .map(|chunk| {
                let mut temp: Vec<ScanState> = (0..num_nodes).map(|_| ScanState::new()).collect();
                for entry in *chunk {
                    let Some(nid) = self.position.active_node(entry.index as usize) else {
                        continue;
                    };
                    let state = &mut temp[nid as usize];
                    if state.stats.is_empty() {
                        state.first_fvalue = entry.fvalue;
                    }
                    state.stats.add_pair(self.gpair[entry.index as usize]);
                    state.last_fvalue = entry.fvalue;
                }
                temp
            })
            .collect();

        let mcw = self.params.min_child_weight;

        // Stitch chunks per node and emit boundary candidates.
        for &nid in self.qexpand {
            let nid_us = nid as usize;
            let snode_stats = self.snode[nid_us].stats;
            let root_gain = self.snode[nid_us].root_gain;

            // Exclusive prefix scan across chunks; remember the original
            // per-chunk extents.
            let mut sum = GradStats::default();
            let mut extents: Vec<(bool, f32, f32)> = Vec::with_capacity(temps.len());
            for temp in temps.iter_mut() {
                let state = &mut temp[nid_us];
                let seen = !state.stats.is_empty();
                extents.push((seen, state.first_fvalue, state.last_fvalue));
                let chunk_stats = state.stats;
                state.stats = sum;
                sum.add(&chunk_stats);
            }

            let mut last_seen: Option<f32> = None;
            for (t, temp) in temps.iter_mut().enumerate() {
                let state = &mut temp[nid_us];
                state.stats_total = sum;
                let (seen, first, last) = extents[t];

                // The rescan resumes from the last value of earlier chunks.
                if let Some(prev) = last_seen {
                    state.first_fvalue = prev;
                }

                let fsplit = match (t, last_seen) {
                    (0, _) if seen => Some(first - RT_EPS),
                    (_, Some(prev)) if seen && prev != first => Some((prev + first) * 0.5),
                    _ => None,
                };

                if let Some(fsplit) = fsplit {
                    let prefix = state.stats;
                    if t != 0 && need_forward {
                        let rest = GradStats::difference(&snode_stats, &prefix);
                        if prefix.sufficient(mcw) && rest.sufficient(mcw) {
                            let loss_chg = self
                                .evaluator
                                .compute_split_score(nid, fid, &prefix, &rest)
                                - root_gain;
                            state.best.update(loss_chg, fid, fsplit, false);
                        }
                    }
                    if need_backward {
                        let suffix = GradStats::difference(&sum, &prefix);
                        let rest = GradStats::difference(&snode_stats, &suffix);
                        if suffix.sufficient(mcw) && rest.sufficient(mcw) {
                            let loss_chg = self
                                .evaluator
                                .compute_split_score(nid, fid, &suffix, &rest)
                                - root_gain;
                            state.best.update(loss_chg, fid, fsplit, true);
                        }
                    }
                }

                if seen {
                    last_seen = Some(last);
                }
            }

            // Everything observed against the unobserved remainder.
            if need_backward {
                if let Some(last) = last_seen {
                    let state = &mut temps.last_mut().expect("chunks are non-empty")[nid_us];
                    let rest = GradStats::difference(&snode_stats, &sum);
                    if sum.sufficient(mcw) && rest.sufficient(mcw) {
                        let loss_chg = self
                            .evaluator
                            .compute_split_score(nid, fid, &sum, &rest)
                            - root_gain;
                        state.best.update(loss_chg, fid, last + RT_EPS, true);
                    }
                }
            }
        }

        // Parallel rescan: in-chunk candidates at value-change midpoints.
        chunks
            .par_iter()
            .zip(temps.par_iter_mut())
            .for_each(|(chunk, temp)| {
                for entry in *chunk {
                    let Some(nid) = self.position.active_node(entry.index as usize) else {
                        continue;
                    };
                    let nid_us = nid as usize;
                    let snode_stats = self.snode[nid_us].stats;
                    let root_gain = self.snode[nid_us].root_gain;
                    let g = self.gpair[entry.index as usize];
                    let state = &mut temp[nid_us];

                    if state.stats.is_empty() {
                        state.stats.add_pair(g);
                        state.first_fvalue = entry.fvalue;
                        continue;
                    }
                    if entry.fvalue != state.first_fvalue {
                        let fsplit = (entry.fvalue + state.first_fvalue) * 0.5;
                        if need_forward {
                            let rest = GradStats::difference(&snode_stats, &state.stats);
                            if state.stats.sufficient(mcw) && rest.sufficient(mcw) {
                                let loss_chg = self
                                    .evaluator
                                    .compute_split_score(nid, fid, &state.stats, &rest)
                                    - root_gain;
                                state.best.update(loss_chg, fid, fsplit, false);
                            }
                        }
                        if need_backward {
                            let suffix =
                                GradStats::difference(&state.stats_total, &state.stats);
                            let rest = GradStats::difference(&snode_stats, &suffix);
                            if rest.sufficient(mcw) && suffix.sufficient(mcw) {
                                let loss_chg = self
                                    .evaluator
                                    .compute_split_score(nid, fid, &rest, &suffix)
                                    - root_gain;
                                state.best.update(loss_chg, fid, fsplit, true);
                            }
                        }
                    }
                    state.stats.add_pair(g);
                    state.first_fvalue = entry.fvalue;
                }
            });

        let mut out = Vec::new();
        for temp in &temps {
            for &nid in self.qexpand {
                let best = temp[nid as usize].best;
                if best.is_valid() {
                    out.push((nid, best));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert_approx_eq;
    use crate::training::evaluator::ElasticNetEvaluator;
    use crate::training::logger::Verbosity;

    /// Context over one root node with the given gradients, all instances
    /// active.
    struct Fixture {
        params: RobustParams,
        evaluator: ElasticNetEvaluator,
        snode: Vec<NodeEntry>,
        position: PositionMap,
        qexpand: Vec<NodeId>,
        gpair: Vec<GradientPair>,
    }

    impl Fixture {
        fn new(gpair: Vec<GradientPair>, robust_eps: f32, min_child_weight: f32) -> Self {
            let mut params = RobustParams::default();
            params.robust_eps = robust_eps;
            params.min_child_weight = min_child_weight;
            params.reg_lambda = 1.0;

            let evaluator = ElasticNetEvaluator::new(params.reg_lambda, params.reg_alpha);
            let mut stats = GradStats::default();
            for &g in &gpair {
                stats.add_pair(g);
            }
            let weight = evaluator.compute_weight(None, &stats);
            let root_gain = evaluator.compute_score(None, &stats, weight);
            let snode = vec![NodeEntry {
                stats,
                root_gain,
                weight,
                best: SplitEntry::none(),
            }];

            Self {
                params,
                evaluator,
                snode,
                position: PositionMap::new(gpair.len()),
                qexpand: vec![0],
                gpair,
            }
        }

        fn enumerator(&self) -> SplitEnumerator<'_> {
            SplitEnumerator {
                params: &self.params,
                evaluator: &self.evaluator,
                snode: &self.snode,
                position: &self.position,
                qexpand: &self.qexpand,
                gpair: &self.gpair,
                logger: TrainingLogger::new(Verbosity::Silent),
            }
        }
    }

    fn entries(values: &[f32]) -> Vec<Entry> {
        let mut v: Vec<Entry> = values
            .iter()
            .enumerate()
            .map(|(i, &f)| Entry::new(i as u32, f))
            .collect();
        v.sort_by(|a, b| a.fvalue.partial_cmp(&b.fvalue).unwrap());
        v
    }

    fn unit_pairs(grads: &[f32]) -> Vec<GradientPair> {
        grads.iter().map(|&g| GradientPair::new(g, 1.0)).collect()
    }

    #[test]
    fn separated_clusters_split_at_boundary() {
        let fx = Fixture::new(unit_pairs(&[1.0, 1.0, 1.0, -1.0, -1.0, -1.0]), 0.0, 1.0);
        let col = entries(&[1.0, 1.0, 1.0, 10.0, 10.0, 10.0]);

        let mut scratch = ScanScratch::new();
        scratch.reset_feature(1, &fx.qexpand);
        let e = fx.enumerator();
        e.enumerate(&col, Direction::Backward, 0, &mut scratch);

        let best = scratch.nodes[0].best;
        assert!(best.is_valid());
        // midpoint pass moves the threshold between the clusters
        assert_approx_eq!(best.split_value, 5.5, 1e-6);
        // gain = 9/4 + 9/4 with lambda = 1
        assert_approx_eq!(best.loss_chg, 4.5, 1e-5);
        assert!(best.default_left);
    }

    #[test]
    fn constant_column_finds_nothing() {
        let fx = Fixture::new(unit_pairs(&[1.0, -1.0, 1.0, -1.0]), 0.0, 1.0);
        let col = entries(&[3.0, 3.0, 3.0, 3.0]);

        let mut scratch = ScanScratch::new();
        scratch.reset_feature(1, &fx.qexpand);
        let e = fx.enumerator();
        e.enumerate(&col, Direction::Forward, 0, &mut scratch);
        e.enumerate(&col, Direction::Backward, 0, &mut scratch);

        assert!(!scratch.nodes[0].best.is_valid());
    }

    #[test]
    fn descending_input_matches_ascending() {
        let fx = Fixture::new(unit_pairs(&[1.0, 1.0, -1.0, -1.0]), 0.5, 1.0);
        let asc = entries(&[1.0, 2.0, 5.0, 6.0]);
        let desc: Vec<Entry> = asc.iter().rev().copied().collect();

        let e = fx.enumerator();
        let mut s1 = ScanScratch::new();
        s1.reset_feature(1, &fx.qexpand);
        e.enumerate(&asc, Direction::Backward, 0, &mut s1);

        let mut s2 = ScanScratch::new();
        s2.reset_feature(1, &fx.qexpand);
        e.enumerate(&desc, Direction::Backward, 0, &mut s2);

        assert_eq!(s1.nodes[0].best, s2.nodes[0].best);
    }

    #[test]
    fn overlapping_bands_collapse_gain_to_leaf() {
        // At eps large enough for the left cluster to cross, the adversary
        // can empty one side; the minimum drives the gain to zero and no
        // candidate survives the monotone update.
        let fx = Fixture::new(unit_pairs(&[1.0, 1.0, 1.0, -1.0, -1.0, -1.0]), 5.5, 1.0);
        let col = entries(&[1.0, 1.0, 1.0, 10.0, 10.0, 10.0]);

        let mut scratch = ScanScratch::new();
        scratch.reset_feature(1, &fx.qexpand);
        let e = fx.enumerator();
        e.enumerate(&col, Direction::Backward, 0, &mut scratch);

        let best = scratch.nodes[0].best;
        assert!(best.loss_chg <= RT_EPS);
    }

    #[test]
    fn robust_gain_shrinks_but_split_survives_midrange_eps() {
        // Three distinct values: with a certain-left block present, the
        // adversarial placements reduce the gain without zeroing it.
        let grads = unit_pairs(&[1.0, 1.0, 1.0, 1.0, -1.0, -1.0, -1.0, -1.0]);
        let values = [0.0, 0.0, 1.0, 1.0, 2.0, 2.0, 3.0, 3.0];

        let nominal = {
            let fx = Fixture::new(grads.clone(), 0.0, 1.0);
            let mut scratch = ScanScratch::new();
            scratch.reset_feature(1, &fx.qexpand);
            fx.enumerator()
                .enumerate(&entries(&values), Direction::Backward, 0, &mut scratch);
            scratch.nodes[0].best
        };
        let robust = {
            let fx = Fixture::new(grads, 0.6, 1.0);
            let mut scratch = ScanScratch::new();
            scratch.reset_feature(1, &fx.qexpand);
            fx.enumerator()
                .enumerate(&entries(&values), Direction::Backward, 0, &mut scratch);
            scratch.nodes[0].best
        };

        assert!(nominal.is_valid());
        assert!(robust.is_valid());
        assert!(robust.loss_chg > RT_EPS);
        assert!(robust.loss_chg < nominal.loss_chg);
    }

    #[test]
    fn best_loss_is_non_increasing_in_eps() {
        let grads = unit_pairs(&[2.0, 1.0, 1.0, -1.0, -1.0, -2.0]);
        let values = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0];

        let mut last = f32::INFINITY;
        for eps in [0.0, 0.25, 0.5, 0.75, 1.0, 1.5, 2.0] {
            let fx = Fixture::new(grads.clone(), eps, 1.0);
            let mut scratch = ScanScratch::new();
            scratch.reset_feature(1, &fx.qexpand);
            let e = fx.enumerator();
            e.enumerate(&entries(&values), Direction::Forward, 0, &mut scratch);
            e.enumerate(&entries(&values), Direction::Backward, 0, &mut scratch);
            let loss = scratch.nodes[0].best.loss_chg;
            assert!(
                loss <= last + 1e-6,
                "loss {} at eps {} exceeds previous {}",
                loss,
                eps,
                last
            );
            last = loss;
        }
    }

    #[test]
    fn excluded_instances_are_invisible() {
        // Instance 2 filtered out: enumeration must match a run where it
        // never existed.
        let mut fx = Fixture::new(unit_pairs(&[1.0, 1.0, -5.0, -1.0, -1.0]), 0.0, 1.0);
        // rebuild root stats without instance 2
        let mut stats = GradStats::default();
        for (i, &g) in fx.gpair.iter().enumerate() {
            if i != 2 {
                stats.add_pair(g);
            }
        }
        fx.snode[0].stats = stats;
        fx.position.exclude(2);
        let col = entries(&[1.0, 1.0, 2.0, 10.0, 10.0]);

        let mut scratch = ScanScratch::new();
        scratch.reset_feature(1, &fx.qexpand);
        let e = fx.enumerator();
        e.enumerate(&col, Direction::Backward, 0, &mut scratch);

        let with_hole = scratch.nodes[0].best;

        let fx2 = Fixture::new(unit_pairs(&[1.0, 1.0, -1.0, -1.0]), 0.0, 1.0);
        let col2 = vec![
            Entry::new(0, 1.0),
            Entry::new(1, 1.0),
            Entry::new(2, 10.0),
            Entry::new(3, 10.0),
        ];
        let mut scratch2 = ScanScratch::new();
        scratch2.reset_feature(1, &fx2.qexpand);
        fx2.enumerator()
            .enumerate(&col2, Direction::Backward, 0, &mut scratch2);
        let without = scratch2.nodes[0].best;

        assert_eq!(with_hole.split_value, without.split_value);
        assert_approx_eq!(with_hole.loss_chg, without.loss_chg, 1e-6);
    }

    #[test]
    fn scan_state_invariants_hold_after_sweep() {
        let fx = Fixture::new(unit_pairs(&[1.0, 1.0, -1.0, -1.0, 1.0]), 0.7, 0.0);
        let col = entries(&[0.0, 0.5, 1.0, 2.0, 3.0]);

        let mut scratch = ScanScratch::new();
        scratch.reset_feature(1, &fx.qexpand);
        let e = fx.enumerator();
        e.enumerate(&col, Direction::Forward, 0, &mut scratch);

        let state = &scratch.nodes[0];
        // everything scanned equals the node total
        assert_approx_eq!(
            (state.stats.sum_hess - fx.snode[0].stats.sum_hess) as f32,
            0.0,
            1e-9
        );
        // queue counter consistency
        assert_eq!(state.c_left_counter as usize, col.len() - state.data_unc.len());
        // the right-window queue is the tail of the band queue
        let tail_start = state.data_unc.len() - state.data_unc_right.len();
        for (i, entry) in state.data_unc_right.iter().enumerate() {
            assert_eq!(entry, &state.data_unc[tail_start + i]);
        }
        // partition identity: certain-left + band = all scanned
        let lhs = GradStats::union_of(&state.stats_c_left, &state.stats_unc);
        assert_approx_eq!((lhs.sum_grad - state.stats.sum_grad) as f32, 0.0, 1e-6);
        assert_approx_eq!((lhs.sum_hess - state.stats.sum_hess) as f32, 0.0, 1e-6);
    }

    #[test]
    fn parallel_path_matches_serial_on_eps_zero() {
        let grads = unit_pairs(&[1.0, 2.0, 1.0, -1.0, -2.0, -1.0, 0.5, -0.5]);
        let values = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0];
        let fx = Fixture::new(grads, 0.0, 1.0);
        let col = entries(&values);
        let e = fx.enumerator();

        let mut scratch = ScanScratch::new();
        scratch.reset_feature(1, &fx.qexpand);
        e.enumerate(&col, Direction::Forward, 0, &mut scratch);
        e.enumerate(&col, Direction::Backward, 0, &mut scratch);
        let serial = scratch.nodes[0].best;

        for nthread in [1, 2, 3, 8] {
            let candidates = e.parallel_find_split(&col, 0, nthread, true, true);
            let mut parallel = SplitEntry::none();
            for (nid, entry) in candidates {
                assert_eq!(nid, 0);
                parallel.update_entry(&entry);
            }
            assert_approx_eq!(parallel.loss_chg, serial.loss_chg, 1e-5);
            assert_approx_eq!(parallel.split_value, serial.split_value, 1e-5);
        }
    }
}
