//! Per-(worker, node) scan state for column enumeration.

use std::collections::VecDeque;

use crate::data::Entry;
use crate::training::gradients::GradStats;
use crate::training::split::SplitEntry;
use crate::tree::NodeId;

/// Working memory of one worker for one candidate node while a column is
/// scanned in ascending value order.
///
/// At a scan position with candidate threshold `eta`, the accumulators
/// partition everything scanned so far:
///
/// - `stats`: every scanned instance.
/// - `stats_left`: value strictly below `eta`.
/// - `stats_c_left`: value below `eta - eps`, outside the whole band.
/// - `stats_unc_right`: value in `[eta, eta + eps)`, matching
///   `data_unc_right`.
/// - `stats_unc`: value in `[eta - eps, eta + eps)`, matching `data_unc`.
///
/// The queues drain monotonically as `eta` advances; an entry never
/// re-enters once popped, and `data_unc_right` is always a suffix-aligned
/// subset of `data_unc`.
#[derive(Debug, Clone)]
pub(crate) struct ScanState {
    pub stats: GradStats,
    pub stats_left: GradStats,
    pub stats_c_left: GradStats,
    pub stats_unc: GradStats,
    pub stats_unc_right: GradStats,
    /// Column-total statistics; only used by the within-column parallel
    /// path to derive suffix sums.
    pub stats_total: GradStats,
    pub data_unc_right: VecDeque<Entry>,
    pub data_unc: VecDeque<Entry>,
    /// Cardinality of `stats_c_left`.
    pub c_left_counter: u32,
    pub first_fvalue: f32,
    pub last_fvalue: f32,
    /// Best split seen by this worker for this node; survives across
    /// sweeps and columns until collected.
    pub best: SplitEntry,
}

impl ScanState {
    pub fn new() -> Self {
        Self {
            stats: GradStats::default(),
            stats_left: GradStats::default(),
            stats_c_left: GradStats::default(),
            stats_unc: GradStats::default(),
            stats_unc_right: GradStats::default(),
            stats_total: GradStats::default(),
            data_unc_right: VecDeque::new(),
            data_unc: VecDeque::new(),
            c_left_counter: 0,
            first_fvalue: 0.0,
            last_fvalue: 0.0,
            best: SplitEntry::none(),
        }
    }

    /// Clear everything a new sweep over a column needs reset. `best` is
    /// preserved: it aggregates across sweeps and columns.
    pub fn reset_scan(&mut self) {
        self.stats.clear();
        self.stats_left.clear();
        self.stats_c_left.clear();
        self.stats_unc.clear();
        self.stats_unc_right.clear();
        self.stats_total.clear();
        self.data_unc_right.clear();
        self.data_unc.clear();
        self.c_left_counter = 0;
        self.first_fvalue = 0.0;
        self.last_fvalue = 0.0;
    }
}

/// Reusable scratch for one enumeration task: per-node scan states plus the
/// midpoint pass's per-node cursors.
#[derive(Debug, Clone)]
pub(crate) struct ScanScratch {
    pub nodes: Vec<ScanState>,
    /// Most recent feature value seen per node during the midpoint pass;
    /// NaN marks "not seen yet".
    pub prev_fvalue: Vec<f32>,
    /// Nodes already corrected by the midpoint pass of this sweep.
    pub corrected: Vec<bool>,
}

impl ScanScratch {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            prev_fvalue: Vec::new(),
            corrected: Vec::new(),
        }
    }

    /// Grow to `num_nodes` and fully reset the states of the frontier
    /// nodes, including their `best` (a new feature batch starts).
    pub fn reset_feature(&mut self, num_nodes: usize, frontier: &[NodeId]) {
        if self.nodes.len() < num_nodes {
            self.nodes.resize_with(num_nodes, ScanState::new);
            self.prev_fvalue.resize(num_nodes, f32::NAN);
            self.corrected.resize(num_nodes, false);
        }
        for &nid in frontier {
            let state = &mut self.nodes[nid as usize];
            state.reset_scan();
            state.best = SplitEntry::none();
        }
    }

    /// Reset only the scan accumulators of the frontier, keeping `best`.
    /// Called at the start of every sweep over a column.
    pub fn reset_scan(&mut self, frontier: &[NodeId]) {
        for &nid in frontier {
            self.nodes[nid as usize].reset_scan();
        }
    }

    /// Reset the midpoint-pass cursors.
    pub fn reset_midpoint(&mut self) {
        self.prev_fvalue.fill(f32::NAN);
        self.corrected.fill(false);
    }
}
