//! Cross-worker reductions for the distributed column maker.
//!
//! Workers of the distributed variant each own a subset of feature columns
//! over the full row set. Two reductions keep them consistent:
//!
//! - the per-node best split is all-reduced with the [`SplitEntry`]
//!   dominance order (commutative and associative, so any reduction tree
//!   gives the same winner), and
//! - the set of instances that disagree with their node's default
//!   direction is all-reduced as a bitwise OR of per-worker bitmaps.
//!
//! The transport itself is out of scope here: implementations of
//! [`Collective`] are injected by the containing framework.
//! [`SingleProcess`] is the identity collective for one-worker groups and
//! doubles as the test default.

use fixedbitset::FixedBitSet;

use crate::training::split::SplitEntry;

/// All-reduce operations the distributed builder depends on.
///
/// Calls happen at phase boundaries on every worker with equal-length
/// inputs; implementations must deliver the same reduced value to all
/// workers.
pub trait Collective: Send + Sync {
    /// Replace each entry with the dominant entry across all workers.
    fn allreduce_splits(&self, entries: &mut [SplitEntry]);

    /// Replace the bitmap with the union across all workers.
    fn bitmap_or(&self, bits: &mut FixedBitSet);
}

/// Identity collective for a group of one.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleProcess;

impl Collective for SingleProcess {
    fn allreduce_splits(&self, _entries: &mut [SplitEntry]) {}

    fn bitmap_or(&self, _bits: &mut FixedBitSet) {}
}
