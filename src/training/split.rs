//! Candidate split bookkeeping.
//!
//! A [`SplitEntry`] is the unit of reduction across features, scan
//! directions, workers, and (in the distributed variant) processes. Its
//! update rule is a total order, so merging any number of entries in any
//! order and association yields the same winner.

/// Sentinel feature id of an entry holding no split.
const NO_SPLIT: u32 = u32::MAX;

/// Best split found so far for one node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitEntry {
    /// Loss change of the split; for robust enumeration this is the
    /// worst case over the adversary's choices.
    pub loss_chg: f32,
    /// Feature to split on.
    pub split_index: u32,
    /// Threshold; values strictly below go left.
    pub split_value: f32,
    /// Default direction for missing values.
    pub default_left: bool,
}

impl Default for SplitEntry {
    fn default() -> Self {
        Self::none()
    }
}

impl SplitEntry {
    /// An entry holding no split.
    pub fn none() -> Self {
        Self {
            loss_chg: 0.0,
            split_index: NO_SPLIT,
            split_value: 0.0,
            default_left: false,
        }
    }

    /// True if this entry holds an actual candidate.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.split_index != NO_SPLIT
    }

    /// Would a candidate with these fields replace the current entry?
    ///
    /// Higher `loss_chg` wins; a valid entry beats an empty one at equal
    /// `loss_chg`; remaining ties go to the lower feature id, then the
    /// lower threshold. The relation is a strict total order, which makes
    /// reductions independent of merge order and worker count.
    #[inline]
    fn replaced_by(&self, loss_chg: f32, split_index: u32, split_value: f32) -> bool {
        if split_index == NO_SPLIT {
            return false;
        }
        if loss_chg != self.loss_chg {
            return loss_chg > self.loss_chg;
        }
        if !self.is_valid() {
            return true;
        }
        if split_index != self.split_index {
            return split_index < self.split_index;
        }
        split_value < self.split_value
    }

    /// Offer a candidate; keep the dominant one. Returns true on replace.
    pub fn update(
        &mut self,
        loss_chg: f32,
        split_index: u32,
        split_value: f32,
        default_left: bool,
    ) -> bool {
        if self.replaced_by(loss_chg, split_index, split_value) {
            self.loss_chg = loss_chg;
            self.split_index = split_index;
            self.split_value = split_value;
            self.default_left = default_left;
            true
        } else {
            false
        }
    }

    /// Merge another entry; keep the dominant one. Returns true on replace.
    pub fn update_entry(&mut self, other: &SplitEntry) -> bool {
        if self.replaced_by(other.loss_chg, other.split_index, other.split_value) {
            *self = *other;
            true
        } else {
            false
        }
    }

    /// Move the threshold without touching the loss change or direction.
    /// Used by the midpoint post-pass.
    #[inline]
    pub fn set_split_value(&mut self, value: f32) {
        self.split_value = value;
    }

    /// Reduce two entries to the dominant one. Commutative and associative.
    pub fn reduce(a: SplitEntry, b: SplitEntry) -> SplitEntry {
        let mut out = a;
        out.update_entry(&b);
        out
    }
}
