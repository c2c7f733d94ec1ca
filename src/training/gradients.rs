//! Gradient pairs and their running statistics.

use crate::data::CscMatrix;
use crate::error::TrainError;

/// First- and second-order gradient of the loss for one instance.
///
/// A negative hessian marks the instance as deleted for the current tree;
/// such instances are excluded from every statistics pass.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GradientPair {
    /// First-order gradient.
    pub grad: f32,
    /// Second-order gradient (hessian).
    pub hess: f32,
}

impl GradientPair {
    /// Create a new gradient pair.
    #[inline]
    pub fn new(grad: f32, hess: f32) -> Self {
        Self { grad, hess }
    }

    /// True if the instance is deleted for the current tree.
    #[inline]
    pub fn is_filtered(&self) -> bool {
        self.hess < 0.0
    }
}

/// Commutative accumulator of gradient sums.
///
/// Sums are kept in f64: a tree-level accumulation over millions of f32
/// gradients loses digits otherwise. The type is closed under `add` and
/// `subtract`; subtraction of a previously-added value may leave a tiny
/// negative residue from floating error, which callers tolerate (the
/// sufficiency test uses plain `>=` with no slack).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GradStats {
    /// Sum of first-order gradients.
    pub sum_grad: f64,
    /// Sum of hessians.
    pub sum_hess: f64,
}

impl GradStats {
    /// Accumulate one instance.
    #[inline]
    pub fn add_pair(&mut self, p: GradientPair) {
        self.sum_grad += p.grad as f64;
        self.sum_hess += p.hess as f64;
    }

    /// Remove one instance.
    #[inline]
    pub fn sub_pair(&mut self, p: GradientPair) {
        self.sum_grad -= p.grad as f64;
        self.sum_hess -= p.hess as f64;
    }

    /// Accumulate another statistic.
    #[inline]
    pub fn add(&mut self, other: &GradStats) {
        self.sum_grad += other.sum_grad;
        self.sum_hess += other.sum_hess;
    }

    /// Remove another statistic.
    #[inline]
    pub fn subtract(&mut self, other: &GradStats) {
        self.sum_grad -= other.sum_grad;
        self.sum_hess -= other.sum_hess;
    }

    /// `a - b` as a new statistic.
    #[inline]
    pub fn difference(a: &GradStats, b: &GradStats) -> GradStats {
        GradStats {
            sum_grad: a.sum_grad - b.sum_grad,
            sum_hess: a.sum_hess - b.sum_hess,
        }
    }

    /// `a + b` as a new statistic (the monoid union).
    #[inline]
    pub fn union_of(a: &GradStats, b: &GradStats) -> GradStats {
        GradStats {
            sum_grad: a.sum_grad + b.sum_grad,
            sum_hess: a.sum_hess + b.sum_hess,
        }
    }

    /// Reset to zero.
    #[inline]
    pub fn clear(&mut self) {
        *self = GradStats::default();
    }

    /// True if no hessian mass has accumulated (up to floating residue).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sum_hess.abs() <= f64::EPSILON
    }

    /// Sufficiency test against the minimum child weight. Exact `>=`.
    #[inline]
    pub fn sufficient(&self, min_child_weight: f32) -> bool {
        self.sum_hess >= min_child_weight as f64
    }
}

/// Validate the gradient vector against the feature matrix before building.
///
/// Shape mismatch or an out-of-range column entry is fatal for the whole
/// update.
pub fn check_gradients(gpair: &[GradientPair], matrix: &CscMatrix) -> Result<(), TrainError> {
    if gpair.len() != matrix.num_rows() {
        return Err(TrainError::GradientShapeMismatch {
            rows: matrix.num_rows(),
            gradients: gpair.len(),
        });
    }
    if let Some(max_index) = matrix.max_row_index() {
        if max_index as usize >= gpair.len() {
            return Err(TrainError::InstanceOutOfBounds {
                index: max_index as usize,
                rows: gpair.len(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_subtract_roundtrip() {
        let mut stats = GradStats::default();
        stats.add_pair(GradientPair::new(1.5, 1.0));
        stats.add_pair(GradientPair::new(-0.5, 2.0));
        assert_eq!(stats.sum_grad, 1.0);
        assert_eq!(stats.sum_hess, 3.0);

        stats.sub_pair(GradientPair::new(1.5, 1.0));
        assert_eq!(stats.sum_grad, -0.5);
        assert_eq!(stats.sum_hess, 2.0);
    }

    #[test]
    fn union_matches_add() {
        let mut a = GradStats::default();
        a.add_pair(GradientPair::new(1.0, 1.0));
        let mut b = GradStats::default();
        b.add_pair(GradientPair::new(2.0, 3.0));

        let u = GradStats::union_of(&a, &b);
        let mut c = a;
        c.add(&b);
        assert_eq!(u, c);
    }

    #[test]
    fn difference_is_inverse_of_union() {
        let a = GradStats {
            sum_grad: 5.0,
            sum_hess: 4.0,
        };
        let b = GradStats {
            sum_grad: 2.0,
            sum_hess: 1.0,
        };
        let d = GradStats::difference(&GradStats::union_of(&a, &b), &b);
        assert_eq!(d, a);
    }

    #[test]
    fn empty_and_sufficient() {
        let mut stats = GradStats::default();
        assert!(stats.is_empty());
        assert!(stats.sufficient(0.0));
        assert!(!stats.sufficient(1.0));

        stats.add_pair(GradientPair::new(0.0, 1.0));
        assert!(!stats.is_empty());
        assert!(stats.sufficient(1.0));
    }

    #[test]
    fn filtered_instance_flag() {
        assert!(GradientPair::new(1.0, -1.0).is_filtered());
        assert!(!GradientPair::new(1.0, 0.0).is_filtered());
    }

    #[test]
    fn check_rejects_shape_mismatch() {
        let matrix = CscMatrix::from_column_major(&[1.0, 2.0], 2, 1);
        let gpair = vec![GradientPair::new(1.0, 1.0)];
        assert!(matches!(
            check_gradients(&gpair, &matrix),
            Err(TrainError::GradientShapeMismatch { rows: 2, gradients: 1 })
        ));
    }
}
