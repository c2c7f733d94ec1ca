//! Split evaluators.
//!
//! The builder never computes gains itself; it delegates to an injected
//! [`SplitEvaluator`]. Scoring calls are read-only and issued concurrently
//! from the enumeration workers, so implementations must be `Send + Sync`
//! and deterministic. `add_split` is the single mutating entry point and is
//! only invoked from the single-threaded commit phase, where evaluators
//! record whatever per-node state they propagate to descendants.

use crate::error::TrainError;
use crate::training::gradients::GradStats;
use crate::training::params::RobustParams;
use crate::tree::NodeId;

// ============================================================================
// SplitEvaluator trait
// ============================================================================

/// Capability set for scoring splits and computing leaf weights.
pub trait SplitEvaluator: Send + Sync {
    /// Newton-optimal leaf weight for a node with the given statistics.
    /// `parent` is the node's parent, `None` at the root.
    fn compute_weight(&self, parent: Option<NodeId>, stats: &GradStats) -> f32;

    /// Loss surrogate of a node held at `weight`.
    fn compute_score(&self, parent: Option<NodeId>, stats: &GradStats, weight: f32) -> f32;

    /// Score of splitting `node` on `feature` into the given sides,
    /// including regularization.
    fn compute_split_score(
        &self,
        node: NodeId,
        feature: u32,
        left: &GradStats,
        right: &GradStats,
    ) -> f32;

    /// Record a committed split so constraints propagate to descendants.
    fn add_split(
        &mut self,
        node: NodeId,
        left: NodeId,
        right: NodeId,
        feature: u32,
        left_weight: f32,
        right_weight: f32,
    );

    /// Independent instance for a new tree builder.
    fn host_clone(&self) -> Box<dyn SplitEvaluator>;
}

// ============================================================================
// Gain primitives
// ============================================================================

/// Soft thresholding for L1 regularization.
#[inline]
fn soft_threshold(g: f64, alpha: f64) -> f64 {
    if g > alpha {
        g - alpha
    } else if g < -alpha {
        g + alpha
    } else {
        0.0
    }
}

// ============================================================================
// ElasticNetEvaluator
// ============================================================================

/// Newton gain with L1 (`reg_alpha`) and L2 (`reg_lambda`) regularization.
///
/// ```text
/// weight = -soft_threshold(G, α) / (H + λ)
/// gain   =  soft_threshold(G, α)² / (H + λ)
/// ```
#[derive(Debug, Clone)]
pub struct ElasticNetEvaluator {
    reg_lambda: f32,
    reg_alpha: f32,
}

impl ElasticNetEvaluator {
    /// Create an evaluator with the given regularization strengths.
    pub fn new(reg_lambda: f32, reg_alpha: f32) -> Self {
        Self {
            reg_lambda,
            reg_alpha,
        }
    }

    #[inline]
    fn gain(&self, stats: &GradStats) -> f64 {
        let h = stats.sum_hess + self.reg_lambda as f64;
        if h <= 0.0 {
            return 0.0;
        }
        let g = soft_threshold(stats.sum_grad, self.reg_alpha as f64);
        g * g / h
    }
}

impl SplitEvaluator for ElasticNetEvaluator {
    fn compute_weight(&self, _parent: Option<NodeId>, stats: &GradStats) -> f32 {
        let h = stats.sum_hess + self.reg_lambda as f64;
        if h <= 0.0 {
            return 0.0;
        }
        (-soft_threshold(stats.sum_grad, self.reg_alpha as f64) / h) as f32
    }

    fn compute_score(&self, _parent: Option<NodeId>, stats: &GradStats, weight: f32) -> f32 {
        let g = soft_threshold(stats.sum_grad, self.reg_alpha as f64);
        let h = stats.sum_hess + self.reg_lambda as f64;
        let w = weight as f64;
        (-(2.0 * g * w + h * w * w)) as f32
    }

    fn compute_split_score(
        &self,
        _node: NodeId,
        _feature: u32,
        left: &GradStats,
        right: &GradStats,
    ) -> f32 {
        (self.gain(left) + self.gain(right)) as f32
    }

    fn add_split(
        &mut self,
        _node: NodeId,
        _left: NodeId,
        _right: NodeId,
        _feature: u32,
        _left_weight: f32,
        _right_weight: f32,
    ) {
    }

    fn host_clone(&self) -> Box<dyn SplitEvaluator> {
        Box::new(self.clone())
    }
}

// ============================================================================
// MonotonicEvaluator
// ============================================================================

/// Per-feature monotonic constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MonotonicConstraint {
    /// No constraint.
    #[default]
    None,
    /// Predictions must increase with the feature value.
    Increasing,
    /// Predictions must decrease with the feature value.
    Decreasing,
}

impl MonotonicConstraint {
    /// From the conventional integer encoding: 1, 0, -1.
    pub fn from_int(value: i32) -> Self {
        match value {
            1 => Self::Increasing,
            -1 => Self::Decreasing,
            _ => Self::None,
        }
    }
}

/// Weight interval a node's leaves must stay inside.
#[derive(Debug, Clone, Copy)]
struct WeightBounds {
    lower: f32,
    upper: f32,
}

impl WeightBounds {
    fn unbounded() -> Self {
        Self {
            lower: f32::NEG_INFINITY,
            upper: f32::INFINITY,
        }
    }

    #[inline]
    fn clamp(&self, weight: f32) -> f32 {
        weight.max(self.lower).min(self.upper)
    }
}

/// Wraps an inner evaluator with monotonic-constraint enforcement.
///
/// Bounds are tracked per node: when a split on a constrained feature
/// commits, the children inherit the parent's interval tightened at the
/// midpoint of the two child weights. Candidate splits whose clamped child
/// weights violate the constraint score negative infinity and are never
/// selected.
pub struct MonotonicEvaluator {
    inner: Box<dyn SplitEvaluator>,
    constraints: Vec<MonotonicConstraint>,
    bounds: Vec<WeightBounds>,
}

impl MonotonicEvaluator {
    /// Wrap `inner` with the given per-feature constraints.
    pub fn new(inner: Box<dyn SplitEvaluator>, constraints: Vec<MonotonicConstraint>) -> Self {
        Self {
            inner,
            constraints,
            bounds: vec![WeightBounds::unbounded()],
        }
    }

    #[inline]
    fn constraint(&self, feature: u32) -> MonotonicConstraint {
        self.constraints
            .get(feature as usize)
            .copied()
            .unwrap_or(MonotonicConstraint::None)
    }

    #[inline]
    fn node_bounds(&self, node: Option<NodeId>) -> WeightBounds {
        match node {
            Some(nid) => self
                .bounds
                .get(nid as usize)
                .copied()
                .unwrap_or_else(WeightBounds::unbounded),
            None => WeightBounds::unbounded(),
        }
    }

    fn ensure_node(&mut self, node: NodeId) {
        if self.bounds.len() <= node as usize {
            self.bounds
                .resize(node as usize + 1, WeightBounds::unbounded());
        }
    }
}

impl SplitEvaluator for MonotonicEvaluator {
    fn compute_weight(&self, parent: Option<NodeId>, stats: &GradStats) -> f32 {
        let weight = self.inner.compute_weight(parent, stats);
        self.node_bounds(parent).clamp(weight)
    }

    fn compute_score(&self, parent: Option<NodeId>, stats: &GradStats, weight: f32) -> f32 {
        self.inner.compute_score(parent, stats, weight)
    }

    fn compute_split_score(
        &self,
        node: NodeId,
        feature: u32,
        left: &GradStats,
        right: &GradStats,
    ) -> f32 {
        let left_weight = self.compute_weight(Some(node), left);
        let right_weight = self.compute_weight(Some(node), right);

        match self.constraint(feature) {
            MonotonicConstraint::Increasing if left_weight > right_weight => f32::NEG_INFINITY,
            MonotonicConstraint::Decreasing if left_weight < right_weight => f32::NEG_INFINITY,
            _ => {
                self.compute_score(Some(node), left, left_weight)
                    + self.compute_score(Some(node), right, right_weight)
            }
        }
    }

    fn add_split(
        &mut self,
        node: NodeId,
        left: NodeId,
        right: NodeId,
        feature: u32,
        left_weight: f32,
        right_weight: f32,
    ) {
        self.inner
            .add_split(node, left, right, feature, left_weight, right_weight);

        self.ensure_node(left.max(right));
        let parent = self.node_bounds(Some(node));
        let mid = (left_weight + right_weight) * 0.5;

        let (left_bounds, right_bounds) = match self.constraint(feature) {
            MonotonicConstraint::None => (parent, parent),
            MonotonicConstraint::Increasing => (
                WeightBounds {
                    lower: parent.lower,
                    upper: mid.min(parent.upper),
                },
                WeightBounds {
                    lower: mid.max(parent.lower),
                    upper: parent.upper,
                },
            ),
            MonotonicConstraint::Decreasing => (
                WeightBounds {
                    lower: mid.max(parent.lower),
                    upper: parent.upper,
                },
                WeightBounds {
                    lower: parent.lower,
                    upper: mid.min(parent.upper),
                },
            ),
        };
        self.bounds[left as usize] = left_bounds;
        self.bounds[right as usize] = right_bounds;
    }

    fn host_clone(&self) -> Box<dyn SplitEvaluator> {
        Box::new(MonotonicEvaluator::new(
            self.inner.host_clone(),
            self.constraints.clone(),
        ))
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Build the evaluator chain named by `params.split_evaluator`.
///
/// Names are comma-separated; `elastic_net` starts a chain and `monotonic`
/// wraps whatever precedes it, e.g. `"elastic_net,monotonic"`.
pub fn create_split_evaluator(
    params: &RobustParams,
) -> Result<Box<dyn SplitEvaluator>, TrainError> {
    let mut evaluator: Option<Box<dyn SplitEvaluator>> = None;
    for name in params
        .split_evaluator
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        evaluator = Some(match name {
            "elastic_net" => Box::new(ElasticNetEvaluator::new(
                params.reg_lambda,
                params.reg_alpha,
            )),
            "monotonic" => {
                let inner =
                    evaluator.ok_or_else(|| TrainError::UnknownEvaluator(name.to_string()))?;
                let constraints = params
                    .monotone_constraints
                    .iter()
                    .map(|&c| MonotonicConstraint::from_int(c))
                    .collect();
                Box::new(MonotonicEvaluator::new(inner, constraints))
            }
            other => return Err(TrainError::UnknownEvaluator(other.to_string())),
        });
    }
    evaluator.ok_or_else(|| TrainError::UnknownEvaluator(params.split_evaluator.clone()))
}
