//! Fatal training errors.
//!
//! Everything here aborts the current `update` call. Recoverable conditions
//! (an inadmissible candidate split, a node with no positive-gain split) are
//! handled inline during enumeration and never surface as errors.

use thiserror::Error;

/// Errors surfaced to the outer booster from a tree update.
#[derive(Debug, Clone, Error)]
pub enum TrainError {
    /// The updater can only grow a fresh tree.
    #[error("tree already has {n_nodes} nodes: the column maker can only grow a new tree")]
    TreeNotEmpty { n_nodes: usize },

    /// Gradient vector shape does not match the feature matrix.
    #[error("gradient vector length ({gradients}) does not match number of rows ({rows})")]
    GradientShapeMismatch { rows: usize, gradients: usize },

    /// A column entry references an instance outside the gradient vector.
    #[error("instance index {index} out of bounds (num_rows = {rows})")]
    InstanceOutOfBounds { index: usize, rows: usize },

    /// No usable feature columns after sampling.
    #[error("no non-empty feature columns available for split finding")]
    EmptyFeatureSet,

    /// A reduced default-direction bitmap flagged an instance that sits on a
    /// finalized leaf locally.
    #[error("inconsistent reduce result for instance {index}")]
    InconsistentReduce { index: usize },

    /// A configuration value failed to parse or violates its admissible range.
    #[error("invalid value '{value}' for parameter '{key}'")]
    InvalidParam { key: String, value: String },

    /// The distributed column maker grows exactly one tree per update call.
    #[error("distributed column maker supports one tree per update, got {got}")]
    MultipleTrees { got: usize },

    /// Updater name not present in the registry.
    #[error("unknown tree updater '{0}'")]
    UnknownUpdater(String),

    /// Split evaluator name not present in the registry.
    #[error("unknown split evaluator '{0}'")]
    UnknownEvaluator(String),
}
