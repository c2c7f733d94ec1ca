//! Training configuration.
//!
//! [`RobustParams`] carries every option the updaters recognize. Two entry
//! points: a fluent [`RobustParamsBuilder`] for programmatic use, and
//! [`RobustParams::update_from_args`] for the key-value surface the outer
//! booster drives (unknown keys are ignored; malformed values are fatal).

use derive_builder::Builder;

use crate::error::TrainError;

/// Tiny epsilon used for commit thresholds and split-value nudges.
pub const RT_EPS: f32 = 1e-6;

/// Which side missing values follow when a column's default direction is
/// not learned from the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DefaultDirection {
    /// Learn the direction per split from forward/backward sweeps.
    #[default]
    Learn,
    /// Missing values always go left.
    Left,
    /// Missing values always go right.
    Right,
}

/// How split finding is parallelized within one depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParallelOption {
    /// One worker per feature column (the robust path).
    #[default]
    Feature,
    /// Workers share row chunks of each column (non-robust alternate path).
    WithinColumn,
    /// Pick per depth: within-column when `2 * num_features < workers`.
    Auto,
}

impl ParallelOption {
    /// Resolve `Auto` for a concrete feature batch and worker count.
    pub fn resolve(self, num_features: usize, nthread: usize) -> ParallelOption {
        match self {
            ParallelOption::Auto => {
                if num_features * 2 < nthread {
                    ParallelOption::WithinColumn
                } else {
                    ParallelOption::Feature
                }
            }
            other => other,
        }
    }
}

/// Configuration for the robust column maker.
#[derive(Debug, Clone, Builder)]
#[builder(setter(into), default)]
pub struct RobustParams {
    /// Shrinkage applied to leaf weights on commit.
    pub learning_rate: f32,
    /// Hard depth cap for tree growth.
    pub max_depth: u32,
    /// Minimum hessian sum per child for a candidate split.
    pub min_child_weight: f32,
    /// Bernoulli row-retention rate per tree.
    pub subsample: f32,
    /// Feature fraction retained at tree initialization.
    pub colsample_bytree: f32,
    /// Feature fraction retained per depth.
    pub colsample_bylevel: f32,
    /// Adversarial budget on feature values; 0 recovers the standard
    /// algorithm.
    pub robust_eps: f32,
    /// Emit per-column enumeration diagnostics on stderr.
    pub robust_training_verbose: bool,
    /// Parallelization mode for split finding.
    pub parallel_option: ParallelOption,
    /// Split evaluator chain, e.g. `"elastic_net"` or
    /// `"elastic_net,monotonic"`.
    pub split_evaluator: String,
    /// L2 regularization on leaf weights.
    pub reg_lambda: f32,
    /// L1 regularization on leaf weights.
    pub reg_alpha: f32,
    /// Default direction policy for missing values.
    pub default_direction: DefaultDirection,
    /// Column density above which a dense column skips the forward sweep.
    pub opt_dense_col: f32,
    /// Per-feature monotonic constraints (1, 0, -1).
    pub monotone_constraints: Vec<i32>,
    /// Random seed for row and feature sampling.
    pub seed: u64,
    /// Worker count; 0 uses the ambient rayon pool size.
    pub nthread: usize,
}

impl Default for RobustParams {
    fn default() -> Self {
        Self {
            learning_rate: 0.3,
            max_depth: 6,
            min_child_weight: 1.0,
            subsample: 1.0,
            colsample_bytree: 1.0,
            colsample_bylevel: 1.0,
            robust_eps: 0.0,
            robust_training_verbose: false,
            parallel_option: ParallelOption::Feature,
            split_evaluator: "elastic_net".to_string(),
            reg_lambda: 1.0,
            reg_alpha: 0.0,
            default_direction: DefaultDirection::Learn,
            opt_dense_col: 1.0,
            monotone_constraints: Vec::new(),
            seed: 0,
            nthread: 0,
        }
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, TrainError> {
    value.parse().map_err(|_| TrainError::InvalidParam {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, TrainError> {
    match value {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        _ => Err(TrainError::InvalidParam {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

impl RobustParams {
    /// Apply key-value configuration pairs. Unknown keys are ignored so the
    /// outer booster can pass its whole configuration through.
    pub fn update_from_args(&mut self, args: &[(String, String)]) -> Result<(), TrainError> {
        for (key, value) in args {
            match key.as_str() {
                "learning_rate" | "eta" => self.learning_rate = parse(key, value)?,
                "max_depth" => self.max_depth = parse(key, value)?,
                "min_child_weight" => self.min_child_weight = parse(key, value)?,
                "subsample" => self.subsample = parse(key, value)?,
                "colsample_bytree" => self.colsample_bytree = parse(key, value)?,
                "colsample_bylevel" => self.colsample_bylevel = parse(key, value)?,
                "robust_eps" => self.robust_eps = parse(key, value)?,
                "robust_training_verbose" => {
                    self.robust_training_verbose = parse_bool(key, value)?
                }
                "parallel_option" => {
                    self.parallel_option = match value.as_str() {
                        "0" => ParallelOption::Feature,
                        "1" => ParallelOption::WithinColumn,
                        "2" => ParallelOption::Auto,
                        _ => {
                            return Err(TrainError::InvalidParam {
                                key: key.clone(),
                                value: value.clone(),
                            })
                        }
                    }
                }
                "split_evaluator" => self.split_evaluator = value.clone(),
                "reg_lambda" | "lambda" => self.reg_lambda = parse(key, value)?,
                "reg_alpha" | "alpha" => self.reg_alpha = parse(key, value)?,
                "default_direction" => {
                    self.default_direction = match value.as_str() {
                        "0" | "learn" => DefaultDirection::Learn,
                        "1" | "left" => DefaultDirection::Left,
                        "2" | "right" => DefaultDirection::Right,
                        _ => {
                            return Err(TrainError::InvalidParam {
                                key: key.clone(),
                                value: value.clone(),
                            })
                        }
                    }
                }
                "opt_dense_col" => self.opt_dense_col = parse(key, value)?,
                "monotone_constraints" => {
                    let trimmed = value.trim_matches(|c| c == '(' || c == ')');
                    let mut constraints = Vec::new();
                    for part in trimmed.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                        constraints.push(parse(key, part)?);
                    }
                    self.monotone_constraints = constraints;
                }
                "seed" => self.seed = parse(key, value)?,
                "nthread" => self.nthread = parse(key, value)?,
                _ => {}
            }
        }
        self.validate()
    }

    /// Range-check the configuration. Fatal on violation.
    pub fn validate(&self) -> Result<(), TrainError> {
        let check = |ok: bool, key: &str, value: String| {
            if ok {
                Ok(())
            } else {
                Err(TrainError::InvalidParam {
                    key: key.to_string(),
                    value,
                })
            }
        };
        check(
            self.learning_rate > 0.0,
            "learning_rate",
            self.learning_rate.to_string(),
        )?;
        check(
            self.subsample > 0.0 && self.subsample <= 1.0,
            "subsample",
            self.subsample.to_string(),
        )?;
        check(
            self.colsample_bytree > 0.0 && self.colsample_bytree <= 1.0,
            "colsample_bytree",
            self.colsample_bytree.to_string(),
        )?;
        check(
            self.colsample_bylevel > 0.0 && self.colsample_bylevel <= 1.0,
            "colsample_bylevel",
            self.colsample_bylevel.to_string(),
        )?;
        check(
            self.robust_eps >= 0.0,
            "robust_eps",
            self.robust_eps.to_string(),
        )?;
        check(
            self.min_child_weight >= 0.0,
            "min_child_weight",
            self.min_child_weight.to_string(),
        )?;
        Ok(())
    }

    /// Whether a column warrants the ascending (forward) sweep.
    ///
    /// Dense columns skip it: with nothing missing, the default direction
    /// is irrelevant and the backward sweep alone covers every threshold.
    /// An indicator column (single distinct value) never needs it.
    pub fn need_forward_search(&self, col_density: f32, indicator: bool) -> bool {
        self.default_direction == DefaultDirection::Right
            || (self.default_direction == DefaultDirection::Learn
                && col_density < self.opt_dense_col
                && !indicator)
    }

    /// Whether a column warrants the backward sweep.
    pub fn need_backward_search(&self, _col_density: f32, _indicator: bool) -> bool {
        self.default_direction != DefaultDirection::Right
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let params = RobustParamsBuilder::default().build().unwrap();
        assert_eq!(params.learning_rate, 0.3);
        assert_eq!(params.max_depth, 6);
        assert_eq!(params.robust_eps, 0.0);
        assert_eq!(params.split_evaluator, "elastic_net");
    }

    #[test]
    fn args_update_known_keys() {
        let mut params = RobustParams::default();
        params
            .update_from_args(&[
                ("eta".to_string(), "0.1".to_string()),
                ("max_depth".to_string(), "3".to_string()),
                ("robust_eps".to_string(), "0.25".to_string()),
                ("robust_training_verbose".to_string(), "1".to_string()),
                ("parallel_option".to_string(), "2".to_string()),
                ("monotone_constraints".to_string(), "(1,0,-1)".to_string()),
            ])
            .unwrap();
        assert_eq!(params.learning_rate, 0.1);
        assert_eq!(params.max_depth, 3);
        assert_eq!(params.robust_eps, 0.25);
        assert!(params.robust_training_verbose);
        assert_eq!(params.parallel_option, ParallelOption::Auto);
        assert_eq!(params.monotone_constraints, vec![1, 0, -1]);
    }

    #[test]
    fn unknown_keys_ignored() {
        let mut params = RobustParams::default();
        params
            .update_from_args(&[("objective".to_string(), "reg:squarederror".to_string())])
            .unwrap();
    }

    #[test]
    fn malformed_value_is_fatal() {
        let mut params = RobustParams::default();
        let err = params.update_from_args(&[("max_depth".to_string(), "deep".to_string())]);
        assert!(matches!(err, Err(TrainError::InvalidParam { .. })));
    }

    #[test]
    fn zero_colsample_rejected() {
        let mut params = RobustParams::default();
        let err = params.update_from_args(&[("colsample_bytree".to_string(), "0".to_string())]);
        assert!(matches!(err, Err(TrainError::InvalidParam { .. })));
    }

    #[test]
    fn auto_parallel_resolution() {
        assert_eq!(
            ParallelOption::Auto.resolve(2, 8),
            ParallelOption::WithinColumn
        );
        assert_eq!(ParallelOption::Auto.resolve(8, 8), ParallelOption::Feature);
        assert_eq!(
            ParallelOption::Feature.resolve(1, 64),
            ParallelOption::Feature
        );
    }

    #[test]
    fn search_direction_heuristics() {
        let params = RobustParams::default();
        // fully dense column under `learn`: backward only
        assert!(!params.need_forward_search(1.0, false));
        assert!(params.need_backward_search(1.0, false));
        // sparse column: both sweeps
        assert!(params.need_forward_search(0.5, false));
        // indicator column suppresses forward
        assert!(!params.need_forward_search(0.5, true));

        let mut right = RobustParams::default();
        right.default_direction = DefaultDirection::Right;
        assert!(right.need_forward_search(1.0, false));
        assert!(!right.need_backward_search(1.0, false));
    }
}
