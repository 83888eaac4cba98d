// src/models/iforest.rs

use std::fmt;

use ndarray::{ArrayView1, ArrayView2};
use rand::prelude::*;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::models::base_model::OutlierModel;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Which space the outlier model reads: the raw request features or the scaled ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierInput {
    #[default]
    Raw,
    Scaled,
}

impl fmt::Display for ClassifierInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassifierInput::Raw => write!(f, "raw"),
            ClassifierInput::Scaled => write!(f, "scaled"),
        }
    }
}

impl std::str::FromStr for ClassifierInput {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raw" => Ok(ClassifierInput::Raw),
            "scaled" => Ok(ClassifierInput::Scaled),
            other => Err(format!("unknown classifier input '{other}', expected raw or scaled")),
        }
    }
}

/// Isolation tree node. Leaves keep their sample count for the path-length correction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Node {
    split_feature: Option<usize>,
    split_value: f64,
    size: usize,
    left: Option<Box<Node>>,
    right: Option<Box<Node>>,
}

impl Node {
    fn new(size: usize) -> Self {
        Node {
            split_feature: None,
            split_value: 0.0,
            size,
            left: None,
            right: None,
        }
    }

    fn is_leaf(&self) -> bool {
        self.left.is_none() && self.right.is_none()
    }
}

/// Forest hyper-parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct IsolationForestParams {
    /// Number of trees
    pub n_estimators: usize,
    /// Rows drawn (without replacement) per tree; `None` means `min(256, n_samples)`
    pub max_samples: Option<usize>,
    /// Expected share of outliers in the training data, in (0, 0.5]
    pub contamination: f64,
    /// Seed for tree sampling and splits
    pub random_state: u64,
    /// Worker threads for tree building; `None` uses the global rayon pool
    pub n_jobs: Option<usize>,
    /// Space the training matrix is in, recorded in the fitted model
    pub input: ClassifierInput,
}

impl Default for IsolationForestParams {
    fn default() -> Self {
        IsolationForestParams {
            n_estimators: 100,
            max_samples: None,
            contamination: 0.1,
            random_state: 42,
            n_jobs: None,
            input: ClassifierInput::Raw,
        }
    }
}

impl IsolationForestParams {
    fn validate(&self) -> Result<(), ModelError> {
        if self.n_estimators == 0 {
            return Err(ModelError::InvalidParameter {
                name: "n_estimators",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(self.contamination > 0.0 && self.contamination <= 0.5) {
            return Err(ModelError::InvalidParameter {
                name: "contamination",
                reason: format!("must be in (0, 0.5], got {}", self.contamination),
            });
        }
        if self.max_samples == Some(0) {
            return Err(ModelError::InvalidParameter {
                name: "max_samples",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.n_jobs == Some(0) {
            return Err(ModelError::InvalidParameter {
                name: "n_jobs",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Batch isolation forest with a contamination-derived decision threshold.
///
/// Scores follow the usual convention: `score = -2^(-E[h(x)] / c(psi))`, so lower
/// is more abnormal, and `decision = score - offset` where `offset` is the
/// `contamination` percentile of the training scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationForest {
    trees: Vec<Node>,
    sample_size: usize,
    n_features: usize,
    offset: f64,
    contamination: f64,
    input: ClassifierInput,
}

impl IsolationForest {
    /// Fit on every row of `xs`.
    pub fn fit(
        xs: ArrayView2<'_, f64>,
        params: &IsolationForestParams,
    ) -> Result<Self, ModelError> {
        params.validate()?;

        let n_samples = xs.nrows();
        let n_features = xs.ncols();
        if n_samples == 0 || n_features == 0 {
            return Err(ModelError::EmptyData);
        }
        if n_samples < 2 {
            return Err(ModelError::InsufficientSamples {
                required: 2,
                found: n_samples,
            });
        }
        if let Some(((_, index), _)) = xs.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(ModelError::NonFinite { index });
        }

        let sample_size = params.max_samples.unwrap_or(256).min(n_samples).max(2);
        let height_limit = (sample_size as f64).log2().ceil() as usize;

        let grow = |i: usize| {
            let mut rng = StdRng::seed_from_u64(params.random_state.wrapping_add(i as u64));
            let rows = rand::seq::index::sample(&mut rng, n_samples, sample_size).into_vec();
            Self::build_tree(&xs, &rows, 0, height_limit, &mut rng)
        };

        let trees: Vec<Node> = match params.n_jobs {
            Some(n_jobs) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(n_jobs)
                    .build()
                    .map_err(|e| ModelError::InvalidParameter {
                        name: "n_jobs",
                        reason: e.to_string(),
                    })?;
                pool.install(|| (0..params.n_estimators).into_par_iter().map(grow).collect())
            }
            None => (0..params.n_estimators).into_par_iter().map(grow).collect(),
        };

        let mut forest = IsolationForest {
            trees,
            sample_size,
            n_features,
            offset: 0.0,
            contamination: params.contamination,
            input: params.input,
        };

        let mut scores: Vec<f64> = xs.outer_iter().map(|x| forest.raw_score(x)).collect();
        forest.offset = percentile(&mut scores, 100.0 * params.contamination);
        Ok(forest)
    }

    fn build_tree(
        data: &ArrayView2<'_, f64>,
        rows: &[usize],
        height: usize,
        height_limit: usize,
        rng: &mut StdRng,
    ) -> Node {
        let size = rows.len();
        let mut node = Node::new(size);

        // Stop criteria
        if size <= 1 || height >= height_limit {
            return node;
        }

        let n_features = data.ncols();
        let split_feature = rng.gen_range(0..n_features);

        let mut min_val = data[[rows[0], split_feature]];
        let mut max_val = min_val;
        for &r in rows {
            let val = data[[r, split_feature]];
            min_val = min_val.min(val);
            max_val = max_val.max(val);
        }

        // Constant along this feature: leaf
        if (max_val - min_val).abs() < 1e-10 {
            return node;
        }

        let split_value = rng.gen::<f64>() * (max_val - min_val) + min_val;

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .iter()
            .copied()
            .partition(|&r| data[[r, split_feature]] < split_value);

        if !left_rows.is_empty() && !right_rows.is_empty() {
            node.split_feature = Some(split_feature);
            node.split_value = split_value;
            node.left = Some(Box::new(Self::build_tree(
                data,
                &left_rows,
                height + 1,
                height_limit,
                rng,
            )));
            node.right = Some(Box::new(Self::build_tree(
                data,
                &right_rows,
                height + 1,
                height_limit,
                rng,
            )));
        }

        node
    }

    fn path_length(node: &Node, x: ArrayView1<'_, f64>, current_height: usize) -> f64 {
        if node.is_leaf() {
            return current_height as f64 + average_path_length(node.size);
        }

        if let Some(split_feature) = node.split_feature {
            let next = if x[split_feature] < node.split_value {
                node.left.as_deref()
            } else {
                node.right.as_deref()
            };
            if let Some(child) = next {
                return Self::path_length(child, x, current_height + 1);
            }
        }

        current_height as f64 + average_path_length(node.size)
    }

    fn raw_score(&self, x: ArrayView1<'_, f64>) -> f64 {
        let total: f64 = self
            .trees
            .iter()
            .map(|tree| Self::path_length(tree, x, 0))
            .sum();
        let avg_path_length = total / self.trees.len() as f64;
        -(2.0f64.powf(-avg_path_length / average_path_length(self.sample_size)))
    }

    fn check(&self, x: ArrayView1<'_, f64>) -> Result<(), ModelError> {
        if x.len() != self.n_features {
            return Err(ModelError::DimensionMismatch {
                expected: self.n_features,
                found: x.len(),
            });
        }
        if let Some(index) = x.iter().position(|v| !v.is_finite()) {
            return Err(ModelError::NonFinite { index });
        }
        Ok(())
    }

    /// Check a decoded forest before use: at least one tree, a usable sample size,
    /// a finite offset and every split on a feature the model was fitted with.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.trees.is_empty() {
            return Err(ModelError::InvalidParameter {
                name: "trees",
                reason: "forest has no trees".to_string(),
            });
        }
        if self.n_features == 0 {
            return Err(ModelError::EmptyData);
        }
        if self.sample_size < 2 {
            return Err(ModelError::InsufficientSamples {
                required: 2,
                found: self.sample_size,
            });
        }
        if !self.offset.is_finite() {
            return Err(ModelError::InvalidParameter {
                name: "offset",
                reason: format!("must be finite, got {}", self.offset),
            });
        }
        self.trees
            .iter()
            .try_for_each(|tree| Self::validate_node(tree, self.n_features))
    }

    fn validate_node(node: &Node, n_features: usize) -> Result<(), ModelError> {
        if let Some(feature) = node.split_feature {
            if feature >= n_features {
                return Err(ModelError::InvalidParameter {
                    name: "split_feature",
                    reason: format!("{feature} is out of range for {n_features} features"),
                });
            }
            if !node.split_value.is_finite() {
                return Err(ModelError::InvalidParameter {
                    name: "split_value",
                    reason: format!("must be finite, got {}", node.split_value),
                });
            }
        }
        [&node.left, &node.right]
            .into_iter()
            .flatten()
            .try_for_each(|child| Self::validate_node(child, n_features))
    }

    pub fn n_estimators(&self) -> usize {
        self.trees.len()
    }

    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn contamination(&self) -> f64 {
        self.contamination
    }

    /// Space the model was trained in.
    pub fn input(&self) -> ClassifierInput {
        self.input
    }
}

impl OutlierModel for IsolationForest {
    fn n_features(&self) -> usize {
        self.n_features
    }

    fn score_partial(&self, x: ArrayView1<'_, f64>) -> Result<f64, ModelError> {
        self.check(x)?;
        Ok(self.raw_score(x))
    }

    fn decision_partial(&self, x: ArrayView1<'_, f64>) -> Result<f64, ModelError> {
        Ok(self.score_partial(x)? - self.offset)
    }
}

/// Expected path length of an unsuccessful BST search among `n` points.
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Linear-interpolated percentile, `q` in [0, 100]. Sorts `values` in place.
fn percentile(values: &mut [f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let rank = (q / 100.0) * (values.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    values[lo] + (values[hi] - values[lo]) * frac
}
