//! Gradient-boosted decision trees for multi-class classification
//!
//! Softmax objective with one regression tree per class per boosting round,
//! second-order leaf values `-G / (H + lambda)` scaled by the learning rate.
//! Inputs are small non-negative integers, so split search runs over a dense
//! per-value histogram instead of sorting.

use crate::models::{CalendarFeatures, UsageLabel};
use serde::{Deserialize, Serialize};
use tracing::debug;

const NUM_CLASSES: usize = UsageLabel::COUNT;
const NUM_INPUTS: usize = CalendarFeatures::MODEL_INPUTS;

/// Lower bound on per-sample hessians to keep leaf values finite
const MIN_HESSIAN: f64 = 1e-6;

pub type ModelInput = [u32; NUM_INPUTS];

/// Boosting hyperparameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoostingParams {
    /// Number of boosting rounds
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    /// L2 regularisation on leaf values
    pub lambda: f64,
    /// Minimum hessian sum on each side of a split
    pub min_child_weight: f64,
    /// Minimum loss reduction required to split
    pub min_split_gain: f64,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: 5,
            lambda: 1.0,
            min_child_weight: 1.0,
            min_split_gain: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum TreeNode {
    Leaf {
        value: f64,
    },
    /// Rows with `input[feature] <= threshold` go left
    Split {
        feature: usize,
        threshold: u32,
        left: usize,
        right: usize,
    },
}

/// Regression tree stored as a flat node list rooted at index 0
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<TreeNode>,
}

impl RegressionTree {
    pub fn predict(&self, input: &ModelInput) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                TreeNode::Leaf { value } => return *value,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if input[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[TreeNode], idx: usize) -> usize {
            match &nodes[idx] {
                TreeNode::Leaf { .. } => 0,
                TreeNode::Split { left, right, .. } => {
                    1 + walk(nodes, *left).max(walk(nodes, *right))
                }
            }
        }
        walk(&self.nodes, 0)
    }
}

#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    feature: usize,
    threshold: u32,
    gain: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct Bin {
    grad: f64,
    hess: f64,
    count: usize,
}

/// Grows one regression tree over gradient/hessian statistics
struct TreeBuilder<'a> {
    inputs: &'a [ModelInput],
    grad: &'a [f64],
    hess: &'a [f64],
    params: &'a BoostingParams,
    nodes: Vec<TreeNode>,
}

impl<'a> TreeBuilder<'a> {
    fn build(
        inputs: &'a [ModelInput],
        grad: &'a [f64],
        hess: &'a [f64],
        params: &'a BoostingParams,
    ) -> RegressionTree {
        let mut builder = Self {
            inputs,
            grad,
            hess,
            params,
            nodes: Vec::new(),
        };
        let rows: Vec<usize> = (0..inputs.len()).collect();
        builder.grow(&rows, 0);
        RegressionTree {
            nodes: builder.nodes,
        }
    }

    fn grow(&mut self, rows: &[usize], depth: usize) -> usize {
        let g: f64 = rows.iter().map(|&r| self.grad[r]).sum();
        let h: f64 = rows.iter().map(|&r| self.hess[r]).sum();

        let id = self.nodes.len();
        self.nodes.push(TreeNode::Leaf {
            value: self.leaf_value(g, h),
        });

        if depth >= self.params.max_depth || rows.len() < 2 {
            return id;
        }

        let Some(split) = self.best_split(rows, g, h) else {
            return id;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .iter()
            .partition(|&&r| self.inputs[r][split.feature] <= split.threshold);

        let left = self.grow(&left_rows, depth + 1);
        let right = self.grow(&right_rows, depth + 1);
        self.nodes[id] = TreeNode::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        id
    }

    fn leaf_value(&self, g: f64, h: f64) -> f64 {
        -g / (h + self.params.lambda) * self.params.learning_rate
    }

    fn score(&self, g: f64, h: f64) -> f64 {
        g * g / (h + self.params.lambda)
    }

    fn best_split(&self, rows: &[usize], g_total: f64, h_total: f64) -> Option<SplitCandidate> {
        let parent = self.score(g_total, h_total);
        let mut best: Option<SplitCandidate> = None;

        for feature in 0..NUM_INPUTS {
            let cardinality = CalendarFeatures::INPUT_CARDINALITY[feature];
            let mut bins = vec![Bin::default(); cardinality];
            for &r in rows {
                let bin = &mut bins[self.inputs[r][feature] as usize];
                bin.grad += self.grad[r];
                bin.hess += self.hess[r];
                bin.count += 1;
            }

            let (mut gl, mut hl, mut nl) = (0.0, 0.0, 0usize);
            for (value, bin) in bins.iter().enumerate().take(cardinality - 1) {
                if bin.count == 0 {
                    continue;
                }
                gl += bin.grad;
                hl += bin.hess;
                nl += bin.count;
                if nl == rows.len() {
                    break;
                }

                let (gr, hr) = (g_total - gl, h_total - hl);
                if hl < self.params.min_child_weight || hr < self.params.min_child_weight {
                    continue;
                }

                let gain = self.score(gl, hl) + self.score(gr, hr) - parent;
                if gain <= self.params.min_split_gain {
                    continue;
                }
                if best.map_or(true, |b| gain > b.gain) {
                    best = Some(SplitCandidate {
                        feature,
                        threshold: value as u32,
                        gain,
                    });
                }
            }
        }

        best
    }
}

/// Multi-class boosted tree ensemble
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostedTrees {
    params: BoostingParams,
    /// One tree per class per round
    rounds: Vec<[RegressionTree; NUM_CLASSES]>,
}

impl BoostedTrees {
    /// Fit the ensemble on integer inputs with per-sample weights.
    ///
    /// Callers guarantee `inputs`, `labels` and `weights` have equal,
    /// non-zero length and inputs lie within `INPUT_CARDINALITY`.
    pub fn fit(
        inputs: &[ModelInput],
        labels: &[UsageLabel],
        weights: &[f64],
        params: BoostingParams,
    ) -> Self {
        debug_assert_eq!(inputs.len(), labels.len());
        debug_assert_eq!(inputs.len(), weights.len());

        let n = inputs.len();
        let mut scores = vec![[0.0f64; NUM_CLASSES]; n];
        let mut grad = vec![0.0f64; n];
        let mut hess = vec![0.0f64; n];
        let mut rounds = Vec::with_capacity(params.n_estimators);

        for round in 0..params.n_estimators {
            let probs: Vec<[f64; NUM_CLASSES]> = scores.iter().map(softmax).collect();

            let trees: [RegressionTree; NUM_CLASSES] = std::array::from_fn(|class| {
                for i in 0..n {
                    let target = if labels[i].index() == class { 1.0 } else { 0.0 };
                    let p = probs[i][class];
                    grad[i] = (p - target) * weights[i];
                    hess[i] = (p * (1.0 - p)).max(MIN_HESSIAN) * weights[i];
                }
                TreeBuilder::build(inputs, &grad, &hess, &params)
            });

            for (input, score) in inputs.iter().zip(scores.iter_mut()) {
                for (class, tree) in trees.iter().enumerate() {
                    score[class] += tree.predict(input);
                }
            }

            if round % 25 == 0 {
                debug!(
                    round,
                    loss = weighted_log_loss(&scores, labels, weights),
                    "Boosting progress"
                );
            }

            rounds.push(trees);
        }

        Self { params, rounds }
    }

    /// Raw additive score per class
    pub fn class_scores(&self, input: &ModelInput) -> [f64; NUM_CLASSES] {
        let mut scores = [0.0; NUM_CLASSES];
        for trees in &self.rounds {
            for (class, tree) in trees.iter().enumerate() {
                scores[class] += tree.predict(input);
            }
        }
        scores
    }

    pub fn probabilities(&self, input: &ModelInput) -> [f64; NUM_CLASSES] {
        softmax(&self.class_scores(input))
    }

    /// Highest scoring class; ties resolve to the lowest label index
    pub fn predict(&self, input: &ModelInput) -> UsageLabel {
        let scores = self.class_scores(input);
        let mut best = 0;
        for class in 1..NUM_CLASSES {
            if scores[class] > scores[best] {
                best = class;
            }
        }
        UsageLabel::ALL[best]
    }

    pub fn params(&self) -> &BoostingParams {
        &self.params
    }

    pub fn num_rounds(&self) -> usize {
        self.rounds.len()
    }

    pub fn num_trees(&self) -> usize {
        self.rounds.len() * NUM_CLASSES
    }

    pub fn max_tree_depth(&self) -> usize {
        self.rounds
            .iter()
            .flat_map(|r| r.iter())
            .map(RegressionTree::depth)
            .max()
            .unwrap_or(0)
    }
}

fn softmax(scores: &[f64; NUM_CLASSES]) -> [f64; NUM_CLASSES] {
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exp: Vec<f64> = scores.iter().map(|s| (s - max).exp()).collect();
    let sum: f64 = exp.iter().sum();
    std::array::from_fn(|i| exp[i] / sum)
}

fn weighted_log_loss(scores: &[[f64; NUM_CLASSES]], labels: &[UsageLabel], weights: &[f64]) -> f64 {
    let total_weight: f64 = weights.iter().sum();
    if total_weight <= 0.0 {
        return 0.0;
    }
    let loss: f64 = scores
        .iter()
        .zip(labels)
        .zip(weights)
        .map(|((s, l), w)| -softmax(s)[l.index()].max(1e-15).ln() * w)
        .sum();
    loss / total_weight
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hour-of-day decides the class: night idle, office hours high
    fn hourly_dataset() -> (Vec<ModelInput>, Vec<UsageLabel>) {
        let mut inputs = Vec::new();
        let mut labels = Vec::new();
        for day in 0..7u32 {
            for tod in (0..1440u32).step_by(15) {
                let hour = tod / 60;
                inputs.push([hour, day, (day >= 5) as u32, tod]);
                labels.push(match hour {
                    0..=7 => UsageLabel::Idle,
                    8..=11 => UsageLabel::Medium,
                    12..=17 => UsageLabel::High,
                    _ => UsageLabel::VeryHigh,
                });
            }
        }
        (inputs, labels)
    }

    fn small_params() -> BoostingParams {
        BoostingParams {
            n_estimators: 20,
            ..Default::default()
        }
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let p = softmax(&[1.0, 2.0, 3.0, 1000.0]);
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(p[3] > 0.99);
    }

    #[test]
    fn test_fits_separable_data() {
        let (inputs, labels) = hourly_dataset();
        let weights = vec![1.0; inputs.len()];
        let model = BoostedTrees::fit(&inputs, &labels, &weights, small_params());

        let correct = inputs
            .iter()
            .zip(&labels)
            .filter(|(x, y)| model.predict(x) == **y)
            .count();
        assert_eq!(correct, inputs.len());
        assert_eq!(model.num_rounds(), 20);
        assert_eq!(model.num_trees(), 80);
    }

    #[test]
    fn test_depth_limit_respected() {
        let (inputs, labels) = hourly_dataset();
        let weights = vec![1.0; inputs.len()];
        let params = BoostingParams {
            n_estimators: 5,
            max_depth: 2,
            ..Default::default()
        };
        let model = BoostedTrees::fit(&inputs, &labels, &weights, params);
        assert!(model.max_tree_depth() <= 2);
    }

    #[test]
    fn test_prediction_is_deterministic() {
        let (inputs, labels) = hourly_dataset();
        let weights = vec![1.0; inputs.len()];
        let a = BoostedTrees::fit(&inputs, &labels, &weights, small_params());
        let b = BoostedTrees::fit(&inputs, &labels, &weights, small_params());

        assert_eq!(a, b);
        for x in inputs.iter().step_by(37) {
            assert_eq!(a.class_scores(x), a.class_scores(x));
            assert_eq!(a.predict(x), b.predict(x));
        }
    }

    #[test]
    fn test_weights_shift_decision() {
        // Same input, conflicting labels: the heavier class wins
        let inputs = vec![[3, 0, 0, 180]; 10];
        let mut labels = vec![UsageLabel::Idle; 7];
        labels.extend(vec![UsageLabel::High; 3]);

        let uniform = vec![1.0; 10];
        let model = BoostedTrees::fit(&inputs, &labels, &uniform, small_params());
        assert_eq!(model.predict(&inputs[0]), UsageLabel::Idle);

        let mut skewed = vec![1.0; 7];
        skewed.extend(vec![5.0; 3]);
        let model = BoostedTrees::fit(&inputs, &labels, &skewed, small_params());
        assert_eq!(model.predict(&inputs[0]), UsageLabel::High);
    }

    #[test]
    fn test_single_class_training() {
        let inputs = vec![[1, 2, 0, 60], [2, 2, 0, 120], [3, 2, 0, 180]];
        let labels = vec![UsageLabel::Medium; 3];
        let model = BoostedTrees::fit(&inputs, &labels, &[1.0; 3], small_params());
        assert_eq!(model.predict(&[23, 6, 1, 1380]), UsageLabel::Medium);
    }

    #[test]
    fn test_untrained_ties_go_to_lowest_label() {
        let model = BoostedTrees {
            params: BoostingParams::default(),
            rounds: Vec::new(),
        };
        assert_eq!(model.predict(&[0, 0, 0, 0]), UsageLabel::Idle);
    }

    #[test]
    fn test_serde_round_trip_preserves_scores() {
        let (inputs, labels) = hourly_dataset();
        let weights = vec![1.0; inputs.len()];
        let model = BoostedTrees::fit(&inputs, &labels, &weights, small_params());

        let json = serde_json::to_string(&model).unwrap();
        let restored: BoostedTrees = serde_json::from_str(&json).unwrap();

        for x in inputs.iter().step_by(11) {
            let a = model.class_scores(x);
            let b = restored.class_scores(x);
            for class in 0..NUM_CLASSES {
                assert_eq!(a[class].to_bits(), b[class].to_bits());
            }
        }
    }
}
