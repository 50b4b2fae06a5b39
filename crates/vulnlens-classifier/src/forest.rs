//! Random forest of CART trees over dense embedding features.
//!
//! Binary targets only (0 = safe, 1 = unsafe). Trees are grown on bootstrap
//! samples with Gini impurity, considering a random subset of features at
//! each split. Every tree owns an RNG seeded from the forest seed and its
//! index, so a fit is reproducible whether trees are grown in parallel or not.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use vulnlens_common::{Result, VulnLensError};

/// Number of features examined per split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaxFeatures {
    Sqrt,
    Log2,
    All,
    #[serde(untagged)]
    Count(usize),
}

impl MaxFeatures {
    pub fn resolve(&self, n_features: usize) -> usize {
        let k = match *self {
            MaxFeatures::Sqrt => (n_features as f64).sqrt() as usize,
            MaxFeatures::Log2 => (n_features as f64).log2() as usize,
            MaxFeatures::All => n_features,
            MaxFeatures::Count(k) => k,
        };
        k.clamp(1, n_features.max(1))
    }
}

/// Forest hyper-parameters (the `[training]` settings table).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    #[serde(default = "default_n_trees")]
    pub n_trees: usize,

    /// 0 grows every tree until its leaves are pure.
    #[serde(default)]
    pub max_depth: usize,

    #[serde(default = "default_min_samples_split")]
    pub min_samples_split: usize,

    #[serde(default = "default_min_samples_leaf")]
    pub min_samples_leaf: usize,

    #[serde(default = "default_max_features")]
    pub max_features: MaxFeatures,

    #[serde(default = "default_true")]
    pub bootstrap: bool,

    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Compute an out-of-bag accuracy for the training report.
    #[serde(default = "default_true")]
    pub report_oob: bool,
}

fn default_n_trees() -> usize { 100 }
fn default_min_samples_split() -> usize { 2 }
fn default_min_samples_leaf() -> usize { 1 }
fn default_max_features() -> MaxFeatures { MaxFeatures::Sqrt }
fn default_true() -> bool { true }
fn default_seed() -> u64 { 42 }

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: default_n_trees(),
            max_depth: 0,
            min_samples_split: default_min_samples_split(),
            min_samples_leaf: default_min_samples_leaf(),
            max_features: default_max_features(),
            bootstrap: true,
            seed: default_seed(),
            report_oob: true,
        }
    }
}

impl ForestParams {
    pub fn validate(&self) -> Result<()> {
        if self.n_trees == 0 {
            return Err(VulnLensError::Config("n_trees must be at least 1".to_string()));
        }
        if self.min_samples_split < 2 {
            return Err(VulnLensError::Config("min_samples_split must be at least 2".to_string()));
        }
        if self.min_samples_leaf == 0 {
            return Err(VulnLensError::Config("min_samples_leaf must be at least 1".to_string()));
        }
        if self.max_features == MaxFeatures::Count(0) {
            return Err(VulnLensError::Config("max_features must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Node {
    /// Samples with `x[feature] <= threshold` go left.
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        unsafe_fraction: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
}

impl DecisionTree {
    /// Fraction of unsafe training samples in the leaf `x` falls into.
    pub fn predict_proba(&self, x: &[f32]) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { unsafe_fraction } => return *unsafe_fraction,
                Node::Split { feature, threshold, left, right } => {
                    idx = if f64::from(x[*feature]) <= *threshold { *left } else { *right };
                }
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match &nodes[idx] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        walk(&self.nodes, 0)
    }

    /// Check that every split references a valid feature and child.
    fn check(&self, n_features: usize) -> std::result::Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }
        for (i, node) in self.nodes.iter().enumerate() {
            match node {
                Node::Leaf { unsafe_fraction } => {
                    if !(0.0..=1.0).contains(unsafe_fraction) {
                        return Err(format!("leaf {i} has fraction {unsafe_fraction}"));
                    }
                }
                Node::Split { feature, left, right, .. } => {
                    if *feature >= n_features {
                        return Err(format!("node {i} splits on feature {feature} of {n_features}"));
                    }
                    // Children are always appended after their parent.
                    if *left <= i || *right <= i || *left >= self.nodes.len() || *right >= self.nodes.len() {
                        return Err(format!("node {i} has invalid children"));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Training matrix: one row per sample, labels 0/1.
struct Samples<'a> {
    x: &'a [Vec<f32>],
    y: &'a [u8],
}

struct TreeBuilder<'a> {
    data: &'a Samples<'a>,
    params: &'a ForestParams,
    n_features: usize,
    max_features: usize,
    rng: StdRng,
    nodes: Vec<Node>,
}

impl<'a> TreeBuilder<'a> {
    fn grow(mut self, indices: &mut [usize]) -> DecisionTree {
        self.build(indices, 0);
        DecisionTree { nodes: self.nodes }
    }

    fn build(&mut self, indices: &mut [usize], depth: usize) -> usize {
        let n = indices.len();
        let positives = indices.iter().filter(|&&i| self.data.y[i] == 1).count();
        let node_id = self.nodes.len();
        self.nodes.push(Node::Leaf {
            unsafe_fraction: positives as f64 / n as f64,
        });

        let depth_reached = self.params.max_depth > 0 && depth >= self.params.max_depth;
        let pure = positives == 0 || positives == n;
        if depth_reached || pure || n < self.params.min_samples_split {
            return node_id;
        }

        let Some((feature, threshold)) = self.best_split(indices, positives) else {
            return node_id;
        };

        let mid = partition(indices, |i| f64::from(self.data.x[i][feature]) <= threshold);
        let (left_idx, right_idx) = indices.split_at_mut(mid);
        let left = self.build(left_idx, depth + 1);
        let right = self.build(right_idx, depth + 1);
        self.nodes[node_id] = Node::Split { feature, threshold, left, right };
        node_id
    }

    /// Best Gini split over a random feature subset.
    ///
    /// Keeps drawing features past `max_features` until at least one of them
    /// is not constant on this node, as scikit-learn does.
    fn best_split(&mut self, indices: &[usize], positives: usize) -> Option<(usize, f64)> {
        let n = indices.len();
        let min_leaf = self.params.min_samples_leaf;
        let mut features: Vec<usize> = (0..self.n_features).collect();
        features.shuffle(&mut self.rng);

        // Score to maximize: sum over children of (c0^2 + c1^2) / n_child,
        // which minimizes the weighted Gini impurity of the children.
        let mut best: Option<(usize, f64, f64)> = None;
        let mut examined = 0;
        let mut column: Vec<(f32, u8)> = Vec::with_capacity(n);

        for feature in features {
            if examined >= self.max_features && best.is_some() {
                break;
            }
            column.clear();
            column.extend(indices.iter().map(|&i| (self.data.x[i][feature], self.data.y[i])));
            column.sort_by(|a, b| a.0.total_cmp(&b.0));
            if column[0].0 == column[n - 1].0 {
                continue;
            }
            examined += 1;

            let (mut l0, mut l1) = (0usize, 0usize);
            for k in 0..n - 1 {
                if column[k].1 == 1 { l1 += 1 } else { l0 += 1 }
                let (lo, hi) = (column[k].0, column[k + 1].0);
                if lo == hi {
                    continue;
                }
                let n_left = k + 1;
                let n_right = n - n_left;
                if n_left < min_leaf || n_right < min_leaf {
                    continue;
                }
                let (r1, r0) = (positives - l1, (n - positives) - l0);
                let score = ((l0 * l0 + l1 * l1) as f64) / n_left as f64
                    + ((r0 * r0 + r1 * r1) as f64) / n_right as f64;
                if best.map_or(true, |(_, _, s)| score > s) {
                    let (lo, hi) = (f64::from(lo), f64::from(hi));
                    let mut threshold = (lo + hi) / 2.0;
                    if threshold >= hi {
                        threshold = lo;
                    }
                    best = Some((feature, threshold, score));
                }
            }
        }

        best.map(|(feature, threshold, _)| (feature, threshold))
    }
}

/// Reorder `indices` so every element satisfying `pred` comes first; returns the boundary.
fn partition(indices: &mut [usize], pred: impl Fn(usize) -> bool) -> usize {
    let mut mid = 0;
    for j in 0..indices.len() {
        if pred(indices[j]) {
            indices.swap(mid, j);
            mid += 1;
        }
    }
    mid
}

/// Ensemble of decision trees; its probability is the mean of the trees' leaf fractions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    n_features: usize,
    trees: Vec<DecisionTree>,
}

impl RandomForest {
    /// Fit a forest on `x` (rows of equal length) and binary labels `y`.
    ///
    /// Returns the forest and, when `params.report_oob` is set and bootstrap
    /// sampling leaves some samples out, its out-of-bag accuracy.
    pub fn fit(x: &[Vec<f32>], y: &[u8], params: &ForestParams) -> Result<(Self, Option<f64>)> {
        params.validate()?;
        if x.is_empty() {
            return Err(VulnLensError::DatasetInvalid("no training samples".to_string()));
        }
        if x.len() != y.len() {
            return Err(VulnLensError::DatasetInvalid(format!(
                "{} samples but {} labels",
                x.len(),
                y.len()
            )));
        }
        if let Some(bad) = y.iter().find(|&&label| label > 1) {
            return Err(VulnLensError::DatasetInvalid(format!("label {bad} is not 0 or 1")));
        }
        let n_features = x[0].len();
        if n_features == 0 {
            return Err(VulnLensError::DatasetInvalid("samples have no features".to_string()));
        }
        if let Some(row) = x.iter().find(|row| row.len() != n_features) {
            return Err(VulnLensError::DimensionMismatch {
                expected: n_features,
                actual: row.len(),
            });
        }

        let data = Samples { x, y };
        let max_features = params.max_features.resolve(n_features);
        debug!(
            "Fitting {} trees on {} samples x {} features (max_features={})",
            params.n_trees,
            x.len(),
            n_features,
            max_features
        );

        let grow = |t: usize| -> (DecisionTree, Vec<bool>) {
            let mut rng = StdRng::seed_from_u64(params.seed.wrapping_add(t as u64));
            let n = x.len();
            let mut in_bag = vec![!params.bootstrap; n];
            let mut indices: Vec<usize> = if params.bootstrap {
                (0..n)
                    .map(|_| {
                        let i = rng.gen_range(0..n);
                        in_bag[i] = true;
                        i
                    })
                    .collect()
            } else {
                (0..n).collect()
            };
            let builder = TreeBuilder {
                data: &data,
                params,
                n_features,
                max_features,
                rng,
                nodes: Vec::new(),
            };
            (builder.grow(&mut indices), in_bag)
        };

        #[cfg(feature = "parallel")]
        let grown: Vec<(DecisionTree, Vec<bool>)> = {
            use rayon::prelude::*;
            (0..params.n_trees).into_par_iter().map(grow).collect()
        };
        #[cfg(not(feature = "parallel"))]
        let grown: Vec<(DecisionTree, Vec<bool>)> = (0..params.n_trees).map(grow).collect();

        let oob = if params.report_oob && params.bootstrap {
            out_of_bag_accuracy(&grown, x, y)
        } else {
            None
        };
        let trees = grown.into_iter().map(|(tree, _)| tree).collect();

        Ok((Self { n_features, trees }, oob))
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }

    /// Mean unsafe fraction across trees. `x` must have `n_features` entries.
    pub fn predict_proba(&self, x: &[f32]) -> f64 {
        let total: f64 = self.trees.iter().map(|t| t.predict_proba(x)).sum();
        total / self.trees.len() as f64
    }

    /// Structural check run after deserializing a forest.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.n_features == 0 {
            return Err("forest has no features".to_string());
        }
        if self.trees.is_empty() {
            return Err("forest has no trees".to_string());
        }
        for (i, tree) in self.trees.iter().enumerate() {
            tree.check(self.n_features).map_err(|e| format!("tree {i}: {e}"))?;
        }
        Ok(())
    }
}

fn out_of_bag_accuracy(grown: &[(DecisionTree, Vec<bool>)], x: &[Vec<f32>], y: &[u8]) -> Option<f64> {
    let mut scored = 0usize;
    let mut correct = 0usize;
    for (i, row) in x.iter().enumerate() {
        let votes: Vec<f64> = grown
            .iter()
            .filter(|(_, in_bag)| !in_bag[i])
            .map(|(tree, _)| tree.predict_proba(row))
            .collect();
        if votes.is_empty() {
            continue;
        }
        let proba = votes.iter().sum::<f64>() / votes.len() as f64;
        let predicted = u8::from(proba > 0.5);
        scored += 1;
        if predicted == y[i] {
            correct += 1;
        }
    }
    (scored > 0).then(|| correct as f64 / scored as f64)
}
