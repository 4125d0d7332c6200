use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{Classifier, check_training_data, class_weights};
use crate::domain::{Label, SUSCEPTIBLE};
use crate::error::AmrError;

/// Bagged CART trees with Gini splits and `sqrt(p)` candidate features.
///
/// Tree `i` draws its bootstrap sample and feature order from a generator
/// seeded with `seed + i`, so a fit is reproducible regardless of how rayon
/// schedules the trees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    n_trees: usize,
    balanced: bool,
    seed: u64,
    n_features: usize,
    trees: Vec<Tree>,
    oob_score: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Tree {
    nodes: Vec<Node>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Node {
    Leaf {
        p1: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

impl RandomForest {
    pub fn new(n_trees: usize, balanced: bool, seed: u64) -> Self {
        Self {
            n_trees: n_trees.max(1),
            balanced,
            seed,
            n_features: 0,
            trees: Vec::new(),
            oob_score: None,
        }
    }

    /// Out-of-bag accuracy; `None` when no sample was ever left out.
    pub fn oob_score(&self) -> Option<f64> {
        self.oob_score
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

impl Classifier for RandomForest {
    fn fit(&mut self, x: &[Vec<f64>], y: &[Label]) -> Result<(), AmrError> {
        let width = check_training_data(x, y)?;
        let weights = class_weights(y, self.balanced);
        let max_features = ((width as f64).sqrt() as usize).max(1);
        let seed = self.seed;

        let grown = (0..self.n_trees)
            .into_par_iter()
            .map(|i| {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(i as u64));
                grow_tree(x, y, &weights, max_features, &mut rng)
            })
            .collect::<Vec<_>>();

        let mut votes = vec![(0.0, 0usize); x.len()];
        for (tree, in_bag) in &grown {
            for (i, row) in x.iter().enumerate() {
                if in_bag[i] == 0 {
                    votes[i].0 += tree.predict(row);
                    votes[i].1 += 1;
                }
            }
        }
        let scored = votes
            .iter()
            .zip(y)
            .filter(|((_, count), _)| *count > 0)
            .map(|((sum, count), label)| {
                let predicted = u8::from(sum / *count as f64 > 0.5);
                u8::from(predicted == *label)
            })
            .collect::<Vec<_>>();
        self.oob_score = if scored.is_empty() {
            None
        } else {
            Some(scored.iter().map(|hit| f64::from(*hit)).sum::<f64>() / scored.len() as f64)
        };

        self.trees = grown.into_iter().map(|(tree, _)| tree).collect();
        self.n_features = width;
        tracing::debug!(trees = self.trees.len(), oob = ?self.oob_score, "forest fitted");
        Ok(())
    }

    fn predict_proba(&self, row: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return 0.5;
        }
        self.trees.iter().map(|tree| tree.predict(row)).sum::<f64>() / self.trees.len() as f64
    }

    fn n_features(&self) -> usize {
        self.n_features
    }
}

impl Tree {
    fn predict(&self, row: &[f64]) -> f64 {
        let mut id = 0;
        loop {
            match &self.nodes[id] {
                Node::Leaf { p1 } => return *p1,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let value = row.get(*feature).copied().unwrap_or(0.0);
                    id = if value <= *threshold { *left } else { *right };
                }
            }
        }
    }
}

/// Grow one tree on a bootstrap sample. Returns the tree and the in-bag
/// count per training row.
fn grow_tree(
    x: &[Vec<f64>],
    y: &[Label],
    class_weights: &[f64],
    max_features: usize,
    rng: &mut StdRng,
) -> (Tree, Vec<u32>) {
    let n = x.len();
    let mut in_bag = vec![0u32; n];
    for _ in 0..n {
        in_bag[rng.gen_range(0..n)] += 1;
    }
    let weights = in_bag
        .iter()
        .zip(class_weights)
        .map(|(count, weight)| f64::from(*count) * weight)
        .collect::<Vec<_>>();
    let samples = (0..n).filter(|i| in_bag[*i] > 0).collect::<Vec<_>>();

    let width = x[0].len();
    let mut features = (0..width).collect::<Vec<_>>();
    let mut nodes = vec![Node::Leaf { p1: 0.0 }];
    let mut stack = vec![(0usize, samples)];

    while let Some((id, samples)) = stack.pop() {
        let (w0, w1) = class_totals(&samples, y, &weights);
        let p1 = w1 / (w0 + w1);
        if w0 == 0.0 || w1 == 0.0 || samples.len() < 2 {
            nodes[id] = Node::Leaf { p1 };
            continue;
        }

        features.shuffle(rng);
        let Some((feature, threshold)) = best_split(x, y, &weights, &samples, &features, max_features)
        else {
            nodes[id] = Node::Leaf { p1 };
            continue;
        };

        let (left_samples, right_samples): (Vec<usize>, Vec<usize>) = samples
            .into_iter()
            .partition(|i| x[*i][feature] <= threshold);
        let left = nodes.len();
        let right = left + 1;
        nodes.push(Node::Leaf { p1: 0.0 });
        nodes.push(Node::Leaf { p1: 0.0 });
        nodes[id] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        stack.push((right, right_samples));
        stack.push((left, left_samples));
    }

    (Tree { nodes }, in_bag)
}

fn class_totals(samples: &[usize], y: &[Label], weights: &[f64]) -> (f64, f64) {
    samples.iter().fold((0.0, 0.0), |(w0, w1), i| {
        if y[*i] == SUSCEPTIBLE {
            (w0, w1 + weights[*i])
        } else {
            (w0 + weights[*i], w1)
        }
    })
}

fn gini(w0: f64, w1: f64) -> f64 {
    let total = w0 + w1;
    if total <= 0.0 {
        return 0.0;
    }
    let (p0, p1) = (w0 / total, w1 / total);
    1.0 - p0 * p0 - p1 * p1
}

/// Lowest weighted child impurity over the candidate features. Constant
/// features do not count towards `max_features`.
fn best_split(
    x: &[Vec<f64>],
    y: &[Label],
    weights: &[f64],
    samples: &[usize],
    features: &[usize],
    max_features: usize,
) -> Option<(usize, f64)> {
    let (total0, total1) = class_totals(samples, y, weights);
    let mut best: Option<(f64, usize, f64)> = None;
    let mut evaluated = 0;
    let mut order = samples.to_vec();

    for &feature in features {
        if evaluated == max_features {
            break;
        }
        order.sort_by(|a, b| x[*a][feature].total_cmp(&x[*b][feature]));
        let first = x[order[0]][feature];
        let last = x[order[order.len() - 1]][feature];
        if first == last {
            continue;
        }
        evaluated += 1;

        let (mut left0, mut left1) = (0.0, 0.0);
        for pair in order.windows(2) {
            let (current, next) = (pair[0], pair[1]);
            if y[current] == SUSCEPTIBLE {
                left1 += weights[current];
            } else {
                left0 += weights[current];
            }
            let (a, b) = (x[current][feature], x[next][feature]);
            if a == b {
                continue;
            }
            let (right0, right1) = (total0 - left0, total1 - left1);
            let impurity = (left0 + left1) * gini(left0, left1) + (right0 + right1) * gini(right0, right1);
            if best.is_none_or(|(score, _, _)| impurity < score) {
                let mid = a + (b - a) / 2.0;
                let threshold = if mid < b { mid } else { a };
                best = Some((impurity, feature, threshold));
            }
        }
    }

    best.map(|(_, feature, threshold)| (feature, threshold))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn separable() -> (Vec<Vec<f64>>, Vec<Label>) {
        let x = vec![
            vec![1.0, 0.0, 0.0],
            vec![1.0, 0.0, 1.0],
            vec![1.0, 1.0, 0.0],
            vec![0.0, 1.0, 1.0],
            vec![0.0, 0.0, 1.0],
            vec![0.0, 1.0, 0.0],
        ];
        (x, vec![0, 0, 0, 1, 1, 1])
    }

    #[test]
    fn learns_a_separating_feature() {
        let (x, y) = separable();
        let mut forest = RandomForest::new(50, false, 7);
        forest.fit(&x, &y).unwrap();
        assert_eq!(forest.n_trees(), 50);
        assert_eq!(forest.n_features(), 3);
        assert_eq!(forest.predict(&[1.0, 0.0, 0.0]), 0);
        assert_eq!(forest.predict(&[0.0, 1.0, 1.0]), 1);
        assert!(forest.oob_score().is_some());
    }

    #[test]
    fn same_seed_same_forest() {
        let (x, y) = separable();
        let mut a = RandomForest::new(20, true, 3);
        let mut b = RandomForest::new(20, true, 3);
        a.fit(&x, &y).unwrap();
        b.fit(&x, &y).unwrap();
        for row in &x {
            assert_eq!(a.predict_proba(row), b.predict_proba(row));
        }
        assert_eq!(a.oob_score(), b.oob_score());
    }

    #[test]
    fn gini_of_pure_node_is_zero() {
        assert_eq!(gini(3.0, 0.0), 0.0);
        assert_eq!(gini(1.0, 1.0), 0.5);
    }
}
