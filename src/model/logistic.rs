use serde::{Deserialize, Serialize};

use super::{Classifier, check_training_data, class_weights};
use crate::domain::{Label, SUSCEPTIBLE};
use crate::error::AmrError;

const MAX_ITER: usize = 5000;
const TOLERANCE: f64 = 1e-8;

/// L2-regularized logistic regression fitted by accelerated gradient
/// descent. `c` is the inverse regularization strength; the intercept is
/// not penalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticRegression {
    c: f64,
    balanced: bool,
    weights: Vec<f64>,
    intercept: f64,
}

impl LogisticRegression {
    pub fn new(c: f64, balanced: bool) -> Self {
        Self {
            c,
            balanced,
            weights: Vec::new(),
            intercept: 0.0,
        }
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.weights
    }

    fn decision(&self, row: &[f64]) -> f64 {
        self.intercept
            + self
                .weights
                .iter()
                .zip(row)
                .map(|(w, x)| w * x)
                .sum::<f64>()
    }
}

impl Classifier for LogisticRegression {
    fn fit(&mut self, x: &[Vec<f64>], y: &[Label]) -> Result<(), AmrError> {
        let width = check_training_data(x, y)?;
        if self.c.is_nan() || self.c <= 0.0 {
            return Err(AmrError::ModelFit(format!("c must be positive, got {}", self.c)));
        }
        let sample_weights = class_weights(y, self.balanced);
        let targets = y
            .iter()
            .map(|label| if *label == SUSCEPTIBLE { 1.0 } else { 0.0 })
            .collect::<Vec<_>>();
        let n = x.len() as f64;
        let lambda = 1.0 / (self.c * n);

        // Lipschitz bound of the mean-loss gradient with the intercept column.
        let max_norm = x
            .iter()
            .zip(&sample_weights)
            .map(|(row, s)| s * (1.0 + row.iter().map(|v| v * v).sum::<f64>()))
            .fold(0.0, f64::max);
        let step = 1.0 / (0.25 * max_norm + lambda);

        // Parameters are [intercept, w_1, .., w_p].
        let mut theta = vec![0.0; width + 1];
        let mut previous = theta.clone();
        let mut gradient = vec![0.0; width + 1];

        for iter in 0..MAX_ITER {
            let momentum = iter as f64 / (iter as f64 + 3.0);
            let lookahead = theta
                .iter()
                .zip(&previous)
                .map(|(t, p)| t + momentum * (t - p))
                .collect::<Vec<_>>();

            gradient.iter_mut().for_each(|g| *g = 0.0);
            for ((row, target), s) in x.iter().zip(&targets).zip(&sample_weights) {
                let z = lookahead[0]
                    + lookahead[1..]
                        .iter()
                        .zip(row)
                        .map(|(w, v)| w * v)
                        .sum::<f64>();
                let residual = s * (sigmoid(z) - target) / n;
                gradient[0] += residual;
                for (g, v) in gradient[1..].iter_mut().zip(row) {
                    *g += residual * v;
                }
            }
            for (g, w) in gradient[1..].iter_mut().zip(&lookahead[1..]) {
                *g += lambda * w;
            }

            let next = lookahead
                .iter()
                .zip(&gradient)
                .map(|(l, g)| l - step * g)
                .collect::<Vec<_>>();
            let change = next
                .iter()
                .zip(&theta)
                .map(|(a, b)| (a - b).abs())
                .fold(0.0, f64::max);
            previous = std::mem::replace(&mut theta, next);
            if change < TOLERANCE {
                tracing::debug!(iterations = iter + 1, "logistic regression converged");
                break;
            }
        }

        self.intercept = theta[0];
        self.weights = theta[1..].to_vec();
        Ok(())
    }

    fn predict_proba(&self, row: &[f64]) -> f64 {
        sigmoid(self.decision(row))
    }

    fn n_features(&self) -> usize {
        self.weights.len()
    }
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}
