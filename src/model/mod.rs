//! Binary classifiers over encoded feature matrices.
//!
//! Both models predict the probability of label 1 (susceptible); the hard
//! prediction is label 1 only when that probability exceeds one half.

mod forest;
mod logistic;
mod scaler;

use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::config::TrainOptions;
use crate::domain::{Label, RESISTANT, SUSCEPTIBLE};
use crate::error::AmrError;

pub use forest::RandomForest;
pub use logistic::LogisticRegression;
pub use scaler::StandardScaler;

pub trait Classifier {
    fn fit(&mut self, x: &[Vec<f64>], y: &[Label]) -> Result<(), AmrError>;

    /// Probability of label 1 for one row.
    fn predict_proba(&self, row: &[f64]) -> f64;

    fn predict(&self, row: &[f64]) -> Label {
        if self.predict_proba(row) > 0.5 {
            SUSCEPTIBLE
        } else {
            RESISTANT
        }
    }

    /// Width the model was fitted on.
    fn n_features(&self) -> usize;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Forest,
    Logistic,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::Forest => write!(f, "forest"),
            ModelKind::Logistic => write!(f, "logistic"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Model {
    Forest(RandomForest),
    Logistic(LogisticRegression),
}

impl Model {
    /// Unfitted model configured from training options.
    pub fn new(options: &TrainOptions) -> Self {
        match options.model {
            ModelKind::Forest => Model::Forest(RandomForest::new(
                options.trees,
                options.balanced,
                options.seed,
            )),
            ModelKind::Logistic => {
                Model::Logistic(LogisticRegression::new(options.c, options.balanced))
            }
        }
    }

    pub fn kind(&self) -> ModelKind {
        match self {
            Model::Forest(_) => ModelKind::Forest,
            Model::Logistic(_) => ModelKind::Logistic,
        }
    }

    pub fn oob_score(&self) -> Option<f64> {
        match self {
            Model::Forest(forest) => forest.oob_score(),
            Model::Logistic(_) => None,
        }
    }
}

impl Classifier for Model {
    fn fit(&mut self, x: &[Vec<f64>], y: &[Label]) -> Result<(), AmrError> {
        match self {
            Model::Forest(model) => model.fit(x, y),
            Model::Logistic(model) => model.fit(x, y),
        }
    }

    fn predict_proba(&self, row: &[f64]) -> f64 {
        match self {
            Model::Forest(model) => model.predict_proba(row),
            Model::Logistic(model) => model.predict_proba(row),
        }
    }

    fn n_features(&self) -> usize {
        match self {
            Model::Forest(model) => model.n_features(),
            Model::Logistic(model) => model.n_features(),
        }
    }
}

/// Shape checks shared by every `fit`. Returns the matrix width.
fn check_training_data(x: &[Vec<f64>], y: &[Label]) -> Result<usize, AmrError> {
    if x.is_empty() {
        return Err(AmrError::ModelFit("no training rows".to_string()));
    }
    if x.len() != y.len() {
        return Err(AmrError::ModelFit(format!(
            "{} rows but {} labels",
            x.len(),
            y.len()
        )));
    }
    let width = x[0].len();
    if x.iter().any(|row| row.len() != width) {
        return Err(AmrError::ModelFit("rows differ in width".to_string()));
    }
    if let Some(label) = y.iter().find(|label| **label > SUSCEPTIBLE) {
        return Err(AmrError::ModelFit(format!("label {label} is not binary")));
    }
    Ok(width)
}

/// Per-sample weights; `balanced` gives each class `n / (2 * n_class)`.
fn class_weights(y: &[Label], balanced: bool) -> Vec<f64> {
    if !balanced {
        return vec![1.0; y.len()];
    }
    let n = y.len() as f64;
    let positives = y.iter().filter(|label| **label == SUSCEPTIBLE).count() as f64;
    let negatives = n - positives;
    y.iter()
        .map(|label| {
            let count = if *label == SUSCEPTIBLE { positives } else { negatives };
            n / (2.0 * count)
        })
        .collect()
}
