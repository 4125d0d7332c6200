//! Stratified cross-validation and confusion-matrix metrics.
//!
//! Counts from every fold are summed first and ratios are derived once from
//! the totals, so folds of unequal size weigh in proportion to their samples.

use std::fmt;
use std::ops::{Add, AddAssign};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::TrainOptions;
use crate::domain::{Label, SUSCEPTIBLE};
use crate::error::AmrError;
use crate::model::{Classifier, Model, StandardScaler};

/// Confusion counts with label 1 as the positive class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionCounts {
    pub tp: usize,
    pub tn: usize,
    pub fp: usize,
    #[serde(rename = "fn")]
    pub fn_: usize,
}

impl ConfusionCounts {
    pub fn from_predictions(truth: &[Label], predicted: &[Label]) -> Self {
        truth
            .iter()
            .zip(predicted)
            .fold(Self::default(), |mut counts, (actual, guess)| {
                match (*actual == SUSCEPTIBLE, *guess == SUSCEPTIBLE) {
                    (true, true) => counts.tp += 1,
                    (false, false) => counts.tn += 1,
                    (false, true) => counts.fp += 1,
                    (true, false) => counts.fn_ += 1,
                }
                counts
            })
    }

    pub fn total(&self) -> usize {
        self.tp + self.tn + self.fp + self.fn_
    }
}

impl Add for ConfusionCounts {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            tp: self.tp + other.tp,
            tn: self.tn + other.tn,
            fp: self.fp + other.fp,
            fn_: self.fn_ + other.fn_,
        }
    }
}

impl AddAssign for ConfusionCounts {
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}

impl std::iter::Sum for ConfusionCounts {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub folds: usize,
    #[serde(flatten)]
    pub counts: ConfusionCounts,
    pub accuracy: Option<f64>,
    pub sensitivity: Option<f64>,
    pub specificity: Option<f64>,
    pub precision: Option<f64>,
    pub f_measure: Option<f64>,
}

impl EvaluationMetrics {
    pub fn from_counts(counts: ConfusionCounts, folds: usize) -> Self {
        let ConfusionCounts { tp, tn, fp, fn_ } = counts;
        let sensitivity = ratio(tp, tp + fn_);
        let precision = ratio(tp, tp + fp);
        let f_measure = match (precision, sensitivity) {
            (Some(p), Some(r)) if p + r > 0.0 => Some(2.0 * p * r / (p + r)),
            _ => None,
        };
        Self {
            folds,
            counts,
            accuracy: ratio(tp + tn, counts.total()),
            sensitivity,
            specificity: ratio(tn, tn + fp),
            precision,
            f_measure,
        }
    }

    /// Sum fold counts, then derive ratios.
    pub fn from_folds(folds: &[ConfusionCounts]) -> Self {
        Self::from_counts(folds.iter().copied().sum(), folds.len())
    }
}

fn ratio(numerator: usize, denominator: usize) -> Option<f64> {
    (denominator > 0).then(|| numerator as f64 / denominator as f64)
}

struct Ratio(Option<f64>);

impl fmt::Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(value) => write!(f, "{value:.3}"),
            None => write!(f, "undefined"),
        }
    }
}

impl fmt::Display for EvaluationMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ConfusionCounts { tp, tn, fp, fn_ } = self.counts;
        writeln!(f, "Cross-validation ({} folds)", self.folds)?;
        writeln!(f, "  tp={tp} tn={tn} fp={fp} fn={fn_}")?;
        writeln!(f, "  accuracy:    {}", Ratio(self.accuracy))?;
        writeln!(f, "  sensitivity: {}", Ratio(self.sensitivity))?;
        writeln!(f, "  specificity: {}", Ratio(self.specificity))?;
        writeln!(f, "  precision:   {}", Ratio(self.precision))?;
        write!(f, "  f-measure:   {}", Ratio(self.f_measure))
    }
}

/// Fold index per sample. Indices of each class are dealt round-robin in
/// order, with the counter carried over from one class to the next.
pub fn stratified_folds(labels: &[Label], folds: usize) -> Vec<usize> {
    let mut assignment = vec![0; labels.len()];
    let mut counter = 0;
    let mut classes = labels.to_vec();
    classes.sort_unstable();
    classes.dedup();
    for class in classes {
        for (i, label) in labels.iter().enumerate() {
            if *label == class {
                assignment[i] = counter % folds;
                counter += 1;
            }
        }
    }
    assignment
}

/// Stratified k-fold cross-validation. The scaler, when enabled, is fitted
/// on each training split only.
pub fn cross_validate(
    rows: &[Vec<f64>],
    labels: &[Label],
    options: &TrainOptions,
) -> Result<EvaluationMetrics, AmrError> {
    if options.folds < 2 || rows.len() < options.folds {
        return Err(AmrError::InvalidFolds {
            folds: options.folds,
            samples: rows.len(),
        });
    }
    let assignment = stratified_folds(labels, options.folds);

    let per_fold = (0..options.folds)
        .into_par_iter()
        .map(|fold| {
            let (train, test): (Vec<usize>, Vec<usize>) =
                (0..rows.len()).partition(|i| assignment[*i] != fold);
            let train_x = train.iter().map(|i| rows[*i].clone()).collect::<Vec<_>>();
            let train_y = train.iter().map(|i| labels[*i]).collect::<Vec<_>>();

            let scaler = options.standardize.then(|| StandardScaler::fit(&train_x));
            let train_x = match &scaler {
                Some(scaler) => scaler.transform_rows(&train_x),
                None => train_x,
            };
            let mut model = Model::new(options);
            model.fit(&train_x, &train_y)?;

            let truth = test.iter().map(|i| labels[*i]).collect::<Vec<_>>();
            let predicted = test
                .iter()
                .map(|i| match &scaler {
                    Some(scaler) => model.predict(&scaler.transform(&rows[*i])),
                    None => model.predict(&rows[*i]),
                })
                .collect::<Vec<_>>();
            let counts = ConfusionCounts::from_predictions(&truth, &predicted);
            tracing::debug!(fold, train = train.len(), test = test.len(), ?counts, "fold evaluated");
            Ok(counts)
        })
        .collect::<Result<Vec<_>, AmrError>>()?;

    Ok(EvaluationMetrics::from_folds(&per_fold))
}
