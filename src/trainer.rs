use crate::artifact::{ARTIFACT_SCHEMA_VERSION, Manifest, ModelArtifact};
use crate::config::TrainOptions;
use crate::dataset::LabeledDataset;
use crate::domain::{RESISTANT, SUSCEPTIBLE};
use crate::error::AmrError;
use crate::evaluate::{EvaluationMetrics, cross_validate};
use crate::model::{Classifier, Model, StandardScaler};

#[derive(Debug)]
pub struct TrainOutcome {
    pub artifact: ModelArtifact,
    /// `None` when the dataset was too small for cross-validation.
    pub metrics: Option<EvaluationMetrics>,
}

pub struct Trainer;

impl Trainer {
    /// Fit on the full dataset and, separately, cross-validate with the same
    /// options. The artifact always comes from the full fit.
    pub fn train(dataset: &LabeledDataset, options: &TrainOptions) -> Result<TrainOutcome, AmrError> {
        let encoded = dataset.encode()?;
        if encoded.space.is_empty() {
            return Err(AmrError::EmptyDataset(
                "labeled isolates carry no features".to_string(),
            ));
        }
        for class in [RESISTANT, SUSCEPTIBLE] {
            if !encoded.labels.contains(&class) {
                return Err(AmrError::ModelFit(format!(
                    "no isolate labeled {}",
                    encoded.label_map.name(class)
                )));
            }
        }
        let rows = &encoded.matrix.rows;
        tracing::info!(
            samples = rows.len(),
            features = encoded.space.len(),
            model = %options.model,
            source = %options.source,
            "training"
        );

        let metrics = if rows.len() < options.folds {
            tracing::warn!(
                samples = rows.len(),
                folds = options.folds,
                "fewer samples than folds, skipping cross-validation"
            );
            None
        } else {
            let metrics = cross_validate(rows, &encoded.labels, options)?;
            tracing::info!(accuracy = ?metrics.accuracy, folds = metrics.folds, "cross-validation done");
            Some(metrics)
        };

        let scaler = options.standardize.then(|| StandardScaler::fit(rows));
        let train_x = match &scaler {
            Some(scaler) => scaler.transform_rows(rows),
            None => rows.clone(),
        };
        let mut model = Model::new(options);
        model.fit(&train_x, &encoded.labels)?;

        let manifest = Manifest {
            schema_version: ARTIFACT_SCHEMA_VERSION,
            tool: format!("kira-amr/{}", env!("CARGO_PKG_VERSION")),
            trained_at: chrono::Utc::now().to_rfc3339(),
            model: options.model,
            source: options.source,
            n_samples: rows.len(),
            n_features: encoded.space.len(),
            standardized: options.standardize,
            metrics: metrics.clone(),
            oob_score: model.oob_score(),
        };

        Ok(TrainOutcome {
            artifact: ModelArtifact {
                model,
                scaler,
                features: encoded.space,
                label_map: encoded.label_map,
                manifest,
            },
            metrics,
        })
    }
}
