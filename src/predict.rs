use std::fmt;
use std::path::Path;

use serde::Serialize;

use crate::artifact::ModelArtifact;
use crate::domain::{FeatureSource, Label, LabelMap};
use crate::error::AmrError;
use crate::features::{FeatureInput, FeatureMap};
use crate::model::Classifier;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub label: Label,
    pub label_name: String,
    /// Probability of label 1.
    pub probability: f64,
    #[serde(skip)]
    pub positive_name: String,
    /// Input features unknown to the model.
    pub dropped: usize,
    /// Model features absent from the input, scored as 0.
    pub zero_filled: usize,
    /// Out-of-bag accuracy of the model, forests only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oob_score: Option<f64>,
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Prediction: {} (probability {}={:.3})",
            self.label_name,
            self.positive_name.to_lowercase(),
            self.probability
        )
    }
}

pub struct Predictor {
    artifact: ModelArtifact,
}

impl Predictor {
    pub fn load(path: &Path) -> Result<Self, AmrError> {
        Ok(Self::new(ModelArtifact::load(path)?))
    }

    pub fn new(artifact: ModelArtifact) -> Self {
        Self { artifact }
    }

    pub fn label_map(&self) -> &LabelMap {
        &self.artifact.label_map
    }

    /// Input shape the model's features were extracted from.
    pub fn source(&self) -> FeatureSource {
        self.artifact.manifest.source
    }

    /// Score one isolate. Features are aligned to the persisted space by name.
    pub fn predict_map(&self, features: &FeatureMap) -> Prediction {
        let projection = self.artifact.features.project(features);
        if projection.dropped > 0 {
            tracing::debug!(dropped = projection.dropped, "features unknown to the model ignored");
        }
        let row = match &self.artifact.scaler {
            Some(scaler) => scaler.transform(&projection.values),
            None => projection.values,
        };
        let probability = self.artifact.model.predict_proba(&row);
        let label = self.artifact.model.predict(&row);
        let label_map = self.label_map();
        Prediction {
            label,
            label_name: label_map.name(label),
            probability,
            positive_name: label_map.positive_name(),
            dropped: projection.dropped,
            zero_filled: projection.zero_filled,
            oob_score: self.artifact.manifest.oob_score,
        }
    }

    /// Extract and score one isolate. The input must have the shape the model
    /// was trained on, otherwise no feature name could line up.
    pub fn predict_input(&self, input: &FeatureInput) -> Result<Prediction, AmrError> {
        if input.source() != self.source() {
            return Err(AmrError::FeatureSourceMismatch {
                expected: self.source(),
                found: input.source(),
            });
        }
        let features = input.extract()?;
        Ok(self.predict_map(&features))
    }
}
