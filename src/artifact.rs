use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use zip::ZipArchive;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::domain::{FeatureSource, LabelMap};
use crate::error::AmrError;
use crate::evaluate::EvaluationMetrics;
use crate::model::{Classifier, Model, ModelKind, StandardScaler};
use crate::space::FeatureSpace;
use crate::workspace::Workspace;

pub const ARTIFACT_SCHEMA_VERSION: u32 = 1;

const MODEL_ENTRY: &str = "model.json";
const FEATURES_ENTRY: &str = "features.json";
const LABEL_MAP_ENTRY: &str = "label_map.json";
const MANIFEST_ENTRY: &str = "manifest.json";

/// Training metadata stored next to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub schema_version: u32,
    pub tool: String,
    pub trained_at: String,
    pub model: ModelKind,
    /// Input shape the feature names were extracted from.
    #[serde(default)]
    pub source: FeatureSource,
    pub n_samples: usize,
    pub n_features: usize,
    pub standardized: bool,
    pub metrics: Option<EvaluationMetrics>,
    pub oob_score: Option<f64>,
}

#[derive(Serialize, Deserialize)]
struct ModelEntry {
    model: Model,
    scaler: Option<StandardScaler>,
}

/// A fitted model with everything needed to score a new isolate.
#[derive(Debug, Clone)]
pub struct ModelArtifact {
    pub model: Model,
    pub scaler: Option<StandardScaler>,
    pub features: FeatureSpace,
    pub label_map: LabelMap,
    pub manifest: Manifest,
}

impl ModelArtifact {
    /// Write the bundle atomically as a zip of JSON entries.
    pub fn save(&self, path: &Path) -> Result<(), AmrError> {
        self.check_widths()?;
        let entry = ModelEntry {
            model: self.model.clone(),
            scaler: self.scaler.clone(),
        };

        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        write_entry(&mut zip, MODEL_ENTRY, &entry)?;
        write_entry(&mut zip, FEATURES_ENTRY, &self.features)?;
        write_entry(&mut zip, LABEL_MAP_ENTRY, &self.label_map)?;
        write_entry(&mut zip, MANIFEST_ENTRY, &self.manifest)?;
        let bytes = zip
            .finish()
            .map_err(|err| AmrError::Filesystem(err.to_string()))?
            .into_inner();

        Workspace::write_bytes_atomic(path, &bytes)?;
        tracing::info!(path = %path.display(), "model artifact saved");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, AmrError> {
        let file = fs::File::open(path).map_err(|_| AmrError::ArtifactRead(path.to_path_buf()))?;
        let mut archive = ZipArchive::new(file)
            .map_err(|err| AmrError::ArtifactFormat(format!("{}: {err}", path.display())))?;

        let entry: ModelEntry = read_entry(&mut archive, MODEL_ENTRY)?;
        let features: FeatureSpace = read_entry(&mut archive, FEATURES_ENTRY)?;
        let label_map: LabelMap = read_entry(&mut archive, LABEL_MAP_ENTRY)?;
        let manifest: Manifest = read_entry(&mut archive, MANIFEST_ENTRY)?;

        if manifest.schema_version > ARTIFACT_SCHEMA_VERSION {
            return Err(AmrError::ArtifactFormat(format!(
                "unsupported schema version {}",
                manifest.schema_version
            )));
        }
        if !features.is_well_formed() {
            return Err(AmrError::ArtifactFormat(
                "feature names are not distinct".to_string(),
            ));
        }

        let artifact = Self {
            model: entry.model,
            scaler: entry.scaler,
            features,
            label_map,
            manifest,
        };
        artifact.check_widths()?;
        tracing::debug!(
            path = %path.display(),
            model = %artifact.manifest.model,
            features = artifact.features.len(),
            "model artifact loaded"
        );
        Ok(artifact)
    }

    fn check_widths(&self) -> Result<(), AmrError> {
        let expected = self.features.len();
        let widths = [
            Some(self.model.n_features()),
            self.scaler.as_ref().map(StandardScaler::width),
        ];
        for found in widths.into_iter().flatten() {
            if found != expected {
                return Err(AmrError::FeatureSpaceMismatch { expected, found });
            }
        }
        Ok(())
    }
}

fn write_entry<W, T>(zip: &mut ZipWriter<W>, name: &str, value: &T) -> Result<(), AmrError>
where
    W: Write + std::io::Seek,
    T: Serialize,
{
    let json = serde_json::to_vec_pretty(value)
        .map_err(|err| AmrError::ArtifactFormat(format!("{name}: {err}")))?;
    zip.start_file(name, SimpleFileOptions::default())
        .map_err(|err| AmrError::Filesystem(err.to_string()))?;
    zip.write_all(&json)
        .map_err(|err| AmrError::Filesystem(err.to_string()))?;
    Ok(())
}

fn read_entry<R, T>(archive: &mut ZipArchive<R>, name: &str) -> Result<T, AmrError>
where
    R: Read + std::io::Seek,
    T: DeserializeOwned,
{
    let mut entry = archive
        .by_name(name)
        .map_err(|err| AmrError::ArtifactFormat(format!("{name}: {err}")))?;
    let mut content = String::new();
    entry
        .read_to_string(&mut content)
        .map_err(|err| AmrError::ArtifactFormat(format!("{name}: {err}")))?;
    serde_json::from_str(&content).map_err(|err| AmrError::ArtifactFormat(format!("{name}: {err}")))
}
