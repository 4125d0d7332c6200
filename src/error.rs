use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum AmrError {
    #[error("invalid accession: {0}")]
    InvalidAccession(String),

    #[error("failed to read accession list at {0}")]
    AccessionListRead(PathBuf),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to start worker pool: {0}")]
    WorkerPool(String),

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("{tool} failed: {message}")]
    ToolFailed { tool: String, message: String },

    #[error("{tool} did not finish within {secs}s")]
    ToolTimeout { tool: String, secs: u64 },

    #[error("expected output not found: {0}")]
    MissingOutput(String),

    #[error("illegal state change for {accession}: {from} -> {to}")]
    InvalidTransition {
        accession: String,
        from: String,
        to: String,
    },

    #[error("failed to parse report {path}: {message}")]
    ReportParse { path: PathBuf, message: String },

    #[error("input not found: {0}")]
    InputNotFound(PathBuf),

    #[error("failed to parse label table: {0}")]
    LabelParse(String),

    #[error("invalid label {value} for sample {sample} (expected 0 or 1)")]
    InvalidLabel { sample: String, value: i64 },

    #[error("conflicting labels for sample {0}")]
    LabelConflict(String),

    #[error("no labeled isolates with features: {0}")]
    EmptyDataset(String),

    #[error("cannot split {samples} samples into {folds} folds")]
    InvalidFolds { folds: usize, samples: usize },

    #[error("model fitting failed: {0}")]
    ModelFit(String),

    #[error("failed to read model artifact at {0}")]
    ArtifactRead(PathBuf),

    #[error("malformed model artifact: {0}")]
    ArtifactFormat(String),

    #[error("feature space mismatch: expected {expected} columns, found {found}")]
    FeatureSpaceMismatch { expected: usize, found: usize },

    #[error("model was trained on {expected} features but the input is a {found}")]
    FeatureSourceMismatch {
        expected: crate::domain::FeatureSource,
        found: crate::domain::FeatureSource,
    },

    #[error("--clusters applies to a single input, got {0}")]
    ClustersOverride(usize),
}
