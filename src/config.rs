use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::domain::FeatureSource;
use crate::error::AmrError;
use crate::model::ModelKind;
use crate::workspace::Workspace;

pub const DEFAULT_CONFIG_FILE: &str = "kira-amr.json";

/// Raw JSON configuration; every field may be omitted.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub threads: Option<usize>,
    #[serde(default)]
    pub retries: Option<u32>,
    #[serde(default)]
    pub backoff_secs: Option<u64>,
    #[serde(default)]
    pub tool_timeout_secs: Option<u64>,
    #[serde(default)]
    pub download: Option<bool>,
    #[serde(default)]
    pub call_variants: Option<bool>,
    #[serde(default)]
    pub delete_raw: Option<bool>,
    #[serde(default)]
    pub reads_dir: Option<String>,
    #[serde(default)]
    pub calls_dir: Option<String>,
    #[serde(default)]
    pub summary_dir: Option<String>,
    #[serde(default)]
    pub logs_dir: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub run_log: Option<String>,
    #[serde(default)]
    pub triage_file: Option<String>,
    #[serde(default)]
    pub training: Option<TrainingEntry>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct TrainingEntry {
    #[serde(default)]
    pub source: Option<FeatureSource>,
    #[serde(default)]
    pub model: Option<ModelKind>,
    #[serde(default)]
    pub folds: Option<usize>,
    #[serde(default)]
    pub standardize: Option<bool>,
    #[serde(default)]
    pub trees: Option<usize>,
    #[serde(default)]
    pub balanced: Option<bool>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub c: Option<f64>,
}

/// Knobs of one orchestration batch.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub workers: usize,
    pub threads: usize,
    pub retries: u32,
    pub backoff: Duration,
    pub download: bool,
    pub call_variants: bool,
    pub delete_raw: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            threads: default_threads(),
            retries: 2,
            backoff: Duration::from_secs(5),
            download: true,
            call_variants: true,
            delete_raw: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainOptions {
    /// Input shape the feature space is built from; persisted with the model.
    pub source: FeatureSource,
    pub model: ModelKind,
    pub folds: usize,
    pub standardize: bool,
    pub trees: usize,
    pub balanced: bool,
    pub seed: u64,
    pub c: f64,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            source: FeatureSource::Report,
            model: ModelKind::Forest,
            folds: 3,
            standardize: true,
            trees: 200,
            balanced: false,
            seed: 0,
            c: 1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub pipeline: PipelineOptions,
    pub tool_timeout: Option<Duration>,
    pub workspace: Workspace,
    pub reference: PathBuf,
    pub run_log: PathBuf,
    pub triage_file: PathBuf,
    pub training: TrainOptions,
}

/// Command-line values that win over the config file.
#[derive(Debug, Clone, Default)]
pub struct PipelineOverrides {
    pub workers: Option<usize>,
    pub threads: Option<usize>,
    pub retries: Option<u32>,
    pub backoff_secs: Option<u64>,
    pub tool_timeout_secs: Option<u64>,
    pub reads_dir: Option<String>,
    pub calls_dir: Option<String>,
    pub summary_dir: Option<String>,
    pub no_download: bool,
    pub no_call: bool,
    pub keep_raw: bool,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load `path`, or `kira-amr.json` when present, or fall back to defaults.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, AmrError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            tracing::debug!("no {DEFAULT_CONFIG_FILE} found, using defaults");
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| AmrError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| AmrError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, AmrError> {
        let schema_version = config.schema_version.unwrap_or(1);
        let defaults = PipelineOptions::default();

        let workers = config.workers.unwrap_or(defaults.workers);
        if workers == 0 {
            return Err(AmrError::ConfigParse("workers must be at least 1".to_string()));
        }

        let pipeline = PipelineOptions {
            workers,
            threads: config.threads.unwrap_or(defaults.threads).max(1),
            retries: config.retries.unwrap_or(defaults.retries),
            backoff: config
                .backoff_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.backoff),
            download: config.download.unwrap_or(defaults.download),
            call_variants: config.call_variants.unwrap_or(defaults.call_variants),
            delete_raw: config.delete_raw.unwrap_or(defaults.delete_raw),
        };

        let workspace = Workspace::new(
            dir_or(config.reads_dir, "fastq"),
            dir_or(config.calls_dir, "aribaResult_withBam"),
            dir_or(config.summary_dir, "summary_output_full"),
            dir_or(config.logs_dir, "logs"),
        );

        let training_defaults = TrainOptions::default();
        let entry = config.training.unwrap_or_default();
        let training = TrainOptions {
            source: entry.source.unwrap_or(training_defaults.source),
            model: entry.model.unwrap_or(training_defaults.model),
            folds: entry.folds.unwrap_or(training_defaults.folds),
            standardize: entry.standardize.unwrap_or(training_defaults.standardize),
            trees: entry.trees.unwrap_or(training_defaults.trees),
            balanced: entry.balanced.unwrap_or(training_defaults.balanced),
            seed: entry.seed.unwrap_or(training_defaults.seed),
            c: entry.c.unwrap_or(training_defaults.c),
        };
        if training.folds < 2 {
            return Err(AmrError::ConfigParse("folds must be at least 2".to_string()));
        }
        if training.trees == 0 || training.c <= 0.0 {
            return Err(AmrError::ConfigParse(
                "trees and c must be positive".to_string(),
            ));
        }

        Ok(ResolvedConfig {
            schema_version,
            pipeline,
            tool_timeout: config.tool_timeout_secs.map(Duration::from_secs),
            workspace,
            reference: PathBuf::from(
                config
                    .reference
                    .unwrap_or_else(|| "out1.card.prepareref".to_string()),
            ),
            run_log: PathBuf::from(
                config
                    .run_log
                    .unwrap_or_else(|| "aribaRunLog.txt".to_string()),
            ),
            triage_file: PathBuf::from(
                config
                    .triage_file
                    .unwrap_or_else(|| "sra_paired_read_notFound.txt".to_string()),
            ),
            training,
        })
    }
}

impl ResolvedConfig {
    pub fn apply(&mut self, overrides: &PipelineOverrides) {
        if let Some(workers) = overrides.workers {
            self.pipeline.workers = workers.max(1);
        }
        if let Some(threads) = overrides.threads {
            self.pipeline.threads = threads.max(1);
        }
        if let Some(retries) = overrides.retries {
            self.pipeline.retries = retries;
        }
        if let Some(secs) = overrides.backoff_secs {
            self.pipeline.backoff = Duration::from_secs(secs);
        }
        if let Some(secs) = overrides.tool_timeout_secs {
            self.tool_timeout = Some(Duration::from_secs(secs));
        }
        if overrides.no_download {
            self.pipeline.download = false;
        }
        if overrides.no_call {
            self.pipeline.call_variants = false;
        }
        if overrides.keep_raw {
            self.pipeline.delete_raw = false;
        }
        if overrides.reads_dir.is_some()
            || overrides.calls_dir.is_some()
            || overrides.summary_dir.is_some()
        {
            let pick = |value: &Option<String>, current: &camino::Utf8Path| {
                value
                    .as_ref()
                    .map(Utf8PathBuf::from)
                    .unwrap_or_else(|| current.to_path_buf())
            };
            self.workspace = Workspace::new(
                pick(&overrides.reads_dir, self.workspace.reads_root()),
                pick(&overrides.calls_dir, self.workspace.calls_root()),
                pick(&overrides.summary_dir, self.workspace.summary_root()),
                self.workspace.logs_root().to_path_buf(),
            );
        }
    }
}

fn dir_or(value: Option<String>, default: &str) -> Utf8PathBuf {
    Utf8PathBuf::from(value.unwrap_or_else(|| default.to_string()))
}

fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(2))
        .unwrap_or(1)
        .max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.pipeline.retries, 2);
        assert_eq!(resolved.pipeline.backoff, Duration::from_secs(5));
        assert!(resolved.pipeline.delete_raw);
        assert_eq!(resolved.training, TrainOptions::default());
        assert!(resolved.workspace.calls_root().ends_with("aribaResult_withBam"));
    }

    #[test]
    fn overrides_win() {
        let mut resolved = ConfigLoader::resolve_config(Config {
            workers: Some(8),
            ..Config::default()
        })
        .unwrap();
        resolved.apply(&PipelineOverrides {
            workers: Some(2),
            keep_raw: true,
            calls_dir: Some("out/calls".to_string()),
            ..PipelineOverrides::default()
        });
        assert_eq!(resolved.pipeline.workers, 2);
        assert!(!resolved.pipeline.delete_raw);
        assert_eq!(resolved.workspace.calls_root().as_str(), "out/calls");
        assert!(resolved.workspace.reads_root().ends_with("fastq"));
    }
}
