use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::AmrError;

static ACCESSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-]*$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Accession(String);

impl Accession {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Accession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Accession {
    type Err = AmrError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        if !ACCESSION_RE.is_match(normalized) {
            return Err(AmrError::InvalidAccession(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

/// Parse an accession list: a JSON array (or object of values) of strings, or
/// newline-separated text with stray quotes, commas and brackets.
///
/// Entries that still fail validation are logged and skipped. Duplicates keep
/// their first position. Object values come back in file order.
pub fn parse_accession_list(content: &str) -> Vec<Accession> {
    let raw: Vec<String> = match serde_json::from_str::<serde_json::Value>(content) {
        Ok(serde_json::Value::Array(values)) => values.into_iter().map(json_scalar).collect(),
        Ok(serde_json::Value::Object(map)) => map.into_iter().map(|(_, v)| json_scalar(v)).collect(),
        _ => content.lines().map(strip_decoration).collect(),
    };

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for entry in raw {
        let cleaned = strip_decoration(&entry);
        if cleaned.is_empty() {
            continue;
        }
        match cleaned.parse::<Accession>() {
            Ok(acc) => {
                if seen.insert(acc.clone()) {
                    out.push(acc);
                } else {
                    tracing::debug!(accession = %acc, "duplicate accession dropped");
                }
            }
            Err(_) => tracing::warn!(line = %entry, "skipping unparseable accession entry"),
        }
    }
    out
}

fn json_scalar(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

fn strip_decoration(line: &str) -> String {
    let trimmed = line.trim();
    // `"SRR123", trailing note` keeps only the quoted part
    if let Some(rest) = trimmed.strip_prefix('"') {
        if let Some((inner, _)) = rest.split_once('"') {
            return inner.trim().to_string();
        }
    }
    trimmed
        .chars()
        .filter(|ch| !matches!(ch, '"' | '\'' | ',' | '[' | ']'))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Phenotype class encoded as 0/1.
pub type Label = u8;

pub const RESISTANT: Label = 0;
pub const SUSCEPTIBLE: Label = 1;

/// Meaning of each label value, persisted next to a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelMap(BTreeMap<Label, String>);

impl LabelMap {
    pub fn name(&self, label: Label) -> String {
        self.0
            .get(&label)
            .cloned()
            .unwrap_or_else(|| format!("label {label}"))
    }

    pub fn positive_name(&self) -> String {
        self.name(SUSCEPTIBLE)
    }
}

impl Default for LabelMap {
    fn default() -> Self {
        let mut map = BTreeMap::new();
        map.insert(RESISTANT, "Resistant".to_string());
        map.insert(SUSCEPTIBLE, "Susceptible".to_string());
        Self(map)
    }
}

/// Input shape used to derive features for one isolate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FeatureSource {
    /// Per-row variant-call report (`report.tsv`).
    #[default]
    Report,
    /// Flat per-isolate summary table (`*_summary.csv`).
    Summary,
}

impl fmt::Display for FeatureSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureSource::Report => write!(f, "report"),
            FeatureSource::Summary => write!(f, "summary"),
        }
    }
}
