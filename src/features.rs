//! Per-isolate feature extraction.
//!
//! Two input shapes are understood and kept apart:
//!
//! * a variant-call report (`report.tsv`), optionally gated by the cluster
//!   matches listed in the isolate's summary table;
//! * a flat summary table with one `gene`/`var` row per feature.
//!
//! Within one isolate the first row that produces a feature name decides its
//! value.

use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::domain::{Accession, FeatureSource};
use crate::error::AmrError;
use crate::workspace::{REPORT_FILE, Workspace};

const CALL_DIR_PREFIX: &str = "outRun_";

/// Sentinel used in `known_var` for "no variant, gene presence only".
const NO_VARIANT: &str = ".";

/// Values pandas would read as missing.
const NA_TOKENS: &[&str] = &[
    "", "NA", "N/A", "n/a", "NaN", "nan", "-nan", "NULL", "null", "None", "<NA>", "#N/A",
];

/// Sparse 0/1 features of one isolate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureMap {
    values: BTreeMap<String, u8>,
}

impl FeatureMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unless the name is already present; returns whether it was new.
    pub fn insert_first(&mut self, name: impl Into<String>, value: u8) -> bool {
        let name = name.into();
        if self.values.contains_key(&name) {
            return false;
        }
        self.values.insert(name, value);
        true
    }

    pub fn get(&self, name: &str) -> Option<u8> {
        self.values.get(name).copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u8)> {
        self.values.iter().map(|(name, value)| (name.as_str(), *value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, u8)> for FeatureMap {
    fn from_iter<T: IntoIterator<Item = (S, u8)>>(iter: T) -> Self {
        let mut map = FeatureMap::new();
        for (name, value) in iter {
            map.insert_first(name, value);
        }
        map
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportRow {
    pub ref_name: String,
    pub known_var: String,
    #[serde(default)]
    pub gene: String,
    #[serde(default)]
    pub cluster: String,
    #[serde(default)]
    pub has_known_var: String,
    #[serde(default)]
    pub known_var_change: String,
    #[serde(default)]
    pub ref_ctg_change: String,
}

#[derive(Debug, Clone)]
pub struct VariantCallReport {
    pub rows: Vec<ReportRow>,
}

impl VariantCallReport {
    pub fn read(path: &Path) -> Result<Self, AmrError> {
        let file = File::open(path).map_err(|_| AmrError::InputNotFound(path.to_path_buf()))?;
        Self::from_reader(file, path)
    }

    pub fn from_reader<R: Read>(reader: R, origin: &Path) -> Result<Self, AmrError> {
        let parse_err = |message: String| AmrError::ReportParse {
            path: origin.to_path_buf(),
            message,
        };
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .flexible(true)
            .from_reader(reader);
        let headers = reader
            .headers()
            .map_err(|err| parse_err(err.to_string()))?
            .iter()
            .map(normalize_header)
            .collect::<csv::StringRecord>();
        reader.set_headers(headers);

        let mut rows = Vec::new();
        for (line, record) in reader.deserialize::<ReportRow>().enumerate() {
            let row = record.map_err(|err| parse_err(format!("row {}: {err}", line + 1)))?;
            rows.push(row);
        }
        Ok(Self { rows })
    }
}

/// Report headers come as `#ref_name` or `#ariba_ref_name` depending on the
/// tool version.
fn normalize_header(header: &str) -> String {
    let trimmed = header.trim().trim_start_matches('#');
    trimmed.strip_prefix("ariba_").unwrap_or(trimmed).to_string()
}

/// Clusters confirmed as matched in an isolate's summary table.
#[derive(Debug, Clone, Default)]
pub struct ClusterMatches {
    matched: HashSet<String>,
}

impl ClusterMatches {
    pub fn read(path: &Path) -> Result<Self, AmrError> {
        let file = File::open(path).map_err(|_| AmrError::InputNotFound(path.to_path_buf()))?;
        Self::from_reader(file, path)
    }

    pub fn from_reader<R: Read>(reader: R, origin: &Path) -> Result<Self, AmrError> {
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        let headers = reader
            .headers()
            .map_err(|err| AmrError::ReportParse {
                path: origin.to_path_buf(),
                message: err.to_string(),
            })?
            .clone();
        let mut matched = HashSet::new();
        if let Some(record) = reader.records().next() {
            let record = record.map_err(|err| AmrError::ReportParse {
                path: origin.to_path_buf(),
                message: err.to_string(),
            })?;
            for (header, value) in headers.iter().zip(record.iter()) {
                if let Some(cluster) = header.strip_suffix(".match") {
                    if value.trim() == "yes" {
                        matched.insert(cluster.to_string());
                    }
                }
            }
        }
        Ok(Self { matched })
    }

    pub fn is_matched(&self, cluster: &str) -> bool {
        self.matched.contains(cluster)
    }
}

impl<S: Into<String>> FromIterator<S> for ClusterMatches {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self {
            matched: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// Build features from a variant-call report.
pub fn extract_report(report: &VariantCallReport, clusters: Option<&ClusterMatches>) -> FeatureMap {
    let mut features = FeatureMap::new();
    for row in &report.rows {
        if let Some(clusters) = clusters {
            if !clusters.is_matched(&row.cluster) {
                continue;
            }
        }
        match row.known_var.trim() {
            NO_VARIANT => {
                features.insert_first(row.ref_name.clone(), 1);
            }
            // novel variant inside a coding gene
            "0" if row.gene.trim() == "1" => {
                features.insert_first(format!("{}.{}", row.ref_name, row.ref_ctg_change), 1);
            }
            "1" if row.has_known_var.trim() == "1" => {
                features.insert_first(format!("{}.{}", row.ref_name, row.known_var_change), 1);
            }
            _ => {}
        }
    }
    features
}

/// Build features from a flat summary table (`gene`, `var`, presence columns).
pub fn extract_flat_summary<R: Read>(reader: R, origin: &Path) -> Result<FeatureMap, AmrError> {
    let parse_err = |message: String| AmrError::ReportParse {
        path: origin.to_path_buf(),
        message,
    };
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let headers = reader
        .headers()
        .map_err(|err| parse_err(err.to_string()))?
        .clone();
    let column = |name: &str| headers.iter().position(|header| header.trim() == name);
    let gene_col = column("gene");
    let var_col = column("var");
    let present_col = column("variant_present");
    let ref_seq_col = column("ref_seq");
    let reads_col = column("reads");

    let mut features = FeatureMap::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.map_err(|err| parse_err(format!("row {}: {err}", index + 1)))?;
        let cell = |col: Option<usize>| col.and_then(|col| record.get(col)).filter(|v| !is_missing(v));

        let gene = cell(gene_col).map(str::trim).unwrap_or("NA");
        let name = match cell(var_col) {
            Some(var) => format!("{gene}:{}", var.trim()),
            None => format!("{gene}:{index}"),
        };
        let value = match present_col {
            // an empty flag cell is read as absent, not as a truthy NaN
            Some(_) => cell(present_col).map(is_truthy).unwrap_or(false),
            None => cell(ref_seq_col).is_some() || cell(reads_col).is_some(),
        };
        features.insert_first(name, u8::from(value));
    }
    Ok(features)
}

fn is_missing(value: &str) -> bool {
    NA_TOKENS.contains(&value.trim())
}

fn is_truthy(value: &str) -> bool {
    let value = value.trim();
    if let Ok(number) = value.parse::<f64>() {
        return number != 0.0;
    }
    matches!(
        value.to_ascii_lowercase().as_str(),
        "true" | "t" | "yes" | "y"
    )
}

/// Where one isolate's features come from.
#[derive(Debug, Clone)]
pub enum FeatureInput {
    Report {
        report: PathBuf,
        clusters: Option<PathBuf>,
    },
    Summary(PathBuf),
}

impl FeatureInput {
    pub fn source(&self) -> FeatureSource {
        match self {
            FeatureInput::Report { .. } => FeatureSource::Report,
            FeatureInput::Summary(_) => FeatureSource::Summary,
        }
    }

    pub fn extract(&self) -> Result<FeatureMap, AmrError> {
        match self {
            FeatureInput::Report { report, clusters } => {
                let parsed = VariantCallReport::read(report)?;
                let clusters = clusters
                    .as_deref()
                    .map(ClusterMatches::read)
                    .transpose()?;
                Ok(extract_report(&parsed, clusters.as_ref()))
            }
            FeatureInput::Summary(path) => {
                let file =
                    File::open(path).map_err(|_| AmrError::InputNotFound(path.to_path_buf()))?;
                extract_flat_summary(file, path)
            }
        }
    }
}

/// Report input for a call directory or a report file inside one. Rows are
/// gated by the isolate's summary table whenever the workspace holds one, the
/// same rule corpus discovery applies at training time.
pub fn report_input(workspace: &Workspace, path: &Path) -> FeatureInput {
    let (dir, report) = if path.is_dir() {
        (Some(path), path.join(REPORT_FILE))
    } else {
        (path.parent(), path.to_path_buf())
    };
    let clusters = dir
        .and_then(call_dir_accession)
        .map(|acc| workspace.summary_path(&acc).into_std_path_buf())
        .filter(|summary| summary.is_file());
    if clusters.is_none() {
        tracing::debug!(report = %report.display(), "no summary table, rows are not gated");
    }
    FeatureInput::Report { report, clusters }
}

/// Accession named by an `outRun_<acc>` call directory.
fn call_dir_accession(dir: &Path) -> Option<Accession> {
    dir.file_name()?
        .to_str()?
        .strip_prefix(CALL_DIR_PREFIX)?
        .parse()
        .ok()
}

/// Locate the per-isolate inputs of every accession present in the workspace.
pub fn discover_inputs(
    workspace: &Workspace,
    source: FeatureSource,
) -> Result<Vec<(Accession, FeatureInput)>, AmrError> {
    let mut found = Vec::new();
    match source {
        FeatureSource::Report => {
            for (name, path) in list_dir(workspace.calls_root().as_std_path())? {
                if !name.starts_with(CALL_DIR_PREFIX) {
                    continue;
                }
                if !path.join(REPORT_FILE).is_file() {
                    tracing::debug!(dir = %path.display(), "no report, skipping");
                    continue;
                }
                let Some(acc) = call_dir_accession(&path) else {
                    tracing::warn!(dir = %path.display(), "directory does not name an accession");
                    continue;
                };
                found.push((acc, report_input(workspace, &path)));
            }
        }
        FeatureSource::Summary => {
            for (name, path) in list_dir(workspace.summary_root().as_std_path())? {
                let Some(id) = name.strip_suffix("_summary.csv") else {
                    continue;
                };
                let Ok(acc) = id.parse::<Accession>() else {
                    tracing::warn!(file = %path.display(), "file does not name an accession");
                    continue;
                };
                found.push((acc, FeatureInput::Summary(path)));
            }
        }
    }
    found.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(found)
}

/// Extract every discovered isolate. Unreadable isolates are logged and left
/// out; they never fail the corpus.
pub fn load_corpus(
    workspace: &Workspace,
    source: FeatureSource,
) -> Result<BTreeMap<Accession, FeatureMap>, AmrError> {
    let inputs = discover_inputs(workspace, source)?;
    let mut corpus = BTreeMap::new();
    for (acc, input) in inputs {
        match input.extract() {
            Ok(features) => {
                tracing::debug!(accession = %acc, features = features.len(), "extracted");
                corpus.insert(acc, features);
            }
            Err(err) => tracing::warn!(accession = %acc, error = %err, "skipping isolate"),
        }
    }
    tracing::info!(isolates = corpus.len(), %source, "corpus loaded");
    Ok(corpus)
}

fn list_dir(dir: &Path) -> Result<Vec<(String, PathBuf)>, AmrError> {
    let entries = fs::read_dir(dir).map_err(|_| AmrError::InputNotFound(dir.to_path_buf()))?;
    let mut out = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| AmrError::Filesystem(err.to_string()))?;
        if let Some(name) = entry.file_name().to_str() {
            out.push((name.to_string(), entry.path()));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = "\
#ariba_ref_name\tref_type\tgene\tvar_only\tflag\treads\tcluster\tknown_var\tvar_type\tknown_var_change\thas_known_var\tref_ctg_change
katG\tp\t1\t0\t27\t120\tkatG\t.\t.\t.\t.\t.
katG\tp\t1\t0\t27\t120\tkatG\t1\tSNP\tS315T\t1\t.
rpoB\tp\t1\t0\t27\t90\trpoB\t0\tSNP\t.\t.\tD435V
rpoB\tp\t1\t0\t27\t90\trpoB\t1\tSNP\tH445Y\t0\t.
embB\tp\t1\t0\t27\t50\tembB\t.\t.\t.\t.\t.
katG\tp\t1\t0\t27\t120\tkatG\t1\tSNP\tS315T\t1\t.
rrs\tn\t0\t0\t27\t10\trrs\t0\tSNP\t.\t.\tA1401G
";

    fn report() -> VariantCallReport {
        VariantCallReport::from_reader(REPORT.as_bytes(), Path::new("report.tsv")).unwrap()
    }

    #[test]
    fn report_headers_are_normalized() {
        let report = report();
        assert_eq!(report.rows.len(), 7);
        assert_eq!(report.rows[0].ref_name, "katG");
    }

    #[test]
    fn report_rules_first_occurrence_wins() {
        let features = extract_report(&report(), None);
        let names: Vec<_> = features.names().collect();
        assert_eq!(names, vec!["embB", "katG", "katG.S315T", "rpoB.D435V"]);
        assert!(features.iter().all(|(_, value)| value == 1));
    }

    #[test]
    fn cluster_gate_drops_unmatched_rows() {
        let summary = "name,katG.match,katG.ref_seq,rpoB.match,embB.match\nreport.tsv,yes,katG,no,yes\n";
        let clusters = ClusterMatches::from_reader(summary.as_bytes(), Path::new("s.csv")).unwrap();
        let features = extract_report(&report(), Some(&clusters));
        let names: Vec<_> = features.names().collect();
        assert_eq!(names, vec!["embB", "katG", "katG.S315T"]);
    }

    #[test]
    fn flat_summary_uses_presence_flag() {
        let table = "gene,var,variant_present\nkatG,S315T,1\nrpoB,,0\nrpoB,H445Y,True\nkatG,S315T,0\n";
        let features = extract_flat_summary(table.as_bytes(), Path::new("x.csv")).unwrap();
        assert_eq!(features.get("katG:S315T"), Some(1));
        assert_eq!(features.get("rpoB:1"), Some(0));
        assert_eq!(features.get("rpoB:H445Y"), Some(1));
        assert_eq!(features.len(), 3);
    }

    #[test]
    fn empty_presence_cell_counts_as_absent() {
        let table = "gene,var,variant_present\ngyrA,D94G,\ngyrA,S91P,NaN\ngyrB,N538D,1\n";
        let features = extract_flat_summary(table.as_bytes(), Path::new("x.csv")).unwrap();
        assert_eq!(features.get("gyrA:D94G"), Some(0));
        assert_eq!(features.get("gyrA:S91P"), Some(0));
        assert_eq!(features.get("gyrB:N538D"), Some(1));
    }

    #[test]
    fn call_directory_names_its_accession() {
        assert_eq!(
            call_dir_accession(Path::new("calls/outRun_SRR42")).map(|acc| acc.to_string()),
            Some("SRR42".to_string())
        );
        assert_eq!(call_dir_accession(Path::new("calls/elsewhere")), None);
        assert_eq!(call_dir_accession(Path::new("")), None);
    }

    #[test]
    fn flat_summary_falls_back_to_sequence_or_reads() {
        let table = "gene,var,ref_seq,reads\ninhA,c-15t,ACGT,\nahpC,g-48a,,NA\nfabG1,,,12\n";
        let features = extract_flat_summary(table.as_bytes(), Path::new("x.csv")).unwrap();
        assert_eq!(features.get("inhA:c-15t"), Some(1));
        assert_eq!(features.get("ahpC:g-48a"), Some(0));
        assert_eq!(features.get("fabG1:2"), Some(1));
    }

    #[test]
    fn missing_required_column_is_an_error() {
        let bad = "#ref_name\tgene\nkatG\t1\n";
        let err = VariantCallReport::from_reader(bad.as_bytes(), Path::new("bad.tsv"));
        assert!(err.is_err());
    }
}
