use std::io::{self, Write};

use serde::Serialize;

use crate::artifact::Manifest;
use crate::domain::Accession;
use crate::orchestrator::{
    BatchReport, OutcomeStatus, ProgressEvent, ProgressSink, SummaryReport, SummaryStatus,
};
use crate::predict::Prediction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Text,
    Json,
}

#[derive(Debug, Serialize)]
pub struct TrainReport<'a> {
    pub artifact: String,
    pub manifest: &'a Manifest,
}

#[derive(Debug, Serialize)]
pub struct PredictionRecord {
    pub input: String,
    #[serde(flatten)]
    pub prediction: Prediction,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_batch(report: &BatchReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_summary(report: &SummaryReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_train(report: &TrainReport<'_>) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_predictions(records: &[PredictionRecord]) -> io::Result<()> {
        Self::print_json(&records)
    }

    pub fn print_accessions(accessions: &[Accession]) -> io::Result<()> {
        Self::print_json(&accessions)
    }

    fn print_json<T: Serialize + ?Sized>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

/// Progress rendered as log lines on stderr.
pub struct LogSink;

impl ProgressSink for LogSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => {
                tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message)
            }
            None => tracing::debug!("{}", event.message),
        }
    }
}

/// Discards progress, for `--json` runs where stdout must stay parseable.
pub struct QuietSink;

impl ProgressSink for QuietSink {
    fn event(&self, _event: ProgressEvent) {}
}

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

pub fn print_batch_summary(report: &BatchReport) {
    println!("{CYAN}kira-amr fetch summary{RESET}");
    println!(
        "{GREEN}processed: {}  resumed: {}  fetched: {}{RESET}",
        report.count(OutcomeStatus::Processed),
        report.count(OutcomeStatus::Resumed),
        report.count(OutcomeStatus::Fetched)
    );
    println!(
        "{YELLOW}reads missing: {}{RESET}  {RED}failed: {}{RESET}",
        report.count(OutcomeStatus::ReadsMissing),
        report.count(OutcomeStatus::Failed)
    );
    for item in report.failed() {
        let color = if item.status == OutcomeStatus::Failed { RED } else { YELLOW };
        match &item.message {
            Some(message) => println!("{color}  {} ({}): {message}{RESET}", item.accession, item.state),
            None => println!("{color}  {} ({}){RESET}", item.accession, item.state),
        }
    }
}

pub fn print_summary_report(report: &SummaryReport) {
    println!("{CYAN}kira-amr summary stage{RESET}");
    println!(
        "{GREEN}summarized: {}  existing: {}{RESET}  {YELLOW}skipped (no report): {}{RESET}  {RED}failed: {}{RESET}",
        report.count(SummaryStatus::Summarized),
        report.count(SummaryStatus::Existing),
        report.count(SummaryStatus::Skipped),
        report.count(SummaryStatus::Failed)
    );
    for item in &report.items {
        if let Some(message) = &item.message {
            println!("{RED}  {}: {message}{RESET}", item.accession);
        }
    }
}

/// Text line for one prediction; forests also carry their out-of-bag accuracy.
pub fn prediction_line(input: &str, prediction: &Prediction) -> String {
    match prediction.oob_score {
        Some(oob) => format!("{input}: {prediction} [model OOB accuracy {:.1}%]", oob * 100.0),
        None => format!("{input}: {prediction}"),
    }
}

pub fn print_train_summary(report: &TrainReport<'_>) {
    let manifest = report.manifest;
    println!("{CYAN}kira-amr training summary{RESET}");
    println!(
        "{GREEN}model: {}  samples: {}  features: {}{RESET}",
        manifest.model, manifest.n_samples, manifest.n_features
    );
    if let Some(oob) = manifest.oob_score {
        println!("out-of-bag accuracy: {oob:.3}");
    }
    match &manifest.metrics {
        Some(metrics) => println!("{metrics}"),
        None => println!("{YELLOW}cross-validation skipped{RESET}"),
    }
    println!("artifact: {}", report.artifact);
}
