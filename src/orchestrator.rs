use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde::Serialize;

use crate::config::PipelineOptions;
use crate::domain::Accession;
use crate::error::AmrError;
use crate::journal::Journal;
use crate::lifecycle::{AccessionState, StateLedger};
use crate::tools::{ReadDownloader, ReportSummarizer, VariantCaller};
use crate::workspace::Workspace;

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink: Send + Sync {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Variant calling ran in this batch and produced a report.
    Processed,
    /// A report from an earlier run was found; nothing was invoked.
    Resumed,
    /// Reads are on disk; calling is disabled.
    Fetched,
    /// Calling was expected but the read pair is absent (see triage record).
    ReadsMissing,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccessionOutcome {
    pub accession: String,
    pub state: AccessionState,
    pub status: OutcomeStatus,
    pub download_attempts: u32,
    pub call_attempts: u32,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub items: Vec<AccessionOutcome>,
}

impl BatchReport {
    pub fn count(&self, status: OutcomeStatus) -> usize {
        self.items.iter().filter(|item| item.status == status).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &AccessionOutcome> {
        self.items
            .iter()
            .filter(|item| matches!(item.status, OutcomeStatus::Failed | OutcomeStatus::ReadsMissing))
    }

    pub fn get(&self, accession: &str) -> Option<&AccessionOutcome> {
        self.items.iter().find(|item| item.accession == accession)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryStatus {
    Summarized,
    Existing,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryOutcome {
    pub accession: String,
    pub status: SummaryStatus,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryReport {
    pub items: Vec<SummaryOutcome>,
}

impl SummaryReport {
    pub fn count(&self, status: SummaryStatus) -> usize {
        self.items.iter().filter(|item| item.status == status).count()
    }
}

/// Drives accessions through download, variant calling and cleanup on a
/// bounded pool. One accession failing never stops the others.
pub struct Orchestrator<D: ReadDownloader, C: VariantCaller, S: ReportSummarizer> {
    workspace: Workspace,
    downloader: D,
    caller: C,
    summarizer: S,
    journal: Arc<Journal>,
    triage: Arc<Journal>,
}

impl<D: ReadDownloader, C: VariantCaller, S: ReportSummarizer> Orchestrator<D, C, S> {
    pub fn new(
        workspace: Workspace,
        downloader: D,
        caller: C,
        summarizer: S,
        journal: Journal,
        triage: Journal,
    ) -> Self {
        Self {
            workspace,
            downloader,
            caller,
            summarizer,
            journal: Arc::new(journal),
            triage: Arc::new(triage),
        }
    }

    pub fn run(
        &self,
        accessions: &[Accession],
        options: &PipelineOptions,
        sink: &dyn ProgressSink,
    ) -> Result<BatchReport, AmrError> {
        self.workspace.ensure_dirs()?;
        let ledger = StateLedger::new(Arc::clone(&self.journal));
        let pool = build_pool(options.workers)?;

        sink.event(ProgressEvent {
            message: format!(
                "phase=Run; {} accessions on {} workers",
                accessions.len(),
                options.workers
            ),
            elapsed: None,
        });
        let start = Instant::now();
        let items = pool.install(|| {
            accessions
                .par_iter()
                .map(|acc| self.process(acc, options, &ledger, sink))
                .collect::<Vec<_>>()
        });

        let report = BatchReport { items };
        tracing::info!(
            processed = report.count(OutcomeStatus::Processed),
            resumed = report.count(OutcomeStatus::Resumed),
            fetched = report.count(OutcomeStatus::Fetched),
            reads_missing = report.count(OutcomeStatus::ReadsMissing),
            failed = report.count(OutcomeStatus::Failed),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "batch finished"
        );
        Ok(report)
    }

    pub fn summarize(
        &self,
        accessions: &[Accession],
        options: &PipelineOptions,
        sink: &dyn ProgressSink,
    ) -> Result<SummaryReport, AmrError> {
        self.workspace.ensure_dirs()?;
        let pool = build_pool(options.workers)?;
        let items = pool.install(|| {
            accessions
                .par_iter()
                .map(|acc| self.summarize_one(acc, options, sink))
                .collect::<Vec<_>>()
        });
        Ok(SummaryReport { items })
    }

    fn process(
        &self,
        acc: &Accession,
        options: &PipelineOptions,
        ledger: &StateLedger,
        sink: &dyn ProgressSink,
    ) -> AccessionOutcome {
        let start = Instant::now();
        let mut outcome = AccessionOutcome {
            accession: acc.to_string(),
            state: AccessionState::New,
            status: OutcomeStatus::Failed,
            download_attempts: 0,
            call_attempts: 0,
            message: None,
        };

        match self.drive(acc, options, ledger, sink, &mut outcome) {
            Ok(status) => outcome.status = status,
            Err(err) => {
                tracing::error!(accession = %acc, error = %err, "accession failed");
                self.journal.append(&format!("{acc}\tfailed: {err}"));
                outcome.status = OutcomeStatus::Failed;
                outcome.message = Some(err.to_string());
            }
        }
        outcome.state = ledger.state(acc);

        sink.event(ProgressEvent {
            message: format!("{acc}: {} ({})", outcome.state, status_label(outcome.status)),
            elapsed: Some(start.elapsed()),
        });
        outcome
    }

    fn drive(
        &self,
        acc: &Accession,
        options: &PipelineOptions,
        ledger: &StateLedger,
        sink: &dyn ProgressSink,
        outcome: &mut AccessionOutcome,
    ) -> Result<OutcomeStatus, AmrError> {
        ledger.register(acc);

        match self.workspace.probe(acc) {
            AccessionState::FeatureReady => {
                tracing::info!(accession = %acc, "report already exists, skipping");
                ledger.advance(acc, AccessionState::FeatureReady)?;
                self.cleanup(acc, options, ledger)?;
                return Ok(OutcomeStatus::Resumed);
            }
            AccessionState::Fetched => {
                tracing::info!(accession = %acc, "read pair already present, skipping download");
                ledger.advance(acc, AccessionState::Fetched)?;
            }
            _ => {
                if !options.download {
                    if options.call_variants {
                        self.record_missing_reads(acc);
                    }
                    return Ok(OutcomeStatus::ReadsMissing);
                }
                self.fetch(acc, options, ledger, sink, &mut outcome.download_attempts)?;
            }
        }

        if !options.call_variants {
            return Ok(OutcomeStatus::Fetched);
        }

        let reads = self.workspace.read_pair(acc);
        if !reads.exists() {
            self.record_missing_reads(acc);
            return Ok(OutcomeStatus::ReadsMissing);
        }

        ledger.advance(acc, AccessionState::Calling)?;
        let call_dir = self.workspace.call_dir(acc);
        let report = self.workspace.report_path(acc);
        let called = self.with_retries(
            acc,
            "variant-call",
            options,
            sink,
            &mut outcome.call_attempts,
            || {
                if self.workspace.clear_stale_call_dir(acc)? {
                    tracing::info!(accession = %acc, "removed incomplete call directory");
                }
                self.caller.call(acc, &reads, call_dir.as_std_path())?;
                if !report.as_std_path().is_file() {
                    return Err(AmrError::MissingOutput(report.to_string()));
                }
                Ok(())
            },
        );
        if let Err(err) = called {
            ledger.advance(acc, AccessionState::Failed)?;
            return Err(err);
        }
        ledger.advance(acc, AccessionState::Called)?;
        ledger.advance(acc, AccessionState::FeatureReady)?;
        self.cleanup(acc, options, ledger)?;
        Ok(OutcomeStatus::Processed)
    }

    fn fetch(
        &self,
        acc: &Accession,
        options: &PipelineOptions,
        ledger: &StateLedger,
        sink: &dyn ProgressSink,
        attempts: &mut u32,
    ) -> Result<(), AmrError> {
        ledger.advance(acc, AccessionState::Fetching)?;
        let reads_dir = self.workspace.reads_root().as_std_path();
        let fetched = self.with_retries(acc, "download", options, sink, attempts, || {
            self.downloader.download(acc, options.threads, reads_dir)
        });
        if let Err(err) = fetched {
            ledger.advance(acc, AccessionState::Failed)?;
            return Err(err);
        }

        // the tool may exit 0 and still leave a truncated pair behind
        let pair = self.workspace.read_pair(acc);
        if !pair.exists() {
            ledger.advance(acc, AccessionState::Failed)?;
            return Err(AmrError::MissingOutput(format!(
                "{} / {}",
                pair.forward, pair.reverse
            )));
        }
        ledger.advance(acc, AccessionState::Fetched)?;
        tracing::info!(accession = %acc, "download complete");
        Ok(())
    }

    fn cleanup(
        &self,
        acc: &Accession,
        options: &PipelineOptions,
        ledger: &StateLedger,
    ) -> Result<(), AmrError> {
        if !options.delete_raw {
            return Ok(());
        }
        let failures = self.workspace.remove_reads(acc);
        if failures.is_empty() {
            tracing::debug!(accession = %acc, "removed raw reads");
            return ledger.advance(acc, AccessionState::CleanedUp);
        }
        for (path, err) in failures {
            tracing::warn!(accession = %acc, path = %path, error = %err, "failed to remove raw reads");
        }
        Ok(())
    }

    fn summarize_one(
        &self,
        acc: &Accession,
        options: &PipelineOptions,
        sink: &dyn ProgressSink,
    ) -> SummaryOutcome {
        let report = self.workspace.report_path(acc);
        let summary = self.workspace.summary_path(acc);
        let (status, message) = if !report.as_std_path().is_file() {
            tracing::info!(accession = %acc, "report not found, skipping summary");
            (SummaryStatus::Skipped, None)
        } else if summary.as_std_path().is_file() {
            (SummaryStatus::Existing, None)
        } else {
            let prefix = self.workspace.summary_prefix(acc);
            let mut attempts = 0;
            let result = self.with_retries(acc, "summary", options, sink, &mut attempts, || {
                self.summarizer
                    .summarize(acc, report.as_std_path(), prefix.as_std_path())?;
                if !summary.as_std_path().is_file() {
                    return Err(AmrError::MissingOutput(summary.to_string()));
                }
                Ok(())
            });
            match result {
                Ok(()) => (SummaryStatus::Summarized, None),
                Err(err) => (SummaryStatus::Failed, Some(err.to_string())),
            }
        };
        SummaryOutcome {
            accession: acc.to_string(),
            status,
            message,
        }
    }

    fn with_retries<F>(
        &self,
        acc: &Accession,
        stage: &str,
        options: &PipelineOptions,
        sink: &dyn ProgressSink,
        attempts: &mut u32,
        mut op: F,
    ) -> Result<(), AmrError>
    where
        F: FnMut() -> Result<(), AmrError>,
    {
        let max_attempts = options.retries + 1;
        loop {
            *attempts += 1;
            let start = Instant::now();
            sink.event(ProgressEvent {
                message: format!("phase={stage}; {acc} attempt {}/{max_attempts}", *attempts),
                elapsed: None,
            });
            match op() {
                Ok(()) => {
                    self.journal
                        .append(&format!("{acc}\t{stage} succeeded on attempt {}", *attempts));
                    sink.event(ProgressEvent {
                        message: format!("phase={stage}; {acc} done"),
                        elapsed: Some(start.elapsed()),
                    });
                    return Ok(());
                }
                Err(err) => {
                    tracing::warn!(
                        accession = %acc,
                        stage,
                        attempt = *attempts,
                        error = %err,
                        "attempt failed"
                    );
                    self.journal
                        .append(&format!("{acc}\t{stage} attempt {} failed: {err}", *attempts));
                    if *attempts >= max_attempts {
                        tracing::error!(accession = %acc, stage, "all attempts failed");
                        return Err(err);
                    }
                    if !options.backoff.is_zero() {
                        tracing::info!(accession = %acc, stage, "retrying after {:?}", options.backoff);
                        thread::sleep(options.backoff);
                    }
                }
            }
        }
    }

    fn record_missing_reads(&self, acc: &Accession) {
        let pair = self.workspace.read_pair(acc);
        tracing::error!(
            accession = %acc,
            forward = %pair.forward,
            reverse = %pair.reverse,
            "paired reads not found"
        );
        self.triage.append(acc.as_str());
    }
}

fn build_pool(workers: usize) -> Result<rayon::ThreadPool, AmrError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .thread_name(|i| format!("kira-amr-worker-{i}"))
        .build()
        .map_err(|err| AmrError::WorkerPool(err.to_string()))
}

fn status_label(status: OutcomeStatus) -> &'static str {
    match status {
        OutcomeStatus::Processed => "processed",
        OutcomeStatus::Resumed => "resumed",
        OutcomeStatus::Fetched => "fetched",
        OutcomeStatus::ReadsMissing => "reads missing",
        OutcomeStatus::Failed => "failed",
    }
}
