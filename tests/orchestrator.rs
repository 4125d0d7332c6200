use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use camino::Utf8PathBuf;
use tempfile::TempDir;

use kira_amr::config::PipelineOptions;
use kira_amr::domain::Accession;
use kira_amr::error::AmrError;
use kira_amr::journal::Journal;
use kira_amr::lifecycle::AccessionState;
use kira_amr::orchestrator::{
    Orchestrator, OutcomeStatus, ProgressEvent, ProgressSink, SummaryStatus,
};
use kira_amr::tools::{ReadDownloader, ReportSummarizer, VariantCaller};
use kira_amr::workspace::{RawReadPair, Workspace};

const REPORT: &str = "#ariba_ref_name\tgene\tcluster\tknown_var\tknown_var_change\thas_known_var\tref_ctg_change\nkatG\t1\tkatG\t.\t.\t.\t.\n";

#[derive(Default)]
struct MockDownloader {
    calls: AtomicU32,
    failures: u32,
    skip_files: bool,
}

impl MockDownloader {
    fn failing(failures: u32) -> Self {
        Self {
            failures,
            ..Self::default()
        }
    }
}

impl ReadDownloader for MockDownloader {
    fn download(&self, accession: &Accession, _threads: usize, out_dir: &Path) -> Result<(), AmrError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            return Err(AmrError::ToolFailed {
                tool: "fasterq-dump".to_string(),
                message: format!("attempt {call}"),
            });
        }
        if !self.skip_files {
            fs::create_dir_all(out_dir).unwrap();
            fs::write(out_dir.join(format!("{accession}_1.fastq")), "@r1\n").unwrap();
            fs::write(out_dir.join(format!("{accession}_2.fastq")), "@r2\n").unwrap();
        }
        Ok(())
    }
}

impl ReadDownloader for &MockDownloader {
    fn download(&self, accession: &Accession, threads: usize, out_dir: &Path) -> Result<(), AmrError> {
        (**self).download(accession, threads, out_dir)
    }
}

#[derive(Default)]
struct MockCaller {
    calls: AtomicU32,
    failures: u32,
}

impl VariantCaller for MockCaller {
    fn call(&self, _accession: &Accession, reads: &RawReadPair, out_dir: &Path) -> Result<(), AmrError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        assert!(reads.exists(), "caller invoked without reads");
        assert!(!out_dir.exists(), "stale call directory was not cleared");
        if call <= self.failures {
            return Err(AmrError::ToolFailed {
                tool: "ariba-run".to_string(),
                message: format!("attempt {call}"),
            });
        }
        fs::create_dir_all(out_dir).unwrap();
        fs::write(out_dir.join("report.tsv"), REPORT).unwrap();
        Ok(())
    }
}

impl VariantCaller for &MockCaller {
    fn call(&self, accession: &Accession, reads: &RawReadPair, out_dir: &Path) -> Result<(), AmrError> {
        (**self).call(accession, reads, out_dir)
    }
}

#[derive(Default)]
struct MockSummarizer {
    calls: AtomicU32,
}

impl ReportSummarizer for MockSummarizer {
    fn summarize(&self, _accession: &Accession, _report: &Path, out_prefix: &Path) -> Result<(), AmrError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        fs::create_dir_all(out_prefix.parent().unwrap()).unwrap();
        fs::write(
            out_prefix.with_extension("csv"),
            "name,katG.match\nrow,yes\n",
        )
        .unwrap();
        Ok(())
    }
}

struct NullSink;

impl ProgressSink for NullSink {
    fn event(&self, _event: ProgressEvent) {}
}

struct Fixture {
    temp: TempDir,
    workspace: Workspace,
}

impl Fixture {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let workspace = Workspace::under(&root);
        Self { temp, workspace }
    }

    fn run_log(&self) -> std::path::PathBuf {
        self.temp.path().join("run.log")
    }

    fn triage_file(&self) -> std::path::PathBuf {
        self.temp.path().join("triage.txt")
    }

    fn orchestrator(
        &self,
        downloader: MockDownloader,
        caller: MockCaller,
    ) -> Orchestrator<MockDownloader, MockCaller, MockSummarizer> {
        Orchestrator::new(
            self.workspace.clone(),
            downloader,
            caller,
            MockSummarizer::default(),
            Journal::open(&self.run_log()).unwrap(),
            Journal::open_plain(&self.triage_file()).unwrap(),
        )
    }

    fn place_reads(&self, acc: &Accession) {
        let pair = self.workspace.read_pair(acc);
        fs::create_dir_all(self.workspace.reads_root()).unwrap();
        fs::write(&pair.forward, "@r1\n").unwrap();
        fs::write(&pair.reverse, "@r2\n").unwrap();
    }

    fn place_report(&self, acc: &Accession) {
        let dir = self.workspace.call_dir(acc);
        fs::create_dir_all(&dir).unwrap();
        fs::write(self.workspace.report_path(acc), REPORT).unwrap();
    }
}

fn options() -> PipelineOptions {
    PipelineOptions {
        workers: 2,
        threads: 1,
        retries: 2,
        backoff: Duration::ZERO,
        download: true,
        call_variants: true,
        delete_raw: false,
    }
}

fn acc(id: &str) -> Accession {
    id.parse().unwrap()
}

#[test]
fn download_retries_until_success() {
    let fixture = Fixture::new();
    let orchestrator = fixture.orchestrator(MockDownloader::failing(2), MockCaller::default());
    let report = orchestrator
        .run(&[acc("SRR100")], &options(), &NullSink)
        .unwrap();

    let item = report.get("SRR100").unwrap();
    assert_eq!(item.status, OutcomeStatus::Processed);
    assert_eq!(item.state, AccessionState::FeatureReady);
    assert_eq!(item.download_attempts, 3);
    assert_eq!(item.call_attempts, 1);
    assert!(fixture.workspace.report_path(&acc("SRR100")).is_file());

    let log = fs::read_to_string(fixture.run_log()).unwrap();
    assert_eq!(log.matches("download attempt").count(), 2);
    assert!(log.contains("fetching -> fetched"));
}

#[test]
fn exhausted_download_fails_without_calling() {
    let fixture = Fixture::new();
    let caller = MockCaller::default();
    let orchestrator = fixture.orchestrator(MockDownloader::failing(u32::MAX), caller);
    let report = orchestrator
        .run(&[acc("SRR101")], &options(), &NullSink)
        .unwrap();

    let item = report.get("SRR101").unwrap();
    assert_eq!(item.status, OutcomeStatus::Failed);
    assert_eq!(item.state, AccessionState::Failed);
    assert_eq!(item.download_attempts, 3);
    assert!(item.message.as_deref().unwrap().contains("fasterq-dump"));
    assert!(!fixture.workspace.read_pair(&acc("SRR101")).exists());
    assert!(!fixture.workspace.call_dir(&acc("SRR101")).exists());
}

#[test]
fn silent_download_without_files_fails() {
    let fixture = Fixture::new();
    let downloader = MockDownloader {
        skip_files: true,
        ..MockDownloader::default()
    };
    let orchestrator = fixture.orchestrator(downloader, MockCaller::default());
    let report = orchestrator
        .run(&[acc("SRR102")], &options(), &NullSink)
        .unwrap();

    let item = report.get("SRR102").unwrap();
    assert_eq!(item.status, OutcomeStatus::Failed);
    assert_eq!(item.call_attempts, 0);
    assert!(item.message.as_deref().unwrap().contains("expected output not found"));
}

#[test]
fn existing_report_is_resumed_without_tools() {
    let fixture = Fixture::new();
    let done = acc("SRR103");
    fixture.place_report(&done);
    fixture.place_reads(&done);

    let orchestrator = fixture.orchestrator(MockDownloader::default(), MockCaller::default());
    let mut opts = options();
    opts.delete_raw = true;
    let report = orchestrator.run(&[done.clone()], &opts, &NullSink).unwrap();

    let item = report.get("SRR103").unwrap();
    assert_eq!(item.status, OutcomeStatus::Resumed);
    assert_eq!(item.state, AccessionState::CleanedUp);
    assert_eq!(item.download_attempts + item.call_attempts, 0);
    assert!(!fixture.workspace.read_pair(&done).forward.exists());
    assert!(fixture.workspace.report_path(&done).is_file());
}

#[test]
fn second_run_invokes_no_tools() {
    let fixture = Fixture::new();
    let downloader = MockDownloader::default();
    let caller = MockCaller::default();
    let orchestrator = Orchestrator::new(
        fixture.workspace.clone(),
        &downloader,
        &caller,
        MockSummarizer::default(),
        Journal::open(&fixture.run_log()).unwrap(),
        Journal::open_plain(&fixture.triage_file()).unwrap(),
    );
    let ids = [acc("SRR120"), acc("SRR121")];

    let first = orchestrator.run(&ids, &options(), &NullSink).unwrap();
    assert_eq!(first.count(OutcomeStatus::Processed), 2);
    assert_eq!(downloader.calls.load(Ordering::SeqCst), 2);
    assert_eq!(caller.calls.load(Ordering::SeqCst), 2);
    let report = fs::read_to_string(fixture.workspace.report_path(&ids[0])).unwrap();

    let second = orchestrator.run(&ids, &options(), &NullSink).unwrap();
    assert_eq!(second.count(OutcomeStatus::Resumed), 2);
    assert!(second
        .items
        .iter()
        .all(|item| item.state == AccessionState::FeatureReady));
    assert_eq!(downloader.calls.load(Ordering::SeqCst), 2);
    assert_eq!(caller.calls.load(Ordering::SeqCst), 2);
    assert_eq!(
        fs::read_to_string(fixture.workspace.report_path(&ids[0])).unwrap(),
        report
    );
}

#[test]
fn reads_on_disk_skip_download() {
    let fixture = Fixture::new();
    let id = acc("SRR104");
    fixture.place_reads(&id);
    let stale = fixture.workspace.call_dir(&id);
    fs::create_dir_all(&stale).unwrap();
    fs::write(stale.join("partial.bam"), "x").unwrap();

    let orchestrator = fixture.orchestrator(MockDownloader::failing(u32::MAX), MockCaller::default());
    let mut opts = options();
    opts.delete_raw = true;
    let report = orchestrator.run(&[id.clone()], &opts, &NullSink).unwrap();

    let item = report.get("SRR104").unwrap();
    assert_eq!(item.status, OutcomeStatus::Processed);
    assert_eq!(item.state, AccessionState::CleanedUp);
    assert_eq!(item.download_attempts, 0);
    assert!(!stale.join("partial.bam").exists());
    assert!(!fixture.workspace.read_pair(&id).exists());
}

#[test]
fn failed_calling_keeps_reads() {
    let fixture = Fixture::new();
    let caller = MockCaller {
        failures: u32::MAX,
        ..MockCaller::default()
    };
    let orchestrator = fixture.orchestrator(MockDownloader::default(), caller);
    let mut opts = options();
    opts.delete_raw = true;
    let report = orchestrator.run(&[acc("SRR105")], &opts, &NullSink).unwrap();

    let item = report.get("SRR105").unwrap();
    assert_eq!(item.status, OutcomeStatus::Failed);
    assert_eq!(item.call_attempts, 3);
    assert!(fixture.workspace.read_pair(&acc("SRR105")).exists());
}

#[test]
fn missing_reads_are_triaged_when_download_disabled() {
    let fixture = Fixture::new();
    let orchestrator = fixture.orchestrator(MockDownloader::default(), MockCaller::default());
    let mut opts = options();
    opts.download = false;
    let report = orchestrator
        .run(&[acc("SRR106"), acc("SRR107")], &opts, &NullSink)
        .unwrap();

    assert_eq!(report.count(OutcomeStatus::ReadsMissing), 2);
    let triage = fs::read_to_string(fixture.triage_file()).unwrap();
    let mut lines: Vec<_> = triage.lines().collect();
    lines.sort();
    assert_eq!(lines, vec!["SRR106", "SRR107"]);
}

#[test]
fn fetch_only_stops_at_fetched() {
    let fixture = Fixture::new();
    let orchestrator = fixture.orchestrator(MockDownloader::default(), MockCaller::default());
    let mut opts = options();
    opts.call_variants = false;
    opts.delete_raw = true;
    let report = orchestrator.run(&[acc("SRR108")], &opts, &NullSink).unwrap();

    let item = report.get("SRR108").unwrap();
    assert_eq!(item.status, OutcomeStatus::Fetched);
    assert_eq!(item.state, AccessionState::Fetched);
    assert!(fixture.workspace.read_pair(&acc("SRR108")).exists());
}

#[test]
fn one_failure_does_not_stop_the_batch() {
    let fixture = Fixture::new();
    let accessions: Vec<_> = (0..12).map(|i| acc(&format!("ERR{i:03}"))).collect();
    fixture.place_reads(&accessions[0]);
    // every download fails, so only the accession with reads on disk proceeds
    let orchestrator = fixture.orchestrator(MockDownloader::failing(u32::MAX), MockCaller::default());
    let mut opts = options();
    opts.workers = 4;
    opts.retries = 0;
    let report = orchestrator.run(&accessions, &opts, &NullSink).unwrap();

    assert_eq!(report.items.len(), 12);
    assert_eq!(report.count(OutcomeStatus::Processed), 1);
    assert_eq!(report.count(OutcomeStatus::Failed), 11);
    let log = fs::read_to_string(fixture.run_log()).unwrap();
    assert!(log.lines().all(|line| line.split('\t').count() >= 3));
}

#[test]
fn summary_stage_is_idempotent() {
    let fixture = Fixture::new();
    let with_report = acc("SRR110");
    fixture.place_report(&with_report);
    let orchestrator = fixture.orchestrator(MockDownloader::default(), MockCaller::default());

    let first = orchestrator
        .summarize(&[with_report.clone(), acc("SRR111")], &options(), &NullSink)
        .unwrap();
    assert_eq!(first.count(SummaryStatus::Summarized), 1);
    assert_eq!(first.count(SummaryStatus::Skipped), 1);
    assert!(fixture.workspace.summary_path(&with_report).is_file());

    let second = orchestrator
        .summarize(&[with_report], &options(), &NullSink)
        .unwrap();
    assert_eq!(second.count(SummaryStatus::Existing), 1);
}
