use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::domain::Accession;
use crate::error::AmrError;
use crate::workspace::RawReadPair;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub sra_toolkit: Option<String>,
    pub ariba: Option<String>,
}

/// Fetches the paired reads of one accession into `out_dir`.
pub trait ReadDownloader: Send + Sync {
    fn download(
        &self,
        accession: &Accession,
        threads: usize,
        out_dir: &Path,
    ) -> Result<(), AmrError>;
}

/// Runs variant calling for one read pair, writing `report.tsv` into `out_dir`.
pub trait VariantCaller: Send + Sync {
    fn call(
        &self,
        accession: &Accession,
        reads: &RawReadPair,
        out_dir: &Path,
    ) -> Result<(), AmrError>;
}

/// Turns one report into a summary table at `<out_prefix>.csv`.
pub trait ReportSummarizer: Send + Sync {
    fn summarize(
        &self,
        accession: &Accession,
        report: &Path,
        out_prefix: &Path,
    ) -> Result<(), AmrError>;
}

#[derive(Debug, Clone)]
pub enum ToolStatus {
    Ready,
    Missing { message: String },
}

/// Tool adapter backed by `fasterq-dump` and `ariba` found on `PATH`.
#[derive(Clone)]
pub struct SystemTools {
    fasterq_dump: Option<PathBuf>,
    ariba: Option<PathBuf>,
    reference: PathBuf,
    log_dir: PathBuf,
    timeout: Option<Duration>,
}

impl SystemTools {
    pub fn new(reference: PathBuf, log_dir: PathBuf, timeout: Option<Duration>) -> Self {
        Self {
            fasterq_dump: find_in_path("fasterq-dump"),
            ariba: find_in_path("ariba"),
            reference,
            log_dir,
            timeout,
        }
    }

    pub fn tool_status(&self, need_download: bool, need_ariba: bool) -> ToolStatus {
        if need_download && self.fasterq_dump.is_none() {
            return ToolStatus::Missing {
                message: "missing fasterq-dump (SRA Toolkit)".to_string(),
            };
        }
        if need_ariba && self.ariba.is_none() {
            return ToolStatus::Missing {
                message: "missing ariba".to_string(),
            };
        }
        ToolStatus::Ready
    }

    pub fn tool_info(&self) -> ToolInfo {
        ToolInfo {
            sra_toolkit: self
                .fasterq_dump
                .as_ref()
                .and_then(|path| tool_version(path, &["--version"])),
            ariba: self
                .ariba
                .as_ref()
                .and_then(|path| tool_version(path, &["version"])),
        }
    }

    fn require(&self, tool: &Option<PathBuf>, name: &str) -> Result<PathBuf, AmrError> {
        tool.clone()
            .ok_or_else(|| AmrError::MissingTool(name.to_string()))
    }

    fn run_cmd(
        &self,
        name: &str,
        program: &Path,
        args: &[String],
        accession: &Accession,
    ) -> Result<(), AmrError> {
        fs::create_dir_all(&self.log_dir)
            .map_err(|err| AmrError::Filesystem(format!("create {}: {err}", self.log_dir.display())))?;
        let log_path = self.log_dir.join(format!("{accession}.{name}.log"));
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|err| AmrError::Filesystem(format!("open {}: {err}", log_path.display())))?;
        let log_err = log
            .try_clone()
            .map_err(|err| AmrError::Filesystem(err.to_string()))?;

        tracing::debug!(tool = name, args = ?args, "spawning");
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .spawn()
            .map_err(|err| AmrError::ToolFailed {
                tool: name.to_string(),
                message: err.to_string(),
            })?;

        let status = match self.timeout {
            Some(limit) => wait_with_timeout(&mut child, limit)
                .map_err(|err| AmrError::ToolFailed {
                    tool: name.to_string(),
                    message: err.to_string(),
                })?
                .ok_or_else(|| AmrError::ToolTimeout {
                    tool: name.to_string(),
                    secs: limit.as_secs(),
                })?,
            None => child.wait().map_err(|err| AmrError::ToolFailed {
                tool: name.to_string(),
                message: err.to_string(),
            })?,
        };

        if status.success() {
            return Ok(());
        }
        Err(AmrError::ToolFailed {
            tool: name.to_string(),
            message: format!("{status}; see {}", log_path.display()),
        })
    }
}

impl ReadDownloader for SystemTools {
    fn download(
        &self,
        accession: &Accession,
        threads: usize,
        out_dir: &Path,
    ) -> Result<(), AmrError> {
        let fasterq = self.require(&self.fasterq_dump, "fasterq-dump")?;
        fs::create_dir_all(out_dir).map_err(|err| AmrError::Filesystem(err.to_string()))?;
        let args = vec![
            accession.as_str().to_string(),
            "--threads".to_string(),
            threads.max(1).to_string(),
            "-O".to_string(),
            out_dir.to_string_lossy().to_string(),
        ];
        self.run_cmd("fasterq-dump", &fasterq, &args, accession)
    }
}

impl VariantCaller for SystemTools {
    fn call(
        &self,
        accession: &Accession,
        reads: &RawReadPair,
        out_dir: &Path,
    ) -> Result<(), AmrError> {
        let ariba = self.require(&self.ariba, "ariba")?;
        let args = vec![
            "run".to_string(),
            self.reference.to_string_lossy().to_string(),
            reads.forward.to_string(),
            reads.reverse.to_string(),
            out_dir.to_string_lossy().to_string(),
        ];
        self.run_cmd("ariba-run", &ariba, &args, accession)
    }
}

impl ReportSummarizer for SystemTools {
    fn summarize(
        &self,
        accession: &Accession,
        report: &Path,
        out_prefix: &Path,
    ) -> Result<(), AmrError> {
        let ariba = self.require(&self.ariba, "ariba")?;
        if let Some(parent) = out_prefix.parent() {
            fs::create_dir_all(parent).map_err(|err| AmrError::Filesystem(err.to_string()))?;
        }
        let args = vec![
            "summary".to_string(),
            out_prefix.to_string_lossy().to_string(),
            report.to_string_lossy().to_string(),
            "--preset".to_string(),
            "all_no_filter".to_string(),
        ];
        self.run_cmd("ariba-summary", &ariba, &args, accession)
    }
}

fn wait_with_timeout(child: &mut Child, limit: Duration) -> std::io::Result<Option<ExitStatus>> {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if start.elapsed() >= limit {
            child.kill()?;
            child.wait()?;
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.exists() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.exists() {
            return Some(plain);
        }
    }
    None
}

fn tool_version(path: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new(path).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if stdout.is_empty() {
        None
    } else {
        Some(stdout.lines().next().unwrap_or_default().to_string())
    }
}
