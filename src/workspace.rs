use std::fs;
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};

use crate::domain::Accession;
use crate::error::AmrError;
use crate::lifecycle::AccessionState;

pub const REPORT_FILE: &str = "report.tsv";

/// Paired raw reads for one accession.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawReadPair {
    pub forward: Utf8PathBuf,
    pub reverse: Utf8PathBuf,
}

impl RawReadPair {
    pub fn exists(&self) -> bool {
        self.forward.as_std_path().is_file() && self.reverse.as_std_path().is_file()
    }
}

/// On-disk layout of a pipeline run. Every per-accession path is derived from
/// the accession, so workers never share a file.
#[derive(Debug, Clone)]
pub struct Workspace {
    reads_root: Utf8PathBuf,
    calls_root: Utf8PathBuf,
    summary_root: Utf8PathBuf,
    logs_root: Utf8PathBuf,
}

impl Workspace {
    pub fn new(
        reads_root: Utf8PathBuf,
        calls_root: Utf8PathBuf,
        summary_root: Utf8PathBuf,
        logs_root: Utf8PathBuf,
    ) -> Self {
        Self {
            reads_root,
            calls_root,
            summary_root,
            logs_root,
        }
    }

    /// All four directories under one root; handy for tests.
    pub fn under(root: &Utf8Path) -> Self {
        Self::new(
            root.join("fastq"),
            root.join("calls"),
            root.join("summaries"),
            root.join("logs"),
        )
    }

    pub fn reads_root(&self) -> &Utf8Path {
        &self.reads_root
    }

    pub fn calls_root(&self) -> &Utf8Path {
        &self.calls_root
    }

    pub fn summary_root(&self) -> &Utf8Path {
        &self.summary_root
    }

    pub fn logs_root(&self) -> &Utf8Path {
        &self.logs_root
    }

    pub fn read_pair(&self, acc: &Accession) -> RawReadPair {
        RawReadPair {
            forward: self.reads_root.join(format!("{acc}_1.fastq")),
            reverse: self.reads_root.join(format!("{acc}_2.fastq")),
        }
    }

    pub fn call_dir(&self, acc: &Accession) -> Utf8PathBuf {
        self.calls_root.join(format!("outRun_{acc}"))
    }

    pub fn report_path(&self, acc: &Accession) -> Utf8PathBuf {
        self.call_dir(acc).join(REPORT_FILE)
    }

    /// Prefix handed to the summary tool; it appends `.csv`.
    pub fn summary_prefix(&self, acc: &Accession) -> Utf8PathBuf {
        self.summary_root.join(format!("{acc}_summary"))
    }

    pub fn summary_path(&self, acc: &Accession) -> Utf8PathBuf {
        self.summary_root.join(format!("{acc}_summary.csv"))
    }

    /// Where a previous run left this accession, judged from disk alone.
    pub fn probe(&self, acc: &Accession) -> AccessionState {
        if self.report_path(acc).as_std_path().is_file() {
            AccessionState::FeatureReady
        } else if self.read_pair(acc).exists() {
            AccessionState::Fetched
        } else {
            AccessionState::New
        }
    }

    pub fn ensure_dirs(&self) -> Result<(), AmrError> {
        for dir in [
            &self.reads_root,
            &self.calls_root,
            &self.summary_root,
            &self.logs_root,
        ] {
            fs::create_dir_all(dir.as_std_path())
                .map_err(|err| AmrError::Filesystem(format!("create {dir}: {err}")))?;
        }
        Ok(())
    }

    /// Remove a call directory that has no finished report.
    pub fn clear_stale_call_dir(&self, acc: &Accession) -> Result<bool, AmrError> {
        let dir = self.call_dir(acc);
        if dir.as_std_path().exists() && !self.report_path(acc).as_std_path().exists() {
            fs::remove_dir_all(dir.as_std_path())
                .map_err(|err| AmrError::Filesystem(format!("remove {dir}: {err}")))?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Delete both read files; returns the paths that could not be removed.
    pub fn remove_reads(&self, acc: &Accession) -> Vec<(Utf8PathBuf, String)> {
        let pair = self.read_pair(acc);
        let mut failures = Vec::new();
        for path in [pair.forward, pair.reverse] {
            if !path.as_std_path().exists() {
                continue;
            }
            if let Err(err) = fs::remove_file(path.as_std_path()) {
                failures.push((path, err.to_string()));
            }
        }
        failures
    }

    pub fn write_bytes_atomic(path: &Path, content: &[u8]) -> Result<(), AmrError> {
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => std::env::current_dir().map_err(|err| AmrError::Filesystem(err.to_string()))?,
        };
        fs::create_dir_all(&parent).map_err(|err| AmrError::Filesystem(err.to_string()))?;
        let mut temp = tempfile::Builder::new()
            .prefix("kira-amr")
            .tempfile_in(&parent)
            .map_err(|err| AmrError::Filesystem(err.to_string()))?;
        std::io::Write::write_all(&mut temp, content)
            .map_err(|err| AmrError::Filesystem(err.to_string()))?;
        temp.persist(path)
            .map_err(|err| AmrError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace() -> (tempfile::TempDir, Workspace) {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let ws = Workspace::under(&root);
        ws.ensure_dirs().unwrap();
        (temp, ws)
    }

    #[test]
    fn layout_paths() {
        let ws = Workspace::under(Utf8Path::new("/data"));
        let acc: Accession = "ERR2512455".parse().unwrap();
        assert!(ws.read_pair(&acc).forward.ends_with("fastq/ERR2512455_1.fastq"));
        assert!(ws.report_path(&acc).ends_with("calls/outRun_ERR2512455/report.tsv"));
        assert!(ws.summary_path(&acc).ends_with("summaries/ERR2512455_summary.csv"));
        assert_eq!(
            format!("{}.csv", ws.summary_prefix(&acc)),
            ws.summary_path(&acc).to_string()
        );
    }

    #[test]
    fn probe_prefers_report_over_reads() {
        let (_temp, ws) = workspace();
        let acc: Accession = "SRR1".parse().unwrap();
        assert_eq!(ws.probe(&acc), AccessionState::New);

        let pair = ws.read_pair(&acc);
        fs::write(pair.forward.as_std_path(), b"@r\n").unwrap();
        assert_eq!(ws.probe(&acc), AccessionState::New);
        fs::write(pair.reverse.as_std_path(), b"@r\n").unwrap();
        assert_eq!(ws.probe(&acc), AccessionState::Fetched);

        fs::create_dir_all(ws.call_dir(&acc).as_std_path()).unwrap();
        fs::write(ws.report_path(&acc).as_std_path(), b"#ref_name\n").unwrap();
        assert_eq!(ws.probe(&acc), AccessionState::FeatureReady);
    }

    #[test]
    fn stale_call_dir_is_removed_only_without_report() {
        let (_temp, ws) = workspace();
        let acc: Accession = "SRR2".parse().unwrap();
        let dir = ws.call_dir(&acc);
        fs::create_dir_all(dir.as_std_path()).unwrap();
        fs::write(dir.join("partial.bam").as_std_path(), b"x").unwrap();
        assert!(ws.clear_stale_call_dir(&acc).unwrap());
        assert!(!dir.as_std_path().exists());

        fs::create_dir_all(dir.as_std_path()).unwrap();
        fs::write(ws.report_path(&acc).as_std_path(), b"done").unwrap();
        assert!(!ws.clear_stale_call_dir(&acc).unwrap());
        assert!(ws.report_path(&acc).as_std_path().exists());
    }
}
