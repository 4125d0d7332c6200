use std::fs::{self, File, OpenOptions};
use std::io::{LineWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use crate::error::AmrError;

/// Append-only line log shared by all workers.
///
/// Writes are serialized through one mutex so each line lands whole; the order
/// of lines from different workers is unspecified.
pub struct Journal {
    writer: Option<Mutex<LineWriter<File>>>,
    timestamps: bool,
}

impl Journal {
    /// Run log: every line is prefixed with an RFC 3339 timestamp.
    pub fn open(path: &Path) -> Result<Self, AmrError> {
        Self::open_with(path, true)
    }

    /// Plain record, one bare value per line (e.g. the triage list).
    pub fn open_plain(path: &Path) -> Result<Self, AmrError> {
        Self::open_with(path, false)
    }

    /// A journal that discards everything.
    pub fn sink() -> Self {
        Self {
            writer: None,
            timestamps: false,
        }
    }

    fn open_with(path: &Path, timestamps: bool) -> Result<Self, AmrError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| {
                    AmrError::Filesystem(format!("create {}: {err}", parent.display()))
                })?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|err| AmrError::Filesystem(format!("open {}: {err}", path.display())))?;
        Ok(Self {
            writer: Some(Mutex::new(LineWriter::new(file))),
            timestamps,
        })
    }

    pub fn append(&self, line: &str) {
        let Some(writer) = &self.writer else {
            return;
        };
        let line = if self.timestamps {
            format!("{}\t{line}\n", chrono::Utc::now().to_rfc3339())
        } else {
            format!("{line}\n")
        };
        let mut guard = writer.lock().unwrap_or_else(|err| err.into_inner());
        if let Err(err) = guard.write_all(line.as_bytes()).and_then(|_| guard.flush()) {
            tracing::warn!(error = %err, "journal write failed");
        }
    }
}
