//! Shadow ledger: append-only, per-project JSONL audit log.
//!
//! One entry per line, written as a single atomic append and flushed before
//! `append` returns. Nothing in this module mutates an existing line.
//!
//! Replay has two postures:
//! - [`ShadowLedger::read_all`] is strict: a malformed line is fatal. Used
//!   when the ledger is the authority (closing an epoch's counts).
//! - [`ShadowLedger::read_all_lenient`] skips malformed lines, logs each one,
//!   and reports how many were skipped. Used by advisory audit tooling,
//!   where corruption is a finding to surface rather than a crash.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracegraph_model::{LedgerEntry, Result, TraceError};

/// Append-only ledger directory holding one `<project_id>.jsonl` per project.
pub struct ShadowLedger {
    dir: PathBuf,
}

impl ShadowLedger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, project_id: &str) -> PathBuf {
        self.dir.join(format!("{project_id}.jsonl"))
    }

    /// Append one entry. Either the whole line lands or the call fails.
    pub fn append(&self, entry: &LedgerEntry) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&entry.project_id);

        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Strict replay: malformed lines are fatal.
    pub fn read_all(&self, project_id: &str) -> Result<Vec<LedgerEntry>> {
        let path = self.path_for(project_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for (line_number, line) in read_lines(&path)?.into_iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: LedgerEntry =
                serde_json::from_str(&line).map_err(|e| TraceError::LedgerCorrupt {
                    path: path.display().to_string(),
                    line_number: line_number + 1,
                    reason: e.to_string(),
                })?;
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Lenient replay for audits: returns parsed entries and the number of
    /// malformed lines skipped.
    pub fn read_all_lenient(&self, project_id: &str) -> Result<(Vec<LedgerEntry>, usize)> {
        let path = self.path_for(project_id);
        if !path.exists() {
            return Ok((Vec::new(), 0));
        }
        let mut entries = Vec::new();
        let mut skipped = 0;
        for (line_number, line) in read_lines(&path)?.into_iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LedgerEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(err) => {
                    skipped += 1;
                    tracing::warn!(
                        path = %path.display(),
                        line = line_number + 1,
                        error = %err,
                        "skipping malformed ledger line"
                    );
                }
            }
        }
        Ok((entries, skipped))
    }
}

fn read_lines(path: &Path) -> Result<Vec<String>> {
    let file = std::fs::File::open(path)?;
    let reader = BufReader::new(file);
    let mut lines = Vec::new();
    for line in reader.lines() {
        lines.push(line?);
    }
    Ok(lines)
}
