// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! A single append-only journal file.

use crate::error::JournalError;
use crate::record::{JournalRecord, RecordBody};
use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tl_core::{InodeNumber, LogTag, Module, OpId, OperationKind};

/// Append-only journal for one subtree (or for the server itself).
///
/// Records are written as one JSON object per line and flushed before
/// `append_*` returns; a record that has been returned is durable as far
/// as the filesystem allows. All records are also kept in memory for
/// cheap lookups; journals are bounded by write-back truncation outside
/// this crate's scope.
#[derive(Debug)]
pub struct Journal {
    subtree_entry: InodeNumber,
    path: PathBuf,
    writer: BufWriter<File>,
    records: Vec<JournalRecord>,
    next_seq: u64,
}

impl Journal {
    /// Open or create the journal file, replaying existing records.
    pub fn open(path: impl AsRef<Path>, subtree_entry: InodeNumber) -> Result<Self, JournalError> {
        let path = path.as_ref().to_path_buf();
        let mut records = Vec::new();

        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            for (i, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let record: JournalRecord =
                    serde_json::from_str(&line).map_err(|e| JournalError::Corrupt {
                        line: i + 1,
                        reason: e.to_string(),
                    })?;
                records.push(record);
            }
        }

        let next_seq = records.last().map(|r| r.seq + 1).unwrap_or(1);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self { subtree_entry, path, writer: BufWriter::new(file), records, next_seq })
    }

    pub fn subtree_entry(&self) -> InodeNumber {
        self.subtree_entry
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append the begin record for an operation. Written exactly once,
    /// when the operation enters the table.
    pub fn append_start(
        &mut self,
        id: OpId,
        module: Module,
        kind: OperationKind,
        payload: &[u8],
    ) -> Result<u64, JournalError> {
        self.append(id, module, RecordBody::Start { kind, payload: payload.to_vec() })
    }

    /// Append a status record carrying one update tag.
    pub fn append_update(
        &mut self,
        id: OpId,
        module: Module,
        tag: LogTag,
    ) -> Result<u64, JournalError> {
        self.append(id, module, RecordBody::Update { tag })
    }

    /// Append the terminal record. Exactly one terminal record may exist
    /// per operation; afterwards the id counts as finished.
    pub fn append_finish(
        &mut self,
        id: OpId,
        module: Module,
        commit: bool,
    ) -> Result<u64, JournalError> {
        let body = if commit { RecordBody::Commit } else { RecordBody::Abort };
        self.append(id, module, body)
    }

    fn append(
        &mut self,
        id: OpId,
        module: Module,
        body: RecordBody,
    ) -> Result<u64, JournalError> {
        let record = JournalRecord { seq: self.next_seq, id, module, body };
        let line = serde_json::to_string(&record)?;
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;

        let seq = record.seq;
        self.records.push(record);
        self.next_seq += 1;
        Ok(seq)
    }

    /// Latest record for the operation, if any.
    pub fn last_record(&self, id: OpId) -> Option<&JournalRecord> {
        self.records.iter().rev().find(|r| r.id == id)
    }

    /// Every record for the operation, in append order.
    pub fn records_for(&self, id: OpId) -> Vec<&JournalRecord> {
        self.records.iter().filter(|r| r.id == id).collect()
    }

    /// Ids whose last record is not a commit or abort.
    pub fn open_operations(&self) -> BTreeSet<OpId> {
        let mut open = BTreeSet::new();
        for record in &self.records {
            if record.body.is_terminal() {
                open.remove(&record.id);
            } else {
                open.insert(record.id);
            }
        }
        open
    }

    /// Ids that have reached their terminal record.
    pub fn finished_operations(&self) -> BTreeSet<OpId> {
        self.records
            .iter()
            .filter(|r| r.body.is_terminal())
            .map(|r| r.id)
            .collect()
    }

    /// Whether any record exists for the operation.
    pub fn contains(&self, id: OpId) -> bool {
        self.records.iter().any(|r| r.id == id)
    }

    #[cfg(test)]
    pub(crate) fn record_count(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
#[path = "journal_tests.rs"]
mod tests;
