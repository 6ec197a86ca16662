// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Journal manager: one journal per owned subtree plus the server journal.

use crate::error::JournalError;
use crate::journal::Journal;
use crate::record::JournalRecord;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tl_core::{InodeNumber, OpId};
use tracing::debug;

const SERVER_JOURNAL: &str = "server.journal";

/// Owns every journal of this metadata server.
///
/// Subtree journals are named `subtree-<entry>.journal` inside the journal
/// directory. The entry number `0` selects the server journal.
pub struct JournalManager {
    dir: PathBuf,
    server: Journal,
    subtrees: HashMap<InodeNumber, Journal>,
}

impl JournalManager {
    /// Open the journal directory, loading every journal found in it.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, JournalError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let server = Journal::open(dir.join(SERVER_JOURNAL), 0)?;

        let mut subtrees = HashMap::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(number) = name
                .strip_prefix("subtree-")
                .and_then(|rest| rest.strip_suffix(".journal"))
            else {
                continue;
            };
            let Ok(inode) = number.parse::<InodeNumber>() else { continue };
            if inode == 0 {
                continue;
            }
            subtrees.insert(inode, Journal::open(entry.path(), inode)?);
        }

        debug!(dir = %dir.display(), subtree_journals = subtrees.len(), "journals opened");
        Ok(Self { dir, server, subtrees })
    }

    /// Journal for the given subtree entry; `0` selects the server journal.
    pub fn journal_for(&mut self, subtree_entry: InodeNumber) -> Result<&mut Journal, JournalError> {
        if subtree_entry == 0 {
            return Ok(&mut self.server);
        }
        self.subtrees
            .get_mut(&subtree_entry)
            .ok_or(JournalError::UnknownSubtree(subtree_entry))
    }

    /// Whether a journal exists for the subtree entry.
    pub fn has_journal(&self, subtree_entry: InodeNumber) -> bool {
        subtree_entry == 0 || self.subtrees.contains_key(&subtree_entry)
    }

    /// Create the journal for a subtree this server just became
    /// responsible for.
    pub fn create_subtree_journal(
        &mut self,
        subtree_entry: InodeNumber,
    ) -> Result<&mut Journal, JournalError> {
        if subtree_entry == 0 {
            return Ok(&mut self.server);
        }
        let path = self.dir.join(format!("subtree-{subtree_entry}.journal"));
        match self.subtrees.entry(subtree_entry) {
            Entry::Occupied(occupied) => Ok(occupied.into_mut()),
            Entry::Vacant(vacant) => Ok(vacant.insert(Journal::open(path, subtree_entry)?)),
        }
    }

    /// All open operations across every journal, keyed by id, each with
    /// its records in append order and the journal it came from.
    pub fn open_operations(&self) -> BTreeMap<OpId, (InodeNumber, Vec<JournalRecord>)> {
        let mut result = BTreeMap::new();
        for journal in self.journals() {
            for id in journal.open_operations() {
                let records =
                    journal.records_for(id).into_iter().cloned().collect::<Vec<_>>();
                result.insert(id, (journal.subtree_entry(), records));
            }
        }
        result
    }

    /// Ids with a terminal record anywhere on this server.
    pub fn finished_operations(&self) -> BTreeSet<OpId> {
        self.journals()
            .flat_map(|journal| journal.finished_operations())
            .collect()
    }

    /// Search every journal for the operation's records.
    pub fn find_operation(&self, id: OpId) -> Option<(InodeNumber, Vec<JournalRecord>)> {
        for journal in self.journals() {
            if journal.contains(id) {
                let records = journal.records_for(id).into_iter().cloned().collect();
                return Some((journal.subtree_entry(), records));
            }
        }
        None
    }

    fn journals(&self) -> impl Iterator<Item = &Journal> {
        std::iter::once(&self.server).chain(self.subtrees.values())
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
