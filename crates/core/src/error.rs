// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error codes surfaced by the distributed atomic operation engine.

use thiserror::Error;

/// Failures reported by engine operations.
///
/// The numeric codes are stable and appear in logs and journals; `0`
/// always means success and is never a valid code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DaoError {
    #[error("invalid parameter for the requested operation")]
    WrongParameter,
    #[error("operation not found in any journal")]
    OperationNotInJournal,
    #[error("subtree entry points differ")]
    SubtreeUnequal,
    #[error("server addresses differ for the same subtree entry")]
    DifferentServerAddresses,
    #[error("operation id already exists")]
    OperationExisting,
    #[error("sending to peer {peer} failed")]
    SendingFailed { peer: String },
    #[error("journal logging failed")]
    LoggingFailed,
    #[error("subtree {0} does not exist on this server")]
    SubtreeNotExisting(u64),
    #[error("this server is not responsible for the operation")]
    SelfWrongServer,
    #[error("metadata lookup table unavailable")]
    NoMlt,
    #[error("storage abstraction layer unavailable")]
    NoSal,
    #[error("no begin record found for the operation")]
    NoBeginLog,
    #[error("internal engine failure")]
    Internal,
    #[error("no address known for peer {0}")]
    UnknownAddress(String),
    #[error("event does not fit the operation status")]
    WrongEvent,
    #[error("operation already finished")]
    OperationFinished,
    #[error("peer reported a different status")]
    DifferentStatus,
    #[error("unknown journal record for the operation")]
    UnknownLog,
    #[error("not all open operations could be recovered")]
    NotAllOperationsRecoverable,
    #[error("no failure treatment possible")]
    NoFailureTreatmentPossible,
    #[error("adapter could not set sending addresses")]
    SettingAddressesFailed,
}

impl DaoError {
    /// Stable numeric code for logs and peers.
    pub fn code(&self) -> u8 {
        use DaoError::*;
        match self {
            WrongParameter => 1,
            OperationNotInJournal => 2,
            SubtreeUnequal => 3,
            DifferentServerAddresses => 4,
            OperationExisting => 5,
            SendingFailed { .. } => 6,
            LoggingFailed => 7,
            SubtreeNotExisting(_) => 8,
            SelfWrongServer => 9,
            NoMlt => 10,
            NoSal => 11,
            NoBeginLog => 12,
            Internal => 13,
            UnknownAddress(_) => 14,
            WrongEvent => 15,
            OperationFinished => 16,
            DifferentStatus => 17,
            UnknownLog => 18,
            NotAllOperationsRecoverable => 19,
            NoFailureTreatmentPossible => 20,
            SettingAddressesFailed => 21,
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
