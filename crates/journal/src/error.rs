// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Journal error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("journal serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt journal record at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },

    #[error("no journal for subtree {0}")]
    UnknownSubtree(u64),

    #[error("operation {0} has no records in this journal")]
    NotFound(tl_core::OpId),
}
