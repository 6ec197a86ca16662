// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Journal record types for distributed atomic operations.

use serde::{Deserialize, Serialize};
use tl_core::{LogTag, Module, OpId};

/// Body of a distributed-operation journal record.
///
/// A start record carries the full operation description; an update
/// record carries exactly one status tag byte; terminal records carry
/// nothing beyond the operation id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "record_kind", rename_all = "snake_case")]
pub enum RecordBody {
    Start {
        kind: tl_core::OperationKind,
        #[serde(with = "payload_hex")]
        payload: Vec<u8>,
    },
    Update {
        tag: LogTag,
    },
    Commit,
    Abort,
}

impl RecordBody {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RecordBody::Commit | RecordBody::Abort)
    }
}

/// One record in a journal, in append order within its file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalRecord {
    /// Position within the owning journal, starting at 1.
    pub seq: u64,
    pub id: OpId,
    /// Module whose operation this record belongs to.
    pub module: Module,
    #[serde(flatten)]
    pub body: RecordBody,
}

/// Payloads are opaque bytes; hex keeps the journal lines valid UTF-8.
mod payload_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        let mut out = String::with_capacity(bytes.len() * 2);
        for b in bytes {
            out.push_str(&format!("{b:02x}"));
        }
        ser.serialize_str(&out)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(de)?;
        if text.len() % 2 != 0 {
            return Err(serde::de::Error::custom("odd hex payload length"));
        }
        (0..text.len())
            .step_by(2)
            .map(|i| {
                u8::from_str_radix(&text[i..i + 2], 16)
                    .map_err(|_| serde::de::Error::custom("invalid hex payload"))
            })
            .collect()
    }
}

#[cfg(test)]
#[path = "record_tests.rs"]
mod tests;
