// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Records exchanged over the executor queues.
//!
//! The engine produces [`OutRequest`]s into one queue per module; each
//! executor consumes its queue, does the work, and answers through
//! [`InResult`]. On the wire-compatible byte form the first payload byte
//! is the request tag; a record whose declared payload length is zero is
//! the final client response instead of a request.

use crate::op::{OpId, Protocol, Subtree};
use serde::{Deserialize, Serialize};

/// First byte of an executor request payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum RequestTag {
    /// Apply the operation.
    Execute = 1,
    /// Re-apply after a crash; implementations may detect "already applied".
    Redo = 2,
    /// Compensate a locally applied effect.
    Undo = 3,
    /// Re-run a compensation after a crash.
    Reundo = 4,
}

impl RequestTag {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(RequestTag::Execute),
            2 => Some(RequestTag::Redo),
            3 => Some(RequestTag::Undo),
            4 => Some(RequestTag::Reundo),
            _ => None,
        }
    }
}

/// Executor result codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ExecStatus {
    ExecOk = 0,
    ExecFail = 1,
    UndoOk = 2,
    UndoFail = 3,
}

impl ExecStatus {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(ExecStatus::ExecOk),
            1 => Some(ExecStatus::ExecFail),
            2 => Some(ExecStatus::UndoOk),
            3 => Some(ExecStatus::UndoFail),
            _ => None,
        }
    }
}

/// Body of a record on an executor out-queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutBody {
    /// Execute/redo/undo/reundo the operation described by `payload`.
    Request { tag: RequestTag, payload: Vec<u8> },
    /// Final outcome of the operation this module started.
    ClientResponse { success: bool },
}

/// One record on an executor out-queue (engine → executor).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutRequest {
    pub id: OpId,
    pub body: OutBody,
    pub protocol: Protocol,
}

impl OutRequest {
    pub fn request(id: OpId, tag: RequestTag, payload: Vec<u8>, protocol: Protocol) -> Self {
        Self { id, body: OutBody::Request { tag, payload }, protocol }
    }

    pub fn client_response(id: OpId, success: bool, protocol: Protocol) -> Self {
        Self { id, body: OutBody::ClientResponse { success }, protocol }
    }

    /// Declared payload length: number of operation-description bytes.
    /// Zero identifies a client response.
    pub fn payload_len(&self) -> u32 {
        match &self.body {
            OutBody::Request { payload, .. } => payload.len() as u32,
            OutBody::ClientResponse { .. } => 0,
        }
    }

    /// Byte form: `[tag][payload…]` for requests, `[0|1]` for responses.
    pub fn to_bytes(&self) -> Vec<u8> {
        match &self.body {
            OutBody::Request { tag, payload } => {
                let mut buf = Vec::with_capacity(1 + payload.len());
                buf.push(tag.as_u8());
                buf.extend_from_slice(payload);
                buf
            }
            OutBody::ClientResponse { success } => vec![u8::from(*success)],
        }
    }
}

/// One record on the engine in-queue (executor → engine).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InResult {
    pub id: OpId,
    pub status: ExecStatus,
    /// Next executor in an ordered chain. `None` when the protocol is not
    /// ordered execution; a subtree with an empty server address means
    /// this host is last in order.
    pub next_participant: Option<Subtree>,
}

impl InResult {
    pub fn new(id: OpId, status: ExecStatus) -> Self {
        Self { id, status, next_participant: None }
    }

    pub fn with_next(id: OpId, status: ExecStatus, next: Subtree) -> Self {
        Self { id, status, next_participant: Some(next) }
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
