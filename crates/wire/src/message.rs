// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Message taxonomy for the commit protocols and failure handling.

use tl_core::{InodeNumber, OpId, OperationKind, Status, Subtree};

/// Kind byte of a wire message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    TpcOpReq = 0,
    TpcVoteReq = 1,
    TpcVoteYes = 2,
    TpcVoteNo = 3,
    TpcCommit = 4,
    TpcAbort = 5,
    TpcAck = 6,
    MtpcOpReq = 7,
    MtpcCommit = 8,
    MtpcAbort = 9,
    MtpcAck = 10,
    OoeOpReq = 11,
    OoeAck = 12,
    OoeAborted = 13,
    NotResponsible = 14,
    EventReRequest = 15,
    ContentRequest = 16,
    ContentResponse = 17,
    StatusRequest = 18,
    StatusResponse = 19,
}

impl MessageKind {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(raw: u8) -> Option<Self> {
        use MessageKind::*;
        Some(match raw {
            0 => TpcOpReq,
            1 => TpcVoteReq,
            2 => TpcVoteYes,
            3 => TpcVoteNo,
            4 => TpcCommit,
            5 => TpcAbort,
            6 => TpcAck,
            7 => MtpcOpReq,
            8 => MtpcCommit,
            9 => MtpcAbort,
            10 => MtpcAck,
            11 => OoeOpReq,
            12 => OoeAck,
            13 => OoeAborted,
            14 => NotResponsible,
            15 => EventReRequest,
            16 => ContentRequest,
            17 => ContentResponse,
            18 => StatusRequest,
            19 => StatusResponse,
            _ => return None,
        })
    }
}

/// Operation request body shared by `TpcOpReq`, `MtpcOpReq`, and
/// `OoeOpReq`: enough for the receiver to create its own operation row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpReq {
    pub kind: OperationKind,
    /// Journal selector on the receiving participant.
    pub participant_entry: InodeNumber,
    /// Journal selector on the sender (coordinator or previous executor).
    pub coordinator_entry: InodeNumber,
    pub payload: Vec<u8>,
}

/// Kind-specific fields of a message; the operation id lives in
/// [`Message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    TpcOpReq(OpReq),
    TpcVoteReq,
    TpcVoteYes,
    TpcVoteNo,
    TpcCommit,
    TpcAbort,
    TpcAck,
    MtpcOpReq(OpReq),
    MtpcCommit,
    MtpcAbort,
    MtpcAck,
    OoeOpReq(OpReq),
    OoeAck,
    OoeAborted,
    NotResponsible,
    EventReRequest,
    ContentRequest,
    ContentResponse { status: Status, payload: Vec<u8>, participants: Vec<Subtree> },
    StatusRequest,
    StatusResponse { status: Status },
}

impl MessageBody {
    pub fn kind(&self) -> MessageKind {
        use MessageBody::*;
        match self {
            TpcOpReq(_) => MessageKind::TpcOpReq,
            TpcVoteReq => MessageKind::TpcVoteReq,
            TpcVoteYes => MessageKind::TpcVoteYes,
            TpcVoteNo => MessageKind::TpcVoteNo,
            TpcCommit => MessageKind::TpcCommit,
            TpcAbort => MessageKind::TpcAbort,
            TpcAck => MessageKind::TpcAck,
            MtpcOpReq(_) => MessageKind::MtpcOpReq,
            MtpcCommit => MessageKind::MtpcCommit,
            MtpcAbort => MessageKind::MtpcAbort,
            MtpcAck => MessageKind::MtpcAck,
            OoeOpReq(_) => MessageKind::OoeOpReq,
            OoeAck => MessageKind::OoeAck,
            OoeAborted => MessageKind::OoeAborted,
            NotResponsible => MessageKind::NotResponsible,
            EventReRequest => MessageKind::EventReRequest,
            ContentRequest => MessageKind::ContentRequest,
            ContentResponse { .. } => MessageKind::ContentResponse,
            StatusRequest => MessageKind::StatusRequest,
            StatusResponse { .. } => MessageKind::StatusResponse,
        }
    }
}

/// One wire message: `[u8 kind][u64 id]` plus the body fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: OpId,
    pub body: MessageBody,
}

impl Message {
    pub fn new(id: OpId, body: MessageBody) -> Self {
        Self { id, body }
    }

    pub fn kind(&self) -> MessageKind {
        self.body.kind()
    }

    /// Operation request body, for the three `*OpReq` kinds.
    pub fn op_req(&self) -> Option<&OpReq> {
        match &self.body {
            MessageBody::TpcOpReq(op) | MessageBody::MtpcOpReq(op) | MessageBody::OoeOpReq(op) => {
                Some(op)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
