// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Protocol states and the journal update tags that persist them.

use crate::op::Protocol;
use serde::{Deserialize, Serialize};
use std::fmt;

/// State of a distributed atomic operation on this host.
///
/// Not every state is persisted; some only exist between two journal
/// records (for example when a message arrives earlier than expected).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    // -- two-phase commit, coordinator side --
    /// Local execution requested, waiting for the executor result.
    TpcCoordComputing,
    /// Vote requests sent, collecting votes.
    TpcCoordVoteReqSent,
    /// Commit decision sent, collecting acks.
    TpcCoordResultSent,
    /// Abort decided while a local undo is outstanding, then acks.
    TpcWaitUndoAck,

    // -- two-phase commit, participant side --
    /// Execution requested, waiting for the executor result.
    TpcPartComputing,
    /// Executor said yes, waiting for the vote request.
    TpcPartWaitVoteReqYes,
    /// Executor said no, waiting for the vote request.
    TpcPartWaitVoteReqNo,
    /// Vote request arrived before the executor result.
    TpcPartVoteReqReceived,
    /// Voted yes, waiting for the decision.
    TpcPartWaitResultExpectYes,
    /// Voted no, waiting for the decision.
    TpcPartWaitResultExpectNo,

    // -- two-phase commit, either side --
    /// Abort fan-out in progress, collecting acks.
    TpcAborting,
    /// Abort received while the local undo is outstanding.
    TpcWaitUndoToFinish,

    // -- modified two-phase commit --
    MtpcCoordComputing,
    MtpcPartComputing,
    /// Coordinator executed, operation request sent, waiting for the vote.
    MtpcCoordReqSent,
    /// Abort decided, local undo outstanding (either side).
    MtpcWaitUndone,
    /// Participant voted commit, waiting for the coordinator ack.
    MtpcPartVoteSentYes,
    /// Participant voted abort, waiting for the coordinator ack.
    MtpcPartVoteSentNo,

    // -- ordered operation execution --
    /// Execution requested, waiting for the executor result.
    OoeComputing,
    /// Next participant requested, waiting for its terminal answer.
    OoeWaitResult,
    /// Chain aborted behind us, local undo outstanding.
    OoeWaitUndone,
}

impl Status {
    pub fn protocol(self) -> Protocol {
        use Status::*;
        match self {
            TpcCoordComputing | TpcCoordVoteReqSent | TpcCoordResultSent | TpcWaitUndoAck
            | TpcPartComputing | TpcPartWaitVoteReqYes | TpcPartWaitVoteReqNo
            | TpcPartVoteReqReceived | TpcPartWaitResultExpectYes | TpcPartWaitResultExpectNo
            | TpcAborting | TpcWaitUndoToFinish => Protocol::TwoPhaseCommit,
            MtpcCoordComputing | MtpcPartComputing | MtpcCoordReqSent | MtpcWaitUndone
            | MtpcPartVoteSentYes | MtpcPartVoteSentNo => Protocol::ModifiedTwoPhaseCommit,
            OoeComputing | OoeWaitResult | OoeWaitUndone => Protocol::OrderedExecution,
        }
    }

    /// Whether this state belongs to the side that began the operation.
    ///
    /// Ordered execution has no fixed coordinator; position in the chain
    /// decides behavior instead, so every ordered state answers `false`.
    pub fn is_coordinator_side(self) -> bool {
        use Status::*;
        matches!(
            self,
            TpcCoordComputing
                | TpcCoordVoteReqSent
                | TpcCoordResultSent
                | TpcWaitUndoAck
                | MtpcCoordComputing
                | MtpcCoordReqSent
                | MtpcWaitUndone
        )
    }

    /// Wire byte used in `ContentResponse`/`StatusResponse` messages.
    pub fn as_u8(self) -> u8 {
        use Status::*;
        match self {
            TpcCoordComputing => 0,
            TpcCoordVoteReqSent => 1,
            TpcCoordResultSent => 2,
            TpcWaitUndoAck => 3,
            TpcPartComputing => 4,
            TpcPartWaitVoteReqYes => 5,
            TpcPartWaitVoteReqNo => 6,
            TpcPartVoteReqReceived => 7,
            TpcPartWaitResultExpectYes => 8,
            TpcPartWaitResultExpectNo => 9,
            TpcAborting => 10,
            TpcWaitUndoToFinish => 11,
            MtpcCoordComputing => 12,
            MtpcPartComputing => 13,
            MtpcCoordReqSent => 14,
            MtpcWaitUndone => 15,
            MtpcPartVoteSentYes => 16,
            MtpcPartVoteSentNo => 17,
            OoeComputing => 18,
            OoeWaitResult => 19,
            OoeWaitUndone => 20,
        }
    }

    pub fn from_u8(raw: u8) -> Option<Self> {
        use Status::*;
        Some(match raw {
            0 => TpcCoordComputing,
            1 => TpcCoordVoteReqSent,
            2 => TpcCoordResultSent,
            3 => TpcWaitUndoAck,
            4 => TpcPartComputing,
            5 => TpcPartWaitVoteReqYes,
            6 => TpcPartWaitVoteReqNo,
            7 => TpcPartVoteReqReceived,
            8 => TpcPartWaitResultExpectYes,
            9 => TpcPartWaitResultExpectNo,
            10 => TpcAborting,
            11 => TpcWaitUndoToFinish,
            12 => MtpcCoordComputing,
            13 => MtpcPartComputing,
            14 => MtpcCoordReqSent,
            15 => MtpcWaitUndone,
            16 => MtpcPartVoteSentYes,
            17 => MtpcPartVoteSentNo,
            18 => OoeComputing,
            19 => OoeWaitResult,
            20 => OoeWaitUndone,
            _ => return None,
        })
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Journal update tags: the one-byte body of a `DistributedUpdate` record.
///
/// Commit, abort, and begin records have their own record families and
/// need no tag here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
#[serde(rename_all = "snake_case")]
pub enum LogTag {
    TpcPartVoteYes = 0,
    TpcPartVoteNo = 1,
    TpcCoordVoteStart = 2,
    TpcCoordAborting = 3,
    TpcCoordCommitting = 4,
    MtpcPartCommit = 5,
    MtpcPartAbort = 6,
    MtpcCoordStartPart = 7,
    OoeStartNext = 8,
    OoeUndo = 9,
}

impl LogTag {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(raw: u8) -> Option<Self> {
        use LogTag::*;
        Some(match raw {
            0 => TpcPartVoteYes,
            1 => TpcPartVoteNo,
            2 => TpcCoordVoteStart,
            3 => TpcCoordAborting,
            4 => TpcCoordCommitting,
            5 => MtpcPartCommit,
            6 => MtpcPartAbort,
            7 => MtpcCoordStartPart,
            8 => OoeStartNext,
            9 => OoeUndo,
            _ => return None,
        })
    }

    pub fn protocol(self) -> Protocol {
        use LogTag::*;
        match self {
            TpcPartVoteYes | TpcPartVoteNo | TpcCoordVoteStart | TpcCoordAborting
            | TpcCoordCommitting => Protocol::TwoPhaseCommit,
            MtpcPartCommit | MtpcPartAbort | MtpcCoordStartPart => {
                Protocol::ModifiedTwoPhaseCommit
            }
            OoeStartNext | OoeUndo => Protocol::OrderedExecution,
        }
    }

    /// Status a recovered operation resumes in when this tag is the last
    /// update on record.
    pub fn recovered_status(self) -> Status {
        use LogTag::*;
        match self {
            TpcPartVoteYes => Status::TpcPartWaitResultExpectYes,
            TpcPartVoteNo => Status::TpcPartWaitResultExpectNo,
            TpcCoordVoteStart => Status::TpcCoordVoteReqSent,
            TpcCoordAborting => Status::TpcAborting,
            TpcCoordCommitting => Status::TpcCoordResultSent,
            MtpcPartCommit => Status::MtpcPartVoteSentYes,
            MtpcPartAbort => Status::MtpcPartVoteSentNo,
            MtpcCoordStartPart => Status::MtpcCoordReqSent,
            OoeStartNext => Status::OoeWaitResult,
            OoeUndo => Status::OoeWaitUndone,
        }
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
