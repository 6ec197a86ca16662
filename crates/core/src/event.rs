// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Protocol events consumed by the engine's transition functions.
//!
//! Every stimulus the engine sees, whether an inbound wire message, an
//! executor result popped from the in-queue, or a fired timeout,
//! resolves to one of these before the per-protocol transition runs.

use crate::op::Protocol;

/// One discrete protocol event for a single operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolEvent {
    // -- ordered operation execution --
    /// Local executor finished successfully and a next participant exists.
    OoeExecOk,
    /// Local executor failed.
    OoeExecFail,
    /// Local executor finished successfully and this host is last in order.
    OoeLastExecOk,
    /// The rest of the chain committed.
    OoeAckReceived,
    /// The rest of the chain aborted.
    OoeAbortReceived,
    /// Compensation for the local effect completed.
    OoeUndone,

    // -- two-phase commit, participant --
    TpcPartExecOk,
    TpcPartExecFail,
    /// Coordinator asked for our vote.
    TpcPartVoteReq,
    /// Coordinator decided commit.
    TpcPartCommit,
    /// Coordinator decided abort.
    TpcPartAbort,

    // -- two-phase commit, coordinator --
    TpcCoordExecOk,
    TpcCoordExecFail,
    /// The final missing vote arrived and every vote was yes.
    TpcCoordVotesDone,
    /// The final missing ack arrived.
    TpcCoordAcksDone,
    /// Compensation for the local effect completed.
    TpcUndone,

    // -- modified two-phase commit --
    MtpcPartExecOk,
    MtpcPartExecFail,
    /// Coordinator acknowledged our vote.
    MtpcPartAckReceived,
    MtpcCoordExecOk,
    MtpcCoordExecFail,
    /// The write-participant voted commit.
    MtpcCoordCommitVote,
    /// The write-participant voted abort.
    MtpcCoordAbortVote,
    /// Compensation for the local effect completed.
    MtpcUndone,
}

impl ProtocolEvent {
    pub fn protocol(self) -> Protocol {
        use ProtocolEvent::*;
        match self {
            OoeExecOk | OoeExecFail | OoeLastExecOk | OoeAckReceived | OoeAbortReceived
            | OoeUndone => Protocol::OrderedExecution,
            TpcPartExecOk | TpcPartExecFail | TpcPartVoteReq | TpcPartCommit | TpcPartAbort
            | TpcCoordExecOk | TpcCoordExecFail | TpcCoordVotesDone | TpcCoordAcksDone
            | TpcUndone => Protocol::TwoPhaseCommit,
            MtpcPartExecOk | MtpcPartExecFail | MtpcPartAckReceived | MtpcCoordExecOk
            | MtpcCoordExecFail | MtpcCoordCommitVote | MtpcCoordAbortVote | MtpcUndone => {
                Protocol::ModifiedTwoPhaseCommit
            }
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
