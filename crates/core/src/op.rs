// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operation records and the types that identify them.

use crate::status::Status;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Root inode number of a subtree. `0` is never a valid entry point.
pub type InodeNumber = u64;

/// Globally unique identifier of a distributed atomic operation.
///
/// Generated by the coordinator at start, carried on every wire message and
/// every journal record for the operation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct OpId(pub u64);

impl OpId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

impl From<u64> for OpId {
    fn from(raw: u64) -> Self {
        OpId(raw)
    }
}

/// Executor modules that take part in distributed atomic operations.
///
/// Routes execution requests and client responses to the owning queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Module {
    LoadBalancing,
    Metadata,
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Module::LoadBalancing => write!(f, "load_balancing"),
            Module::Metadata => write!(f, "metadata"),
        }
    }
}

/// Kinds of metadata mutation that may run as a distributed atomic operation.
///
/// `OrderedProbe` and `OrderedBalanceProbe` exist to exercise the ordered
/// execution protocol, which no production mutation uses yet; they behave
/// exactly like any other ordered operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Rename = 0,
    MoveSubtree = 1,
    ChangePartitionOwnership = 2,
    SetAttr = 3,
    OrderedProbe = 4,
    OrderedBalanceProbe = 5,
}

impl OperationKind {
    /// Commit protocol used for this kind of operation.
    pub fn protocol(self) -> Protocol {
        match self {
            OperationKind::Rename
            | OperationKind::ChangePartitionOwnership
            | OperationKind::SetAttr => Protocol::TwoPhaseCommit,
            OperationKind::MoveSubtree => Protocol::ModifiedTwoPhaseCommit,
            OperationKind::OrderedProbe | OperationKind::OrderedBalanceProbe => {
                Protocol::OrderedExecution
            }
        }
    }

    /// Whether a locally applied effect of this kind can be compensated.
    ///
    /// Undoable kinds get an Undo request forwarded to the executor on
    /// abort-after-apply; the rest abort without compensation.
    pub fn supports_undo(self) -> bool {
        matches!(
            self,
            OperationKind::MoveSubtree
                | OperationKind::OrderedProbe
                | OperationKind::OrderedBalanceProbe
        )
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(OperationKind::Rename),
            1 => Some(OperationKind::MoveSubtree),
            2 => Some(OperationKind::ChangePartitionOwnership),
            3 => Some(OperationKind::SetAttr),
            4 => Some(OperationKind::OrderedProbe),
            5 => Some(OperationKind::OrderedBalanceProbe),
            _ => None,
        }
    }
}

/// Commit protocols driven by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    TwoPhaseCommit,
    ModifiedTwoPhaseCommit,
    OrderedExecution,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::TwoPhaseCommit => write!(f, "2pc"),
            Protocol::ModifiedTwoPhaseCommit => write!(f, "m2pc"),
            Protocol::OrderedExecution => write!(f, "ooe"),
        }
    }
}

/// A subtree owned by some server: routing target and journal selector.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Subtree {
    /// Address of the server currently responsible for the subtree.
    pub server: String,
    /// Root inode of the subtree, used to select the journal on that server.
    pub subtree_entry: InodeNumber,
}

impl Subtree {
    pub fn new(server: impl Into<String>, subtree_entry: InodeNumber) -> Self {
        Self { server: server.into(), subtree_entry }
    }

    /// An empty server address marks the end of an ordered execution chain.
    pub fn is_end_of_chain(&self) -> bool {
        self.server.is_empty()
    }
}

impl fmt::Display for Subtree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.subtree_entry, self.server)
    }
}

/// Mismatch classification for two subtree descriptions.
///
/// A matching entry point under a different server address usually means
/// the subtree migrated since the operation started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubtreeMismatch {
    EntryPoint,
    ServerAddress,
}

impl Subtree {
    pub fn mismatch(&self, other: &Subtree) -> Option<SubtreeMismatch> {
        if self.subtree_entry != other.subtree_entry {
            Some(SubtreeMismatch::EntryPoint)
        } else if self.server != other.server {
            Some(SubtreeMismatch::ServerAddress)
        } else {
            None
        }
    }
}

/// This host's part in an operation.
///
/// The coordinator began the operation (or owns the subtree that held the
/// begin record); for ordered execution the coordinator role marks the
/// chain initiator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Coordinator,
    Participant,
}

/// Live record of one distributed atomic operation.
///
/// Created when the operation enters the table (at start or on the first
/// inbound request) and removed when the terminal record is durable.
/// Interpretation of `participants` depends on role: a 2PC coordinator
/// holds its peers, an M2PC coordinator the single write-peer, a
/// participant its coordinator, and an ordered executor `[previous, next]`
/// (either may be absent at the chain ends).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Op {
    pub id: OpId,
    pub kind: OperationKind,
    /// Opaque operation description; schema owned by the executor.
    pub payload: Vec<u8>,
    pub protocol: Protocol,
    pub status: Status,
    pub role: Role,
    /// Journal selector for this host's part of the operation.
    pub subtree_entry: InodeNumber,
    pub participants: Vec<Subtree>,
    /// Votes or acks received so far; 2PC coordinator only.
    pub votes_received: u32,
    /// Peers whose vote/ack was already counted for the current round.
    /// Cleared when a round completes and on the terminal transition.
    pub answered: HashSet<String>,
    /// Absolute wall-clock deadline (epoch ms) for the whole operation.
    pub overall_deadline_ms: u64,
    /// An abort decision arrived while the local executor was still
    /// running; it is applied when the executor answers.
    pub pending_abort: bool,
    /// M2PC coordinator: the participant's vote arrived before the local
    /// executor result.
    pub pending_vote: Option<bool>,
    /// The client response for this operation has been delivered.
    pub client_answered: bool,
}

impl Op {
    pub fn new(
        id: OpId,
        kind: OperationKind,
        payload: Vec<u8>,
        status: Status,
        role: Role,
        subtree_entry: InodeNumber,
        participants: Vec<Subtree>,
        overall_deadline_ms: u64,
    ) -> Self {
        Self {
            id,
            kind,
            payload,
            protocol: kind.protocol(),
            status,
            role,
            subtree_entry,
            participants,
            votes_received: 0,
            answered: HashSet::new(),
            overall_deadline_ms,
            pending_abort: false,
            pending_vote: None,
            client_answered: false,
        }
    }

    /// Counts a vote or ack from `sender`, refusing duplicates.
    pub fn count_answer(&mut self, sender: &str) -> bool {
        if self.answered.contains(sender) {
            return false;
        }
        self.answered.insert(sender.to_string());
        self.votes_received += 1;
        true
    }

    /// Resets the dedup state between the vote round and the ack round.
    pub fn reset_answers(&mut self) {
        self.answered.clear();
        self.votes_received = 0;
    }

    /// Previous executor in an ordered chain, if any.
    pub fn ooe_previous(&self) -> Option<&Subtree> {
        match self.role {
            Role::Coordinator => None,
            Role::Participant => self.participants.first(),
        }
    }

    /// Next executor in an ordered chain, once discovered.
    pub fn ooe_next(&self) -> Option<&Subtree> {
        match self.role {
            Role::Coordinator => self.participants.first(),
            Role::Participant => self.participants.get(1),
        }
    }

    /// Record the executor's choice of next chain member.
    pub fn set_ooe_next(&mut self, next: Subtree) {
        match self.role {
            Role::Coordinator => {
                self.participants.truncate(0);
                self.participants.push(next);
            }
            Role::Participant => {
                self.participants.truncate(1);
                self.participants.push(next);
            }
        }
    }

    /// Executor module that owns this operation's queue traffic.
    pub fn module(&self) -> Module {
        match self.kind {
            OperationKind::ChangePartitionOwnership
            | OperationKind::MoveSubtree
            | OperationKind::OrderedBalanceProbe => Module::LoadBalancing,
            OperationKind::Rename | OperationKind::SetAttr | OperationKind::OrderedProbe => {
                Module::Metadata
            }
        }
    }
}

#[cfg(test)]
#[path = "op_tests.rs"]
mod tests;
