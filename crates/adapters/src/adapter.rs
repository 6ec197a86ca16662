// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The executor hook set.

use async_trait::async_trait;
use tl_core::{DaoError, InResult, Op, OpId, Subtree};

/// Narrow engine view handed to adapters at registration.
///
/// The engine implements this; adapters use it to answer execution
/// requests without holding the engine's internals.
pub trait ResultSink: Send + Sync + 'static {
    /// Non-blocking: enqueues into the engine's in-queue.
    fn provide_result(&self, result: InResult);
}

/// Hooks an executor module implements to take part in distributed atomic
/// operations.
///
/// The recovery hooks (`is_coordinator`, `set_sending_addresses`,
/// `set_subtree_entry_point`) run before the engine's tasks start and may
/// block; the execution hooks run on the adapter pump task and may await.
/// Execution hooks must tolerate repetition: after a crash the engine
/// re-requests work it cannot prove was applied.
#[async_trait]
pub trait DaoAdapter: Send + Sync + 'static {
    /// Whether this server runs the coordinator part of a recovered
    /// operation. The payload may be the only hint available.
    fn is_coordinator(&self, op: &Op) -> bool;

    /// Fill `op.participants` for a recovered operation: the coordinator
    /// for a participant, the peers for a coordinator, `[previous, next]`
    /// for an ordered executor.
    fn set_sending_addresses(&self, op: &mut Op) -> Result<(), DaoError>;

    /// Fill `op.subtree_entry` for the part of the operation this server
    /// is responsible for.
    fn set_subtree_entry_point(&self, op: &mut Op) -> Result<(), DaoError>;

    /// Next executor in an ordered chain; an empty server address means
    /// this host is last in order. Only called for ordered operations.
    fn next_participant(&self, payload: &[u8]) -> Subtree;

    /// Apply this server's part of the operation.
    async fn handle_operation_request(&self, id: OpId, payload: &[u8]) -> bool;

    /// Re-apply after a crash; implementations may detect "already
    /// applied" and skip the work.
    async fn handle_operation_rerequest(&self, id: OpId, payload: &[u8]) -> bool;

    /// Compensate a locally applied effect.
    async fn handle_operation_undo_request(&self, id: OpId, payload: &[u8]) -> bool;

    /// Re-run a compensation after a crash.
    async fn handle_operation_reundo_request(&self, id: OpId, payload: &[u8]) -> bool;

    /// Final outcome of an operation this module started. Purely a
    /// notification; no result may be sent back for it.
    async fn handle_operation_result(&self, id: OpId, success: bool);
}
