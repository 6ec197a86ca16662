// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scripted adapter for tests.

use crate::adapter::{DaoAdapter, ResultSink};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tl_core::{DaoError, InResult, InodeNumber, Op, OpId, Subtree};
use tokio::sync::mpsc;

/// One recorded hook invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterCall {
    Execute { id: OpId, payload: Vec<u8> },
    Reexecute { id: OpId, payload: Vec<u8> },
    Undo { id: OpId, payload: Vec<u8> },
    Reundo { id: OpId, payload: Vec<u8> },
    Result { id: OpId, success: bool },
}

/// Test adapter with scripted outcomes and recorded calls.
///
/// Execution outcomes pop from a script queue (defaulting to success);
/// ordered chains pop their next participant the same way (defaulting to
/// end of chain).
pub struct FakeAdapter {
    calls: Mutex<Vec<AdapterCall>>,
    exec_results: Mutex<VecDeque<bool>>,
    undo_results: Mutex<VecDeque<bool>>,
    next_participants: Mutex<VecDeque<Subtree>>,
    coordinator: Mutex<bool>,
    addresses: Mutex<Option<Vec<Subtree>>>,
    subtree_entry: Mutex<InodeNumber>,
}

impl FakeAdapter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            exec_results: Mutex::new(VecDeque::new()),
            undo_results: Mutex::new(VecDeque::new()),
            next_participants: Mutex::new(VecDeque::new()),
            coordinator: Mutex::new(true),
            addresses: Mutex::new(Some(Vec::new())),
            subtree_entry: Mutex::new(0),
        })
    }

    /// Script the outcome of the next execute/redo request.
    pub fn push_exec_result(&self, ok: bool) {
        self.exec_results.lock().push_back(ok);
    }

    /// Script the outcome of the next undo/reundo request.
    pub fn push_undo_result(&self, ok: bool) {
        self.undo_results.lock().push_back(ok);
    }

    /// Script the next participant answered for an ordered execution.
    pub fn push_next_participant(&self, next: Subtree) {
        self.next_participants.lock().push_back(next);
    }

    /// Answer for `is_coordinator` during recovery.
    pub fn set_coordinator(&self, coordinator: bool) {
        *self.coordinator.lock() = coordinator;
    }

    /// Addresses filled in by `set_sending_addresses`; `None` makes the
    /// hook refuse.
    pub fn set_addresses(&self, addresses: Option<Vec<Subtree>>) {
        *self.addresses.lock() = addresses;
    }

    /// Entry point filled in by `set_subtree_entry_point`.
    pub fn set_subtree_entry(&self, entry: InodeNumber) {
        *self.subtree_entry.lock() = entry;
    }

    pub fn calls(&self) -> Vec<AdapterCall> {
        self.calls.lock().clone()
    }

    /// Results delivered via `handle_operation_result`.
    pub fn results(&self) -> Vec<(OpId, bool)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                AdapterCall::Result { id, success } => Some((*id, *success)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: AdapterCall) {
        self.calls.lock().push(call);
    }

    fn pop_exec(&self) -> bool {
        self.exec_results.lock().pop_front().unwrap_or(true)
    }

    fn pop_undo(&self) -> bool {
        self.undo_results.lock().pop_front().unwrap_or(true)
    }
}

#[async_trait]
impl DaoAdapter for FakeAdapter {
    fn is_coordinator(&self, _op: &Op) -> bool {
        *self.coordinator.lock()
    }

    fn set_sending_addresses(&self, op: &mut Op) -> Result<(), DaoError> {
        match self.addresses.lock().clone() {
            Some(addresses) => {
                op.participants = addresses;
                Ok(())
            }
            None => Err(DaoError::SettingAddressesFailed),
        }
    }

    fn set_subtree_entry_point(&self, op: &mut Op) -> Result<(), DaoError> {
        op.subtree_entry = *self.subtree_entry.lock();
        Ok(())
    }

    fn next_participant(&self, _payload: &[u8]) -> Subtree {
        self.next_participants.lock().pop_front().unwrap_or_default()
    }

    async fn handle_operation_request(&self, id: OpId, payload: &[u8]) -> bool {
        self.record(AdapterCall::Execute { id, payload: payload.to_vec() });
        self.pop_exec()
    }

    async fn handle_operation_rerequest(&self, id: OpId, payload: &[u8]) -> bool {
        self.record(AdapterCall::Reexecute { id, payload: payload.to_vec() });
        self.pop_exec()
    }

    async fn handle_operation_undo_request(&self, id: OpId, payload: &[u8]) -> bool {
        self.record(AdapterCall::Undo { id, payload: payload.to_vec() });
        self.pop_undo()
    }

    async fn handle_operation_reundo_request(&self, id: OpId, payload: &[u8]) -> bool {
        self.record(AdapterCall::Reundo { id, payload: payload.to_vec() });
        self.pop_undo()
    }

    async fn handle_operation_result(&self, id: OpId, success: bool) {
        self.record(AdapterCall::Result { id, success });
    }
}

/// Sink that hands every result to a channel for assertions.
pub struct CollectingSink {
    tx: mpsc::UnboundedSender<InResult>,
}

impl CollectingSink {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<InResult>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl ResultSink for CollectingSink {
    fn provide_result(&self, result: InResult) {
        let _ = self.tx.send(result);
    }
}
