// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Mutable engine state and the primitive actions transitions compose.
//!
//! Everything here runs under the engine's single state mutex. The
//! write-ahead rule is enforced by construction: transitions call
//! `log_update`/`finish` before `send`, and the journal flushes before
//! returning.

use crate::scheduler::{TimeoutEntry, TimeoutKind, TimeoutScheduler};
use crate::transport::Transport;
use std::collections::HashMap;
use std::sync::Arc;
use tl_adapters::DaoAdapter;
use tl_core::{
    DaoConfig, DaoError, LogTag, Module, Op, OpId, OutRequest, Protocol, RequestTag, Role,
};
use tl_journal::{JournalError, JournalManager};
use tl_wire::{Message, MessageBody};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Everything guarded by the engine's state mutex.
pub(crate) struct EngineState {
    /// Live operations, at most one per id.
    pub ops: HashMap<OpId, Op>,
    /// Terminal decisions, kept for idempotence of late messages.
    pub finished: HashMap<OpId, (Protocol, bool)>,
    pub journals: JournalManager,
    pub scheduler: TimeoutScheduler,
    /// Out-queue producers, one per registered executor module.
    pub queues: HashMap<Module, mpsc::UnboundedSender<OutRequest>>,
    /// Adapter hooks, used by recovery and content reconstruction.
    pub adapters: HashMap<Module, Arc<dyn DaoAdapter>>,
}

/// Immutable surroundings a transition needs next to the state.
pub(crate) struct Deps<'a> {
    pub transport: &'a dyn Transport,
    pub config: &'a DaoConfig,
    /// Clock snapshot taken when the event was picked up.
    pub now_ms: u64,
}

impl EngineState {
    pub fn new(journals: JournalManager) -> Self {
        Self {
            ops: HashMap::new(),
            finished: HashMap::new(),
            journals,
            scheduler: TimeoutScheduler::new(),
            queues: HashMap::new(),
            adapters: HashMap::new(),
        }
    }

    pub fn op(&self, id: OpId) -> Option<&Op> {
        self.ops.get(&id)
    }

    pub fn op_mut(&mut self, id: OpId) -> Option<&mut Op> {
        self.ops.get_mut(&id)
    }

    /// Append a status record for the operation (write-ahead step).
    pub fn log_update(&mut self, id: OpId, tag: LogTag) -> Result<(), DaoError> {
        let op = self.ops.get(&id).ok_or(DaoError::OperationFinished)?;
        let (entry, module) = (op.subtree_entry, op.module());
        self.journals
            .journal_for(entry)
            .map_err(map_journal_error)?
            .append_update(id, module, tag)
            .map_err(|e| {
                error!(%id, ?tag, error = %e, "status record append failed");
                DaoError::LoggingFailed
            })?;
        debug!(%id, ?tag, "status record appended");
        Ok(())
    }

    /// Write the terminal record, remove the row, and remember the
    /// decision. The one and only decision point per operation and host.
    pub fn finish(&mut self, id: OpId, commit: bool) -> Result<Op, DaoError> {
        let op = self.ops.get(&id).ok_or(DaoError::OperationFinished)?;
        let (entry, module) = (op.subtree_entry, op.module());
        self.journals
            .journal_for(entry)
            .map_err(map_journal_error)?
            .append_finish(id, module, commit)
            .map_err(|e| {
                error!(%id, commit, error = %e, "terminal record append failed");
                DaoError::LoggingFailed
            })?;

        // Unreachable: the lookup above proved the row exists.
        let mut op = self.ops.remove(&id).ok_or(DaoError::Internal)?;
        op.answered.clear();
        self.finished.insert(id, (op.protocol, commit));
        info!(%id, protocol = %op.protocol, commit, "operation finished");
        Ok(op)
    }

    /// Queue a protocol message to one peer. Send failures are left to
    /// the step timeout; nothing here blocks or retries.
    pub fn send(&self, deps: &Deps<'_>, to: &str, id: OpId, body: MessageBody) {
        let kind = body.kind();
        match deps.transport.send(to, &Message::new(id, body)) {
            Ok(()) => debug!(%id, ?kind, to, "message queued"),
            Err(e) => {
                warn!(%id, ?kind, to, error = %e, "send failed, leaving retry to timeout");
                self.note_supposed_external_server_failure(to);
            }
        }
    }

    /// Queue the same body to several peers.
    pub fn send_all(
        &self,
        deps: &Deps<'_>,
        peers: &[String],
        id: OpId,
        body: MessageBody,
    ) {
        for peer in peers {
            self.send(deps, peer, id, body.clone());
        }
    }

    /// Push an execution request onto the operation's module queue.
    pub fn forward(&self, id: OpId, tag: RequestTag) -> Result<(), DaoError> {
        let op = self.ops.get(&id).ok_or(DaoError::OperationFinished)?;
        let request = OutRequest::request(id, tag, op.payload.clone(), op.protocol);
        self.push_out(op.module(), request)
    }

    /// Deliver the final client response, exactly once, coordinator only.
    pub fn respond_client(&mut self, id: OpId, success: bool) {
        let Some(op) = self.ops.get_mut(&id) else { return };
        if op.role != Role::Coordinator || op.client_answered {
            return;
        }
        op.client_answered = true;
        let response = OutRequest::client_response(id, success, op.protocol);
        let module = op.module();
        if let Err(e) = self.push_out(module, response) {
            error!(%id, error = %e, "client response could not be queued");
        }
    }

    /// Deliver the client response for an operation whose row was just
    /// removed by [`EngineState::finish`].
    pub fn respond_after_finish(&self, op: &mut Op, success: bool) {
        if op.role != Role::Coordinator || op.client_answered {
            return;
        }
        op.client_answered = true;
        let response = OutRequest::client_response(op.id, success, op.protocol);
        if let Err(e) = self.push_out(op.module(), response) {
            error!(id = %op.id, error = %e, "client response could not be queued");
        }
    }

    fn push_out(&self, module: Module, request: OutRequest) -> Result<(), DaoError> {
        let queue = self.queues.get(&module).ok_or(DaoError::Internal)?;
        queue.send(request).map_err(|_| {
            error!(%module, "executor queue closed");
            DaoError::Internal
        })
    }

    /// Arm the step timeout for the operation's current status.
    pub fn arm_step(&mut self, deps: &Deps<'_>, id: OpId) {
        self.arm_step_attempt(deps, id, 0);
    }

    pub fn arm_step_attempt(&mut self, deps: &Deps<'_>, id: OpId, attempt: u8) {
        let Some(op) = self.ops.get(&id) else { return };
        let timeout = deps.config.step_timeout(op.protocol);
        self.scheduler.arm(TimeoutEntry {
            due_ms: deps.now_ms + timeout.as_millis() as u64,
            kind: TimeoutKind::Step,
            id,
            status: op.status,
            attempt,
        });
    }

    /// Arm the operation's end-to-end deadline.
    pub fn arm_overall(&mut self, id: OpId) {
        let Some(op) = self.ops.get(&id) else { return };
        self.scheduler.arm(TimeoutEntry {
            due_ms: op.overall_deadline_ms,
            kind: TimeoutKind::Overall,
            id,
            status: op.status,
            attempt: 0,
        });
    }

    /// Peers whose vote or ack is still missing in the current round.
    pub fn unanswered_peers(&self, id: OpId) -> Vec<String> {
        let Some(op) = self.ops.get(&id) else { return Vec::new() };
        op.participants
            .iter()
            .filter(|tree| !op.answered.contains(&tree.server))
            .map(|tree| tree.server.clone())
            .collect()
    }

    /// No global failure treatment exists; repeated send failures to one
    /// peer are only recorded.
    pub fn note_supposed_external_server_failure(&self, address: &str) {
        warn!(address, "peer may have failed; no quorum reformation, operation timeouts decide");
    }
}

pub(crate) fn map_journal_error(e: JournalError) -> DaoError {
    match e {
        JournalError::UnknownSubtree(entry) => DaoError::SubtreeNotExisting(entry),
        other => {
            error!(error = %other, "journal failure");
            DaoError::LoggingFailed
        }
    }
}
