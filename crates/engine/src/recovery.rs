// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Crash recovery: rebuild every open operation from the journals and
//! re-drive it toward a decision.
//!
//! Runs once, before the engine accepts new operations or processes
//! inbound messages. Operations whose adapter cannot supply addresses or
//! a subtree entry are reported as unrecoverable; the engine still starts
//! without them.

use crate::state::{Deps, EngineState};
use tl_core::{DaoError, Op, OpId, OperationKind, Protocol, RequestTag, Role, Status};
use tl_journal::{JournalRecord, RecordBody};
use tl_wire::MessageBody;
use tracing::{info, warn};

pub(crate) fn run(state: &mut EngineState, deps: &Deps<'_>) -> Result<(), DaoError> {
    remember_finished(state);

    let open = state.journals.open_operations();
    let total = open.len();
    let mut unrecoverable = 0usize;

    for (id, (subtree_entry, records)) in open {
        if let Err(e) = recover_one(state, deps, id, subtree_entry, &records) {
            warn!(%id, error = %e, "operation not recoverable");
            unrecoverable += 1;
        }
    }

    info!(total, unrecoverable, "recovery finished");
    if unrecoverable > 0 {
        Err(DaoError::NotAllOperationsRecoverable)
    } else {
        Ok(())
    }
}

/// Terminal decisions survive restarts so late messages stay idempotent.
fn remember_finished(state: &mut EngineState) {
    for id in state.journals.finished_operations() {
        let Some((_, records)) = state.journals.find_operation(id) else { continue };
        let commit = records.iter().rev().find_map(|record| match record.body {
            RecordBody::Commit => Some(true),
            RecordBody::Abort => Some(false),
            _ => None,
        });
        let Some(commit) = commit else { continue };
        let protocol = protocol_of(&records);
        state.finished.insert(id, (protocol, commit));
    }
}

fn recover_one(
    state: &mut EngineState,
    deps: &Deps<'_>,
    id: OpId,
    journal_entry: u64,
    records: &[JournalRecord],
) -> Result<(), DaoError> {
    let (kind, payload) = begin_record(records).ok_or(DaoError::NoBeginLog)?;
    let last_tag = records.iter().rev().find_map(|record| match record.body {
        RecordBody::Update { tag } => Some(tag),
        _ => None,
    });

    let mut op = Op::new(
        id,
        kind,
        payload,
        Status::TpcPartComputing,
        Role::Participant,
        journal_entry,
        Vec::new(),
        deps.now_ms + deps.config.overall_timeout_ms,
    );

    let adapter = state
        .adapters
        .get(&op.module())
        .cloned()
        .ok_or(DaoError::Internal)?;

    if adapter.is_coordinator(&op) {
        op.role = Role::Coordinator;
    }
    op.status = match last_tag {
        Some(tag) => tag.recovered_status(),
        None => initial_status(kind.protocol(), op.role),
    };
    adapter
        .set_subtree_entry_point(&mut op)
        .map_err(|_| DaoError::SettingAddressesFailed)?;
    adapter
        .set_sending_addresses(&mut op)
        .map_err(|_| DaoError::SettingAddressesFailed)?;

    info!(%id, status = %op.status, role = ?op.role, "operation recovered");
    state.ops.insert(id, op);
    state.arm_step(deps, id);
    state.arm_overall(id);
    redrive(state, deps, id)
}

/// Emit the recovery action matching the reconstructed status.
fn redrive(state: &mut EngineState, deps: &Deps<'_>, id: OpId) -> Result<(), DaoError> {
    let Some(op) = state.op(id) else { return Ok(()) };
    match op.status {
        // Mid-execution when we crashed: ask the executor again, as a
        // redo so it may skip already-applied work.
        Status::TpcCoordComputing
        | Status::TpcPartComputing
        | Status::TpcPartVoteReqReceived
        | Status::MtpcCoordComputing
        | Status::MtpcPartComputing
        | Status::OoeComputing => state.forward(id, RequestTag::Redo),

        // Mid-compensation when we crashed.
        Status::OoeWaitUndone => state.forward(id, RequestTag::Reundo),

        // Expecting a peer message: ask where the peers are.
        Status::TpcCoordVoteReqSent
        | Status::TpcCoordResultSent
        | Status::TpcAborting
        | Status::MtpcCoordReqSent => {
            let peers: Vec<String> =
                op.participants.iter().map(|tree| tree.server.clone()).collect();
            state.send_all(deps, &peers, id, MessageBody::StatusRequest);
            Ok(())
        }
        Status::OoeWaitResult => {
            let next = op.ooe_next().map(|tree| tree.server.clone());
            if let Some(next) = next {
                state.send(deps, &next, id, MessageBody::StatusRequest);
            }
            Ok(())
        }

        // Waiting for the next step from the coordinator; its
        // retransmissions and our step timeout cover the rest.
        _ => Ok(()),
    }
}

fn begin_record(records: &[JournalRecord]) -> Option<(OperationKind, Vec<u8>)> {
    records.iter().find_map(|record| match &record.body {
        RecordBody::Start { kind, payload } => Some((*kind, payload.clone())),
        _ => None,
    })
}

fn initial_status(protocol: Protocol, role: Role) -> Status {
    match (protocol, role) {
        (Protocol::TwoPhaseCommit, Role::Coordinator) => Status::TpcCoordComputing,
        (Protocol::TwoPhaseCommit, Role::Participant) => Status::TpcPartComputing,
        (Protocol::ModifiedTwoPhaseCommit, Role::Coordinator) => Status::MtpcCoordComputing,
        (Protocol::ModifiedTwoPhaseCommit, Role::Participant) => Status::MtpcPartComputing,
        (Protocol::OrderedExecution, _) => Status::OoeComputing,
    }
}

fn protocol_of(records: &[JournalRecord]) -> Protocol {
    records
        .iter()
        .find_map(|record| match &record.body {
            RecordBody::Start { kind, .. } => Some(kind.protocol()),
            RecordBody::Update { tag } => Some(tag.protocol()),
            _ => None,
        })
        .unwrap_or(Protocol::TwoPhaseCommit)
}
