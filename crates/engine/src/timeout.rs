// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Timeout handling.
//!
//! Every status transition arms a step timeout. The first fire repeats
//! the step's outbound messages and rearms once; the second fire gives
//! the operation up. The overall deadline strictly supersedes step
//! behavior: once it passes, the operation is driven to a terminal record
//! immediately, with the already-made decision if there is one and an
//! abort otherwise.

use crate::scheduler::{TimeoutEntry, TimeoutKind};
use crate::state::{Deps, EngineState};
use crate::transition::{mtpc, ooe, resend_op_req, tpc};
use tl_core::{DaoError, LogTag, OpId, Status};
use tl_wire::MessageBody;
use tracing::{debug, info, warn};

pub(crate) fn on_timeout(
    state: &mut EngineState,
    deps: &Deps<'_>,
    entry: TimeoutEntry,
) -> Result<(), DaoError> {
    let Some(op) = state.op(entry.id) else {
        // The operation finished; the entry outlived it.
        return Ok(());
    };
    let (status, deadline_ms) = (op.status, op.overall_deadline_ms);

    if deps.now_ms >= deadline_ms {
        info!(id = %entry.id, %status, "overall deadline passed, forcing termination");
        return force_terminal(state, deps, entry.id, status);
    }
    if entry.kind == TimeoutKind::Overall {
        // Not due yet (deadline moved during recovery); rearm.
        state.arm_overall(entry.id);
        return Ok(());
    }
    if entry.status != status {
        // Stale: the operation progressed since this entry was armed.
        return Ok(());
    }

    if entry.attempt == 0 {
        debug!(id = %entry.id, %status, "step timeout, repeating the step");
        repeat_step(state, deps, entry.id, status);
        state.arm_step_attempt(deps, entry.id, 1);
        Ok(())
    } else {
        warn!(id = %entry.id, %status, "step timed out twice, giving the operation up");
        give_up_step(state, deps, entry.id, status)
    }
}

/// First fire: re-send whatever message the peer may have missed.
fn repeat_step(state: &mut EngineState, deps: &Deps<'_>, id: OpId, status: Status) {
    match status {
        Status::TpcCoordVoteReqSent => {
            let missing = state.unanswered_peers(id);
            state.send_all(deps, &missing, id, MessageBody::TpcVoteReq);
        }
        Status::TpcCoordResultSent => {
            let missing = state.unanswered_peers(id);
            state.send_all(deps, &missing, id, MessageBody::TpcCommit);
        }
        Status::TpcAborting => {
            let missing = state.unanswered_peers(id);
            state.send_all(deps, &missing, id, MessageBody::TpcAbort);
        }
        Status::TpcPartWaitResultExpectYes => {
            let coordinator = tpc::coordinator_address(state, id);
            state.send(deps, &coordinator, id, MessageBody::TpcVoteYes);
        }
        Status::TpcPartWaitResultExpectNo => {
            let coordinator = tpc::coordinator_address(state, id);
            state.send(deps, &coordinator, id, MessageBody::TpcVoteNo);
        }
        Status::MtpcCoordComputing | Status::MtpcCoordReqSent => {
            resend_to_first_participant(state, deps, id, MessageBody::MtpcOpReq);
        }
        Status::MtpcPartVoteSentYes => {
            let coordinator = mtpc::participant_address(state, id);
            state.send(deps, &coordinator, id, MessageBody::MtpcCommit);
        }
        Status::MtpcPartVoteSentNo => {
            let coordinator = mtpc::participant_address(state, id);
            state.send(deps, &coordinator, id, MessageBody::MtpcAbort);
        }
        Status::OoeWaitResult => {
            let next = state.op(id).and_then(|op| op.ooe_next().cloned());
            if let Some(next) = next {
                resend_op_req(state, deps, id, &next, MessageBody::OoeOpReq);
            }
        }
        // Waiting on the local executor; nothing to repeat on the wire.
        _ => {}
    }
}

/// Second fire: stop waiting.
fn give_up_step(
    state: &mut EngineState,
    deps: &Deps<'_>,
    id: OpId,
    status: Status,
) -> Result<(), DaoError> {
    match status {
        // Votes or the local result never came; abort the operation.
        Status::TpcCoordComputing | Status::TpcCoordVoteReqSent => {
            state.log_update(id, LogTag::TpcCoordAborting)?;
            tpc::abort_fanout(state, deps, id);
            Ok(())
        }
        // The decision is made; close without the missing acks.
        Status::TpcCoordResultSent => {
            let mut op = state.finish(id, true)?;
            state.respond_after_finish(&mut op, true);
            Ok(())
        }
        Status::TpcAborting => {
            let mut op = state.finish(id, false)?;
            state.respond_after_finish(&mut op, false);
            Ok(())
        }
        // Participant never heard back; proceed as if abort was received.
        Status::TpcPartWaitVoteReqYes | Status::TpcPartWaitResultExpectYes => {
            tpc::abort_participant_quietly(state, deps, id, true)
        }
        Status::TpcPartWaitVoteReqNo | Status::TpcPartWaitResultExpectNo => {
            tpc::abort_participant_quietly(state, deps, id, false)
        }
        Status::MtpcCoordComputing | Status::MtpcCoordReqSent => {
            let peer = mtpc::participant_address(state, id);
            let mut op = state.finish(id, false)?;
            state.send(deps, &peer, id, MessageBody::MtpcAbort);
            state.respond_after_finish(&mut op, false);
            Ok(())
        }
        Status::MtpcPartVoteSentYes => mtpc::on_abort_decision(state, deps, id),
        Status::MtpcPartVoteSentNo => {
            state.finish(id, false)?;
            Ok(())
        }
        Status::OoeWaitResult => ooe::start_undo(state, deps, id),
        // Local executor still owes an answer; keep waiting, the overall
        // deadline bounds it.
        _ => {
            state.arm_step_attempt(deps, id, 1);
            Ok(())
        }
    }
}

/// Overall deadline: drive to a terminal record now.
fn force_terminal(
    state: &mut EngineState,
    deps: &Deps<'_>,
    id: OpId,
    status: Status,
) -> Result<(), DaoError> {
    match status {
        // A commit decision exists; keep it.
        Status::TpcCoordResultSent => {
            let mut op = state.finish(id, true)?;
            state.respond_after_finish(&mut op, true);
            Ok(())
        }
        // Abort already in progress one way or another.
        Status::TpcAborting
        | Status::TpcWaitUndoAck
        | Status::TpcWaitUndoToFinish
        | Status::MtpcWaitUndone
        | Status::OoeWaitUndone => {
            let mut op = state.finish(id, false)?;
            state.respond_after_finish(&mut op, false);
            Ok(())
        }
        Status::TpcCoordComputing | Status::TpcCoordVoteReqSent => {
            let peers = peer_addresses(state, id);
            let mut op = state.finish(id, false)?;
            state.send_all(deps, &peers, id, MessageBody::TpcAbort);
            state.respond_after_finish(&mut op, false);
            Ok(())
        }
        Status::MtpcCoordComputing | Status::MtpcCoordReqSent => {
            let peer = mtpc::participant_address(state, id);
            let mut op = state.finish(id, false)?;
            state.send(deps, &peer, id, MessageBody::MtpcAbort);
            state.respond_after_finish(&mut op, false);
            Ok(())
        }
        Status::OoeComputing | Status::OoeWaitResult => {
            let previous = previous_of(state, id);
            let mut op = state.finish(id, false)?;
            if let Some(previous) = previous {
                state.send(deps, &previous, id, MessageBody::OoeAborted);
            }
            state.respond_after_finish(&mut op, false);
            Ok(())
        }
        // Participant states: close quietly with an abort record.
        _ => {
            state.finish(id, false)?;
            Ok(())
        }
    }
}

fn resend_to_first_participant(
    state: &EngineState,
    deps: &Deps<'_>,
    id: OpId,
    wrap: fn(tl_wire::OpReq) -> MessageBody,
) {
    let target = state.op(id).and_then(|op| op.participants.first().cloned());
    if let Some(target) = target {
        resend_op_req(state, deps, id, &target, wrap);
    }
}

fn peer_addresses(state: &EngineState, id: OpId) -> Vec<String> {
    state
        .op(id)
        .map(|op| op.participants.iter().map(|tree| tree.server.clone()).collect())
        .unwrap_or_default()
}

fn previous_of(state: &EngineState, id: OpId) -> Option<String> {
    let op = state.op(id)?;
    if op.role == tl_core::Role::Coordinator {
        None
    } else {
        op.ooe_previous().map(|tree| tree.server.clone())
    }
}
