// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Modified two-phase commit transitions.
//!
//! One write-participant next to a coordinator that also executes. The
//! decision is the conjunction of both outcomes: the participant's vote
//! (`MtpcCommit`/`MtpcAbort`) and the local executor result. The
//! coordinator closes a commit with `MtpcAck` and announces an abort with
//! `MtpcAbort`; either closes the participant.

use crate::state::{Deps, EngineState};
use crate::transition::op_req_for;
use tl_core::{DaoError, LogTag, OpId, RequestTag, Role, Status};
use tl_wire::MessageBody;
use tracing::{debug, warn};

/// Coordinator start: the one operation request out, local execution
/// queued alongside.
pub(crate) fn start_coordinator(
    state: &mut EngineState,
    deps: &Deps<'_>,
    id: OpId,
) -> Result<(), DaoError> {
    let peer = state
        .op(id)
        .and_then(|op| op.participants.first().cloned())
        .ok_or(DaoError::WrongParameter)?;
    if let Some(op_req) = op_req_for(state, id, &peer) {
        state.send(deps, &peer.server, id, MessageBody::MtpcOpReq(op_req));
    }
    state.forward(id, RequestTag::Execute)?;
    state.arm_step(deps, id);
    state.arm_overall(id);
    Ok(())
}

/// Local executor finished (either side).
pub(crate) fn on_exec(
    state: &mut EngineState,
    deps: &Deps<'_>,
    id: OpId,
    ok: bool,
) -> Result<(), DaoError> {
    let Some(op) = state.op(id) else { return Ok(()) };
    let (status, pending_abort, pending_vote) = (op.status, op.pending_abort, op.pending_vote);
    match status {
        Status::MtpcCoordComputing => {
            if ok {
                state.log_update(id, LogTag::MtpcCoordStartPart)?;
                set_status(state, id, Status::MtpcCoordReqSent);
                state.arm_step(deps, id);
                match pending_vote {
                    Some(true) => decide_commit(state, deps, id),
                    Some(false) => abort_after_vote(state, deps, id),
                    None => Ok(()),
                }
            } else {
                // Local failure decides abort no matter how the peer votes.
                let peer = participant_address(state, id);
                let mut op = state.finish(id, false)?;
                state.send(deps, &peer, id, MessageBody::MtpcAbort);
                state.respond_after_finish(&mut op, false);
                Ok(())
            }
        }
        Status::MtpcPartComputing => {
            if pending_abort {
                return finish_pending_abort(state, deps, id, ok);
            }
            let coordinator = participant_address(state, id);
            if ok {
                state.log_update(id, LogTag::MtpcPartCommit)?;
                set_status(state, id, Status::MtpcPartVoteSentYes);
                state.send(deps, &coordinator, id, MessageBody::MtpcCommit);
            } else {
                state.log_update(id, LogTag::MtpcPartAbort)?;
                set_status(state, id, Status::MtpcPartVoteSentNo);
                state.send(deps, &coordinator, id, MessageBody::MtpcAbort);
            }
            state.arm_step(deps, id);
            Ok(())
        }
        _ => {
            warn!(%id, %status, "executor result in unexpected state, dropping");
            Ok(())
        }
    }
}

/// The write-participant's vote arrived at the coordinator.
pub(crate) fn on_vote(
    state: &mut EngineState,
    deps: &Deps<'_>,
    id: OpId,
    commit_vote: bool,
) -> Result<(), DaoError> {
    let status = state.op(id).map(|op| op.status).ok_or(DaoError::OperationFinished)?;
    match status {
        Status::MtpcCoordReqSent => {
            if commit_vote {
                decide_commit(state, deps, id)
            } else {
                abort_after_vote(state, deps, id)
            }
        }
        Status::MtpcCoordComputing => {
            // Vote outran the local executor; remember it.
            if let Some(op) = state.op_mut(id) {
                op.pending_vote = Some(commit_vote);
            }
            Ok(())
        }
        Status::MtpcWaitUndone => {
            debug!(%id, commit_vote, "vote during undo, dropping");
            Ok(())
        }
        _ => Err(DaoError::WrongEvent),
    }
}

/// Abort decision from the coordinator arrived at the participant.
pub(crate) fn on_abort_decision(
    state: &mut EngineState,
    deps: &Deps<'_>,
    id: OpId,
) -> Result<(), DaoError> {
    let status = state.op(id).map(|op| op.status).ok_or(DaoError::OperationFinished)?;
    match status {
        Status::MtpcPartVoteSentYes => {
            // We applied; compensate before closing.
            if state.op(id).is_some_and(|op| op.kind.supports_undo()) {
                set_status(state, id, Status::MtpcWaitUndone);
                state.forward(id, RequestTag::Undo)?;
                state.arm_step(deps, id);
                Ok(())
            } else {
                state.finish(id, false)?;
                Ok(())
            }
        }
        Status::MtpcPartVoteSentNo => {
            state.finish(id, false)?;
            Ok(())
        }
        Status::MtpcPartComputing => {
            if let Some(op) = state.op_mut(id) {
                op.pending_abort = true;
            }
            Ok(())
        }
        _ => Err(DaoError::WrongEvent),
    }
}

/// Coordinator ack arrived at the participant: decision is final.
pub(crate) fn on_ack(
    state: &mut EngineState,
    _deps: &Deps<'_>,
    id: OpId,
) -> Result<(), DaoError> {
    let status = state.op(id).map(|op| op.status).ok_or(DaoError::OperationFinished)?;
    match status {
        Status::MtpcPartVoteSentYes => {
            state.finish(id, true)?;
            Ok(())
        }
        Status::MtpcPartVoteSentNo => {
            state.finish(id, false)?;
            Ok(())
        }
        _ => {
            debug!(%id, %status, "ack in unexpected state, dropping");
            Ok(())
        }
    }
}

/// Local undo finished.
pub(crate) fn on_undone(
    state: &mut EngineState,
    deps: &Deps<'_>,
    id: OpId,
    ok: bool,
) -> Result<(), DaoError> {
    if !ok {
        warn!(%id, "undo failed, continuing abort");
    }
    let Some(op) = state.op(id) else { return Ok(()) };
    if op.status != Status::MtpcWaitUndone {
        debug!(%id, status = %op.status, "undo result in unexpected state, dropping");
        return Ok(());
    }
    let role = op.role;
    let peer = participant_address(state, id);
    let mut op = state.finish(id, false)?;
    if role == Role::Coordinator {
        state.send(deps, &peer, id, MessageBody::MtpcAbort);
        state.respond_after_finish(&mut op, false);
    }
    Ok(())
}

/// Both sides succeeded: terminal commit, close the participant, answer
/// the client.
fn decide_commit(state: &mut EngineState, deps: &Deps<'_>, id: OpId) -> Result<(), DaoError> {
    let peer = participant_address(state, id);
    let mut op = state.finish(id, true)?;
    state.send(deps, &peer, id, MessageBody::MtpcAck);
    state.respond_after_finish(&mut op, true);
    Ok(())
}

/// The participant voted abort while our side applied: compensate, then
/// close with an abort announcement.
fn abort_after_vote(state: &mut EngineState, deps: &Deps<'_>, id: OpId) -> Result<(), DaoError> {
    if state.op(id).is_some_and(|op| op.kind.supports_undo()) {
        set_status(state, id, Status::MtpcWaitUndone);
        state.forward(id, RequestTag::Undo)?;
        state.arm_step(deps, id);
        Ok(())
    } else {
        let peer = participant_address(state, id);
        let mut op = state.finish(id, false)?;
        state.send(deps, &peer, id, MessageBody::MtpcAbort);
        state.respond_after_finish(&mut op, false);
        Ok(())
    }
}

fn finish_pending_abort(
    state: &mut EngineState,
    deps: &Deps<'_>,
    id: OpId,
    exec_ok: bool,
) -> Result<(), DaoError> {
    if exec_ok && state.op(id).is_some_and(|op| op.kind.supports_undo()) {
        set_status(state, id, Status::MtpcWaitUndone);
        state.forward(id, RequestTag::Undo)?;
        state.arm_step(deps, id);
        Ok(())
    } else {
        state.finish(id, false)?;
        Ok(())
    }
}

/// The single peer: the participant from the coordinator, the coordinator
/// from the participant.
pub(crate) fn participant_address(state: &EngineState, id: OpId) -> String {
    state
        .op(id)
        .and_then(|op| op.participants.first())
        .map(|tree| tree.server.clone())
        .unwrap_or_default()
}

fn set_status(state: &mut EngineState, id: OpId, status: Status) {
    if let Some(op) = state.op_mut(id) {
        op.status = status;
    }
}
