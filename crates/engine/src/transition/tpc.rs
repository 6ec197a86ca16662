// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Two-phase commit transitions.
//!
//! The coordinator executes locally alongside its participants, collects
//! one vote per participant, fans the decision out, and waits for one ack
//! per participant before the terminal record. A single no-vote
//! short-circuits the quorum wait.

use crate::state::{Deps, EngineState};
use crate::transition::op_req_for;
use tl_core::{DaoError, LogTag, OpId, RequestTag, Status};
use tl_wire::MessageBody;
use tracing::{debug, warn};

/// Coordinator start: operation requests out, local execution queued.
pub(crate) fn start_coordinator(
    state: &mut EngineState,
    deps: &Deps<'_>,
    id: OpId,
) -> Result<(), DaoError> {
    let peers = state
        .op(id)
        .map(|op| op.participants.clone())
        .ok_or(DaoError::OperationFinished)?;
    for tree in &peers {
        if let Some(op_req) = op_req_for(state, id, tree) {
            state.send(deps, &tree.server, id, MessageBody::TpcOpReq(op_req));
        }
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
    let (status, pending_abort) = (op.status, op.pending_abort);
    match status {
        Status::TpcCoordComputing => {
            if ok {
                state.log_update(id, LogTag::TpcCoordVoteStart)?;
                let peers = set_status(state, id, Status::TpcCoordVoteReqSent);
                state.send_all(deps, &peers, id, MessageBody::TpcVoteReq);
                state.arm_step(deps, id);
            } else {
                // Nothing applied locally, so no undo on this path.
                state.log_update(id, LogTag::TpcCoordAborting)?;
                abort_fanout(state, deps, id);
            }
            Ok(())
        }
        Status::TpcPartComputing => {
            if pending_abort {
                return finish_pending_abort(state, deps, id, ok);
            }
            if ok {
                state.log_update(id, LogTag::TpcPartVoteYes)?;
                set_status(state, id, Status::TpcPartWaitVoteReqYes);
            } else {
                state.log_update(id, LogTag::TpcPartVoteNo)?;
                if state.op(id).is_some_and(|op| op.kind.supports_undo()) {
                    state.forward(id, RequestTag::Undo)?;
                }
                set_status(state, id, Status::TpcPartWaitVoteReqNo);
            }
            state.arm_step(deps, id);
            Ok(())
        }
        Status::TpcPartVoteReqReceived => {
            if pending_abort {
                return finish_pending_abort(state, deps, id, ok);
            }
            let coordinator = coordinator_address(state, id);
            if ok {
                state.log_update(id, LogTag::TpcPartVoteYes)?;
                set_status(state, id, Status::TpcPartWaitResultExpectYes);
                state.send(deps, &coordinator, id, MessageBody::TpcVoteYes);
            } else {
                state.log_update(id, LogTag::TpcPartVoteNo)?;
                if state.op(id).is_some_and(|op| op.kind.supports_undo()) {
                    state.forward(id, RequestTag::Undo)?;
                }
                set_status(state, id, Status::TpcPartWaitResultExpectNo);
                state.send(deps, &coordinator, id, MessageBody::TpcVoteNo);
            }
            state.arm_step(deps, id);
            Ok(())
        }
        status => {
            warn!(%id, %status, "executor result in unexpected state, dropping");
            Ok(())
        }
    }
}

/// Vote request arrived at a participant.
pub(crate) fn on_vote_req(
    state: &mut EngineState,
    deps: &Deps<'_>,
    id: OpId,
) -> Result<(), DaoError> {
    let status = state.op(id).map(|op| op.status).ok_or(DaoError::OperationFinished)?;
    let coordinator = coordinator_address(state, id);
    match status {
        Status::TpcPartWaitVoteReqYes => {
            set_status(state, id, Status::TpcPartWaitResultExpectYes);
            state.send(deps, &coordinator, id, MessageBody::TpcVoteYes);
            state.arm_step(deps, id);
            Ok(())
        }
        Status::TpcPartWaitVoteReqNo => {
            set_status(state, id, Status::TpcPartWaitResultExpectNo);
            state.send(deps, &coordinator, id, MessageBody::TpcVoteNo);
            state.arm_step(deps, id);
            Ok(())
        }
        Status::TpcPartComputing => {
            // Executor still running; vote goes out with its result.
            set_status(state, id, Status::TpcPartVoteReqReceived);
            state.arm_step(deps, id);
            Ok(())
        }
        Status::TpcPartVoteReqReceived => Ok(()),
        // Retransmission: the coordinator missed our vote.
        Status::TpcPartWaitResultExpectYes => {
            state.send(deps, &coordinator, id, MessageBody::TpcVoteYes);
            Ok(())
        }
        Status::TpcPartWaitResultExpectNo => {
            state.send(deps, &coordinator, id, MessageBody::TpcVoteNo);
            Ok(())
        }
        _ => Err(DaoError::WrongEvent),
    }
}

/// Vote arrived at the coordinator.
pub(crate) fn on_vote(
    state: &mut EngineState,
    deps: &Deps<'_>,
    id: OpId,
    sender: &str,
    yes: bool,
) -> Result<(), DaoError> {
    let status = state.op(id).map(|op| op.status).ok_or(DaoError::OperationFinished)?;
    match status {
        Status::TpcCoordVoteReqSent => {}
        // Decision already made; stragglers are harmless.
        Status::TpcCoordResultSent | Status::TpcAborting | Status::TpcWaitUndoAck => {
            debug!(%id, sender, yes, "vote after decision, dropping");
            return Ok(());
        }
        _ => return Err(DaoError::WrongEvent),
    }

    if !yes {
        // One no is enough, outstanding yes-votes notwithstanding.
        state.log_update(id, LogTag::TpcCoordAborting)?;
        let undoable = state.op(id).is_some_and(|op| op.kind.supports_undo());
        if undoable {
            set_status(state, id, Status::TpcWaitUndoAck);
            state.forward(id, RequestTag::Undo)?;
            state.arm_step(deps, id);
        } else {
            abort_fanout(state, deps, id);
        }
        return Ok(());
    }

    let (counted, complete) = {
        // Unreachable: presence checked above.
        let op = state.op_mut(id).ok_or(DaoError::Internal)?;
        let counted = op.count_answer(sender);
        (counted, op.votes_received as usize == op.participants.len())
    };
    if !counted {
        debug!(%id, sender, "duplicate vote, dropping");
        return Ok(());
    }
    if complete {
        state.log_update(id, LogTag::TpcCoordCommitting)?;
        let peers = set_status(state, id, Status::TpcCoordResultSent);
        if let Some(op) = state.op_mut(id) {
            op.reset_answers();
        }
        state.send_all(deps, &peers, id, MessageBody::TpcCommit);
        state.respond_client(id, true);
        state.arm_step(deps, id);
    }
    Ok(())
}

/// Commit or abort decision arrived at a participant.
pub(crate) fn on_decision(
    state: &mut EngineState,
    deps: &Deps<'_>,
    id: OpId,
    commit: bool,
) -> Result<(), DaoError> {
    let status = state.op(id).map(|op| op.status).ok_or(DaoError::OperationFinished)?;
    match (status, commit) {
        (Status::TpcPartWaitResultExpectYes, true) => finish_and_ack(state, deps, id, true),
        (Status::TpcPartWaitResultExpectYes, false) => undo_or_finish_abort(state, deps, id),
        // The coordinator is the authority on the decision.
        (Status::TpcPartWaitResultExpectNo, decided) => {
            if decided {
                warn!(%id, "commit decision after a no vote");
            }
            finish_and_ack(state, deps, id, decided)
        }
        (Status::TpcPartWaitVoteReqYes, false) => undo_or_finish_abort(state, deps, id),
        (Status::TpcPartWaitVoteReqNo, false) => finish_and_ack(state, deps, id, false),
        (Status::TpcPartComputing | Status::TpcPartVoteReqReceived, false) => {
            // Boundary case: abort outruns our own executor. Wait for the
            // result, then undo and close.
            if let Some(op) = state.op_mut(id) {
                op.pending_abort = true;
            }
            Ok(())
        }
        _ => Err(DaoError::WrongEvent),
    }
}

/// Ack arrived at the coordinator.
pub(crate) fn on_ack(
    state: &mut EngineState,
    _deps: &Deps<'_>,
    id: OpId,
    sender: &str,
) -> Result<(), DaoError> {
    let Some(status) = state.op(id).map(|op| op.status) else {
        // Late ack after the terminal record: silently dropped.
        return Ok(());
    };
    let commit = match status {
        Status::TpcCoordResultSent => true,
        Status::TpcAborting => false,
        _ => {
            debug!(%id, sender, %status, "ack in unexpected state, dropping");
            return Ok(());
        }
    };
    let complete = {
        // Unreachable: presence checked above.
        let op = state.op_mut(id).ok_or(DaoError::Internal)?;
        if !op.count_answer(sender) {
            return Ok(());
        }
        op.votes_received as usize == op.participants.len()
    };
    if complete {
        let mut op = state.finish(id, commit)?;
        state.respond_after_finish(&mut op, commit);
    }
    Ok(())
}

/// Local undo finished (either side).
pub(crate) fn on_undone(
    state: &mut EngineState,
    deps: &Deps<'_>,
    id: OpId,
    ok: bool,
) -> Result<(), DaoError> {
    if !ok {
        // An undo failure cannot force a commit; proceed with the abort.
        warn!(%id, "undo failed, continuing abort");
    }
    let Some(status) = state.op(id).map(|op| op.status) else { return Ok(()) };
    match status {
        Status::TpcWaitUndoAck => {
            abort_fanout(state, deps, id);
            Ok(())
        }
        Status::TpcWaitUndoToFinish => finish_and_ack(state, deps, id, false),
        // Undo after a failed execute restores nothing visible.
        Status::TpcPartWaitVoteReqNo | Status::TpcPartWaitResultExpectNo => Ok(()),
        status => {
            debug!(%id, %status, "undo result in unexpected state, dropping");
            Ok(())
        }
    }
}

/// Abort decided at the coordinator: fan out, answer the client, collect
/// acks. The caller has already written the aborting record.
pub(crate) fn abort_fanout(state: &mut EngineState, deps: &Deps<'_>, id: OpId) {
    let peers = set_status(state, id, Status::TpcAborting);
    if let Some(op) = state.op_mut(id) {
        op.reset_answers();
    }
    state.send_all(deps, &peers, id, MessageBody::TpcAbort);
    state.respond_client(id, false);
    state.arm_step(deps, id);
}

/// Participant closure: terminal record, then the ack.
pub(crate) fn finish_and_ack(
    state: &mut EngineState,
    deps: &Deps<'_>,
    id: OpId,
    commit: bool,
) -> Result<(), DaoError> {
    let coordinator = coordinator_address(state, id);
    state.finish(id, commit)?;
    if !coordinator.is_empty() {
        state.send(deps, &coordinator, id, MessageBody::TpcAck);
    }
    Ok(())
}

/// Abort on a participant whose effect may need compensation.
pub(crate) fn undo_or_finish_abort(
    state: &mut EngineState,
    deps: &Deps<'_>,
    id: OpId,
) -> Result<(), DaoError> {
    let undoable = state.op(id).is_some_and(|op| op.kind.supports_undo());
    if undoable {
        set_status(state, id, Status::TpcWaitUndoToFinish);
        state.forward(id, RequestTag::Undo)?;
        state.arm_step(deps, id);
        Ok(())
    } else {
        finish_and_ack(state, deps, id, false)
    }
}

/// Quiet local abort used by timeouts: no ack, optional undo first.
pub(crate) fn abort_participant_quietly(
    state: &mut EngineState,
    deps: &Deps<'_>,
    id: OpId,
    applied: bool,
) -> Result<(), DaoError> {
    let undoable = state.op(id).is_some_and(|op| op.kind.supports_undo());
    if applied && undoable {
        set_status(state, id, Status::TpcWaitUndoToFinish);
        state.forward(id, RequestTag::Undo)?;
        state.arm_step(deps, id);
    } else {
        state.finish(id, false)?;
    }
    Ok(())
}

fn finish_pending_abort(
    state: &mut EngineState,
    deps: &Deps<'_>,
    id: OpId,
    exec_ok: bool,
) -> Result<(), DaoError> {
    if exec_ok && state.op(id).is_some_and(|op| op.kind.supports_undo()) {
        set_status(state, id, Status::TpcWaitUndoToFinish);
        state.forward(id, RequestTag::Undo)?;
        state.arm_step(deps, id);
        Ok(())
    } else {
        finish_and_ack(state, deps, id, false)
    }
}

/// Address of the coordinator as seen from a participant.
pub(crate) fn coordinator_address(state: &EngineState, id: OpId) -> String {
    state
        .op(id)
        .and_then(|op| op.participants.first())
        .map(|tree| tree.server.clone())
        .unwrap_or_default()
}

/// Update the status and return the peer addresses, for fan-outs.
fn set_status(state: &mut EngineState, id: OpId, status: Status) -> Vec<String> {
    match state.op_mut(id) {
        Some(op) => {
            op.status = status;
            op.participants.iter().map(|tree| tree.server.clone()).collect()
        }
        None => Vec::new(),
    }
}
