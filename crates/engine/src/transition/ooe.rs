// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ordered operation execution transitions.
//!
//! A linear chain discovered dynamically: every executor returns the next
//! participant with its success. The last element commits and the
//! decision travels back along the chain as `OoeAck` or `OoeAborted`;
//! an aborted chain compensates already-applied effects on the way back.

use crate::state::{Deps, EngineState};
use crate::transition::op_req_for;
use tl_core::{DaoError, LogTag, OpId, RequestTag, Role, Status, Subtree};
use tl_wire::MessageBody;
use tracing::{debug, warn};

/// Initiator start: local execution only; the chain unfolds from the
/// executor's next-participant answers.
pub(crate) fn start_initiator(
    state: &mut EngineState,
    deps: &Deps<'_>,
    id: OpId,
) -> Result<(), DaoError> {
    state.forward(id, RequestTag::Execute)?;
    state.arm_step(deps, id);
    state.arm_overall(id);
    Ok(())
}

/// Local executor finished, possibly naming the next chain member.
pub(crate) fn on_exec(
    state: &mut EngineState,
    deps: &Deps<'_>,
    id: OpId,
    ok: bool,
    next: Option<Subtree>,
) -> Result<(), DaoError> {
    let Some(op) = state.op(id) else { return Ok(()) };
    let (status, pending_abort) = (op.status, op.pending_abort);
    if status != Status::OoeComputing {
        warn!(%id, %status, "executor result in unexpected state, dropping");
        return Ok(());
    }

    if pending_abort {
        // The chain behind us already aborted; compensate and pass it on.
        return if ok {
            start_undo(state, deps, id)
        } else {
            abort_backward(state, deps, id)
        };
    }

    if !ok {
        return abort_backward(state, deps, id);
    }

    match next {
        Some(next) if !next.is_end_of_chain() => {
            state.log_update(id, LogTag::OoeStartNext)?;
            // Unreachable: presence checked above.
            let op = state.op_mut(id).ok_or(DaoError::Internal)?;
            op.set_ooe_next(next.clone());
            op.status = Status::OoeWaitResult;
            if let Some(op_req) = op_req_for(state, id, &next) {
                state.send(deps, &next.server, id, MessageBody::OoeOpReq(op_req));
            }
            state.arm_step(deps, id);
            Ok(())
        }
        // Empty server: this host is last in order and commits the chain.
        _ => commit_backward(state, deps, id),
    }
}

/// The chain after us committed.
pub(crate) fn on_ack(state: &mut EngineState, deps: &Deps<'_>, id: OpId) -> Result<(), DaoError> {
    let status = state.op(id).map(|op| op.status).ok_or(DaoError::OperationFinished)?;
    match status {
        Status::OoeWaitResult => commit_backward(state, deps, id),
        _ => Err(DaoError::WrongEvent),
    }
}

/// The chain after us aborted.
pub(crate) fn on_aborted(
    state: &mut EngineState,
    deps: &Deps<'_>,
    id: OpId,
) -> Result<(), DaoError> {
    let status = state.op(id).map(|op| op.status).ok_or(DaoError::OperationFinished)?;
    match status {
        Status::OoeWaitResult => start_undo(state, deps, id),
        Status::OoeComputing => {
            // Boundary case: the abort outran our own executor.
            if let Some(op) = state.op_mut(id) {
                op.pending_abort = true;
            }
            Ok(())
        }
        Status::OoeWaitUndone => Ok(()),
        _ => Err(DaoError::WrongEvent),
    }
}

/// Local compensation finished; propagate the abort backward.
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
    if op.status != Status::OoeWaitUndone {
        debug!(%id, status = %op.status, "undo result in unexpected state, dropping");
        return Ok(());
    }
    abort_backward(state, deps, id)
}

/// Compensate the local effect, or skip straight to the abort when the
/// kind has no undo.
pub(crate) fn start_undo(
    state: &mut EngineState,
    deps: &Deps<'_>,
    id: OpId,
) -> Result<(), DaoError> {
    if state.op(id).is_some_and(|op| op.kind.supports_undo()) {
        state.log_update(id, LogTag::OoeUndo)?;
        if let Some(op) = state.op_mut(id) {
            op.status = Status::OoeWaitUndone;
        }
        state.forward(id, RequestTag::Undo)?;
        state.arm_step(deps, id);
        Ok(())
    } else {
        abort_backward(state, deps, id)
    }
}

/// Terminal commit: ack to the previous element, answer the client at the
/// chain head.
pub(crate) fn commit_backward(
    state: &mut EngineState,
    deps: &Deps<'_>,
    id: OpId,
) -> Result<(), DaoError> {
    let previous = previous_address(state, id);
    let mut op = state.finish(id, true)?;
    if let Some(previous) = previous {
        state.send(deps, &previous, id, MessageBody::OoeAck);
    }
    state.respond_after_finish(&mut op, true);
    Ok(())
}

/// Terminal abort: tell the previous element, answer the client at the
/// chain head.
pub(crate) fn abort_backward(
    state: &mut EngineState,
    deps: &Deps<'_>,
    id: OpId,
) -> Result<(), DaoError> {
    let previous = previous_address(state, id);
    let mut op = state.finish(id, false)?;
    if let Some(previous) = previous {
        state.send(deps, &previous, id, MessageBody::OoeAborted);
    }
    state.respond_after_finish(&mut op, false);
    Ok(())
}

fn previous_address(state: &EngineState, id: OpId) -> Option<String> {
    let op = state.op(id)?;
    if op.role == Role::Coordinator {
        return None;
    }
    op.ooe_previous().map(|tree| tree.server.clone())
}
