// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-protocol transition functions.
//!
//! Every function here runs under the engine's state mutex and follows the
//! write-ahead rule: journal records are appended before any message that
//! announces them leaves the engine.

pub(crate) mod failure;
pub(crate) mod mtpc;
pub(crate) mod ooe;
pub(crate) mod tpc;

use crate::state::{Deps, EngineState};
use tl_core::{OpId, Subtree};
use tl_wire::{MessageBody, OpReq};

/// Build the operation request body sent to one participant.
pub(crate) fn op_req_for(state: &EngineState, id: OpId, target: &Subtree) -> Option<OpReq> {
    let op = state.op(id)?;
    Some(OpReq {
        kind: op.kind,
        participant_entry: target.subtree_entry,
        coordinator_entry: op.subtree_entry,
        payload: op.payload.clone(),
    })
}

/// Re-send the protocol's operation request to `target`.
pub(crate) fn resend_op_req(
    state: &EngineState,
    deps: &Deps<'_>,
    id: OpId,
    target: &Subtree,
    wrap: fn(OpReq) -> MessageBody,
) {
    if let Some(op_req) = op_req_for(state, id, target) {
        state.send(deps, &target.server, id, wrap(op_req));
    }
}
