// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Failure messaging: the six internal message kinds that bridge drops,
//! stale peers, and recovering hosts.

use crate::state::{Deps, EngineState};
use crate::transition::{mtpc, ooe, resend_op_req, tpc};
use tl_core::{DaoError, Op, OpId, Protocol, Role, Status, Subtree};
use tl_wire::MessageBody;
use tracing::{debug, warn};

/// Peer says it does not own the operation.
///
/// For a coordinator this usually means the participant never saw the
/// operation request and can be treated as an implicit abort; while
/// collecting acks it counts as closure, the peer has nothing to close.
pub(crate) fn on_not_responsible(
    state: &mut EngineState,
    deps: &Deps<'_>,
    id: OpId,
    sender: &str,
) -> Result<(), DaoError> {
    let Some(status) = state.op(id).map(|op| op.status) else {
        debug!(%id, sender, "not-responsible for unknown operation, dropping");
        return Ok(());
    };
    match status {
        Status::TpcCoordVoteReqSent => tpc::on_vote(state, deps, id, sender, false),
        Status::TpcCoordResultSent | Status::TpcAborting => {
            tpc::on_ack(state, deps, id, sender)
        }
        Status::MtpcCoordComputing | Status::MtpcCoordReqSent => {
            mtpc::on_vote(state, deps, id, false)
        }
        Status::OoeWaitResult => ooe::on_aborted(state, deps, id),
        _ => {
            warn!(%id, sender, %status, "peer not responsible; keeping state, timeouts decide");
            Ok(())
        }
    }
}

/// Peer asks us to repeat the last step it expected from us.
pub(crate) fn on_event_re_request(
    state: &mut EngineState,
    deps: &Deps<'_>,
    id: OpId,
    sender: &str,
) -> Result<(), DaoError> {
    let Some(op) = state.op(id) else {
        return answer_for_finished(state, deps, id, sender);
    };
    let status = op.status;
    match status {
        Status::TpcCoordComputing => {
            resend_op_req_to(state, deps, id, sender, MessageBody::TpcOpReq);
        }
        Status::TpcCoordVoteReqSent => state.send(deps, sender, id, MessageBody::TpcVoteReq),
        Status::TpcCoordResultSent => state.send(deps, sender, id, MessageBody::TpcCommit),
        Status::TpcAborting => state.send(deps, sender, id, MessageBody::TpcAbort),
        Status::TpcPartWaitResultExpectYes => {
            state.send(deps, sender, id, MessageBody::TpcVoteYes);
        }
        Status::TpcPartWaitResultExpectNo => {
            state.send(deps, sender, id, MessageBody::TpcVoteNo);
        }
        Status::MtpcCoordComputing | Status::MtpcCoordReqSent => {
            resend_op_req_to(state, deps, id, sender, MessageBody::MtpcOpReq);
        }
        Status::MtpcPartVoteSentYes => state.send(deps, sender, id, MessageBody::MtpcCommit),
        Status::MtpcPartVoteSentNo => state.send(deps, sender, id, MessageBody::MtpcAbort),
        Status::OoeWaitResult => {
            resend_op_req_to(state, deps, id, sender, MessageBody::OoeOpReq);
        }
        // Nothing outbound belongs to this state; report where we are.
        _ => state.send(deps, sender, id, MessageBody::StatusResponse { status }),
    }
    Ok(())
}

/// Peer wants the full operation content, typically while recovering.
pub(crate) fn on_content_request(
    state: &mut EngineState,
    deps: &Deps<'_>,
    id: OpId,
    sender: &str,
) -> Result<(), DaoError> {
    let Some(op) = state.op(id) else {
        return answer_for_finished(state, deps, id, sender);
    };
    let body = MessageBody::ContentResponse {
        status: op.status,
        payload: op.payload.clone(),
        participants: op.participants.clone(),
    };
    state.send(deps, sender, id, body);
    Ok(())
}

/// Peer wants to know where we are.
pub(crate) fn on_status_request(
    state: &mut EngineState,
    deps: &Deps<'_>,
    id: OpId,
    sender: &str,
) -> Result<(), DaoError> {
    let Some(op) = state.op(id) else {
        return answer_for_finished(state, deps, id, sender);
    };
    let status = op.status;
    state.send(deps, sender, id, MessageBody::StatusResponse { status });
    Ok(())
}

/// A peer reported its status, usually answering our recovery probe.
pub(crate) fn on_status_response(
    state: &mut EngineState,
    deps: &Deps<'_>,
    id: OpId,
    sender: &str,
    peer_status: Status,
) -> Result<(), DaoError> {
    let Some(status) = state.op(id).map(|op| op.status) else {
        debug!(%id, sender, "status response for unknown operation, dropping");
        return Ok(());
    };
    match status {
        Status::TpcCoordVoteReqSent => match peer_status {
            // The peer already voted; the vote itself was lost.
            Status::TpcPartWaitResultExpectYes => tpc::on_vote(state, deps, id, sender, true),
            Status::TpcPartWaitResultExpectNo => tpc::on_vote(state, deps, id, sender, false),
            _ => {
                state.send(deps, sender, id, MessageBody::TpcVoteReq);
                Ok(())
            }
        },
        Status::TpcCoordResultSent => {
            state.send(deps, sender, id, MessageBody::TpcCommit);
            Ok(())
        }
        Status::TpcAborting => {
            state.send(deps, sender, id, MessageBody::TpcAbort);
            Ok(())
        }
        Status::MtpcCoordReqSent => match peer_status {
            Status::MtpcPartVoteSentYes => mtpc::on_vote(state, deps, id, true),
            Status::MtpcPartVoteSentNo => mtpc::on_vote(state, deps, id, false),
            _ => Ok(()),
        },
        _ => {
            debug!(%id, sender, %status, ?peer_status, "status response not actionable here");
            Ok(())
        }
    }
}

/// A peer sent the full operation content after we asked for it.
///
/// Rebuilds an operation this host lost from memory: the begin record in
/// our journal supplies kind and payload, the response supplies status
/// and participants.
pub(crate) fn on_content_response(
    state: &mut EngineState,
    deps: &Deps<'_>,
    id: OpId,
    sender: &str,
    status: Status,
    participants: Vec<Subtree>,
) -> Result<(), DaoError> {
    if state.op(id).is_some() {
        debug!(%id, sender, "content response for an operation we still hold, dropping");
        return Ok(());
    }
    let Some((subtree_entry, records)) = state.journals.find_operation(id) else {
        state.send(deps, sender, id, MessageBody::NotResponsible);
        return Ok(());
    };
    let Some((kind, payload)) = records.iter().find_map(|r| match &r.body {
        tl_journal::RecordBody::Start { kind, payload } => Some((*kind, payload.clone())),
        _ => None,
    }) else {
        return Err(DaoError::NoBeginLog);
    };

    let mut op = Op::new(
        id,
        kind,
        payload,
        status,
        Role::Participant,
        subtree_entry,
        participants,
        deps.now_ms + deps.config.overall_timeout_ms,
    );
    if let Some(adapter) = state.adapters.get(&op.module()) {
        if adapter.is_coordinator(&op) {
            op.role = Role::Coordinator;
        }
    }
    state.ops.insert(id, op);
    state.arm_step(deps, id);
    state.arm_overall(id);
    Ok(())
}

/// Answer a probe for an operation that already reached its terminal
/// record: repeat the closing message so the peer can finish too.
pub(crate) fn answer_for_finished(
    state: &mut EngineState,
    deps: &Deps<'_>,
    id: OpId,
    sender: &str,
) -> Result<(), DaoError> {
    let Some((protocol, commit)) = state.finished.get(&id).copied() else {
        state.send(deps, sender, id, MessageBody::NotResponsible);
        return Ok(());
    };
    let body = match (protocol, commit) {
        (Protocol::TwoPhaseCommit, true) => MessageBody::TpcCommit,
        (Protocol::TwoPhaseCommit, false) => MessageBody::TpcAbort,
        (Protocol::ModifiedTwoPhaseCommit, true) => MessageBody::MtpcAck,
        (Protocol::ModifiedTwoPhaseCommit, false) => MessageBody::MtpcAbort,
        (Protocol::OrderedExecution, true) => MessageBody::OoeAck,
        (Protocol::OrderedExecution, false) => MessageBody::OoeAborted,
    };
    state.send(deps, sender, id, body);
    Ok(())
}

fn resend_op_req_to(
    state: &EngineState,
    deps: &Deps<'_>,
    id: OpId,
    sender: &str,
    wrap: fn(tl_wire::OpReq) -> MessageBody,
) {
    let target = state
        .op(id)
        .and_then(|op| op.participants.iter().find(|tree| tree.server == sender).cloned());
    match target {
        Some(target) => resend_op_req(state, deps, id, &target, wrap),
        None => debug!(%id, sender, "re-request from a server that is not a participant"),
    }
}
