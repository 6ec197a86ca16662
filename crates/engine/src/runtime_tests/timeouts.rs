// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Step retransmission, give-up, and the overall deadline.

use super::*;
use std::time::Duration;
use tl_core::{OperationKind, Protocol, RequestTag, Status};
use tl_wire::MessageKind;

fn start_rename(node: &TestNode) -> OpId {
    node.engine
        .start_da_operation(
            b"test\0",
            OperationKind::Rename,
            vec![Subtree::new("127.0.0.1", 1), Subtree::new("127.0.0.2", 2)],
            0,
        )
        .expect("start")
}

fn fire_due(node: &TestNode) -> usize {
    let mut fired = 0;
    loop {
        let n = node.engine.poll_timeouts();
        node.settle();
        if n == 0 {
            break;
        }
        fired += n;
    }
    fired
}

#[test]
fn vote_round_is_retransmitted_once_then_aborted() {
    let network = FakeNetwork::new();
    let mut node = TestNode::new("coord", &network);

    let id = start_rename(&node);
    node.expect_request(Module::Metadata, RequestTag::Execute);
    node.exec_ok(id);
    node.deliver("127.0.0.1", simple(id, MessageBody::TpcVoteYes));

    let vote_reqs_to = |to: &str| {
        node.kinds_sent_to(to)
            .iter()
            .filter(|k| **k == MessageKind::TpcVoteReq)
            .count()
    };
    assert_eq!(vote_reqs_to("127.0.0.2"), 1);

    // First fire: repeat the vote request, to the silent peer only.
    node.clock.advance(Duration::from_millis(3_100));
    fire_due(&node);
    assert_eq!(node.engine.op_status(id), Some(Status::TpcCoordVoteReqSent));
    assert_eq!(vote_reqs_to("127.0.0.2"), 2);
    assert_eq!(vote_reqs_to("127.0.0.1"), 1, "answered peer is left alone");

    // Second fire: give up and abort.
    node.clock.advance(Duration::from_millis(3_100));
    fire_due(&node);
    assert_eq!(node.engine.op_status(id), Some(Status::TpcAborting));
    assert!(node.kinds_sent_to("127.0.0.2").contains(&MessageKind::TpcAbort));
    node.expect_client_response(Module::Metadata, false);
}

#[test]
fn stale_entries_are_ignored_after_progress() {
    let network = FakeNetwork::new();
    let mut node = TestNode::new("coord", &network);

    let id = start_rename(&node);
    node.expect_request(Module::Metadata, RequestTag::Execute);
    node.exec_ok(id);
    node.deliver("127.0.0.1", simple(id, MessageBody::TpcVoteYes));
    node.deliver("127.0.0.2", simple(id, MessageBody::TpcVoteYes));
    node.expect_client_response(Module::Metadata, true);
    assert_eq!(node.engine.op_status(id), Some(Status::TpcCoordResultSent));

    // Entries armed for earlier statuses fire without effect.
    node.clock.advance(Duration::from_millis(3_100));
    fire_due(&node);
    assert_eq!(node.engine.op_status(id), Some(Status::TpcCoordResultSent));
}

#[test]
fn commit_decision_survives_step_give_up() {
    let network = FakeNetwork::new();
    let mut node = TestNode::new("coord", &network);

    let id = start_rename(&node);
    node.expect_request(Module::Metadata, RequestTag::Execute);
    node.exec_ok(id);
    node.deliver("127.0.0.1", simple(id, MessageBody::TpcVoteYes));
    node.deliver("127.0.0.2", simple(id, MessageBody::TpcVoteYes));
    node.expect_client_response(Module::Metadata, true);
    node.deliver("127.0.0.1", simple(id, MessageBody::TpcAck));

    // The second acking peer never answers; two fires close the row with
    // the commit decision intact.
    node.clock.advance(Duration::from_millis(3_100));
    fire_due(&node);
    node.clock.advance(Duration::from_millis(3_100));
    fire_due(&node);

    assert_eq!(node.engine.finished_decision(id), Some((Protocol::TwoPhaseCommit, true)));
}

#[test]
fn participant_gives_up_waiting_for_the_vote_request() {
    let network = FakeNetwork::new();
    let mut node = TestNode::new("127.0.0.1", &network);

    let id = OpId(0xD1);
    node.deliver("coord", tpc_op_req(id, OperationKind::Rename, 1));
    node.expect_request(Module::Metadata, RequestTag::Execute);
    node.exec_ok(id);
    assert_eq!(node.engine.op_status(id), Some(Status::TpcPartWaitVoteReqYes));

    node.clock.advance(Duration::from_millis(3_100));
    fire_due(&node);
    node.clock.advance(Duration::from_millis(3_100));
    fire_due(&node);

    // Proceeds as if an abort had been received.
    assert!(!node.engine.op_exists(id));
    assert_eq!(
        node.engine.finished_decision(id),
        Some((Protocol::TwoPhaseCommit, false))
    );
}

#[test]
fn ordered_chain_gives_up_with_compensation() {
    let network = FakeNetwork::new();
    let mut node = TestNode::new("mid", &network);

    let id = OpId(0xD2);
    node.deliver(
        "prev",
        Message::new(
            id,
            MessageBody::OoeOpReq(tl_wire::OpReq {
                kind: OperationKind::OrderedProbe,
                participant_entry: 2,
                coordinator_entry: 0,
                payload: b"probe".to_vec(),
            }),
        ),
    );
    node.expect_request(Module::Metadata, RequestTag::Execute);
    node.exec_ok_next(id, Subtree::new("next", 3));
    assert_eq!(node.engine.op_status(id), Some(Status::OoeWaitResult));

    node.clock.advance(Duration::from_millis(3_100));
    fire_due(&node);
    // First fire repeated the operation request to the successor.
    assert_eq!(
        node.kinds_sent_to("next")
            .iter()
            .filter(|k| **k == MessageKind::OoeOpReq)
            .count(),
        2
    );

    node.clock.advance(Duration::from_millis(3_100));
    fire_due(&node);
    assert_eq!(node.engine.op_status(id), Some(Status::OoeWaitUndone));
    node.expect_request(Module::Metadata, RequestTag::Undo);
    node.undo_ok(id);
    assert_eq!(node.kinds_sent_to("prev"), vec![MessageKind::OoeAborted]);
}

#[test]
fn overall_deadline_supersedes_step_behavior() {
    let network = FakeNetwork::new();
    let mut node = TestNode::new("coord", &network);

    let id = start_rename(&node);
    node.expect_request(Module::Metadata, RequestTag::Execute);
    node.exec_ok(id);

    // Jump straight past the end-to-end deadline: no retransmission
    // round, the operation is aborted at once.
    node.clock.advance(Duration::from_millis(60_100));
    fire_due(&node);

    assert!(!node.engine.op_exists(id));
    assert_eq!(
        node.engine.finished_decision(id),
        Some((Protocol::TwoPhaseCommit, false))
    );
    assert!(node.kinds_sent_to("127.0.0.1").contains(&MessageKind::TpcAbort));
    node.expect_client_response(Module::Metadata, false);
}

#[test]
fn overall_deadline_keeps_an_existing_commit_decision() {
    let network = FakeNetwork::new();
    let mut node = TestNode::new("coord", &network);

    let id = start_rename(&node);
    node.expect_request(Module::Metadata, RequestTag::Execute);
    node.exec_ok(id);
    node.deliver("127.0.0.1", simple(id, MessageBody::TpcVoteYes));
    node.deliver("127.0.0.2", simple(id, MessageBody::TpcVoteYes));
    node.expect_client_response(Module::Metadata, true);

    node.clock.advance(Duration::from_millis(60_100));
    fire_due(&node);

    assert_eq!(node.engine.finished_decision(id), Some((Protocol::TwoPhaseCommit, true)));
}

#[test]
fn shorter_configured_timeouts_apply() {
    let network = FakeNetwork::new();
    let config = tl_core::DaoConfig::from_toml("tpc_step_timeout_ms = 100").expect("config");
    let mut node = TestNode::with_config("coord", &network, config);

    let id = start_rename(&node);
    node.expect_request(Module::Metadata, RequestTag::Execute);
    node.exec_ok(id);

    node.clock.advance(Duration::from_millis(150));
    fire_due(&node);
    node.clock.advance(Duration::from_millis(150));
    fire_due(&node);

    assert_eq!(node.engine.op_status(id), Some(Status::TpcAborting));
}
