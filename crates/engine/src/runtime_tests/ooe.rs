// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ordered operation execution flows.

use super::*;
use tl_core::{LogTag, OperationKind, Protocol, RequestTag, Status};
use tl_journal::RecordBody;
use tl_wire::{MessageKind, OpReq};

fn start_probe(node: &TestNode) -> OpId {
    node.engine
        .start_da_operation(b"probe", OperationKind::OrderedProbe, vec![], 0)
        .expect("start")
}

fn ooe_op_req(id: OpId, entry: u64) -> Message {
    Message::new(
        id,
        MessageBody::OoeOpReq(OpReq {
            kind: OperationKind::OrderedProbe,
            participant_entry: entry,
            coordinator_entry: 0,
            payload: b"probe".to_vec(),
        }),
    )
}

fn update_tags(records: &[JournalRecord]) -> Vec<LogTag> {
    records
        .iter()
        .filter_map(|r| match r.body {
            RecordBody::Update { tag } => Some(tag),
            _ => None,
        })
        .collect()
}

#[test]
fn initiator_extends_the_chain_and_commits_on_ack() {
    let network = FakeNetwork::new();
    let mut node = TestNode::new("init", &network);

    let id = start_probe(&node);
    assert_eq!(node.engine.op_status(id), Some(Status::OoeComputing));
    assert_eq!(node.expect_request(Module::Metadata, RequestTag::Execute), id);

    node.exec_ok_next(id, Subtree::new("127.0.0.1", 1));
    assert_eq!(node.engine.op_status(id), Some(Status::OoeWaitResult));
    assert_eq!(update_tags(&node.journal_records(0, id)), vec![LogTag::OoeStartNext]);
    assert_eq!(node.kinds_sent_to("127.0.0.1"), vec![MessageKind::OoeOpReq]);

    node.deliver("127.0.0.1", simple(id, MessageBody::OoeAck));
    assert!(!node.engine.op_exists(id));
    assert_eq!(
        node.engine.finished_decision(id),
        Some((Protocol::OrderedExecution, true))
    );
    node.expect_client_response(Module::Metadata, true);
}

#[test]
fn single_host_chain_commits_immediately() {
    let network = FakeNetwork::new();
    let mut node = TestNode::new("init", &network);

    let id = start_probe(&node);
    node.expect_request(Module::Metadata, RequestTag::Execute);

    // The executor names no successor: we are the whole chain.
    node.exec_ok_next(id, Subtree::new("", 0));
    assert!(!node.engine.op_exists(id));
    assert_eq!(
        node.engine.finished_decision(id),
        Some((Protocol::OrderedExecution, true))
    );
    node.expect_client_response(Module::Metadata, true);
    assert!(node.network.log().is_empty(), "no peers to talk to");
}

#[test]
fn middle_element_propagates_ack_backward() {
    let network = FakeNetwork::new();
    let mut node = TestNode::new("mid", &network);

    let id = OpId(0xC1);
    node.deliver("prev", ooe_op_req(id, 2));
    assert_eq!(node.engine.op_status(id), Some(Status::OoeComputing));
    node.expect_request(Module::Metadata, RequestTag::Execute);

    node.exec_ok_next(id, Subtree::new("next", 3));
    assert_eq!(node.engine.op_status(id), Some(Status::OoeWaitResult));
    assert_eq!(node.kinds_sent_to("next"), vec![MessageKind::OoeOpReq]);

    node.deliver("next", simple(id, MessageBody::OoeAck));
    assert!(!node.engine.op_exists(id));
    assert_eq!(node.kinds_sent_to("prev"), vec![MessageKind::OoeAck]);

    let records = node.journal_records(2, id);
    assert!(matches!(records.last().map(|r| &r.body), Some(RecordBody::Commit)));
}

#[test]
fn last_element_commits_and_acks_backward() {
    let network = FakeNetwork::new();
    let mut node = TestNode::new("last", &network);

    let id = OpId(0xC2);
    node.deliver("prev", ooe_op_req(id, 4));
    node.expect_request(Module::Metadata, RequestTag::Execute);

    node.exec_ok_next(id, Subtree::new("", 0));
    assert!(!node.engine.op_exists(id));
    assert_eq!(
        node.engine.finished_decision(id),
        Some((Protocol::OrderedExecution, true))
    );
    assert_eq!(node.kinds_sent_to("prev"), vec![MessageKind::OoeAck]);
}

#[test]
fn exec_failure_aborts_backward() {
    let network = FakeNetwork::new();
    let mut node = TestNode::new("mid", &network);

    let id = OpId(0xC3);
    node.deliver("prev", ooe_op_req(id, 2));
    node.expect_request(Module::Metadata, RequestTag::Execute);
    node.exec_fail(id);

    assert!(!node.engine.op_exists(id));
    assert_eq!(
        node.engine.finished_decision(id),
        Some((Protocol::OrderedExecution, false))
    );
    assert_eq!(node.kinds_sent_to("prev"), vec![MessageKind::OoeAborted]);
}

#[test]
fn aborted_chain_undoes_and_propagates() {
    let network = FakeNetwork::new();
    let mut node = TestNode::new("mid", &network);

    let id = OpId(0xC4);
    node.deliver("prev", ooe_op_req(id, 2));
    node.expect_request(Module::Metadata, RequestTag::Execute);
    node.exec_ok_next(id, Subtree::new("next", 3));

    node.deliver("next", simple(id, MessageBody::OoeAborted));
    assert_eq!(node.engine.op_status(id), Some(Status::OoeWaitUndone));
    assert_eq!(update_tags(&node.journal_records(2, id)), vec![LogTag::OoeStartNext, LogTag::OoeUndo]);
    node.expect_request(Module::Metadata, RequestTag::Undo);
    assert!(node.kinds_sent_to("prev").is_empty(), "propagate only after the undo");

    node.undo_ok(id);
    assert!(!node.engine.op_exists(id));
    assert_eq!(node.kinds_sent_to("prev"), vec![MessageKind::OoeAborted]);
    let records = node.journal_records(2, id);
    assert!(matches!(records.last().map(|r| &r.body), Some(RecordBody::Abort)));
}

#[test]
fn abort_arriving_before_executor_result_waits_then_undoes() {
    let network = FakeNetwork::new();
    let mut node = TestNode::new("mid", &network);

    let id = OpId(0xC5);
    node.deliver("prev", ooe_op_req(id, 2));
    node.expect_request(Module::Metadata, RequestTag::Execute);

    // Inconsistent peer state can deliver the abort early; the executor
    // must still answer first.
    node.deliver("next", simple(id, MessageBody::OoeAborted));
    assert_eq!(node.engine.op_status(id), Some(Status::OoeComputing));

    node.exec_ok_next(id, Subtree::new("next", 3));
    assert_eq!(node.engine.op_status(id), Some(Status::OoeWaitUndone));
    node.expect_request(Module::Metadata, RequestTag::Undo);

    node.undo_ok(id);
    assert!(!node.engine.op_exists(id));
    assert_eq!(node.kinds_sent_to("prev"), vec![MessageKind::OoeAborted]);
}

#[test]
fn initiator_with_participants_is_rejected() {
    let network = FakeNetwork::new();
    let node = TestNode::new("init", &network);

    let err = node
        .engine
        .start_da_operation(
            b"probe",
            OperationKind::OrderedProbe,
            vec![Subtree::new("127.0.0.1", 1)],
            0,
        )
        .unwrap_err();
    assert_eq!(err, tl_core::DaoError::WrongParameter);
}

#[test]
fn three_host_chain_commits_end_to_end() {
    let network = FakeNetwork::new();
    let mut init = TestNode::new("init", &network);
    let mut mid = TestNode::new("mid", &network);
    let mut last = TestNode::new("last", &network);

    let id = start_probe(&init);
    init.exec_ok_next(id, Subtree::new("mid", 2));
    pump(&[&init, &mid, &last]);

    mid.expect_request(Module::Metadata, RequestTag::Execute);
    mid.exec_ok_next(id, Subtree::new("last", 3));
    pump(&[&init, &mid, &last]);

    last.expect_request(Module::Metadata, RequestTag::Execute);
    last.exec_ok_next(id, Subtree::new("", 0));
    pump(&[&init, &mid, &last]);

    for node in [&init, &mid, &last] {
        assert_eq!(
            node.engine.finished_decision(id),
            Some((Protocol::OrderedExecution, true)),
            "{} finished",
            node.address
        );
    }
    init.expect_request(Module::Metadata, RequestTag::Execute); // drained late: started first
    init.expect_client_response(Module::Metadata, true);
}

#[test]
fn three_host_chain_abort_unwinds_everyone() {
    let network = FakeNetwork::new();
    let mut init = TestNode::new("init", &network);
    let mut mid = TestNode::new("mid", &network);
    let mut last = TestNode::new("last", &network);

    let id = start_probe(&init);
    init.expect_request(Module::Metadata, RequestTag::Execute);
    init.exec_ok_next(id, Subtree::new("mid", 2));
    pump(&[&init, &mid, &last]);

    mid.expect_request(Module::Metadata, RequestTag::Execute);
    mid.exec_ok_next(id, Subtree::new("last", 3));
    pump(&[&init, &mid, &last]);

    last.expect_request(Module::Metadata, RequestTag::Execute);
    last.exec_fail(id);
    pump(&[&init, &mid, &last]);

    // The middle compensates, then the initiator.
    mid.expect_request(Module::Metadata, RequestTag::Undo);
    mid.undo_ok(id);
    pump(&[&init, &mid, &last]);

    init.expect_request(Module::Metadata, RequestTag::Undo);
    init.undo_ok(id);
    pump(&[&init, &mid, &last]);

    for node in [&init, &mid, &last] {
        assert_eq!(
            node.engine.finished_decision(id),
            Some((Protocol::OrderedExecution, false)),
            "{} aborted",
            node.address
        );
    }
    init.expect_client_response(Module::Metadata, false);
}
