// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Crash recovery: reconstruction, re-drive, and the unrecoverable path.

use super::*;
use tl_adapters::FakeAdapter;
use tl_core::{DaoError, LogTag, OperationKind, Protocol, RequestTag, Status};
use tl_wire::MessageKind;

/// Node with scripted recovery hooks installed for both modules.
fn recovering_node(
    network: &Arc<FakeNetwork>,
    dir: TempDir,
    adapter: &Arc<FakeAdapter>,
) -> TestNode {
    let node = TestNode::over_dir("host", network, tl_core::DaoConfig::default(), dir);
    node.engine.set_adapter_hooks(Module::Metadata, adapter.clone());
    node.engine.set_adapter_hooks(Module::LoadBalancing, adapter.clone());
    node
}

#[test]
fn start_is_refused_before_recovery() {
    let network = FakeNetwork::new();
    let dir = tempfile::tempdir().expect("tempdir");
    let node = TestNode::over_dir("host", &network, tl_core::DaoConfig::default(), dir);

    let err = node
        .engine
        .start_da_operation(
            b"x",
            OperationKind::Rename,
            vec![Subtree::new("127.0.0.1", 1)],
            0,
        )
        .unwrap_err();
    assert_eq!(err, DaoError::Internal);

    node.engine.do_recovery().expect("recovery");
    assert!(node
        .engine
        .start_da_operation(
            b"x",
            OperationKind::Rename,
            vec![Subtree::new("127.0.0.1", 1)],
            0,
        )
        .is_ok());
}

#[test]
fn inbound_messages_before_recovery_are_queued_not_dropped() {
    let network = FakeNetwork::new();
    let dir = tempfile::tempdir().expect("tempdir");
    let mut node = TestNode::over_dir("host", &network, tl_core::DaoConfig::default(), dir);

    let id = OpId(0xF0);
    node.engine
        .handle_message("coord", tpc_op_req(id, OperationKind::Rename, 1));
    node.settle();
    assert!(!node.engine.op_exists(id), "deferred until recovery");

    node.engine.do_recovery().expect("recovery");
    node.settle();
    assert_eq!(node.engine.op_status(id), Some(Status::TpcPartComputing));
    node.expect_request(Module::Metadata, RequestTag::Execute);
}

#[test]
fn participant_crash_after_start_record_is_reexecuted() {
    let network = FakeNetwork::new();

    // First life: the operation request lands, the begin record is
    // written, then the host dies before the executor answers.
    let dir = {
        let mut node = TestNode::new("host", &network);
        let id = OpId(0xF1);
        node.deliver("coord", tpc_op_req(id, OperationKind::Rename, 7));
        node.expect_request(Module::Metadata, RequestTag::Execute);
        let TestNode { dir, .. } = node;
        dir
    };

    // Second life.
    let adapter = FakeAdapter::new();
    adapter.set_coordinator(false);
    adapter.set_subtree_entry(7);
    adapter.set_addresses(Some(vec![Subtree::new("coord", 0)]));
    let mut node = recovering_node(&network, dir, &adapter);
    node.engine.do_recovery().expect("recovery");

    let id = OpId(0xF1);
    assert_eq!(node.engine.op_status(id), Some(Status::TpcPartComputing));
    // The engine re-requests the work idempotently.
    assert_eq!(node.expect_request(Module::Metadata, RequestTag::Redo), id);

    node.exec_ok(id);
    node.deliver("coord", simple(id, MessageBody::TpcVoteReq));
    assert!(node.kinds_sent_to("coord").contains(&MessageKind::TpcVoteYes));
    node.deliver("coord", simple(id, MessageBody::TpcCommit));
    assert_eq!(node.engine.finished_decision(id), Some((Protocol::TwoPhaseCommit, true)));
}

#[test]
fn coordinator_recovers_into_the_vote_round_and_probes_peers() {
    let network = FakeNetwork::new();

    let dir = {
        let mut node = TestNode::new("host", &network);
        let id = node
            .engine
            .start_da_operation(
                b"test\0",
                OperationKind::Rename,
                vec![Subtree::new("127.0.0.1", 1), Subtree::new("127.0.0.2", 2)],
                0,
            )
            .expect("start");
        node.expect_request(Module::Metadata, RequestTag::Execute);
        node.exec_ok(id);
        assert_eq!(node.engine.op_status(id), Some(Status::TpcCoordVoteReqSent));
        let TestNode { dir, .. } = node;
        dir
    };

    let adapter = FakeAdapter::new();
    adapter.set_coordinator(true);
    adapter.set_subtree_entry(0);
    adapter.set_addresses(Some(vec![
        Subtree::new("127.0.0.1", 1),
        Subtree::new("127.0.0.2", 2),
    ]));
    let node = recovering_node(&network, dir, &adapter);
    node.engine.do_recovery().expect("recovery");
    node.settle();

    let id = OpId(1);
    assert_eq!(node.engine.op_status(id), Some(Status::TpcCoordVoteReqSent));
    assert!(node.kinds_sent_to("127.0.0.1").contains(&MessageKind::StatusRequest));
    assert!(node.kinds_sent_to("127.0.0.2").contains(&MessageKind::StatusRequest));

    // Peers answer the probe with their positions; the round completes.
    node.deliver(
        "127.0.0.1",
        simple(id, MessageBody::StatusResponse { status: Status::TpcPartWaitResultExpectYes }),
    );
    node.deliver(
        "127.0.0.2",
        simple(id, MessageBody::StatusResponse { status: Status::TpcPartWaitResultExpectYes }),
    );
    assert_eq!(node.engine.op_status(id), Some(Status::TpcCoordResultSent));
}

#[test]
fn finished_operations_are_not_rebuilt() {
    let network = FakeNetwork::new();

    let dir = {
        let mut node = TestNode::new("host", &network);
        let id = OpId(0xF3);
        node.deliver("coord", tpc_op_req(id, OperationKind::Rename, 7));
        node.expect_request(Module::Metadata, RequestTag::Execute);
        node.exec_ok(id);
        node.deliver("coord", simple(id, MessageBody::TpcVoteReq));
        node.deliver("coord", simple(id, MessageBody::TpcCommit));
        assert!(!node.engine.op_exists(id));
        let TestNode { dir, .. } = node;
        dir
    };

    let adapter = FakeAdapter::new();
    adapter.set_subtree_entry(7);
    let node = recovering_node(&network, dir, &adapter);
    node.engine.do_recovery().expect("recovery");

    let id = OpId(0xF3);
    assert!(!node.engine.op_exists(id));
    assert_eq!(node.engine.finished_decision(id), Some((Protocol::TwoPhaseCommit, true)));
    assert!(adapter.calls().is_empty(), "no executor traffic for finished operations");
}

#[test]
fn refused_addresses_make_the_operation_unrecoverable() {
    let network = FakeNetwork::new();

    let dir = {
        let mut node = TestNode::new("host", &network);
        node.deliver("coord", tpc_op_req(OpId(0xF4), OperationKind::Rename, 7));
        node.expect_request(Module::Metadata, RequestTag::Execute);
        let TestNode { dir, .. } = node;
        dir
    };

    let adapter = FakeAdapter::new();
    adapter.set_coordinator(false);
    adapter.set_subtree_entry(7);
    adapter.set_addresses(None);
    let node = recovering_node(&network, dir, &adapter);

    let err = node.engine.do_recovery().unwrap_err();
    assert_eq!(err, DaoError::NotAllOperationsRecoverable);
    // The engine still runs; the broken id is simply absent.
    assert!(!node.engine.op_exists(OpId(0xF4)));
    assert!(node
        .engine
        .start_da_operation(
            b"x",
            OperationKind::Rename,
            vec![Subtree::new("127.0.0.1", 1)],
            0,
        )
        .is_ok());
}

#[test]
fn logged_vote_resumes_waiting_for_the_decision() {
    let network = FakeNetwork::new();

    let dir = {
        let mut node = TestNode::new("host", &network);
        let id = OpId(0xF5);
        node.deliver("coord", tpc_op_req(id, OperationKind::Rename, 7));
        node.expect_request(Module::Metadata, RequestTag::Execute);
        node.exec_ok(id);
        // TpcPartVoteYes is on record now.
        assert_eq!(node.engine.op_status(id), Some(Status::TpcPartWaitVoteReqYes));
        let TestNode { dir, .. } = node;
        dir
    };

    let adapter = FakeAdapter::new();
    adapter.set_coordinator(false);
    adapter.set_subtree_entry(7);
    adapter.set_addresses(Some(vec![Subtree::new("coord", 0)]));
    let node = recovering_node(&network, dir, &adapter);
    node.engine.do_recovery().expect("recovery");

    let id = OpId(0xF5);
    // The logged tag maps to the post-vote state; the coordinator's
    // retransmission or our step timeout covers the lost vote.
    assert_eq!(node.engine.op_status(id), Some(Status::TpcPartWaitResultExpectYes));

    node.deliver("coord", simple(id, MessageBody::TpcCommit));
    assert_eq!(node.engine.finished_decision(id), Some((Protocol::TwoPhaseCommit, true)));
}

#[test]
fn recovered_ordered_undo_is_rerun() {
    let network = FakeNetwork::new();

    let dir = {
        let mut node = TestNode::new("host", &network);
        let id = OpId(0xF6);
        node.deliver(
            "prev",
            Message::new(
                id,
                MessageBody::OoeOpReq(tl_wire::OpReq {
                    kind: OperationKind::OrderedProbe,
                    participant_entry: 7,
                    coordinator_entry: 0,
                    payload: b"probe".to_vec(),
                }),
            ),
        );
        node.expect_request(Module::Metadata, RequestTag::Execute);
        node.exec_ok_next(id, Subtree::new("next", 3));
        node.deliver("next", simple(id, MessageBody::OoeAborted));
        // OoeUndo is on record; the crash hits before the undo answer.
        assert_eq!(node.engine.op_status(id), Some(Status::OoeWaitUndone));
        let TestNode { dir, .. } = node;
        dir
    };

    let adapter = FakeAdapter::new();
    adapter.set_coordinator(false);
    adapter.set_subtree_entry(7);
    adapter.set_addresses(Some(vec![Subtree::new("prev", 1), Subtree::new("next", 3)]));
    let mut node = recovering_node(&network, dir, &adapter);
    node.engine.do_recovery().expect("recovery");

    let id = OpId(0xF6);
    assert_eq!(node.engine.op_status(id), Some(Status::OoeWaitUndone));
    assert_eq!(node.expect_request(Module::Metadata, RequestTag::Reundo), id);

    node.undo_ok(id);
    assert_eq!(node.engine.finished_decision(id), Some((Protocol::OrderedExecution, false)));
    assert!(node.kinds_sent_to("prev").contains(&MessageKind::OoeAborted));
}

#[test]
fn recovery_reports_tags_found_in_journal_order() {
    // A second update overrides the first when inferring the status.
    let network = FakeNetwork::new();
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let mut journals = JournalManager::open(dir.path()).expect("journals");
        let journal = journals.create_subtree_journal(7).expect("journal");
        journal
            .append_start(OpId(0xF7), Module::Metadata, OperationKind::Rename, b"x")
            .expect("start");
        journal
            .append_update(OpId(0xF7), Module::Metadata, LogTag::TpcCoordVoteStart)
            .expect("update");
        journal
            .append_update(OpId(0xF7), Module::Metadata, LogTag::TpcCoordCommitting)
            .expect("update");
    }

    let adapter = FakeAdapter::new();
    adapter.set_coordinator(true);
    adapter.set_subtree_entry(7);
    adapter.set_addresses(Some(vec![Subtree::new("127.0.0.1", 1)]));
    let node = recovering_node(&network, dir, &adapter);
    node.engine.do_recovery().expect("recovery");
    node.settle();

    assert_eq!(node.engine.op_status(OpId(0xF7)), Some(Status::TpcCoordResultSent));
    assert!(node.kinds_sent_to("127.0.0.1").contains(&MessageKind::StatusRequest));
}
