// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! A participant crash in the middle of a two-phase commit, recovered
//! from its journal, still reaches the coordinator's decision.

use super::harness::Server;
use std::sync::Arc;
use tl_adapters::FakeAdapter;
use tl_core::{
    DaoConfig, FakeClock, Module, OperationKind, Protocol, SeqOpIdGen, Subtree,
};
use tl_engine::{Engine, FakeNetwork};
use tl_journal::JournalManager;

#[test]
fn participant_crash_between_start_and_vote_is_recovered() {
    let network = FakeNetwork::new();
    let mut coord = Server::new("10.0.0.1:9441", &network);

    // First life of the participant: receives the operation request,
    // writes its begin record, and dies before the executor answers.
    let part_dir = tempfile::tempdir().expect("tempdir");
    {
        let journals = JournalManager::open(part_dir.path()).expect("journals");
        let engine = Engine::new(
            DaoConfig::default(),
            FakeClock::new(),
            journals,
            network.transport("10.0.0.2:9441"),
            Arc::new(SeqOpIdGen::starting_at(1)),
        );
        let mut metadata_rx = engine.register_queue(Module::Metadata);
        engine.do_recovery().expect("recovery");

        let id = coord
            .engine
            .start_da_operation(
                b"rename /a /b\0",
                OperationKind::Rename,
                vec![Subtree::new("10.0.0.2:9441", 11)],
                0,
            )
            .expect("start");
        while coord.engine.process_queued() > 0 {}
        for delivery in network.drain() {
            if delivery.to == "10.0.0.2:9441" {
                engine.handle_message(&delivery.from, delivery.message);
            }
        }
        while engine.process_queued() > 0 {}
        // The begin record is durable; the executor request is pending
        // when the host dies.
        assert!(metadata_rx.try_recv().is_ok());
        assert_eq!(id, coord.answer_exec_ok(Module::Metadata));
    }

    // Second life: recovery rebuilds the row and re-requests the work.
    let adapter = FakeAdapter::new();
    adapter.set_coordinator(false);
    adapter.set_subtree_entry(11);
    adapter.set_addresses(Some(vec![Subtree::new("10.0.0.1:9441", 0)]));

    let journals = JournalManager::open(part_dir.path()).expect("journals");
    let engine = Engine::new(
        DaoConfig::default(),
        FakeClock::new(),
        journals,
        network.transport("10.0.0.2:9441"),
        Arc::new(SeqOpIdGen::starting_at(100)),
    );
    let mut metadata_rx = engine.register_queue(Module::Metadata);
    engine.set_adapter_hooks(Module::Metadata, adapter);
    engine.do_recovery().expect("recovery");
    while engine.process_queued() > 0 {}

    // The redo request is out; answer it and let the protocol finish.
    let redo = metadata_rx.try_recv().expect("redo after recovery");
    engine.provide_operation_execution_result(tl_core::InResult::new(
        redo.id,
        tl_core::ExecStatus::ExecOk,
    ));
    while engine.process_queued() > 0 {}

    // Drive the remaining message exchange by hand: the recovered
    // participant and the waiting coordinator converge on commit.
    loop {
        while coord.engine.process_queued() > 0 {}
        while engine.process_queued() > 0 {}
        let deliveries = network.drain();
        if deliveries.is_empty() {
            break;
        }
        for delivery in deliveries {
            if delivery.to == "10.0.0.2:9441" {
                engine.handle_message(&delivery.from, delivery.message);
            } else if delivery.to == coord.address {
                coord.engine.handle_message(&delivery.from, delivery.message);
            }
        }
    }

    assert_eq!(
        coord.engine.finished_decision(redo.id),
        Some((Protocol::TwoPhaseCommit, true))
    );
    assert_eq!(
        engine.finished_decision(redo.id),
        Some((Protocol::TwoPhaseCommit, true))
    );
    assert_eq!(coord.client_response(Module::Metadata), Some((redo.id, true)));
}
