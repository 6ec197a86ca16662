// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine-level protocol tests.
//!
//! Each test drives a real engine deterministically: the network is the
//! in-memory fake, executor queues are drained by the test itself, and
//! results are injected through `provide_operation_execution_result`.

mod ooe;
mod recovery;
mod timeouts;

use crate::transport::{Delivery, FakeNetwork};
use crate::Engine;
use std::sync::Arc;
use tempfile::TempDir;
use tl_core::{
    DaoConfig, ExecStatus, FakeClock, InResult, Module, OpId, OutBody, OutRequest, SeqOpIdGen,
    Subtree,
};
use tl_journal::{JournalManager, JournalRecord};
use tl_wire::{Message, MessageBody};
use tokio::sync::mpsc;

pub(crate) struct TestNode {
    pub engine: Engine<FakeClock>,
    pub clock: FakeClock,
    pub network: Arc<FakeNetwork>,
    pub address: String,
    pub metadata_rx: mpsc::UnboundedReceiver<OutRequest>,
    pub lb_rx: mpsc::UnboundedReceiver<OutRequest>,
    pub dir: TempDir,
}

impl TestNode {
    pub fn new(address: &str, network: &Arc<FakeNetwork>) -> Self {
        Self::with_config(address, network, DaoConfig::default())
    }

    pub fn with_config(address: &str, network: &Arc<FakeNetwork>, config: DaoConfig) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let node = Self::over_dir(address, network, config, dir);
        node.engine.do_recovery().expect("recovery on empty journals");
        node
    }

    /// Build without running recovery; used by the recovery tests.
    pub fn over_dir(
        address: &str,
        network: &Arc<FakeNetwork>,
        config: DaoConfig,
        dir: TempDir,
    ) -> Self {
        let journals = JournalManager::open(dir.path()).expect("journal dir");
        let clock = FakeClock::new();
        let engine = Engine::new(
            config,
            clock.clone(),
            journals,
            network.transport(address),
            Arc::new(SeqOpIdGen::starting_at(1)),
        );
        let metadata_rx = engine.register_queue(Module::Metadata);
        let lb_rx = engine.register_queue(Module::LoadBalancing);
        Self {
            engine,
            clock,
            network: Arc::clone(network),
            address: address.to_string(),
            metadata_rx,
            lb_rx,
            dir,
        }
    }

    /// Run queued events until quiescent.
    pub fn settle(&self) {
        while self.engine.process_queued() > 0 {}
    }

    /// Next pending executor request on the module queue, if any.
    pub fn next_out(&mut self, module: Module) -> Option<OutRequest> {
        self.settle();
        let rx = match module {
            Module::Metadata => &mut self.metadata_rx,
            Module::LoadBalancing => &mut self.lb_rx,
        };
        rx.try_recv().ok()
    }

    /// Expect an execution request and hand back its id.
    pub fn expect_request(&mut self, module: Module, tag: tl_core::RequestTag) -> OpId {
        let request = self.next_out(module).expect("an executor request");
        match request.body {
            OutBody::Request { tag: got, .. } => {
                assert_eq!(got, tag, "request tag");
                request.id
            }
            OutBody::ClientResponse { .. } => panic!("expected a request, got a client response"),
        }
    }

    /// Expect the final client response.
    pub fn expect_client_response(&mut self, module: Module, success: bool) -> OpId {
        let request = self.next_out(module).expect("a client response");
        match request.body {
            OutBody::ClientResponse { success: got } => {
                assert_eq!(got, success, "client response outcome");
                assert_eq!(request.payload_len(), 0);
                request.id
            }
            OutBody::Request { .. } => panic!("expected a client response, got a request"),
        }
    }

    pub fn exec_ok(&self, id: OpId) {
        self.engine
            .provide_operation_execution_result(InResult::new(id, ExecStatus::ExecOk));
        self.settle();
    }

    pub fn exec_ok_next(&self, id: OpId, next: Subtree) {
        self.engine.provide_operation_execution_result(InResult::with_next(
            id,
            ExecStatus::ExecOk,
            next,
        ));
        self.settle();
    }

    pub fn exec_fail(&self, id: OpId) {
        self.engine
            .provide_operation_execution_result(InResult::new(id, ExecStatus::ExecFail));
        self.settle();
    }

    pub fn undo_ok(&self, id: OpId) {
        self.engine
            .provide_operation_execution_result(InResult::new(id, ExecStatus::UndoOk));
        self.settle();
    }

    pub fn undo_fail(&self, id: OpId) {
        self.engine
            .provide_operation_execution_result(InResult::new(id, ExecStatus::UndoFail));
        self.settle();
    }

    /// Deliver a message as if `from` had sent it.
    pub fn deliver(&self, from: &str, message: Message) {
        self.engine.handle_message(from, message);
        self.settle();
    }

    /// All records for `id` in the journal of `subtree_entry`.
    pub fn journal_records(&self, subtree_entry: u64, id: OpId) -> Vec<JournalRecord> {
        self.engine.with_journals(|journals| {
            journals
                .journal_for(subtree_entry)
                .map(|journal| journal.records_for(id).into_iter().cloned().collect())
                .unwrap_or_default()
        })
    }

    /// Kinds of every message this node sent to `to`, in order.
    pub fn kinds_sent_to(&self, to: &str) -> Vec<tl_wire::MessageKind> {
        self.network
            .log()
            .iter()
            .filter(|d| d.from == self.address && d.to == to)
            .map(|d| d.message.kind())
            .collect()
    }
}

/// Deliver every in-flight message to its addressee among `nodes`,
/// processing until the network is quiet.
pub(crate) fn pump(nodes: &[&TestNode]) {
    loop {
        for node in nodes {
            node.settle();
        }
        let deliveries = nodes
            .first()
            .map(|n| n.network.drain())
            .unwrap_or_default();
        if deliveries.is_empty() {
            break;
        }
        for Delivery { from, to, message } in deliveries {
            if let Some(node) = nodes.iter().find(|n| n.address == to) {
                node.engine.handle_message(&from, message);
            }
        }
    }
}

pub(crate) fn tpc_op_req(id: OpId, kind: tl_core::OperationKind, entry: u64) -> Message {
    Message::new(
        id,
        MessageBody::TpcOpReq(tl_wire::OpReq {
            kind,
            participant_entry: entry,
            coordinator_entry: 0,
            payload: b"test\0".to_vec(),
        }),
    )
}

pub(crate) fn simple(id: OpId, body: MessageBody) -> Message {
    Message::new(id, body)
}
