// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Multi-server harness: engines wired over the in-memory network, with
//! the tests acting as the executor modules.

use std::sync::Arc;
use tempfile::TempDir;
use tl_core::{
    DaoConfig, ExecStatus, FakeClock, InResult, Module, OpId, OutBody, OutRequest, SeqOpIdGen,
    Subtree,
};
use tl_engine::{Delivery, Engine, FakeNetwork};
use tl_journal::JournalManager;
use tokio::sync::mpsc;

pub struct Server {
    pub engine: Engine<FakeClock>,
    pub address: String,
    pub metadata_rx: mpsc::UnboundedReceiver<OutRequest>,
    pub lb_rx: mpsc::UnboundedReceiver<OutRequest>,
    _dir: TempDir,
}

impl Server {
    pub fn new(address: &str, network: &Arc<FakeNetwork>) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let journals = JournalManager::open(dir.path()).expect("journal dir");
        let engine = Engine::new(
            DaoConfig::default(),
            FakeClock::new(),
            journals,
            network.transport(address),
            Arc::new(SeqOpIdGen::starting_at(1)),
        );
        let metadata_rx = engine.register_queue(Module::Metadata);
        let lb_rx = engine.register_queue(Module::LoadBalancing);
        engine.do_recovery().expect("recovery");
        Self {
            engine,
            address: address.to_string(),
            metadata_rx,
            lb_rx,
            _dir: dir,
        }
    }

    /// Pop the next executor request, if one is pending.
    pub fn next_request(&mut self, module: Module) -> Option<OutRequest> {
        while self.engine.process_queued() > 0 {}
        let rx = match module {
            Module::Metadata => &mut self.metadata_rx,
            Module::LoadBalancing => &mut self.lb_rx,
        };
        rx.try_recv().ok()
    }

    /// Answer the pending execute request with success.
    pub fn answer_exec_ok(&mut self, module: Module) -> OpId {
        let request = self.next_request(module).expect("an executor request");
        self.engine
            .provide_operation_execution_result(InResult::new(request.id, ExecStatus::ExecOk));
        request.id
    }

    pub fn answer_exec_fail(&mut self, module: Module) -> OpId {
        let request = self.next_request(module).expect("an executor request");
        self.engine
            .provide_operation_execution_result(InResult::new(request.id, ExecStatus::ExecFail));
        request.id
    }

    /// Answer the pending request with success and a named successor.
    pub fn answer_exec_ok_next(&mut self, module: Module, next: Subtree) -> OpId {
        let request = self.next_request(module).expect("an executor request");
        self.engine.provide_operation_execution_result(InResult::with_next(
            request.id,
            ExecStatus::ExecOk,
            next,
        ));
        request.id
    }

    pub fn answer_undo_ok(&mut self, module: Module) -> OpId {
        let request = self.next_request(module).expect("an undo request");
        assert!(matches!(request.body, OutBody::Request { .. }));
        self.engine
            .provide_operation_execution_result(InResult::new(request.id, ExecStatus::UndoOk));
        request.id
    }

    /// The final client response, when one is pending.
    pub fn client_response(&mut self, module: Module) -> Option<(OpId, bool)> {
        let request = self.next_request(module)?;
        match request.body {
            OutBody::ClientResponse { success } => Some((request.id, success)),
            OutBody::Request { .. } => panic!("expected a client response"),
        }
    }
}

/// Route every in-flight message until the cluster is quiet.
pub fn run_until_quiet(network: &Arc<FakeNetwork>, servers: &mut [&mut Server]) {
    loop {
        for server in servers.iter_mut() {
            while server.engine.process_queued() > 0 {}
        }
        let deliveries = network.drain();
        if deliveries.is_empty() {
            break;
        }
        for Delivery { from, to, message } in deliveries {
            if let Some(server) = servers.iter_mut().find(|s| s.address == to) {
                server.engine.handle_message(&from, message);
            }
        }
    }
}
