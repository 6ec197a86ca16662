// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The engine facade: operation table ownership, event intake, and
//! dispatch under the single state mutex.

use crate::recovery;
use crate::runtime::EngineEvent;
use crate::state::{map_journal_error, Deps, EngineState};
use crate::timeout;
use crate::transition::{failure, mtpc, ooe, tpc};
use crate::transport::Transport;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tl_adapters::{AdapterRegistry, DaoAdapter, ResultSink};
use tl_core::{
    Clock, DaoConfig, DaoError, ExecStatus, InResult, InodeNumber, Module, Op, OpId, OpIdGen,
    OperationKind, OutRequest, Protocol, RequestTag, Role, Status, Subtree,
};
use tl_journal::JournalManager;
use tl_wire::{Message, MessageBody, OpReq, WireError};
use tokio::sync::mpsc;
use tracing::{debug, warn};

struct Inner<C: Clock> {
    state: Mutex<EngineState>,
    registry: Mutex<AdapterRegistry>,
    clock: C,
    config: DaoConfig,
    id_gen: Arc<dyn OpIdGen>,
    transport: Arc<dyn Transport>,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<EngineEvent>>>,
    recovery_done: AtomicBool,
    /// Inbound messages that arrived before recovery finished.
    deferred: Mutex<Vec<EngineEvent>>,
}

/// The distributed atomic operation engine of one server.
///
/// Cheap to clone; all clones share the same state. Construction wires
/// the journals and transport; adapters register afterwards, then
/// `do_recovery` must run before the first operation starts.
pub struct Engine<C: Clock> {
    inner: Arc<Inner<C>>,
}

impl<C: Clock> Clone for Engine<C> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<C: Clock> Engine<C> {
    pub fn new(
        config: DaoConfig,
        clock: C,
        journals: JournalManager,
        transport: Arc<dyn Transport>,
        id_gen: Arc<dyn OpIdGen>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(EngineState::new(journals)),
                registry: Mutex::new(AdapterRegistry::new()),
                clock,
                config,
                id_gen,
                transport,
                events_tx,
                events_rx: Mutex::new(Some(events_rx)),
                recovery_done: AtomicBool::new(false),
                deferred: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Bind an executor module's adapter; at most one per module.
    pub fn register_adapter<A: DaoAdapter>(
        &self,
        module: Module,
        adapter: Arc<A>,
    ) -> Result<(), DaoError> {
        let queue = {
            let mut registry = self.inner.registry.lock();
            registry
                .register(module, Arc::clone(&adapter), Arc::new(self.clone()))
                .map_err(|_| DaoError::WrongParameter)?;
            registry.queue_for(module).map_err(|_| DaoError::Internal)?
        };
        let mut state = self.inner.state.lock();
        state.queues.insert(module, queue);
        state.adapters.insert(module, adapter);
        Ok(())
    }

    /// Recover every open operation from the journals. Must run once,
    /// after the journals exist and before any operation starts; inbound
    /// messages received earlier are processed right after.
    pub fn do_recovery(&self) -> Result<(), DaoError> {
        let result = {
            let mut state = self.inner.state.lock();
            let deps = self.deps();
            recovery::run(&mut state, &deps)
        };
        self.inner.recovery_done.store(true, Ordering::SeqCst);
        for event in std::mem::take(&mut *self.inner.deferred.lock()) {
            let _ = self.inner.events_tx.send(event);
        }
        result
    }

    /// Begin a distributed atomic operation with this server as its
    /// coordinator. Returns the operation id the caller can correlate
    /// the client response with.
    pub fn start_da_operation(
        &self,
        payload: &[u8],
        kind: OperationKind,
        participants: Vec<Subtree>,
        subtree_entry: InodeNumber,
    ) -> Result<OpId, DaoError> {
        if !self.recovery_done() {
            warn!("operation start refused before recovery");
            return Err(DaoError::Internal);
        }
        let protocol = kind.protocol();
        match protocol {
            Protocol::TwoPhaseCommit if participants.is_empty() => {
                return Err(DaoError::WrongParameter);
            }
            Protocol::ModifiedTwoPhaseCommit if participants.len() != 1 => {
                return Err(DaoError::WrongParameter);
            }
            // The chain discovers itself from the executor's answers.
            Protocol::OrderedExecution if !participants.is_empty() => {
                return Err(DaoError::WrongParameter);
            }
            _ => {}
        }
        if participants
            .iter()
            .any(|tree| tree.server.is_empty() || tree.subtree_entry == 0)
        {
            return Err(DaoError::WrongParameter);
        }

        let mut state = self.inner.state.lock();
        let deps = self.deps();

        let module = module_for(kind);
        if !state.queues.contains_key(&module) {
            warn!(%module, "no adapter registered for the operation's module");
            return Err(DaoError::Internal);
        }

        let id = self.inner.id_gen.next_id();
        state
            .journals
            .journal_for(subtree_entry)
            .map_err(map_journal_error)?
            .append_start(id, module, kind, payload)
            .map_err(|_| DaoError::LoggingFailed)?;

        let status = match protocol {
            Protocol::TwoPhaseCommit => Status::TpcCoordComputing,
            Protocol::ModifiedTwoPhaseCommit => Status::MtpcCoordComputing,
            Protocol::OrderedExecution => Status::OoeComputing,
        };
        let op = Op::new(
            id,
            kind,
            payload.to_vec(),
            status,
            Role::Coordinator,
            subtree_entry,
            participants,
            deps.now_ms + self.inner.config.overall_timeout_ms,
        );
        state.ops.insert(id, op);

        match protocol {
            Protocol::TwoPhaseCommit => tpc::start_coordinator(&mut state, &deps, id)?,
            Protocol::ModifiedTwoPhaseCommit => mtpc::start_coordinator(&mut state, &deps, id)?,
            Protocol::OrderedExecution => ooe::start_initiator(&mut state, &deps, id)?,
        }
        Ok(id)
    }

    /// Non-blocking executor answer intake; consumed by the event core.
    pub fn provide_operation_execution_result(&self, result: InResult) {
        let _ = self.inner.events_tx.send(EngineEvent::ExecResult(result));
    }

    /// Producer handle for a module's out-queue.
    pub fn queue_for(&self, module: Module) -> Result<mpsc::UnboundedSender<OutRequest>, DaoError> {
        self.inner
            .state
            .lock()
            .queues
            .get(&module)
            .cloned()
            .ok_or(DaoError::Internal)
    }

    /// Decode and take in one inbound transport message.
    pub fn handle_request(&self, sender: &str, bytes: &[u8]) -> Result<(), WireError> {
        let message = tl_wire::decode(bytes)?;
        self.handle_message(sender, message);
        Ok(())
    }

    /// Take in one already-decoded inbound message.
    pub fn handle_message(&self, sender: &str, message: Message) {
        let event = EngineEvent::Inbound { sender: sender.to_string(), message };
        if !self.recovery_done() {
            self.inner.deferred.lock().push(event);
            return;
        }
        let _ = self.inner.events_tx.send(event);
    }

    /// Conservative liveness check: any open operation on the subtree?
    pub fn open_operation_exists(&self, subtree_entry: InodeNumber) -> bool {
        self.inner
            .state
            .lock()
            .ops
            .values()
            .any(|op| op.subtree_entry == subtree_entry)
    }

    pub fn recovery_done(&self) -> bool {
        self.inner.recovery_done.load(Ordering::SeqCst)
    }

    /// Drain and dispatch every queued event; returns how many ran.
    ///
    /// The event-core task does this on every wakeup; tests call it
    /// directly for deterministic stepping.
    pub fn process_queued(&self) -> usize {
        let mut processed = 0;
        loop {
            let event = {
                let mut slot = self.inner.events_rx.lock();
                match slot.as_mut() {
                    Some(rx) => match rx.try_recv() {
                        Ok(event) => event,
                        Err(_) => break,
                    },
                    None => break,
                }
            };
            self.dispatch(event);
            processed += 1;
        }
        processed
    }

    /// Fire every due timeout now; returns how many fired.
    pub fn poll_timeouts(&self) -> usize {
        let due = {
            let mut state = self.inner.state.lock();
            state.scheduler.take_due(self.inner.clock.epoch_ms())
        };
        let fired = due.len();
        for entry in due {
            self.dispatch(EngineEvent::Timeout(entry));
        }
        fired
    }

    pub(crate) fn dispatch(&self, event: EngineEvent) {
        if !self.recovery_done() {
            if let EngineEvent::Inbound { .. } = event {
                self.inner.deferred.lock().push(event);
                return;
            }
        }
        let mut state = self.inner.state.lock();
        let deps = self.deps();
        match event {
            EngineEvent::Inbound { sender, message } => {
                let id = message.id;
                if let Err(e) = self.on_message(&mut state, &deps, &sender, message) {
                    self.on_transition_error(&mut state, &deps, id, Some(&sender), e);
                }
            }
            EngineEvent::ExecResult(result) => {
                let id = result.id;
                if let Err(e) = self.on_exec_result(&mut state, &deps, result) {
                    self.on_transition_error(&mut state, &deps, id, None, e);
                }
            }
            EngineEvent::Timeout(entry) => {
                let id = entry.id;
                if let Err(e) = timeout::on_timeout(&mut state, &deps, entry) {
                    self.on_transition_error(&mut state, &deps, id, None, e);
                }
            }
        }
    }

    pub(crate) fn take_events_rx(&self) -> Option<mpsc::UnboundedReceiver<EngineEvent>> {
        self.inner.events_rx.lock().take()
    }

    pub(crate) fn events_tx(&self) -> mpsc::UnboundedSender<EngineEvent> {
        self.inner.events_tx.clone()
    }

    pub(crate) fn clock(&self) -> &C {
        &self.inner.clock
    }

    pub(crate) fn config(&self) -> &DaoConfig {
        &self.inner.config
    }

    pub(crate) fn next_timeout_due_ms(&self) -> Option<u64> {
        self.inner.state.lock().scheduler.next_due_ms()
    }

    pub(crate) fn poll_due_entries(&self, now_ms: u64) -> Vec<crate::scheduler::TimeoutEntry> {
        self.inner.state.lock().scheduler.take_due(now_ms)
    }

    fn deps(&self) -> Deps<'_> {
        Deps {
            transport: &*self.inner.transport,
            config: &self.inner.config,
            now_ms: self.inner.clock.epoch_ms(),
        }
    }

    /// Route one inbound message to its transition.
    fn on_message(
        &self,
        state: &mut EngineState,
        deps: &Deps<'_>,
        sender: &str,
        message: Message,
    ) -> Result<(), DaoError> {
        let id = message.id;
        match message.body {
            MessageBody::TpcOpReq(op_req) => {
                self.start_participant(state, deps, sender, id, op_req, Protocol::TwoPhaseCommit)
            }
            MessageBody::MtpcOpReq(op_req) => self.start_participant(
                state,
                deps,
                sender,
                id,
                op_req,
                Protocol::ModifiedTwoPhaseCommit,
            ),
            MessageBody::OoeOpReq(op_req) => {
                self.start_participant(state, deps, sender, id, op_req, Protocol::OrderedExecution)
            }

            MessageBody::NotResponsible => failure::on_not_responsible(state, deps, id, sender),
            MessageBody::EventReRequest => failure::on_event_re_request(state, deps, id, sender),
            MessageBody::ContentRequest => failure::on_content_request(state, deps, id, sender),
            MessageBody::StatusRequest => failure::on_status_request(state, deps, id, sender),
            MessageBody::StatusResponse { status } => {
                failure::on_status_response(state, deps, id, sender, status)
            }
            MessageBody::ContentResponse { status, payload: _, participants } => {
                failure::on_content_response(state, deps, id, sender, status, participants)
            }

            body if state.op(id).is_none() => self.on_message_unknown_op(state, deps, sender, id, body),

            MessageBody::TpcVoteReq => tpc::on_vote_req(state, deps, id),
            MessageBody::TpcVoteYes => tpc::on_vote(state, deps, id, sender, true),
            MessageBody::TpcVoteNo => tpc::on_vote(state, deps, id, sender, false),
            MessageBody::TpcCommit => tpc::on_decision(state, deps, id, true),
            MessageBody::TpcAbort => tpc::on_decision(state, deps, id, false),
            MessageBody::TpcAck => tpc::on_ack(state, deps, id, sender),

            MessageBody::MtpcCommit => self.on_mtpc_commit(state, deps, id),
            MessageBody::MtpcAbort => self.on_mtpc_abort(state, deps, id),
            MessageBody::MtpcAck => mtpc::on_ack(state, deps, id),

            MessageBody::OoeAck => ooe::on_ack(state, deps, id),
            MessageBody::OoeAborted => ooe::on_aborted(state, deps, id),
        }
    }

    /// Protocol message for an id we do not hold: answer so the peer can
    /// make progress, or tell it we are not responsible.
    fn on_message_unknown_op(
        &self,
        state: &mut EngineState,
        deps: &Deps<'_>,
        sender: &str,
        id: OpId,
        body: MessageBody,
    ) -> Result<(), DaoError> {
        let finished = state.finished.contains_key(&id);
        match body {
            // The decision retransmit needs a fresh ack to close the peer.
            MessageBody::TpcCommit | MessageBody::TpcAbort if finished => {
                state.send(deps, sender, id, MessageBody::TpcAck);
                Ok(())
            }
            // Late closures carry no obligation.
            MessageBody::TpcAck
            | MessageBody::MtpcAck
            | MessageBody::OoeAck
            | MessageBody::OoeAborted
            | MessageBody::MtpcAbort
                if finished =>
            {
                Ok(())
            }
            _ if finished => {
                debug!(%id, sender, "message for finished operation, dropping");
                Ok(())
            }
            MessageBody::TpcAck => {
                // Boundary rule: a late ack is silently dropped.
                Ok(())
            }
            _ => {
                state.send(deps, sender, id, MessageBody::NotResponsible);
                Ok(())
            }
        }
    }

    /// `MtpcCommit` is only ever the participant's vote.
    fn on_mtpc_commit(
        &self,
        state: &mut EngineState,
        deps: &Deps<'_>,
        id: OpId,
    ) -> Result<(), DaoError> {
        let role = state.op(id).map(|op| op.role).ok_or(DaoError::OperationFinished)?;
        match role {
            Role::Coordinator => mtpc::on_vote(state, deps, id, true),
            Role::Participant => Err(DaoError::WrongEvent),
        }
    }

    /// `MtpcAbort` is the participant's no-vote at the coordinator and
    /// the coordinator's abort announcement at the participant.
    fn on_mtpc_abort(
        &self,
        state: &mut EngineState,
        deps: &Deps<'_>,
        id: OpId,
    ) -> Result<(), DaoError> {
        let role = state.op(id).map(|op| op.role).ok_or(DaoError::OperationFinished)?;
        match role {
            Role::Coordinator => mtpc::on_vote(state, deps, id, false),
            Role::Participant => mtpc::on_abort_decision(state, deps, id),
        }
    }

    /// Resolve an executor answer to its protocol event and run it.
    fn on_exec_result(
        &self,
        state: &mut EngineState,
        deps: &Deps<'_>,
        result: InResult,
    ) -> Result<(), DaoError> {
        use tl_core::ProtocolEvent as E;

        let id = result.id;
        let Some(op) = state.op(id) else {
            debug!(%id, "executor result for unknown operation, dropping");
            return Ok(());
        };
        let event = match (op.protocol, result.status) {
            (Protocol::TwoPhaseCommit, ExecStatus::ExecOk) => {
                if op.status == Status::TpcCoordComputing {
                    E::TpcCoordExecOk
                } else {
                    E::TpcPartExecOk
                }
            }
            (Protocol::TwoPhaseCommit, ExecStatus::ExecFail) => {
                if op.status == Status::TpcCoordComputing {
                    E::TpcCoordExecFail
                } else {
                    E::TpcPartExecFail
                }
            }
            (Protocol::TwoPhaseCommit, _) => E::TpcUndone,
            (Protocol::ModifiedTwoPhaseCommit, ExecStatus::ExecOk) => {
                if op.role == Role::Coordinator {
                    E::MtpcCoordExecOk
                } else {
                    E::MtpcPartExecOk
                }
            }
            (Protocol::ModifiedTwoPhaseCommit, ExecStatus::ExecFail) => {
                if op.role == Role::Coordinator {
                    E::MtpcCoordExecFail
                } else {
                    E::MtpcPartExecFail
                }
            }
            (Protocol::ModifiedTwoPhaseCommit, _) => E::MtpcUndone,
            (Protocol::OrderedExecution, ExecStatus::ExecOk) => {
                match &result.next_participant {
                    Some(next) if !next.is_end_of_chain() => E::OoeExecOk,
                    _ => E::OoeLastExecOk,
                }
            }
            (Protocol::OrderedExecution, ExecStatus::ExecFail) => E::OoeExecFail,
            (Protocol::OrderedExecution, _) => E::OoeUndone,
        };
        let undo_ok = result.status == ExecStatus::UndoOk;
        debug!(%id, ?event, "executor result resolved");

        match event {
            E::TpcCoordExecOk | E::TpcPartExecOk => tpc::on_exec(state, deps, id, true),
            E::TpcCoordExecFail | E::TpcPartExecFail => tpc::on_exec(state, deps, id, false),
            E::TpcUndone => tpc::on_undone(state, deps, id, undo_ok),
            E::MtpcCoordExecOk | E::MtpcPartExecOk => mtpc::on_exec(state, deps, id, true),
            E::MtpcCoordExecFail | E::MtpcPartExecFail => mtpc::on_exec(state, deps, id, false),
            E::MtpcUndone => mtpc::on_undone(state, deps, id, undo_ok),
            E::OoeExecOk | E::OoeLastExecOk => {
                ooe::on_exec(state, deps, id, true, result.next_participant)
            }
            E::OoeExecFail => ooe::on_exec(state, deps, id, false, result.next_participant),
            E::OoeUndone => ooe::on_undone(state, deps, id, undo_ok),
            // Message-borne events never originate from the executor.
            _ => Err(DaoError::WrongEvent),
        }
    }

    /// Create the participant-side row for an inbound operation request.
    fn start_participant(
        &self,
        state: &mut EngineState,
        deps: &Deps<'_>,
        sender: &str,
        id: OpId,
        op_req: OpReq,
        protocol: Protocol,
    ) -> Result<(), DaoError> {
        if let Some(op) = state.op_mut(id) {
            // Coordinator retransmit; execution is already in flight. A
            // matching entry under a new address means the peer's subtree
            // moved since the first request.
            let incoming = Subtree::new(sender, op_req.coordinator_entry);
            if let Some(stored) = op.participants.first_mut() {
                if stored.mismatch(&incoming) == Some(tl_core::SubtreeMismatch::ServerAddress) {
                    debug!(%id, sender, "coordinator moved, updating its address");
                    stored.server = incoming.server;
                }
            }
            debug!(%id, sender, "duplicate operation request, dropping");
            return Ok(());
        }
        if state.finished.contains_key(&id) {
            return failure::answer_for_finished(state, deps, id, sender);
        }
        if op_req.kind.protocol() != protocol {
            warn!(%id, sender, kind = ?op_req.kind, "operation kind does not fit the protocol");
            return Err(DaoError::WrongParameter);
        }

        let module = module_for(op_req.kind);
        if !state.queues.contains_key(&module) {
            warn!(%id, %module, "no adapter registered for inbound operation");
            return Err(DaoError::Internal);
        }

        let subtree_entry = op_req.participant_entry;
        state
            .journals
            .create_subtree_journal(subtree_entry)
            .map_err(map_journal_error)?
            .append_start(id, module, op_req.kind, &op_req.payload)
            .map_err(|_| DaoError::LoggingFailed)?;

        let status = match protocol {
            Protocol::TwoPhaseCommit => Status::TpcPartComputing,
            Protocol::ModifiedTwoPhaseCommit => Status::MtpcPartComputing,
            Protocol::OrderedExecution => Status::OoeComputing,
        };
        let op = Op::new(
            id,
            op_req.kind,
            op_req.payload,
            status,
            Role::Participant,
            subtree_entry,
            vec![Subtree::new(sender, op_req.coordinator_entry)],
            deps.now_ms + self.inner.config.overall_timeout_ms,
        );
        state.ops.insert(id, op);
        state.forward(id, RequestTag::Execute)?;
        state.arm_step(deps, id);
        state.arm_overall(id);
        Ok(())
    }

    /// Transition error policy: wrong events ask the sender to repeat,
    /// logging failures retry through the timeout path, the rest only log.
    fn on_transition_error(
        &self,
        state: &mut EngineState,
        deps: &Deps<'_>,
        id: OpId,
        sender: Option<&str>,
        error: DaoError,
    ) {
        match error {
            DaoError::WrongEvent => {
                if let Some(sender) = sender {
                    debug!(%id, sender, "event does not fit, asking for a repeat");
                    state.send(deps, sender, id, MessageBody::EventReRequest);
                }
            }
            DaoError::OperationFinished => {
                debug!(%id, "event for finished operation, dropping");
            }
            DaoError::LoggingFailed => {
                warn!(%id, "transition rolled back on logging failure, arming retry");
                state.arm_step_attempt(deps, id, 1);
            }
            other => {
                warn!(%id, error = %other, "transition failed");
            }
        }
    }
}

impl<C: Clock> ResultSink for Engine<C> {
    fn provide_result(&self, result: InResult) {
        self.provide_operation_execution_result(result);
    }
}

/// Test-support surface: deterministic state injection and inspection.
#[cfg(any(test, feature = "test-support"))]
impl<C: Clock> Engine<C> {
    /// Install a bare out-queue for a module, without an adapter pump.
    /// The test drains the receiver and plays executor itself.
    pub fn register_queue(&self, module: Module) -> mpsc::UnboundedReceiver<OutRequest> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.state.lock().queues.insert(module, tx);
        rx
    }

    /// Install adapter hooks for recovery without a pump task.
    pub fn set_adapter_hooks(&self, module: Module, adapter: Arc<dyn DaoAdapter>) {
        self.inner.state.lock().adapters.insert(module, adapter);
    }

    /// Insert a fully formed operation row, bypassing the start paths.
    pub fn inject_op(&self, op: Op) {
        self.inner.state.lock().ops.insert(op.id, op);
    }

    pub fn op_status(&self, id: OpId) -> Option<Status> {
        self.inner.state.lock().ops.get(&id).map(|op| op.status)
    }

    pub fn op_exists(&self, id: OpId) -> bool {
        self.inner.state.lock().ops.contains_key(&id)
    }

    pub fn finished_decision(&self, id: OpId) -> Option<(Protocol, bool)> {
        self.inner.state.lock().finished.get(&id).copied()
    }

    pub fn with_journals<T>(&self, f: impl FnOnce(&mut JournalManager) -> T) -> T {
        f(&mut self.inner.state.lock().journals)
    }
}

fn module_for(kind: OperationKind) -> Module {
    match kind {
        OperationKind::ChangePartitionOwnership
        | OperationKind::MoveSubtree
        | OperationKind::OrderedBalanceProbe => Module::LoadBalancing,
        OperationKind::Rename | OperationKind::SetAttr | OperationKind::OrderedProbe => {
            Module::Metadata
        }
    }
}
