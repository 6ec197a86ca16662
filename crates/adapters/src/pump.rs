// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The per-module pump task: out-queue consumer, hook caller, result
//! producer.

use crate::adapter::{DaoAdapter, ResultSink};
use std::sync::Arc;
use tl_core::{
    ExecStatus, InResult, Module, OutBody, OutRequest, Protocol, RequestTag, Subtree,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Consume the module's out-queue until the engine drops its sender.
///
/// Single consumer per queue; requests are handled strictly in FIFO
/// order so an executor never sees an undo before the execute it undoes.
pub(crate) async fn run<A: DaoAdapter>(
    module: Module,
    adapter: Arc<A>,
    mut queue: mpsc::UnboundedReceiver<OutRequest>,
    sink: Arc<dyn ResultSink>,
) {
    while let Some(request) = queue.recv().await {
        handle_request(module, adapter.as_ref(), request, sink.as_ref()).await;
    }
    debug!(%module, "adapter queue closed, pump exiting");
}

async fn handle_request<A: DaoAdapter>(
    module: Module,
    adapter: &A,
    request: OutRequest,
    sink: &dyn ResultSink,
) {
    let id = request.id;
    match request.body {
        OutBody::ClientResponse { success } => {
            debug!(%id, %module, success, "delivering operation result");
            adapter.handle_operation_result(id, success).await;
        }
        OutBody::Request { tag, payload } => {
            let ok = match tag {
                RequestTag::Execute => adapter.handle_operation_request(id, &payload).await,
                RequestTag::Redo => adapter.handle_operation_rerequest(id, &payload).await,
                RequestTag::Undo => adapter.handle_operation_undo_request(id, &payload).await,
                RequestTag::Reundo => adapter.handle_operation_reundo_request(id, &payload).await,
            };
            if !ok {
                warn!(%id, %module, ?tag, "executor reported failure");
            }

            let status = match (tag, ok) {
                (RequestTag::Execute | RequestTag::Redo, true) => ExecStatus::ExecOk,
                (RequestTag::Execute | RequestTag::Redo, false) => ExecStatus::ExecFail,
                (RequestTag::Undo | RequestTag::Reundo, true) => ExecStatus::UndoOk,
                (RequestTag::Undo | RequestTag::Reundo, false) => ExecStatus::UndoFail,
            };

            let next = next_for(adapter, request.protocol, tag, ok, &payload);
            sink.provide_result(InResult { id, status, next_participant: next });
        }
    }
}

/// Ordered chains learn their successor from the executor alongside a
/// successful execution.
fn next_for<A: DaoAdapter>(
    adapter: &A,
    protocol: Protocol,
    tag: RequestTag,
    ok: bool,
    payload: &[u8],
) -> Option<Subtree> {
    if protocol != Protocol::OrderedExecution {
        return None;
    }
    if !matches!(tag, RequestTag::Execute | RequestTag::Redo) || !ok {
        return None;
    }
    Some(adapter.next_participant(payload))
}
