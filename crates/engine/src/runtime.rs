// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background tasks: the event core and the timeout watcher.

use crate::engine::Engine;
use crate::scheduler::TimeoutEntry;
use std::time::Duration;
use tl_core::{Clock, InResult};
use tl_wire::Message;
use tokio::task::JoinHandle;
use tracing::info;

/// One stimulus consumed under the state mutex.
#[derive(Debug)]
pub enum EngineEvent {
    /// Inbound wire message from a peer engine.
    Inbound { sender: String, message: Message },
    /// Executor answer from an adapter.
    ExecResult(InResult),
    /// A deadline fired.
    Timeout(TimeoutEntry),
}

/// Handles of the engine's background tasks.
pub struct EngineTasks {
    event_task: JoinHandle<()>,
    timeout_task: JoinHandle<()>,
}

impl EngineTasks {
    /// Stop both loops. Unfinished operations stay journaled for the
    /// next recovery.
    pub fn shutdown(self) {
        self.event_task.abort();
        self.timeout_task.abort();
        info!("engine tasks stopped");
    }
}

impl<C: Clock> Engine<C> {
    /// Spawn the event-core and timeout tasks. Call after `do_recovery`.
    ///
    /// The event receiver moves into the event task; deterministic
    /// stepping via `process_queued` is unavailable afterwards.
    pub fn start(&self) -> EngineTasks {
        let event_engine = self.clone();
        let events_rx = self.take_events_rx();
        let event_task = tokio::spawn(async move {
            let Some(mut events_rx) = events_rx else {
                tracing::error!("engine tasks already started once, event loop not running");
                return;
            };
            while let Some(event) = events_rx.recv().await {
                event_engine.dispatch(event);
            }
        });

        let timeout_engine = self.clone();
        let timeout_task = tokio::spawn(async move {
            timeout_engine.timeout_loop().await;
        });

        EngineTasks { event_task, timeout_task }
    }

    /// Sleep until the next deadline (bounded by `min_sleep_ms`), then
    /// post every due entry onto the event queue.
    async fn timeout_loop(&self) {
        let min_sleep = self.config().min_sleep();
        loop {
            let now_ms = self.clock().epoch_ms();
            let due = {
                // Short critical section: pop, never handle, under lock.
                self.poll_due_entries(now_ms)
            };
            let events = self.events_tx();
            for entry in due {
                let _ = events.send(EngineEvent::Timeout(entry));
            }

            let sleep_for = match self.next_timeout_due_ms() {
                Some(due_ms) => {
                    Duration::from_millis(due_ms.saturating_sub(now_ms).max(10)).min(min_sleep)
                }
                None => min_sleep,
            };
            tokio::time::sleep(sleep_for).await;
        }
    }
}
