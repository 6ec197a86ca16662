// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Adapter registration and out-queue ownership.

use crate::adapter::{DaoAdapter, ResultSink};
use crate::pump;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tl_core::{Module, OutRequest};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("module {0} already has an adapter")]
    AlreadyRegistered(Module),

    #[error("module {0} has no adapter")]
    NotRegistered(Module),
}

struct Registration {
    queue: mpsc::UnboundedSender<OutRequest>,
    pump: JoinHandle<()>,
}

/// Holds at most one adapter per executor module.
///
/// Registration creates the module's out-queue and spawns its pump task.
/// Dropping the registry closes every queue, which ends the pumps.
#[derive(Default)]
pub struct AdapterRegistry {
    registrations: HashMap<Module, Registration>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `adapter` to `module` and start consuming its queue.
    pub fn register<A: DaoAdapter>(
        &mut self,
        module: Module,
        adapter: Arc<A>,
        sink: Arc<dyn ResultSink>,
    ) -> Result<(), RegistryError> {
        if self.registrations.contains_key(&module) {
            return Err(RegistryError::AlreadyRegistered(module));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let pump = tokio::spawn(pump::run(module, adapter, rx, sink));
        self.registrations.insert(module, Registration { queue: tx, pump });
        info!(%module, "adapter registered");
        Ok(())
    }

    /// Producer handle for the module's out-queue.
    pub fn queue_for(
        &self,
        module: Module,
    ) -> Result<mpsc::UnboundedSender<OutRequest>, RegistryError> {
        self.registrations
            .get(&module)
            .map(|r| r.queue.clone())
            .ok_or(RegistryError::NotRegistered(module))
    }

    pub fn is_registered(&self, module: Module) -> bool {
        self.registrations.contains_key(&module)
    }

    /// Close every queue and wait for the pumps to drain.
    pub async fn shutdown(mut self) {
        let registrations = std::mem::take(&mut self.registrations);
        for (_, registration) in registrations {
            drop(registration.queue);
            let _ = registration.pump.await;
        }
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
