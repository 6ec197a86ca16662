// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transport contract between engines on different servers.
//!
//! The engine hands every outbound message to a [`Transport`] while the
//! state mutex is held, so sends must be buffered and non-blocking; the
//! socket layer drains the buffer on its own tasks. Inbound messages
//! arrive through `Engine::handle_request`.

use tl_core::DaoError;
use tl_wire::Message;

/// Buffered, non-blocking message sending to named peers.
pub trait Transport: Send + Sync + 'static {
    /// Address other servers reach this engine under.
    fn local_address(&self) -> &str;

    /// Queue `message` for delivery to `to`. An error means the peer is
    /// not reachable right now; the step timeout drives the retry.
    fn send(&self, to: &str, message: &Message) -> Result<(), DaoError>;
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::{Delivery, FakeNetwork, FakeTransport};

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::Transport;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::sync::Arc;
    use tl_core::DaoError;
    use tl_wire::Message;

    /// One message in flight between two fake endpoints.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Delivery {
        pub from: String,
        pub to: String,
        pub message: Message,
    }

    /// In-memory message switch for tests.
    ///
    /// Sends append to a pending queue the test drains and routes itself,
    /// which makes loss, reordering, and partition scenarios trivial to
    /// script. Every send is also kept in a log for assertions.
    #[derive(Default)]
    pub struct FakeNetwork {
        pending: Mutex<Vec<Delivery>>,
        log: Mutex<Vec<Delivery>>,
        down: Mutex<HashSet<String>>,
    }

    impl FakeNetwork {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Transport bound to `address` on this network.
        pub fn transport(self: &Arc<Self>, address: impl Into<String>) -> Arc<FakeTransport> {
            Arc::new(FakeTransport { address: address.into(), network: Arc::clone(self) })
        }

        /// Take every in-flight delivery, in send order.
        pub fn drain(&self) -> Vec<Delivery> {
            std::mem::take(&mut self.pending.lock())
        }

        /// Copy of every message ever sent.
        pub fn log(&self) -> Vec<Delivery> {
            self.log.lock().clone()
        }

        /// Messages sent to `to`, from the full log.
        pub fn sent_to(&self, to: &str) -> Vec<Message> {
            self.log
                .lock()
                .iter()
                .filter(|d| d.to == to)
                .map(|d| d.message.clone())
                .collect()
        }

        /// Make sends to `address` fail until it is brought back up.
        pub fn take_down(&self, address: &str) {
            self.down.lock().insert(address.to_string());
        }

        pub fn bring_up(&self, address: &str) {
            self.down.lock().remove(address);
        }
    }

    /// Fake endpoint handed to an engine.
    pub struct FakeTransport {
        address: String,
        network: Arc<FakeNetwork>,
    }

    impl Transport for FakeTransport {
        fn local_address(&self) -> &str {
            &self.address
        }

        fn send(&self, to: &str, message: &Message) -> Result<(), DaoError> {
            if self.network.down.lock().contains(to) {
                return Err(DaoError::SendingFailed { peer: to.to_string() });
            }
            let delivery = Delivery {
                from: self.address.clone(),
                to: to.to_string(),
                message: message.clone(),
            };
            self.network.log.lock().push(delivery.clone());
            self.network.pending.lock().push(delivery);
            Ok(())
        }
    }
}
