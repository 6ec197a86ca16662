// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! tl-engine: The distributed atomic operation engine.
//!
//! Coordinates multi-server metadata mutations over three commit
//! protocols (two-phase commit, modified two-phase commit with a single
//! write-participant, and ordered operation execution), persists their
//! progress in per-subtree journals, delivers execution requests to the
//! registered executor modules, and reconstructs every in-flight
//! operation after a crash.
//!
//! One engine exists per server. Every state transition (inbound wire
//! message, executor result, or fired timeout) runs under a single state
//! mutex, so events for one operation are totally ordered.

mod engine;
mod recovery;
mod runtime;
mod scheduler;
mod state;
mod timeout;
mod transition;
pub mod transport;

pub use engine::Engine;
pub use runtime::{EngineEvent, EngineTasks};
pub use scheduler::{TimeoutKind, TimeoutScheduler, TimeoutEntry};
pub use transport::Transport;

#[cfg(any(test, feature = "test-support"))]
pub use transport::{Delivery, FakeNetwork, FakeTransport};

#[cfg(test)]
mod runtime_tests;
