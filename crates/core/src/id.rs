// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operation id generation abstractions

use crate::op::OpId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Generates globally unique operation ids.
///
/// The coordinator allocates one id per started operation; ids must never
/// collide across servers, and `0` is reserved as the failure sentinel of
/// `start_da_operation`.
pub trait OpIdGen: Send + Sync + 'static {
    fn next_id(&self) -> OpId;
}

/// Random ids folded from UUIDv4; the production generator.
#[derive(Debug, Clone, Default)]
pub struct UuidOpIdGen;

impl OpIdGen for UuidOpIdGen {
    fn next_id(&self) -> OpId {
        loop {
            let (hi, lo) = uuid::Uuid::new_v4().as_u64_pair();
            let id = hi ^ lo;
            // 0 means "start failed" to callers.
            if id != 0 {
                return OpId(id);
            }
        }
    }
}

/// Sequential ids for deterministic tests.
#[derive(Debug, Clone)]
pub struct SeqOpIdGen {
    next: Arc<AtomicU64>,
}

impl SeqOpIdGen {
    pub fn starting_at(first: u64) -> Self {
        Self { next: Arc::new(AtomicU64::new(first.max(1))) }
    }
}

impl Default for SeqOpIdGen {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

impl OpIdGen for SeqOpIdGen {
    fn next_id(&self) -> OpId {
        OpId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl<G: OpIdGen> OpIdGen for Arc<G> {
    fn next_id(&self) -> OpId {
        (**self).next_id()
    }
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
