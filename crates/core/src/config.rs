// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine configuration.

use serde::Deserialize;
use std::time::Duration;

/// Timeout configuration for the distributed atomic operation engine.
///
/// Loadable from the `[dao]` table of the server configuration file; every
/// field has a default so an empty table is valid.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaoConfig {
    /// Per-step timeout for two-phase commit, in milliseconds.
    pub tpc_step_timeout_ms: u64,
    /// Per-step timeout for modified two-phase commit, in milliseconds.
    pub mtpc_step_timeout_ms: u64,
    /// Per-step timeout for ordered operation execution, in milliseconds.
    pub ooe_step_timeout_ms: u64,
    /// End-to-end deadline for a whole operation, in milliseconds.
    pub overall_timeout_ms: u64,
    /// Lower bound on the timeout task's sleep when no deadline is close.
    pub min_sleep_ms: u64,
}

impl Default for DaoConfig {
    fn default() -> Self {
        Self {
            tpc_step_timeout_ms: 3000,
            mtpc_step_timeout_ms: 3000,
            ooe_step_timeout_ms: 3000,
            overall_timeout_ms: 60_000,
            min_sleep_ms: 1000,
        }
    }
}

impl DaoConfig {
    /// Parse from a TOML document.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Step timeout for the given protocol.
    pub fn step_timeout(&self, protocol: crate::op::Protocol) -> Duration {
        use crate::op::Protocol::*;
        let ms = match protocol {
            TwoPhaseCommit => self.tpc_step_timeout_ms,
            ModifiedTwoPhaseCommit => self.mtpc_step_timeout_ms,
            OrderedExecution => self.ooe_step_timeout_ms,
        };
        Duration::from_millis(ms)
    }

    pub fn min_sleep(&self) -> Duration {
        Duration::from_millis(self.min_sleep_ms)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
