// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! tl-wire: Binary protocol for distributed atomic operation messages.
//!
//! Wire format: 4-byte length prefix (big-endian) framing a message whose
//! body is `[u8 kind][u64 operation_id]` followed by kind-specific fields.
//! All body integers are little-endian; see the codec module for the field
//! tables.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod codec;
mod frame;
mod message;

pub use codec::{decode, encode};
pub use frame::{read_message, write_message, MAX_MESSAGE_LEN};
pub use message::{Message, MessageBody, MessageKind, OpReq};

use thiserror::Error;

/// Errors produced while encoding, decoding, or framing messages.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("message truncated: needed {need} more bytes")]
    Truncated { need: usize },

    #[error("{count} trailing bytes after message end")]
    TrailingBytes { count: usize },

    #[error("unknown message kind {0:#04x}")]
    UnknownKind(u8),

    #[error("unknown operation type {0:#04x}")]
    UnknownOperationKind(u8),

    #[error("unknown status byte {0:#04x}")]
    UnknownStatus(u8),

    #[error("subtree entry of zero is not valid on the wire")]
    ZeroSubtreeEntry,

    #[error("declared payload length {declared} does not match {actual} trailing bytes")]
    PayloadLengthMismatch { declared: u32, actual: usize },

    #[error("message of {0} bytes exceeds the frame limit")]
    FrameTooLarge(usize),

    #[error("frame io error: {0}")]
    Io(String),

    #[error("server address is not valid UTF-8")]
    BadServerAddress,
}
