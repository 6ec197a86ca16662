// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Length-prefix framing over an async byte stream.

use crate::WireError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on one framed message. Operation payloads are metadata
/// descriptions, not file data; anything bigger is a protocol violation.
pub const MAX_MESSAGE_LEN: usize = 4 * 1024 * 1024;

/// Write `bytes` with a 4-byte big-endian length prefix.
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    bytes: &[u8],
) -> Result<(), WireError> {
    if bytes.len() > MAX_MESSAGE_LEN {
        return Err(WireError::FrameTooLarge(bytes.len()));
    }
    writer
        .write_all(&(bytes.len() as u32).to_be_bytes())
        .await
        .map_err(io_err)?;
    writer.write_all(bytes).await.map_err(io_err)?;
    writer.flush().await.map_err(io_err)?;
    Ok(())
}

/// Read one length-prefixed message.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, WireError> {
    let mut prefix = [0u8; 4];
    reader.read_exact(&mut prefix).await.map_err(io_err)?;
    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_MESSAGE_LEN {
        return Err(WireError::FrameTooLarge(len));
    }
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes).await.map_err(io_err)?;
    Ok(bytes)
}

fn io_err(e: std::io::Error) -> WireError {
    WireError::Io(e.to_string())
}

#[cfg(test)]
#[path = "frame_tests.rs"]
mod tests;
