// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Length-checked encoder and decoder for protocol messages.
//!
//! Body layout (all integers little-endian):
//!
//! ```text
//! header           [u8 kind][u64 operation_id]
//! *OpReq           [u8 type][u64 participant_entry][u64 coordinator_entry]
//!                  [u32 payload_len][payload…]
//! ContentResponse  [u8 status][u32 payload_len][payload…][u16 n]
//!                  n × ([u64 subtree_entry][u16 server_len][server…])
//! StatusResponse   [u8 status]
//! everything else  no extra fields
//! ```

use crate::message::{Message, MessageBody, MessageKind, OpReq};
use crate::WireError;
use tl_core::{OpId, OperationKind, Status, Subtree};

/// Encode a message into its byte form (unframed).
pub fn encode(message: &Message) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16);
    buf.push(message.kind().as_u8());
    buf.extend_from_slice(&message.id.as_u64().to_le_bytes());

    match &message.body {
        MessageBody::TpcOpReq(op) | MessageBody::MtpcOpReq(op) | MessageBody::OoeOpReq(op) => {
            encode_op_req(&mut buf, op);
        }
        MessageBody::ContentResponse { status, payload, participants } => {
            buf.push(status.as_u8());
            buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            buf.extend_from_slice(payload);
            buf.extend_from_slice(&(participants.len() as u16).to_le_bytes());
            for tree in participants {
                buf.extend_from_slice(&tree.subtree_entry.to_le_bytes());
                buf.extend_from_slice(&(tree.server.len() as u16).to_le_bytes());
                buf.extend_from_slice(tree.server.as_bytes());
            }
        }
        MessageBody::StatusResponse { status } => buf.push(status.as_u8()),
        // The remaining kinds are self-describing: header only.
        _ => {}
    }
    buf
}

fn encode_op_req(buf: &mut Vec<u8>, op: &OpReq) {
    buf.push(op.kind.as_u8());
    buf.extend_from_slice(&op.participant_entry.to_le_bytes());
    buf.extend_from_slice(&op.coordinator_entry.to_le_bytes());
    buf.extend_from_slice(&(op.payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&op.payload);
}

/// Decode a message from its byte form, validating every declared length.
pub fn decode(bytes: &[u8]) -> Result<Message, WireError> {
    let mut reader = Reader::new(bytes);
    let kind_byte = reader.u8()?;
    let kind = MessageKind::from_u8(kind_byte).ok_or(WireError::UnknownKind(kind_byte))?;
    let id = OpId(reader.u64()?);

    let body = match kind {
        MessageKind::TpcOpReq => MessageBody::TpcOpReq(decode_op_req(&mut reader)?),
        MessageKind::MtpcOpReq => MessageBody::MtpcOpReq(decode_op_req(&mut reader)?),
        MessageKind::OoeOpReq => MessageBody::OoeOpReq(decode_op_req(&mut reader)?),
        MessageKind::TpcVoteReq => MessageBody::TpcVoteReq,
        MessageKind::TpcVoteYes => MessageBody::TpcVoteYes,
        MessageKind::TpcVoteNo => MessageBody::TpcVoteNo,
        MessageKind::TpcCommit => MessageBody::TpcCommit,
        MessageKind::TpcAbort => MessageBody::TpcAbort,
        MessageKind::TpcAck => MessageBody::TpcAck,
        MessageKind::MtpcCommit => MessageBody::MtpcCommit,
        MessageKind::MtpcAbort => MessageBody::MtpcAbort,
        MessageKind::MtpcAck => MessageBody::MtpcAck,
        MessageKind::OoeAck => MessageBody::OoeAck,
        MessageKind::OoeAborted => MessageBody::OoeAborted,
        MessageKind::NotResponsible => MessageBody::NotResponsible,
        MessageKind::EventReRequest => MessageBody::EventReRequest,
        MessageKind::ContentRequest => MessageBody::ContentRequest,
        MessageKind::StatusRequest => MessageBody::StatusRequest,
        MessageKind::ContentResponse => {
            let status = decode_status(&mut reader)?;
            let payload_len = reader.u32()?;
            let payload = reader.bytes(payload_len as usize)?.to_vec();
            let n = reader.u16()?;
            let mut participants = Vec::with_capacity(n as usize);
            for _ in 0..n {
                let subtree_entry = reader.u64()?;
                let server_len = reader.u16()?;
                let server = std::str::from_utf8(reader.bytes(server_len as usize)?)
                    .map_err(|_| WireError::BadServerAddress)?
                    .to_string();
                participants.push(Subtree { server, subtree_entry });
            }
            MessageBody::ContentResponse { status, payload, participants }
        }
        MessageKind::StatusResponse => {
            MessageBody::StatusResponse { status: decode_status(&mut reader)? }
        }
    };

    reader.finish()?;
    Ok(Message { id, body })
}

fn decode_op_req(reader: &mut Reader<'_>) -> Result<OpReq, WireError> {
    let type_byte = reader.u8()?;
    let kind = OperationKind::from_u8(type_byte)
        .ok_or(WireError::UnknownOperationKind(type_byte))?;
    let participant_entry = reader.u64()?;
    let coordinator_entry = reader.u64()?;
    if participant_entry == 0 {
        return Err(WireError::ZeroSubtreeEntry);
    }
    let declared = reader.u32()?;
    if reader.remaining() != declared as usize {
        return Err(WireError::PayloadLengthMismatch {
            declared,
            actual: reader.remaining(),
        });
    }
    let payload = reader.bytes(declared as usize)?.to_vec();
    Ok(OpReq { kind, participant_entry, coordinator_entry, payload })
}

fn decode_status(reader: &mut Reader<'_>) -> Result<Status, WireError> {
    let raw = reader.u8()?;
    Status::from_u8(raw).ok_or(WireError::UnknownStatus(raw))
}

/// Cursor over a byte slice that never reads past the end.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < n {
            return Err(WireError::Truncated { need: n - self.remaining() });
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, WireError> {
        Ok(self.bytes(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, WireError> {
        let raw = self.bytes(2)?;
        Ok(u16::from_le_bytes([raw[0], raw[1]]))
    }

    fn u32(&mut self) -> Result<u32, WireError> {
        let raw = self.bytes(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn u64(&mut self) -> Result<u64, WireError> {
        let raw = self.bytes(8)?;
        let mut out = [0u8; 8];
        out.copy_from_slice(raw);
        Ok(u64::from_le_bytes(out))
    }

    /// Every byte must be consumed; trailing garbage is rejected.
    fn finish(self) -> Result<(), WireError> {
        if self.remaining() > 0 {
            return Err(WireError::TrailingBytes { count: self.remaining() });
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "codec_tests.rs"]
mod tests;
