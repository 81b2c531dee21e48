//! Shard task envelope
//!
//! Shard tasks are copied, never shared, when they cross a member boundary.
//! This module defines the envelope that carries a task to a member and the
//! framing used to turn it into bytes. The encoding is MessagePack
//! (rmp-serde), the same encoding the registry uses for reports.
//!
//! # Framing
//!
//! Each envelope is prefixed with a 4-byte length field (little-endian u32):
//!
//! ```text
//! [4 bytes: envelope length][N bytes: MessagePack-encoded envelope]
//! ```

use crate::cluster::MemberId;
use crate::error::{Error, Result};
use crate::model::ShardTask;
use serde::{Deserialize, Serialize};

/// Envelope version
///
/// Sender and receiver must agree on this value.
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest envelope accepted by [`decode_envelope`] (16MB)
pub const MAX_ENVELOPE_BYTES: usize = 16 * 1024 * 1024;

/// A shard task addressed to one member.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskEnvelope {
    pub protocol_version: u32,

    /// Member the task was submitted to
    pub member: MemberId,

    pub task: ShardTask,
}

impl TaskEnvelope {
    pub fn new(member: MemberId, task: ShardTask) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            member,
            task,
        }
    }
}

/// Encode an envelope with its length prefix.
pub fn encode_envelope(envelope: &TaskEnvelope) -> Result<Vec<u8>> {
    let body = rmp_serde::to_vec_named(envelope)?;

    let len = u32::try_from(body.len())
        .map_err(|_| Error::dispatch(format!("envelope too large: {} bytes", body.len())))?;
    let mut framed = Vec::with_capacity(4 + body.len());
    framed.extend_from_slice(&len.to_le_bytes());
    framed.extend_from_slice(&body);

    Ok(framed)
}

/// Decode a length-prefixed envelope.
///
/// Returns (envelope, bytes_consumed) where bytes_consumed includes the prefix.
pub fn decode_envelope(buf: &[u8]) -> Result<(TaskEnvelope, usize)> {
    if buf.len() < 4 {
        return Err(Error::dispatch(format!(
            "buffer too small for envelope length (need 4 bytes, got {})",
            buf.len()
        )));
    }

    let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len > MAX_ENVELOPE_BYTES {
        return Err(Error::dispatch(format!("envelope too large: {} bytes", len)));
    }
    if buf.len() < 4 + len {
        return Err(Error::dispatch(format!(
            "incomplete envelope (need {} bytes, got {})",
            4 + len,
            buf.len()
        )));
    }

    let envelope: TaskEnvelope = rmp_serde::from_slice(&buf[4..4 + len])?;
    if envelope.protocol_version != PROTOCOL_VERSION {
        return Err(Error::dispatch(format!(
            "protocol version mismatch: expected {}, got {}",
            PROTOCOL_VERSION, envelope.protocol_version
        )));
    }

    Ok((envelope, 4 + len))
}
