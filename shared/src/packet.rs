//! Length-framed packets over a byte stream.
//!
//! Wire layout of one frame:
//!
//! ```text
//! +-------------+--------------+-----------+-------------+
//! | HEADER (2B) | LENGTH (2B)  | PAYLOAD   | FOOTER (2B) |
//! | 0x1EE7 LE   | total, BE    | opaque    | 0x7EE1 LE   |
//! +-------------+--------------+-----------+-------------+
//! ```
//!
//! `LENGTH` counts the whole frame, header and footer included. Receiving
//! scans byte by byte for the header so that a stream corrupted by a stray
//! or missing byte resynchronises on the next frame. When a frame cannot be
//! read, the error hands back every byte consumed so far so the caller can
//! inspect what actually arrived.

use log::debug;
use std::io::{self, ErrorKind, Read, Write};
use thiserror::Error;

pub const HEADER: [u8; 2] = 0x1EE7u16.to_le_bytes();
pub const FOOTER: [u8; 2] = 0x7EE1u16.to_le_bytes();

/// Bytes of framing around every payload (header, length, footer).
pub const FRAME_OVERHEAD: usize = HEADER.len() + 2 + FOOTER.len();

/// Largest frame the 2-byte length field can describe.
pub const MAX_PACKET_SIZE: usize = u16::MAX as usize;

pub const MAX_PAYLOAD_SIZE: usize = MAX_PACKET_SIZE - FRAME_OVERHEAD;

/// Header scan restarts tolerated before a receive gives up.
pub const DEFAULT_RESYNC_ATTEMPTS: usize = 10;

#[derive(Debug, Error)]
pub enum PacketError {
    /// Outgoing frame would not fit the length field. Nothing was written.
    #[error("packet length was too long ({length} > {MAX_PACKET_SIZE})")]
    Oversized { length: usize },
    /// Incoming bytes did not form a valid frame.
    #[error("{reason} ({} bytes skipped)", skipped.len())]
    Framing {
        reason: &'static str,
        skipped: Vec<u8>,
    },
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
}

impl PacketError {
    /// Bytes consumed from the stream by a failed receive.
    pub fn skipped_data(&self) -> Option<&[u8]> {
        match self {
            PacketError::Framing { skipped, .. } => Some(skipped),
            _ => None,
        }
    }

    /// True when the peer simply had nothing to say yet.
    pub fn is_would_block(&self) -> bool {
        matches!(self, PacketError::Io(e) if e.kind() == ErrorKind::WouldBlock)
    }
}

/// Builds a complete frame around `payload`.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, PacketError> {
    let length = payload.len() + FRAME_OVERHEAD;
    if length > MAX_PACKET_SIZE {
        return Err(PacketError::Oversized { length });
    }

    let mut frame = Vec::with_capacity(length);
    frame.extend_from_slice(&HEADER);
    frame.extend_from_slice(&(length as u16).to_be_bytes());
    frame.extend_from_slice(payload);
    frame.extend_from_slice(&FOOTER);
    Ok(frame)
}

/// Writes one framed packet. The frame goes out in a single write so a
/// partially sent packet is never interleaved with another.
pub fn send_packet<W: Write>(writer: &mut W, payload: &[u8]) -> Result<(), PacketError> {
    let frame = encode_frame(payload)?;
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

pub fn receive_packet<R: Read>(reader: &mut R) -> Result<Vec<u8>, PacketError> {
    receive_packet_with_resync(reader, DEFAULT_RESYNC_ATTEMPTS)
}

/// Reads one framed packet, skipping garbage before the header.
///
/// Each byte that breaks a partial header match counts as one scan restart;
/// after `max_resync_attempts` restarts the receive fails.
pub fn receive_packet_with_resync<R: Read>(
    reader: &mut R,
    max_resync_attempts: usize,
) -> Result<Vec<u8>, PacketError> {
    let mut skipped = Vec::new();

    let mut matched = 0;
    let mut restarts = 0;
    while matched < HEADER.len() {
        let byte = match read_byte(reader)? {
            Some(byte) => byte,
            None => return Err(framing("could not receive packet header", skipped)),
        };
        skipped.push(byte);

        if byte == HEADER[matched] {
            matched += 1;
            continue;
        }

        restarts += 1;
        if restarts >= max_resync_attempts {
            return Err(framing("could not find packet header", skipped));
        }
        matched = usize::from(byte == HEADER[0]);
    }

    if skipped.len() > HEADER.len() {
        debug!("Skipped {} bytes before packet header", skipped.len() - HEADER.len());
    }

    let start = skipped.len();
    read_into(reader, 2, &mut skipped)?;
    let length = u16::from_be_bytes([skipped[start], skipped[start + 1]]) as usize;
    if length < FRAME_OVERHEAD {
        return Err(framing("packet length shorter than its framing", skipped));
    }

    let payload_start = skipped.len();
    read_into(reader, length - FRAME_OVERHEAD, &mut skipped)?;
    let payload_end = skipped.len();

    read_into(reader, FOOTER.len(), &mut skipped)?;
    if skipped[payload_end..] != FOOTER {
        return Err(framing("packet did not end with expected footer", skipped));
    }

    Ok(skipped[payload_start..payload_end].to_vec())
}

fn framing(reason: &'static str, skipped: Vec<u8>) -> PacketError {
    PacketError::Framing { reason, skipped }
}

fn read_byte<R: Read>(reader: &mut R) -> Result<Option<u8>, PacketError> {
    let mut byte = [0u8; 1];
    loop {
        match reader.read(&mut byte) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(byte[0])),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Appends exactly `count` bytes to `buf`. A peer closing mid-frame is a
/// framing error, not an I/O error, so the consumed bytes are kept.
fn read_into<R: Read>(reader: &mut R, count: usize, buf: &mut Vec<u8>) -> Result<(), PacketError> {
    let target = buf.len() + count;
    let mut chunk = [0u8; 4096];
    while buf.len() < target {
        let want = (target - buf.len()).min(chunk.len());
        match reader.read(&mut chunk[..want]) {
            Ok(0) => {
                return Err(framing(
                    "connection closed in the middle of a packet",
                    std::mem::take(buf),
                ))
            }
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
