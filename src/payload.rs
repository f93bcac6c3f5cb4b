//! Benchmark payload layout: a fixed 24-byte binary header followed by
//! filler up to the requested size. The header carries the publish timestamp
//! so the subscriber can compute end-to-end latency without decoding the
//! whole payload.

use bytes::{Buf, BufMut};

pub const HEADER_LEN: usize = 24;

const MAGIC: u32 = 0x4d51_5646; // "MQVF"
const VERSION: u32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PayloadHeader {
    pub sequence: u64,
    pub timestamp_ns: u64,
}

/// Build a payload of exactly `max(size, HEADER_LEN)` bytes for the given
/// sequence number, stamped with the current estimated unix time.
pub fn generate_payload(sequence: u64, timestamp_ns: u64, size: usize) -> Vec<u8> {
    let total = size.max(HEADER_LEN);
    let mut out = Vec::with_capacity(total);
    out.put_u32_le(MAGIC);
    out.put_u32_le(VERSION);
    out.put_u64_le(sequence);
    out.put_u64_le(timestamp_ns);
    // Deterministic filler so payloads differ across sequence numbers.
    let mut x = sequence.wrapping_mul(0x9e37_79b9_7f4a_7c15);
    while out.len() < total {
        out.push((x & 0xff) as u8);
        x = x.rotate_left(8);
    }
    out
}

/// Parse the fixed header off the front of a payload. Returns `None` when
/// the buffer is too short or was not produced by this harness.
pub fn parse_header(mut buf: &[u8]) -> Option<PayloadHeader> {
    if buf.len() < HEADER_LEN {
        return None;
    }
    if buf.get_u32_le() != MAGIC {
        return None;
    }
    let _version = buf.get_u32_le();
    let sequence = buf.get_u64_le();
    let timestamp_ns = buf.get_u64_le();
    Some(PayloadHeader {
        sequence,
        timestamp_ns,
    })
}
