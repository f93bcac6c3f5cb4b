//! Message property contract and wire encoding.
//!
//! Tracking rides on two string properties stamped by the publisher:
//! [`SEQUENCE_NUMBER`] (required for tracking, decimal ASCII of a
//! non-negative 64-bit integer) and [`SEQUENCE_TGT_MAX`] (optional advisory
//! maximum sequence number). Brokers with native headers carry them directly;
//! for the rest a small length-prefixed envelope prepends the properties to
//! the payload.

use std::collections::BTreeMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Property holding the per-message sequence number. A message without it is
/// simply not tracked.
pub const SEQUENCE_NUMBER: &str = "sequence_number";

/// Advisory property holding the highest sequence number the producer will
/// send. Lets the consumer detect a lost tail and stop early.
pub const SEQUENCE_TGT_MAX: &str = "sequence_tgt_max";

/// String key/value properties attached to a message.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageProperties(BTreeMap<String, String>);

impl MessageProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn set_sequence_number(&mut self, n: i64) {
        self.insert(SEQUENCE_NUMBER, n.to_string());
    }

    pub fn set_sequence_target_max(&mut self, n: i64) {
        self.insert(SEQUENCE_TGT_MAX, n.to_string());
    }

    /// The stamped sequence number, if present and well-formed. A malformed
    /// value reads as absent, which disables tracking for the message.
    pub fn sequence_number(&self) -> Option<i64> {
        parse_decimal(self.get(SEQUENCE_NUMBER)?)
    }

    /// The advisory maximum sequence number, if present and well-formed.
    pub fn sequence_target_max(&self) -> Option<i64> {
        parse_decimal(self.get(SEQUENCE_TGT_MAX)?)
    }
}

fn parse_decimal(s: &str) -> Option<i64> {
    match s.parse::<i64>() {
        Ok(n) if n >= 0 => Some(n),
        _ => None,
    }
}

/// Prepend properties to a payload as `[u16 count] ([u16 klen][key][u16 vlen][value])* [payload]`,
/// all lengths little-endian. Used by transports without native headers.
pub fn encode_envelope(properties: &MessageProperties, payload: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(2 + payload.len() + 16 * (1 + properties.0.len()));
    out.put_u16_le(properties.0.len() as u16);
    for (key, value) in properties.iter() {
        out.put_u16_le(key.len() as u16);
        out.put_slice(key.as_bytes());
        out.put_u16_le(value.len() as u16);
        out.put_slice(value.as_bytes());
    }
    out.put_slice(payload);
    out.freeze()
}

/// Split an envelope back into properties and payload. Returns `None` on a
/// truncated or malformed envelope.
pub fn decode_envelope(mut buf: &[u8]) -> Option<(MessageProperties, Bytes)> {
    if buf.len() < 2 {
        return None;
    }
    let count = buf.get_u16_le() as usize;
    let mut properties = MessageProperties::new();
    for _ in 0..count {
        let key = read_string(&mut buf)?;
        let value = read_string(&mut buf)?;
        properties.insert(key, value);
    }
    Some((properties, Bytes::copy_from_slice(buf)))
}

fn read_string(buf: &mut &[u8]) -> Option<String> {
    if buf.len() < 2 {
        return None;
    }
    let len = buf.get_u16_le() as usize;
    if buf.len() < len {
        return None;
    }
    let s = String::from_utf8(buf[..len].to_vec()).ok()?;
    buf.advance(len);
    Some(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamps_parse_back() {
        let mut props = MessageProperties::new();
        props.set_sequence_number(42);
        props.set_sequence_target_max(99);
        assert_eq!(props.sequence_number(), Some(42));
        assert_eq!(props.sequence_target_max(), Some(99));
    }

    #[test]
    fn malformed_stamp_reads_as_absent() {
        let mut props = MessageProperties::new();
        props.insert(SEQUENCE_NUMBER, "not-a-number");
        assert_eq!(props.sequence_number(), None);
        props.insert(SEQUENCE_NUMBER, "-3");
        assert_eq!(props.sequence_number(), None);
        let empty = MessageProperties::new();
        assert_eq!(empty.sequence_number(), None);
    }

    #[test]
    fn envelope_round_trip() {
        let mut props = MessageProperties::new();
        props.set_sequence_number(7);
        props.insert("origin", "verify/topic/3");
        let payload = b"abcdef";
        let env = encode_envelope(&props, payload);
        let (decoded, body) = decode_envelope(&env).expect("decode");
        assert_eq!(decoded, props);
        assert_eq!(&body[..], payload);
    }

    #[test]
    fn envelope_with_no_properties() {
        let env = encode_envelope(&MessageProperties::new(), b"xyz");
        let (decoded, body) = decode_envelope(&env).expect("decode");
        assert!(decoded.is_empty());
        assert_eq!(&body[..], b"xyz");
    }

    #[test]
    fn truncated_envelope_rejected() {
        let mut props = MessageProperties::new();
        props.set_sequence_number(1);
        let env = encode_envelope(&props, b"payload");
        assert!(decode_envelope(&env[..3]).is_none());
        assert!(decode_envelope(&[]).is_none());
    }
}
