//! Wire codec: a compact, self-describing JSON record per frame.
//!
//! Unknown fields are ignored by `serde`'s default (non-`deny_unknown_fields`)
//! behavior; a frame missing required fields, or that isn't valid JSON, is a
//! decode error the caller should treat as "malformed" and continue past.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::{Ack, Message};

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    seq: u64,
    ts: u64,
    /// Hex-encoded payload bytes (text frames can't carry raw binary).
    payload: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireAck {
    ack_seq: u64,
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed frame: {0}")]
    Malformed(String),
}

pub fn encode_message(msg: &Message) -> Bytes {
    let wire = WireMessage {
        seq: msg.seq,
        ts: msg.publish_ts,
        payload: hex_encode(&msg.payload),
    };
    Bytes::from(serde_json::to_vec(&wire).expect("WireMessage always serializes"))
}

pub fn decode_message(data: &[u8]) -> Result<Message, CodecError> {
    let wire: WireMessage =
        serde_json::from_slice(data).map_err(|e| CodecError::Malformed(e.to_string()))?;
    let payload = hex_decode(&wire.payload).map_err(CodecError::Malformed)?;
    Ok(Message::new(wire.seq, wire.ts, Bytes::from(payload)))
}

pub fn encode_ack(ack: Ack) -> Bytes {
    let wire = WireAck {
        ack_seq: ack.ack_seq,
    };
    Bytes::from(serde_json::to_vec(&wire).expect("WireAck always serializes"))
}

pub fn decode_ack(data: &[u8]) -> Result<Ack, CodecError> {
    let wire: WireAck =
        serde_json::from_slice(data).map_err(|e| CodecError::Malformed(e.to_string()))?;
    Ok(Ack {
        ack_seq: wire.ack_seq,
    })
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(s, "{b:02x}").expect("writing to a String never fails");
    }
    s
}

fn hex_decode(s: &str) -> Result<Vec<u8>, String> {
    if s.len() % 2 != 0 {
        return Err("odd-length hex string".to_string());
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|e| e.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_message() {
        let original = Message::new(42, 1_000_000, Bytes::from_static(b"hello"));
        let encoded = encode_message(&original);
        let decoded = decode_message(&encoded).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn round_trips_an_ack() {
        let ack = Ack { ack_seq: 7 };
        let encoded = encode_ack(ack);
        let decoded = decode_ack(&encoded).unwrap();
        assert_eq!(decoded.ack_seq, 7);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let data = br#"{"seq":1,"ts":2,"payload":"ff","extra":"ignored"}"#;
        let decoded = decode_message(data).unwrap();
        assert_eq!(decoded.seq, 1);
        assert_eq!(decoded.payload.as_ref(), &[0xff]);
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(decode_message(b"not json").is_err());
        assert!(decode_ack(b"{\"ack_seq\": \"nope\"}").is_err());
    }
}
