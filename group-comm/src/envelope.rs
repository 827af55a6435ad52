//! Wire-format definitions for envelopes and acknowledgments.
//!
//! Every datagram exchanged between peers carries one [`Envelope`]
//! serialised as JSON.  This module is responsible for:
//! - Building data frames (`JSON ++ checksum`) and ack frames (`JSON` only).
//! - Splitting a received datagram into envelope bytes and checksum.
//! - Allocating message ids from a per-peer [`SequenceCounter`].
//!
//! No I/O happens here; this is pure data transformation.
//!
//! # Wire format
//!
//! ```text
//!  data frame:  {"messageID":"<id>","peerID":<origin>,"msg":"<payload>"} | csum (2, BE)
//!  ack frame:   {"messageID":"<id>","peerID":<acker>,"msg":"ACK"}
//! ```
//!
//! The checksum covers exactly the JSON bytes in front of it.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::checksum::{self, CHECKSUM_LEN};
use crate::group::PeerId;

/// Maximum datagram size accepted or produced.
pub const MAX_DATAGRAM: usize = 1024;

/// Literal carried in the `msg` field of acknowledgments.
pub const ACK_MSG: &str = "ACK";

/// Errors that can arise when building or parsing frames.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Datagram too short to hold the checksum trailer.
    #[error("frame of {0} bytes is too short to carry a checksum")]
    TooShort(usize),
    /// Encoded frame would not fit in one datagram.
    #[error("encoded frame is {0} bytes, limit is {limit}", limit = MAX_DATAGRAM)]
    Oversized(usize),
    /// Envelope bytes are not valid JSON for an [`Envelope`].
    #[error("malformed envelope: {0}")]
    Json(#[from] serde_json::Error),
}

/// The unit exchanged between peers: identity, origin, payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Sender peer id concatenated with its sequence number.
    #[serde(rename = "messageID")]
    pub message_id: String,
    /// Originating peer for data frames; acknowledging peer for acks.
    #[serde(rename = "peerID")]
    pub peer_id: PeerId,
    /// Application payload, or [`ACK_MSG`] for acknowledgments.
    pub msg: String,
}

impl Envelope {
    pub fn new(message_id: String, peer_id: PeerId, msg: impl Into<String>) -> Self {
        Self {
            message_id,
            peer_id,
            msg: msg.into(),
        }
    }

    /// Acknowledgment for this envelope, sent by `local_id`.
    pub fn ack(&self, local_id: PeerId) -> Self {
        Self::new(self.message_id.clone(), local_id, ACK_MSG)
    }

    pub fn is_ack(&self) -> bool {
        self.msg == ACK_MSG
    }

    /// Serialise to the JSON bytes covered by the checksum.
    pub fn to_json(&self) -> Result<Vec<u8>, FrameError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, FrameError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Build a data frame: JSON bytes followed by their big-endian checksum.
    pub fn encode_frame(&self) -> Result<Vec<u8>, FrameError> {
        let mut buf = self.to_json()?;
        let csum = checksum::compute(&buf);
        buf.extend_from_slice(&csum.to_be_bytes());
        if buf.len() > MAX_DATAGRAM {
            return Err(FrameError::Oversized(buf.len()));
        }
        Ok(buf)
    }

    /// Build an ack frame: JSON bytes only, no checksum.
    pub fn encode_ack(&self) -> Result<Vec<u8>, FrameError> {
        let buf = self.to_json()?;
        if buf.len() > MAX_DATAGRAM {
            return Err(FrameError::Oversized(buf.len()));
        }
        Ok(buf)
    }
}

/// A received data frame split into its checksummed body and trailer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub body: Vec<u8>,
    pub checksum: u16,
}

impl Frame {
    /// Split a raw datagram at the trailing checksum.
    pub fn split(datagram: &[u8]) -> Result<Self, FrameError> {
        if datagram.len() < CHECKSUM_LEN {
            return Err(FrameError::TooShort(datagram.len()));
        }
        let (body, trailer) = datagram.split_at(datagram.len() - CHECKSUM_LEN);
        Ok(Self {
            body: body.to_vec(),
            checksum: u16::from_be_bytes([trailer[0], trailer[1]]),
        })
    }

    /// `true` when the body still matches the transmitted checksum.
    pub fn verify(&self) -> bool {
        checksum::verify(&self.body, self.checksum)
    }

    /// Parse the body, without checking integrity.
    pub fn envelope(&self) -> Result<Envelope, FrameError> {
        Envelope::from_json(&self.body)
    }
}

/// Per-peer monotonically increasing sequence counter.
///
/// One value is consumed per peer contacted, independent of retries.
#[derive(Debug, Default)]
pub struct SequenceCounter {
    next: AtomicU64,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next message id for `peer_id`.
    ///
    /// Ids are `"<peer_id><seq>"`; they are unique per group only as long as
    /// peer ids are unique.
    pub fn next_message_id(&self, peer_id: PeerId) -> String {
        let seq = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{peer_id}{seq}")
    }

    /// Number of ids handed out so far.
    pub fn current(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_uses_wire_field_names() {
        let env = Envelope::new("50".into(), 5, "hello");
        let json = String::from_utf8(env.to_json().unwrap()).unwrap();
        assert_eq!(json, r#"{"messageID":"50","peerID":5,"msg":"hello"}"#);
    }

    #[test]
    fn data_frame_ends_with_big_endian_checksum() {
        let env = Envelope::new("10".into(), 1, "payload");
        let frame = env.encode_frame().unwrap();
        let json = env.to_json().unwrap();
        assert_eq!(frame.len(), json.len() + CHECKSUM_LEN);
        assert_eq!(&frame[..json.len()], &json[..]);
        assert_eq!(&frame[json.len()..], &checksum::compute(&json).to_be_bytes());
    }

    #[test]
    fn split_recovers_envelope() {
        let env = Envelope::new("12".into(), 1, "x");
        let frame = Frame::split(&env.encode_frame().unwrap()).unwrap();
        assert!(frame.verify());
        assert_eq!(frame.envelope().unwrap(), env);
    }

    #[test]
    fn split_rejects_short_datagram() {
        assert!(matches!(Frame::split(&[0x01]), Err(FrameError::TooShort(1))));
        assert!(matches!(Frame::split(&[]), Err(FrameError::TooShort(0))));
    }

    #[test]
    fn corrupted_body_fails_verification() {
        let env = Envelope::new("10".into(), 1, "abc");
        let mut bytes = env.encode_frame().unwrap();
        let idx = bytes.len() - CHECKSUM_LEN - 3;
        bytes[idx] ^= 0x01;
        let frame = Frame::split(&bytes).unwrap();
        assert!(!frame.verify());
    }

    #[test]
    fn ack_has_no_checksum_trailer() {
        let env = Envelope::new("30".into(), 3, "hi");
        let ack = env.ack(7);
        assert!(ack.is_ack());
        assert_eq!(ack.message_id, "30");
        assert_eq!(ack.peer_id, 7);
        let bytes = ack.encode_ack().unwrap();
        assert_eq!(Envelope::from_json(&bytes).unwrap(), ack);
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let env = Envelope::new("10".into(), 1, "x".repeat(MAX_DATAGRAM));
        let err = env.encode_frame().unwrap_err();
        assert!(matches!(err, FrameError::Oversized(_)));
        assert!(err.to_string().ends_with("limit is 1024"));
    }

    #[test]
    fn malformed_json_converts_into_frame_error() {
        assert!(matches!(
            Envelope::from_json(b"{\"messageID\":"),
            Err(FrameError::Json(_))
        ));
    }

    #[test]
    fn sequence_counter_concatenates_peer_id() {
        let seq = SequenceCounter::new();
        assert_eq!(seq.next_message_id(5), "50");
        assert_eq!(seq.next_message_id(5), "51");
        assert_eq!(seq.current(), 2);
    }
}
