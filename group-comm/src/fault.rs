//! Deterministic single-bit fault injection for testing the checksum path.
//!
//! Real networks corrupt bits in transit.  To exercise integrity checking
//! without depending on actual corruption, a peer may be started with one
//! target `(message id, bit index)`.  When a frame with that id reaches the
//! receive loop, the chosen payload bit is toggled *before* the checksum is
//! verified, so the frame is discarded and the sender is pushed into its
//! retry path.
//!
//! Only the receive side ever uses this; outbound frames are never touched.

use crate::envelope::Envelope;

/// Toggle bit `bit_index` of `payload`'s UTF-8 bytes.
///
/// Bit `i` lives in byte `i / 8`, at position `i % 8` counted from the least
/// significant bit.  Returns `None` when the index is past the payload end.
/// A flip that produces invalid UTF-8 is returned lossily decoded, which
/// still differs from the original bytes.
pub fn toggle_bit(payload: &str, bit_index: usize) -> Option<String> {
    let mut bytes = payload.as_bytes().to_vec();
    let byte = bytes.get_mut(bit_index / 8)?;
    *byte ^= 1 << (bit_index % 8);
    Some(match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    })
}

/// One `(message id, bit index)` corruption target for the process run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultInjector {
    pub message_id: String,
    pub bit_index: usize,
}

impl FaultInjector {
    pub fn new(message_id: impl Into<String>, bit_index: usize) -> Self {
        Self {
            message_id: message_id.into(),
            bit_index,
        }
    }

    /// Enabled only when both parameters are present.
    pub fn from_options(message_id: Option<String>, bit_index: Option<usize>) -> Option<Self> {
        Some(Self::new(message_id?, bit_index?))
    }

    pub fn targets(&self, envelope: &Envelope) -> bool {
        envelope.message_id == self.message_id
    }

    /// Corrupt `envelope` if it is the target.
    ///
    /// Returns the re-encoded envelope bytes when a bit was flipped, `None`
    /// when the envelope is not targeted or the bit index is out of range.
    pub fn corrupt(&self, envelope: &Envelope) -> Option<Vec<u8>> {
        if !self.targets(envelope) {
            return None;
        }
        let Some(msg) = toggle_bit(&envelope.msg, self.bit_index) else {
            log::warn!(
                "[fault] bit {} is outside payload of message {} ({} bytes)",
                self.bit_index,
                envelope.message_id,
                envelope.msg.len()
            );
            return None;
        };
        let corrupted = Envelope::new(envelope.message_id.clone(), envelope.peer_id, msg);
        match corrupted.to_json() {
            Ok(bytes) => {
                log::info!(
                    "[fault] toggled bit {} of message {}: {}",
                    self.bit_index,
                    envelope.message_id,
                    String::from_utf8_lossy(&bytes)
                );
                Some(bytes)
            }
            Err(e) => {
                log::warn!("[fault] cannot re-encode message {}: {e}", envelope.message_id);
                None
            }
        }
    }
}
