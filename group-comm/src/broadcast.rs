//! All-or-nothing broadcast to the whole group.
//!
//! [`Broadcaster::broadcast`] walks the group list in its fixed order and
//! drives one [`ReliableSender::send_one`] exchange per peer, sequentially.
//! A slow or retrying peer therefore delays every peer after it.  Each peer
//! contacted consumes exactly one sequence number, whatever the number of
//! retries.
//!
//! The verdict is "delivered" only if every peer acknowledged.  Peers that
//! did acknowledge keep the message; nothing is rolled back.  A payload too
//! large to frame ends the broadcast at the first peer.

use std::sync::Arc;

use crate::envelope::{Envelope, SequenceCounter};
use crate::group::{Group, PeerId};
use crate::sender::{ReliableSender, SendError};

/// Text shown when a broadcast missed at least one peer.
pub const COMMUNICATION_ERROR: &str = "Message was not delivered due to a communication error";

/// Outcome of one broadcast attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryVerdict {
    pub payload: String,
    /// Peers that acknowledged.
    pub acknowledged: usize,
    pub group_size: usize,
}

impl DeliveryVerdict {
    pub fn is_delivered(&self) -> bool {
        self.acknowledged == self.group_size
    }
}

impl std::fmt::Display for DeliveryVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_delivered() {
            f.write_str(&self.payload)
        } else {
            f.write_str(COMMUNICATION_ERROR)
        }
    }
}

/// Fans a payload out to every group member through a [`ReliableSender`].
///
/// Cheap to clone; clones share the sequence counter.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    local_id: PeerId,
    group: Arc<Group>,
    sequence: Arc<SequenceCounter>,
    sender: ReliableSender,
}

impl Broadcaster {
    pub fn new(local_id: PeerId, group: Arc<Group>, sender: ReliableSender) -> Self {
        Self {
            local_id,
            group,
            sequence: Arc::new(SequenceCounter::new()),
            sender,
        }
    }

    /// Sequence numbers consumed so far.
    pub fn sequence(&self) -> u64 {
        self.sequence.current()
    }

    /// Send `payload` to every peer in group order and tally the acks.
    ///
    /// Each peer gets a fresh message id originated by this peer.
    pub async fn broadcast(&self, payload: &str) -> DeliveryVerdict {
        let mut acknowledged = 0;
        for peer in self.group.members() {
            let message_id = self.sequence.next_message_id(self.local_id);
            let envelope = Envelope::new(message_id, self.local_id, payload);
            match self.sender.send_one(peer, &envelope).await {
                Ok(delivery) => {
                    log::debug!(
                        "[bcast] {} acknowledged MessageID={} after {} attempt(s)",
                        peer,
                        delivery.message_id,
                        delivery.attempts
                    );
                    acknowledged += 1;
                }
                Err(SendError::Encode(e)) => {
                    // Later message ids are never shorter, so no peer could
                    // take this payload.
                    log::warn!(
                        "[bcast] MessageID={} cannot be framed, broadcast abandoned: {e}",
                        envelope.message_id
                    );
                    break;
                }
                Err(e) => log::info!("[bcast] {e}"),
            }
        }

        let verdict = DeliveryVerdict {
            payload: payload.to_string(),
            acknowledged,
            group_size: self.group.len(),
        };
        log::info!(
            "[bcast] {}/{} acknowledged: {}",
            verdict.acknowledged,
            verdict.group_size,
            verdict
        );
        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::MAX_DATAGRAM;
    use crate::events::EventBus;
    use crate::group::PeerAddress;
    use crate::timer::RetryPolicy;

    #[tokio::test]
    async fn unframeable_payload_stops_at_first_peer() {
        let group = Group::new(vec![
            PeerAddress::new(1, 5000),
            PeerAddress::new(2, 5001),
            PeerAddress::new(3, 5002),
        ])
        .unwrap();
        let sender = ReliableSender::new(RetryPolicy::default(), EventBus::new());
        let broadcaster = Broadcaster::new(123_456, Arc::new(group), sender);

        // Fits when relayed under a short id, not under this peer's.
        let payload = "x".repeat(MAX_DATAGRAM - 40);
        let verdict = broadcaster.broadcast(&payload).await;

        assert!(!verdict.is_delivered());
        assert_eq!(verdict.acknowledged, 0);
        assert_eq!(verdict.group_size, 3);
        assert_eq!(verdict.to_string(), COMMUNICATION_ERROR);
        assert_eq!(broadcaster.sequence(), 1);
    }

    #[test]
    fn verdict_is_all_or_nothing() {
        let mut v = DeliveryVerdict {
            payload: "hello".into(),
            acknowledged: 3,
            group_size: 3,
        };
        assert!(v.is_delivered());
        assert_eq!(v.to_string(), "hello");

        v.acknowledged = 2;
        assert!(!v.is_delivered());
        assert_eq!(v.to_string(), COMMUNICATION_ERROR);

        v.acknowledged = 0;
        assert!(!v.is_delivered());
    }
}
