//! Observable protocol events.
//!
//! Every diagnostic the middleware produces (retries, acks, discarded frames,
//! relays, verdicts) is published on an [`EventBus`].  Front ends subscribe
//! and render them; nothing polls shared result slots.

use std::net::SocketAddr;

use tokio::sync::broadcast;

use crate::broadcast::DeliveryVerdict;
use crate::group::{PeerAddress, PeerId};

const EVENT_CAPACITY: usize = 256;

/// What started a broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// A local `send` request.
    Local,
    /// Flooding a message received from another peer.
    Relay { origin: PeerId },
}

/// Why an inbound datagram was dropped without acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscardReason {
    IncorrectChecksum,
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Listening {
        local: PeerAddress,
    },
    Retrying {
        peer: PeerAddress,
        message_id: String,
        retries_left: u32,
    },
    Acknowledged {
        peer: PeerId,
        message_id: String,
    },
    Unreachable {
        peer: PeerAddress,
        message_id: String,
    },
    AckSent {
        message_id: String,
        to: SocketAddr,
    },
    Discarded {
        message_id: Option<String>,
        reason: DiscardReason,
    },
    Relaying {
        origin: PeerId,
        payload: String,
    },
    Completed {
        trigger: Trigger,
        verdict: DeliveryVerdict,
    },
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::Listening { local } => {
                write!(f, "Peer {} is listening on port {}", local.id, local.port)
            }
            Event::Retrying {
                peer, retries_left, ..
            } => write!(f, "trying to reach {peer}, retries left: {retries_left}"),
            Event::Acknowledged { peer, message_id } => {
                write!(f, "ACK: MessageID={message_id} PeerID={peer}")
            }
            Event::Unreachable { peer, message_id } => {
                write!(f, "MessageID={message_id} not acknowledged by {peer}")
            }
            Event::AckSent { message_id, to } => {
                write!(f, "Peer-ACK: MessageID={message_id} to {to}")
            }
            Event::Discarded { message_id, reason } => {
                let id = message_id.as_deref().unwrap_or("?");
                match reason {
                    DiscardReason::IncorrectChecksum => {
                        write!(f, "MessageID={id} discarded (Incorrect Checksum)")
                    }
                    DiscardReason::Malformed(why) => {
                        write!(f, "MessageID={id} discarded (Malformed: {why})")
                    }
                }
            }
            Event::Relaying { origin, payload } => {
                write!(f, "relaying message from peer {origin}: {payload}")
            }
            Event::Completed { verdict, .. } => write!(f, "{verdict}"),
        }
    }
}

/// Fan-out channel for [`Event`]s.
///
/// Publishing never blocks and never fails; events published while nobody
/// is subscribed are dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discard_renders_legacy_diagnostic() {
        let ev = Event::Discarded {
            message_id: Some("50".into()),
            reason: DiscardReason::IncorrectChecksum,
        };
        assert_eq!(ev.to_string(), "MessageID=50 discarded (Incorrect Checksum)");
    }

    #[tokio::test]
    async fn subscribers_see_published_events() {
        let bus = EventBus::new();
        bus.publish(Event::Acknowledged {
            peer: 9,
            message_id: "dropped".into(),
        });
        let mut rx = bus.subscribe();
        let ev = Event::Acknowledged {
            peer: 2,
            message_id: "10".into(),
        };
        bus.publish(ev.clone());
        assert_eq!(rx.recv().await.unwrap(), ev);
    }
}
