//! Receive loop: validate, acknowledge, deduplicate, relay.
//!
//! [`RelayLoop`] owns the peer's long-lived receive endpoint and the
//! [`Session`] of one listening lifetime.  For each inbound datagram it:
//! 1. splits off the trailing checksum,
//! 2. applies the configured [`FaultInjector`], if any, to the targeted message,
//! 3. verifies the checksum and drops the frame silently on mismatch (the
//!    sender's timeout then drives its retry),
//! 4. acknowledges the frame to its sender,
//! 5. records the payload in the session's delivery set, stopping on duplicates,
//! 6. floods payloads that originated elsewhere to the whole group via a
//!    separately spawned broadcast.

use std::collections::HashSet;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use crate::envelope::{Envelope, Frame};
use crate::events::{DiscardReason, Event, EventBus, Trigger};
use crate::fault::FaultInjector;
use crate::group::PeerId;
use crate::socket::Socket;
use crate::tasks::Dispatcher;

/// Pause after a failed receive before polling the endpoint again.
pub const RECEIVE_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Dedup state for one listening lifetime.
///
/// Keyed by payload text: a payload seen once is never relayed again by
/// this session, even if it arrives under a different message id.
#[derive(Debug, Default)]
pub struct Session {
    delivered: HashSet<String>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `payload`.  Returns `true` the first time it is seen.
    pub fn first_delivery(&mut self, payload: &str) -> bool {
        if self.delivered.contains(payload) {
            return false;
        }
        self.delivered.insert(payload.to_string())
    }

    pub fn contains(&self, payload: &str) -> bool {
        self.delivered.contains(payload)
    }

    pub fn len(&self) -> usize {
        self.delivered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.delivered.is_empty()
    }
}

/// Why a datagram was not admitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discard {
    /// Message id, when it could be read at all.
    pub message_id: Option<String>,
    pub reason: DiscardReason,
}

/// What the loop did with one datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Dropped without acknowledgment.
    Discarded(Discard),
    /// Acknowledged; payload already delivered this session.
    Duplicate(Envelope),
    /// Acknowledged; first delivery of a locally originated payload.
    Delivered(Envelope),
    /// Acknowledged; first delivery of a foreign payload, relay started.
    Relayed(Envelope),
}

/// Split, optionally corrupt, verify and parse one datagram.
pub fn admit(datagram: &[u8], fault: Option<&FaultInjector>) -> Result<Envelope, Discard> {
    let mut frame = Frame::split(datagram).map_err(|e| Discard {
        message_id: None,
        reason: DiscardReason::Malformed(e.to_string()),
    })?;

    // Read the id before verifying so diagnostics can name the message.
    let claimed = frame.envelope().ok();
    if let (Some(fault), Some(env)) = (fault, claimed.as_ref()) {
        if let Some(corrupted) = fault.corrupt(env) {
            frame.body = corrupted;
        }
    }

    if !frame.verify() {
        return Err(Discard {
            message_id: claimed.map(|env| env.message_id),
            reason: DiscardReason::IncorrectChecksum,
        });
    }
    frame.envelope().map_err(|e| Discard {
        message_id: None,
        reason: DiscardReason::Malformed(e.to_string()),
    })
}

/// The receive/relay loop of one peer.
#[derive(Debug)]
pub struct RelayLoop {
    local_id: PeerId,
    endpoint: Socket,
    fault: Option<FaultInjector>,
    dispatcher: Dispatcher,
    events: EventBus,
    session: Session,
}

impl RelayLoop {
    /// Start a new session on `endpoint`.  The delivery set starts empty.
    pub fn new(
        local_id: PeerId,
        endpoint: Socket,
        fault: Option<FaultInjector>,
        dispatcher: Dispatcher,
        events: EventBus,
    ) -> Self {
        Self {
            local_id,
            endpoint,
            fault,
            dispatcher,
            events,
            session: Session::new(),
        }
    }

    /// Serve datagrams until the task is aborted.
    pub async fn run(mut self) {
        log::info!(
            "[relay] peer {} listening on {}",
            self.local_id,
            self.endpoint.local_addr
        );
        loop {
            match self.endpoint.recv_from().await {
                Ok((bytes, from)) => {
                    self.handle(&bytes, from).await;
                }
                Err(e) => pause_after_receive_error(&e).await,
            }
        }
    }

    /// Process one datagram received from `from`.
    pub async fn handle(&mut self, datagram: &[u8], from: SocketAddr) -> Inbound {
        let envelope = match admit(datagram, self.fault.as_ref()) {
            Ok(env) => env,
            Err(discard) => {
                let id = discard.message_id.as_deref().unwrap_or("?");
                match &discard.reason {
                    DiscardReason::IncorrectChecksum => {
                        log::info!("[relay] MessageID={id} discarded (Incorrect Checksum)")
                    }
                    DiscardReason::Malformed(why) => {
                        log::warn!("[relay] datagram from {from} discarded: {why}")
                    }
                }
                self.events.publish(Event::Discarded {
                    message_id: discard.message_id.clone(),
                    reason: discard.reason.clone(),
                });
                return Inbound::Discarded(discard);
            }
        };

        self.acknowledge(&envelope, from).await;

        if !self.session.first_delivery(&envelope.msg) {
            log::debug!(
                "[relay] duplicate payload under MessageID={}",
                envelope.message_id
            );
            return Inbound::Duplicate(envelope);
        }
        if envelope.peer_id == self.local_id {
            return Inbound::Delivered(envelope);
        }

        log::info!(
            "[relay] relaying MessageID={} from peer {}",
            envelope.message_id,
            envelope.peer_id
        );
        self.events.publish(Event::Relaying {
            origin: envelope.peer_id,
            payload: envelope.msg.clone(),
        });
        let trigger = Trigger::Relay {
            origin: envelope.peer_id,
        };
        if self
            .dispatcher
            .dispatch(envelope.msg.clone(), trigger)
            .is_none()
        {
            log::warn!("[relay] shutting down, relay of MessageID={} dropped", envelope.message_id);
        }
        Inbound::Relayed(envelope)
    }

    async fn acknowledge(&self, envelope: &Envelope, to: SocketAddr) {
        let sent = match envelope.ack(self.local_id).encode_ack() {
            Ok(ack) => self.endpoint.send_to(&ack, to).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        match sent {
            Ok(()) => {
                log::info!(
                    "[relay] Peer-ACK: MessageID={} PeerID={} Port={}",
                    envelope.message_id,
                    self.local_id,
                    self.endpoint.local_addr.port()
                );
                self.events.publish(Event::AckSent {
                    message_id: envelope.message_id.clone(),
                    to,
                });
            }
            Err(e) => log::warn!(
                "[relay] cannot acknowledge MessageID={} to {to}: {e}",
                envelope.message_id
            ),
        }
    }
}

async fn pause_after_receive_error(e: &io::Error) {
    log::warn!("[relay] receive failed: {e}");
    tokio::time::sleep(RECEIVE_RETRY_DELAY).await;
}
