//! Stop-and-wait reliable unicast to one peer.
//!
//! [`ReliableSender::send_one`] owns one exchange end to end: it opens an
//! ephemeral [`Socket`], transmits the checksummed frame, and waits for the
//! matching acknowledgment.
//!
//! # Contract
//! - At most [`RetryPolicy::max_attempts`] transmissions per peer.
//! - The frame is retransmitted unchanged (same message id) on every retry.
//! - Only transient faults ([`SendError::is_transient`]) are retried; an
//!   envelope that cannot be encoded fails immediately.
//! - After an acknowledged exchange the sender pauses for
//!   [`RetryPolicy::pacing`] before returning.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{sleep, timeout_at, Instant};

use crate::envelope::{Envelope, FrameError};
use crate::events::{Event, EventBus};
use crate::group::{PeerAddress, PeerId};
use crate::socket::Socket;
use crate::timer::RetryPolicy;

#[derive(Debug, Error)]
pub enum SendError {
    /// No acknowledgment within the attempt's window.
    #[error("no acknowledgment within {0:?}")]
    AckTimeout(Duration),
    /// The underlying send/receive primitive failed.
    #[error("transport fault: {0}")]
    Transport(#[from] io::Error),
    /// The envelope cannot be put on the wire at all.
    #[error("cannot encode envelope: {0}")]
    Encode(#[from] FrameError),
    /// Retry budget exhausted.
    #[error("{peer} did not acknowledge after {attempts} transmissions")]
    Unacknowledged { peer: PeerAddress, attempts: u32 },
}

impl SendError {
    /// `true` for faults a retransmission may cure.
    pub fn is_transient(&self) -> bool {
        matches!(self, SendError::AckTimeout(_) | SendError::Transport(_))
    }
}

/// A successfully acknowledged exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub peer: PeerId,
    pub message_id: String,
    /// Transmissions used, including the acknowledged one.
    pub attempts: u32,
}

/// Delivers single envelopes to single peers with timeout and retry.
#[derive(Debug, Clone)]
pub struct ReliableSender {
    policy: RetryPolicy,
    events: EventBus,
}

impl ReliableSender {
    pub fn new(policy: RetryPolicy, events: EventBus) -> Self {
        Self { policy, events }
    }

    /// Deliver `envelope` to `peer`, retrying until acknowledged or the
    /// retry budget runs out.
    pub async fn send_one(
        &self,
        peer: &PeerAddress,
        envelope: &Envelope,
    ) -> Result<Delivery, SendError> {
        let frame = envelope.encode_frame()?;
        let dest = peer.socket_addr();
        let mut budget = self.policy.budget();
        let mut socket = None;

        loop {
            budget.on_attempt();
            match self
                .attempt(&mut socket, &frame, dest, &envelope.message_id)
                .await
            {
                Ok(ack) => {
                    log::info!(
                        "[send] ← ACK MessageID={} PeerID={} attempt={}",
                        ack.message_id,
                        ack.peer_id,
                        budget.attempts()
                    );
                    self.events.publish(Event::Acknowledged {
                        peer: ack.peer_id,
                        message_id: ack.message_id,
                    });
                    sleep(self.policy.pacing).await;
                    return Ok(Delivery {
                        peer: peer.id,
                        message_id: envelope.message_id.clone(),
                        attempts: budget.attempts(),
                    });
                }
                Err(e) if e.is_transient() => {
                    let retries_left = budget.remaining();
                    log::info!("[send] trying to reach {peer}, retries left: {retries_left} ({e})");
                    if !budget.retry() {
                        break;
                    }
                    self.events.publish(Event::Retrying {
                        peer: *peer,
                        message_id: envelope.message_id.clone(),
                        retries_left,
                    });
                    sleep(self.policy.backoff).await;
                }
                Err(e) => return Err(e),
            }
        }

        log::warn!(
            "[send] giving up on {peer} for MessageID={} after {} transmissions",
            envelope.message_id,
            budget.attempts()
        );
        self.events.publish(Event::Unreachable {
            peer: *peer,
            message_id: envelope.message_id.clone(),
        });
        Err(SendError::Unacknowledged {
            peer: *peer,
            attempts: budget.attempts(),
        })
    }

    /// One transmission plus ack wait.  The endpoint is bound lazily and kept
    /// in `slot` for the retries of the same exchange.
    async fn attempt(
        &self,
        slot: &mut Option<Socket>,
        frame: &[u8],
        dest: SocketAddr,
        message_id: &str,
    ) -> Result<Envelope, SendError> {
        let socket = match slot.take() {
            Some(s) => s,
            None => Socket::ephemeral_for(dest).await?,
        };
        let result = self.exchange(&socket, frame, dest, message_id).await;
        *slot = Some(socket);
        result
    }

    async fn exchange(
        &self,
        socket: &Socket,
        frame: &[u8],
        dest: SocketAddr,
        message_id: &str,
    ) -> Result<Envelope, SendError> {
        socket.send_to(frame, dest).await?;
        log::debug!("[send] → DATA MessageID={message_id} to {dest} len={}", frame.len());

        let deadline = Instant::now() + self.policy.ack_timeout;
        loop {
            let (bytes, from) = match timeout_at(deadline, socket.recv_from()).await {
                Ok(received) => received?,
                Err(_) => return Err(SendError::AckTimeout(self.policy.ack_timeout)),
            };
            match Envelope::from_json(&bytes) {
                Ok(ack) if ack.is_ack() && ack.message_id == message_id => return Ok(ack),
                Ok(other) => log::debug!(
                    "[send] ignoring reply from {from} for MessageID={}",
                    other.message_id
                ),
                Err(e) => log::debug!("[send] ignoring garbled reply from {from}: {e}"),
            }
        }
    }
}
