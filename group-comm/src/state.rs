//! Peer lifecycle state.
//!
//! ```text
//!  IDLE ──listen()──▶ LISTENING
//! ```
//!
//! `Listening` is terminal until the process exits.  Sending is not a state
//! of its own: a peer may originate broadcasts whether or not it listens.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeerState {
    /// Created; the receive endpoint is bound but nothing reads from it.
    #[default]
    Idle,
    /// The receive/relay loop is running.
    Listening,
}

impl std::fmt::Display for PeerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
