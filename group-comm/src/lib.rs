//! `group-comm`: reliable group communication over UDP.
//!
//! Every peer knows the full, fixed group.  A message sent by any peer is
//! delivered to every member with per-peer acknowledgment and retry, and
//! peers that receive a message from someone else flood it on to the whole
//! group, so it spreads without a coordinator.
//!
//! # Architecture
//!
//! ```text
//!   send(payload)                     inbound datagram
//!        │                                   │
//!  ┌─────▼──────┐  spawn (bounded)    ┌──────▼──────┐
//!  │ Dispatcher │◀────── relay ───────│  RelayLoop  │── ACK ──▶ sender
//!  └─────┬──────┘                     │ (Session)   │
//!        │                            └──────▲──────┘
//!  ┌─────▼───────┐  group order              │ long-lived receive Socket
//!  │ Broadcaster │─────────┐                 │
//!  └─────────────┘         │                 │
//!                  ┌───────▼────────┐  frame │
//!                  │ ReliableSender │────────┘ (one ephemeral Socket per peer)
//!                  └────────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`checksum`]   : 16-bit Internet checksum over frame bodies
//! - [`envelope`]   : JSON envelope, data/ack frames, message ids
//! - [`socket`]     : async UDP socket abstraction
//! - [`timer`]      : ack timeout and retry schedule
//! - [`sender`]     : stop-and-wait unicast with retry
//! - [`broadcast`]  : sequential fan-out and the all-or-nothing verdict
//! - [`relay`]      : receive, verify, acknowledge, dedup, flood
//! - [`fault`]      : single-bit fault injection on the receive path
//! - [`tasks`]      : task registry and bounded broadcast dispatch
//! - [`events`]     : observable diagnostics
//! - [`group`]      : fixed group membership
//! - [`config`]     : process configuration and log directory rules
//! - [`state`]      : peer lifecycle state
//! - [`middleware`] : ties the above together for one peer

pub mod broadcast;
pub mod checksum;
pub mod config;
pub mod envelope;
pub mod events;
pub mod fault;
pub mod group;
pub mod middleware;
pub mod relay;
pub mod sender;
pub mod socket;
pub mod state;
pub mod tasks;
pub mod timer;

pub use broadcast::{Broadcaster, DeliveryVerdict, COMMUNICATION_ERROR};
pub use config::{ConfigError, LogSettings, NodeConfig};
pub use envelope::{Envelope, FrameError};
pub use events::{Event, Trigger};
pub use fault::FaultInjector;
pub use group::{Group, PeerAddress, PeerId};
pub use middleware::{Middleware, MiddlewareError};
pub use sender::{ReliableSender, SendError};
pub use state::PeerState;
pub use timer::RetryPolicy;
