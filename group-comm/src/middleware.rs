//! Per-peer group-communication middleware.
//!
//! A [`Middleware`] owns everything one peer process needs:
//! - its identity and the immutable group list,
//! - the receive endpoint, bound at construction and handed to the
//!   [`RelayLoop`] when listening starts,
//! - the sequence counter (inside the [`Broadcaster`]),
//! - the event bus, the task set, and the broadcast concurrency limit.
//!
//! Local sends and relays both go through the same [`Dispatcher`], so every
//! broadcast is bounded, observable, and stopped by [`Middleware::shutdown`].

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::{broadcast, oneshot};

use crate::broadcast::{Broadcaster, DeliveryVerdict};
use crate::config::NodeConfig;
use crate::events::{Event, EventBus, Trigger};
use crate::fault::FaultInjector;
use crate::group::PeerAddress;
use crate::relay::RelayLoop;
use crate::sender::ReliableSender;
use crate::socket::Socket;
use crate::state::PeerState;
use crate::tasks::{Dispatcher, TaskSet};

#[derive(Debug, Error)]
pub enum MiddlewareError {
    #[error("cannot bind receive endpoint {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("peer is already listening")]
    AlreadyListening,
    #[error("middleware has been shut down")]
    ShutDown,
}

/// One peer's middleware instance.
#[derive(Debug)]
pub struct Middleware {
    local: PeerAddress,
    fault: Option<FaultInjector>,
    events: EventBus,
    tasks: TaskSet,
    dispatcher: Dispatcher,
    state: Mutex<PeerState>,
    /// Present until `listen` moves it into the relay loop.
    endpoint: Mutex<Option<Socket>>,
}

impl Middleware {
    /// Bind the receive endpoint at the peer's configured address.
    pub async fn bind(config: NodeConfig) -> Result<Self, MiddlewareError> {
        let addr = config.local.socket_addr();
        let endpoint = Socket::bind(addr)
            .await
            .map_err(|source| MiddlewareError::Bind { addr, source })?;
        Ok(Self::with_endpoint(config, endpoint))
    }

    /// Build around an already bound receive endpoint.
    pub fn with_endpoint(config: NodeConfig, endpoint: Socket) -> Self {
        let events = EventBus::new();
        let tasks = TaskSet::new();
        let sender = ReliableSender::new(config.retry, events.clone());
        let broadcaster = Broadcaster::new(config.local.id, Arc::new(config.group), sender);
        let dispatcher = Dispatcher::new(
            broadcaster,
            tasks.clone(),
            config.max_concurrent_broadcasts,
            events.clone(),
        );
        Self {
            local: config.local,
            fault: config.fault,
            events,
            tasks,
            dispatcher,
            state: Mutex::new(PeerState::Idle),
            endpoint: Mutex::new(Some(endpoint)),
        }
    }

    pub fn local(&self) -> PeerAddress {
        self.local
    }

    pub fn state(&self) -> PeerState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Sequence numbers consumed by this peer so far.
    pub fn sequence(&self) -> u64 {
        self.dispatcher.broadcaster().sequence()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Start the receive/relay loop with a fresh session (`Idle → Listening`).
    pub fn listen(&self) -> Result<(), MiddlewareError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state == PeerState::Listening {
            return Err(MiddlewareError::AlreadyListening);
        }
        let endpoint = self
            .endpoint
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(MiddlewareError::AlreadyListening)?;

        let relay = RelayLoop::new(
            self.local.id,
            endpoint,
            self.fault.clone(),
            self.dispatcher.clone(),
            self.events.clone(),
        );
        if !self.tasks.spawn(relay.run()) {
            return Err(MiddlewareError::ShutDown);
        }
        *state = PeerState::Listening;

        log::info!("Peer {} is listening on port {}", self.local.id, self.local.port);
        self.events.publish(Event::Listening { local: self.local });
        Ok(())
    }

    /// Broadcast `payload` to the whole group in the background.
    ///
    /// The returned receiver resolves to the verdict once every peer has
    /// acknowledged or exhausted its retries.
    pub fn send(
        &self,
        payload: impl Into<String>,
    ) -> Result<oneshot::Receiver<DeliveryVerdict>, MiddlewareError> {
        let payload = payload.into();
        log::info!("Peer {} is sending: {payload}", self.local.id);
        self.dispatcher
            .dispatch(payload, Trigger::Local)
            .ok_or(MiddlewareError::ShutDown)
    }

    /// Abort the relay loop and every in-flight broadcast.
    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
        log::info!("Peer {} shut down", self.local.id);
    }
}
