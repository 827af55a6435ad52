//! Lifecycle of spawned activities.
//!
//! The receive loop, locally requested broadcasts and relay broadcasts all
//! run as tokio tasks registered in one [`TaskSet`], so shutdown can abort
//! and drain them deterministically.  [`Dispatcher`] is the single place
//! broadcasts are started from; it bounds how many run at once and hands
//! the verdict back over a oneshot channel.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinSet;

use crate::broadcast::{Broadcaster, DeliveryVerdict};
use crate::events::{Event, EventBus, Trigger};

/// Registry of running tasks.  `None` once shut down.
#[derive(Debug, Clone)]
pub struct TaskSet {
    inner: Arc<Mutex<Option<JoinSet<()>>>>,
}

impl Default for TaskSet {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskSet {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(JoinSet::new()))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<JoinSet<()>>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Spawn `fut` onto the current runtime.  Returns `false` after shutdown.
    pub fn spawn<F>(&self, fut: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut guard = self.lock();
        let Some(set) = guard.as_mut() else {
            return false;
        };
        // Reap finished tasks so the set does not grow without bound.
        while set.try_join_next().is_some() {}
        set.spawn(fut);
        true
    }

    /// Tasks spawned and not yet reaped.
    pub fn len(&self) -> usize {
        self.lock().as_ref().map_or(0, JoinSet::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Abort every task and wait until all of them have stopped.
    pub async fn shutdown(&self) {
        let taken = self.lock().take();
        if let Some(mut set) = taken {
            set.abort_all();
            while set.join_next().await.is_some() {}
        }
    }
}

/// Starts broadcasts on the [`TaskSet`], at most `limit` at a time.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    broadcaster: Broadcaster,
    tasks: TaskSet,
    limiter: Arc<Semaphore>,
    events: EventBus,
}

impl Dispatcher {
    pub fn new(broadcaster: Broadcaster, tasks: TaskSet, limit: usize, events: EventBus) -> Self {
        Self {
            broadcaster,
            tasks,
            limiter: Arc::new(Semaphore::new(limit.max(1))),
            events,
        }
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// Spawn a broadcast of `payload`.
    ///
    /// The verdict is published as [`Event::Completed`] and delivered on the
    /// returned receiver.  Returns `None` once shut down.
    pub fn dispatch(
        &self,
        payload: String,
        trigger: Trigger,
    ) -> Option<oneshot::Receiver<DeliveryVerdict>> {
        let (tx, rx) = oneshot::channel();
        let broadcaster = self.broadcaster.clone();
        let limiter = Arc::clone(&self.limiter);
        let events = self.events.clone();

        let spawned = self.tasks.spawn(async move {
            let Ok(_permit) = limiter.acquire_owned().await else {
                return;
            };
            let verdict = broadcaster.broadcast(&payload).await;
            events.publish(Event::Completed {
                trigger,
                verdict: verdict.clone(),
            });
            // The requester may have stopped waiting.
            let _ = tx.send(verdict);
        });
        spawned.then_some(rx)
    }

    /// Refuse new broadcasts and stop the running ones.
    pub async fn shutdown(&self) {
        self.limiter.close();
        self.tasks.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::envelope::Frame;
    use crate::group::{Group, PeerAddress};
    use crate::sender::ReliableSender;
    use crate::socket::Socket;
    use crate::timer::RetryPolicy;

    #[tokio::test]
    async fn broadcasts_beyond_the_limit_wait_for_a_permit() {
        // A peer that never acknowledges keeps each broadcast busy for two
        // full attempts.
        let silent = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let group = Group::new(vec![PeerAddress::new(9, silent.local_addr.port())]).unwrap();
        let policy = RetryPolicy {
            ack_timeout: Duration::from_millis(100),
            pacing: Duration::ZERO,
            backoff: Duration::from_millis(10),
            max_retries: 1,
        };
        let events = EventBus::new();
        let broadcaster = Broadcaster::new(
            1,
            Arc::new(group),
            ReliableSender::new(policy, events.clone()),
        );
        let dispatcher = Dispatcher::new(broadcaster, TaskSet::new(), 1, events);

        let first = dispatcher.dispatch("a".into(), Trigger::Local).unwrap();
        let second = dispatcher.dispatch("b".into(), Trigger::Local).unwrap();

        let mut payloads = Vec::new();
        for _ in 0..4 {
            let (bytes, _) = tokio::time::timeout(Duration::from_secs(2), silent.recv_from())
                .await
                .expect("frame should arrive")
                .unwrap();
            payloads.push(Frame::split(&bytes).unwrap().envelope().unwrap().msg);
        }
        // Both transmissions of one broadcast land before the other starts.
        assert_eq!(payloads[0], payloads[1]);
        assert_eq!(payloads[2], payloads[3]);
        assert_ne!(payloads[1], payloads[2]);

        let first = first.await.unwrap();
        let second = second.await.unwrap();
        assert_eq!(first.payload, "a");
        assert_eq!(second.payload, "b");
        assert!(!first.is_delivered());
        assert!(!second.is_delivered());
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_aborts_pending_tasks() {
        let tasks = TaskSet::new();
        assert!(tasks.spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }));
        assert_eq!(tasks.len(), 1);

        tokio::time::timeout(Duration::from_secs(1), tasks.shutdown())
            .await
            .expect("shutdown should not wait for the sleeping task");
        assert!(tasks.is_empty());
        assert!(!tasks.spawn(async {}));
    }

    #[tokio::test]
    async fn finished_tasks_are_reaped_on_spawn() {
        let tasks = TaskSet::new();
        let (tx, rx) = oneshot::channel();
        tasks.spawn(async move {
            let _ = tx.send(());
        });
        rx.await.unwrap();
        // Give the runtime a moment to mark the task complete.
        tokio::time::sleep(Duration::from_millis(20)).await;
        tasks.spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        assert_eq!(tasks.len(), 1);
        tasks.shutdown().await;
    }
}
