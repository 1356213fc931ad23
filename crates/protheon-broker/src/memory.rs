//! In-process broker
//!
//! Mirrors the delivery semantics the rest of the system relies on:
//! durable named queues, per-session prefetch, manual acknowledgment, and
//! redelivery of unacknowledged messages when their session goes away.
//! Failure injection (`fail_next_connects`, `sever_connections`) drives the
//! connector and re-subscription paths without a live RabbitMQ.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::Notify;

use crate::error::{BrokerError, Result};
use crate::transport::{Acknowledger, Delivery, DeliveryStream, MessageProperties, Session, Transport};

/// A message resting in a queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub body: Vec<u8>,
    pub properties: MessageProperties,
    pub redelivered: bool,
}

#[derive(Default)]
struct MemoryQueue {
    ready: VecDeque<StoredMessage>,
    unacked: HashMap<u64, (u64, StoredMessage)>,
}

impl MemoryQueue {
    fn in_flight(&self, session: u64) -> usize {
        self.unacked.values().filter(|(owner, _)| *owner == session).count()
    }
}

#[derive(Default)]
struct State {
    queues: HashMap<String, MemoryQueue>,
    /// Open sessions and their prefetch limit
    sessions: HashMap<u64, u16>,
    next_session: u64,
    next_tag: u64,
    fail_connects: u32,
    fail_subscribes: u32,
    connect_attempts: u32,
}

impl State {
    /// Drop a session and put its unacked messages back at the head of their queues.
    fn release_session(&mut self, session: u64) {
        if self.sessions.remove(&session).is_none() {
            return;
        }

        for queue in self.queues.values_mut() {
            let mut returned: Vec<(u64, StoredMessage)> = queue
                .unacked
                .iter()
                .filter(|(_, (owner, _))| *owner == session)
                .map(|(tag, (_, msg))| (*tag, msg.clone()))
                .collect();
            returned.sort_by_key(|(tag, _)| std::cmp::Reverse(*tag));

            for (tag, mut msg) in returned {
                queue.unacked.remove(&tag);
                msg.redelivered = true;
                queue.ready.push_front(msg);
            }
        }
    }
}

struct Shared {
    state: Mutex<State>,
    changed: Notify,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to an in-memory broker. Clones share the same queues.
#[derive(Clone)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                changed: Notify::new(),
            }),
        }
    }

    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            broker: self.clone(),
        }
    }

    /// Make the next `count` connect attempts fail.
    pub fn fail_next_connects(&self, count: u32) {
        self.shared.state().fail_connects = count;
    }

    /// Make the next `count` consume calls fail on otherwise healthy sessions.
    pub fn fail_next_subscribes(&self, count: u32) {
        self.shared.state().fail_subscribes = count;
    }

    /// Total connect attempts seen, successful or not.
    pub fn connect_attempts(&self) -> u32 {
        self.shared.state().connect_attempts
    }

    /// Number of sessions currently open.
    pub fn open_sessions(&self) -> usize {
        self.shared.state().sessions.len()
    }

    /// Declare `queue` and append a message to it, as if a publisher had.
    pub fn push(&self, queue: &str, body: impl Into<Vec<u8>>) {
        let mut state = self.shared.state();
        state
            .queues
            .entry(queue.to_string())
            .or_default()
            .ready
            .push_back(StoredMessage {
                body: body.into(),
                properties: MessageProperties::default(),
                redelivered: false,
            });
        drop(state);
        self.shared.changed.notify_waiters();
    }

    /// Messages waiting for a consumer, in delivery order.
    pub fn ready_messages(&self, queue: &str) -> Vec<StoredMessage> {
        self.shared
            .state()
            .queues
            .get(queue)
            .map(|q| q.ready.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn ready_count(&self, queue: &str) -> usize {
        self.shared
            .state()
            .queues
            .get(queue)
            .map_or(0, |q| q.ready.len())
    }

    pub fn unacked_count(&self, queue: &str) -> usize {
        self.shared
            .state()
            .queues
            .get(queue)
            .map_or(0, |q| q.unacked.len())
    }

    pub fn has_queue(&self, queue: &str) -> bool {
        self.shared.state().queues.contains_key(queue)
    }

    /// Close every open session as a broker restart would: delivery streams
    /// end, further calls on old sessions fail, unacked messages are requeued.
    pub fn sever_connections(&self) {
        let mut state = self.shared.state();
        let sessions: Vec<u64> = state.sessions.keys().copied().collect();
        for session in sessions {
            state.release_session(session);
        }
        drop(state);
        self.shared.changed.notify_waiters();
    }
}

/// [`Transport`] over a [`MemoryBroker`]
#[derive(Clone)]
pub struct MemoryTransport {
    broker: MemoryBroker,
}

#[async_trait]
impl Transport for MemoryTransport {
    type Session = MemorySession;

    async fn connect(&self, _endpoint: &str) -> Result<MemorySession> {
        let mut state = self.broker.shared.state();
        state.connect_attempts += 1;

        if state.fail_connects > 0 {
            state.fail_connects -= 1;
            return Err(BrokerError::Connection("connection refused".to_string()));
        }

        state.next_session += 1;
        let id = state.next_session;
        state.sessions.insert(id, 0);

        Ok(MemorySession {
            shared: self.broker.shared.clone(),
            id,
        })
    }
}

/// Session on a [`MemoryBroker`]. Dropping it behaves like a lost connection.
pub struct MemorySession {
    shared: Arc<Shared>,
    id: u64,
}

impl MemorySession {
    fn ensure_open(&self, state: &State) -> Result<()> {
        if state.sessions.contains_key(&self.id) {
            Ok(())
        } else {
            Err(BrokerError::Protocol("channel closed".to_string()))
        }
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn declare_queue(&self, queue: &str) -> Result<()> {
        let mut state = self.shared.state();
        self.ensure_open(&state)?;
        state.queues.entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn publish(
        &self,
        queue: &str,
        payload: &[u8],
        properties: &MessageProperties,
    ) -> Result<()> {
        let mut state = self.shared.state();
        self.ensure_open(&state)?;

        let target = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::Protocol(format!("no queue '{queue}'")))?;
        target.ready.push_back(StoredMessage {
            body: payload.to_vec(),
            properties: properties.clone(),
            redelivered: false,
        });

        drop(state);
        self.shared.changed.notify_waiters();
        Ok(())
    }

    async fn set_prefetch(&self, count: u16) -> Result<()> {
        let mut state = self.shared.state();
        self.ensure_open(&state)?;
        state.sessions.insert(self.id, count);
        Ok(())
    }

    async fn consume(&self, queue: &str, _consumer_tag: &str) -> Result<DeliveryStream> {
        {
            let mut state = self.shared.state();
            self.ensure_open(&state)?;
            if state.fail_subscribes > 0 {
                state.fail_subscribes -= 1;
                return Err(BrokerError::Protocol("consumer refused".to_string()));
            }
            if !state.queues.contains_key(queue) {
                return Err(BrokerError::Protocol(format!("no queue '{queue}'")));
            }
        }

        let subscription = Subscription {
            shared: self.shared.clone(),
            session: self.id,
            queue: queue.to_string(),
        };

        let stream = futures::stream::unfold(subscription, |sub| async move {
            let delivery = sub.next_delivery().await?;
            Some((Ok(delivery), sub))
        });

        Ok(stream.boxed())
    }

    async fn close(self) -> Result<()> {
        // Drop does the work
        Ok(())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.shared.state().release_session(self.id);
        self.shared.changed.notify_waiters();
    }
}

struct Subscription {
    shared: Arc<Shared>,
    session: u64,
    queue: String,
}

impl Subscription {
    /// Wait for a deliverable message; `None` once the session is gone.
    async fn next_delivery(&self) -> Option<Delivery> {
        loop {
            let notified = self.shared.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.shared.state();
                let prefetch = *state.sessions.get(&self.session)?;
                state.next_tag += 1;
                let tag = state.next_tag;
                let queue = state.queues.get_mut(&self.queue)?;

                if prefetch == 0 || queue.in_flight(self.session) < usize::from(prefetch) {
                    if let Some(msg) = queue.ready.pop_front() {
                        let delivery = Delivery::new(
                            tag,
                            msg.body.clone(),
                            msg.redelivered,
                            Box::new(MemoryAcker {
                                shared: self.shared.clone(),
                                queue: self.queue.clone(),
                                tag,
                            }),
                        );
                        queue.unacked.insert(tag, (self.session, msg));
                        return Some(delivery);
                    }
                }
            }

            notified.await;
        }
    }
}

struct MemoryAcker {
    shared: Arc<Shared>,
    queue: String,
    tag: u64,
}

impl MemoryAcker {
    fn settle(&self, requeue: bool) -> Result<()> {
        let mut state = self.shared.state();
        let queue = state
            .queues
            .get_mut(&self.queue)
            .ok_or_else(|| BrokerError::Protocol(format!("no queue '{}'", self.queue)))?;

        let (_, mut msg) = queue.unacked.remove(&self.tag).ok_or_else(|| {
            BrokerError::Protocol(format!("unknown delivery tag {} (channel closed?)", self.tag))
        })?;

        if requeue {
            msg.redelivered = true;
            queue.ready.push_front(msg);
        }

        drop(state);
        self.shared.changed.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) -> Result<()> {
        self.settle(false)
    }

    async fn nack(&self, requeue: bool) -> Result<()> {
        self.settle(requeue)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_connect_failures_are_injected_and_counted() {
        let broker = MemoryBroker::new();
        broker.fail_next_connects(1);
        let transport = broker.transport();

        assert!(transport.connect("mem://").await.is_err());
        assert!(transport.connect("mem://").await.is_ok());
        assert_eq!(broker.connect_attempts(), 2);
    }

    #[tokio::test]
    async fn test_publish_requires_declared_queue() {
        let broker = MemoryBroker::new();
        let session = broker.transport().connect("mem://").await.unwrap();

        let props = MessageProperties::default();
        assert!(session.publish("jobs", b"x", &props).await.is_err());

        session.declare_queue("jobs").await.unwrap();
        session.declare_queue("jobs").await.unwrap();
        session.publish("jobs", b"x", &props).await.unwrap();
        assert_eq!(broker.ready_count("jobs"), 1);
    }

    #[tokio::test]
    async fn test_prefetch_bounds_unacked_deliveries() {
        let broker = MemoryBroker::new();
        for i in 0..4 {
            broker.push("jobs", format!("job-{i}"));
        }

        let session = broker.transport().connect("mem://").await.unwrap();
        session.set_prefetch(2).await.unwrap();
        let mut stream = session.consume("jobs", "test").await.unwrap();

        let first = stream.next().await.unwrap().unwrap();
        let _second = stream.next().await.unwrap().unwrap();

        // Third delivery waits until one of the first two is settled
        let blocked = tokio::time::timeout(Duration::from_millis(50), stream.next()).await;
        assert!(blocked.is_err());
        assert_eq!(broker.unacked_count("jobs"), 2);

        first.ack().await.unwrap();
        let third = stream.next().await.unwrap().unwrap();
        assert_eq!(third.body, b"job-2");
    }

    #[tokio::test]
    async fn test_dropped_session_requeues_unacked_in_order() {
        let broker = MemoryBroker::new();
        broker.push("jobs", "a");
        broker.push("jobs", "b");
        broker.push("jobs", "c");

        {
            let session = broker.transport().connect("mem://").await.unwrap();
            let mut stream = session.consume("jobs", "test").await.unwrap();
            let _a = stream.next().await.unwrap().unwrap();
            let _b = stream.next().await.unwrap().unwrap();
        }

        let ready = broker.ready_messages("jobs");
        let bodies: Vec<&[u8]> = ready.iter().map(|m| m.body.as_slice()).collect();
        assert_eq!(bodies, vec![&b"a"[..], b"b", b"c"]);
        assert!(ready[0].redelivered && ready[1].redelivered && !ready[2].redelivered);
        assert_eq!(broker.unacked_count("jobs"), 0);
    }

    #[tokio::test]
    async fn test_sever_ends_streams_and_rejects_late_acks() {
        let broker = MemoryBroker::new();
        broker.push("jobs", "a");

        let session = broker.transport().connect("mem://").await.unwrap();
        let mut stream = session.consume("jobs", "test").await.unwrap();
        let delivery = stream.next().await.unwrap().unwrap();

        broker.sever_connections();

        assert!(stream.next().await.is_none());
        assert!(delivery.ack().await.is_err());
        assert!(session
            .publish("jobs", b"b", &MessageProperties::default())
            .await
            .is_err());
        assert_eq!(broker.ready_count("jobs"), 1);
    }
}
