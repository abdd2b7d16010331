//! In-memory broker implementing the [`Transport`] capability.
//!
//! Behaves like a single-node broker with named queues: FIFO delivery,
//! priority ordering when a queue declares `x-max-priority`, per-queue
//! message TTL, and redelivery of unacknowledged messages when a
//! connection goes away. Fault-injection handles and counters make it the
//! test double for the manager's recovery paths; it also backs the demo
//! programs. It is a reference adapter, not a wire protocol.

use crate::config::Config;
use crate::error::{QueueError, Result};
use crate::message::{Delivery, DeliveryTag};
use crate::transport::{Confirmation, Connector, QueueSpec, Transport};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Default)]
struct QueueState {
    durable: bool,
    message_ttl_ms: Option<u64>,
    max_priority: Option<u8>,
    messages: VecDeque<StoredMessage>,
}

struct StoredMessage {
    body: Vec<u8>,
    priority: u8,
    expires_at: Option<Instant>,
}

impl StoredMessage {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

impl QueueState {
    fn purge_expired(&mut self) {
        self.messages.retain(|message| !message.is_expired());
    }

    /// Highest priority wins; FIFO among equals.
    fn take_next(&mut self) -> Option<StoredMessage> {
        let index = self
            .messages
            .iter()
            .enumerate()
            .max_by_key(|(i, m)| (m.priority, std::cmp::Reverse(*i)))
            .map(|(i, _)| i)?;
        self.messages.remove(index)
    }
}

struct InFlight {
    queue: String,
    message: StoredMessage,
    owner: u64,
}

#[derive(Default)]
struct Faults {
    fail_connects: u32,
    fail_publishes: u32,
    fail_fetches: u32,
    fail_acks: u32,
    fail_depths: u32,
    nack_publishes: u32,
    unroutable_publishes: u32,
}

#[derive(Default)]
struct Stats {
    connects: u32,
    publish_attempts: u32,
    acks: u32,
    declares: Vec<QueueSpec>,
    published_priorities: Vec<Option<u8>>,
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, QueueState>,
    in_flight: HashMap<DeliveryTag, InFlight>,
    connections: HashMap<u64, Arc<AtomicBool>>,
    next_tag: DeliveryTag,
    next_connection: u64,
    faults: Faults,
    stats: Stats,
}

fn take_fault(counter: &mut u32) -> bool {
    if *counter > 0 {
        *counter -= 1;
        true
    } else {
        false
    }
}

fn requeue_in_flight(state: &mut BrokerState, owner: Option<u64>) {
    let tags: Vec<DeliveryTag> = state
        .in_flight
        .iter()
        .filter(|(_, flight)| owner.map_or(true, |id| flight.owner == id))
        .map(|(tag, _)| *tag)
        .collect();

    for tag in tags {
        if let Some(flight) = state.in_flight.remove(&tag) {
            if let Some(queue) = state.queues.get_mut(&flight.queue) {
                queue.messages.push_front(flight.message);
            }
        }
    }
}

/// Shared in-memory broker. Clones refer to the same broker, so a test can
/// keep a handle for inspection while the manager owns the connector.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Connector accepting any credentials.
    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            broker: self.clone(),
            credentials: None,
        }
    }

    /// Enqueues raw bytes directly, creating the queue if needed. Test
    /// hook for payloads the manager itself would refuse to produce.
    pub fn push_raw(&self, queue: &str, body: impl Into<Vec<u8>>) {
        let mut state = self.state();
        state
            .queues
            .entry(queue.to_string())
            .or_default()
            .messages
            .push_back(StoredMessage {
                body: body.into(),
                priority: 0,
                expires_at: None,
            });
    }

    /// Deletes a queue broker-side, as an operator would.
    pub fn drop_queue(&self, queue: &str) {
        self.state().queues.remove(queue);
    }

    /// Severs every live connection and requeues their unacknowledged
    /// deliveries, as a broker restart would.
    pub fn kill_connections(&self) {
        let mut state = self.state();
        for flag in state.connections.values() {
            flag.store(false, Ordering::SeqCst);
        }
        state.connections.clear();
        requeue_in_flight(&mut state, None);
    }

    pub fn fail_connects(&self, count: u32) {
        self.state().faults.fail_connects = count;
    }

    pub fn fail_publishes(&self, count: u32) {
        self.state().faults.fail_publishes = count;
    }

    pub fn fail_fetches(&self, count: u32) {
        self.state().faults.fail_fetches = count;
    }

    pub fn fail_acks(&self, count: u32) {
        self.state().faults.fail_acks = count;
    }

    pub fn fail_depths(&self, count: u32) {
        self.state().faults.fail_depths = count;
    }

    pub fn nack_publishes(&self, count: u32) {
        self.state().faults.nack_publishes = count;
    }

    pub fn unroutable_publishes(&self, count: u32) {
        self.state().faults.unroutable_publishes = count;
    }

    /// Number of connection attempts seen, successful or not.
    pub fn connects(&self) -> u32 {
        self.state().stats.connects
    }

    /// Number of publish calls that reached the broker.
    pub fn publish_attempts(&self) -> u32 {
        self.state().stats.publish_attempts
    }

    pub fn acks(&self) -> u32 {
        self.state().stats.acks
    }

    /// Every queue declaration seen, in order.
    pub fn declared(&self) -> Vec<QueueSpec> {
        self.state().stats.declares.clone()
    }

    /// Priority property attached to each publish, in order.
    pub fn published_priorities(&self) -> Vec<Option<u8>> {
        self.state().stats.published_priorities.clone()
    }
}

/// [`Connector`] handing out connections to a [`MemoryBroker`].
pub struct MemoryConnector {
    broker: MemoryBroker,
    credentials: Option<(String, String)>,
}

impl MemoryConnector {
    pub fn new(broker: MemoryBroker) -> Self {
        broker.connector()
    }

    /// Connector that only accepts the given credentials.
    pub fn with_credentials(
        broker: MemoryBroker,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            broker,
            credentials: Some((username.into(), password.into())),
        }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, config: &Config) -> Result<Box<dyn Transport>> {
        let mut state = self.broker.state();
        state.stats.connects += 1;

        if take_fault(&mut state.faults.fail_connects) {
            return Err(QueueError::Connection(
                "injected connect failure".to_string(),
            ));
        }

        if let Some((username, password)) = &self.credentials {
            if config.username != *username || config.password != *password {
                return Err(QueueError::Authentication(format!(
                    "access refused for user '{}'",
                    config.username
                )));
            }
        }

        state.next_connection += 1;
        let id = state.next_connection;
        let open = Arc::new(AtomicBool::new(true));
        state.connections.insert(id, Arc::clone(&open));

        Ok(Box::new(MemoryTransport {
            broker: self.broker.clone(),
            id,
            open,
        }))
    }
}

/// One live connection to a [`MemoryBroker`].
pub struct MemoryTransport {
    broker: MemoryBroker,
    id: u64,
    open: Arc<AtomicBool>,
}

impl MemoryTransport {
    fn state(&self) -> Result<MutexGuard<'_, BrokerState>> {
        if !self.is_open() {
            return Err(QueueError::StreamLost("connection is closed".to_string()));
        }
        Ok(self.broker.state())
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn declare_queue(&self, spec: &QueueSpec) -> Result<()> {
        let mut state = self.state()?;
        state.stats.declares.push(spec.clone());

        let queue = state.queues.entry(spec.name.clone()).or_default();
        queue.durable = spec.durable;
        queue.message_ttl_ms = spec.message_ttl_ms;
        queue.max_priority = spec.max_priority;
        Ok(())
    }

    async fn publish(
        &self,
        routing_key: &str,
        body: &[u8],
        priority: Option<u8>,
        confirm: bool,
    ) -> Result<Confirmation> {
        let mut state = self.state()?;
        state.stats.publish_attempts += 1;

        if take_fault(&mut state.faults.fail_publishes) {
            return Err(QueueError::StreamLost("injected stream loss".to_string()));
        }

        state.stats.published_priorities.push(priority);

        if take_fault(&mut state.faults.unroutable_publishes) {
            return Ok(Confirmation::Unroutable);
        }
        if confirm && take_fault(&mut state.faults.nack_publishes) {
            return Ok(Confirmation::Nacked);
        }

        // Default exchange: the routing key must name an existing queue.
        let Some(queue) = state.queues.get_mut(routing_key) else {
            return Ok(Confirmation::Unroutable);
        };

        let effective_priority = match queue.max_priority {
            Some(max) => priority.unwrap_or(0).min(max),
            None => 0,
        };
        let expires_at = queue
            .message_ttl_ms
            .map(|ms| Instant::now() + Duration::from_millis(ms));

        queue.messages.push_back(StoredMessage {
            body: body.to_vec(),
            priority: effective_priority,
            expires_at,
        });
        Ok(Confirmation::Acked)
    }

    async fn fetch_one(&self, queue: &str) -> Result<Option<Delivery>> {
        let mut state = self.state()?;

        if take_fault(&mut state.faults.fail_fetches) {
            return Err(QueueError::StreamLost("injected stream loss".to_string()));
        }

        let taken = {
            let Some(queue_state) = state.queues.get_mut(queue) else {
                return Err(QueueError::QueueMissing {
                    queue: queue.to_string(),
                });
            };
            queue_state.purge_expired();
            queue_state.take_next()
        };

        let Some(message) = taken else {
            return Ok(None);
        };

        state.next_tag += 1;
        let tag = state.next_tag;
        let delivery = Delivery::new(tag, message.body.clone());
        state.in_flight.insert(
            tag,
            InFlight {
                queue: queue.to_string(),
                message,
                owner: self.id,
            },
        );
        Ok(Some(delivery))
    }

    async fn ack(&self, tag: DeliveryTag) -> Result<()> {
        let mut state = self.state()?;

        if take_fault(&mut state.faults.fail_acks) {
            return Err(QueueError::StreamLost("injected stream loss".to_string()));
        }

        match state.in_flight.remove(&tag) {
            Some(_) => {
                state.stats.acks += 1;
                Ok(())
            }
            None => Err(QueueError::Broker(format!("unknown delivery tag {tag}"))),
        }
    }

    async fn queue_depth(&self, queue: &str) -> Result<u32> {
        let mut state = self.state()?;

        if take_fault(&mut state.faults.fail_depths) {
            return Err(QueueError::StreamLost("injected stream loss".to_string()));
        }

        let Some(queue_state) = state.queues.get_mut(queue) else {
            return Err(QueueError::QueueMissing {
                queue: queue.to_string(),
            });
        };
        queue_state.purge_expired();
        Ok(queue_state.messages.len() as u32)
    }

    async fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        let mut state = self.broker.state();
        state.connections.remove(&self.id);
        requeue_in_flight(&mut state, Some(self.id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;

    fn spec(name: &str, max_priority: Option<u8>, ttl_ms: Option<u64>) -> QueueSpec {
        QueueSpec {
            name: name.to_string(),
            durable: true,
            message_ttl_ms: ttl_ms,
            max_priority,
        }
    }

    async fn open_transport(broker: &MemoryBroker) -> Box<dyn Transport> {
        broker
            .connector()
            .connect(&ConfigBuilder::new().queue("q").build())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_fifo_delivery() {
        let broker = MemoryBroker::new();
        let transport = open_transport(&broker).await;
        transport.declare_queue(&spec("q", None, None)).await.unwrap();

        for body in ["a", "b", "c"] {
            transport
                .publish("q", body.as_bytes(), None, false)
                .await
                .unwrap();
        }

        for expected in ["a", "b", "c"] {
            let delivery = transport.fetch_one("q").await.unwrap().unwrap();
            assert_eq!(delivery.body, expected.as_bytes());
            transport.ack(delivery.tag).await.unwrap();
        }
        assert!(transport.fetch_one("q").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_priority_queue_delivers_highest_first() {
        let broker = MemoryBroker::new();
        let transport = open_transport(&broker).await;
        transport
            .declare_queue(&spec("q", Some(5), None))
            .await
            .unwrap();

        for (body, priority) in [("low", 1u8), ("high", 5), ("mid", 3)] {
            transport
                .publish("q", body.as_bytes(), Some(priority), false)
                .await
                .unwrap();
        }

        let mut order = Vec::new();
        while let Some(delivery) = transport.fetch_one("q").await.unwrap() {
            order.push(String::from_utf8(delivery.body.clone()).unwrap());
            transport.ack(delivery.tag).await.unwrap();
        }
        assert_eq!(order, vec!["high", "mid", "low"]);
    }

    #[tokio::test]
    async fn test_depth_excludes_in_flight_messages() {
        let broker = MemoryBroker::new();
        let transport = open_transport(&broker).await;
        transport.declare_queue(&spec("q", None, None)).await.unwrap();

        transport.publish("q", b"one", None, false).await.unwrap();
        transport.publish("q", b"two", None, false).await.unwrap();
        assert_eq!(transport.queue_depth("q").await.unwrap(), 2);

        let delivery = transport.fetch_one("q").await.unwrap().unwrap();
        assert_eq!(transport.queue_depth("q").await.unwrap(), 1);

        transport.ack(delivery.tag).await.unwrap();
        assert_eq!(transport.queue_depth("q").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unacknowledged_messages_requeue_on_close() {
        let broker = MemoryBroker::new();
        let transport = open_transport(&broker).await;
        transport.declare_queue(&spec("q", None, None)).await.unwrap();
        transport.publish("q", b"pending", None, false).await.unwrap();

        let delivery = transport.fetch_one("q").await.unwrap().unwrap();
        assert_eq!(delivery.body, b"pending");
        transport.close().await.unwrap();

        let transport = open_transport(&broker).await;
        let redelivered = transport.fetch_one("q").await.unwrap().unwrap();
        assert_eq!(redelivered.body, b"pending");
    }

    #[tokio::test]
    async fn test_kill_connections_marks_transports_closed() {
        let broker = MemoryBroker::new();
        let transport = open_transport(&broker).await;
        assert!(transport.is_open());

        broker.kill_connections();
        assert!(!transport.is_open());
        assert!(matches!(
            transport.fetch_one("q").await,
            Err(QueueError::StreamLost(_))
        ));
    }

    #[tokio::test]
    async fn test_expired_messages_are_dropped() {
        let broker = MemoryBroker::new();
        let transport = open_transport(&broker).await;
        transport
            .declare_queue(&spec("q", None, Some(1)))
            .await
            .unwrap();
        transport.publish("q", b"ephemeral", None, false).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(transport.queue_depth("q").await.unwrap(), 0);
        assert!(transport.fetch_one("q").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_publish_to_unknown_queue_is_unroutable() {
        let broker = MemoryBroker::new();
        let transport = open_transport(&broker).await;

        let outcome = transport.publish("nowhere", b"x", None, true).await.unwrap();
        assert_eq!(outcome, Confirmation::Unroutable);
    }

    #[tokio::test]
    async fn test_rejects_wrong_credentials() {
        let broker = MemoryBroker::new();
        let connector = MemoryConnector::with_credentials(broker.clone(), "admin", "secret");

        let config = ConfigBuilder::new()
            .queue("q")
            .username("admin")
            .password("wrong")
            .build();
        assert!(matches!(
            connector.connect(&config).await,
            Err(QueueError::Authentication(_))
        ));

        let config = ConfigBuilder::new()
            .queue("q")
            .username("admin")
            .password("secret")
            .build();
        assert!(connector.connect(&config).await.is_ok());
    }
}
