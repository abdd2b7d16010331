use crate::config::{Config, ConfigBuilder};
use crate::error::{DeliveryFailure, QueueError, Result};
use crate::message::Delivery;
use crate::retry::RetryGate;
use crate::transport::{Confirmation, Connector, QueueSpec, Transport};
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Connection lifecycle owned by the manager. The `Open` variant carries
/// the live transport, so there is no separate "connected but no channel"
/// state to get out of sync.
enum ConnectionState {
    Closed,
    Open(Box<dyn Transport>),
}

/// Resilient façade over one broker queue.
///
/// A `QueueManager` owns at most one transport at a time, reopens it on
/// demand when the broker connection goes away, and retries an in-flight
/// operation exactly once after a mid-operation connection loss. Publishes
/// wait for broker confirmation when [`Config::confirm_delivery`] is set,
/// and every fetched message is acknowledged before it is handed to the
/// caller.
///
/// All operations take `&mut self`: one instance serves one logical
/// producer/consumer at a time, and sharing an instance across tasks
/// requires external serialization (e.g. a mutex).
///
/// # Examples
///
/// ```
/// use rmq_manager::{MemoryBroker, QueueManager};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), rmq_manager::QueueError> {
/// let broker = MemoryBroker::new();
/// let mut manager = QueueManager::new(broker.connector(), "jobs");
///
/// manager.add("first job").await?;
/// assert_eq!(manager.size().await?, 1);
/// assert_eq!(manager.get().await?.as_deref(), Some("first job"));
///
/// manager.close().await;
/// # Ok(())
/// # }
/// ```
pub struct QueueManager {
    config: Config,
    connector: Box<dyn Connector>,
    state: ConnectionState,
}

impl QueueManager {
    /// Creates a manager for the named queue with default configuration
    /// (`localhost:5672`, `guest`/`guest`, durable queue, delivery
    /// confirmation on).
    pub fn new(connector: impl Connector + 'static, queue: impl Into<String>) -> Self {
        let config = ConfigBuilder::new().queue(queue).build();
        Self::with_config(connector, config)
    }

    /// Creates a manager with custom configuration.
    ///
    /// # Examples
    ///
    /// ```
    /// use rmq_manager::{ConfigBuilder, MemoryBroker, QueueManager};
    ///
    /// let broker = MemoryBroker::new();
    /// let config = ConfigBuilder::new()
    ///     .queue("orders")
    ///     .durable(true)
    ///     .message_ttl_minutes(10)
    ///     .max_priority(5)
    ///     .build();
    ///
    /// let manager = QueueManager::with_config(broker.connector(), config);
    /// ```
    pub fn with_config(connector: impl Connector + 'static, config: Config) -> Self {
        Self {
            config,
            connector: Box::new(connector),
            state: ConnectionState::Closed,
        }
    }

    /// Returns a [`ConfigBuilder`], equivalent to [`ConfigBuilder::new()`].
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Whether the manager currently holds a transport that reports open.
    pub fn is_open(&self) -> bool {
        matches!(&self.state, ConnectionState::Open(transport) if transport.is_open())
    }

    /// Establishes the connection and declares the queue.
    ///
    /// Declares with the configured durability, message TTL (minutes,
    /// converted to a millisecond queue argument), and maximum priority.
    /// A no-op success when already open. On failure the state stays
    /// closed and the error is surfaced:
    /// [`QueueError::Authentication`] for refused credentials,
    /// [`QueueError::Connection`] for an unreachable broker.
    pub async fn open(&mut self) -> Result<()> {
        if self.is_open() {
            return Ok(());
        }
        // Drop any transport that stopped reporting open.
        self.close().await;

        let transport = self.connector.connect(&self.config).await?;
        let spec = QueueSpec::from_config(&self.config);
        if let Err(error) = transport.declare_queue(&spec).await {
            let _ = transport.close().await;
            return Err(error);
        }

        info!(
            host = %self.config.host,
            port = self.config.port,
            queue = %self.config.queue,
            "broker connection established"
        );
        self.state = ConnectionState::Open(transport);
        Ok(())
    }

    /// Closes the connection. A no-op when already closed; close failures
    /// are logged, never raised.
    pub async fn close(&mut self) {
        let state = std::mem::replace(&mut self.state, ConnectionState::Closed);
        if let ConnectionState::Open(transport) = state {
            if let Err(error) = transport.close().await {
                warn!(error = %error, "error while closing broker connection");
            }
            info!(queue = %self.config.queue, "broker connection closed");
        }
    }

    /// Opens the connection, runs `f` against this manager, and closes on
    /// every exit path, including when `f` returns an error.
    ///
    /// # Examples
    ///
    /// ```
    /// use rmq_manager::{MemoryBroker, QueueManager};
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), rmq_manager::QueueError> {
    /// let broker = MemoryBroker::new();
    /// let mut manager = QueueManager::new(broker.connector(), "jobs");
    ///
    /// manager
    ///     .with_open(|queue| {
    ///         Box::pin(async move {
    ///             queue.add("scoped job").await?;
    ///             Ok(())
    ///         })
    ///     })
    ///     .await?;
    ///
    /// assert!(!manager.is_open());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn with_open<T, F>(&mut self, f: F) -> Result<T>
    where
        F: for<'a> FnOnce(
            &'a mut QueueManager,
        ) -> Pin<Box<dyn Future<Output = Result<T>> + 'a>>,
    {
        self.open().await?;
        let result = f(self).await;
        self.close().await;
        result
    }

    /// Publishes one message to the queue.
    ///
    /// Returns `true` once the broker has accepted the message (or, with
    /// delivery confirmation disabled, once the publish itself succeeds).
    /// This method never returns `false`: a negative acknowledgement or
    /// an unroutable message raises [`QueueError::Delivery`] instead, so
    /// a rejected publish cannot be mistaken for success.
    ///
    /// # Errors
    ///
    /// * [`QueueError::Delivery`] when the broker refuses the message
    /// * [`QueueError::StreamLost`] when the connection drops and the
    ///   single reopen-and-retry fails as well
    /// * [`QueueError::Connection`] / [`QueueError::Authentication`] when
    ///   the implicit reopen cannot re-establish the connection
    pub async fn add(&mut self, body: impl Into<String>) -> Result<bool> {
        let body = body.into();
        self.publish(&body, None).await
    }

    /// Publishes one message with an explicit priority.
    ///
    /// The priority is attached as a message property only when the queue
    /// was configured with [`ConfigBuilder::max_priority`]; without
    /// priority mode it is ignored. Messages published through [`add`]
    /// on a priority queue carry the lowest priority, 0.
    ///
    /// [`add`]: QueueManager::add
    pub async fn add_with_priority(
        &mut self,
        body: impl Into<String>,
        priority: u8,
    ) -> Result<bool> {
        let body = body.into();
        self.publish(&body, Some(priority)).await
    }

    /// Publishes every item in order, stopping at the first error.
    pub async fn add_all<I, S>(&mut self, items: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for item in items {
            self.add(item).await?;
        }
        Ok(())
    }

    async fn publish(&mut self, body: &str, priority: Option<u8>) -> Result<bool> {
        self.ensure_open().await?;

        let priority = match self.config.max_priority {
            Some(_) => Some(priority.unwrap_or(0)),
            None => None,
        };

        let mut gate = RetryGate::new();
        loop {
            match self.publish_once(body.as_bytes(), priority).await {
                Err(err) if gate.admits(&err) => {
                    warn!(error = %err, "connection lost while publishing, reopening");
                    self.reopen().await?;
                }
                result => return result,
            }
        }
    }

    async fn publish_once(&self, body: &[u8], priority: Option<u8>) -> Result<bool> {
        let outcome = self
            .transport()?
            .publish(
                &self.config.queue,
                body,
                priority,
                self.config.confirm_delivery,
            )
            .await?;

        match outcome {
            Confirmation::Acked => Ok(true),
            Confirmation::Nacked => Err(DeliveryFailure::Nacked.into()),
            Confirmation::Unroutable => Err(DeliveryFailure::Unroutable.into()),
        }
    }

    /// Fetches one message without waiting.
    ///
    /// Returns `Ok(None)` when the queue is empty — that is not an error.
    /// A fetched message is acknowledged immediately, before its payload
    /// is decoded and returned; if the acknowledgement or the decode
    /// fails, the failure is logged and the call yields `Ok(None)` rather
    /// than a raw transport error.
    ///
    /// # Errors
    ///
    /// * [`QueueError::QueueMissing`] when the broker no longer knows the
    ///   queue; the connection is force-closed first
    /// * [`QueueError::StreamLost`] when the connection drops and the
    ///   single reopen-and-retry fails as well
    pub async fn get(&mut self) -> Result<Option<String>> {
        self.ensure_open().await?;

        let mut gate = RetryGate::new();
        let fetched = loop {
            match self.fetch_once().await {
                Ok(delivery) => break delivery,
                Err(err) if gate.admits(&err) => {
                    warn!(error = %err, "connection lost while fetching, reopening");
                    self.reopen().await?;
                }
                Err(err @ QueueError::QueueMissing { .. }) => {
                    error!(
                        queue = %self.config.queue,
                        "queue is missing on the broker, closing connection"
                    );
                    self.close().await;
                    return Err(err);
                }
                Err(err) => return Err(err),
            }
        };

        let Some(delivery) = fetched else {
            return Ok(None);
        };

        if let Err(err) = self.transport()?.ack(delivery.tag).await {
            error!(error = %err, tag = delivery.tag, "failed to acknowledge delivery");
            return Ok(None);
        }

        match delivery.into_text() {
            Ok(text) => Ok(Some(text)),
            Err(err) => {
                error!(error = %err, "discarding malformed message payload");
                Ok(None)
            }
        }
    }

    async fn fetch_once(&self) -> Result<Option<Delivery>> {
        self.transport()?.fetch_one(&self.config.queue).await
    }

    /// Number of messages currently available for delivery.
    ///
    /// Uses passive inspection only — the queue is neither created nor
    /// altered. The value is a best-effort snapshot; concurrent producers
    /// and consumers can change it before the call returns.
    pub async fn size(&mut self) -> Result<u32> {
        self.ensure_open().await?;

        let mut gate = RetryGate::new();
        loop {
            let result = match self.transport() {
                Ok(transport) => transport.queue_depth(&self.config.queue).await,
                Err(err) => Err(err),
            };
            match result {
                Err(err) if gate.admits(&err) => {
                    warn!(error = %err, "connection lost while inspecting queue, reopening");
                    self.reopen().await?;
                }
                result => return result,
            }
        }
    }

    /// Waits for a message, polling [`get`] at the configured interval.
    ///
    /// With a timeout, returns `Ok(None)` once the elapsed wall-clock time
    /// exceeds it — giving up is not an error. Without a timeout the call
    /// blocks until a message arrives; timeout expiry is the only
    /// cancellation mechanism. Broker errors from the underlying fetch
    /// propagate.
    ///
    /// [`get`]: QueueManager::get
    pub async fn consume(&mut self, timeout: Option<Duration>) -> Result<Option<String>> {
        let started = Instant::now();
        loop {
            if let Some(message) = self.get().await? {
                return Ok(Some(message));
            }
            if let Some(limit) = timeout {
                if started.elapsed() >= limit {
                    return Ok(None);
                }
            }
            sleep(self.config.poll_interval).await;
        }
    }

    /// Lazy view over the messages currently in the queue.
    ///
    /// Each [`Messages::next`] call fetches (and acknowledges) one
    /// message; the view ends after the first empty fetch and stays
    /// finished. Queue state is external, so a fresh view observes
    /// messages that arrived after the previous one ended.
    ///
    /// # Examples
    ///
    /// ```
    /// use rmq_manager::{MemoryBroker, QueueManager};
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), rmq_manager::QueueError> {
    /// let broker = MemoryBroker::new();
    /// let mut manager = QueueManager::new(broker.connector(), "jobs");
    /// manager.add_all(["a", "b"]).await?;
    ///
    /// let mut drained = Vec::new();
    /// let mut messages = manager.messages();
    /// while let Some(message) = messages.next().await? {
    ///     drained.push(message);
    /// }
    /// assert_eq!(drained, vec!["a", "b"]);
    /// # Ok(())
    /// # }
    /// ```
    pub fn messages(&mut self) -> Messages<'_> {
        Messages {
            manager: self,
            done: false,
        }
    }

    /// The single place reconnection is decided: every operation calls
    /// this before touching the transport.
    async fn ensure_open(&mut self) -> Result<()> {
        if self.is_open() {
            return Ok(());
        }
        warn!(queue = %self.config.queue, "broker connection is not open, reconnecting");
        self.open().await
    }

    /// Replaces the transport wholesale; a failed instance is never
    /// repaired in place.
    async fn reopen(&mut self) -> Result<()> {
        self.close().await;
        self.open().await
    }

    fn transport(&self) -> Result<&dyn Transport> {
        match &self.state {
            ConnectionState::Open(transport) => Ok(transport.as_ref()),
            ConnectionState::Closed => Err(QueueError::NotConnected),
        }
    }
}

/// Lazy message view returned by [`QueueManager::messages`].
pub struct Messages<'a> {
    manager: &'a mut QueueManager,
    done: bool,
}

impl Messages<'_> {
    /// Fetches the next message; `Ok(None)` once the queue was observed
    /// empty, after which the view is finished.
    pub async fn next(&mut self) -> Result<Option<String>> {
        if self.done {
            return Ok(None);
        }
        let message = self.manager.get().await?;
        if message.is_none() {
            self.done = true;
        }
        Ok(message)
    }
}
