//! Capability traits for the broker connection consumed by the manager.
//!
//! A [`Transport`] stands for one live connection + channel pair on a
//! concrete driver; a [`Connector`] knows how to dial new ones. The
//! manager never reuses a transport after a failure — it asks the
//! connector for a replacement instead.

use crate::config::Config;
use crate::error::Result;
use crate::message::{Delivery, DeliveryTag};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Broker-side queue parameters applied at declare time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSpec {
    pub name: String,
    pub durable: bool,
    /// Per-queue message expiration in milliseconds (`x-message-ttl`).
    pub message_ttl_ms: Option<u64>,
    /// Highest usable priority (`x-max-priority`); present when priority
    /// mode is enabled.
    pub max_priority: Option<u8>,
}

impl QueueSpec {
    pub fn from_config(config: &Config) -> Self {
        Self {
            name: config.queue.clone(),
            durable: config.durable,
            message_ttl_ms: config.message_ttl_ms(),
            max_priority: config.max_priority,
        }
    }
}

/// Outcome of a publish as reported by the broker.
///
/// Without delivery confirmation a transport reports `Acked` as soon as
/// the publish call itself succeeds; `Nacked` can only be observed in
/// confirm mode, while `Unroutable` may be reported either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Acked,
    Nacked,
    Unroutable,
}

/// One open broker connection + channel.
///
/// A transport is not safe for concurrent use by multiple callers; the
/// manager owns it exclusively and replaces the whole instance on every
/// reopen rather than repairing it in place.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Whether the underlying connection still considers itself usable.
    fn is_open(&self) -> bool;

    /// Declares (creates or asserts) the queue with the given parameters.
    async fn declare_queue(&self, spec: &QueueSpec) -> Result<()>;

    /// Publishes one message to the default exchange.
    ///
    /// With `confirm` set the call must not return `Acked` until the
    /// broker has acknowledged receipt.
    async fn publish(
        &self,
        routing_key: &str,
        body: &[u8],
        priority: Option<u8>,
        confirm: bool,
    ) -> Result<Confirmation>;

    /// Fetches a single message without waiting; `None` when the queue is
    /// empty. The returned delivery stays unacknowledged until
    /// [`Transport::ack`] is called with its tag.
    async fn fetch_one(&self, queue: &str) -> Result<Option<Delivery>>;

    /// Acknowledges one delivery.
    async fn ack(&self, tag: DeliveryTag) -> Result<()>;

    /// Number of messages currently available for delivery, via passive
    /// inspection only — must not create or alter the queue.
    async fn queue_depth(&self, queue: &str) -> Result<u32>;

    /// Closes the connection. Further calls on this transport fail.
    async fn close(&self) -> Result<()>;
}

/// Dials new broker connections from a [`Config`].
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &Config) -> Result<Box<dyn Transport>>;
}
