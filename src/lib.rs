//! # rmq-manager
//!
//! A resilient queue manager for AMQP-style message brokers: publish to a
//! named queue, fetch messages (blocking or non-blocking), inspect queue
//! depth, and recover transparently from connection loss.
//!
//! The manager talks to the broker through the [`Transport`] capability
//! trait, so any driver that can declare a queue, publish with optional
//! delivery confirmation, fetch one message, and acknowledge a delivery
//! tag can sit underneath it. A fully functional in-memory broker
//! ([`MemoryBroker`]) ships with the crate for tests and prototyping.
//!
//! ## Quick Start
//!
//! ```
//! use rmq_manager::{MemoryBroker, QueueManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), rmq_manager::QueueError> {
//!     let broker = MemoryBroker::new();
//!     let mut manager = QueueManager::new(broker.connector(), "jobs");
//!
//!     // Publish a message; with confirmation enabled (the default) this
//!     // returns once the broker has accepted it.
//!     manager.add("Hello, queue!").await?;
//!     assert_eq!(manager.size().await?, 1);
//!
//!     // Fetch it back; the delivery is acknowledged before it is
//!     // handed over.
//!     if let Some(message) = manager.get().await? {
//!         println!("received: {message}");
//!     }
//!
//!     manager.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Failure recovery
//!
//! Every operation checks the connection first and reopens it on demand —
//! an explicit [`QueueManager::open`] is optional. When the connection
//! drops mid-operation, the operation is retried exactly once after a
//! forced reopen; a second failure surfaces as [`QueueError::StreamLost`]
//! so a persistent outage is never masked by silent retries.
//!
//! ## Configuration
//!
//! [`ConfigBuilder`] covers the broker address, credentials, queue
//! durability, per-queue message TTL, priority mode, and delivery
//! confirmation:
//!
//! ```
//! use rmq_manager::ConfigBuilder;
//!
//! let config = ConfigBuilder::new()
//!     .host("broker.internal")
//!     .port(5672)
//!     .username("worker")
//!     .password("secret")
//!     .queue("orders")
//!     .durable(true)
//!     .message_ttl_minutes(10)
//!     .max_priority(5)
//!     .confirm_delivery(true)
//!     .build();
//! ```

pub mod config;
pub mod error;
pub mod manager;
pub mod memory;
pub mod message;
pub mod transport;
mod retry;

pub use config::{Config, ConfigBuilder};
pub use error::{DeliveryFailure, QueueError, Result};
pub use manager::{Messages, QueueManager};
pub use memory::{MemoryBroker, MemoryConnector, MemoryTransport};
pub use message::{Delivery, DeliveryTag};
pub use transport::{Confirmation, Connector, QueueSpec, Transport};
