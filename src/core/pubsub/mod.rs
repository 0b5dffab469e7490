// src/core/pubsub/mod.rs

//! The publish-subscribe backend seen by a connection.
//!
//! A `PubSubBackend` is shared by every connection. Each connection opens its
//! own `SubscriptionContext`, which tracks that connection's channels and
//! patterns and yields the messages published to them.

use crate::core::{BridgeError, Delivery};
use async_trait::async_trait;
use futures::Stream;

pub mod glob;
pub mod memory;
pub mod redis;

pub use memory::MemoryBroker;
pub use redis::RedisBackend;

/// A publish/subscribe system connections are bridged to.
#[async_trait]
pub trait PubSubBackend: Send + Sync + 'static {
    type Context: SubscriptionContext + 'static;

    /// Opens a subscription context with no subscriptions.
    async fn new_subscription_context(&self) -> Result<Self::Context, BridgeError>;

    /// Publishes `payload` to `channel`. Needs no subscription context.
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BridgeError>;
}

/// One connection's view of the backend.
///
/// The command methods are driven by the inbound loop while the delivery
/// stream, once taken, is consumed by the outbound loop.
#[async_trait]
pub trait SubscriptionContext: Send {
    /// The stream of messages for this context. It ends when the backend
    /// connection is lost.
    type Deliveries: Stream<Item = Delivery> + Send + Unpin + 'static;

    async fn ping(&mut self) -> Result<(), BridgeError>;

    async fn subscribe(&mut self, channels: &[String]) -> Result<(), BridgeError>;

    async fn psubscribe(&mut self, patterns: &[String]) -> Result<(), BridgeError>;

    async fn unsubscribe(&mut self, channels: &[String]) -> Result<(), BridgeError>;

    async fn punsubscribe(&mut self, patterns: &[String]) -> Result<(), BridgeError>;

    /// Takes the delivery stream. Returns `None` if it was already taken.
    fn deliveries(&mut self) -> Option<Self::Deliveries>;

    /// Releases the context and everything it subscribed to.
    async fn close(self) -> Result<(), BridgeError>
    where
        Self: Sized;
}
