//! Publish/subscribe bus adapters for Weft extension runtimes.
//!
//! Defines the transport trait seam the runtime drives (connect, publish,
//! subscribe, teardown) plus two implementations: the production Redis
//! pub/sub adapter and an in-process bus used by tests.

use async_trait::async_trait;
use weft_contract::{BusMessage, ExtensionError};

mod memory;
mod redis_transport;

pub use memory::{BusEvent, MemoryBus, MemoryBusConnector};
pub use redis_transport::{RedisBusConnector, RedisConnectorConfig};

#[async_trait]
/// Trait contract for `BusConnector` behavior.
///
/// A connector owns the transport configuration and yields one connection
/// per runtime instance. Connect failures are `ExtensionError::Connection`
/// and are fatal to the calling process.
pub trait BusConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn BusConnection>, ExtensionError>;
}

#[async_trait]
/// Trait contract for `BusConnection` behavior.
pub trait BusConnection: Send + Sync {
    /// Fire-and-forget publish. Fails with `ExtensionError::Transport`
    /// once the connection is closed.
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), ExtensionError>;

    /// Registers a subscription on `channel`. The returned subscription is
    /// a lazy, potentially infinite sequence of `BusMessage`.
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn BusSubscription>, ExtensionError>;

    /// Idempotent; closing twice, or after the peer dropped, never raises.
    async fn close(&self) -> Result<(), ExtensionError>;
}

#[async_trait]
/// Trait contract for `BusSubscription` behavior.
pub trait BusSubscription: Send {
    /// Suspends until the next message arrives. Returns `Ok(None)` once the
    /// subscription is released or the connection is severed.
    async fn next_message(&mut self) -> Result<Option<BusMessage>, ExtensionError>;

    /// Idempotent; releasing twice never raises.
    async fn unsubscribe(&mut self) -> Result<(), ExtensionError>;
}

#[cfg(test)]
mod tests;
