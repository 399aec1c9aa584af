//! Redis pub/sub adapter.
//!
//! Publishing and subscribing run over two connections owned by the same
//! runtime instance: a multiplexed command connection for PUBLISH and a
//! dedicated pub/sub connection for the input subscription. Both are
//! released in the same teardown step.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::{AsyncCommands, IntoConnectionInfo};
use weft_contract::{BusMessage, ExtensionError};

use crate::{BusConnection, BusConnector, BusSubscription};

#[derive(Debug, Clone)]
/// Connection parameters for the Redis bus.
pub struct RedisConnectorConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl RedisConnectorConfig {
    /// Resolves the URL plus credential overrides into connection info.
    /// Explicit username/password settings win over whatever the URL
    /// carries.
    fn connection_info(&self) -> Result<redis::ConnectionInfo, ExtensionError> {
        let mut info = self
            .url
            .as_str()
            .into_connection_info()
            .map_err(|error| ExtensionError::Connection(format!("invalid redis url: {error}")))?;
        if let Some(username) = &self.username {
            info.redis.username = Some(username.clone());
        }
        if let Some(password) = &self.password {
            info.redis.password = Some(password.clone());
        }
        Ok(info)
    }
}

/// Public struct `RedisBusConnector` used across Weft components.
pub struct RedisBusConnector {
    config: RedisConnectorConfig,
}

impl RedisBusConnector {
    pub fn new(config: RedisConnectorConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BusConnector for RedisBusConnector {
    async fn connect(&self) -> Result<Box<dyn BusConnection>, ExtensionError> {
        let info = self.config.connection_info()?;
        let client = redis::Client::open(info)
            .map_err(|error| ExtensionError::Connection(format!("invalid redis target: {error}")))?;
        let command = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|error| {
                ExtensionError::Connection(format!("redis connect failed: {error}"))
            })?;
        Ok(Box::new(RedisBusConnection {
            client,
            command,
            closed: AtomicBool::new(false),
        }))
    }
}

struct RedisBusConnection {
    client: redis::Client,
    command: redis::aio::MultiplexedConnection,
    closed: AtomicBool,
}

#[async_trait]
impl BusConnection for RedisBusConnection {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), ExtensionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ExtensionError::Transport(format!(
                "publish on {channel} after connection close"
            )));
        }
        let mut command = self.command.clone();
        let _receivers: i64 = command.publish(channel, payload).await.map_err(|error| {
            ExtensionError::Transport(format!("publish on {channel} failed: {error}"))
        })?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn BusSubscription>, ExtensionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ExtensionError::Transport(format!(
                "subscribe on {channel} after connection close"
            )));
        }
        let mut pubsub = self.client.get_async_pubsub().await.map_err(|error| {
            ExtensionError::Connection(format!("redis pubsub connect failed: {error}"))
        })?;
        pubsub.subscribe(channel).await.map_err(|error| {
            ExtensionError::Transport(format!("subscribe on {channel} failed: {error}"))
        })?;
        Ok(Box::new(RedisBusSubscription {
            pubsub: Some(pubsub),
            channel: channel.to_string(),
        }))
    }

    async fn close(&self) -> Result<(), ExtensionError> {
        // The multiplexed connection has no explicit close; marking the
        // handle closed is what makes later publishes fail deterministically.
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct RedisBusSubscription {
    pubsub: Option<redis::aio::PubSub>,
    channel: String,
}

#[async_trait]
impl BusSubscription for RedisBusSubscription {
    async fn next_message(&mut self) -> Result<Option<BusMessage>, ExtensionError> {
        let Some(pubsub) = self.pubsub.as_mut() else {
            return Ok(None);
        };
        let stream = pubsub.on_message();
        futures_util::pin_mut!(stream);
        match stream.next().await {
            Some(message) => {
                let channel = message.get_channel_name().to_string();
                let payload: String = message.get_payload().map_err(|error| {
                    ExtensionError::Transport(format!(
                        "undecodable payload on {channel}: {error}"
                    ))
                })?;
                Ok(Some(BusMessage::data(channel, payload)))
            }
            None => Ok(None),
        }
    }

    async fn unsubscribe(&mut self) -> Result<(), ExtensionError> {
        let Some(mut pubsub) = self.pubsub.take() else {
            return Ok(());
        };
        pubsub.unsubscribe(&self.channel).await.map_err(|error| {
            ExtensionError::Transport(format!(
                "unsubscribe from {} failed: {error}",
                self.channel
            ))
        })
    }
}

#[cfg(test)]
pub(crate) fn connection_info_for_tests(
    config: &RedisConnectorConfig,
) -> Result<redis::ConnectionInfo, ExtensionError> {
    config.connection_info()
}
