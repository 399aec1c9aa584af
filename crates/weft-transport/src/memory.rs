//! In-process bus with the same trait surface as the Redis adapter.
//!
//! Used by unit and integration tests and by local development. The bus
//! records every publish and subscription registration so tests can assert
//! protocol ordering, emits a `Subscribed` control frame at subscribe time
//! to exercise the runtime's control-skip transition, and can be severed to
//! simulate a dropped connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::broadcast;
use weft_contract::{BusMessage, BusMessageKind, ExtensionError};

use crate::{BusConnection, BusConnector, BusSubscription};

const MEMORY_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Recorded bus activity, in observation order.
pub enum BusEvent {
    Subscribed { channel: String },
    Published { channel: String, payload: String },
}

#[derive(Default)]
struct MemoryBusInner {
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
    events: Mutex<Vec<BusEvent>>,
    refuse_connections: bool,
}

#[derive(Clone, Default)]
/// Public struct `MemoryBus` used across Weft components.
pub struct MemoryBus {
    inner: Arc<MemoryBusInner>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// A bus whose connector refuses every connection attempt.
    pub fn refusing_connections() -> Self {
        Self {
            inner: Arc::new(MemoryBusInner {
                refuse_connections: true,
                ..MemoryBusInner::default()
            }),
        }
    }

    pub fn connector(&self) -> MemoryBusConnector {
        MemoryBusConnector {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Delivers a payload to current subscribers of `channel`, returning
    /// the number of receivers. This is the test-side stand-in for the
    /// dispatching orchestrator and is not recorded as bus activity.
    pub fn send(&self, channel: &str, payload: &str) -> usize {
        let channels = self.inner.channels.lock().expect("bus channels lock");
        match channels.get(channel) {
            Some(sender) => sender.send(payload.to_string()).unwrap_or(0),
            None => 0,
        }
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        let channels = self.inner.channels.lock().expect("bus channels lock");
        channels
            .get(channel)
            .map(broadcast::Sender::receiver_count)
            .unwrap_or(0)
    }

    /// Drops every channel sender; open subscriptions observe end-of-stream.
    pub fn sever(&self) {
        self.inner
            .channels
            .lock()
            .expect("bus channels lock")
            .clear();
    }

    pub fn events(&self) -> Vec<BusEvent> {
        self.inner.events.lock().expect("bus events lock").clone()
    }

    pub fn published_on(&self, channel: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                BusEvent::Published {
                    channel: published_channel,
                    payload,
                } if published_channel == channel => Some(payload),
                _ => None,
            })
            .collect()
    }
}

impl MemoryBusInner {
    fn record(&self, event: BusEvent) {
        self.events.lock().expect("bus events lock").push(event);
    }

    fn sender_for(&self, channel: &str) -> broadcast::Sender<String> {
        let mut channels = self.channels.lock().expect("bus channels lock");
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(MEMORY_CHANNEL_CAPACITY).0)
            .clone()
    }
}

/// Public struct `MemoryBusConnector` used across Weft components.
pub struct MemoryBusConnector {
    inner: Arc<MemoryBusInner>,
}

#[async_trait]
impl BusConnector for MemoryBusConnector {
    async fn connect(&self) -> Result<Box<dyn BusConnection>, ExtensionError> {
        if self.inner.refuse_connections {
            return Err(ExtensionError::Connection(
                "bus refused the connection".into(),
            ));
        }
        Ok(Box::new(MemoryBusConnection {
            inner: Arc::clone(&self.inner),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemoryBusConnection {
    inner: Arc<MemoryBusInner>,
    closed: AtomicBool,
}

#[async_trait]
impl BusConnection for MemoryBusConnection {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), ExtensionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ExtensionError::Transport(format!(
                "publish on {channel} after connection close"
            )));
        }
        self.inner.record(BusEvent::Published {
            channel: channel.to_string(),
            payload: payload.to_string(),
        });
        // Fire-and-forget: publishing with no subscribers is not an error.
        let _ = self.inner.sender_for(channel).send(payload.to_string());
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn BusSubscription>, ExtensionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ExtensionError::Transport(format!(
                "subscribe on {channel} after connection close"
            )));
        }
        let receiver = self.inner.sender_for(channel).subscribe();
        self.inner.record(BusEvent::Subscribed {
            channel: channel.to_string(),
        });
        Ok(Box::new(MemoryBusSubscription {
            channel: channel.to_string(),
            receiver: Some(receiver),
            pending: vec![BusMessage::control(BusMessageKind::Subscribed, channel)],
        }))
    }

    async fn close(&self) -> Result<(), ExtensionError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct MemoryBusSubscription {
    channel: String,
    receiver: Option<broadcast::Receiver<String>>,
    pending: Vec<BusMessage>,
}

#[async_trait]
impl BusSubscription for MemoryBusSubscription {
    async fn next_message(&mut self) -> Result<Option<BusMessage>, ExtensionError> {
        if !self.pending.is_empty() {
            return Ok(Some(self.pending.remove(0)));
        }
        let Some(receiver) = self.receiver.as_mut() else {
            return Ok(None);
        };
        loop {
            match receiver.recv().await {
                Ok(payload) => return Ok(Some(BusMessage::data(self.channel.clone(), payload))),
                Err(broadcast::error::RecvError::Closed) => return Ok(None),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(channel = %self.channel, skipped, "bus subscription lagged");
                }
            }
        }
    }

    async fn unsubscribe(&mut self) -> Result<(), ExtensionError> {
        self.receiver = None;
        self.pending.clear();
        Ok(())
    }
}
