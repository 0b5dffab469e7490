// src/core/pubsub/memory.rs

//! An in-process publish/subscribe backend.

use super::glob::glob_match;
use super::{PubSubBackend, SubscriptionContext};
use crate::core::{BridgeError, Delivery};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

/// The capacity of each subscriber's delivery queue.
const DELIVERY_QUEUE_CAPACITY: usize = 128;

/// The subscriptions and delivery queue of one subscription context.
#[derive(Debug)]
struct Subscriber {
    channels: HashSet<String>,
    patterns: HashSet<String>,
    tx: mpsc::Sender<Delivery>,
}

#[derive(Debug, Default)]
struct BrokerInner {
    subscribers: DashMap<u64, Subscriber>,
    next_id: AtomicU64,
    disconnected: AtomicBool,
}

/// `MemoryBroker` keeps every subscription in process. Cloning it yields
/// another handle to the same broker.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Default::default()
    }

    /// Delivers a message to every matching subscriber.
    ///
    /// Direct channel subscribers receive a plain message. Each matching
    /// pattern of a subscriber produces one pattern message. Returns the
    /// number of deliveries queued.
    pub fn deliver(&self, channel: &str, payload: &str) -> usize {
        let mut receivers = 0;
        for entry in self.inner.subscribers.iter() {
            let subscriber = entry.value();
            if subscriber.channels.contains(channel) {
                receivers += queue(&subscriber.tx, Delivery::message(channel, payload));
            }
            for pattern in &subscriber.patterns {
                if glob_match(pattern.as_bytes(), channel.as_bytes()) {
                    receivers +=
                        queue(&subscriber.tx, Delivery::pmessage(pattern.as_str(), channel, payload));
                }
            }
        }
        receivers
    }

    /// Simulates losing the backend: every delivery stream ends and every
    /// health check fails from now on.
    pub fn disconnect(&self) {
        self.inner.disconnected.store(true, Ordering::SeqCst);
        self.inner.subscribers.clear();
        debug!("Memory broker disconnected all subscription contexts.");
    }

    pub fn is_disconnected(&self) -> bool {
        self.inner.disconnected.load(Ordering::SeqCst)
    }

    /// Returns every channel with at least one direct subscriber, sorted.
    pub fn channels(&self) -> Vec<String> {
        self.inner
            .subscribers
            .iter()
            .flat_map(|e| e.value().channels.iter().cloned().collect::<Vec<_>>())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Returns the number of contexts directly subscribed to `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.inner
            .subscribers
            .iter()
            .filter(|e| e.value().channels.contains(channel))
            .count()
    }

    /// Returns the total number of active pattern subscriptions.
    pub fn pattern_count(&self) -> usize {
        self.inner
            .subscribers
            .iter()
            .map(|e| e.value().patterns.len())
            .sum()
    }

    /// Returns the number of open subscription contexts.
    pub fn context_count(&self) -> usize {
        self.inner.subscribers.len()
    }
}

fn queue(tx: &mpsc::Sender<Delivery>, delivery: Delivery) -> usize {
    match tx.try_send(delivery) {
        Ok(()) => 1,
        Err(TrySendError::Full(dropped)) => {
            warn!(
                "Delivery queue full, dropping message for channel '{}'.",
                dropped.channel
            );
            0
        }
        // The context is being torn down.
        Err(TrySendError::Closed(_)) => 0,
    }
}

#[async_trait]
impl PubSubBackend for MemoryBroker {
    type Context = MemorySubscription;

    async fn new_subscription_context(&self) -> Result<Self::Context, BridgeError> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(DELIVERY_QUEUE_CAPACITY);
        if !self.is_disconnected() {
            self.inner.subscribers.insert(
                id,
                Subscriber {
                    channels: HashSet::new(),
                    patterns: HashSet::new(),
                    tx,
                },
            );
        }
        Ok(MemorySubscription {
            broker: self.clone(),
            id,
            deliveries: Some(ReceiverStream::new(rx)),
        })
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BridgeError> {
        if self.is_disconnected() {
            return Err(BridgeError::Exec("backend is disconnected".into()));
        }
        let receivers = self.deliver(channel, payload);
        debug!("Published to '{}', {} receiver(s).", channel, receivers);
        Ok(())
    }
}

/// A subscription context registered with a `MemoryBroker`.
#[derive(Debug)]
pub struct MemorySubscription {
    broker: MemoryBroker,
    id: u64,
    deliveries: Option<ReceiverStream<Delivery>>,
}

impl MemorySubscription {
    fn update<F>(&self, f: F) -> Result<(), BridgeError>
    where
        F: FnOnce(&mut Subscriber),
    {
        match self.broker.inner.subscribers.get_mut(&self.id) {
            Some(mut subscriber) => {
                f(subscriber.value_mut());
                Ok(())
            }
            None => Err(BridgeError::Exec("subscription context is closed".into())),
        }
    }
}

#[async_trait]
impl SubscriptionContext for MemorySubscription {
    type Deliveries = ReceiverStream<Delivery>;

    async fn ping(&mut self) -> Result<(), BridgeError> {
        if self.broker.is_disconnected() || !self.broker.inner.subscribers.contains_key(&self.id)
        {
            return Err(BridgeError::BackendDisconnected);
        }
        Ok(())
    }

    async fn subscribe(&mut self, channels: &[String]) -> Result<(), BridgeError> {
        self.update(|s| s.channels.extend(channels.iter().cloned()))
    }

    async fn psubscribe(&mut self, patterns: &[String]) -> Result<(), BridgeError> {
        self.update(|s| s.patterns.extend(patterns.iter().cloned()))
    }

    async fn unsubscribe(&mut self, channels: &[String]) -> Result<(), BridgeError> {
        self.update(|s| {
            for channel in channels {
                s.channels.remove(channel);
            }
        })
    }

    async fn punsubscribe(&mut self, patterns: &[String]) -> Result<(), BridgeError> {
        self.update(|s| {
            for pattern in patterns {
                s.patterns.remove(pattern);
            }
        })
    }

    fn deliveries(&mut self) -> Option<Self::Deliveries> {
        self.deliveries.take()
    }

    async fn close(self) -> Result<(), BridgeError> {
        self.broker.inner.subscribers.remove(&self.id);
        Ok(())
    }
}
