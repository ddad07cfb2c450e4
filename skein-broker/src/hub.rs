//! The message hub: topic-addressed routing for typed messages.
//!
//! [`Router`] is the generic bus: one broadcast channel per topic, created
//! lazily on first use. [`Hub`] is the data-plane facade over a router of
//! [`DataMessage`]s with lifecycle state and counters; the store subsystem
//! additionally instantiates a `Router` of its own command type.

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use skein_core::{Data, Error, ErrorKind, Topic};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Default per-topic channel capacity.
const DEFAULT_CAPACITY: usize = 1024;

/// A value published to a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataMessage {
    /// The topic the value was published to.
    pub topic: Topic,
    /// The published value.
    pub data: Data,
}

impl DataMessage {
    /// Create a data message.
    pub fn new(topic: Topic, data: Data) -> Self {
        Self { topic, data }
    }
}

/// A topic-addressed broadcast router for one message type.
///
/// Subscribing returns a receiver on the topic's channel; publishing fans
/// out to every live subscriber. Dropping the router (or pruning a topic)
/// closes the channel, which subscribers observe as end-of-stream.
#[derive(Debug)]
pub struct Router<M> {
    routes: DashMap<Topic, broadcast::Sender<M>>,
    capacity: usize,
}

impl<M: Clone> Router<M> {
    /// Create a router with the default per-topic capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a router with a custom per-topic capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { routes: DashMap::new(), capacity }
    }

    /// Subscribe to a topic, creating its channel if needed.
    pub fn subscribe(&self, topic: &Topic) -> broadcast::Receiver<M> {
        self.routes
            .entry(topic.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Publish a message to a topic.
    ///
    /// Returns the number of subscribers reached; a topic without
    /// subscribers swallows the message.
    pub fn publish(&self, topic: &Topic, message: M) -> usize {
        let sender = self
            .routes
            .entry(topic.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        sender.send(message).unwrap_or(0)
    }

    /// Number of live subscribers on a topic.
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.routes.get(topic).map_or(0, |s| s.receiver_count())
    }

    /// Drop a topic's channel, closing every subscription on it.
    pub fn prune(&self, topic: &Topic) {
        self.routes.remove(topic);
    }

    /// Drop all channels, closing every subscription.
    pub fn clear(&self) {
        self.routes.clear();
    }
}

impl<M: Clone> Default for Router<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Hub state information.
#[derive(Debug)]
pub struct HubState {
    /// Whether the hub is currently running.
    pub running: bool,
    /// Total number of messages published.
    pub messages_published: u64,
    /// Number of topics with at least one channel.
    pub active_topics: usize,
}

/// The data-plane hub: lifecycle-managed pub/sub of [`DataMessage`]s.
#[derive(Debug)]
pub struct Hub {
    running: RwLock<bool>,
    router: Router<DataMessage>,
    message_counter: AtomicU64,
}

impl Hub {
    /// Create a new hub instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            running: RwLock::new(false),
            router: Router::new(),
            message_counter: AtomicU64::new(0),
        }
    }

    /// Create a started hub behind an `Arc`, ready to hand to actors.
    #[must_use]
    pub fn start_new() -> Arc<Self> {
        let hub = Self::new();
        *hub.running.write() = true;
        Arc::new(hub)
    }

    /// Start the hub.
    ///
    /// # Errors
    /// Returns an error if the hub is already running.
    pub fn start(&self) -> Result<(), Error> {
        info!("starting hub");
        let mut running = self.running.write();
        if *running {
            return Err(Error::with_message(ErrorKind::Unspecified, "hub is already running"));
        }
        *running = true;
        Ok(())
    }

    /// Stop the hub, closing all subscriptions.
    pub fn stop(&self) {
        info!("stopping hub");
        let mut running = self.running.write();
        if !*running {
            warn!("hub is not running");
            return;
        }
        *running = false;
        drop(running);
        self.router.clear();
    }

    /// Publish a value to a topic.
    ///
    /// # Errors
    /// Returns an error if the hub is not running.
    pub fn publish(&self, topic: &Topic, data: Data) -> Result<usize, Error> {
        if !*self.running.read() {
            return Err(Error::with_message(ErrorKind::Unspecified, "hub is not running"));
        }
        debug!(topic = %topic, "publishing message");
        let reached = self.router.publish(topic, DataMessage::new(topic.clone(), data));
        self.message_counter.fetch_add(1, Ordering::Relaxed);
        Ok(reached)
    }

    /// Subscribe to a topic.
    ///
    /// # Errors
    /// Returns an error if the hub is not running.
    pub fn subscribe(&self, topic: &Topic) -> Result<broadcast::Receiver<DataMessage>, Error> {
        if !*self.running.read() {
            return Err(Error::with_message(ErrorKind::Unspecified, "hub is not running"));
        }
        debug!(topic = %topic, "creating subscription");
        Ok(self.router.subscribe(topic))
    }

    /// Get the current hub state.
    #[must_use]
    pub fn state(&self) -> HubState {
        HubState {
            running: *self.running.read(),
            messages_published: self.message_counter.load(Ordering::Relaxed),
            active_topics: self.router.routes.len(),
        }
    }

    /// Total number of messages published.
    #[must_use]
    pub fn messages_published(&self) -> u64 {
        self.message_counter.load(Ordering::Relaxed)
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hub_lifecycle() {
        let hub = Hub::new();
        assert!(!hub.state().running);

        hub.start().expect("failed to start hub");
        assert!(hub.state().running);
        assert!(hub.start().is_err());

        hub.stop();
        assert!(!hub.state().running);
    }

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let hub = Hub::start_new();

        let topic = Topic::new("test.topic").unwrap();
        let mut rx = hub.subscribe(&topic).unwrap();

        hub.publish(&topic, Data::from("hello")).unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.topic, topic);
        assert_eq!(received.data, Data::from("hello"));
        assert_eq!(hub.messages_published(), 1);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_swallowed() {
        let hub = Hub::start_new();
        let topic = Topic::new("lonely").unwrap();
        assert_eq!(hub.publish(&topic, Data::from(1u64)).unwrap(), 0);
    }

    #[tokio::test]
    async fn stop_closes_subscriptions() {
        let hub = Hub::start_new();
        let topic = Topic::new("closing").unwrap();
        let mut rx = hub.subscribe(&topic).unwrap();

        hub.stop();

        match rx.recv().await {
            Err(broadcast::error::RecvError::Closed) => {}
            other => panic!("expected closed subscription, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn router_fans_out_to_all_subscribers() {
        let router: Router<u64> = Router::new();
        let topic = Topic::new("fan").unwrap();
        let mut a = router.subscribe(&topic);
        let mut b = router.subscribe(&topic);

        assert_eq!(router.publish(&topic, 7), 2);
        assert_eq!(a.recv().await.unwrap(), 7);
        assert_eq!(b.recv().await.unwrap(), 7);
        assert_eq!(router.subscriber_count(&topic), 2);
    }
}
