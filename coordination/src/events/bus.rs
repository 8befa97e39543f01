//! Message bus for swarm coordination
//!
//! Topic pub/sub plus direct and broadcast delivery to registered workers.
//! Every subscriber owns an unbounded mpsc receiver, so `publish` never waits
//! on a slow handler and each subscriber sees a topic's messages in publish
//! order. Delivery is at-most-once: a message sent to a dropped receiver is
//! counted as undelivered and the dead subscription is pruned.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::types::{BusMessage, MessageSummary, MessageTarget};

/// Number of message summaries retained for observability
const HISTORY_CAPACITY: usize = 256;

/// Shared reference to MessageBus
pub type SharedMessageBus = Arc<MessageBus>;

type Sender = mpsc::UnboundedSender<BusMessage>;

/// Counters kept by the bus. Messages themselves are never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusStats {
    /// Topic publishes
    pub published: u64,
    /// Successful deliveries to individual receivers
    pub delivered: u64,
    /// Deliveries that found no live receiver
    pub undelivered: u64,
    pub direct_sent: u64,
    pub broadcasts: u64,
    /// Messages per topic (`direct` and `broadcast` for addressed sends)
    pub per_topic: BTreeMap<String, u64>,
}

/// Receiving side of a topic subscription.
pub struct Subscription {
    topic: String,
    subscriber_id: String,
    receiver: mpsc::UnboundedReceiver<BusMessage>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn subscriber_id(&self) -> &str {
        &self.subscriber_id
    }

    /// Wait for the next message. `None` once unsubscribed.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<BusMessage> {
        self.receiver.try_recv().ok()
    }
}

/// Receiving side of a worker's direct/broadcast mailbox.
pub struct Mailbox {
    worker_id: String,
    receiver: mpsc::UnboundedReceiver<BusMessage>,
}

impl Mailbox {
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub async fn recv(&mut self) -> Option<BusMessage> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<BusMessage> {
        self.receiver.try_recv().ok()
    }
}

#[derive(Default)]
struct Routes {
    /// topic -> subscriber id -> sender
    topics: HashMap<String, HashMap<String, Sender>>,
    /// worker id -> mailbox sender
    mailboxes: HashMap<String, Sender>,
}

#[derive(Default)]
struct Observations {
    stats: BusStats,
    history: VecDeque<MessageSummary>,
}

/// Topic and direct-addressed asynchronous messaging between workers.
pub struct MessageBus {
    routes: RwLock<Routes>,
    observations: Mutex<Observations>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self {
            routes: RwLock::new(Routes::default()),
            observations: Mutex::new(Observations::default()),
        }
    }

    /// Create a shared reference to this bus
    pub fn shared(self) -> SharedMessageBus {
        Arc::new(self)
    }

    /// Register a worker for direct and broadcast delivery.
    ///
    /// Re-registering replaces the previous mailbox, which then closes.
    pub async fn register(&self, worker_id: &str) -> Mailbox {
        let (tx, rx) = mpsc::unbounded_channel();
        let replaced = self
            .routes
            .write()
            .await
            .mailboxes
            .insert(worker_id.to_string(), tx);
        if replaced.is_some() {
            debug!(worker = worker_id, "Replaced existing mailbox");
        }
        Mailbox {
            worker_id: worker_id.to_string(),
            receiver: rx,
        }
    }

    pub async fn deregister(&self, worker_id: &str) -> bool {
        self.routes
            .write()
            .await
            .mailboxes
            .remove(worker_id)
            .is_some()
    }

    pub async fn is_registered(&self, worker_id: &str) -> bool {
        self.routes.read().await.mailboxes.contains_key(worker_id)
    }

    pub async fn registered_workers(&self) -> Vec<String> {
        let mut workers: Vec<String> = self.routes.read().await.mailboxes.keys().cloned().collect();
        workers.sort();
        workers
    }

    /// Subscribe to a topic. A second subscription under the same id
    /// replaces the first.
    pub async fn subscribe(&self, topic: &str, subscriber_id: &str) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.routes
            .write()
            .await
            .topics
            .entry(topic.to_string())
            .or_default()
            .insert(subscriber_id.to_string(), tx);
        debug!(topic, subscriber = subscriber_id, "Subscribed");
        Subscription {
            topic: topic.to_string(),
            subscriber_id: subscriber_id.to_string(),
            receiver: rx,
        }
    }

    /// Subscribe with a handler run on a dedicated task, one message at a
    /// time in publish order. The task ends when the subscription is removed.
    pub async fn subscribe_with<F, Fut>(
        &self,
        topic: &str,
        subscriber_id: &str,
        handler: F,
    ) -> JoinHandle<()>
    where
        F: Fn(BusMessage) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut subscription = self.subscribe(topic, subscriber_id).await;
        tokio::spawn(async move {
            while let Some(message) = subscription.recv().await {
                handler(message).await;
            }
        })
    }

    pub async fn unsubscribe(&self, topic: &str, subscriber_id: &str) -> bool {
        let mut routes = self.routes.write().await;
        let Some(subscribers) = routes.topics.get_mut(topic) else {
            return false;
        };
        let removed = subscribers.remove(subscriber_id).is_some();
        if subscribers.is_empty() {
            routes.topics.remove(topic);
        }
        removed
    }

    pub async fn subscriber_count(&self, topic: &str) -> usize {
        self.routes
            .read()
            .await
            .topics
            .get(topic)
            .map_or(0, HashMap::len)
    }

    /// Deliver to every current subscriber of `topic`.
    ///
    /// Returns the number of subscribers the message reached. Returns without
    /// waiting for any handler to run.
    pub async fn publish(&self, sender: &str, topic: &str, payload: serde_json::Value) -> usize {
        let message = BusMessage::new(MessageTarget::Topic(topic.to_string()), sender, payload);

        let (delivered, dead) = {
            let routes = self.routes.read().await;
            match routes.topics.get(topic) {
                Some(subscribers) => fan_out(subscribers, &message),
                None => (0, Vec::new()),
            }
        };

        if !dead.is_empty() {
            let mut routes = self.routes.write().await;
            if let Some(subscribers) = routes.topics.get_mut(topic) {
                remove_closed(subscribers, &dead);
                if subscribers.is_empty() {
                    routes.topics.remove(topic);
                }
            }
            debug!(topic, pruned = dead.len(), "Pruned closed subscriptions");
        }

        self.observe(&message, delivered, dead.len(), |stats| stats.published += 1)
            .await;
        debug!(topic, sender, receivers = delivered, "Message published");
        delivered
    }

    /// Deliver to exactly one registered worker.
    ///
    /// Returns `false`, and counts the message undelivered, when the target
    /// is not registered or its mailbox has been dropped.
    pub async fn send_direct(
        &self,
        sender: &str,
        target: &str,
        payload: serde_json::Value,
    ) -> bool {
        let message = BusMessage::new(MessageTarget::Direct(target.to_string()), sender, payload);

        let outcome = {
            let routes = self.routes.read().await;
            routes
                .mailboxes
                .get(target)
                .map(|tx| tx.send(message.clone()).is_ok())
        };

        let delivered = match outcome {
            Some(true) => true,
            Some(false) => {
                remove_closed(&mut self.routes.write().await.mailboxes, &[target.to_string()]);
                warn!(sender, target, "Direct message to closed mailbox dropped");
                false
            }
            None => {
                debug!(sender, target, "Direct message to unregistered worker dropped");
                false
            }
        };

        let (ok, failed) = if delivered { (1, 0) } else { (0, 1) };
        self.observe(&message, ok, failed, |stats| stats.direct_sent += 1)
            .await;
        delivered
    }

    /// Deliver to every registered worker. Returns the number reached.
    pub async fn broadcast(&self, sender: &str, payload: serde_json::Value) -> usize {
        let message = BusMessage::new(MessageTarget::Broadcast, sender, payload);

        let (delivered, dead) = {
            let routes = self.routes.read().await;
            fan_out(&routes.mailboxes, &message)
        };

        if !dead.is_empty() {
            remove_closed(&mut self.routes.write().await.mailboxes, &dead);
        }

        self.observe(&message, delivered, dead.len(), |stats| stats.broadcasts += 1)
            .await;
        debug!(sender, receivers = delivered, "Message broadcast");
        delivered
    }

    pub async fn stats(&self) -> BusStats {
        self.observations.lock().await.stats.clone()
    }

    /// Most recent message summaries, oldest first.
    pub async fn recent_messages(&self) -> Vec<MessageSummary> {
        self.observations
            .lock()
            .await
            .history
            .iter()
            .cloned()
            .collect()
    }

    async fn observe(
        &self,
        message: &BusMessage,
        delivered: usize,
        undelivered: usize,
        count: impl FnOnce(&mut BusStats),
    ) {
        let mut obs = self.observations.lock().await;
        count(&mut obs.stats);
        obs.stats.delivered += delivered as u64;
        obs.stats.undelivered += undelivered as u64;
        *obs
            .stats
            .per_topic
            .entry(message.target.stats_key())
            .or_insert(0) += 1;

        if obs.history.len() == HISTORY_CAPACITY {
            obs.history.pop_front();
        }
        obs.history.push_back(MessageSummary {
            id: message.id.clone(),
            target: message.target.clone(),
            sender: message.sender.clone(),
            recipients: delivered,
            timestamp: message.timestamp,
        });
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Send a clone to every receiver; returns (delivered, ids of closed receivers).
fn fan_out(receivers: &HashMap<String, Sender>, message: &BusMessage) -> (usize, Vec<String>) {
    let mut delivered = 0;
    let mut dead = Vec::new();
    for (id, tx) in receivers {
        if tx.send(message.clone()).is_ok() {
            delivered += 1;
        } else {
            dead.push(id.clone());
        }
    }
    (delivered, dead)
}

/// Drop the given entries, but only those still holding a closed sender.
/// An id re-registered since the failed send keeps its new channel.
fn remove_closed(senders: &mut HashMap<String, Sender>, ids: &[String]) {
    for id in ids {
        if senders.get(id).is_some_and(Sender::is_closed) {
            senders.remove(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::types::TOPIC_TASK_COMPLETED;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_publish_reaches_all_topic_subscribers() {
        let bus = MessageBus::new();
        let mut a = bus.subscribe(TOPIC_TASK_COMPLETED, "a").await;
        let mut b = bus.subscribe(TOPIC_TASK_COMPLETED, "b").await;
        let mut other = bus.subscribe("other", "c").await;

        let n = bus.publish("w1", TOPIC_TASK_COMPLETED, json!({"id": 1})).await;
        assert_eq!(n, 2);
        assert_eq!(a.recv().await.unwrap().payload, json!({"id": 1}));
        assert_eq!(b.recv().await.unwrap().sender, "w1");
        assert!(other.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_publish_preserves_order_per_subscriber() {
        let bus = MessageBus::new();
        let mut sub = bus.subscribe("t", "s").await;
        for i in 0..20 {
            bus.publish("p", "t", json!(i)).await;
        }
        for i in 0..20 {
            assert_eq!(sub.recv().await.unwrap().payload, json!(i));
        }
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let bus = MessageBus::new();
        let _sub = bus.subscribe("t", "s").await;
        assert!(bus.unsubscribe("t", "s").await);
        assert!(!bus.unsubscribe("t", "s").await);
        assert_eq!(bus.publish("p", "t", json!(null)).await, 0);
        assert_eq!(bus.subscriber_count("t").await, 0);
    }

    #[tokio::test]
    async fn test_dropped_subscription_counts_undelivered_and_is_pruned() {
        let bus = MessageBus::new();
        let sub = bus.subscribe("t", "s").await;
        drop(sub);

        assert_eq!(bus.publish("p", "t", json!(null)).await, 0);
        assert_eq!(bus.subscriber_count("t").await, 0);
        assert_eq!(bus.stats().await.undelivered, 1);
    }

    #[tokio::test]
    async fn test_send_direct_to_registered_worker() {
        let bus = MessageBus::new();
        let mut mailbox = bus.register("w2").await;

        assert!(bus.send_direct("w1", "w2", json!("hi")).await);
        let msg = mailbox.recv().await.unwrap();
        assert_eq!(msg.target, MessageTarget::Direct("w2".into()));
        assert_eq!(msg.payload, json!("hi"));
    }

    #[tokio::test]
    async fn test_send_direct_to_unknown_worker_is_dropped() {
        let bus = MessageBus::new();
        assert!(!bus.send_direct("w1", "ghost", json!("hi")).await);

        let stats = bus.stats().await;
        assert_eq!(stats.direct_sent, 1);
        assert_eq!(stats.undelivered, 1);
        assert_eq!(stats.delivered, 0);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_registered_workers() {
        let bus = MessageBus::new();
        let mut w1 = bus.register("w1").await;
        let mut w2 = bus.register("w2").await;
        bus.deregister("w2").await;

        assert_eq!(bus.broadcast("orchestrator", json!({"stop": false})).await, 1);
        assert!(w1.try_recv().is_some());
        assert!(w2.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_subscribe_with_runs_handler() {
        let bus = MessageBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let handle = bus
            .subscribe_with("t", "h", move |_msg| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;

        bus.publish("p", "t", json!(1)).await;
        bus.publish("p", "t", json!(2)).await;
        bus.unsubscribe("t", "h").await;

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stats_per_topic_and_history() {
        let bus = MessageBus::new();
        let _sub = bus.subscribe("a", "s").await;
        bus.publish("p", "a", json!(null)).await;
        bus.publish("p", "a", json!(null)).await;
        bus.broadcast("p", json!(null)).await;

        let stats = bus.stats().await;
        assert_eq!(stats.published, 2);
        assert_eq!(stats.broadcasts, 1);
        assert_eq!(stats.per_topic.get("a"), Some(&2));
        assert_eq!(stats.per_topic.get("broadcast"), Some(&1));
        assert_eq!(bus.recent_messages().await.len(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_subscribe_and_publish() {
        let bus = Arc::new(MessageBus::new());
        let mut handles = Vec::new();
        for i in 0..8 {
            let bus = bus.clone();
            handles.push(tokio::spawn(async move {
                let id = format!("s{i}");
                let _sub = bus.subscribe("t", &id).await;
                bus.publish(&id, "t", json!(i)).await;
                bus.unsubscribe("t", &id).await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(bus.stats().await.published, 8);
        assert_eq!(bus.subscriber_count("t").await, 0);
    }

    #[test]
    fn test_prune_spares_channel_replaced_after_failed_send() {
        let mut senders: HashMap<String, Sender> = HashMap::new();
        let (old_tx, old_rx) = mpsc::unbounded_channel();
        let (stale_tx, stale_rx) = mpsc::unbounded_channel();
        senders.insert("w-1".into(), old_tx);
        senders.insert("w-2".into(), stale_tx);
        drop(old_rx);
        drop(stale_rx);

        let message = BusMessage::new(MessageTarget::Broadcast, "p", json!(null));
        let (delivered, mut dead) = fan_out(&senders, &message);
        dead.sort();
        assert_eq!(delivered, 0);
        assert_eq!(dead, vec!["w-1".to_string(), "w-2".to_string()]);

        // w-1 restarts and registers again before the prune takes the lock.
        let (new_tx, mut new_rx) = mpsc::unbounded_channel();
        senders.insert("w-1".into(), new_tx);

        remove_closed(&mut senders, &dead);
        assert!(senders.contains_key("w-1"));
        assert!(!senders.contains_key("w-2"));
        assert_eq!(fan_out(&senders, &message).0, 1);
        assert!(new_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_reregistered_worker_keeps_receiving() {
        let bus = MessageBus::new();
        drop(bus.register("w-1").await);
        let mut mailbox = bus.register("w-1").await;

        assert_eq!(bus.broadcast("orchestrator", json!("ping")).await, 1);
        assert!(bus.send_direct("orchestrator", "w-1", json!("hello")).await);
        assert!(bus.is_registered("w-1").await);
        assert_eq!(mailbox.try_recv().unwrap().payload, json!("ping"));
        assert_eq!(mailbox.try_recv().unwrap().payload, json!("hello"));
    }
}
