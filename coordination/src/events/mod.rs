//! Inter-agent messaging
//!
//! The bus supports three addressing modes:
//!
//! ```text
//!   publish(topic)      ──▶ every subscriber of the topic
//!   send_direct(worker) ──▶ one registered worker's mailbox
//!   broadcast()         ──▶ every registered worker's mailbox
//! ```
//!
//! Delivery is at-most-once and never blocks the publisher. The bus keeps
//! counters and a bounded summary history; it never persists messages.
//!
//! # Usage
//!
//! ```ignore
//! use coordination::events::{MessageBus, TOPIC_TASK_COMPLETED};
//!
//! let bus = MessageBus::new().shared();
//! let mut sub = bus.subscribe(TOPIC_TASK_COMPLETED, "dashboard").await;
//! bus.publish("worker-1", TOPIC_TASK_COMPLETED, json!({"task": id})).await;
//! let msg = sub.recv().await;
//! ```

pub mod bus;
pub mod types;

pub use bus::{BusStats, Mailbox, MessageBus, SharedMessageBus, Subscription};
pub use types::{
    BusMessage, MessageId, MessageSummary, MessageTarget, TOPIC_AGENT_PROGRESS,
    TOPIC_SWARM_HEALTH, TOPIC_TASK_CLAIMED, TOPIC_TASK_COMPLETED, TOPIC_TASK_FAILED,
};
