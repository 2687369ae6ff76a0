//! In-process publish/subscribe hub backing subscription fields.
//!
//! The hub outlives individual schema generations. Its topic set always
//! mirrors the generation being served: the reload controller calls
//! [`PubSub::sync`] when it swaps, so topics of a discarded build never
//! appear and topics a newer generation dropped are removed.

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

const TOPIC_CAPACITY: usize = 64;
const MAX_TOPIC_LEN: usize = 128;

/// Topic set changes made by one [`PubSub::sync`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TopicChanges {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

/// Cloneable handle to the shared topic map.
#[derive(Debug, Clone, Default)]
pub struct PubSub {
    topics: Arc<DashMap<String, broadcast::Sender<Value>>>,
}

impl PubSub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `topic` is a name the hub accepts. Does not register it.
    pub fn check_topic(&self, topic: &str) -> Result<(), String> {
        if topic.is_empty() {
            return Err("topic name is empty".to_string());
        }
        if topic.len() > MAX_TOPIC_LEN {
            return Err(format!("topic name is longer than {} bytes", MAX_TOPIC_LEN));
        }
        if topic.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(format!("topic '{}' contains whitespace", topic.escape_debug()));
        }
        Ok(())
    }

    /// Make the registered topics exactly `wanted`. Subscribers of a removed
    /// topic see their channel close; kept topics keep their subscribers.
    pub fn sync<'a>(&self, wanted: impl IntoIterator<Item = &'a str>) -> TopicChanges {
        let wanted: BTreeSet<&str> = wanted.into_iter().collect();
        let mut changes = TopicChanges::default();

        self.topics.retain(|topic, _| {
            let keep = wanted.contains(topic.as_str());
            if !keep {
                changes.removed.push(topic.clone());
            }
            keep
        });
        for topic in wanted {
            if !self.topics.contains_key(topic) {
                self.topics
                    .insert(topic.to_string(), broadcast::channel(TOPIC_CAPACITY).0);
                changes.added.push(topic.to_string());
            }
        }

        changes.removed.sort();
        if !changes.added.is_empty() || !changes.removed.is_empty() {
            tracing::debug!(added = ?changes.added, removed = ?changes.removed, "Subscription topics updated");
        }
        changes
    }

    /// Publish to a registered topic. `None` if the topic is unknown,
    /// otherwise the number of receivers reached.
    pub fn publish(&self, topic: &str, message: Value) -> Option<usize> {
        let tx = self.topics.get(topic)?;
        Some(tx.send(message).unwrap_or(0))
    }

    /// Registered topic names, sorted.
    pub fn topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self.topics.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_publish_reaches_receivers() {
        let hub = PubSub::new();
        hub.sync(["orders"]);
        let mut rx = hub.topics.get("orders").unwrap().subscribe();

        assert_eq!(hub.publish("orders", json!({"id": 1})), Some(1));
        assert_eq!(rx.recv().await.unwrap(), json!({"id": 1}));
        assert_eq!(hub.publish("nobody", json!(null)), None);
    }

    #[tokio::test]
    async fn test_sync_adds_and_prunes() {
        let hub = PubSub::new();
        let changes = hub.sync(["a", "b"]);
        assert_eq!(changes.added, vec!["a", "b"]);
        let mut kept = hub.topics.get("b").unwrap().subscribe();
        let mut dropped = hub.topics.get("a").unwrap().subscribe();

        let changes = hub.sync(["b", "c"]);
        assert_eq!(changes.added, vec!["c"]);
        assert_eq!(changes.removed, vec!["a"]);
        assert_eq!(hub.topics(), vec!["b", "c"]);

        assert!(matches!(
            dropped.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
        hub.publish("b", json!(2));
        assert_eq!(kept.recv().await.unwrap(), json!(2));

        assert_eq!(hub.sync(std::iter::empty::<&str>()).removed, vec!["b", "c"]);
        assert!(hub.topics().is_empty());
    }

    #[test]
    fn test_check_topic() {
        let hub = PubSub::new();
        assert!(hub.check_topic("orders.created").is_ok());
        assert!(hub.check_topic("").is_err());
        assert!(hub.check_topic("has space").is_err());
        assert!(hub.check_topic(&"x".repeat(200)).is_err());
        assert!(hub.topics().is_empty());
    }

    #[test]
    fn test_clones_share_topics() {
        let hub = PubSub::new();
        hub.clone().sync(["a"]);
        assert_eq!(hub.topics(), vec!["a"]);
    }
}
