//! In-process [`SharedStore`] built on tokio primitives.
//!
//! Clones share the same mapping and channel, so several agents in one
//! process (or one agent in single-user test mode) can rendezvous here.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use super::{ChangeSubscription, SharedStore, StoreEvent};
use crate::errors::TransportError;

const CHANNEL: &str = "memory";

#[derive(Clone)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, String>>>,
    changes: broadcast::Sender<()>,
    closed: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            changes,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make every subsequent operation fail, as if the server went away.
    /// Blocked subscribers are woken and observe the closure.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let _ = self.changes.send(());
    }

    fn check_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable("memory store closed".into()));
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn put(&self, key: &str, value: &str) -> Result<(), TransportError> {
        self.check_open()?;
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get_all(&self) -> Result<HashMap<String, String>, TransportError> {
        self.check_open()?;
        Ok(self.entries.read().await.clone())
    }

    async fn notify_change(&self) -> Result<(), TransportError> {
        self.check_open()?;
        // No receivers is not an error: nobody is listening yet.
        let receivers = self.changes.send(()).unwrap_or(0);
        debug!(receivers, "change notification sent");
        Ok(())
    }

    async fn subscribe(&self) -> Result<Box<dyn ChangeSubscription>, TransportError> {
        self.check_open()?;
        Ok(Box::new(MemorySubscription {
            confirmed: false,
            rx: self.changes.subscribe(),
            closed: self.closed.clone(),
        }))
    }

    async fn ping(&self) -> Result<(), TransportError> {
        self.check_open()
    }
}

struct MemorySubscription {
    confirmed: bool,
    rx: broadcast::Receiver<()>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl ChangeSubscription for MemorySubscription {
    async fn next_event(&mut self) -> Result<StoreEvent, TransportError> {
        if !self.confirmed {
            self.confirmed = true;
            return Ok(StoreEvent::Subscribed {
                channel: CHANNEL.to_string(),
            });
        }
        let received = self.rx.recv().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::SubscriptionClosed(CHANNEL.to_string()));
        }
        match received {
            Ok(()) => Ok(StoreEvent::Changed),
            // Missed wake-ups collapse into one: receivers re-read everything.
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "subscription lagged");
                Ok(StoreEvent::Changed)
            }
            Err(broadcast::error::RecvError::Closed) => {
                Err(TransportError::SubscriptionClosed(CHANNEL.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_overwrites_and_get_all_returns_every_key() {
        let store = MemoryStore::new();
        store.put("alice", "one").await.unwrap();
        store.put("bob", "two").await.unwrap();
        store.put("alice", "three").await.unwrap();

        let all = store.get_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["alice"], "three");
        assert_eq!(all["bob"], "two");
    }

    #[tokio::test]
    async fn test_subscription_confirms_then_delivers_changes() {
        let store = MemoryStore::new();
        let mut sub = store.subscribe().await.unwrap();
        assert!(matches!(sub.next_event().await.unwrap(), StoreEvent::Subscribed { .. }));

        store.notify_change().await.unwrap();
        assert_eq!(sub.next_event().await.unwrap(), StoreEvent::Changed);
    }

    #[tokio::test]
    async fn test_notify_without_subscribers_is_ok() {
        let store = MemoryStore::new();
        assert!(store.notify_change().await.is_ok());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let a = MemoryStore::new();
        let b = a.clone();
        a.put("alice", "x").await.unwrap();
        assert_eq!(b.get_all().await.unwrap()["alice"], "x");
    }

    #[tokio::test]
    async fn test_closed_store_fails_everything() {
        let store = MemoryStore::new();
        store.close();
        assert!(store.ping().await.is_err());
        assert!(store.put("alice", "x").await.is_err());
        assert!(store.subscribe().await.is_err());
    }
}
