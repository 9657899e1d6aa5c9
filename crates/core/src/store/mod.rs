//! Shared keyed store plus broadcast channel.
//!
//! Every participant writes its serialized edit-set under its own key and
//! then wakes all subscribers. Notifications carry no payload: receivers
//! re-read the whole mapping with [`SharedStore::get_all`].

pub mod memory;
pub mod redis;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::{TransportConfig, TransportKind};
use crate::errors::TransportError;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Something read from a change subscription.
///
/// Liveness is not signalled here: [`SharedStore::ping`] checks it on the
/// command connection when a subscription read fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// The subscription is live.
    Subscribed { channel: String },
    /// Some participant published; re-evaluate.
    Changed,
}

/// A live subscription to the change channel.
#[async_trait]
pub trait ChangeSubscription: Send {
    /// Wait for the next event. An error means the subscription is broken.
    async fn next_event(&mut self) -> Result<StoreEvent, TransportError>;
}

/// Durable mapping participant -> serialized edit-set, plus broadcast.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Overwrite the value stored under `key`.
    async fn put(&self, key: &str, value: &str) -> Result<(), TransportError>;

    /// Fetch every stored value. Each value is read whole.
    async fn get_all(&self) -> Result<HashMap<String, String>, TransportError>;

    /// Wake every subscriber.
    async fn notify_change(&self) -> Result<(), TransportError>;

    async fn subscribe(&self) -> Result<Box<dyn ChangeSubscription>, TransportError>;

    /// Liveness probe.
    async fn ping(&self) -> Result<(), TransportError>;
}

/// Connect to the store selected by `config`.
pub async fn connect(config: &TransportConfig) -> Result<Arc<dyn SharedStore>, TransportError> {
    match config.kind {
        TransportKind::Redis => {
            let store = RedisStore::connect(config).await?;
            Ok(Arc::new(store))
        }
        TransportKind::Memory => {
            info!("using in-process memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
