//! Redis-backed [`SharedStore`]: one hash for edit-sets, one pub/sub channel.

use std::collections::HashMap;
use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use ::redis::aio::MultiplexedConnection;
use ::redis::{AsyncCommands, Client, ConnectionInfo, IntoConnectionInfo, Msg};
use tracing::{debug, info, instrument};

use super::{ChangeSubscription, SharedStore, StoreEvent};
use crate::config::TransportConfig;
use crate::errors::TransportError;

/// Payload of every change notification. Receivers ignore it.
const CHANGE_PAYLOAD: &str = "1";

pub struct RedisStore {
    client: Client,
    conn: MultiplexedConnection,
    hash_key: String,
    channel: String,
}

impl RedisStore {
    /// Open a multiplexed connection and verify it answers `PING`.
    #[instrument(skip(config), fields(url = %config.url, hash_key = %config.hash_key))]
    pub async fn connect(config: &TransportConfig) -> Result<Self, TransportError> {
        let client = Client::open(connection_info(config)?)?;
        let conn = client.get_multiplexed_async_connection().await?;
        let store = Self {
            client,
            conn,
            hash_key: config.hash_key.clone(),
            channel: config.channel.clone(),
        };
        store.ping().await?;
        info!(channel = %store.channel, "connected to redis");
        Ok(store)
    }
}

/// Address from the configured URL, password passed as-is rather than
/// through the URL so reserved characters survive.
///
/// A password written into the URL itself takes precedence.
pub fn connection_info(config: &TransportConfig) -> Result<ConnectionInfo, TransportError> {
    let mut info = config.redis_url().into_connection_info()?;
    if info.redis.password.is_none() {
        info.redis.password = config.password.clone();
    }
    Ok(info)
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn put(&self, key: &str, value: &str) -> Result<(), TransportError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.hset(&self.hash_key, key, value).await?;
        Ok(())
    }

    async fn get_all(&self) -> Result<HashMap<String, String>, TransportError> {
        let mut conn = self.conn.clone();
        let all: HashMap<String, String> = conn.hgetall(&self.hash_key).await?;
        Ok(all)
    }

    async fn notify_change(&self) -> Result<(), TransportError> {
        let mut conn = self.conn.clone();
        let receivers: i64 = conn.publish(&self.channel, CHANGE_PAYLOAD).await?;
        debug!(receivers, channel = %self.channel, "change notification sent");
        Ok(())
    }

    async fn subscribe(&self) -> Result<Box<dyn ChangeSubscription>, TransportError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(&self.channel).await?;
        Ok(Box::new(RedisSubscription {
            channel: self.channel.clone(),
            confirmed: false,
            messages: Box::pin(pubsub.into_on_message()),
        }))
    }

    async fn ping(&self) -> Result<(), TransportError> {
        let mut conn = self.conn.clone();
        let _: String = ::redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

struct RedisSubscription {
    channel: String,
    confirmed: bool,
    messages: Pin<Box<dyn Stream<Item = Msg> + Send>>,
}

#[async_trait]
impl ChangeSubscription for RedisSubscription {
    async fn next_event(&mut self) -> Result<StoreEvent, TransportError> {
        // `subscribe` already awaited the server's acknowledgement.
        if !self.confirmed {
            self.confirmed = true;
            return Ok(StoreEvent::Subscribed {
                channel: self.channel.clone(),
            });
        }
        match self.messages.next().await {
            Some(msg) => {
                debug!(channel = msg.get_channel_name(), "change message received");
                Ok(StoreEvent::Changed)
            }
            None => Err(TransportError::SubscriptionClosed(self.channel.clone())),
        }
    }
}
