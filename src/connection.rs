//! Connection scope: one logical owner of unacked lists and consumer sets.
//!
//! A connection is a namespace, not a transport: all store traffic flows
//! through one shared [`ConnectionManager`] that reconnects on its own.
//! The heartbeat and liveness bookkeeping for connections (and the cleanup
//! of dead peers' unacked lists) is the supervising application's job; the
//! keys for it are published in [`crate::keys`].

use rand::distributions::Alphanumeric;
use rand::Rng;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::error::{expect_store, RmqResult};
use crate::keys;
use crate::queue::Queue;
use crate::settings::Settings;

/// Six random alphanumeric characters, used to make connection and
/// consumer names unique.
pub(crate) fn name_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect()
}

/// An open connection scope. Cheap to keep around for the lifetime of the
/// process; queues opened from it share its client.
pub struct Connection {
    name: String,
    client: ConnectionManager,
}

impl Connection {
    /// Connect to Redis and establish a connection scope. The given name
    /// gets a random suffix so concurrent processes with the same
    /// configured name keep separate unacked lists.
    pub async fn open(name: &str, redis_url: &str) -> RmqResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;

        let name = format!("{}-{}", name, name_suffix());
        tracing::info!(connection = %name, "opened connection");

        Ok(Self { name, client: conn })
    }

    /// [`Connection::open`] with values from [`Settings`].
    pub async fn open_from_settings(settings: &Settings) -> RmqResult<Self> {
        Self::open(&settings.connection_name, &settings.redis_url).await
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Open a queue in this connection's scope and register it in the
    /// global queue set.
    pub async fn open_queue(&self, name: &str) -> Queue {
        let mut conn = self.client.clone();
        let _: i64 = expect_store("SADD queues", conn.sadd(keys::QUEUES_KEY, name).await);

        Queue::new(name.to_string(), self.name.clone(), self.client.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_suffix_is_six_alphanumerics() {
        let suffix = name_suffix();
        assert_eq!(suffix.len(), 6);
        assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
