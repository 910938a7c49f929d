//! Per-delivery state transitions.
//!
//! A delivery is handed to a consumer after its payload has been moved into
//! the connection's unacked list. Exactly one terminal transition (ack,
//! reject, push) or a delay is expected per delivery; a second call finds
//! nothing left to remove from the unacked list and reports false.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::error::expect_store;

/// Position of a payload in the delivery state machine. The store keeps
/// this implicit (the structure holding the payload is the state); test
/// doubles record it explicitly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Unacked,
    Acked,
    Delayed,
    Rejected,
    Pushed,
}

/// A single in-flight message.
///
/// The consumer owning a delivery is responsible for finishing it with one
/// of the transitions below. An unfinished delivery stays in the unacked
/// list and is requeued by the next `return_all_unacked` sweep.
#[async_trait]
pub trait Delivery: fmt::Display + Send + Sync {
    fn payload(&self) -> &str;

    /// Remove the payload from the unacked list. True iff exactly one
    /// occurrence was removed.
    async fn ack(&self) -> bool;

    /// Move the payload to the rejected list for manual requeue.
    async fn reject(&self) -> bool;

    /// Hand the payload to the configured push queue, or reject it when
    /// none is set.
    async fn push(&self) -> bool;

    /// Schedule the payload for redelivery no earlier than `duration` from
    /// now, then release it from the unacked list.
    async fn delay(&self, duration: Duration) -> bool;
}

/// Absolute due time in nanoseconds since the Unix epoch, `offset` from now.
/// Delayed-set scores use this scale.
pub(crate) fn epoch_nanos(offset: Duration) -> i64 {
    (SystemTime::now() + offset)
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}

pub(crate) struct RedisDelivery {
    payload: String,
    unacked_key: String,
    delayed_key: String,
    rejected_key: String,
    push_key: Option<String>,
    client: ConnectionManager,
}

impl RedisDelivery {
    pub(crate) fn new(
        payload: String,
        unacked_key: String,
        delayed_key: String,
        rejected_key: String,
        push_key: Option<String>,
        client: ConnectionManager,
    ) -> Self {
        Self {
            payload,
            unacked_key,
            delayed_key,
            rejected_key,
            push_key,
            client,
        }
    }

    async fn remove_unacked(&self) -> bool {
        let mut conn = self.client.clone();
        let removed: i64 = expect_store(
            "LREM unacked",
            conn.lrem(&self.unacked_key, 1, &self.payload).await,
        );
        removed == 1
    }

    /// Two-step move: add to the destination, then release from unacked.
    /// Not atomic; a crash in between leaves the payload in both places
    /// until the next recovery sweep reconciles it.
    async fn move_to(&self, destination: &str) -> bool {
        let mut conn = self.client.clone();
        let _: i64 = expect_store("LPUSH move", conn.lpush(destination, &self.payload).await);
        self.remove_unacked().await
    }
}

impl fmt::Display for RedisDelivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} {}]", self.payload, self.unacked_key)
    }
}

#[async_trait]
impl Delivery for RedisDelivery {
    fn payload(&self) -> &str {
        &self.payload
    }

    async fn ack(&self) -> bool {
        tracing::debug!(delivery = %self, "ack");
        self.remove_unacked().await
    }

    async fn reject(&self) -> bool {
        tracing::debug!(delivery = %self, "reject");
        self.move_to(&self.rejected_key).await
    }

    async fn push(&self) -> bool {
        tracing::debug!(delivery = %self, "push");
        match &self.push_key {
            Some(key) => self.move_to(key).await,
            None => self.move_to(&self.rejected_key).await,
        }
    }

    async fn delay(&self, duration: Duration) -> bool {
        tracing::debug!(delivery = %self, delay_ms = duration.as_millis() as u64, "delay");
        let mut conn = self.client.clone();
        let added: i64 = expect_store(
            "ZADD delayed",
            conn.zadd(&self.delayed_key, &self.payload, epoch_nanos(duration))
                .await,
        );
        let removed = self.remove_unacked().await;
        added == 1 && removed
    }
}
