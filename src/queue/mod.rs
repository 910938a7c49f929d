//! Queue facade: publishing, maintenance operations and consumer control.
//!
//! Split into focused submodules:
//! - `poller`: the two long-running tasks that feed the prefetch buffers
//! - `worker`: the per-consumer delivery loops

mod poller;
mod worker;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_channel::{Receiver, Sender};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::task::JoinHandle;

use crate::connection::name_suffix;
use crate::consumer::{BatchConsumer, Consumer};
use crate::delivery::{epoch_nanos, Delivery};
use crate::error::expect_store;
use crate::keys;

/// Payload storages are trimmed in slices of this many elements so a large
/// purge never blocks the store for long.
const PURGE_BATCH_SIZE: i64 = 100;

/// Flush timeout used by `add_batch_consumer`.
const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(1);

/// State that only exists while the queue is consuming: the two bounded
/// prefetch buffers, the shutdown flag and the worker handles awaited by
/// `wait_for_consuming`.
struct Consuming {
    prefetch_limit: usize,
    poll_duration: Duration,
    stopped: AtomicBool,
    ready_chan: (Sender<Box<dyn Delivery>>, Receiver<Box<dyn Delivery>>),
    delayed_chan: (Sender<Box<dyn Delivery>>, Receiver<Box<dyn Delivery>>),
    workers: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Consuming {
    fn new(prefetch_limit: usize, poll_duration: Duration) -> Self {
        // bounded(0) is not a valid channel; a zero prefetch limit still
        // never fetches anything because the batch size computes to zero
        let capacity = prefetch_limit.max(1);
        Self {
            prefetch_limit,
            poll_duration,
            stopped: AtomicBool::new(false),
            ready_chan: async_channel::bounded(capacity),
            delayed_chan: async_channel::bounded(capacity),
            workers: tokio::sync::Mutex::new(Vec::new()),
        }
    }
}

/// A named work queue backed by Redis.
///
/// Obtained from [`crate::Connection::open_queue`]. Publishing and the
/// maintenance operations work at any time; consuming starts with
/// [`Queue::start_consuming`] and ends with [`Queue::stop_consuming`]
/// followed by [`Queue::wait_for_consuming`].
pub struct Queue {
    name: String,
    connection_name: String,
    connection_queues_key: String,
    consumers_key: String,
    ready_key: String,
    rejected_key: String,
    delayed_key: String,
    unacked_key: String,
    push_key: OnceLock<String>,
    client: ConnectionManager,
    consuming: Mutex<Option<Arc<Consuming>>>,
}

impl fmt::Display for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} conn:{}]", self.name, self.connection_name)
    }
}

impl Queue {
    pub(crate) fn new(name: String, connection_name: String, client: ConnectionManager) -> Self {
        let connection_queues_key = keys::connection_queues(&connection_name);
        let consumers_key = keys::connection_queue_consumers(&connection_name, &name);
        let ready_key = keys::queue_ready(&name);
        let rejected_key = keys::queue_rejected(&name);
        let delayed_key = keys::queue_delayed(&name);
        let unacked_key = keys::connection_queue_unacked(&connection_name, &name);

        Self {
            name,
            connection_name,
            connection_queues_key,
            consumers_key,
            ready_key,
            rejected_key,
            delayed_key,
            unacked_key,
            push_key: OnceLock::new(),
            client,
            consuming: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // ========================================================================
    // Publishing
    // ========================================================================

    /// Add a delivery with the given payload to the ready list.
    pub async fn publish(&self, payload: &str) -> bool {
        tracing::debug!(queue = %self, "publish");
        let mut conn = self.client.clone();
        let _: i64 = expect_store("LPUSH ready", conn.lpush(&self.ready_key, payload).await);
        true
    }

    /// Add a delivery that becomes eligible for consumption `delay` from now.
    pub async fn publish_delayed(&self, payload: &str, delay: Duration) -> bool {
        tracing::debug!(queue = %self, delay_ms = delay.as_millis() as u64, "publish delayed");
        let mut conn = self.client.clone();
        let _: i64 = expect_store(
            "ZADD delayed",
            conn.zadd(&self.delayed_key, payload, epoch_nanos(delay)).await,
        );
        true
    }

    // ========================================================================
    // Counts
    // ========================================================================

    pub async fn ready_count(&self) -> i64 {
        let mut conn = self.client.clone();
        expect_store("LLEN ready", conn.llen(&self.ready_key).await)
    }

    pub async fn delayed_count(&self) -> i64 {
        let mut conn = self.client.clone();
        expect_store(
            "ZCOUNT delayed",
            conn.zcount(&self.delayed_key, "-inf", "+inf").await,
        )
    }

    pub async fn unacked_count(&self) -> i64 {
        let mut conn = self.client.clone();
        expect_store("LLEN unacked", conn.llen(&self.unacked_key).await)
    }

    pub async fn rejected_count(&self) -> i64 {
        let mut conn = self.client.clone();
        expect_store("LLEN rejected", conn.llen(&self.rejected_key).await)
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Remove all ready deliveries. Returns the count found at the start;
    /// a concurrent publisher may leave items behind.
    pub async fn purge_ready(&self) -> i64 {
        self.delete_list(&self.ready_key).await
    }

    /// Remove all rejected deliveries, same contract as [`Queue::purge_ready`].
    pub async fn purge_rejected(&self) -> i64 {
        self.delete_list(&self.rejected_key).await
    }

    /// Remove all delayed deliveries, same contract as [`Queue::purge_ready`].
    pub async fn purge_delayed(&self) -> i64 {
        self.delete_sorted_set(&self.delayed_key).await
    }

    /// Move all unacked deliveries back to the ready list. Returns the
    /// number of returned deliveries. Run this before consuming to recover
    /// deliveries left in flight by the previous run.
    pub async fn return_all_unacked(&self) -> i64 {
        let mut conn = self.client.clone();
        let unacked: i64 = expect_store("LLEN unacked", conn.llen(&self.unacked_key).await);

        for returned in 0..unacked {
            let payload: Option<String> = expect_store(
                "RPOPLPUSH unacked",
                conn.rpoplpush(&self.unacked_key, &self.ready_key).await,
            );
            if payload.is_none() {
                return returned;
            }
        }

        tracing::debug!(queue = %self, count = unacked, "returned unacked deliveries");
        unacked
    }

    /// Move up to `count` rejected deliveries back to the ready list.
    /// Returns the number actually moved.
    pub async fn return_rejected(&self, count: i64) -> i64 {
        if count == 0 {
            return 0;
        }

        let mut conn = self.client.clone();
        for returned in 0..count {
            let payload: Option<String> = expect_store(
                "RPOPLPUSH rejected",
                conn.rpoplpush(&self.rejected_key, &self.ready_key).await,
            );
            if payload.is_none() {
                return returned;
            }
        }

        tracing::debug!(queue = %self, count, "returned rejected deliveries");
        count
    }

    /// Move all rejected deliveries back to the ready list.
    pub async fn return_all_rejected(&self) -> i64 {
        let rejected = self.rejected_count().await;
        self.return_rejected(rejected).await
    }

    /// Purge all payload storages of this queue and deregister it from the
    /// global queue set. True iff the queue was registered.
    pub async fn close(&self) -> bool {
        self.purge_rejected().await;
        self.purge_delayed().await;
        self.purge_ready().await;

        let mut conn = self.client.clone();
        let removed: i64 = expect_store(
            "SREM queues",
            conn.srem(keys::QUEUES_KEY, &self.name).await,
        );
        tracing::info!(queue = %self, "closed queue");
        removed > 0
    }

    /// Remove this connection's per-queue keys (unacked list, consumer set,
    /// queue registration). Called by the connection registry when cleaning
    /// up after a dead peer, once its unacked deliveries have been returned.
    pub async fn close_in_connection(&self) {
        let mut conn = self.client.clone();
        let _: i64 = expect_store("DEL unacked", conn.del(&self.unacked_key).await);
        let _: i64 = expect_store("DEL consumers", conn.del(&self.consumers_key).await);
        let _: i64 = expect_store(
            "SREM connection queues",
            conn.srem(&self.connection_queues_key, &self.name).await,
        );
    }

    // ========================================================================
    // Consumer control
    // ========================================================================

    /// Route deliveries finished with `push` to `push_queue`'s ready list.
    /// Must be called before consuming starts; the first call wins.
    pub fn set_push_queue(&self, push_queue: &Queue) {
        if self.push_key.set(push_queue.ready_key.clone()).is_err() {
            tracing::warn!(queue = %self, "push queue already set, ignoring");
        }
    }

    /// Start the two pollers feeding this queue's prefetch buffers. Must be
    /// called before consumers can be added. False if already consuming.
    ///
    /// `poll_duration` is how long a poller sleeps after finding nothing to
    /// fetch.
    pub async fn start_consuming(&self, prefetch_limit: usize, poll_duration: Duration) -> bool {
        let state = {
            let mut guard = self.consuming.lock().unwrap();
            if guard.is_some() {
                return false;
            }
            let state = Arc::new(Consuming::new(prefetch_limit, poll_duration));
            *guard = Some(Arc::clone(&state));
            state
        };

        // register the queue as consumed by this connection
        let mut conn = self.client.clone();
        let _: i64 = expect_store(
            "SADD connection queues",
            conn.sadd(&self.connection_queues_key, &self.name).await,
        );

        tracing::info!(
            queue = %self,
            prefetch_limit,
            poll_duration_ms = poll_duration.as_millis() as u64,
            "started consuming"
        );

        let ctx = poller::PollerContext {
            queue_label: self.to_string(),
            client: self.client.clone(),
            ready_key: self.ready_key.clone(),
            unacked_key: self.unacked_key.clone(),
            delayed_key: self.delayed_key.clone(),
            rejected_key: self.rejected_key.clone(),
            push_key: self.push_key.get().cloned(),
            state: Arc::clone(&state),
        };
        tokio::spawn(poller::run_ready(ctx.clone()));
        tokio::spawn(poller::run_delayed(ctx));
        true
    }

    /// Ask the pollers to shut down. False if not consuming or already
    /// stopping. The actual drain happens asynchronously; use
    /// [`Queue::wait_for_consuming`] to wait for the workers.
    pub fn stop_consuming(&self) -> bool {
        let guard = self.consuming.lock().unwrap();
        let Some(state) = guard.as_ref() else {
            return false;
        };

        let was_stopped = state.stopped.swap(true, Ordering::SeqCst);
        if !was_stopped {
            tracing::info!(queue = %self, "stopping consumers");
        }
        !was_stopped
    }

    /// Block until every registered consumer worker has returned.
    pub async fn wait_for_consuming(&self) {
        let state = { self.consuming.lock().unwrap().clone() };
        let Some(state) = state else {
            return;
        };

        let mut workers = state.workers.lock().await;
        for handle in workers.drain(..) {
            let _ = handle.await;
        }
    }

    /// Register a consumer and launch its two worker loops, one per
    /// prefetch buffer. Returns the unique consumer name.
    ///
    /// Panics if [`Queue::start_consuming`] was not called first.
    pub async fn add_consumer(&self, tag: &str, consumer: Arc<dyn Consumer>) -> String {
        let (name, state) = self.register_consumer(tag).await;

        let ready = tokio::spawn(worker::consume_deliveries(
            state.ready_chan.1.clone(),
            Arc::clone(&consumer),
        ));
        let delayed = tokio::spawn(worker::consume_deliveries(
            state.delayed_chan.1.clone(),
            consumer,
        ));

        let mut workers = state.workers.lock().await;
        workers.push(ready);
        workers.push(delayed);
        name
    }

    /// Like [`Queue::add_consumer`], but the workers collect batches of up
    /// to `batch_size` deliveries, flushing early one second after the
    /// first delivery of a batch.
    pub async fn add_batch_consumer(
        &self,
        tag: &str,
        batch_size: usize,
        consumer: Arc<dyn BatchConsumer>,
    ) -> String {
        self.add_batch_consumer_with_timeout(tag, batch_size, DEFAULT_BATCH_TIMEOUT, consumer)
            .await
    }

    /// Like [`Queue::add_batch_consumer`] with an explicit flush timeout.
    pub async fn add_batch_consumer_with_timeout(
        &self,
        tag: &str,
        batch_size: usize,
        timeout: Duration,
        consumer: Arc<dyn BatchConsumer>,
    ) -> String {
        let (name, state) = self.register_consumer(tag).await;

        let ready = tokio::spawn(worker::consume_batches(
            state.ready_chan.1.clone(),
            batch_size,
            timeout,
            Arc::clone(&consumer),
        ));
        let delayed = tokio::spawn(worker::consume_batches(
            state.delayed_chan.1.clone(),
            batch_size,
            timeout,
            consumer,
        ));

        let mut workers = state.workers.lock().await;
        workers.push(ready);
        workers.push(delayed);
        name
    }

    /// Consumer names currently registered on this queue by this connection.
    pub async fn consumers(&self) -> Vec<String> {
        let mut conn = self.client.clone();
        expect_store("SMEMBERS consumers", conn.smembers(&self.consumers_key).await)
    }

    /// Deregister a consumer name. True iff it was registered. The worker
    /// tasks keep running until consuming stops.
    pub async fn remove_consumer(&self, name: &str) -> bool {
        let mut conn = self.client.clone();
        let removed: i64 = expect_store("SREM consumers", conn.srem(&self.consumers_key, name).await);
        removed > 0
    }

    /// Drop the whole consumer set. Returns the number of deleted keys.
    pub async fn remove_all_consumers(&self) -> i64 {
        let mut conn = self.client.clone();
        expect_store("DEL consumers", conn.del(&self.consumers_key).await)
    }

    async fn register_consumer(&self, tag: &str) -> (String, Arc<Consuming>) {
        let state = {
            let guard = self.consuming.lock().unwrap();
            guard
                .clone()
                .expect("add_consumer requires start_consuming first")
        };

        let name = format!("{}-{}", tag, name_suffix());
        let mut conn = self.client.clone();
        let _: i64 = expect_store("SADD consumers", conn.sadd(&self.consumers_key, &name).await);

        tracing::debug!(queue = %self, consumer = %name, "added consumer");
        (name, state)
    }

    // ========================================================================
    // Batched deletion
    // ========================================================================

    async fn delete_list(&self, key: &str) -> i64 {
        let mut conn = self.client.clone();
        let total: i64 = expect_store("LLEN purge", conn.llen(key).await);
        if total == 0 {
            return 0;
        }

        let mut todo = total;
        while todo > 0 {
            let batch = todo.min(PURGE_BATCH_SIZE);
            let _: () = expect_store(
                "LTRIM purge",
                conn.ltrim(key, 0, (-1 - batch) as isize).await,
            );
            todo -= batch;
        }

        total
    }

    async fn delete_sorted_set(&self, key: &str) -> i64 {
        let mut conn = self.client.clone();
        let total: i64 = expect_store("ZCOUNT purge", conn.zcount(key, "-inf", "+inf").await);
        if total == 0 {
            return 0;
        }

        let mut todo = total;
        while todo > 0 {
            let batch = todo.min(PURGE_BATCH_SIZE);
            let _: i64 = expect_store(
                "ZREMRANGEBYRANK purge",
                conn.zremrangebyrank(key, 0, (batch - 1) as isize).await,
            );
            todo -= batch;
        }

        total
    }
}
