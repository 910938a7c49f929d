//! The two long-running tasks that feed a consuming queue.
//!
//! The ready poller moves payloads from the ready list into the unacked
//! list one RPOPLPUSH at a time, so a payload is always in exactly one of
//! the two lists. The delayed poller promotes due payloads from the delayed
//! sorted set straight into the unacked list with a single server-side
//! script. Both hand `Delivery` handles to their bounded prefetch buffer;
//! a full buffer blocks the poller, which is the backpressure that bounds
//! the number of in-flight deliveries.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_channel::{Receiver, Sender};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::Consuming;
use crate::delivery::{epoch_nanos, Delivery, RedisDelivery};
use crate::error::expect_store;

/// Promote due entries from the delayed sorted set (KEYS[1]) into the
/// unacked list (KEYS[2]). ARGV[1] is the current time in epoch
/// nanoseconds, ARGV[2] the maximum number of entries to promote.
///
/// Only members actually returned by the score-range fetch are removed, so
/// an entry that is not yet due can never be touched, no matter where it
/// ranks. Chunks of 100 keep unpack() within Lua's argument limits.
const PROMOTE_DUE_SCRIPT: &str = r"
local due = redis.call('zrangebyscore', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, tonumber(ARGV[2]))
if next(due) ~= nil then
    for i = 1, #due, 100 do
        local last = math.min(i + 99, #due)
        redis.call('zrem', KEYS[1], unpack(due, i, last))
        redis.call('lpush', KEYS[2], unpack(due, i, last))
    end
end
return due
";

#[derive(Clone)]
pub(super) struct PollerContext {
    pub(super) queue_label: String,
    pub(super) client: ConnectionManager,
    pub(super) ready_key: String,
    pub(super) unacked_key: String,
    pub(super) delayed_key: String,
    pub(super) rejected_key: String,
    pub(super) push_key: Option<String>,
    pub(super) state: Arc<Consuming>,
}

impl PollerContext {
    fn delivery(&self, payload: String) -> Box<dyn Delivery> {
        Box::new(RedisDelivery::new(
            payload,
            self.unacked_key.clone(),
            self.delayed_key.clone(),
            self.rejected_key.clone(),
            self.push_key.clone(),
            self.client.clone(),
        ))
    }
}

pub(super) async fn run_ready(ctx: PollerContext) {
    loop {
        let batch_size = ready_batch_size(&ctx).await;
        let want_more = consume_batch(&ctx, batch_size).await;

        if !want_more {
            tokio::time::sleep(ctx.state.poll_duration).await;
        }

        if ctx.state.stopped.load(Ordering::SeqCst) {
            close_and_drain(&ctx.state.ready_chan);
            tracing::debug!(queue = %ctx.queue_label, "ready poller stopped");
            return;
        }
    }
}

pub(super) async fn run_delayed(ctx: PollerContext) {
    let script = redis::Script::new(PROMOTE_DUE_SCRIPT);

    loop {
        let batch_size = delayed_batch_size(&ctx).await;
        let want_more = promote_due(&ctx, &script, batch_size).await;

        if !want_more {
            tokio::time::sleep(ctx.state.poll_duration).await;
        }

        if ctx.state.stopped.load(Ordering::SeqCst) {
            close_and_drain(&ctx.state.delayed_chan);
            tracing::debug!(queue = %ctx.queue_label, "delayed poller stopped");
            return;
        }
    }
}

/// Close the buffer, then best-effort discard whatever is still enqueued.
/// Discarded deliveries stay in the unacked list and come back through
/// `return_all_unacked` on the next start. Workers racing this drain may
/// still consume some of the buffered items.
fn close_and_drain(chan: &(Sender<Box<dyn Delivery>>, Receiver<Box<dyn Delivery>>)) {
    chan.0.close();
    while chan.1.try_recv().is_ok() {}
}

/// How many deliveries to fetch next: the free space in the prefetch
/// buffer, capped by what the ready list currently holds.
async fn ready_batch_size(ctx: &PollerContext) -> usize {
    let buffered = ctx.state.ready_chan.0.len();
    let room = ctx.state.prefetch_limit.saturating_sub(buffered);

    let mut conn = ctx.client.clone();
    let ready: i64 = expect_store("LLEN ready", conn.llen(&ctx.ready_key).await);
    room.min(ready.max(0) as usize)
}

async fn delayed_batch_size(ctx: &PollerContext) -> usize {
    let buffered = ctx.state.delayed_chan.0.len();
    let room = ctx.state.prefetch_limit.saturating_sub(buffered);

    let mut conn = ctx.client.clone();
    let delayed: i64 = expect_store(
        "ZCOUNT delayed",
        conn.zcount(&ctx.delayed_key, "-inf", "+inf").await,
    );
    room.min(delayed.max(0) as usize)
}

/// Move up to `batch_size` payloads from ready to unacked and buffer a
/// delivery for each. True iff the full batch was fetched, meaning there
/// may be more to do right away.
async fn consume_batch(ctx: &PollerContext, batch_size: usize) -> bool {
    if batch_size == 0 {
        return false;
    }

    let mut conn = ctx.client.clone();
    for _ in 0..batch_size {
        let payload: Option<String> = expect_store(
            "RPOPLPUSH ready",
            conn.rpoplpush(&ctx.ready_key, &ctx.unacked_key).await,
        );
        let Some(payload) = payload else {
            return false;
        };

        // blocks while the buffer is full; fails only when the buffer was
        // closed by shutdown, in which case the payload stays in unacked
        if ctx
            .state
            .ready_chan
            .0
            .send(ctx.delivery(payload))
            .await
            .is_err()
        {
            return false;
        }
    }

    true
}

/// Run the promotion script and buffer a delivery for each promoted
/// payload, oldest due time first.
async fn promote_due(ctx: &PollerContext, script: &redis::Script, batch_size: usize) -> bool {
    if batch_size == 0 {
        return false;
    }

    let mut conn = ctx.client.clone();
    let due: Vec<String> = expect_store(
        "EVAL promote delayed",
        script
            .key(&ctx.delayed_key)
            .key(&ctx.unacked_key)
            .arg(epoch_nanos(Duration::ZERO))
            .arg(batch_size as i64)
            .invoke_async(&mut conn)
            .await,
    );

    if due.is_empty() {
        return false;
    }

    for payload in due {
        if ctx
            .state
            .delayed_chan
            .0
            .send(ctx.delivery(payload))
            .await
            .is_err()
        {
            return false;
        }
    }

    true
}
