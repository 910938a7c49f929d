//! Per-consumer worker loops.
//!
//! Every registered consumer runs two of these, one per prefetch buffer
//! (ready path and delayed path). Workers exit when their buffer has been
//! closed by the poller and drained empty.

use std::mem;
use std::sync::Arc;
use std::time::Duration;

use async_channel::Receiver;
use tokio::time::{self, Instant};

use crate::consumer::{BatchConsumer, Consumer};
use crate::delivery::Delivery;

pub(super) async fn consume_deliveries(
    deliveries: Receiver<Box<dyn Delivery>>,
    consumer: Arc<dyn Consumer>,
) {
    while let Ok(delivery) = deliveries.recv().await {
        consumer.consume(delivery).await;
    }
}

/// Collect deliveries into batches of up to `batch_size`, flushing early
/// when `timeout` has elapsed since the first delivery of the current
/// batch. A partial batch is dropped when the buffer closes; its
/// deliveries stay in the unacked list for recovery.
pub(super) async fn consume_batches(
    deliveries: Receiver<Box<dyn Delivery>>,
    batch_size: usize,
    timeout: Duration,
    consumer: Arc<dyn BatchConsumer>,
) {
    let mut batch: Vec<Box<dyn Delivery>> = Vec::new();
    let mut deadline = Instant::now();

    loop {
        let timed_out = if batch.is_empty() {
            match deliveries.recv().await {
                Ok(delivery) => {
                    // the first delivery of a batch arms the flush timer
                    deadline = Instant::now() + timeout;
                    batch.push(delivery);
                    false
                }
                Err(_) => return,
            }
        } else {
            tokio::select! {
                received = deliveries.recv() => match received {
                    Ok(delivery) => {
                        batch.push(delivery);
                        false
                    }
                    Err(_) => return,
                },
                _ = time::sleep_until(deadline) => true,
            }
        };

        if timed_out || batch.len() >= batch_size {
            consumer.consume(mem::take(&mut batch)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TestBatchConsumer, TestConsumer, TestDelivery};

    fn delivery(payload: &str) -> Box<dyn Delivery> {
        Box::new(TestDelivery::new(payload))
    }

    #[tokio::test]
    async fn test_single_worker_consumes_until_closed() {
        let (tx, rx) = async_channel::bounded(8);
        let consumer = Arc::new(TestConsumer::new("worker-test"));
        let worker = tokio::spawn(consume_deliveries(rx, consumer.clone()));

        for payload in ["a", "b", "c"] {
            assert!(tx.send(delivery(payload)).await.is_ok());
        }
        tx.close();

        worker.await.unwrap();
        assert_eq!(consumer.payloads(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_batch_worker_flushes_at_batch_size() {
        let (tx, rx) = async_channel::bounded(8);
        let consumer = Arc::new(TestBatchConsumer::new());
        let worker = tokio::spawn(consume_batches(
            rx,
            2,
            Duration::from_secs(10),
            consumer.clone(),
        ));

        for payload in ["a", "b", "c", "d"] {
            assert!(tx.send(delivery(payload)).await.is_ok());
        }
        tx.close();

        worker.await.unwrap();
        assert_eq!(consumer.batches(), vec![vec!["a", "b"], vec!["c", "d"]]);
    }

    #[tokio::test]
    async fn test_batch_worker_flushes_partial_batch_on_timeout() {
        let (tx, rx) = async_channel::bounded(8);
        let consumer = Arc::new(TestBatchConsumer::new());
        let worker = tokio::spawn(consume_batches(
            rx,
            5,
            Duration::from_millis(50),
            consumer.clone(),
        ));

        assert!(tx.send(delivery("a")).await.is_ok());
        assert!(tx.send(delivery("b")).await.is_ok());

        // well past the flush timeout, far below batch size
        time::sleep(Duration::from_millis(200)).await;
        assert_eq!(consumer.batches(), vec![vec!["a", "b"]]);

        tx.close();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_batch_worker_drops_partial_batch_on_close() {
        let (tx, rx) = async_channel::bounded(8);
        let consumer = Arc::new(TestBatchConsumer::new());
        let worker = tokio::spawn(consume_batches(
            rx,
            5,
            Duration::from_secs(10),
            consumer.clone(),
        ));

        assert!(tx.send(delivery("a")).await.is_ok());
        assert!(tx.send(delivery("b")).await.is_ok());

        // give the worker time to buffer both, then close before either a
        // full batch or the timeout
        time::sleep(Duration::from_millis(50)).await;
        tx.close();

        worker.await.unwrap();
        assert!(consumer.batches().is_empty());
    }

    #[tokio::test]
    async fn test_batch_worker_timer_rearms_per_batch() {
        let (tx, rx) = async_channel::bounded(8);
        let consumer = Arc::new(TestBatchConsumer::new());
        let worker = tokio::spawn(consume_batches(
            rx,
            5,
            Duration::from_millis(50),
            consumer.clone(),
        ));

        assert!(tx.send(delivery("a")).await.is_ok());
        time::sleep(Duration::from_millis(150)).await;
        assert!(tx.send(delivery("b")).await.is_ok());
        time::sleep(Duration::from_millis(150)).await;

        assert_eq!(consumer.batches(), vec![vec!["a"], vec!["b"]]);

        tx.close();
        worker.await.unwrap();
    }
}
