// Integration tests for publishing and the maintenance operations.
// These need a running Redis instance:
//   docker run -d -p 6379:6379 redis:7
// Run with: cargo test -- --ignored

use std::env;

use rmq::{Connection, Queue};
use uuid::Uuid;

fn redis_url() -> String {
    env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

async fn open_test_queue(prefix: &str) -> (Connection, Queue) {
    let connection = Connection::open("test", &redis_url())
        .await
        .expect("Failed to connect to Redis");
    let queue = connection
        .open_queue(&format!("{}-{}", prefix, Uuid::new_v4()))
        .await;
    (connection, queue)
}

async fn cleanup(queue: &Queue) {
    queue.close().await;
    queue.close_in_connection().await;
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_publish_increments_ready_count() {
    let (_connection, queue) = open_test_queue("publish").await;

    assert_eq!(queue.ready_count().await, 0);
    assert!(queue.publish("a").await);
    assert!(queue.publish("b").await);
    assert_eq!(queue.ready_count().await, 2);

    cleanup(&queue).await;
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_publish_delayed_counts_as_delayed_not_ready() {
    let (_connection, queue) = open_test_queue("publish-delayed").await;

    assert!(
        queue
            .publish_delayed("later", std::time::Duration::from_secs(60))
            .await
    );
    assert_eq!(queue.delayed_count().await, 1);
    assert_eq!(queue.ready_count().await, 0);

    cleanup(&queue).await;
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_purge_ready_empties_and_reports_prior_count() {
    let (_connection, queue) = open_test_queue("purge").await;

    // more than one trim batch worth of entries
    for i in 0..250 {
        queue.publish(&format!("payload-{}", i)).await;
    }
    assert_eq!(queue.ready_count().await, 250);

    assert_eq!(queue.purge_ready().await, 250);
    assert_eq!(queue.ready_count().await, 0);

    // purging an empty queue is a no-op
    assert_eq!(queue.purge_ready().await, 0);

    cleanup(&queue).await;
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_purge_delayed_empties_the_sorted_set() {
    let (_connection, queue) = open_test_queue("purge-delayed").await;

    for i in 0..120 {
        queue
            .publish_delayed(&format!("payload-{}", i), std::time::Duration::from_secs(60))
            .await;
    }
    assert_eq!(queue.delayed_count().await, 120);

    assert_eq!(queue.purge_delayed().await, 120);
    assert_eq!(queue.delayed_count().await, 0);

    cleanup(&queue).await;
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_close_purges_all_storages() {
    let (_connection, queue) = open_test_queue("close").await;

    queue.publish("ready").await;
    queue
        .publish_delayed("delayed", std::time::Duration::from_secs(60))
        .await;

    assert!(queue.close().await);
    assert_eq!(queue.ready_count().await, 0);
    assert_eq!(queue.delayed_count().await, 0);
    assert_eq!(queue.rejected_count().await, 0);

    // the queue is no longer registered, so a second close reports false
    assert!(!queue.close().await);

    queue.close_in_connection().await;
}
