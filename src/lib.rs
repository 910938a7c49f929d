//! # rmq
//!
//! Redis-backed work queue with at-least-once delivery.
//!
//! Producers publish string payloads to named queues; consumers pull them
//! through a bounded prefetch pipeline and finish each delivery with an
//! ack, an explicit reject, a time-based delay or a push to a successor
//! queue. Redis is both the transport and the source of truth; this crate
//! is the client-side state machine that drives it.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use rmq::{Connection, testing::TestConsumer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), rmq::RmqError> {
//!     let connection = Connection::open("worker", "redis://localhost:6379").await?;
//!     let queue = connection.open_queue("tasks").await;
//!
//!     queue.publish("task payload").await;
//!
//!     queue.start_consuming(10, Duration::from_millis(100)).await;
//!     let consumer = Arc::new(TestConsumer::new("printer"));
//!     queue.add_consumer("printer", consumer).await;
//!
//!     // ... later:
//!     queue.stop_consuming();
//!     queue.wait_for_consuming().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Delivery guarantees
//!
//! At-least-once: a delivery that is never finished stays in the unacked
//! list and is requeued by [`Queue::return_all_unacked`] on the next start.
//! Rejected payloads are retained until returned with
//! [`Queue::return_rejected`] or purged.

mod connection;
mod consumer;
mod delivery;
mod error;
pub mod keys;
mod queue;
mod settings;
pub mod testing;

pub use connection::Connection;
pub use consumer::{BatchConsumer, Consumer};
pub use delivery::{Delivery, State};
pub use error::{set_store_error_hook, RmqError, RmqResult};
pub use queue::Queue;
pub use settings::Settings;
