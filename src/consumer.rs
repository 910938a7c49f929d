//! Consumer callback traits.

use async_trait::async_trait;

use crate::delivery::Delivery;

/// A consumer of single deliveries.
///
/// `consume` is invoked once per delivery by a worker task and must finish
/// the delivery (ack, reject, push or delay) before returning, or leave it
/// in the unacked list for recovery.
#[async_trait]
pub trait Consumer: Send + Sync {
    async fn consume(&self, delivery: Box<dyn Delivery>);
}

/// A consumer of delivery batches, in the order the worker collected them.
#[async_trait]
pub trait BatchConsumer: Send + Sync {
    async fn consume(&self, batch: Vec<Box<dyn Delivery>>);
}
