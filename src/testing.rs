//! In-memory test doubles for consumer code.
//!
//! `TestDelivery` stands in for a store-backed delivery and records which
//! transition it received; the test consumers record what they were fed.
//! All of them are exported so applications can unit-test their own
//! consumers without a Redis instance.

use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::consumer::{BatchConsumer, Consumer};
use crate::delivery::{Delivery, State};

/// A delivery that records its state transitions instead of touching a
/// store. Only the first transition out of `Unacked` succeeds, mirroring
/// the single-use contract of real deliveries.
pub struct TestDelivery {
    payload: String,
    state: Mutex<State>,
}

impl TestDelivery {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            state: Mutex::new(State::Unacked),
        }
    }

    pub fn state(&self) -> State {
        *self.state.lock().unwrap()
    }

    fn transition(&self, to: State) -> bool {
        let mut state = self.state.lock().unwrap();
        if *state != State::Unacked {
            return false;
        }
        *state = to;
        true
    }
}

impl fmt::Display for TestDelivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.payload)
    }
}

#[async_trait]
impl Delivery for TestDelivery {
    fn payload(&self) -> &str {
        &self.payload
    }

    async fn ack(&self) -> bool {
        self.transition(State::Acked)
    }

    async fn reject(&self) -> bool {
        self.transition(State::Rejected)
    }

    async fn push(&self) -> bool {
        self.transition(State::Pushed)
    }

    async fn delay(&self, _duration: Duration) -> bool {
        self.transition(State::Delayed)
    }
}

/// What a test consumer does with each delivery after recording it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AckMode {
    Ack,
    Reject,
    /// Leave the delivery unfinished; it stays in the unacked list.
    None,
}

/// Records every payload it sees, then finishes the delivery according to
/// its [`AckMode`] (acking by default).
pub struct TestConsumer {
    name: String,
    ack_mode: AckMode,
    sleep: Option<Duration>,
    payloads: Mutex<Vec<String>>,
}

impl TestConsumer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ack_mode: AckMode::Ack,
            sleep: None,
            payloads: Mutex::new(Vec::new()),
        }
    }

    pub fn with_ack_mode(mut self, ack_mode: AckMode) -> Self {
        self.ack_mode = ack_mode;
        self
    }

    /// Sleep this long inside every `consume` call, simulating a slow
    /// consumer.
    pub fn with_sleep(mut self, duration: Duration) -> Self {
        self.sleep = Some(duration);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payloads(&self) -> Vec<String> {
        self.payloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl Consumer for TestConsumer {
    async fn consume(&self, delivery: Box<dyn Delivery>) {
        self.payloads
            .lock()
            .unwrap()
            .push(delivery.payload().to_string());

        if let Some(duration) = self.sleep {
            tokio::time::sleep(duration).await;
        }

        match self.ack_mode {
            AckMode::Ack => {
                delivery.ack().await;
            }
            AckMode::Reject => {
                delivery.reject().await;
            }
            AckMode::None => {}
        }
    }
}

/// Records every batch it sees and acks each delivery unless told not to.
pub struct TestBatchConsumer {
    auto_ack: bool,
    batches: Mutex<Vec<Vec<String>>>,
}

impl Default for TestBatchConsumer {
    fn default() -> Self {
        Self::new()
    }
}

impl TestBatchConsumer {
    pub fn new() -> Self {
        Self {
            auto_ack: true,
            batches: Mutex::new(Vec::new()),
        }
    }

    pub fn without_auto_ack(mut self) -> Self {
        self.auto_ack = false;
        self
    }

    pub fn batches(&self) -> Vec<Vec<String>> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl BatchConsumer for TestBatchConsumer {
    async fn consume(&self, batch: Vec<Box<dyn Delivery>>) {
        let payloads = batch
            .iter()
            .map(|delivery| delivery.payload().to_string())
            .collect();
        self.batches.lock().unwrap().push(payloads);

        if self.auto_ack {
            for delivery in &batch {
                delivery.ack().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_delivery_is_single_use() {
        let delivery = TestDelivery::new("payload");
        assert_eq!(delivery.state(), State::Unacked);

        assert!(delivery.ack().await);
        assert_eq!(delivery.state(), State::Acked);

        // every later transition finds nothing to do
        assert!(!delivery.ack().await);
        assert!(!delivery.reject().await);
        assert!(!delivery.push().await);
        assert!(!delivery.delay(Duration::from_secs(1)).await);
        assert_eq!(delivery.state(), State::Acked);
    }

    #[tokio::test]
    async fn test_delivery_records_each_transition() {
        let rejected = TestDelivery::new("r");
        assert!(rejected.reject().await);
        assert_eq!(rejected.state(), State::Rejected);

        let pushed = TestDelivery::new("p");
        assert!(pushed.push().await);
        assert_eq!(pushed.state(), State::Pushed);

        let delayed = TestDelivery::new("d");
        assert!(delayed.delay(Duration::from_millis(10)).await);
        assert_eq!(delayed.state(), State::Delayed);
    }

    #[tokio::test]
    async fn test_consumer_records_and_acks() {
        let consumer = TestConsumer::new("test");
        consumer.consume(Box::new(TestDelivery::new("a"))).await;
        consumer.consume(Box::new(TestDelivery::new("b"))).await;
        assert_eq!(consumer.payloads(), vec!["a", "b"]);
    }
}
