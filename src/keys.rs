//! Redis key layout.
//!
//! Everything the library touches lives under the `rmq::` prefix. Queue
//! payload storages (ready, rejected, delayed) are global per queue name;
//! the unacked list and the consumer set are scoped to the connection that
//! consumes them. The heartbeat and connection-set keys are published here
//! for the connection registry that supervises dead peers, even though this
//! crate does not manage them itself.

/// Set of live connection names.
pub const CONNECTIONS_KEY: &str = "rmq::connections";

/// Set of all open queues.
pub const QUEUES_KEY: &str = "rmq::queues";

/// Expiring liveness key for a connection.
/// Example: `rmq::connection::worker-a1B2c3::heartbeat`
pub fn connection_heartbeat(connection: &str) -> String {
    format!("rmq::connection::{connection}::heartbeat")
}

/// Set of queues consumed by a connection.
pub fn connection_queues(connection: &str) -> String {
    format!("rmq::connection::{connection}::queues")
}

/// Set of consumer names a connection registered on a queue.
pub fn connection_queue_consumers(connection: &str, queue: &str) -> String {
    format!("rmq::connection::{connection}::queue::[{queue}]::consumers")
}

/// List of deliveries a connection is currently consuming from a queue.
pub fn connection_queue_unacked(connection: &str, queue: &str) -> String {
    format!("rmq::connection::{connection}::queue::[{queue}]::unacked")
}

/// List of ready deliveries in a queue. Left is youngest, right is oldest.
pub fn queue_ready(queue: &str) -> String {
    format!("rmq::queue::[{queue}]::ready")
}

/// List of rejected deliveries from a queue.
pub fn queue_rejected(queue: &str) -> String {
    format!("rmq::queue::[{queue}]::rejected")
}

/// Sorted set of delayed deliveries, scored by absolute due time in
/// nanoseconds since the Unix epoch.
pub fn queue_delayed(queue: &str) -> String {
    format!("rmq::queue::[{queue}]::delayed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_formats() {
        assert_eq!(CONNECTIONS_KEY, "rmq::connections");
        assert_eq!(QUEUES_KEY, "rmq::queues");
        assert_eq!(
            connection_heartbeat("conn-1"),
            "rmq::connection::conn-1::heartbeat"
        );
        assert_eq!(connection_queues("conn-1"), "rmq::connection::conn-1::queues");
        assert_eq!(
            connection_queue_consumers("conn-1", "tasks"),
            "rmq::connection::conn-1::queue::[tasks]::consumers"
        );
        assert_eq!(
            connection_queue_unacked("conn-1", "tasks"),
            "rmq::connection::conn-1::queue::[tasks]::unacked"
        );
        assert_eq!(queue_ready("tasks"), "rmq::queue::[tasks]::ready");
        assert_eq!(queue_rejected("tasks"), "rmq::queue::[tasks]::rejected");
        assert_eq!(queue_delayed("tasks"), "rmq::queue::[tasks]::delayed");
    }
}
