//! Environment-based configuration.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
pub const DEFAULT_CONNECTION_NAME: &str = "default";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Settings for opening a connection, loaded from the environment.
///
/// Recognized variables:
/// - `REDIS_URL` - Redis server URL (`redis://` or `rediss://`)
/// - `RMQ_CONNECTION` - logical connection name (a random suffix is
///   appended when the connection is opened)
/// - `RMQ_POLL_INTERVAL_MS` - default poll interval for consumers
#[derive(Clone, Debug)]
pub struct Settings {
    pub redis_url: String,
    pub connection_name: String,
    pub poll_interval: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            redis_url: DEFAULT_REDIS_URL.to_string(),
            connection_name: DEFAULT_CONNECTION_NAME.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let redis_url =
            env::var("REDIS_URL").unwrap_or_else(|_| DEFAULT_REDIS_URL.to_string());
        let connection_name = env::var("RMQ_CONNECTION")
            .unwrap_or_else(|_| DEFAULT_CONNECTION_NAME.to_string());

        let poll_interval = match env::var("RMQ_POLL_INTERVAL_MS") {
            Ok(raw) => {
                let millis: u64 = raw
                    .parse()
                    .context("RMQ_POLL_INTERVAL_MS must be an integer number of milliseconds")?;
                Duration::from_millis(millis)
            }
            Err(_) => DEFAULT_POLL_INTERVAL,
        };

        Ok(Self {
            redis_url,
            connection_name,
            poll_interval,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.redis_url, "redis://127.0.0.1:6379");
        assert_eq!(settings.connection_name, "default");
        assert_eq!(settings.poll_interval, Duration::from_millis(100));
    }
}
