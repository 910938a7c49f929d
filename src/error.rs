//! Error types and the fatal-store-error policy.
//!
//! Queue and delivery operations deliberately return booleans and counts,
//! not `Result`: an empty or missing key is a normal "nothing to do" answer,
//! and any other Redis failure means this process no longer trusts its view
//! of the store. The default response to the latter is a diagnostic followed
//! by process exit; an embedding application that wants to survive installs
//! [`set_store_error_hook`] once at startup, after which the failing task
//! panics instead of taking the process down.

use std::sync::OnceLock;

use thiserror::Error;

pub type RmqResult<T> = Result<T, RmqError>;

/// Errors surfaced by the fallible entry points (opening a connection).
/// Everything past that point follows the fatal policy above.
#[derive(Error, Debug)]
pub enum RmqError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

type StoreErrorHook = Box<dyn Fn(&redis::RedisError) + Send + Sync>;

static STORE_ERROR_HOOK: OnceLock<StoreErrorHook> = OnceLock::new();

/// Install a process-wide handler for unexpected store errors.
///
/// Without a hook, any unexpected Redis error terminates the process.
/// With one, the hook observes the error and the failing task panics,
/// leaving the rest of the process running. Only the first call wins;
/// returns false if a hook was already installed.
pub fn set_store_error_hook(hook: impl Fn(&redis::RedisError) + Send + Sync + 'static) -> bool {
    STORE_ERROR_HOOK.set(Box::new(hook)).is_ok()
}

pub(crate) fn store_fatal(operation: &'static str, err: redis::RedisError) -> ! {
    tracing::error!(
        operation = operation,
        error = %err,
        "unrecoverable Redis error"
    );

    if let Some(hook) = STORE_ERROR_HOOK.get() {
        hook(&err);
        panic!("rmq: {operation} failed: {err}");
    }

    std::process::exit(1);
}

/// Unwrap a Redis result, escalating any error through the fatal policy.
///
/// "Nothing there" responses never reach this point as errors: callers ask
/// for `Option`, `0` or an empty collection and the redis crate types nil
/// replies accordingly.
pub(crate) fn expect_store<T>(
    operation: &'static str,
    result: Result<T, redis::RedisError>,
) -> T {
    match result {
        Ok(value) => value,
        Err(err) => store_fatal(operation, err),
    }
}
