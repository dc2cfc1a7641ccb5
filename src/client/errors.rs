//! Classifies torrent-client failures into the categories §4.2 names, and
//! applies the bounded retry policy on top of a classified call.
//!
//! The original Python implementation (`qbit_error_handler.py`) retries with
//! a fixed five-second delay. The specification calls for exponential
//! backoff instead; this module implements the specified behavior rather
//! than reproducing the source's fixed delay (recorded in `DESIGN.md`).

use std::time::Duration;

use crate::error::Error;

/// The outcome of classifying a client-call failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Fatal for the run.
    AuthFailed,
    /// Retried up to the configured attempt count.
    ConnectionLost,
    /// Expected; the caller treats this as a typed "missing" result.
    NotFound,
    /// Typed conflict; e.g. unknown category, triggers create-then-retry.
    Conflict,
    /// Retried like `ConnectionLost`.
    TransientServerError,
    /// Not retried; the operation fails, the run continues.
    PermanentClientError,
    /// Fatal for the run.
    UnsupportedVersion,
}

impl ErrorClass {
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorClass::ConnectionLost | ErrorClass::TransientServerError)
    }

    pub fn is_fatal(self) -> bool {
        matches!(self, ErrorClass::AuthFailed | ErrorClass::UnsupportedVersion)
    }
}

/// Classifies an HTTP status code returned by the qBittorrent Web API.
/// `qbit-rs` surfaces most failures as either an HTTP status or a
/// connection error; this covers the status-carrying case.
pub fn classify_status(status: u16) -> ErrorClass {
    match status {
        401 | 403 => ErrorClass::AuthFailed,
        404 => ErrorClass::NotFound,
        409 => ErrorClass::Conflict,
        500..=599 => ErrorClass::TransientServerError,
        400..=499 => ErrorClass::PermanentClientError,
        _ => ErrorClass::PermanentClientError,
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> ErrorClass {
    if err.is_connect() || err.is_timeout() {
        return ErrorClass::ConnectionLost;
    }
    if let Some(status) = err.status() {
        return classify_status(status.as_u16());
    }
    ErrorClass::ConnectionLost
}

/// Retry policy: exponential backoff, 3 attempts by default, 5s base delay.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1 << attempt.min(8))
    }
}

/// Runs `call` under the retry policy, classifying each failure with
/// `classify`. Stops retrying immediately on a non-retryable class.
pub async fn with_retry<T, E, F, Fut>(
    policy: RetryPolicy,
    classify: impl Fn(&E) -> ErrorClass,
    mut call: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let class = classify(&err);
                let message = err.to_string();
                if class.is_fatal() {
                    return Err(match class {
                        ErrorClass::AuthFailed => Error::ClientAuth(message),
                        ErrorClass::UnsupportedVersion => Error::ClientUnsupportedVersion(message),
                        _ => unreachable!(),
                    });
                }
                if matches!(class, ErrorClass::NotFound) {
                    return Err(Error::ClientNotFound(message));
                }
                if matches!(class, ErrorClass::Conflict) {
                    return Err(Error::ClientConflict(message));
                }
                if !class.is_retryable() || attempt + 1 >= policy.attempts {
                    return Err(Error::ClientConnection(message));
                }
                tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_status_codes() {
        assert_eq!(classify_status(401), ErrorClass::AuthFailed);
        assert_eq!(classify_status(404), ErrorClass::NotFound);
        assert_eq!(classify_status(409), ErrorClass::Conflict);
        assert_eq!(classify_status(503), ErrorClass::TransientServerError);
        assert_eq!(classify_status(400), ErrorClass::PermanentClientError);
    }

    #[test]
    fn backoff_grows_exponentially() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(10));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(20));
    }

    #[tokio::test]
    async fn retry_stops_on_fatal_class() {
        let mut calls = 0;
        let result: Result<(), Error> = with_retry(
            RetryPolicy::default(),
            |_: &&str| ErrorClass::AuthFailed,
            || {
                calls += 1;
                async { Err("unauthorized") }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn retry_exhausts_attempts_then_fails() {
        let mut calls = 0;
        let policy = RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(1),
        };
        let result: Result<(), Error> = with_retry(
            policy,
            |_: &&str| ErrorClass::ConnectionLost,
            || {
                calls += 1;
                async { Err("timeout") }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }
}
