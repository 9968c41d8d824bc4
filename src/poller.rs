//! Bounded waiting for resources that become ready asynchronously.
//!
//! Two strategies are offered. [`ensure_ready`] retries a check a fixed
//! number of times with a fixed pause, which suits "can I run a command yet"
//! checks. [`wait_port_open`] polls a TCP port against a deadline, which suits
//! "has the guest started listening at all".

use std::fmt::Display;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::{Instant, sleep, timeout};
use tracing::warn;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Retry budget for [`ensure_ready`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Number of attempts before giving up.
    pub max_retries: u32,
    /// Pause after each failed attempt.
    pub retry_delay: Duration,
}

impl RetryPolicy {
    /// SSH readiness after boot. Some images reboot and relabel during first
    /// boot, so the budget is generous: 30 attempts, 10 seconds apart.
    pub const SSH_READY: Self = Self {
        max_retries: 30,
        retry_delay: Duration::from_secs(10),
    };
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::SSH_READY
    }
}

/// Deadline for [`wait_port_open`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ReachabilityPolicy {
    /// Pause between connection attempts.
    pub poll_interval: Duration,
    /// Total time allowed before failing.
    pub max_wait: Duration,
}

impl Default for ReachabilityPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_wait: Duration::from_secs(600),
        }
    }
}

/// Readiness settings carried by every VM.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ReadinessConfig {
    /// Budget for the SSH no-op check run before each remote operation.
    pub ssh: RetryPolicy,
    /// Deadline for the SSH port to accept TCP connections after start.
    pub reachability: ReachabilityPolicy,
}

/// Errors surfaced when a resource never becomes ready.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ReadinessError {
    /// Raised when every attempt failed.
    #[error("not ready after {retries} retries of {}s: {last_error}", delay.as_secs())]
    RetryExhausted {
        /// Number of attempts made.
        retries: u32,
        /// Pause used between attempts.
        delay: Duration,
        /// Rendered cause of the final failure.
        last_error: String,
    },
    /// Raised when a TCP port kept refusing connections until the deadline.
    #[error("{host}:{port} refused connections after {waited_secs}s")]
    Unreachable {
        /// Host that was polled.
        host: String,
        /// Port that was polled.
        port: u16,
        /// Seconds spent waiting.
        waited_secs: u64,
    },
}

/// Runs `check` until it succeeds or `policy.max_retries` attempts failed.
///
/// Every failure is logged with its attempt number and followed by a pause of
/// `policy.retry_delay`, including the last one.
///
/// # Errors
///
/// Returns [`ReadinessError::RetryExhausted`] when the budget is spent.
pub async fn ensure_ready<T, E, F>(mut check: F, policy: RetryPolicy) -> Result<T, ReadinessError>
where
    F: FnMut() -> Result<T, E>,
    E: Display,
{
    let mut last_error = String::from("no attempt ran");
    for attempt in 1..=policy.max_retries {
        match check() {
            Ok(value) => return Ok(value),
            Err(err) => {
                warn!(
                    attempt,
                    max_retries = policy.max_retries,
                    "not ready {attempt}/{}: {err}",
                    policy.max_retries
                );
                last_error = err.to_string();
            }
        }
        sleep(policy.retry_delay).await;
    }

    Err(ReadinessError::RetryExhausted {
        retries: policy.max_retries,
        delay: policy.retry_delay,
        last_error,
    })
}

/// Polls `host:port` until a TCP connection succeeds.
///
/// # Errors
///
/// Returns [`ReadinessError::Unreachable`] once `policy.max_wait` has passed
/// without a successful connection.
pub async fn wait_port_open(
    host: &str,
    port: u16,
    policy: ReachabilityPolicy,
) -> Result<(), ReadinessError> {
    let started = Instant::now();
    loop {
        let connect = timeout(CONNECT_TIMEOUT, TcpStream::connect((host, port))).await;
        if matches!(connect, Ok(Ok(_))) {
            return Ok(());
        }

        if started.elapsed() >= policy.max_wait {
            return Err(ReadinessError::Unreachable {
                host: host.to_owned(),
                port,
                waited_secs: policy.max_wait.as_secs(),
            });
        }
        sleep(policy.poll_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use rstest::rstest;

    use super::*;

    fn policy(max_retries: u32, secs: u64) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            retry_delay: Duration::from_secs(secs),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_check_exhausts_budget() {
        let attempts = Cell::new(0_u32);
        let started = Instant::now();

        let result: Result<(), _> = ensure_ready(
            || {
                attempts.set(attempts.get() + 1);
                Err::<(), _>("exit status 21")
            },
            policy(30, 10),
        )
        .await;

        assert_eq!(attempts.get(), 30);
        let elapsed = started.elapsed();
        assert!(
            elapsed >= Duration::from_secs(300) && elapsed < Duration::from_secs(301),
            "expected 30 pauses of 10s, waited {elapsed:?}"
        );
        let err = result.expect_err("check never succeeds");
        assert_eq!(
            err,
            ReadinessError::RetryExhausted {
                retries: 30,
                delay: Duration::from_secs(10),
                last_error: String::from("exit status 21"),
            }
        );
        assert_eq!(
            err.to_string(),
            "not ready after 30 retries of 10s: exit status 21"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn check_that_recovers_returns_value() {
        let attempts = Cell::new(0_u32);
        let started = Instant::now();

        let value = ensure_ready(
            || {
                attempts.set(attempts.get() + 1);
                if attempts.get() < 4 {
                    Err("connection refused")
                } else {
                    Ok(attempts.get())
                }
            },
            policy(30, 10),
        )
        .await
        .expect("check eventually succeeds");

        assert_eq!(value, 4);
        let elapsed = started.elapsed();
        assert!(
            elapsed >= Duration::from_secs(30) && elapsed < Duration::from_secs(31),
            "expected 3 pauses of 10s, waited {elapsed:?}"
        );
    }

    #[rstest]
    #[case::one(1)]
    #[case::three(3)]
    #[tokio::test(start_paused = true)]
    async fn attempts_match_budget(#[case] retries: u32) {
        let attempts = Cell::new(0_u32);
        let result: Result<(), _> = ensure_ready(
            || {
                attempts.set(attempts.get() + 1);
                Err::<(), _>("nope")
            },
            policy(retries, 1),
        )
        .await;

        assert!(matches!(
            result,
            Err(ReadinessError::RetryExhausted { retries: r, .. }) if r == retries
        ));
        assert_eq!(attempts.get(), retries);
    }

    #[tokio::test]
    async fn wait_port_open_succeeds_when_port_listens() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap_or_else(|err| panic!("bind listener: {err}"));
        let port = listener
            .local_addr()
            .unwrap_or_else(|err| panic!("listener address: {err}"))
            .port();

        let result = wait_port_open(
            "127.0.0.1",
            port,
            ReachabilityPolicy {
                poll_interval: Duration::from_millis(10),
                max_wait: Duration::from_secs(1),
            },
        )
        .await;

        assert!(result.is_ok(), "unexpected outcome: {result:?}");
    }

    #[tokio::test]
    async fn wait_port_open_reports_waited_time() {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .and_then(|listener| listener.local_addr())
            .unwrap_or_else(|err| panic!("reserve port: {err}"))
            .port();

        let err = wait_port_open(
            "127.0.0.1",
            port,
            ReachabilityPolicy {
                poll_interval: Duration::from_millis(50),
                max_wait: Duration::from_secs(1),
            },
        )
        .await
        .expect_err("nothing listens on the port");

        assert!(
            err.to_string().contains("after 1s"),
            "unexpected message: {err}"
        );
    }
}
