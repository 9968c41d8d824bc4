//! Minimal QMP client: wait for one named event.
//!
//! QEMU greets with a single JSON line, expects `qmp_capabilities` before
//! anything else, then emits newline-delimited JSON objects. Only the
//! `event` field of asynchronous messages is inspected.

use std::time::Duration;

use camino::Utf8Path;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::time::{Instant, sleep};
use tracing::debug;

use crate::vm::VmError;

/// How long QEMU gets to create its QMP socket.
pub const SOCKET_TIMEOUT: Duration = Duration::from_secs(30);

const SOCKET_POLL: Duration = Duration::from_secs(1);

/// Waits until `path` exists.
///
/// # Errors
///
/// Returns [`VmError::QmpSocketTimeout`] once `timeout` has passed.
pub async fn wait_for_socket(path: &Utf8Path, timeout: Duration) -> Result<(), VmError> {
    let started = Instant::now();
    loop {
        if path.exists() {
            return Ok(());
        }
        if started.elapsed() >= timeout {
            return Err(VmError::QmpSocketTimeout {
                path: path.to_path_buf(),
                waited_secs: timeout.as_secs(),
            });
        }
        sleep(SOCKET_POLL).await;
    }
}

/// Connects to the QMP socket at `path` and returns once `event` arrives.
///
/// # Errors
///
/// Returns [`VmError::QmpSocketTimeout`] when the socket never appears, and
/// [`VmError::Qmp`] when the handshake fails or QEMU closes the connection
/// first.
pub async fn wait_for_event(path: &Utf8Path, event: &str) -> Result<(), VmError> {
    wait_for_socket(path, SOCKET_TIMEOUT).await?;
    let stream = UnixStream::connect(path).await?;
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let greeting = next_message(&mut lines).await?;
    if greeting.get("QMP").is_none() {
        return Err(VmError::Qmp(format!("unexpected greeting: {greeting}")));
    }

    write_half
        .write_all(b"{\"execute\":\"qmp_capabilities\"}\n")
        .await?;

    loop {
        let message = next_message(&mut lines).await?;
        if let Some(error) = message.get("error") {
            return Err(VmError::Qmp(format!("qmp_capabilities rejected: {error}")));
        }
        let Some(name) = message.get("event").and_then(Value::as_str) else {
            continue;
        };
        debug!(event = name, "qmp event");
        if name == event {
            return Ok(());
        }
    }
}

async fn next_message<R>(lines: &mut tokio::io::Lines<R>) -> Result<Value, VmError>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    loop {
        let Some(line) = lines.next_line().await? else {
            return Err(VmError::Qmp(String::from(
                "connection closed before the expected message",
            )));
        };
        if line.trim().is_empty() {
            continue;
        }
        return serde_json::from_str(&line)
            .map_err(|err| VmError::Qmp(format!("invalid message {line:?}: {err}")));
    }
}
