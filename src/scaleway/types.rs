//! Server states and actions as reported by the Instances API.
//!
//! Only the values the VM lifecycle branches on get their own variant;
//! everything else is carried verbatim for logs and error messages.

use std::fmt;

/// Power state of a server.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum ServerState {
    Running,
    Stopped,
    /// `starting`, `stopping`, `locked` and anything newer.
    Other(String),
}

impl ServerState {
    pub(crate) fn as_str(&self) -> &str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Other(state) => state,
        }
    }
}

impl From<String> for ServerState {
    fn from(value: String) -> Self {
        match value.as_str() {
            "running" => Self::Running,
            "stopped" => Self::Stopped,
            _ => Self::Other(value),
        }
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action a server accepts in its current state.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum ServerAction {
    PowerOn,
    Terminate,
    Other(String),
}

impl ServerAction {
    pub(crate) fn as_str(&self) -> &str {
        match self {
            Self::PowerOn => "poweron",
            Self::Terminate => "terminate",
            Self::Other(action) => action,
        }
    }
}

impl From<String> for ServerAction {
    fn from(value: String) -> Self {
        match value.as_str() {
            "poweron" => Self::PowerOn,
            "terminate" => Self::Terminate,
            _ => Self::Other(value),
        }
    }
}

impl From<&str> for ServerAction {
    fn from(value: &str) -> Self {
        Self::from(value.to_owned())
    }
}
