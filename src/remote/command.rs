//! Remote command rendering.
//!
//! The system `ssh` client hands its trailing arguments to the remote login
//! shell as a single string, so argument lists must be quoted locally before
//! transmission to keep each element a single remote token.

use std::borrow::Cow;
use std::fmt;

use shell_escape::unix::escape;

/// Command to execute on the guest.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RemoteCommand {
    /// Pre-quoted shell text, transmitted verbatim.
    Shell(String),
    /// Argument vector; every element is shell-quoted and the result joined
    /// with spaces.
    Argv(Vec<String>),
}

impl RemoteCommand {
    /// Builds an argument-vector command.
    #[must_use]
    pub fn argv<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Argv(args.into_iter().map(Into::into).collect())
    }

    /// Renders the single command string sent to the remote shell.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Shell(text) => text.clone(),
            Self::Argv(args) => args
                .iter()
                .map(|arg| escape(Cow::Borrowed(arg.as_str())).into_owned())
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl From<&str> for RemoteCommand {
    fn from(value: &str) -> Self {
        Self::Shell(value.to_owned())
    }
}

impl From<String> for RemoteCommand {
    fn from(value: String) -> Self {
        Self::Shell(value)
    }
}

impl From<Vec<String>> for RemoteCommand {
    fn from(value: Vec<String>) -> Self {
        Self::Argv(value)
    }
}

impl<const N: usize> From<[&str; N]> for RemoteCommand {
    fn from(value: [&str; N]) -> Self {
        Self::argv(value)
    }
}
