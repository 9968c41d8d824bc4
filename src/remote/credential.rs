//! Login details for a remote session.

use camino::Utf8PathBuf;

/// How the SSH client authenticates.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum Credential {
    /// Rely on the client defaults.
    #[default]
    None,
    /// Password, fed to the client through `sshpass`.
    Password(String),
    /// Private key passed with `-i`. A leading `~/` is expanded.
    KeyFile(Utf8PathBuf),
}

/// User plus credential for one session.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Login {
    /// Remote account name.
    pub user: String,
    /// Authentication method.
    pub credential: Credential,
}

impl Login {
    /// Login without an explicit credential.
    #[must_use]
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            credential: Credential::None,
        }
    }

    /// Login authenticating with a password.
    #[must_use]
    pub fn with_password(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            credential: Credential::Password(password.into()),
        }
    }

    /// Login authenticating with a private key file.
    #[must_use]
    pub fn with_key_file(user: impl Into<String>, key_file: impl Into<Utf8PathBuf>) -> Self {
        Self {
            user: user.into(),
            credential: Credential::KeyFile(key_file.into()),
        }
    }

    pub(crate) fn password(&self) -> Option<&str> {
        match &self.credential {
            Credential::Password(password) if !password.is_empty() => Some(password),
            _ => None,
        }
    }

    pub(crate) fn key_file(&self) -> Option<&Utf8PathBuf> {
        match &self.credential {
            Credential::KeyFile(path) => Some(path),
            _ => None,
        }
    }
}
