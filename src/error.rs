// src/error.rs

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Every failure the credential agent can surface.
///
/// In watch mode all of these are caught at the top of the cycle and turned
/// into a backoff; in `--init` and `--key` modes they terminate the process.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("invalid configuration: {0}")]
    ConfigurationInvalid(String),

    #[error("identity token unavailable at {path}: {reason}")]
    IdentityUnavailable { path: PathBuf, reason: String },

    #[error("Vault authentication failed with status {status}")]
    AuthenticationFailed { status: u16 },

    /// Never leaves the lease manager: a failed renewal falls back to login.
    #[error("Vault token renewal failed with status {status}")]
    RenewalFailed { status: u16 },

    #[error("failed to retrieve secret: status {status}")]
    SecretRetrievalFailed { status: u16 },

    #[error("no credentials found in secret data")]
    EmptyCredentialSet,

    #[error("malformed Vault response: {0}")]
    MalformedResponse(String),

    #[error("credential set is missing required field '{0}'")]
    IncompleteCredentialSet(String),

    #[error("failed to write credentials file {path}: {source}")]
    PersistenceFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("requested secret key '{0}' not found")]
    KeyNotFound(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl AgentError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::ConfigurationInvalid(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedResponse(msg.into())
    }

    pub fn persistence(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::PersistenceFailed {
            path: path.into(),
            source,
        }
    }
}
