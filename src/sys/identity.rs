// src/sys/identity.rs

use async_trait::async_trait;
use secrecy::SecretString;
use std::path::PathBuf;
use tokio::fs;
use tracing::debug;
use zeroize::Zeroizing;

use crate::error::AgentError;
use crate::sys::traits::IdentitySource;

/// Reads the JWT-SVID that the SPIFFE helper keeps refreshed on a shared volume.
pub struct FileIdentitySource {
    token_file: PathBuf, // Injected via AgentConfig, e.g., "/run/secrets/spiffe/jwt.token"
}

impl FileIdentitySource {
    pub fn new(token_file: PathBuf) -> Self {
        Self { token_file }
    }
}

#[async_trait]
impl IdentitySource for FileIdentitySource {
    async fn fetch_identity(&self) -> Result<SecretString, AgentError> {
        // Re-read on every login: the helper rotates the SVID in place.
        let raw = Zeroizing::new(fs::read_to_string(&self.token_file).await.map_err(|e| {
            AgentError::IdentityUnavailable {
                path: self.token_file.clone(),
                reason: e.to_string(),
            }
        })?);

        let jwt = raw.trim();
        if jwt.is_empty() {
            return Err(AgentError::IdentityUnavailable {
                path: self.token_file.clone(),
                reason: "token file is empty".into(),
            });
        }

        debug!(path = %self.token_file.display(), "Retrieved SPIFFE JWT token");
        Ok(SecretString::new(jwt.to_string()))
    }
}
