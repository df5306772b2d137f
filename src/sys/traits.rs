use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::Value;

use crate::error::AgentError;
use crate::sys::secrets::{Credential, LeaseGrant, SecretBundle};

// ==============================================================================
// 1. Workload Identity (SPIFFE JWT-SVID)
// ==============================================================================

#[async_trait]
pub trait IdentitySource: Send + Sync {
    /// Returns the bearer JWT proving who this workload is.
    /// 🛡️ Zero-Trust: handed out inside a `SecretString` so it is scrubbed
    /// as soon as the login request has been built.
    async fn fetch_identity(&self) -> Result<SecretString, AgentError>;
}

// ==============================================================================
// 2. Secret Store (Vault HTTP API)
// ==============================================================================

#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Exchanges an identity JWT for a client token under `role`.
    async fn login(&self, role: &str, jwt: &SecretString) -> Result<LeaseGrant, AgentError>;

    /// Extends the lease of the credential's token, returning the new lease
    /// duration in seconds.
    async fn renew_self(&self, credential: &Credential) -> Result<u64, AgentError>;

    /// Reads the raw JSON document stored at `path`.
    async fn read_secret(&self, credential: &Credential, path: &str) -> Result<Value, AgentError>;
}

// ==============================================================================
// 3. Credential Sink (Consumer-Facing File)
// ==============================================================================

#[async_trait]
pub trait CredentialSink: Send + Sync {
    async fn write_bundle(&self, bundle: &SecretBundle) -> Result<(), AgentError>;
}
