// src/manager.rs

use reqwest::Client;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::sys::clock::{Clock, system_clock};
use crate::sys::identity::FileIdentitySource;
use crate::sys::scheduler::{FAILURE_BACKOFF, refresh_interval, renewal_due};
use crate::sys::secrets::{Credential, SecretBundle};
use crate::sys::sink::PropertiesFileSink;
use crate::sys::traits::{CredentialSink, IdentitySource, SecretStore};
use crate::sys::vault::VaultHttpStore;

/// Where the lease currently stands, as seen between cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    Unauthenticated,
    Authenticated,
    RenewalDue,
}

/// Owns the Vault token lease and drives the fetch/renew/persist cycle.
///
/// Single owner, single task: the credential is only ever touched through
/// `&mut self`, so no locking is involved.
pub struct LeaseManager {
    config: AgentConfig,
    identity: Box<dyn IdentitySource>,
    store: Box<dyn SecretStore>,
    sink: Box<dyn CredentialSink>,
    clock: Arc<dyn Clock>,
    credential: Option<Credential>,
}

impl LeaseManager {
    pub fn new(config: AgentConfig, http_client: Client) -> Self {
        Self::from_parts(
            Box::new(FileIdentitySource::new(config.jwt_token_file.clone())),
            Box::new(
                VaultHttpStore::builder()
                    .http_client(http_client)
                    .vault_url(config.vault_url.clone())
                    .build(),
            ),
            Box::new(PropertiesFileSink::new(
                config.credentials_file.clone(),
                config.credentials_file_mode,
            )),
            system_clock(),
            config,
        )
    }

    pub fn from_parts(
        identity: Box<dyn IdentitySource>,
        store: Box<dyn SecretStore>,
        sink: Box<dyn CredentialSink>,
        clock: Arc<dyn Clock>,
        config: AgentConfig,
    ) -> Self {
        Self {
            config,
            identity,
            store,
            sink,
            clock,
            credential: None,
        }
    }

    pub fn state(&self) -> LeaseState {
        match &self.credential {
            None => LeaseState::Unauthenticated,
            Some(credential) if renewal_due(Some(credential), self.clock.now()) => {
                LeaseState::RenewalDue
            }
            Some(_) => LeaseState::Authenticated,
        }
    }

    // ==============================================================================
    // 1. Lease Lifecycle
    // ==============================================================================

    /// Logs in with a freshly read JWT-SVID and returns the new credential.
    ///
    /// Always a full login: any token held by the caller is superseded.
    pub async fn authenticate(&self) -> Result<Credential, AgentError> {
        // 🛡️ The SVID is re-read for every login and dropped (zeroized) as soon
        // as the request is built, so a rotated identity is always honored.
        let jwt = self.identity.fetch_identity().await?;
        let grant = self.store.login(&self.config.role, &jwt).await?;

        info!(
            lease_duration_secs = grant.lease_duration_secs,
            "Successfully authenticated with Vault"
        );
        Ok(Credential::new(
            grant.token,
            grant.lease_duration_secs,
            self.clock.now(),
        ))
    }

    /// Hands out a usable credential for this cycle, renewing at half-life
    /// and falling back to a full login when renewal is refused.
    ///
    /// The credential is moved out of `self` for the duration of the cycle;
    /// any failure here leaves the manager unauthenticated.
    async fn acquire_lease(&mut self) -> Result<Credential, AgentError> {
        match (self.state(), self.credential.take()) {
            (LeaseState::Authenticated, Some(credential)) => Ok(credential),
            (LeaseState::RenewalDue, Some(credential)) => {
                self.renew_or_authenticate(credential).await
            }
            _ => self.authenticate().await,
        }
    }

    async fn renew_or_authenticate(
        &self,
        mut credential: Credential,
    ) -> Result<Credential, AgentError> {
        match self.store.renew_self(&credential).await {
            Ok(lease_duration_secs) => {
                credential.renewed(lease_duration_secs, self.clock.now());
                info!(lease_duration_secs, "Token renewed successfully");
                Ok(credential)
            }
            Err(e) => {
                // 🛡️ A token Vault refused to renew is never presented again.
                drop(credential);
                warn!(error = %e, "Token renewal failed. Re-authenticating...");
                self.authenticate().await
            }
        }
    }

    // ==============================================================================
    // 2. Retrieval & Persistence
    // ==============================================================================

    async fn fetch_bundle(&self, credential: &Credential) -> Result<SecretBundle, AgentError> {
        let response = self
            .store
            .read_secret(credential, &self.config.secret_path)
            .await?;
        let bundle = SecretBundle::extract(&response, &self.config.principal)?;

        debug!(
            count = bundle.len(),
            fields = ?bundle.keys().collect::<Vec<_>>(),
            "Extracted credentials"
        );
        Ok(bundle)
    }

    async fn deliver(&self, credential: &Credential) -> Result<(), AgentError> {
        let bundle = self.fetch_bundle(credential).await?;
        self.sink.write_bundle(&bundle).await
    }

    /// One watch-mode cycle. Returns how long to wait before the next one.
    pub async fn run_cycle(&mut self) -> Result<Duration, AgentError> {
        let credential = self.acquire_lease().await?;
        let next = refresh_interval(credential.lease_duration_secs());

        let outcome = self.deliver(&credential).await;
        // A failed read or write does not invalidate the token.
        self.credential = Some(credential);

        outcome.map(|()| next)
    }

    // ==============================================================================
    // 3. Execution Modes
    // ==============================================================================

    /// `--init`: login, fetch, write, done. Errors are returned, never retried.
    pub async fn run_once(&self) -> Result<(), AgentError> {
        let credential = self.authenticate().await?;
        self.deliver(&credential).await?;

        info!("Initialization complete");
        Ok(())
    }

    /// `--key`: login and fetch a single field without touching the sink.
    pub async fn lookup_key(&self, key: &str) -> Result<String, AgentError> {
        let credential = self.authenticate().await?;
        let bundle = self.fetch_bundle(&credential).await?;

        bundle
            .get(key)
            .map(str::to_string)
            .ok_or_else(|| AgentError::KeyNotFound(key.to_string()))
    }

    /// Runs cycles until `shutdown` resolves. Cycle errors never escape: they
    /// are logged and retried after [`FAILURE_BACKOFF`].
    pub async fn watch<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!("Starting Vault credential manager");

        loop {
            let pause = match self.run_cycle().await {
                Ok(next) => {
                    info!(seconds = next.as_secs(), "Sleeping before next check");
                    next
                }
                Err(e) => {
                    error!(
                        error = %e,
                        retry_in_secs = FAILURE_BACKOFF.as_secs(),
                        "Error in main loop, retrying"
                    );
                    FAILURE_BACKOFF
                }
            };

            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Received interrupt signal, shutting down...");
                    return;
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }
}
