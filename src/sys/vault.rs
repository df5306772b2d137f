// src/sys/vault.rs

use async_trait::async_trait;
use bon::Builder;
use reqwest::header::HeaderValue;
use reqwest::{Certificate, Client, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::AgentError;
use crate::sys::secrets::{Credential, LeaseGrant};
use crate::sys::traits::SecretStore;

/// Per-request budget for every Vault call.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const VAULT_TOKEN_HEADER: &str = "X-Vault-Token";

// ==============================================================================
// 1. TLS Trust Anchor
// ==============================================================================

/// Builds the shared HTTP client, trusting the cluster service CA when it is
/// mounted and falling back to the platform roots otherwise.
pub fn build_http_client(service_ca_file: &Path) -> Result<Client, AgentError> {
    let mut builder = Client::builder().timeout(REQUEST_TIMEOUT);

    if service_ca_file.exists() {
        let pem = std::fs::read(service_ca_file).map_err(|e| {
            AgentError::configuration(format!(
                "Failed to read service CA file {}: {}",
                service_ca_file.display(),
                e
            ))
        })?;
        let anchors = Certificate::from_pem_bundle(&pem).map_err(|e| {
            AgentError::configuration(format!(
                "Service CA file {} is not a valid PEM bundle: {}",
                service_ca_file.display(),
                e
            ))
        })?;
        if anchors.is_empty() {
            return Err(AgentError::configuration(format!(
                "Service CA file {} contains no certificates",
                service_ca_file.display()
            )));
        }

        info!(path = %service_ca_file.display(), certificates = anchors.len(), "Using service CA bundle");
        for anchor in anchors {
            builder = builder.add_root_certificate(anchor);
        }
    } else {
        warn!(
            path = %service_ca_file.display(),
            "Service CA file not found, using default trust roots"
        );
    }

    builder
        .build()
        .map_err(|e| AgentError::configuration(format!("Failed to build HTTP client: {}", e)))
}

// ==============================================================================
// 2. Concrete Implementation (Vault HTTP API)
// ==============================================================================

#[derive(Builder)]
pub struct VaultHttpStore {
    http_client: Client,
    /// Base URL without a trailing slash, e.g. "https://vault.vault.svc:8200".
    #[builder(into)]
    vault_url: String,
}

impl VaultHttpStore {
    fn endpoint(&self, path: &str) -> String {
        format!("{}/v1/{}", self.vault_url, path.trim_start_matches('/'))
    }
}

/// Builds the `X-Vault-Token` header value for `credential`.
fn token_header(credential: &Credential) -> Result<HeaderValue, AgentError> {
    let mut value = credential
        .use_token(HeaderValue::from_str)
        .map_err(|_| AgentError::malformed("Vault token is not a valid HTTP header value"))?;
    // 🛡️ Sensitive values are redacted from the HTTP stack's own Debug output.
    value.set_sensitive(true);
    Ok(value)
}

#[async_trait]
impl SecretStore for VaultHttpStore {
    async fn login(&self, role: &str, jwt: &SecretString) -> Result<LeaseGrant, AgentError> {
        let request = JwtLoginRequest {
            role,
            jwt: jwt.expose_secret(),
        };

        debug!(role, "Authenticating with Vault");
        let response = self
            .http_client
            .post(self.endpoint("auth/jwt/login"))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = log_failure(response, "Vault authentication failed").await;
            return Err(AgentError::AuthenticationFailed { status });
        }

        let login: AuthEnvelope<LoginAuth> = parse_json(response, "JWT login").await?;
        Ok(LeaseGrant {
            token: SecretString::new(login.auth.client_token),
            lease_duration_secs: login.auth.lease_duration,
        })
    }

    async fn renew_self(&self, credential: &Credential) -> Result<u64, AgentError> {
        debug!("Attempting to renew Vault token");
        let response = self
            .http_client
            .post(self.endpoint("auth/token/renew-self"))
            .header(VAULT_TOKEN_HEADER, token_header(credential)?)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AgentError::RenewalFailed {
                status: status.as_u16(),
            });
        }

        let renewal: AuthEnvelope<RenewAuth> = parse_json(response, "token renewal").await?;
        Ok(renewal.auth.lease_duration)
    }

    async fn read_secret(&self, credential: &Credential, path: &str) -> Result<Value, AgentError> {
        debug!(path, "Retrieving secret from Vault");
        let response = self
            .http_client
            .get(self.endpoint(path))
            .header(VAULT_TOKEN_HEADER, token_header(credential)?)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = log_failure(response, "Failed to retrieve secret").await;
            return Err(AgentError::SecretRetrievalFailed { status });
        }

        parse_json(response, "secret read").await
    }
}

/// Logs the status and Vault's error body, then returns the status code.
async fn log_failure(response: Response, context: &str) -> u16 {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    error!(status, body = %body.trim(), "{}", context);
    status
}

async fn parse_json<T: DeserializeOwned>(response: Response, context: &str) -> Result<T, AgentError> {
    let body = response.bytes().await?;
    if body.is_empty() {
        return Err(AgentError::malformed(format!("{} response has an empty body", context)));
    }
    serde_json::from_slice(&body)
        .map_err(|e| AgentError::malformed(format!("Failed to parse {} response: {}", context, e)))
}

// ==============================================================================
// 3. Wire Types
// ==============================================================================

#[derive(Serialize)]
struct JwtLoginRequest<'a> {
    role: &'a str,
    jwt: &'a str,
}

#[derive(Deserialize)]
struct AuthEnvelope<T> {
    auth: T,
}

#[derive(Deserialize)]
struct LoginAuth {
    client_token: String,
    lease_duration: u64,
}

#[derive(Deserialize)]
struct RenewAuth {
    lease_duration: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store(server: &MockServer) -> VaultHttpStore {
        VaultHttpStore::builder()
            .http_client(Client::new())
            .vault_url(server.uri())
            .build()
    }

    fn secret(value: &str) -> SecretString {
        SecretString::new(value.to_string())
    }

    fn credential(token: &str) -> Credential {
        Credential::new(secret(token), 100, chrono::Utc::now())
    }

    #[tokio::test]
    async fn login_posts_role_and_jwt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/auth/jwt/login"))
            .and(body_json(json!({"role": "qtodo", "jwt": "svid.jwt"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "auth": {"client_token": "hvs.T1", "lease_duration": 100, "renewable": true}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let grant = store(&server)
            .login("qtodo", &secret("svid.jwt"))
            .await
            .unwrap();

        assert_eq!(grant.token.expose_secret(), "hvs.T1");
        assert_eq!(grant.lease_duration_secs, 100);
    }

    #[tokio::test]
    async fn login_rejection_carries_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/auth/jwt/login"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({"errors": ["permission denied"]})))
            .mount(&server)
            .await;

        let err = store(&server)
            .login("qtodo", &secret("svid.jwt"))
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::AuthenticationFailed { status: 403 }));
    }

    #[tokio::test]
    async fn login_with_unexpected_body_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/auth/jwt/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"auth": null})))
            .mount(&server)
            .await;

        let err = store(&server)
            .login("qtodo", &secret("svid.jwt"))
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn read_secret_sends_token_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/secret/data/qtodo/db"))
            .and(header("X-Vault-Token", "hvs.T1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"data": {"db-password": "x"}, "metadata": {"version": 3}}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let doc = store(&server)
            .read_secret(&credential("hvs.T1"), "secret/data/qtodo/db")
            .await
            .unwrap();

        assert_eq!(doc["data"]["data"]["db-password"], "x");
    }

    #[tokio::test]
    async fn read_secret_failure_carries_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/secret/data/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"errors": []})))
            .mount(&server)
            .await;

        let err = store(&server)
            .read_secret(&credential("hvs.T1"), "secret/data/missing")
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::SecretRetrievalFailed { status: 404 }));
    }

    #[tokio::test]
    async fn renew_self_returns_new_lease() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/auth/token/renew-self"))
            .and(header("X-Vault-Token", "hvs.T1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "auth": {"client_token": "hvs.T1", "lease_duration": 3600}
            })))
            .mount(&server)
            .await;

        let lease = store(&server).renew_self(&credential("hvs.T1")).await.unwrap();
        assert_eq!(lease, 3600);
    }

    #[tokio::test]
    async fn renew_self_rejection_is_renewal_failed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/auth/token/renew-self"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let err = store(&server).renew_self(&credential("hvs.T1")).await.unwrap_err();
        assert!(matches!(err, AgentError::RenewalFailed { status: 403 }));
    }

    #[tokio::test]
    async fn unreachable_vault_is_network_error() {
        // Reserve a free port, then release it so nothing is listening there.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let store = VaultHttpStore::builder()
            .http_client(Client::new())
            .vault_url(format!("http://{}", addr))
            .build();

        let err = store.renew_self(&credential("hvs.T1")).await.unwrap_err();
        assert!(matches!(err, AgentError::Network(_)), "{err:?}");
    }

    #[tokio::test]
    async fn token_with_control_characters_is_rejected_before_sending() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = store(&server)
            .read_secret(&credential("hvs.T1\nX-Injected: 1"), "secret/data/qtodo/db")
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::MalformedResponse(_)));
    }

    #[test]
    fn token_header_is_marked_sensitive() {
        let value = token_header(&credential("hvs.T1")).unwrap();
        assert!(value.is_sensitive());
        assert_eq!(value.to_str().unwrap(), "hvs.T1");
    }

    #[test]
    fn missing_service_ca_falls_back_to_default_roots() {
        let dir = tempfile::tempdir().unwrap();
        assert!(build_http_client(&dir.path().join("service-ca.crt")).is_ok());
    }

    #[test]
    fn garbage_service_ca_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let ca = dir.path().join("service-ca.crt");
        std::fs::write(&ca, "this is not a certificate\n").unwrap();

        let err = build_http_client(&ca).unwrap_err();
        assert!(matches!(err, AgentError::ConfigurationInvalid(_)));
    }
}
