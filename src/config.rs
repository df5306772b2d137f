// src/config.rs

use std::env;
use std::path::PathBuf;

use tracing::info;

use crate::error::AgentError;

pub const DEFAULT_PRINCIPAL: &str = "postgres";
pub const DEFAULT_CREDENTIALS_FILE: &str = "/etc/credentials.properties";
pub const DEFAULT_SERVICE_CA_FILE: &str =
    "/run/secrets/kubernetes.io/serviceaccount/service-ca.crt";
pub const DEFAULT_JWT_TOKEN_FILE: &str = "/run/secrets/spiffe/jwt.token";
pub const DEFAULT_CREDENTIALS_FILE_MODE: u32 = 0o644;
/// Permission and setuid/setgid/sticky bits; anything above is not a mode.
const MAX_FILE_MODE: u32 = 0o7777;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentConfig {
    // 🛡️ SLA Boundary: Vault endpoint & identity binding
    pub vault_url: String,
    pub secret_path: String,
    pub role: String,

    /// Injected into every bundle as `db-username`.
    pub principal: String,

    // 📂 Platform Agnostic Paths
    pub credentials_file: PathBuf,
    pub credentials_file_mode: u32,
    pub service_ca_file: PathBuf,
    pub jwt_token_file: PathBuf,
}

impl AgentConfig {
    /// Reads the process environment once at startup.
    pub fn from_env() -> Result<Self, AgentError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any variable source. Empty values count
    /// as unset, matching how the pod spec renders optional entries.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AgentError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let vault_url = get("VAULT_URL");
        let secret_path = get("VAULT_SECRET_PATH");
        let role = get("VAULT_ROLE");

        // Report every missing variable at once so a broken manifest is fixed in one pass.
        let missing: Vec<&str> = [
            ("VAULT_URL", vault_url.is_none()),
            ("VAULT_SECRET_PATH", secret_path.is_none()),
            ("VAULT_ROLE", role.is_none()),
        ]
        .into_iter()
        .filter_map(|(name, absent)| absent.then_some(name))
        .collect();

        let (Some(vault_url), Some(secret_path), Some(role)) = (vault_url, secret_path, role)
        else {
            return Err(AgentError::configuration(format!(
                "Missing required environment variables: {}",
                missing.join(", ")
            )));
        };

        let credentials_file_mode = match get("CREDENTIALS_FILE_MODE") {
            Some(raw) => u32::from_str_radix(raw.trim_start_matches("0o"), 8)
                .ok()
                .filter(|mode| *mode <= MAX_FILE_MODE)
                .ok_or_else(|| {
                    AgentError::configuration(format!(
                        "CREDENTIALS_FILE_MODE must be an octal file mode up to 7777, got '{}'",
                        raw
                    ))
                })?,
            None => DEFAULT_CREDENTIALS_FILE_MODE,
        };

        Ok(Self {
            vault_url: vault_url.trim_end_matches('/').to_string(),
            secret_path: secret_path.trim_start_matches('/').to_string(),
            role,
            principal: get("DB_USERNAME").unwrap_or_else(|| DEFAULT_PRINCIPAL.to_string()),
            credentials_file: get("CREDENTIALS_FILE")
                .unwrap_or_else(|| DEFAULT_CREDENTIALS_FILE.to_string())
                .into(),
            credentials_file_mode,
            service_ca_file: get("SERVICE_CA_FILE")
                .unwrap_or_else(|| DEFAULT_SERVICE_CA_FILE.to_string())
                .into(),
            jwt_token_file: get("JWT_TOKEN_FILE")
                .unwrap_or_else(|| DEFAULT_JWT_TOKEN_FILE.to_string())
                .into(),
        })
    }

    pub fn log_summary(&self) {
        info!(
            vault_url = %self.vault_url,
            secret_path = %self.secret_path,
            role = %self.role,
            principal = %self.principal,
            credentials_file = %self.credentials_file.display(),
            credentials_file_mode = %format!("{:o}", self.credentials_file_mode),
            service_ca_file = %self.service_ca_file.display(),
            jwt_token_file = %self.jwt_token_file.display(),
            "Initialized Vault credential manager"
        );
    }
}
