// src/sys/secrets.rs

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use zeroize::Zeroizing;

use crate::error::AgentError;

/// Field the manager injects into every bundle with the configured principal.
pub const PRINCIPAL_FIELD: &str = "db-username";
/// Field carrying the database password in the Vault secret.
pub const PASSWORD_FIELD: &str = "db-password";

/// A Vault client token together with the lease it was issued under.
///
/// The token lives inside a `SecretString`: it cannot be accidentally logged
/// (`Debug` prints `[REDACTED]`) and its heap buffer is zeroized on drop.
pub struct Credential {
    token: SecretString,
    lease_duration_secs: u64,
    issued_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(token: SecretString, lease_duration_secs: u64, issued_at: DateTime<Utc>) -> Self {
        Self {
            token,
            lease_duration_secs,
            issued_at,
        }
    }

    /// Lends the plaintext token to `action` for the duration of the call.
    pub fn use_token<F, R>(&self, action: F) -> R
    where
        F: FnOnce(&str) -> R,
    {
        // 🛡️ The borrow handed to `action` cannot outlive this call, so the
        // plaintext never escapes into a longer-lived binding.
        action(self.token.expose_secret())
    }

    pub fn lease_duration_secs(&self) -> u64 {
        self.lease_duration_secs
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    /// Applies a successful renew-self: the token is unchanged, the lease clock restarts.
    pub fn renewed(&mut self, lease_duration_secs: u64, now: DateTime<Utc>) {
        self.lease_duration_secs = lease_duration_secs;
        self.issued_at = now;
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"[REDACTED]")
            .field("lease_duration_secs", &self.lease_duration_secs)
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

/// Token and lease returned by a login.
#[derive(Debug)]
pub struct LeaseGrant {
    pub token: SecretString,
    pub lease_duration_secs: u64,
}

/// The key/value payload of one retrieval cycle.
///
/// Values are wrapped in `Zeroizing` so the plaintext is scrubbed when the
/// bundle is dropped after the sink write.
#[derive(Default)]
pub struct SecretBundle {
    fields: BTreeMap<String, Zeroizing<String>>,
}

impl SecretBundle {
    /// Pulls the KV v2 payload out of a read response (`data.data`) and
    /// stamps the principal field on top of it.
    pub fn extract(response: &Value, principal: &str) -> Result<Self, AgentError> {
        let payload = match response.get("data").and_then(|d| d.get("data")) {
            None | Some(Value::Null) => return Err(AgentError::EmptyCredentialSet),
            Some(Value::Object(map)) => map,
            Some(other) => {
                return Err(AgentError::malformed(format!(
                    "expected an object at data.data, found {}",
                    json_kind(other)
                )));
            }
        };

        if payload.is_empty() {
            return Err(AgentError::EmptyCredentialSet);
        }

        let mut bundle = Self::default();
        for (key, value) in payload {
            let rendered = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            bundle.insert(key.clone(), rendered);
        }
        bundle.insert(PRINCIPAL_FIELD, principal);

        Ok(bundle)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(key.into(), Zeroizing::new(value.into()));
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(|v| v.as_str())
    }

    /// Like [`get`](Self::get) but for fields the sink cannot do without.
    pub fn require(&self, key: &str) -> Result<&str, AgentError> {
        self.get(key)
            .ok_or_else(|| AgentError::IncompleteCredentialSet(key.to_string()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

impl fmt::Debug for SecretBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.fields.keys().map(|k| (k, "[REDACTED]")))
            .finish()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
