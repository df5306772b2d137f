// src/sys/sink.rs

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use std::fs::{self, Permissions};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::info;
use zeroize::Zeroizing;

use crate::error::AgentError;
use crate::sys::secrets::{PASSWORD_FIELD, PRINCIPAL_FIELD, SecretBundle};
use crate::sys::traits::CredentialSink;

pub const USERNAME_PROPERTY: &str = "quarkus.datasource.username";
pub const PASSWORD_PROPERTY: &str = "quarkus.datasource.password";

// ==============================================================================
// 1. Concrete Implementation (Java Properties File)
// ==============================================================================

pub struct PropertiesFileSink {
    path: PathBuf, // Injected via AgentConfig, e.g., "/etc/credentials.properties"
    mode: u32,
}

impl PropertiesFileSink {
    pub fn new(path: PathBuf, mode: u32) -> Self {
        Self { path, mode }
    }

    fn render(bundle: &SecretBundle) -> Result<Zeroizing<String>, AgentError> {
        let username = escape_value(bundle.require(PRINCIPAL_FIELD)?);
        let password = escape_value(bundle.require(PASSWORD_FIELD)?);

        Ok(Zeroizing::new(format!(
            "# Generated credentials from Vault\n\
             # Generated at: {generated_at}\n\
             \n\
             {USERNAME_PROPERTY}={username}\n\
             {PASSWORD_PROPERTY}={password}\n",
            username = username.as_str(),
            password = password.as_str(),
            generated_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
        )))
    }

    /// Writes `content` next to the target and renames it into place, so the
    /// application never reads a truncated file.
    fn replace_file(&self, content: &[u8]) -> Result<(), AgentError> {
        let parent = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };

        fs::create_dir_all(parent).map_err(|e| AgentError::persistence(parent, e))?;

        let mut staged =
            NamedTempFile::new_in(parent).map_err(|e| AgentError::persistence(&self.path, e))?;

        // 🛡️ Mode is applied before any secret byte lands on disk.
        staged
            .as_file()
            .set_permissions(Permissions::from_mode(self.mode))
            .map_err(|e| AgentError::persistence(&self.path, e))?;
        staged
            .write_all(content)
            .map_err(|e| AgentError::persistence(&self.path, e))?;
        staged
            .as_file()
            .sync_all()
            .map_err(|e| AgentError::persistence(&self.path, e))?;

        // A failed persist drops the staged file, which removes it.
        staged
            .persist(&self.path)
            .map_err(|e| AgentError::persistence(&self.path, e.error))?;

        Ok(())
    }
}

/// Escapes a value for `java.util.Properties`, so that whatever Vault stores
/// reads back as exactly one property with exactly that value.
fn escape_value(raw: &str) -> Zeroizing<String> {
    let mut escaped = Zeroizing::new(String::with_capacity(raw.len()));
    for (i, c) in raw.chars().enumerate() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            '\u{000C}' => escaped.push_str("\\f"),
            // Leading whitespace would otherwise be swallowed by the loader.
            ' ' if i == 0 => escaped.push_str("\\ "),
            c if c.is_control() => escaped.push_str(&format!("\\u{:04X}", c as u32)),
            c => escaped.push(c),
        }
    }
    escaped
}

#[async_trait]
impl CredentialSink for PropertiesFileSink {
    async fn write_bundle(&self, bundle: &SecretBundle) -> Result<(), AgentError> {
        let content = Self::render(bundle)?;

        // Synchronous std::fs on purpose: the rendered plaintext never crosses an
        // `.await`, so it is not parked inside the task's state machine.
        self.replace_file(content.as_bytes())?;

        info!(path = %self.path.display(), "Credentials written");
        Ok(())
    }
}
