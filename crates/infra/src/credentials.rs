//! Credential resolution for calendar sources
//!
//! Credentials are declared in configuration under `[credentials.<ref>]` and
//! referenced by sources through `credential_ref`. A reference without a
//! configured entry falls back to the `HOMEBOARD_CREDENTIAL_<REF>` environment
//! variable, read as a bearer token.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use homeboard_core::CredentialStore;
use homeboard_domain::{
    CalendarSource, Config, Credential, CredentialConfig, HomeboardError, Result,
};
use tracing::debug;

const CREDENTIAL_ENV_PREFIX: &str = "HOMEBOARD_CREDENTIAL_";

/// Resolves credentials from configuration and the environment
#[derive(Debug, Clone, Default)]
pub struct ConfigCredentialStore {
    credentials: HashMap<String, CredentialConfig>,
}

impl ConfigCredentialStore {
    pub fn new(credentials: HashMap<String, CredentialConfig>) -> Self {
        Self { credentials }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.credentials.clone())
    }

    fn resolve(&self, reference: &str) -> Result<Credential> {
        if let Some(entry) = self.credentials.get(reference) {
            if entry.is_expired(Utc::now()) {
                return Err(HomeboardError::Auth(format!("credential '{reference}' has expired")));
            }
            return Ok(entry.credential());
        }

        let key = env_key(reference);
        match std::env::var(&key) {
            Ok(token) if !token.trim().is_empty() => {
                debug!(credential_ref = reference, "credential resolved from environment");
                Ok(Credential::Bearer(token.trim().to_string()))
            }
            _ => Err(HomeboardError::Auth(format!(
                "credential '{reference}' is not configured (set {key})"
            ))),
        }
    }
}

/// Environment variable consulted for a credential reference
pub fn env_key(reference: &str) -> String {
    let suffix: String = reference
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("{CREDENTIAL_ENV_PREFIX}{suffix}")
}

#[async_trait]
impl CredentialStore for ConfigCredentialStore {
    async fn credential_for(&self, source: &CalendarSource) -> Result<Option<Credential>> {
        match source.credential_ref.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(reference) => self.resolve(reference).map(Some),
        }
    }
}
