//! Azure credentials and the process-wide credential cache
//!
//! A [`CredentialCache`] is created once by the controller and injected into
//! every scope. Scopes look up the credential for their identity and only
//! build a new one when none is cached.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use capz_common::retry::{retry_with_backoff, RetryConfig};
use capz_common::{AzureError, Error, Result, DEFAULT_REQUEUE_AFTER};

use crate::cloud::CloudEnvironment;

/// Tokens this close to expiry are refreshed before use
const EXPIRY_SKEW_SECS: i64 = 300;

/// Bearer token for Azure Resource Manager
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessToken {
    /// The token value
    pub token: String,
    /// When the token expires
    pub expires_on: DateTime<Utc>,
}

impl AccessToken {
    /// Whether the token is still usable at `now`
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_on - chrono::Duration::seconds(EXPIRY_SKEW_SECS) > now
    }
}

/// Source of bearer tokens
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TokenCredential: Send + Sync {
    /// A token valid for `scope`
    async fn get_token(&self, scope: &str) -> Result<AccessToken>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: String,
}

/// OAuth2 client-credentials flow against Entra ID
pub struct ClientSecretCredential {
    http: reqwest::Client,
    authority_host: String,
    tenant_id: String,
    client_id: String,
    client_secret: String,
    retry: RetryConfig,
    tokens: RwLock<HashMap<String, AccessToken>>,
}

impl ClientSecretCredential {
    /// Create a credential for a service principal in the given cloud
    pub fn new(
        cloud: &CloudEnvironment,
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            authority_host: cloud.authority_host.to_string(),
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            retry: RetryConfig::default(),
            tokens: RwLock::new(HashMap::new()),
        }
    }

    /// Override the backoff used when the token endpoint fails
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn token_url(&self) -> String {
        format!("{}/{}/oauth2/v2.0/token", self.authority_host, self.tenant_id)
    }

    async fn request_token(&self, scope: &str) -> Result<AccessToken> {
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", scope),
        ];
        let resp = self
            .http
            .post(self.token_url())
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                Error::transient(format!("token request failed: {e}"), DEFAULT_REQUEUE_AFTER)
            })?;

        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(|e| {
            Error::transient(format!("reading token response failed: {e}"), DEFAULT_REQUEUE_AFTER)
        })?;

        if !(200..300).contains(&status) {
            let (code, message) = match serde_json::from_str::<TokenErrorResponse>(&body) {
                Ok(e) => (e.error, e.error_description),
                Err(_) => ("TokenRequestFailed".to_string(), body),
            };
            return Err(AzureError::new(status, code, message).into());
        }

        parse_token_response(&body, Utc::now())
    }
}

fn parse_token_response(body: &str, now: DateTime<Utc>) -> Result<AccessToken> {
    let parsed: TokenResponse = serde_json::from_str(body)
        .map_err(|e| Error::serialization_for_kind("TokenResponse", e.to_string()))?;
    Ok(AccessToken {
        token: parsed.access_token,
        expires_on: now + chrono::Duration::seconds(parsed.expires_in),
    })
}

#[async_trait]
impl TokenCredential for ClientSecretCredential {
    async fn get_token(&self, scope: &str) -> Result<AccessToken> {
        if let Some(token) = self.tokens.read().get(scope) {
            if token.is_fresh(Utc::now()) {
                return Ok(token.clone());
            }
        }

        let token = retry_with_backoff(
            &self.retry,
            "acquire_token",
            |e: &Error| e.is_transient(),
            || self.request_token(scope),
        )
        .await?;

        debug!(client_id = %self.client_id, expires_on = %token.expires_on, "acquired Azure token");
        self.tokens.write().insert(scope.to_string(), token.clone());
        Ok(token)
    }
}

/// Identity a cached credential belongs to
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CredentialKey {
    /// Namespace of the identity object
    pub namespace: String,
    /// Name of the identity object
    pub name: String,
    /// Tenant of the service principal
    pub tenant_id: String,
    /// Client ID of the service principal
    pub client_id: String,
}

/// Process-wide cache of credentials keyed by identity
///
/// Read-mostly; the first caller for a key builds and stores the
/// credential, concurrent callers for the same key wait on the entry.
#[derive(Default)]
pub struct CredentialCache {
    entries: DashMap<CredentialKey, Arc<dyn TokenCredential>>,
}

impl CredentialCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached credential for `key`, building it with `build` if absent
    pub fn get_or_store<F>(&self, key: CredentialKey, build: F) -> Result<Arc<dyn TokenCredential>>
    where
        F: FnOnce() -> Result<Arc<dyn TokenCredential>>,
    {
        if let Some(existing) = self.entries.get(&key) {
            return Ok(existing.value().clone());
        }

        match self.entries.entry(key) {
            Entry::Occupied(e) => Ok(e.get().clone()),
            Entry::Vacant(e) => {
                info!(identity = %e.key().name, namespace = %e.key().namespace, "caching Azure credential");
                let credential = build()?;
                e.insert(credential.clone());
                Ok(credential)
            }
        }
    }

    /// Drop a cached credential, e.g. after its secret rotated
    pub fn evict(&self, key: &CredentialKey) {
        self.entries.remove(key);
    }

    /// Number of cached credentials
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A fixed token, for tests and local runs against a proxy
pub struct StaticTokenCredential {
    token: String,
}

impl StaticTokenCredential {
    /// A credential that always returns `token`
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenCredential for StaticTokenCredential {
    async fn get_token(&self, _scope: &str) -> Result<AccessToken> {
        Ok(AccessToken {
            token: self.token.clone(),
            expires_on: Utc::now() + chrono::Duration::hours(1),
        })
    }
}
