//! Credential provider
//!
//! Produces bearer tokens for the two downstream services. The strategy is chosen
//! once from configuration:
//! - `interactive`: device-code login in the terminal
//! - `client_secret`: service principal client-credentials grant
//! - `default`: environment service principal, then managed identity, then Azure CLI
//!
//! Every strategy is wrapped in a [`CachedCredential`], which reuses tokens until
//! shortly before they expire and serializes refreshes.

pub mod azure_cli;
pub mod chain;
pub mod client_secret;
pub mod device_code;
pub mod managed_identity;

use crate::config::{AuthConfig, AuthKind};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub use azure_cli::AzureCliCredential;
pub use chain::ChainedCredential;
pub use client_secret::ClientSecretCredential;
pub use device_code::DeviceCodeCredential;
pub use managed_identity::ManagedIdentityCredential;

/// Scope for the Security Copilot API
pub const SECURITY_COPILOT_SCOPE: &str = "https://api.securitycopilot.microsoft.com/.default";

/// Scope for the Log Analytics query API
pub const LOG_ANALYTICS_SCOPE: &str = "https://api.loganalytics.io/.default";

/// Tokens closer than this to expiry are refreshed before use
pub const REFRESH_SKEW_SECS: i64 = 300;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Missing configuration: {0}")]
    MissingConfig(String),

    #[error("Token request failed: {0}")]
    RequestFailed(String),

    #[error("Token endpoint rejected the request ({error}): {description}")]
    Rejected { error: String, description: String },

    #[error("Credential unavailable: {0}")]
    Unavailable(String),

    #[error("No credential in the chain produced a token: {0}")]
    ChainExhausted(String),
}

pub type Result<T> = std::result::Result<T, AuthError>;

/// Bearer token and its expiry
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_on: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, expires_on: DateTime<Utc>) -> Self {
        AccessToken {
            token: token.into(),
            expires_on,
        }
    }

    pub fn expires_in(token: impl Into<String>, seconds: i64) -> Self {
        AccessToken::new(token, Utc::now() + Duration::seconds(seconds))
    }

    /// True when the token expires within `skew` from now
    pub fn expires_within(&self, skew: Duration) -> bool {
        self.expires_on - skew <= Utc::now()
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

/// Source of bearer tokens
#[async_trait]
pub trait TokenCredential: Send + Sync {
    /// Acquire a token for `scope` (an audience followed by `/.default`)
    async fn get_token(&self, scope: &str) -> Result<AccessToken>;

    /// Short name used in logs and chained error messages
    fn name(&self) -> &'static str;
}

/// Per-scope token cache in front of another credential
pub struct CachedCredential {
    inner: Arc<dyn TokenCredential>,
    tokens: Mutex<HashMap<String, AccessToken>>,
    refresh_skew: Duration,
}

impl CachedCredential {
    pub fn new(inner: Arc<dyn TokenCredential>) -> Self {
        Self::with_refresh_skew(inner, Duration::seconds(REFRESH_SKEW_SECS))
    }

    pub fn with_refresh_skew(inner: Arc<dyn TokenCredential>, refresh_skew: Duration) -> Self {
        CachedCredential {
            inner,
            tokens: Mutex::new(HashMap::new()),
            refresh_skew,
        }
    }
}

#[async_trait]
impl TokenCredential for CachedCredential {
    async fn get_token(&self, scope: &str) -> Result<AccessToken> {
        // Held across the refresh so concurrent callers wait for one fetch
        let mut tokens = self.tokens.lock().await;

        if let Some(token) = tokens.get(scope) {
            if !token.expires_within(self.refresh_skew) {
                return Ok(token.clone());
            }
            debug!("Cached token for {} is about to expire, refreshing", scope);
        }

        let token = self.inner.get_token(scope).await?;
        debug!(
            "Obtained token for {} via {} (expires {})",
            scope,
            self.inner.name(),
            token.expires_on
        );
        tokens.insert(scope.to_string(), token.clone());
        Ok(token)
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

/// Stands in for a strategy whose settings are incomplete; every request fails
pub struct MisconfiguredCredential {
    reason: String,
}

impl MisconfiguredCredential {
    pub fn new(reason: impl Into<String>) -> Self {
        MisconfiguredCredential {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl TokenCredential for MisconfiguredCredential {
    async fn get_token(&self, _scope: &str) -> Result<AccessToken> {
        Err(AuthError::MissingConfig(self.reason.clone()))
    }

    fn name(&self) -> &'static str {
        "misconfigured"
    }
}

/// Build the configured credential strategy, wrapped in a cache.
///
/// Incomplete settings do not fail here; the returned credential reports
/// `MissingConfig` on each token request instead.
pub fn build_credential(config: &AuthConfig, http: reqwest::Client) -> Arc<dyn TokenCredential> {
    info!("Authenticating using {}", config.kind);

    let inner: Arc<dyn TokenCredential> = match config.kind {
        AuthKind::ClientSecret => match (
            config.tenant_id.as_deref(),
            config.client_id.as_deref(),
            config.client_secret.as_deref(),
        ) {
            (Some(tenant_id), Some(client_id), Some(client_secret)) => {
                Arc::new(ClientSecretCredential::new(
                    http,
                    config.authority_host(),
                    tenant_id,
                    client_id,
                    client_secret,
                ))
            }
            _ => {
                warn!("client_secret authentication is missing tenant, client id or secret");
                Arc::new(MisconfiguredCredential::new(
                    "client_secret authentication requires AZURE_TENANT_ID, AZURE_CLIENT_ID and AZURE_CLIENT_SECRET",
                ))
            }
        },
        AuthKind::Interactive => Arc::new(DeviceCodeCredential::new(
            http,
            config.authority_host(),
            config.tenant_id.as_deref(),
            config.client_id.as_deref(),
        )),
        AuthKind::Default => Arc::new(ChainedCredential::default_chain(config, http)),
    };

    Arc::new(CachedCredential::new(inner))
}

/// Successful OAuth2 token endpoint response
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default, deserialize_with = "deserialize_seconds")]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl TokenResponse {
    pub fn into_access_token(self) -> AccessToken {
        AccessToken::expires_in(self.access_token, self.expires_in.unwrap_or(3600))
    }
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: String,
}

/// POST a form to an OAuth2 token endpoint
pub(crate) async fn request_token(
    http: &reqwest::Client,
    url: &str,
    form: &[(&str, &str)],
) -> Result<TokenResponse> {
    let response = http
        .post(url)
        .form(form)
        .send()
        .await
        .map_err(|e| AuthError::RequestFailed(format!("{}: {}", url, e)))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| AuthError::RequestFailed(e.to_string()))?;

    if !status.is_success() {
        return Err(match serde_json::from_str::<TokenErrorResponse>(&body) {
            Ok(err) => AuthError::Rejected {
                error: err.error,
                description: err.error_description,
            },
            Err(_) => AuthError::RequestFailed(format!("HTTP {}: {}", status, body)),
        });
    }

    serde_json::from_str(&body)
        .map_err(|e| AuthError::RequestFailed(format!("Invalid token response: {}", e)))
}

/// Accept both `3599` and `"3599"`; identity endpoints disagree on the type
pub(crate) fn deserialize_seconds<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Int(i64),
        Text(String),
    }

    match Option::<Seconds>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Seconds::Int(n)) => Ok(Some(n)),
        Some(Seconds::Text(s)) => s
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

/// Strip `/.default` to get the v1 resource identifier
pub(crate) fn scope_to_resource(scope: &str) -> &str {
    scope.strip_suffix("/.default").unwrap_or(scope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingCredential {
        calls: AtomicUsize,
        lifetime_secs: i64,
    }

    #[async_trait]
    impl TokenCredential for CountingCredential {
        async fn get_token(&self, scope: &str) -> Result<AccessToken> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(AccessToken::expires_in(
                format!("{}-{}", scope, n),
                self.lifetime_secs,
            ))
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    #[tokio::test]
    async fn test_cache_reuses_fresh_tokens_per_scope() {
        let inner = Arc::new(CountingCredential {
            calls: AtomicUsize::new(0),
            lifetime_secs: 3600,
        });
        let cached = CachedCredential::new(inner.clone());

        let first = cached.get_token(SECURITY_COPILOT_SCOPE).await.unwrap();
        let second = cached.get_token(SECURITY_COPILOT_SCOPE).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);

        cached.get_token(LOG_ANALYTICS_SCOPE).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cache_refreshes_expiring_tokens() {
        let inner = Arc::new(CountingCredential {
            calls: AtomicUsize::new(0),
            lifetime_secs: 60,
        });
        let cached = CachedCredential::new(inner.clone());

        let first = cached.get_token(SECURITY_COPILOT_SCOPE).await.unwrap();
        let second = cached.get_token(SECURITY_COPILOT_SCOPE).await.unwrap();
        assert_ne!(first.token, second.token);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_token_debug_is_redacted() {
        let token = AccessToken::expires_in("super-secret", 3600);
        let debug = format!("{:?}", token);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[tokio::test]
    async fn test_incomplete_client_secret_fails_per_request() {
        let config = AuthConfig {
            kind: AuthKind::ClientSecret,
            tenant_id: Some("tenant".into()),
            ..Default::default()
        };
        let credential = build_credential(&config, reqwest::Client::new());

        for _ in 0..2 {
            let err = credential.get_token(SECURITY_COPILOT_SCOPE).await.unwrap_err();
            assert!(matches!(err, AuthError::MissingConfig(_)));
        }
    }

    struct SlowCredential {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TokenCredential for SlowCredential {
        async fn get_token(&self, scope: &str) -> Result<AccessToken> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            Ok(AccessToken::expires_in(scope, 3600))
        }

        fn name(&self) -> &'static str {
            "slow"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_fetch() {
        let inner = Arc::new(SlowCredential {
            calls: AtomicUsize::new(0),
        });
        let cached = Arc::new(CachedCredential::new(inner.clone()));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let cached = cached.clone();
            tasks.spawn(async move { cached.get_token(SECURITY_COPILOT_SCOPE).await });
        }

        while let Some(joined) = tasks.join_next().await {
            let token = joined.unwrap().unwrap();
            assert_eq!(token.token, SECURITY_COPILOT_SCOPE);
        }
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_seconds_accepts_strings_and_numbers() {
        let a: TokenResponse =
            serde_json::from_str(r#"{"access_token":"a","expires_in":"3599"}"#).unwrap();
        let b: TokenResponse =
            serde_json::from_str(r#"{"access_token":"b","expires_in":3599}"#).unwrap();
        let c: TokenResponse = serde_json::from_str(r#"{"access_token":"c"}"#).unwrap();
        assert_eq!(a.expires_in, Some(3599));
        assert_eq!(b.expires_in, Some(3599));
        assert_eq!(c.expires_in, None);
    }

    #[test]
    fn test_scope_to_resource() {
        assert_eq!(
            scope_to_resource(LOG_ANALYTICS_SCOPE),
            "https://api.loganalytics.io"
        );
        assert_eq!(scope_to_resource("https://x"), "https://x");
    }
}
