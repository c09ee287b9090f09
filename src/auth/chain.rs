//! Ordered fallback over several credentials

use super::{
    AccessToken, AuthError, AzureCliCredential, ClientSecretCredential, ManagedIdentityCredential,
    Result, TokenCredential,
};
use crate::config::AuthConfig;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Tries each credential in order and returns the first token obtained
pub struct ChainedCredential {
    sources: Vec<Arc<dyn TokenCredential>>,
}

impl ChainedCredential {
    pub fn new(sources: Vec<Arc<dyn TokenCredential>>) -> Self {
        ChainedCredential { sources }
    }

    /// Environment service principal (when fully configured), managed identity, Azure CLI
    pub fn default_chain(config: &AuthConfig, http: reqwest::Client) -> Self {
        let mut sources: Vec<Arc<dyn TokenCredential>> = Vec::new();

        if let (Some(tenant_id), Some(client_id), Some(client_secret)) = (
            config.tenant_id.as_deref(),
            config.client_id.as_deref(),
            config.client_secret.as_deref(),
        ) {
            sources.push(Arc::new(ClientSecretCredential::new(
                http.clone(),
                config.authority_host(),
                tenant_id,
                client_id,
                client_secret,
            )));
        }

        sources.push(Arc::new(ManagedIdentityCredential::from_env(
            http,
            config.client_id.clone(),
        )));
        sources.push(Arc::new(AzureCliCredential::new(config.tenant_id.clone())));

        Self::new(sources)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[async_trait]
impl TokenCredential for ChainedCredential {
    async fn get_token(&self, scope: &str) -> Result<AccessToken> {
        let mut failures = Vec::new();

        for source in &self.sources {
            match source.get_token(scope).await {
                Ok(token) => {
                    debug!("Credential {} provided a token for {}", source.name(), scope);
                    return Ok(token);
                }
                Err(e) => {
                    debug!("Credential {} failed: {}", source.name(), e);
                    failures.push(format!("{}: {}", source.name(), e));
                }
            }
        }

        Err(AuthError::ChainExhausted(failures.join("; ")))
    }

    fn name(&self) -> &'static str {
        "default"
    }
}
