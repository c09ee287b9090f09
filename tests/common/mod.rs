//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use copilot_bridge::auth::{AccessToken, Result as AuthResult, TokenCredential};
use copilot_bridge::config::{AuthConfig, CopilotConfig, Settings, WorkspaceConfig};
use copilot_bridge::BridgeContext;
use std::sync::Arc;

pub const TEST_TOKEN: &str = "test-token";
pub const WORKSPACE_ID: &str = "ws-1";

/// Credential that always hands out the same token
pub struct StaticCredential;

#[async_trait]
impl TokenCredential for StaticCredential {
    async fn get_token(&self, _scope: &str) -> AuthResult<AccessToken> {
        Ok(AccessToken::expires_in(TEST_TOKEN, 3600))
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

/// Settings pointing both services at one mock server
pub fn settings_for(base_url: &str) -> Settings {
    Settings {
        copilot: CopilotConfig::new(base_url, "eastus"),
        workspace: WorkspaceConfig::with_workspace_id(base_url, WORKSPACE_ID),
        auth: AuthConfig::default(),
    }
}

pub fn context_for(base_url: &str) -> Arc<BridgeContext> {
    context_with(settings_for(base_url))
}

pub fn context_with(settings: Settings) -> Arc<BridgeContext> {
    Arc::new(
        BridgeContext::with_credential(&settings, reqwest::Client::new(), Arc::new(StaticCredential))
            .unwrap(),
    )
}
