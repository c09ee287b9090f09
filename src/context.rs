//! Process-wide handles shared by every tool invocation

use crate::auth::{build_credential, TokenCredential, SECURITY_COPILOT_SCOPE};
use crate::config::Settings;
use crate::copilot::evaluation::{EvaluationWorkflow, PollSettings, RunOutcome};
use crate::copilot::skillsets::{SkillsetListing, UploadOutcome};
use crate::copilot::CopilotClient;
use crate::core::{Prompt, Result, ResultEnvelope};
use crate::sentinel::QueryClient;
use std::sync::Arc;
use tracing::{info, warn};

/// Clients and credential built once at startup
///
/// Everything here is read-only after construction except the credential's token cache.
pub struct BridgeContext {
    copilot: CopilotClient,
    sentinel: QueryClient,
    credential: Arc<dyn TokenCredential>,
}

impl BridgeContext {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let http = reqwest::Client::new();
        let credential = build_credential(&settings.auth, http.clone());
        Self::with_credential(settings, http, credential)
    }

    /// Build with an externally supplied credential
    pub fn with_credential(
        settings: &Settings,
        http: reqwest::Client,
        credential: Arc<dyn TokenCredential>,
    ) -> Result<Self> {
        let copilot = CopilotClient::new(
            http.clone(),
            credential.clone(),
            settings.copilot.clone(),
        )?;
        let sentinel = QueryClient::new(http, credential.clone(), settings.workspace.clone());

        Ok(BridgeContext {
            copilot,
            sentinel,
            credential,
        })
    }

    pub fn copilot(&self) -> &CopilotClient {
        &self.copilot
    }

    pub fn sentinel(&self) -> &QueryClient {
        &self.sentinel
    }

    /// Request a Security Copilot token once; failure is reported but not fatal
    pub async fn probe_authentication(&self) -> bool {
        match self.credential.get_token(SECURITY_COPILOT_SCOPE).await {
            Ok(_) => {
                info!("Authentication successful ({})", self.credential.name());
                true
            }
            Err(e) => {
                warn!("Authentication failed: {}", e);
                warn!("Only unauthenticated tools can be used");
                false
            }
        }
    }

    pub async fn run_sentinel_query(&self, query: &str) -> ResultEnvelope {
        self.sentinel.run_query(query).await
    }

    pub async fn get_skillsets(&self, filter: Option<&str>, expand: bool) -> Result<SkillsetListing> {
        self.copilot.list_skillsets(filter, expand).await
    }

    pub async fn upload_plugin(&self, yaml: &str, create_if_missing: bool) -> Result<UploadOutcome> {
        self.copilot.upload_skillset(yaml, create_if_missing).await
    }

    /// Run one prompt through a fresh evaluation workflow
    pub async fn run_prompt(
        &self,
        prompt: &Prompt,
        session_name: &str,
        poll: PollSettings,
    ) -> Result<RunOutcome> {
        EvaluationWorkflow::with_poll_settings(&self.copilot, poll)
            .run(prompt, session_name)
            .await
    }
}
