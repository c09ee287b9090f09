//! Security Copilot API client
//!
//! Thin HTTP layer over the Security Copilot REST API. Higher-level behavior lives in
//! the submodules:
//! - `skillsets`: listing and idempotent upload of skillset definitions
//! - `evaluation`: the session → prompt → evaluation → poll workflow

pub mod evaluation;
pub mod skillsets;

use crate::auth::{TokenCredential, SECURITY_COPILOT_SCOPE};
use crate::config::CopilotConfig;
use crate::core::{
    BridgeError, EvaluationId, EvaluationRecord, Prompt, PromptId, Result, SessionId,
};
use crate::http::read_json;
use async_trait::async_trait;
use evaluation::EvaluationApi;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, Url};
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

const JSON_CONTENT_TYPE: &str = "application/json";

pub struct CopilotClient {
    http: reqwest::Client,
    credential: Arc<dyn TokenCredential>,
    base_url: Url,
    config: CopilotConfig,
}

impl CopilotClient {
    pub fn new(
        http: reqwest::Client,
        credential: Arc<dyn TokenCredential>,
        config: CopilotConfig,
    ) -> Result<Self> {
        let base_url = Url::parse(config.base_url()).map_err(|e| {
            BridgeError::InvalidArgument(format!(
                "Invalid Security Copilot URL '{}': {}",
                config.base_url, e
            ))
        })?;

        info!(
            "CopilotClient initialized with base_url={}, region={}",
            config.base_url(),
            config.region
        );

        Ok(CopilotClient {
            http,
            credential,
            base_url,
            config,
        })
    }

    pub fn config(&self) -> &CopilotConfig {
        &self.config
    }

    /// Build an absolute URL from path segments; each segment is percent-encoded
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                BridgeError::InvalidArgument(format!(
                    "Security Copilot URL cannot be a base: {}",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn skillsets_url(&self, extra: &[&str]) -> Result<Url> {
        let mut segments = vec!["geo", self.config.region.as_str(), "skillsets"];
        segments.extend_from_slice(extra);
        self.url(&segments)
    }

    /// Start a request carrying a fresh bearer token
    async fn authorized(&self, method: Method, url: Url, content_type: &str) -> Result<RequestBuilder> {
        debug!("Getting authentication token");
        let token = self.credential.get_token(SECURITY_COPILOT_SCOPE).await?;

        Ok(self
            .http
            .request(method, url)
            .bearer_auth(token.token)
            .header(ACCEPT, JSON_CONTENT_TYPE)
            .header(CONTENT_TYPE, content_type)
            .header("x-ms-client-request-id", Uuid::new_v4().to_string()))
    }

    async fn post_json(&self, url: Url, body: &JsonValue, operation: &str) -> Result<JsonValue> {
        debug!("POST request to: {}", url);
        let response = self
            .authorized(Method::POST, url, JSON_CONTENT_TYPE)
            .await?
            .json(body)
            .send()
            .await?;
        read_json(response, operation).await
    }

    async fn get_json(&self, url: Url, operation: &str) -> Result<JsonValue> {
        debug!("GET request to: {}", url);
        let response = self
            .authorized(Method::GET, url, JSON_CONTENT_TYPE)
            .await?
            .send()
            .await?;
        read_json(response, operation).await
    }
}

#[async_trait]
impl EvaluationApi for CopilotClient {
    async fn create_session(&self, name: &str) -> Result<JsonValue> {
        let url = self.url(&["sessions"])?;
        self.post_json(url, &json!({ "name": name }), "creating session")
            .await
    }

    async fn create_prompt(&self, session_id: &SessionId, prompt: &Prompt) -> Result<JsonValue> {
        let url = self.url(&["sessions", session_id.as_str(), "prompts"])?;
        let payload = prompt.to_payload();
        debug!("Request payload: {}", payload);
        self.post_json(url, &payload, "creating prompt").await
    }

    async fn create_evaluation(
        &self,
        session_id: &SessionId,
        prompt_id: &PromptId,
    ) -> Result<JsonValue> {
        let url = self.url(&[
            "sessions",
            session_id.as_str(),
            "prompts",
            prompt_id.as_str(),
            "evaluations",
        ])?;
        self.post_json(url, &json!({}), "creating evaluation").await
    }

    async fn get_evaluation(
        &self,
        session_id: &SessionId,
        prompt_id: &PromptId,
        evaluation_id: &EvaluationId,
    ) -> Result<EvaluationRecord> {
        let url = self.url(&[
            "sessions",
            session_id.as_str(),
            "prompts",
            prompt_id.as_str(),
            "evaluations",
            evaluation_id.as_str(),
        ])?;
        self.get_json(url, "polling evaluation")
            .await
            .map(EvaluationRecord::new)
    }
}
