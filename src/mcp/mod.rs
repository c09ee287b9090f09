//! MCP server façade using the rmcp SDK
//!
//! Exposes four tools:
//! - run_sentinel_query: KQL query against the Sentinel workspace
//! - get_skillsets: list Security Copilot skillsets, optionally with their skills
//! - upload_plugin: create or update a skillset from its YAML definition
//! - run_prompt: evaluate a freeform prompt or a skill invocation
//!
//! Domain failures come back as tool results flagged as errors, with structured
//! content `{"error": {"kind", "message"}}`. Protocol-level errors are reserved for
//! the MCP layer itself.

use crate::context::BridgeContext;
use crate::copilot::evaluation::{
    PollSettings, DEFAULT_MAX_ATTEMPTS, DEFAULT_POLL_INTERVAL, DEFAULT_SESSION_NAME,
};
use crate::core::{BridgeError, ErrorReport, Prompt};
use rmcp::{
    handler::server::router::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::{CallToolResult, ErrorData, Implementation, ServerCapabilities, ServerInfo},
    service::RequestContext,
    tool, tool_router, RoleServer, ServerHandler,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// The MCP server exposing the Sentinel and Security Copilot tools
#[derive(Clone)]
pub struct BridgeServer {
    context: Arc<BridgeContext>,
    tool_router: ToolRouter<Self>,
}

/// Input schema for run_sentinel_query
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunSentinelQueryInput {
    /// KQL query to run against the workspace
    pub query: String,
}

/// Input schema for get_skillsets
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GetSkillsetsInput {
    /// Case-insensitive substring the skillset name must contain
    #[serde(default)]
    pub filter_name: Option<String>,

    /// Include each skillset's skills
    #[serde(default = "default_true")]
    pub full_response: bool,
}

/// Input schema for upload_plugin
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct UploadPluginInput {
    /// Skillset definition in YAML; `Descriptor.Name` identifies the skillset
    pub plugin_yaml_content: String,

    /// Create the skillset when no skillset with that name exists
    #[serde(default = "default_true")]
    pub create_if_not_exists: bool,
}

/// Input schema for run_prompt
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunPromptInput {
    #[serde(default = "default_prompt_type")]
    #[schemars(description = "Prompt type: Prompt (freeform) or Skill")]
    pub prompt_type: String,

    /// Prompt text, required for prompt_type Prompt
    #[serde(default)]
    pub content: Option<String>,

    /// Skill to invoke, required for prompt_type Skill
    #[serde(default)]
    pub skill_name: Option<String>,

    /// Skill inputs as name/value pairs
    #[serde(default)]
    #[schemars(schema_with = "json_object_schema")]
    pub inputs: Option<JsonValue>,

    /// Name of the Security Copilot session to create
    #[serde(default = "default_session_name")]
    pub session_name: String,

    /// Seconds between evaluation polls
    #[serde(default)]
    #[schemars(schema_with = "non_negative_int_schema")]
    pub polling_interval: Option<JsonValue>,

    /// Maximum number of evaluation polls
    #[serde(default)]
    #[schemars(schema_with = "non_negative_int_schema")]
    pub max_attempts: Option<JsonValue>,
}

impl RunPromptInput {
    pub fn prompt(&self) -> Result<Prompt, BridgeError> {
        Prompt::from_parts(
            &self.prompt_type,
            self.content.clone(),
            self.skill_name.clone(),
            self.skill_inputs()?,
        )
    }

    /// Polling settings, with defaults for absent or null fields
    pub fn poll_settings(&self) -> Result<PollSettings, BridgeError> {
        let interval = match self.polling_interval.as_ref() {
            None | Some(JsonValue::Null) => DEFAULT_POLL_INTERVAL,
            Some(value) => Duration::from_secs(non_negative("polling_interval", value)?),
        };
        let max_attempts = match self.max_attempts.as_ref() {
            None | Some(JsonValue::Null) => DEFAULT_MAX_ATTEMPTS,
            Some(value) => u32::try_from(non_negative("max_attempts", value)?).map_err(|_| {
                BridgeError::InvalidArgument(format!("max_attempts is too large: {}", value))
            })?,
        };
        Ok(PollSettings {
            interval,
            max_attempts,
        })
    }

    /// Skill inputs; anything other than an object or null is rejected
    pub fn skill_inputs(&self) -> Result<Option<Map<String, JsonValue>>, BridgeError> {
        match self.inputs.clone() {
            None | Some(JsonValue::Null) => Ok(None),
            Some(JsonValue::Object(map)) => Ok(Some(map)),
            Some(other) => Err(BridgeError::InvalidArgument(format!(
                "inputs must be an object of name/value pairs, got {}",
                other
            ))),
        }
    }
}

fn non_negative(field: &str, value: &JsonValue) -> Result<u64, BridgeError> {
    value.as_u64().ok_or_else(|| {
        BridgeError::InvalidArgument(format!(
            "{} must be a non-negative integer, got {}",
            field, value
        ))
    })
}

fn default_true() -> bool {
    true
}

fn default_prompt_type() -> String {
    "Prompt".to_string()
}

fn default_session_name() -> String {
    DEFAULT_SESSION_NAME.to_string()
}

/// Schema for free-form object fields, optionally null
fn json_object_schema(_gen: &mut schemars::SchemaGenerator) -> schemars::Schema {
    schemars::json_schema!({
        "type": ["object", "null"],
        "additionalProperties": true
    })
}

fn non_negative_int_schema(_gen: &mut schemars::SchemaGenerator) -> schemars::Schema {
    schemars::json_schema!({
        "type": ["integer", "null"],
        "minimum": 0
    })
}

/// Structured error result carrying the kind alongside the context-prefixed message
fn error_result(context: &str, err: &BridgeError) -> CallToolResult {
    let report = ErrorReport::with_context(context, err);
    CallToolResult::structured_error(json!({ "error": report }))
}

fn structured<T: Serialize>(value: &T) -> Result<CallToolResult, ErrorData> {
    serde_json::to_value(value)
        .map(CallToolResult::structured)
        .map_err(|e| ErrorData::internal_error(format!("Failed to encode result: {}", e), None))
}

impl BridgeServer {
    pub fn new(context: Arc<BridgeContext>) -> Self {
        BridgeServer {
            context,
            tool_router: Self::tool_router(),
        }
    }

    /// Names of the registered tools, in registration order
    pub fn tool_names(&self) -> Vec<String> {
        self.tool_router
            .list_all()
            .into_iter()
            .map(|tool| tool.name.to_string())
            .collect()
    }
}

#[tool_router]
impl BridgeServer {
    #[tool(
        name = "run_sentinel_query",
        description = "Run a KQL query against the Microsoft Sentinel workspace. Returns {status, result} where result is a flat list of records, or {status: error, error}."
    )]
    pub async fn run_sentinel_query(
        &self,
        Parameters(input): Parameters<RunSentinelQueryInput>,
    ) -> Result<CallToolResult, ErrorData> {
        debug!("run_sentinel_query called");

        let envelope = self.context.run_sentinel_query(&input.query).await;
        let value = serde_json::to_value(&envelope).map_err(|e| {
            ErrorData::internal_error(format!("Failed to encode result: {}", e), None)
        })?;

        if envelope.is_success() {
            info!(
                "run_sentinel_query returned {} records",
                envelope.records().len()
            );
            Ok(CallToolResult::structured(value))
        } else {
            Ok(CallToolResult::structured_error(value))
        }
    }

    #[tool(
        name = "get_skillsets",
        description = "List Security Copilot skillsets. filter_name keeps skillsets whose name contains it (case-insensitive); full_response=true also returns each skillset's skills."
    )]
    pub async fn get_skillsets(
        &self,
        Parameters(input): Parameters<GetSkillsetsInput>,
    ) -> Result<CallToolResult, ErrorData> {
        debug!(
            "get_skillsets called with filter {:?}, full_response={}",
            input.filter_name, input.full_response
        );

        match self
            .context
            .get_skillsets(input.filter_name.as_deref(), input.full_response)
            .await
        {
            Ok(listing) => structured(&listing),
            Err(e) => Ok(error_result("Error getting skillsets", &e)),
        }
    }

    #[tool(
        name = "upload_plugin",
        description = "Create or update a Security Copilot skillset from its YAML definition. The skillset is matched by Descriptor.Name; status is updated, created or not_found."
    )]
    pub async fn upload_plugin(
        &self,
        Parameters(input): Parameters<UploadPluginInput>,
    ) -> Result<CallToolResult, ErrorData> {
        debug!("upload_plugin called");

        match self
            .context
            .upload_plugin(&input.plugin_yaml_content, input.create_if_not_exists)
            .await
        {
            Ok(outcome) => structured(&outcome),
            Err(e) => Ok(error_result("Error uploading skillset", &e)),
        }
    }

    #[tool(
        name = "run_prompt",
        description = "Run a freeform prompt (prompt_type=Prompt, content) or a skill (prompt_type=Skill, skill_name, inputs) in a new Security Copilot session and poll until the evaluation completes or max_attempts is reached."
    )]
    pub async fn run_prompt(
        &self,
        Parameters(input): Parameters<RunPromptInput>,
    ) -> Result<CallToolResult, ErrorData> {
        debug!("run_prompt called with prompt_type {}", input.prompt_type);

        let (prompt, poll) = match input.prompt().and_then(|p| Ok((p, input.poll_settings()?))) {
            Ok(parsed) => parsed,
            Err(e) => return Ok(error_result("Error processing prompt", &e)),
        };

        match self
            .context
            .run_prompt(&prompt, &input.session_name, poll)
            .await
        {
            Ok(outcome) => structured(&outcome),
            Err(e) => Ok(error_result("Error processing prompt", &e)),
        }
    }
}

impl ServerHandler for BridgeServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: Default::default(),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "copilot-bridge".to_string(),
                title: Some("Security Copilot and Sentinel MCP bridge".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                website_url: None,
                icons: None,
            },
            instructions: Some(
                "Tools for Microsoft Security Copilot and Microsoft Sentinel. \
                Use run_sentinel_query for KQL, get_skillsets to discover skills, \
                run_prompt to evaluate prompts or skills, and upload_plugin to manage skillsets."
                    .to_string(),
            ),
        }
    }

    async fn list_tools(
        &self,
        _request: Option<rmcp::model::PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<rmcp::model::ListToolsResult, ErrorData> {
        let tools = self.tool_router.list_all();
        Ok(rmcp::model::ListToolsResult {
            tools,
            next_cursor: None,
            meta: None,
        })
    }

    async fn call_tool(
        &self,
        request: rmcp::model::CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        use rmcp::handler::server::tool::ToolCallContext;

        let tool_context = ToolCallContext::new(self, request, context);
        self.tool_router.call(tool_context).await
    }
}
