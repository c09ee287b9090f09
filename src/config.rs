//! Process configuration
//!
//! Every setting can come from a CLI flag or from the environment variable named
//! next to it. `main` loads a `.env` file (if any) before parsing, so values from
//! the file behave like regular environment variables.

use clap::{Args, ValueEnum};
use std::fmt;

pub const DEFAULT_COPILOT_URL: &str = "https://api.securitycopilot.microsoft.com";
pub const DEFAULT_COPILOT_REGION: &str = "eastus";
pub const DEFAULT_LOG_ANALYTICS_ENDPOINT: &str = "https://api.loganalytics.io";
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

/// All settings needed to build a `BridgeContext`
#[derive(Debug, Clone, Args)]
pub struct Settings {
    #[command(flatten)]
    pub copilot: CopilotConfig,

    #[command(flatten)]
    pub workspace: WorkspaceConfig,

    #[command(flatten)]
    pub auth: AuthConfig,
}

/// Security Copilot endpoint settings
#[derive(Debug, Clone, Args)]
pub struct CopilotConfig {
    /// Security Copilot API base URL
    #[arg(long = "copilot-url", env = "SECURITY_COPILOT_API_URL", default_value = DEFAULT_COPILOT_URL, global = true)]
    pub base_url: String,

    /// Geo region used for skillset routes
    #[arg(long = "copilot-region", env = "SECURITY_COPILOT_REGION", default_value = DEFAULT_COPILOT_REGION, global = true)]
    pub region: String,
}

impl CopilotConfig {
    pub fn new(base_url: impl Into<String>, region: impl Into<String>) -> Self {
        CopilotConfig {
            base_url: base_url.into(),
            region: region.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

impl Default for CopilotConfig {
    fn default() -> Self {
        CopilotConfig::new(DEFAULT_COPILOT_URL, DEFAULT_COPILOT_REGION)
    }
}

/// Sentinel (Log Analytics) workspace settings
#[derive(Debug, Clone, Args, Default)]
pub struct WorkspaceConfig {
    /// Azure subscription containing the workspace
    #[arg(long = "sentinel-subscription-id", env = "SENTINEL_SUBSCRIPTION_ID", global = true)]
    pub subscription_id: Option<String>,

    /// Resource group containing the workspace
    #[arg(long = "sentinel-resource-group", env = "SENTINEL_RESOURCE_GROUP", global = true)]
    pub resource_group: Option<String>,

    /// Workspace resource name
    #[arg(long = "sentinel-workspace-name", env = "SENTINEL_WORKSPACE_NAME", global = true)]
    pub workspace_name: Option<String>,

    /// Workspace (customer) id used by the query API
    #[arg(long = "sentinel-workspace-id", env = "SENTINEL_WORKSPACE_ID", global = true)]
    pub workspace_id: Option<String>,

    /// Log Analytics query endpoint
    #[arg(long = "log-analytics-endpoint", env = "LOG_ANALYTICS_ENDPOINT", default_value = DEFAULT_LOG_ANALYTICS_ENDPOINT, global = true)]
    pub endpoint: String,
}

impl WorkspaceConfig {
    pub fn with_workspace_id(endpoint: impl Into<String>, workspace_id: impl Into<String>) -> Self {
        WorkspaceConfig {
            workspace_id: Some(workspace_id.into()),
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    pub fn endpoint(&self) -> &str {
        let endpoint = self.endpoint.trim_end_matches('/');
        if endpoint.is_empty() {
            DEFAULT_LOG_ANALYTICS_ENDPOINT
        } else {
            endpoint
        }
    }

    /// ARM resource id of the workspace, when all three parts are configured
    pub fn resource_id(&self) -> Option<String> {
        match (
            non_empty(&self.subscription_id),
            non_empty(&self.resource_group),
            non_empty(&self.workspace_name),
        ) {
            (Some(sub), Some(rg), Some(name)) => Some(format!(
                "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.OperationalInsights/workspaces/{}",
                sub, rg, name
            )),
            _ => None,
        }
    }

    pub fn workspace_id(&self) -> Option<&str> {
        non_empty(&self.workspace_id)
    }
}

/// Credential strategy, fixed for the life of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum AuthKind {
    /// Device-code login in the terminal
    #[default]
    #[value(name = "interactive")]
    Interactive,
    /// Service principal with a client secret
    #[value(name = "client_secret")]
    ClientSecret,
    /// Environment, managed identity, then Azure CLI
    #[value(name = "default")]
    Default,
}

impl fmt::Display for AuthKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthKind::Interactive => write!(f, "interactive"),
            AuthKind::ClientSecret => write!(f, "client_secret"),
            AuthKind::Default => write!(f, "default"),
        }
    }
}

/// Entra ID credential settings
#[derive(Debug, Clone, Args, Default)]
pub struct AuthConfig {
    /// Authentication strategy
    #[arg(long = "auth-type", env = "AUTHENTICATION_TYPE", value_enum, default_value = "interactive", global = true)]
    pub kind: AuthKind,

    /// Entra ID tenant
    #[arg(long = "tenant-id", env = "AZURE_TENANT_ID", global = true)]
    pub tenant_id: Option<String>,

    /// Application (client) id
    #[arg(long = "client-id", env = "AZURE_CLIENT_ID", global = true)]
    pub client_id: Option<String>,

    /// Client secret for the `client_secret` strategy
    #[arg(long = "client-secret", env = "AZURE_CLIENT_SECRET", hide_env_values = true, global = true)]
    pub client_secret: Option<String>,

    /// Entra ID authority host
    #[arg(long = "authority-host", env = "AZURE_AUTHORITY_HOST", default_value = DEFAULT_AUTHORITY_HOST, global = true)]
    pub authority_host: String,
}

impl AuthConfig {
    pub fn authority_host(&self) -> &str {
        let host = self.authority_host.trim_end_matches('/');
        if host.is_empty() {
            DEFAULT_AUTHORITY_HOST
        } else {
            host
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        settings: Settings,
    }

    #[test]
    fn test_defaults_and_flags() {
        let cli = TestCli::parse_from([
            "test",
            "--copilot-url",
            "http://localhost:9000/",
            "--auth-type",
            "client_secret",
            "--sentinel-workspace-id",
            "ws-123",
        ]);
        let settings = cli.settings;
        assert_eq!(settings.copilot.base_url(), "http://localhost:9000");
        assert_eq!(settings.auth.kind, AuthKind::ClientSecret);
        assert_eq!(settings.workspace.workspace_id(), Some("ws-123"));
        assert_eq!(settings.workspace.endpoint(), DEFAULT_LOG_ANALYTICS_ENDPOINT);
    }

    #[test]
    fn test_rejects_unknown_auth_type() {
        let result = TestCli::try_parse_from(["test", "--auth-type", "certificate"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_resource_id_requires_all_parts() {
        let mut workspace = WorkspaceConfig {
            subscription_id: Some("sub".into()),
            resource_group: Some("rg".into()),
            ..Default::default()
        };
        assert_eq!(workspace.resource_id(), None);

        workspace.workspace_name = Some("soc".into());
        assert_eq!(
            workspace.resource_id().as_deref(),
            Some("/subscriptions/sub/resourceGroups/rg/providers/Microsoft.OperationalInsights/workspaces/soc")
        );

        workspace.workspace_id = Some("  ".into());
        assert_eq!(workspace.workspace_id(), None);
    }
}
