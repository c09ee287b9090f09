//! Tokens from a signed-in Azure CLI

use super::{AccessToken, AuthError, Result, TokenCredential};
use async_trait::async_trait;
use chrono::{Local, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use tokio::process::Command;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliToken {
    access_token: String,
    /// Local time, e.g. `2025-01-01 12:00:00.000000`
    #[serde(default)]
    expires_on: Option<String>,
    /// Epoch seconds; only newer CLI versions emit it
    #[serde(default, rename = "expires_on")]
    expires_on_epoch: Option<i64>,
}

pub struct AzureCliCredential {
    program: String,
    tenant_id: Option<String>,
}

impl AzureCliCredential {
    pub fn new(tenant_id: Option<String>) -> Self {
        let program = if cfg!(windows) { "az.cmd" } else { "az" };
        AzureCliCredential {
            program: program.to_string(),
            tenant_id,
        }
    }
}

#[async_trait]
impl TokenCredential for AzureCliCredential {
    async fn get_token(&self, scope: &str) -> Result<AccessToken> {
        let mut command = Command::new(&self.program);
        command.args([
            "account",
            "get-access-token",
            "--output",
            "json",
            "--scope",
            scope,
        ]);
        if let Some(tenant) = &self.tenant_id {
            command.args(["--tenant", tenant]);
        }

        let output = command.output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AuthError::Unavailable("Azure CLI not installed".to_string())
            } else {
                AuthError::Unavailable(format!("Failed to run Azure CLI: {}", e))
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AuthError::Unavailable(format!(
                "Azure CLI returned an error: {}",
                stderr.trim()
            )));
        }

        parse_cli_token(&output.stdout)
    }

    fn name(&self) -> &'static str {
        "azure_cli"
    }
}

fn parse_cli_token(stdout: &[u8]) -> Result<AccessToken> {
    let token: CliToken = serde_json::from_slice(stdout)
        .map_err(|e| AuthError::RequestFailed(format!("Invalid Azure CLI output: {}", e)))?;

    let expires_on = match (token.expires_on_epoch, token.expires_on.as_deref()) {
        (Some(epoch), _) => Utc.timestamp_opt(epoch, 0).single(),
        (None, Some(local)) => NaiveDateTime::parse_from_str(local, "%Y-%m-%d %H:%M:%S%.f")
            .ok()
            .and_then(|naive| Local.from_local_datetime(&naive).single())
            .map(|dt| dt.with_timezone(&Utc)),
        (None, None) => None,
    }
    .ok_or_else(|| AuthError::RequestFailed("Azure CLI token has no usable expiry".to_string()))?;

    Ok(AccessToken::new(token.access_token, expires_on))
}
