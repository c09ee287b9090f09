//! Log Analytics query client for the Sentinel workspace
//!
//! Runs one KQL query and flattens the returned tables into a single list of records.
//! `run_query` never fails: every error becomes an error envelope.

use crate::auth::{TokenCredential, LOG_ANALYTICS_SCOPE};
use crate::config::WorkspaceConfig;
use crate::core::{BridgeError, QueryRecord, Result, ResultEnvelope};
use crate::http::read_json;
use reqwest::header::ACCEPT;
use reqwest::Url;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    tables: Vec<Table>,
    #[serde(default)]
    error: Option<QueryError>,
}

#[derive(Debug, Deserialize)]
struct Table {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    columns: Vec<Column>,
    #[serde(default)]
    rows: Vec<Vec<JsonValue>>,
}

#[derive(Debug, Deserialize)]
struct Column {
    name: String,
}

#[derive(Debug, Deserialize)]
struct QueryError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl QueryError {
    fn describe(&self) -> String {
        match (self.code.as_deref(), self.message.as_deref()) {
            (Some(code), Some(message)) => format!("{}: {}", code, message),
            (None, Some(message)) => message.to_string(),
            (Some(code), None) => code.to_string(),
            (None, None) => "query returned a partial result".to_string(),
        }
    }
}

pub struct QueryClient {
    http: reqwest::Client,
    credential: Arc<dyn TokenCredential>,
    config: WorkspaceConfig,
}

impl QueryClient {
    pub fn new(
        http: reqwest::Client,
        credential: Arc<dyn TokenCredential>,
        config: WorkspaceConfig,
    ) -> Self {
        QueryClient {
            http,
            credential,
            config,
        }
    }

    pub fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    /// Run a KQL query and wrap the outcome in a `ResultEnvelope`
    pub async fn run_query(&self, query: &str) -> ResultEnvelope {
        info!("Running Sentinel query");
        debug!("Query: {}", query);

        match self.execute(query).await {
            Ok(envelope) => envelope,
            Err(e) => {
                error!("Error running Sentinel query: {}", e);
                e.into()
            }
        }
    }

    async fn execute(&self, query: &str) -> Result<ResultEnvelope> {
        let url = self.query_url()?;
        let token = self.credential.get_token(LOG_ANALYTICS_SCOPE).await?;

        debug!("POST request to: {}", url);
        let response = self
            .http
            .post(url)
            .bearer_auth(token.token)
            .header(ACCEPT, "application/json")
            .header("x-ms-client-request-id", Uuid::new_v4().to_string())
            .json(&json!({ "query": query }))
            .send()
            .await?;

        let body = read_json(response, "running query").await?;
        let response: QueryResponse = serde_json::from_value(body).map_err(|e| {
            BridgeError::MalformedResponse(format!("Unexpected query response: {}", e))
        })?;

        let partial_error = response.error.as_ref().map(QueryError::describe);
        if let Some(message) = &partial_error {
            warn!("Partial results returned: {}", message);
        }

        let result = flatten_tables(response.tables);
        info!("Query returned {} records", result.len());
        Ok(ResultEnvelope::Success {
            result,
            partial_error,
        })
    }

    /// Workspace-id route when an id is configured, resource-centric route otherwise
    fn query_url(&self) -> Result<Url> {
        let mut url = Url::parse(self.config.endpoint()).map_err(|e| {
            BridgeError::InvalidArgument(format!(
                "Invalid Log Analytics endpoint '{}': {}",
                self.config.endpoint, e
            ))
        })?;

        let route: Vec<String> = if let Some(id) = self.config.workspace_id() {
            vec!["v1".into(), "workspaces".into(), id.to_string(), "query".into()]
        } else if let Some(resource_id) = self.config.resource_id() {
            std::iter::once("v1".to_string())
                .chain(
                    resource_id
                        .split('/')
                        .filter(|s| !s.is_empty())
                        .map(str::to_string),
                )
                .chain(std::iter::once("query".to_string()))
                .collect()
        } else {
            return Err(BridgeError::InvalidArgument(
                "No Sentinel workspace configured: set SENTINEL_WORKSPACE_ID or \
                 SENTINEL_SUBSCRIPTION_ID, SENTINEL_RESOURCE_GROUP and SENTINEL_WORKSPACE_NAME"
                    .to_string(),
            ));
        };

        url.path_segments_mut()
            .map_err(|_| {
                BridgeError::InvalidArgument(format!(
                    "Log Analytics endpoint cannot be a base: {}",
                    self.config.endpoint
                ))
            })?
            .pop_if_empty()
            .extend(route);
        Ok(url)
    }
}

/// Flatten tables into records in table order then row order.
///
/// Each record has exactly the table's columns as keys; short rows are padded with null.
fn flatten_tables(tables: Vec<Table>) -> Vec<QueryRecord> {
    let mut records = Vec::new();

    for table in tables {
        debug!(
            "Table {} has {} rows",
            table.name.as_deref().unwrap_or("<unnamed>"),
            table.rows.len()
        );
        for row in table.rows {
            let mut cells = row.into_iter();
            let record: QueryRecord = table
                .columns
                .iter()
                .map(|column| (column.name.clone(), cells.next().unwrap_or(JsonValue::Null)))
                .collect();
            records.push(record);
        }
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AccessToken, Result as AuthResult};
    use async_trait::async_trait;

    struct StaticToken;

    #[async_trait]
    impl TokenCredential for StaticToken {
        async fn get_token(&self, _scope: &str) -> AuthResult<AccessToken> {
            Ok(AccessToken::expires_in("la-token", 3600))
        }

        fn name(&self) -> &'static str {
            "static"
        }
    }

    fn client(config: WorkspaceConfig) -> QueryClient {
        QueryClient::new(reqwest::Client::new(), Arc::new(StaticToken), config)
    }

    #[test]
    fn test_flatten_preserves_order_and_columns() {
        let response: QueryResponse = serde_json::from_value(json!({
            "tables": [
                {
                    "name": "PrimaryResult",
                    "columns": [{"name": "DataType", "type": "string"}, {"name": "Quantity", "type": "real"}],
                    "rows": [["SigninLogs", 1.5], ["AuditLogs", 2.0], ["SecurityEvent"]]
                },
                {
                    "name": "Second",
                    "columns": [{"name": "Count", "type": "long"}],
                    "rows": [[7], [8]]
                }
            ]
        }))
        .unwrap();

        let records = flatten_tables(response.tables);
        assert_eq!(records.len(), 5);
        assert_eq!(
            records[0].keys().collect::<Vec<_>>(),
            vec!["DataType", "Quantity"]
        );
        assert_eq!(records[1]["DataType"], "AuditLogs");
        assert_eq!(records[2]["Quantity"], JsonValue::Null);
        assert_eq!(records[3].keys().collect::<Vec<_>>(), vec!["Count"]);
        assert_eq!(records[4]["Count"], 8);
    }

    #[test]
    fn test_query_url_routes() {
        let by_id = client(WorkspaceConfig::with_workspace_id(
            "https://api.loganalytics.io/",
            "ws-1",
        ));
        assert_eq!(
            by_id.query_url().unwrap().as_str(),
            "https://api.loganalytics.io/v1/workspaces/ws-1/query"
        );

        let by_resource = client(WorkspaceConfig {
            subscription_id: Some("sub".into()),
            resource_group: Some("rg".into()),
            workspace_name: Some("soc".into()),
            endpoint: "https://api.loganalytics.io".into(),
            ..Default::default()
        });
        assert_eq!(
            by_resource.query_url().unwrap().as_str(),
            "https://api.loganalytics.io/v1/subscriptions/sub/resourceGroups/rg/providers/Microsoft.OperationalInsights/workspaces/soc/query"
        );
    }

    #[tokio::test]
    async fn test_unconfigured_workspace_is_invalid_argument() {
        let envelope = client(WorkspaceConfig::default()).run_query("Usage").await;
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["error"]["kind"], "invalid_argument");
    }
}
