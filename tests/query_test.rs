//! Tests for the Sentinel query client

mod common;

use common::{context_for, context_with, settings_for, TEST_TOKEN, WORKSPACE_ID};
use copilot_bridge::config::WorkspaceConfig;
use copilot_bridge::core::ResultEnvelope;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn query_path() -> String {
    format!("/v1/workspaces/{}/query", WORKSPACE_ID)
}

#[tokio::test]
async fn test_tables_flatten_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(query_path()))
        .and(header("authorization", format!("Bearer {}", TEST_TOKEN).as_str()))
        .and(body_json(json!({"query": "Usage | project DataType | take 10"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "tables": [
                {
                    "name": "PrimaryResult",
                    "columns": [{"name": "DataType", "type": "string"}, {"name": "Quantity", "type": "real"}],
                    "rows": [["SigninLogs", 10.5], ["AuditLogs", 3.0], ["SecurityAlert", 0.2]]
                },
                {
                    "name": "Extra",
                    "columns": [{"name": "Total", "type": "long"}],
                    "rows": [[1], [2]]
                }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let context = context_for(&server.uri());
    let envelope = context
        .run_sentinel_query("Usage | project DataType | take 10")
        .await;

    let records = envelope.records();
    assert!(envelope.is_success());
    assert_eq!(records.len(), 5);
    assert_eq!(records[0]["DataType"], "SigninLogs");
    assert_eq!(records[2]["DataType"], "SecurityAlert");
    assert_eq!(records[3].keys().collect::<Vec<_>>(), vec!["Total"]);
    assert_eq!(records[4]["Total"], 2);

    let value = serde_json::to_value(&envelope).unwrap();
    assert_eq!(value["status"], "success");
    assert!(value.get("partial_error").is_none());
}

#[tokio::test]
async fn test_partial_result_is_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(query_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "tables": [{
                "name": "PrimaryResult",
                "columns": [{"name": "DataType", "type": "string"}],
                "rows": [["SigninLogs"]]
            }],
            "error": {"code": "PartialError", "message": "Query result was truncated"}
        })))
        .mount(&server)
        .await;

    let context = context_for(&server.uri());
    let envelope = context.run_sentinel_query("SigninLogs").await;

    match envelope {
        ResultEnvelope::Success {
            result,
            partial_error,
        } => {
            assert_eq!(result.len(), 1);
            assert!(partial_error.unwrap().contains("truncated"));
        }
        other => panic!("expected success, got {:?}", other),
    }
}

#[tokio::test]
async fn test_query_failure_becomes_error_envelope() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(query_path()))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"code": "BadArgumentError", "message": "Syntax error"}
        })))
        .mount(&server)
        .await;

    let context = context_for(&server.uri());
    let envelope = context.run_sentinel_query("Usage |").await;

    let value = serde_json::to_value(&envelope).unwrap();
    assert_eq!(value["status"], "error");
    assert_eq!(value["error"]["kind"], "transport");
    assert_eq!(value["error"]["status"], 400);
    assert!(value["error"]["message"]
        .as_str()
        .unwrap()
        .contains("Syntax error"));
}

#[tokio::test]
async fn test_undecodable_body_is_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(query_path()))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
        .mount(&server)
        .await;

    let context = context_for(&server.uri());
    let envelope = context.run_sentinel_query("Usage").await;
    let value = serde_json::to_value(&envelope).unwrap();
    assert_eq!(value["error"]["kind"], "malformed_response");
}

#[tokio::test]
async fn test_resource_centric_route() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(
            "/v1/subscriptions/sub-1/resourceGroups/soc-rg/providers/Microsoft.OperationalInsights/workspaces/soc/query",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"tables": []})))
        .expect(1)
        .mount(&server)
        .await;

    let mut settings = settings_for(&server.uri());
    settings.workspace = WorkspaceConfig {
        subscription_id: Some("sub-1".into()),
        resource_group: Some("soc-rg".into()),
        workspace_name: Some("soc".into()),
        endpoint: server.uri(),
        ..Default::default()
    };

    let envelope = context_with(settings).run_sentinel_query("Usage").await;
    assert!(envelope.is_success());
    assert!(envelope.records().is_empty());
}

#[tokio::test]
async fn test_unconfigured_workspace_makes_no_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"tables": []})))
        .expect(0)
        .mount(&server)
        .await;

    let mut settings = settings_for(&server.uri());
    settings.workspace = WorkspaceConfig {
        endpoint: server.uri(),
        ..Default::default()
    };

    let envelope = context_with(settings).run_sentinel_query("Usage").await;
    let value = serde_json::to_value(&envelope).unwrap();
    assert_eq!(value["error"]["kind"], "invalid_argument");
}
