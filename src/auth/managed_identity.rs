//! Managed identity tokens from the hosting environment
//!
//! App Service / Functions expose `IDENTITY_ENDPOINT` and `IDENTITY_HEADER`; VMs and
//! most other compute use the instance metadata service (IMDS).

use super::{deserialize_seconds, scope_to_resource, AccessToken, AuthError, Result, TokenCredential};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use std::time::Duration;

pub const IMDS_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";

const IMDS_API_VERSION: &str = "2018-02-01";
const APP_SERVICE_API_VERSION: &str = "2019-08-01";

/// IMDS is link-local; off Azure the request has to fail fast
const IMDS_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub enum IdentitySource {
    AppService { endpoint: String, header: String },
    Imds { endpoint: String },
}

#[derive(Debug, Deserialize)]
struct ManagedIdentityToken {
    access_token: String,
    #[serde(default, deserialize_with = "deserialize_seconds")]
    expires_on: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_seconds")]
    expires_in: Option<i64>,
}

pub struct ManagedIdentityCredential {
    http: reqwest::Client,
    source: IdentitySource,
    client_id: Option<String>,
}

impl ManagedIdentityCredential {
    pub fn new(http: reqwest::Client, source: IdentitySource, client_id: Option<String>) -> Self {
        ManagedIdentityCredential {
            http,
            source,
            client_id,
        }
    }

    /// Pick App Service when its variables are present, IMDS otherwise
    pub fn from_env(http: reqwest::Client, client_id: Option<String>) -> Self {
        let source = match (
            std::env::var("IDENTITY_ENDPOINT"),
            std::env::var("IDENTITY_HEADER"),
        ) {
            (Ok(endpoint), Ok(header)) => IdentitySource::AppService { endpoint, header },
            _ => IdentitySource::Imds {
                endpoint: IMDS_ENDPOINT.to_string(),
            },
        };
        Self::new(http, source, client_id)
    }
}

#[async_trait]
impl TokenCredential for ManagedIdentityCredential {
    async fn get_token(&self, scope: &str) -> Result<AccessToken> {
        let resource = scope_to_resource(scope);

        let (request, api_version) = match &self.source {
            IdentitySource::AppService { endpoint, header } => (
                self.http
                    .get(endpoint)
                    .header("X-IDENTITY-HEADER", header),
                APP_SERVICE_API_VERSION,
            ),
            IdentitySource::Imds { endpoint } => (
                self.http
                    .get(endpoint)
                    .header("Metadata", "true")
                    .timeout(IMDS_TIMEOUT),
                IMDS_API_VERSION,
            ),
        };

        let mut query = vec![("api-version", api_version), ("resource", resource)];
        if let Some(client_id) = &self.client_id {
            query.push(("client_id", client_id.as_str()));
        }

        let response = request
            .query(&query)
            .send()
            .await
            .map_err(|e| AuthError::Unavailable(format!("Managed identity endpoint unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Unavailable(format!(
                "Managed identity returned HTTP {}: {}",
                status, body
            )));
        }

        let token: ManagedIdentityToken = response
            .json()
            .await
            .map_err(|e| AuthError::RequestFailed(format!("Invalid managed identity response: {}", e)))?;

        let expires_on = match (token.expires_on, token.expires_in) {
            (Some(epoch), _) => Utc.timestamp_opt(epoch, 0).single(),
            (None, Some(secs)) => Some(Utc::now() + chrono::Duration::seconds(secs)),
            (None, None) => None,
        }
        .unwrap_or_else(|| Utc::now() + chrono::Duration::hours(1));

        Ok(AccessToken::new(token.access_token, expires_on))
    }

    fn name(&self) -> &'static str {
        "managed_identity"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_imds_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/metadata/identity/oauth2/token"))
            .and(header("Metadata", "true"))
            .and(query_param("resource", "https://api.loganalytics.io"))
            .and(query_param("api-version", IMDS_API_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "imds-token",
                "expires_on": "4102444800",
                "expires_in": "3599"
            })))
            .mount(&server)
            .await;

        let credential = ManagedIdentityCredential::new(
            reqwest::Client::new(),
            IdentitySource::Imds {
                endpoint: format!("{}/metadata/identity/oauth2/token", server.uri()),
            },
            None,
        );
        let token = credential
            .get_token("https://api.loganalytics.io/.default")
            .await
            .unwrap();
        assert_eq!(token.token, "imds-token");
        assert_eq!(token.expires_on.timestamp(), 4102444800);
    }

    #[tokio::test]
    async fn test_app_service_failure_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("X-IDENTITY-HEADER", "secret-header"))
            .respond_with(ResponseTemplate::new(400).set_body_string("no identity assigned"))
            .mount(&server)
            .await;

        let credential = ManagedIdentityCredential::new(
            reqwest::Client::new(),
            IdentitySource::AppService {
                endpoint: format!("{}/msi/token", server.uri()),
                header: "secret-header".to_string(),
            },
            Some("client-1".to_string()),
        );
        let err = credential
            .get_token("https://api.securitycopilot.microsoft.com/.default")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Unavailable(_)));
    }
}
