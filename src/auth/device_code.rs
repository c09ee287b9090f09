//! Interactive login using the OAuth2 device authorization grant
//!
//! The first token request prints a verification URL and user code to stderr and
//! waits for the user to finish signing in. The refresh token from that login is
//! kept in memory, so later requests (other scopes, expired tokens) do not prompt
//! again unless the refresh token itself is rejected.

use super::{request_token, AccessToken, AuthError, Result, TokenCredential, TokenResponse};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Public client id of the Azure CLI, usable for device-code login in any tenant
pub const DEFAULT_PUBLIC_CLIENT_ID: &str = "04b07795-8ddb-461a-bbee-02f9e1bf7b46";

/// Tenant alias accepting any work or school account
pub const DEFAULT_TENANT: &str = "organizations";

const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";

#[derive(Debug, Deserialize)]
struct DeviceCodeResponse {
    device_code: String,
    user_code: String,
    verification_uri: String,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    interval: Option<u64>,
    #[serde(default)]
    message: Option<String>,
}

pub struct DeviceCodeCredential {
    http: reqwest::Client,
    authority: String,
    client_id: String,
    refresh_token: Mutex<Option<String>>,
}

impl DeviceCodeCredential {
    pub fn new(
        http: reqwest::Client,
        authority_host: &str,
        tenant_id: Option<&str>,
        client_id: Option<&str>,
    ) -> Self {
        DeviceCodeCredential {
            http,
            authority: format!(
                "{}/{}",
                authority_host.trim_end_matches('/'),
                tenant_id.unwrap_or(DEFAULT_TENANT)
            ),
            client_id: client_id.unwrap_or(DEFAULT_PUBLIC_CLIENT_ID).to_string(),
            refresh_token: Mutex::new(None),
        }
    }

    fn token_url(&self) -> String {
        format!("{}/oauth2/v2.0/token", self.authority)
    }

    async fn redeem_refresh_token(&self, refresh_token: &str, scope: &str) -> Result<TokenResponse> {
        let scope = with_offline_access(scope);
        request_token(
            &self.http,
            &self.token_url(),
            &[
                ("grant_type", "refresh_token"),
                ("client_id", &self.client_id),
                ("refresh_token", refresh_token),
                ("scope", &scope),
            ],
        )
        .await
    }

    async fn device_code_login(&self, scope: &str) -> Result<TokenResponse> {
        let scope = with_offline_access(scope);
        let url = format!("{}/oauth2/v2.0/devicecode", self.authority);

        let response = self
            .http
            .post(&url)
            .form(&[("client_id", self.client_id.as_str()), ("scope", scope.as_str())])
            .send()
            .await
            .map_err(|e| AuthError::RequestFailed(format!("{}: {}", url, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::RequestFailed(format!(
                "Device code request failed: HTTP {}: {}",
                status, body
            )));
        }

        let code: DeviceCodeResponse = response
            .json()
            .await
            .map_err(|e| AuthError::RequestFailed(format!("Invalid device code response: {}", e)))?;

        let message = code.message.clone().unwrap_or_else(|| {
            format!(
                "To sign in, open {} and enter the code {}",
                code.verification_uri, code.user_code
            )
        });
        eprintln!("{}", message);
        info!("Waiting for device code sign-in at {}", code.verification_uri);

        let mut interval = Duration::from_secs(code.interval.unwrap_or(5));
        let deadline = tokio::time::Instant::now()
            + Duration::from_secs(code.expires_in.unwrap_or(900));

        loop {
            tokio::time::sleep(interval).await;

            let result = request_token(
                &self.http,
                &self.token_url(),
                &[
                    ("grant_type", DEVICE_CODE_GRANT),
                    ("client_id", &self.client_id),
                    ("device_code", &code.device_code),
                ],
            )
            .await;

            match result {
                Ok(token) => return Ok(token),
                Err(AuthError::Rejected { error, .. }) if error == "authorization_pending" => {
                    debug!("Device code sign-in still pending");
                }
                Err(AuthError::Rejected { error, .. }) if error == "slow_down" => {
                    interval += Duration::from_secs(5);
                }
                Err(e) => return Err(e),
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(AuthError::Rejected {
                    error: "expired_token".to_string(),
                    description: "Device code expired before sign-in completed".to_string(),
                });
            }
        }
    }
}

#[async_trait]
impl TokenCredential for DeviceCodeCredential {
    async fn get_token(&self, scope: &str) -> Result<AccessToken> {
        let mut refresh_token = self.refresh_token.lock().await;

        if let Some(existing) = refresh_token.clone() {
            match self.redeem_refresh_token(&existing, scope).await {
                Ok(response) => {
                    if let Some(rotated) = response.refresh_token.clone() {
                        *refresh_token = Some(rotated);
                    }
                    return Ok(response.into_access_token());
                }
                Err(e) => {
                    warn!("Refresh token rejected, signing in again: {}", e);
                    *refresh_token = None;
                }
            }
        }

        let response = self.device_code_login(scope).await?;
        if let Some(rt) = response.refresh_token.clone() {
            *refresh_token = Some(rt);
        }
        info!("Interactive sign-in completed");
        Ok(response.into_access_token())
    }

    fn name(&self) -> &'static str {
        "interactive"
    }
}

fn with_offline_access(scope: &str) -> String {
    format!("{} offline_access", scope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_device_code_login_then_refresh() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/contoso/oauth2/v2.0/devicecode"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "device_code": "dev-123",
                "user_code": "ABCD-EFGH",
                "verification_uri": "https://microsoft.com/devicelogin",
                "expires_in": 900,
                "interval": 0
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/contoso/oauth2/v2.0/token"))
            .and(body_string_contains("device_code=dev-123"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "authorization_pending",
                "error_description": "waiting"
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/contoso/oauth2/v2.0/token"))
            .and(body_string_contains("device_code=dev-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "first",
                "refresh_token": "rt-1",
                "expires_in": 3600
            })))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/contoso/oauth2/v2.0/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=rt-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "second",
                "expires_in": "3600"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let credential =
            DeviceCodeCredential::new(reqwest::Client::new(), &server.uri(), Some("contoso"), None);

        let first = credential
            .get_token("https://api.securitycopilot.microsoft.com/.default")
            .await
            .unwrap();
        assert_eq!(first.token, "first");

        let second = credential
            .get_token("https://api.loganalytics.io/.default")
            .await
            .unwrap();
        assert_eq!(second.token, "second");
    }

    #[tokio::test]
    async fn test_device_code_declined() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/organizations/oauth2/v2.0/devicecode"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "device_code": "dev-9",
                "user_code": "CODE",
                "verification_uri": "https://microsoft.com/devicelogin",
                "interval": 0
            })))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/organizations/oauth2/v2.0/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "authorization_declined",
                "error_description": "User declined"
            })))
            .mount(&server)
            .await;

        let credential = DeviceCodeCredential::new(reqwest::Client::new(), &server.uri(), None, None);
        let err = credential
            .get_token("https://api.securitycopilot.microsoft.com/.default")
            .await
            .unwrap_err();
        assert!(
            matches!(err, AuthError::Rejected { ref error, .. } if error == "authorization_declined")
        );
    }
}
