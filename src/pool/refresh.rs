use serde::Deserialize;
use serde_json::json;

use crate::constants::{
    CLIENT_METADATA, OAUTH_CLIENT_ID, OAUTH_CLIENT_SECRET, REFRESH_TIMEOUT, USER_AGENT,
};
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: i64,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

// Exchange a refresh token for a fresh access token. HTTP 400/401 means the
// grant itself is dead and the caller must invalidate the account; anything
// else is transient.
pub async fn refresh_access_token(
    client: &reqwest::Client,
    token_endpoint: &str,
    refresh_token: &str,
) -> AppResult<TokenResponse> {
    let response = client
        .post(token_endpoint)
        .timeout(REFRESH_TIMEOUT)
        .form(&[
            ("client_id", OAUTH_CLIENT_ID),
            ("client_secret", OAUTH_CLIENT_SECRET),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ])
        .send()
        .await?;

    let status = response.status();
    if status.is_success() {
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AppError::UpstreamTransient(format!("malformed token response: {}", e)))?;
        return Ok(token);
    }

    let body = response.text().await.unwrap_or_default();
    if status.as_u16() == 400 || status.as_u16() == 401 {
        tracing::warn!("Token refresh rejected ({}): {}", status, body);
        Err(AppError::Unauthorized(format!(
            "refresh failed ({}): {}",
            status, body
        )))
    } else {
        Err(AppError::UpstreamTransient(format!(
            "token endpoint returned {}: {}",
            status, body
        )))
    }
}

// Ask Cloud Code which GCP project backs this credential. Walks the endpoint
// list, moving to the next base only on network error.
pub async fn discover_project(
    client: &reqwest::Client,
    bases: &[String],
    access_token: &str,
) -> AppResult<String> {
    let body = json!({
        "metadata": {
            "ideType": "IDE_UNSPECIFIED",
            "platform": "PLATFORM_UNSPECIFIED",
            "pluginType": "GEMINI"
        }
    });

    let mut last_err: Option<AppError> = None;
    for base in bases {
        let url = format!("{}:loadCodeAssist", base);
        let result = client
            .post(&url)
            .timeout(REFRESH_TIMEOUT)
            .bearer_auth(access_token)
            .header("User-Agent", USER_AGENT.as_str())
            .header("Client-Metadata", CLIENT_METADATA.as_str())
            .json(&body)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => {
                let payload: serde_json::Value = resp.json().await.map_err(|e| {
                    AppError::UpstreamTransient(format!("malformed loadCodeAssist response: {}", e))
                })?;
                if let Some(project) = payload
                    .get("cloudaicompanionProject")
                    .and_then(|v| v.as_str())
                    .filter(|s| !s.is_empty())
                {
                    return Ok(project.to_string());
                }
                return Err(AppError::UpstreamTransient(
                    "loadCodeAssist response carried no project".to_string(),
                ));
            }
            Ok(resp) => {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_default();
                return Err(AppError::UpstreamTransient(format!(
                    "project discovery returned {}: {}",
                    status, text
                )));
            }
            Err(e) => {
                tracing::debug!("Project discovery failed at {}: {}", base, e);
                last_err = Some(e.into());
            }
        }
    }

    Err(last_err
        .unwrap_or_else(|| AppError::UpstreamTransient("project discovery failed".to_string())))
}
