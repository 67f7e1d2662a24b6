use serde_json::Value;

use crate::constants::{
    API_CLIENT_HEADER, CLIENT_METADATA, CONNECT_TIMEOUT, UNARY_TIMEOUT, UPSTREAM_FALLBACK,
    UPSTREAM_PRIMARY, USER_AGENT,
};
use crate::error::{AppError, AppResult};

pub const METHOD_GENERATE: &str = "generateContent";
pub const METHOD_STREAM: &str = "streamGenerateContent";

// Builds the native HTTP call: fixed identity headers, primary endpoint with
// one fallback retry on network error, unary or SSE method.
pub struct UpstreamClient {
    client: reqwest::Client,
    base_urls: Vec<String>,
}

impl UpstreamClient {
    pub fn new() -> AppResult<Self> {
        Self::with_bases(vec![
            UPSTREAM_PRIMARY.to_string(),
            UPSTREAM_FALLBACK.to_string(),
        ])
    }

    pub fn with_bases(base_urls: Vec<String>) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| AppError::Internal(format!("failed to build upstream client: {}", e)))?;
        Ok(UpstreamClient { client, base_urls })
    }

    fn build_url(base: &str, method: &str, query: Option<&str>) -> String {
        match query {
            Some(qs) => format!("{}:{}?{}", base, method, qs),
            None => format!("{}:{}", base, method),
        }
    }

    // Returns whatever HTTP response the upstream produced; classification is
    // the dispatcher's job. Only a transport-level failure moves to the next
    // base, and only once.
    pub async fn call(
        &self,
        access_token: &str,
        payload: &Value,
        streaming: bool,
    ) -> AppResult<reqwest::Response> {
        let (method, query) = if streaming {
            (METHOD_STREAM, Some("alt=sse"))
        } else {
            (METHOD_GENERATE, None)
        };

        let mut last_err: Option<AppError> = None;
        for (idx, base) in self.base_urls.iter().enumerate() {
            let url = Self::build_url(base, method, query);
            let mut request = self
                .client
                .post(&url)
                .bearer_auth(access_token)
                .header("User-Agent", USER_AGENT.as_str())
                .header("X-Goog-Api-Client", API_CLIENT_HEADER)
                .header("Client-Metadata", CLIENT_METADATA.as_str())
                .json(payload);
            // Streaming bodies outlive any sane total timeout; reads are
            // bounded downstream by the idle tick instead.
            if !streaming {
                request = request.timeout(UNARY_TIMEOUT);
            }

            match request.send().await {
                Ok(response) => {
                    if idx > 0 {
                        tracing::info!("Upstream fallback endpoint answered: {}", base);
                    }
                    return Ok(response);
                }
                Err(e) => {
                    tracing::debug!("Upstream request failed at {}: {}", base, e);
                    last_err = Some(e.into());
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| AppError::UpstreamTransient("no upstream endpoints".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, http::HeaderMap, routing::post, Json, Router};
    use serde_json::json;
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tokio::sync::Mutex as AsyncMutex;

    #[test]
    fn build_url_matches_upstream_shapes() {
        assert_eq!(
            UpstreamClient::build_url(
                "https://cloudcode-pa.googleapis.com/v1internal",
                METHOD_GENERATE,
                None
            ),
            "https://cloudcode-pa.googleapis.com/v1internal:generateContent"
        );
        assert_eq!(
            UpstreamClient::build_url(
                "https://cloudcode-pa.googleapis.com/v1internal",
                METHOD_STREAM,
                Some("alt=sse")
            ),
            "https://cloudcode-pa.googleapis.com/v1internal:streamGenerateContent?alt=sse"
        );
    }

    #[derive(Clone, Default)]
    struct Captured {
        headers: Arc<AsyncMutex<Vec<(String, String)>>>,
    }

    async fn capture(
        State(state): State<Captured>,
        headers: HeaderMap,
        Json(_body): Json<serde_json::Value>,
    ) -> Json<serde_json::Value> {
        let mut out = Vec::new();
        for (name, value) in &headers {
            out.push((
                name.as_str().to_string(),
                value.to_str().unwrap_or_default().to_string(),
            ));
        }
        *state.headers.lock().await = out;
        Json(json!({"candidates": []}))
    }

    #[tokio::test]
    async fn required_headers_ride_every_call() {
        let state = Captured::default();
        let app = Router::new()
            .route("/v1internal:generateContent", post(capture))
            .with_state(state.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client =
            UpstreamClient::with_bases(vec![format!("http://{}/v1internal", addr)]).unwrap();
        let response = client
            .call("token-abc", &json!({"request": {}}), false)
            .await
            .unwrap();
        assert!(response.status().is_success());

        let captured = state.headers.lock().await.clone();
        server.abort();
        let find = |name: &str| {
            captured
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.clone())
        };
        assert_eq!(find("authorization"), Some("Bearer token-abc".to_string()));
        assert_eq!(find("x-goog-api-client"), Some(API_CLIENT_HEADER.to_string()));
        assert_eq!(find("client-metadata"), Some(CLIENT_METADATA.to_string()));
        assert_eq!(find("user-agent"), Some(USER_AGENT.to_string()));
    }

    #[tokio::test]
    async fn network_error_falls_back_to_second_base() {
        async fn ok() -> Json<serde_json::Value> {
            Json(json!({"candidates": []}))
        }
        let app = Router::new().route("/v1internal:generateContent", post(ok));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // First base points at a closed port; the call must succeed via the
        // fallback.
        let client = UpstreamClient::with_bases(vec![
            "http://127.0.0.1:9/v1internal".to_string(),
            format!("http://{}/v1internal", addr),
        ])
        .unwrap();
        let response = client.call("t", &json!({}), false).await.unwrap();
        assert!(response.status().is_success());
        server.abort();
    }

    #[tokio::test]
    async fn http_errors_are_returned_not_retried() {
        use axum::http::StatusCode;
        async fn not_found() -> (StatusCode, &'static str) {
            (StatusCode::NOT_FOUND, "no such model")
        }
        let app = Router::new().route("/v1internal:generateContent", post(not_found));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client =
            UpstreamClient::with_bases(vec![format!("http://{}/v1internal", addr)]).unwrap();
        let response = client.call("t", &json!({}), false).await.unwrap();
        assert_eq!(response.status().as_u16(), 404);
        server.abort();
    }
}
