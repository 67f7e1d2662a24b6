use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::constants::{DEFAULT_COOLDOWN_SECS, MAX_DISPATCH_ATTEMPTS};
use crate::error::{AppError, AppResult};
use crate::pool::account::now_ms;
use crate::pool::AccountPool;
use crate::proxy::upstream::UpstreamClient;

pub struct DispatchSuccess {
    pub response: reqwest::Response,
    pub email: String,
    pub attempts: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureKind {
    Unauthorized,
    RateLimited,
    Transient,
}

fn classify(status: u16, body: &str) -> Option<FailureKind> {
    if status == 401 || body.contains("UNAUTHENTICATED") {
        return Some(FailureKind::Unauthorized);
    }
    if status == 429 || body.contains("RESOURCE_EXHAUSTED") {
        return Some(FailureKind::RateLimited);
    }
    if status >= 500 {
        return Some(FailureKind::Transient);
    }
    // Any remaining 4xx is the caller's problem, surfaced as-is.
    None
}

fn parse_retry_after(value: Option<&reqwest::header::HeaderValue>) -> u64 {
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_COOLDOWN_SECS)
}

// The retry loop tying pool and translator together. Rotates accounts on
// classified failures, commits to a stream once upstream answers 200, and
// never retries mid-stream.
pub async fn dispatch(
    pool: &AccountPool,
    upstream: &UpstreamClient,
    payload: &mut Value,
    streaming: bool,
    trace_id: &str,
) -> AppResult<DispatchSuccess> {
    let mut last_failure: Option<(FailureKind, String)> = None;

    for attempt in 0..MAX_DISPATCH_ATTEMPTS {
        // An empty pool on the first pass is a plain 503; once failures have
        // been classified, the final error reflects what actually happened.
        let account = match pool.select_next() {
            Ok(account) => account,
            Err(e) if last_failure.is_none() => return Err(e),
            Err(_) => break,
        };
        let email = account.email.clone();

        let token = match pool.get_token(&email).await {
            Ok(token) => token,
            Err(AppError::Unauthorized(msg)) => {
                debug!("[{}] Token refresh failed for {}: {}", trace_id, email, msg);
                last_failure = Some((FailureKind::Unauthorized, msg));
                continue;
            }
            Err(e) => {
                debug!("[{}] Transient token failure for {}: {}", trace_id, email, e);
                last_failure = Some((FailureKind::Transient, e.to_string()));
                continue;
            }
        };

        let project = pool.get_project(&email, &token).await?;
        payload["project"] = json!(project);

        let response = match upstream.call(&token, payload, streaming).await {
            Ok(response) => response,
            Err(e) => {
                warn!("[{}] Upstream transport error via {}: {}", trace_id, email, e);
                last_failure = Some((FailureKind::Transient, e.to_string()));
                continue;
            }
        };

        let status = response.status();
        if status.is_success() {
            info!(
                "[{}] Upstream 200 via {} (attempt {}/{})",
                trace_id,
                email,
                attempt + 1,
                MAX_DISPATCH_ATTEMPTS
            );
            return Ok(DispatchSuccess {
                response,
                email,
                attempts: attempt + 1,
            });
        }

        let retry_after = parse_retry_after(response.headers().get(reqwest::header::RETRY_AFTER));
        let body = response.text().await.unwrap_or_default();

        match classify(status.as_u16(), &body) {
            Some(FailureKind::Unauthorized) => {
                warn!("[{}] {} unauthorized upstream, rotating", trace_id, email);
                pool.mark_invalid(&email, "auth failed");
                last_failure = Some((FailureKind::Unauthorized, body));
            }
            Some(FailureKind::RateLimited) => {
                let reset_at = now_ms() + (retry_after as i64) * 1000;
                warn!(
                    "[{}] {} rate-limited for {}s, rotating",
                    trace_id, email, retry_after
                );
                pool.mark_rate_limited(&email, Some(reset_at));
                last_failure = Some((FailureKind::RateLimited, body));
            }
            Some(FailureKind::Transient) => {
                warn!(
                    "[{}] Upstream {} via {}: {}",
                    trace_id, status, email, body
                );
                last_failure = Some((FailureKind::Transient, body));
            }
            None => {
                debug!(
                    "[{}] Upstream client error {} via {}, surfacing",
                    trace_id, status, email
                );
                return Err(AppError::UpstreamClient {
                    status: status.as_u16(),
                    message: body,
                });
            }
        }
    }

    Err(match last_failure {
        Some((FailureKind::Unauthorized, msg)) => AppError::Unauthorized(format!(
            "all {} attempts unauthorized: {}",
            MAX_DISPATCH_ATTEMPTS, msg
        )),
        Some((FailureKind::RateLimited, msg)) => AppError::RateLimited(format!(
            "all {} attempts rate-limited: {}",
            MAX_DISPATCH_ATTEMPTS, msg
        )),
        Some((FailureKind::Transient, msg)) => AppError::UpstreamTransient(format!(
            "all {} attempts failed: {}",
            MAX_DISPATCH_ATTEMPTS, msg
        )),
        None => AppError::Internal("dispatch exhausted without classification".to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::account::Account;
    use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::post, Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::net::TcpListener;

    fn healthy(email: &str) -> Account {
        let mut account = Account::new(
            email.to_string(),
            format!("tok-{}", email),
            now_ms() + 3_600_000,
        );
        account.project_id = Some("proj-test".to_string());
        account
    }

    async fn start_upstream(
        handler: axum::routing::MethodRouter<Arc<AtomicUsize>>,
    ) -> (String, Arc<AtomicUsize>, tokio::task::JoinHandle<()>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route("/*rest", handler)
            .with_state(hits.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/v1internal", addr), hits, server)
    }

    fn pool_of(accounts: Vec<Account>) -> AccountPool {
        let dir = tempfile::tempdir().unwrap();
        let pool =
            AccountPool::new(dir.path().join("accounts.json"), "proj-test".into()).unwrap();
        for account in accounts {
            pool.add_or_replace(account).unwrap();
        }
        std::mem::forget(dir);
        pool
    }

    #[tokio::test]
    async fn rate_limited_account_rotates_to_healthy_one() {
        async fn handler(State(hits): State<Arc<AtomicUsize>>) -> axum::response::Response {
            let n = hits.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    [("Retry-After", "120")],
                    "RESOURCE_EXHAUSTED",
                )
                    .into_response()
            } else {
                Json(serde_json::json!({"candidates": []})).into_response()
            }
        }

        let (base, hits, server) = start_upstream(post(handler)).await;
        let pool = pool_of(vec![healthy("a@t"), healthy("b@t")]);
        let upstream = UpstreamClient::with_bases(vec![base]).unwrap();

        let mut payload = serde_json::json!({"project": "", "request": {}});
        let success = dispatch(&pool, &upstream, &mut payload, false, "test")
            .await
            .unwrap();
        assert_eq!(success.attempts, 2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        // One account cooled down with the advertised Retry-After, the other
        // took the traffic.
        let status = pool.status();
        let limited: Vec<_> = status
            .accounts
            .iter()
            .filter(|a| a.is_rate_limited)
            .collect();
        assert_eq!(limited.len(), 1);
        let reset = limited[0].rate_limit_reset_at.unwrap();
        let delta = reset - now_ms();
        assert!(delta > 110_000 && delta <= 121_000, "delta: {}", delta);
        server.abort();
    }

    #[tokio::test]
    async fn all_accounts_invalid_returns_503_without_upstream_call() {
        async fn handler(State(hits): State<Arc<AtomicUsize>>) -> Json<serde_json::Value> {
            hits.fetch_add(1, Ordering::SeqCst);
            Json(serde_json::json!({"candidates": []}))
        }

        let (base, hits, server) = start_upstream(post(handler)).await;
        let pool = pool_of(vec![healthy("a@t"), healthy("b@t")]);
        pool.mark_invalid("a@t", "auth failed");
        pool.mark_invalid("b@t", "auth failed");
        let upstream = UpstreamClient::with_bases(vec![base]).unwrap();

        let mut payload = serde_json::json!({"project": "", "request": {}});
        let result = dispatch(&pool, &upstream, &mut payload, false, "test").await;
        assert!(matches!(result, Err(AppError::NoAccountsAvailable(_))));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        server.abort();
    }

    #[tokio::test]
    async fn upstream_401_marks_account_invalid_and_rotates() {
        async fn handler(State(hits): State<Arc<AtomicUsize>>) -> axum::response::Response {
            let n = hits.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                (StatusCode::UNAUTHORIZED, "UNAUTHENTICATED").into_response()
            } else {
                Json(serde_json::json!({"candidates": []})).into_response()
            }
        }

        let (base, _hits, server) = start_upstream(post(handler)).await;
        let pool = pool_of(vec![healthy("a@t"), healthy("b@t")]);
        let upstream = UpstreamClient::with_bases(vec![base]).unwrap();

        let mut payload = serde_json::json!({"project": "", "request": {}});
        let success = dispatch(&pool, &upstream, &mut payload, false, "test")
            .await
            .unwrap();
        assert_eq!(success.attempts, 2);
        let status = pool.status();
        assert_eq!(status.invalid, 1);
        let invalid = status.accounts.iter().find(|a| a.is_invalid).unwrap();
        assert_eq!(invalid.invalid_reason.as_deref(), Some("auth failed"));
        server.abort();
    }

    #[tokio::test]
    async fn non_retryable_4xx_surfaces_immediately() {
        async fn handler(State(hits): State<Arc<AtomicUsize>>) -> axum::response::Response {
            hits.fetch_add(1, Ordering::SeqCst);
            (StatusCode::BAD_REQUEST, "malformed request").into_response()
        }

        let (base, hits, server) = start_upstream(post(handler)).await;
        let pool = pool_of(vec![healthy("a@t"), healthy("b@t")]);
        let upstream = UpstreamClient::with_bases(vec![base]).unwrap();

        let mut payload = serde_json::json!({"project": "", "request": {}});
        let result = dispatch(&pool, &upstream, &mut payload, false, "test").await;
        match result {
            Err(AppError::UpstreamClient { status, message }) => {
                assert_eq!(status, 400);
                assert_eq!(message, "malformed request");
            }
            other => panic!("expected UpstreamClient, got {:?}", other.err()),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        server.abort();
    }

    #[tokio::test]
    async fn persistent_429_exhausts_attempts_as_rate_limited() {
        async fn handler(State(hits): State<Arc<AtomicUsize>>) -> axum::response::Response {
            hits.fetch_add(1, Ordering::SeqCst);
            (StatusCode::TOO_MANY_REQUESTS, "RESOURCE_EXHAUSTED").into_response()
        }

        let (base, _hits, server) = start_upstream(post(handler)).await;
        // A single account: after the first 429 it cools down and the loop
        // runs out of eligible accounts.
        let pool = pool_of(vec![healthy("solo@t")]);
        let upstream = UpstreamClient::with_bases(vec![base]).unwrap();

        let mut payload = serde_json::json!({"project": "", "request": {}});
        let result = dispatch(&pool, &upstream, &mut payload, false, "test").await;
        assert!(matches!(result, Err(AppError::RateLimited(_))));
        server.abort();
    }

    #[tokio::test]
    async fn project_is_substituted_into_payload() {
        async fn handler(State(_): State<Arc<AtomicUsize>>) -> Json<serde_json::Value> {
            Json(serde_json::json!({"candidates": []}))
        }

        let (base, _hits, server) = start_upstream(post(handler)).await;
        let pool = pool_of(vec![healthy("a@t")]);
        let upstream = UpstreamClient::with_bases(vec![base]).unwrap();

        let mut payload = serde_json::json!({"project": "", "request": {}});
        dispatch(&pool, &upstream, &mut payload, false, "test")
            .await
            .unwrap();
        assert_eq!(payload["project"], "proj-test");
        server.abort();
    }
}
