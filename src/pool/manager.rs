use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::constants::{
    CONNECT_TIMEOUT, MAX_ACCOUNTS, OAUTH_TOKEN_ENDPOINT, UPSTREAM_FALLBACK, UPSTREAM_PRIMARY,
};
use crate::error::{AppError, AppResult};
use crate::pool::account::{now_ms, Account, AccountSource, AccountStatus, PoolStatus};
use crate::pool::{persistence, refresh};

pub struct AccountPool {
    accounts: RwLock<Vec<Account>>,
    cursor: AtomicUsize,
    // Serializes token refreshes per account (at most one RPC in flight).
    refresh_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    data_path: PathBuf,
    save_notify: Arc<Notify>,
    http: reqwest::Client,
    default_project_id: String,
    token_endpoint: String,
    upstream_bases: Vec<String>,
    cancel: CancellationToken,
}

impl AccountPool {
    pub fn new(data_path: PathBuf, default_project_id: String) -> AppResult<Self> {
        Self::with_endpoints(
            data_path,
            default_project_id,
            OAUTH_TOKEN_ENDPOINT.to_string(),
            vec![UPSTREAM_PRIMARY.to_string(), UPSTREAM_FALLBACK.to_string()],
        )
    }

    pub fn with_endpoints(
        data_path: PathBuf,
        default_project_id: String,
        token_endpoint: String,
        upstream_bases: Vec<String>,
    ) -> AppResult<Self> {
        let accounts = persistence::load(&data_path)?;
        if !accounts.is_empty() {
            info!("Loaded {} account(s) from {:?}", accounts.len(), data_path);
        }
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| AppError::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(AccountPool {
            accounts: RwLock::new(accounts),
            cursor: AtomicUsize::new(0),
            refresh_locks: DashMap::new(),
            data_path,
            save_notify: Arc::new(Notify::new()),
            http,
            default_project_id,
            token_endpoint,
            upstream_bases,
            cancel: CancellationToken::new(),
        })
    }

    // Single serializing writer: every mutation calls mark_dirty(), the task
    // snapshots and writes. Notify collapses bursts, so a save triggered
    // during another save coalesces into one trailing write.
    pub fn spawn_writer(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = pool.save_notify.notified() => {
                        pool.write_snapshot();
                    }
                    _ = pool.cancel.cancelled() => {
                        pool.write_snapshot();
                        debug!("Account writer stopped");
                        break;
                    }
                }
            }
        })
    }

    fn write_snapshot(&self) {
        let snapshot = self.accounts.read().clone();
        if let Err(e) = persistence::write_atomic(&self.data_path, &snapshot) {
            warn!("Failed to persist account pool: {}", e);
        }
    }

    fn mark_dirty(&self) {
        self.save_notify.notify_one();
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn len(&self) -> usize {
        self.accounts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.read().is_empty()
    }

    fn get(&self, email: &str) -> AppResult<Account> {
        self.accounts
            .read()
            .iter()
            .find(|a| a.email == email)
            .cloned()
            .ok_or_else(|| AppError::Internal(format!("unknown account: {}", email)))
    }

    // Round-robin over eligible accounts: the oldest last_used_at goes first,
    // the rotation cursor breaks ties among equally-old entries. Accounts
    // whose cooldown has lapsed heal here, without operator intervention.
    pub fn select_next(&self) -> AppResult<Account> {
        let now = now_ms();
        let mut healed = false;
        let selected = {
            let mut accounts = self.accounts.write();
            for account in accounts.iter_mut() {
                if account.is_rate_limited && account.cooldown_expired(now) {
                    debug!("Cooldown lapsed for {}, back in rotation", account.email);
                    account.is_rate_limited = false;
                    account.rate_limit_reset_at = None;
                    healed = true;
                }
            }

            let candidates: Vec<usize> = accounts
                .iter()
                .enumerate()
                .filter(|(_, a)| a.is_eligible(now))
                .map(|(i, _)| i)
                .collect();

            if candidates.is_empty() {
                let total = accounts.len();
                let invalid = accounts.iter().filter(|a| a.is_invalid).count();
                drop(accounts);
                if healed {
                    self.mark_dirty();
                }
                return Err(AppError::NoAccountsAvailable(format!(
                    "{} account(s): {} invalid, {} cooling down",
                    total,
                    invalid,
                    total - invalid
                )));
            }

            let oldest = candidates
                .iter()
                .map(|&i| accounts[i].last_used_at)
                .min()
                .unwrap_or(0);
            let tied: Vec<usize> = candidates
                .iter()
                .copied()
                .filter(|&i| accounts[i].last_used_at == oldest)
                .collect();
            let pick = tied[self.cursor.fetch_add(1, Ordering::SeqCst) % tied.len()];

            accounts[pick].last_used_at = now;
            accounts[pick].clone()
        };

        self.mark_dirty();
        debug!("Selected account {}", selected.email);
        Ok(selected)
    }

    // Returns a valid access token, refreshing when inside the expiry safety
    // window. Refreshes for the same account are serialized; waiters pick up
    // the refreshed token on the double-check instead of issuing another RPC.
    pub async fn get_token(&self, email: &str) -> AppResult<String> {
        let account = self.get(email)?;
        if account.token_fresh(now_ms()) {
            return Ok(account.access_token);
        }
        if account.refresh_token.is_none() {
            self.mark_invalid(email, "access token expired with no refresh token");
            return Err(AppError::Unauthorized(format!(
                "account {} has an expired token and no refresh_token",
                email
            )));
        }
        self.refresh_token_for(email, false).await
    }

    async fn refresh_token_for(&self, email: &str, force: bool) -> AppResult<String> {
        let lock = self
            .refresh_locks
            .entry(email.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Another waiter may have finished the refresh while we queued.
        let account = self.get(email)?;
        if !force && account.token_fresh(now_ms()) {
            return Ok(account.access_token);
        }
        let refresh_token = account.refresh_token.clone().ok_or_else(|| {
            AppError::Unauthorized(format!("account {} has no refresh_token", email))
        })?;

        match refresh::refresh_access_token(&self.http, &self.token_endpoint, &refresh_token).await
        {
            Ok(token) => {
                let expires_at = now_ms() + token.expires_in * 1000;
                {
                    let mut accounts = self.accounts.write();
                    if let Some(a) = accounts.iter_mut().find(|a| a.email == email) {
                        a.access_token = token.access_token.clone();
                        a.access_token_expires_at = expires_at;
                        if let Some(new_refresh) = &token.refresh_token {
                            a.refresh_token = Some(new_refresh.clone());
                        }
                    }
                }
                self.mark_dirty();
                info!("Refreshed access token for {}", email);
                Ok(token.access_token)
            }
            Err(AppError::Unauthorized(msg)) => {
                self.mark_invalid(email, "refresh failed");
                Err(AppError::Unauthorized(msg))
            }
            Err(e) => {
                // Transient: leave the account untouched, caller rotates.
                Err(e)
            }
        }
    }

    // Stored project id, then upstream discovery (cached + persisted), then
    // the configured default.
    pub async fn get_project(&self, email: &str, access_token: &str) -> AppResult<String> {
        let account = self.get(email)?;
        if let Some(project) = account.project_id.filter(|p| !p.is_empty()) {
            return Ok(project);
        }

        match refresh::discover_project(&self.http, &self.upstream_bases, access_token).await {
            Ok(project) => {
                {
                    let mut accounts = self.accounts.write();
                    if let Some(a) = accounts.iter_mut().find(|a| a.email == email) {
                        a.project_id = Some(project.clone());
                    }
                }
                self.mark_dirty();
                info!("Discovered project {} for {}", project, email);
                Ok(project)
            }
            Err(e) => {
                warn!(
                    "Project discovery failed for {} ({}), using default project",
                    email, e
                );
                Ok(self.default_project_id.clone())
            }
        }
    }

    // Sets the cooldown; never shortens one that already reaches further.
    // `reset_at == None` is an indefinite cooldown clearable only by an
    // operator.
    pub fn mark_rate_limited(&self, email: &str, reset_at: Option<i64>) {
        {
            let mut accounts = self.accounts.write();
            let Some(a) = accounts.iter_mut().find(|a| a.email == email) else {
                return;
            };
            let merged = if a.is_rate_limited {
                match (a.rate_limit_reset_at, reset_at) {
                    (None, _) | (_, None) => None,
                    (Some(old), Some(new)) => Some(old.max(new)),
                }
            } else {
                reset_at
            };
            a.is_rate_limited = true;
            a.rate_limit_reset_at = merged;
            info!(
                "Account {} rate-limited until {:?}",
                email,
                merged.map(|ms| chrono::DateTime::from_timestamp_millis(ms))
            );
        }
        self.mark_dirty();
    }

    pub fn mark_invalid(&self, email: &str, reason: &str) {
        {
            let mut accounts = self.accounts.write();
            if let Some(a) = accounts.iter_mut().find(|a| a.email == email) {
                a.is_invalid = true;
                a.invalid_reason = Some(reason.to_string());
                warn!("Account {} marked invalid: {}", email, reason);
            }
        }
        self.mark_dirty();
    }

    // Clears the invalid flag and, for OAuth accounts with a refresh token,
    // proves the credential by forcing a refresh. A failed proof re-raises.
    pub async fn revalidate(&self, email: &str) -> AppResult<()> {
        let account = self.get(email)?;
        {
            let mut accounts = self.accounts.write();
            if let Some(a) = accounts.iter_mut().find(|a| a.email == email) {
                a.is_invalid = false;
                a.invalid_reason = None;
            }
        }
        self.mark_dirty();

        if account.source == AccountSource::Oauth && account.refresh_token.is_some() {
            self.refresh_token_for(email, true).await?;
        }
        info!("Account {} revalidated", email);
        Ok(())
    }

    pub fn clear_rate_limit(&self, email: &str) {
        {
            let mut accounts = self.accounts.write();
            if let Some(a) = accounts.iter_mut().find(|a| a.email == email) {
                a.is_rate_limited = false;
                a.rate_limit_reset_at = None;
            }
        }
        self.mark_dirty();
    }

    pub fn reset_all_rate_limits(&self) {
        {
            let mut accounts = self.accounts.write();
            for a in accounts.iter_mut() {
                a.is_rate_limited = false;
                a.rate_limit_reset_at = None;
            }
        }
        self.mark_dirty();
        info!("All rate limits cleared");
    }

    pub fn delete(&self, email: &str) -> bool {
        let removed = {
            let mut accounts = self.accounts.write();
            let before = accounts.len();
            accounts.retain(|a| a.email != email);
            accounts.len() != before
        };
        if removed {
            self.refresh_locks.remove(email);
            self.mark_dirty();
            info!("Account {} deleted", email);
        }
        removed
    }

    // Replacements by email are always allowed; net-new accounts respect the
    // pool capacity cap.
    pub fn add_or_replace(&self, account: Account) -> AppResult<()> {
        {
            let mut accounts = self.accounts.write();
            if let Some(existing) = accounts.iter_mut().find(|a| a.email == account.email) {
                *existing = account;
            } else {
                if accounts.len() >= MAX_ACCOUNTS {
                    return Err(AppError::CapacityExceeded(MAX_ACCOUNTS));
                }
                info!("Account {} added ({:?})", account.email, account.source);
                accounts.push(account);
            }
        }
        self.mark_dirty();
        Ok(())
    }

    pub fn import(&self, incoming: Vec<Account>, replace: bool) -> AppResult<usize> {
        if replace {
            if incoming.len() > MAX_ACCOUNTS {
                return Err(AppError::CapacityExceeded(MAX_ACCOUNTS));
            }
            let count = incoming.len();
            *self.accounts.write() = incoming;
            self.refresh_locks.clear();
            self.mark_dirty();
            return Ok(count);
        }
        let mut merged = 0;
        for account in incoming {
            self.add_or_replace(account)?;
            merged += 1;
        }
        Ok(merged)
    }

    // Drops every cached access token so the next use forces a refresh.
    pub fn clear_all_token_caches(&self) {
        {
            let mut accounts = self.accounts.write();
            for a in accounts.iter_mut() {
                a.access_token_expires_at = 0;
            }
        }
        self.mark_dirty();
        info!("All cached access tokens invalidated");
    }

    pub fn snapshot(&self) -> Vec<Account> {
        self.accounts.read().clone()
    }

    pub fn status(&self) -> PoolStatus {
        let now = now_ms();
        let accounts = self.accounts.read();
        let total = accounts.len();
        let invalid = accounts.iter().filter(|a| a.is_invalid).count();
        let rate_limited = accounts
            .iter()
            .filter(|a| !a.is_invalid && a.is_rate_limited && !a.cooldown_expired(now))
            .count();
        let available = accounts.iter().filter(|a| a.is_eligible(now)).count();
        PoolStatus {
            total,
            available,
            rate_limited,
            invalid,
            summary: format!(
                "{}/{} available, {} rate-limited, {} invalid",
                available, total, rate_limited, invalid
            ),
            accounts: accounts.iter().map(AccountStatus::from).collect(),
        }
    }

    // Force-refresh every account that can be refreshed; reports per-account
    // outcomes without short-circuiting.
    pub async fn refresh_all(&self) -> Vec<(String, Result<(), String>)> {
        let emails: Vec<String> = self
            .snapshot()
            .into_iter()
            .filter(|a| a.refresh_token.is_some())
            .map(|a| a.email)
            .collect();

        let mut results = Vec::with_capacity(emails.len());
        for email in emails {
            let outcome = self
                .refresh_token_for(&email, true)
                .await
                .map(|_| ())
                .map_err(|e| e.to_string());
            results.push((email, outcome));
        }
        results
    }
}
