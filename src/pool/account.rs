use serde::{Deserialize, Serialize};

use crate::constants::TOKEN_EXPIRY_SAFETY_MS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountSource {
    Oauth,
    Manual,
    Import,
    Legacy,
}

impl Default for AccountSource {
    fn default() -> Self {
        AccountSource::Oauth
    }
}

// One upstream credential plus health and bookkeeping flags.
// `email` is the primary key within the pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub email: String,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    // Epoch milliseconds.
    pub access_token_expires_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default)]
    pub source: AccountSource,
    #[serde(default)]
    pub is_rate_limited: bool,
    #[serde(default)]
    pub rate_limit_reset_at: Option<i64>,
    #[serde(default)]
    pub is_invalid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<String>,
    pub added_at: i64,
    #[serde(default)]
    pub last_used_at: i64,
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl Account {
    pub fn new(email: String, access_token: String, expires_at: i64) -> Self {
        Account {
            email,
            access_token,
            refresh_token: None,
            access_token_expires_at: expires_at,
            project_id: None,
            source: AccountSource::Oauth,
            is_rate_limited: false,
            rate_limit_reset_at: None,
            is_invalid: false,
            invalid_reason: None,
            added_at: now_ms(),
            last_used_at: 0,
        }
    }

    // Rate-limit cooldown has lapsed (an indefinite cooldown never lapses).
    pub fn cooldown_expired(&self, now: i64) -> bool {
        match self.rate_limit_reset_at {
            Some(reset) => now > reset,
            None => false,
        }
    }

    pub fn is_eligible(&self, now: i64) -> bool {
        if self.is_invalid {
            return false;
        }
        !self.is_rate_limited || self.cooldown_expired(now)
    }

    pub fn token_fresh(&self, now: i64) -> bool {
        self.access_token_expires_at - now > TOKEN_EXPIRY_SAFETY_MS
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountStatus {
    pub email: String,
    pub source: AccountSource,
    pub is_rate_limited: bool,
    pub rate_limit_reset_at: Option<i64>,
    pub is_invalid: bool,
    pub invalid_reason: Option<String>,
    pub has_refresh_token: bool,
    pub added_at: i64,
    pub last_used_at: i64,
}

impl From<&Account> for AccountStatus {
    fn from(a: &Account) -> Self {
        AccountStatus {
            email: a.email.clone(),
            source: a.source,
            is_rate_limited: a.is_rate_limited,
            rate_limit_reset_at: a.rate_limit_reset_at,
            is_invalid: a.is_invalid,
            invalid_reason: a.invalid_reason.clone(),
            has_refresh_token: a.refresh_token.is_some(),
            added_at: a.added_at,
            last_used_at: a.last_used_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub total: usize,
    pub available: usize,
    pub rate_limited: usize,
    pub invalid: usize,
    pub summary: String,
    pub accounts: Vec<AccountStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> Account {
        Account::new("a@test".into(), "tok".into(), now_ms() + 3_600_000)
    }

    #[test]
    fn fresh_token_respects_safety_window() {
        let now = now_ms();
        let mut a = account();
        a.access_token_expires_at = now + TOKEN_EXPIRY_SAFETY_MS + 1_000;
        assert!(a.token_fresh(now));
        a.access_token_expires_at = now + TOKEN_EXPIRY_SAFETY_MS - 1_000;
        assert!(!a.token_fresh(now));
    }

    #[test]
    fn cooldown_heals_after_reset_passes() {
        let now = now_ms();
        let mut a = account();
        a.is_rate_limited = true;
        a.rate_limit_reset_at = Some(now + 60_000);
        assert!(!a.is_eligible(now));
        assert!(a.is_eligible(now + 61_000));
    }

    #[test]
    fn indefinite_cooldown_never_heals() {
        let now = now_ms();
        let mut a = account();
        a.is_rate_limited = true;
        a.rate_limit_reset_at = None;
        assert!(!a.is_eligible(now + i64::from(u32::MAX)));
    }

    #[test]
    fn invalid_account_is_never_eligible() {
        let now = now_ms();
        let mut a = account();
        a.is_invalid = true;
        a.invalid_reason = Some("refresh failed".into());
        assert!(!a.is_eligible(now));
    }

    #[test]
    fn serde_defaults_tolerate_minimal_records() {
        let raw = r#"{
            "email": "x@test",
            "access_token": "t",
            "access_token_expires_at": 0,
            "added_at": 1
        }"#;
        let a: Account = serde_json::from_str(raw).unwrap();
        assert_eq!(a.source, AccountSource::Oauth);
        assert!(!a.is_rate_limited);
        assert_eq!(a.last_used_at, 0);
    }
}
