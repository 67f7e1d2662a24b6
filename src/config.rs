use std::path::PathBuf;

use rand::Rng;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchProvider {
    DuckDuckGo,
    Serper,
    Bing,
}

impl SearchProvider {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "duckduckgo" | "ddg" => Some(SearchProvider::DuckDuckGo),
            "serper" => Some(SearchProvider::Serper),
            "bing" => Some(SearchProvider::Bing),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub enabled: bool,
    pub provider: SearchProvider,
    pub serper_api_key: Option<String>,
    pub bing_api_key: Option<String>,
    pub max_results: usize,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub admin_username: String,
    pub admin_password: String,
    pub default_project_id: String,
    pub search: SearchConfig,
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn random_secret() -> String {
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(48)
        .map(char::from)
        .collect()
}

impl Config {
    pub fn from_env() -> AppResult<Self> {
        let data_dir = env_nonempty("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data"));

        let port = match env_nonempty("PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| AppError::Config(format!("invalid PORT value: {}", raw)))?,
            None => 8045,
        };

        let jwt_secret = env_nonempty("JWT_SECRET").unwrap_or_else(|| {
            info!("JWT_SECRET not set, generating a per-process secret");
            random_secret()
        });

        let admin_username = env_nonempty("ADMIN_USERNAME").unwrap_or_else(|| "admin".to_string());
        let admin_password = env_nonempty("ADMIN_PASSWORD").unwrap_or_else(|| {
            warn!(
                "ADMIN_PASSWORD not set, generated a random one for this run; \
                 set ADMIN_PASSWORD to make admin logins possible across restarts"
            );
            random_secret()
        });

        let search_enabled = env_nonempty("ENABLE_WEB_SEARCH")
            .and_then(|v| parse_env_bool(&v))
            .unwrap_or(false);
        let provider = env_nonempty("SEARCH_PROVIDER")
            .and_then(|v| {
                let parsed = SearchProvider::parse(&v);
                if parsed.is_none() {
                    warn!("[W-SEARCH-PROVIDER-INVALID] ignoring_invalid_search_provider: {}", v);
                }
                parsed
            })
            .unwrap_or(SearchProvider::DuckDuckGo);
        let max_results = env_nonempty("SEARCH_MAX_RESULTS")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(5);

        Ok(Config {
            data_dir,
            host: env_nonempty("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            jwt_secret,
            admin_username,
            admin_password,
            default_project_id: env_nonempty("DEFAULT_PROJECT_ID")
                .unwrap_or_else(|| crate::constants::DEFAULT_PROJECT_ID.to_string()),
            search: SearchConfig {
                enabled: search_enabled,
                provider,
                serper_api_key: env_nonempty("SERPER_API_KEY"),
                bing_api_key: env_nonempty("BING_API_KEY"),
                max_results,
            },
        })
    }

    pub fn accounts_path(&self) -> PathBuf {
        self.data_dir.join(crate::constants::ACCOUNTS_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_env_bool_accepts_common_spellings() {
        assert_eq!(parse_env_bool("1"), Some(true));
        assert_eq!(parse_env_bool("TRUE"), Some(true));
        assert_eq!(parse_env_bool(" off "), Some(false));
        assert_eq!(parse_env_bool("maybe"), None);
    }

    #[test]
    fn search_provider_parsing() {
        assert_eq!(SearchProvider::parse("serper"), Some(SearchProvider::Serper));
        assert_eq!(SearchProvider::parse("BING"), Some(SearchProvider::Bing));
        assert_eq!(SearchProvider::parse("ddg"), Some(SearchProvider::DuckDuckGo));
        assert_eq!(SearchProvider::parse("altavista"), None);
    }

    #[test]
    fn random_secret_is_long_enough_for_hs256() {
        assert!(random_secret().len() >= 32);
    }
}
