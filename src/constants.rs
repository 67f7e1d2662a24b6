use std::sync::LazyLock;
use std::time::Duration;

pub const UPSTREAM_PRIMARY: &str = "https://daily-cloudcode-pa.sandbox.googleapis.com/v1internal";
pub const UPSTREAM_FALLBACK: &str = "https://cloudcode-pa.googleapis.com/v1internal";

pub const OAUTH_TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
pub const OAUTH_CLIENT_ID: &str =
    "1071006060591-tmhssin2h21lcre235vtolojh4g403ep.apps.googleusercontent.com";
pub const OAUTH_CLIENT_SECRET: &str = "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";

pub const API_CLIENT_HEADER: &str = "google-cloud-sdk vscode_cloudshelleditor/0.1";

pub static USER_AGENT: LazyLock<String> = LazyLock::new(|| {
    format!(
        "antigravity/1.11.5 {}/{}",
        std::env::consts::OS,
        std::env::consts::ARCH
    )
});

pub static CLIENT_METADATA: LazyLock<String> = LazyLock::new(|| {
    serde_json::json!({
        "ideType": "IDE_UNSPECIFIED",
        "platform": "PLATFORM_UNSPECIFIED",
        "pluginType": "GEMINI"
    })
    .to_string()
});

pub const MAX_ACCOUNTS: usize = 10;
pub const MAX_DISPATCH_ATTEMPTS: usize = 5;
pub const DEFAULT_COOLDOWN_SECS: u64 = 60;
// Refresh early rather than racing the expiry on the wire.
pub const TOKEN_EXPIRY_SAFETY_MS: i64 = 60_000;

pub const REFRESH_TIMEOUT: Duration = Duration::from_secs(30);
pub const UNARY_TIMEOUT: Duration = Duration::from_secs(120);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

pub const SIGNATURE_TTL: Duration = Duration::from_secs(2 * 60 * 60);
pub const SIGNATURE_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const MIN_SIGNATURE_LENGTH: usize = 50;
pub const SKIP_SIGNATURE_SENTINEL: &str = "skip_thought_signature_validator";

pub const TOOL_NAME_TTL: Duration = Duration::from_secs(30 * 60);
pub const TOOL_NAME_SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);
pub const TOOL_NAME_CACHE_LIMIT: usize = 512;
pub const MAX_TOOL_NAME_LENGTH: usize = 128;

pub const HAIKU_REDIRECT_MODEL: &str = "gemini-2.5-flash-lite";
pub const GEMINI_MAX_OUTPUT_TOKENS: u64 = 16_384;

pub const DEFAULT_PROJECT_ID: &str = "cloud-code-default";

pub const ACCOUNTS_FILE: &str = "accounts.json";
pub const STORE_VERSION: &str = "1.0";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agent_carries_os_and_arch() {
        assert!(USER_AGENT.starts_with("antigravity/1.11.5 "));
        assert!(USER_AGENT.contains(std::env::consts::OS));
        assert!(USER_AGENT.ends_with(std::env::consts::ARCH));
    }

    #[test]
    fn client_metadata_is_valid_json() {
        let parsed: serde_json::Value = serde_json::from_str(&CLIENT_METADATA).unwrap();
        assert_eq!(parsed["pluginType"], "GEMINI");
        assert_eq!(parsed["ideType"], "IDE_UNSPECIFIED");
    }
}
