use once_cell::sync::Lazy;
use regex::Regex;

use crate::constants::HAIKU_REDIRECT_MODEL;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    Claude,
    Gemini,
    Unknown,
}

static DATE_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-\d{8}$").expect("invalid date-suffix regex"));

static GEMINI_MAJOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"gemini-(\d+)").expect("invalid gemini version regex"));

pub fn family_of(model: &str) -> ModelFamily {
    let lower = model.to_ascii_lowercase();
    if lower.contains("claude") {
        ModelFamily::Claude
    } else if lower.contains("gemini") {
        ModelFamily::Gemini
    } else {
        ModelFamily::Unknown
    }
}

// Strips a trailing `-YYYYMMDD` pin and redirects haiku-class requests onto
// the flash-lite tier.
pub fn normalize_model(model: &str) -> String {
    let stripped = DATE_SUFFIX.replace(model, "").to_string();
    if stripped.to_ascii_lowercase().contains("haiku") {
        return HAIKU_REDIRECT_MODEL.to_string();
    }
    stripped
}

// Thinking-capable: claude models opt in by name; gemini models opt in by
// name or by major version (gemini-3 and later always think).
pub fn supports_thinking(model: &str) -> bool {
    let lower = model.to_ascii_lowercase();
    match family_of(&lower) {
        ModelFamily::Claude => lower.contains("thinking"),
        ModelFamily::Gemini => {
            if lower.contains("thinking") {
                return true;
            }
            GEMINI_MAJOR
                .captures(&lower)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<u32>().ok())
                .map(|major| major >= 3)
                .unwrap_or(false)
        }
        ModelFamily::Unknown => false,
    }
}

pub fn cap_max_output_tokens(model: &str, requested: Option<u64>) -> Option<u64> {
    match family_of(model) {
        ModelFamily::Gemini => Some(
            requested
                .unwrap_or(crate::constants::GEMINI_MAX_OUTPUT_TOKENS)
                .min(crate::constants::GEMINI_MAX_OUTPUT_TOKENS),
        ),
        _ => requested,
    }
}

// reasoning_effort → thinking budget (OpenAI inbound only).
pub fn thinking_budget_for_effort(effort: &str) -> Option<u64> {
    match effort.to_ascii_lowercase().as_str() {
        "low" => Some(8_000),
        "medium" => Some(16_000),
        "high" => Some(32_000),
        _ => None,
    }
}
