use sha2::{Digest, Sha256};

// Deterministic per-conversation namespace: SHA-256 of the first user text,
// truncated to 32 hex chars. Every turn of the same conversation lands on the
// same id, which is what keeps the tool-name cache coherent across turns.
pub fn session_id_from_text(first_user_text: Option<&str>) -> String {
    match first_user_text.filter(|t| !t.is_empty()) {
        Some(text) => {
            let mut hasher = Sha256::new();
            hasher.update(text.as_bytes());
            let digest = format!("{:x}", hasher.finalize());
            digest[..32].to_string()
        }
        None => uuid::Uuid::new_v4().simple().to_string()[..32].to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_first_user_text_is_deterministic() {
        let a = session_id_from_text(Some("hello world"));
        let b = session_id_from_text(Some("hello world"));
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn any_change_flips_the_id() {
        let a = session_id_from_text(Some("hello world"));
        let b = session_id_from_text(Some("hello world!"));
        assert_ne!(a, b);
    }

    #[test]
    fn missing_user_text_falls_back_to_random() {
        let a = session_id_from_text(None);
        let b = session_id_from_text(None);
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }

    #[test]
    fn empty_text_counts_as_missing() {
        let a = session_id_from_text(Some(""));
        let b = session_id_from_text(Some(""));
        assert_ne!(a, b);
    }
}
