use rand::Rng;

pub fn request_id() -> String {
    format!("agent-{}", uuid::Uuid::new_v4())
}

pub fn tool_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

pub fn message_id() -> String {
    format!("msg_{}", uuid::Uuid::new_v4().simple())
}

pub fn completion_id() -> String {
    format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())
}

// Short alphanumeric id used as a per-request log prefix.
pub fn trace_id() -> String {
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(6)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_carry_agent_prefix_and_are_unique() {
        let a = request_id();
        let b = request_id();
        assert!(a.starts_with("agent-"));
        assert_ne!(a, b);
    }

    #[test]
    fn trace_id_is_short_lowercase_alphanumeric() {
        let t = trace_id();
        assert_eq!(t.len(), 6);
        assert!(t.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }
}
