use std::time::{SystemTime, UNIX_EPOCH};

/// Joins path segments with `/`, the key layout used for every document in the store.
pub fn join_path(parts: &[&str]) -> String {
    let mut path = String::new();
    for part in parts {
        let trimmed = part.trim_matches('/');
        if trimmed.is_empty() {
            continue;
        }
        path.push('/');
        path.push_str(trimmed);
    }
    path
}

/// Wall clock in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
