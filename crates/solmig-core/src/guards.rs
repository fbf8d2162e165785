//! Shared guardrails for configuration bounds and collaborator payloads.

// Cache guards
pub const MIN_CACHE_TTL_SECS: u64 = 1;
pub const MAX_CACHE_TTL_SECS: u64 = 7 * 24 * 60 * 60;
pub const MAX_REPOSITORIES: usize = 1024;

// Worker guards
pub const MAX_ANALYSIS_WORKERS: usize = 64;
pub const MAX_FETCH_CONCURRENCY: usize = 64;
pub const MAX_TRANSFORM_CONCURRENCY: usize = 32;

// Payload guards
pub const MIN_SOURCE_BYTES: usize = 1024;
pub const MAX_SOURCE_BYTES: usize = 16 * 1024 * 1024;
pub const MAX_RAW_OUTPUT_CHARS: usize = 4000;

pub fn clamp_int<T: Ord>(value: T, minimum: T, maximum: T) -> T {
    value.max(minimum).min(maximum)
}

pub fn clamp_workers(value: usize, maximum: usize) -> usize {
    clamp_int(value, 1, maximum)
}

pub fn clamp_ttl_secs(value: u64) -> u64 {
    clamp_int(value, MIN_CACHE_TTL_SECS, MAX_CACHE_TTL_SECS)
}

/// Trim and cut `text` to at most `max_chars` characters.
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    let stripped = text.trim();
    match stripped.char_indices().nth(max_chars) {
        Some((cut, _)) => stripped[..cut].to_string(),
        None => stripped.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_int() {
        assert_eq!(clamp_int(0usize, 1, 8), 1);
        assert_eq!(clamp_int(20u64, 1, 8), 8);
        assert_eq!(clamp_workers(0, MAX_ANALYSIS_WORKERS), 1);
        assert_eq!(clamp_ttl_secs(0), MIN_CACHE_TTL_SECS);
    }

    #[test]
    fn test_truncate_text_respects_char_boundaries() {
        assert_eq!(truncate_text("  héllo  ", 2), "hé");
        assert_eq!(truncate_text("abc", 10), "abc");
    }
}
