use thiserror::Error;

/// Failure taxonomy raised by every component and consumed by the playback
/// controller. Only `TransientUpstream` is ever retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlayerError {
    /// No search results, or a reference to something that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The upstream refuses to serve this track. Retrying cannot help.
    #[error("track unavailable: {0}")]
    PermanentUpstream(String),

    /// Rate limits, timeouts, resets. Retried with backoff up to the limit.
    #[error("transient upstream failure: {0}")]
    TransientUpstream(String),

    /// Spawn failures and unexplained subprocess deaths, surfaced after the
    /// raw diagnostic has been logged.
    #[error("resource exhaustion: {0}")]
    ResourceExhaustion(String),

    /// Caller-correctable conditions: bad queue position, double pause,
    /// playlist limits. Never retried.
    #[error("{0}")]
    StateConflict(String),
}

/// Substrings that mark an upstream failure as permanent. Checked before the
/// retryable table; a match here always wins.
const PERMANENT_PATTERNS: &[&str] = &[
    "video unavailable",
    "unavailable",
    "private",
    "deleted",
    "age verification",
    "age-restricted",
    "sign in to confirm",
    "copyright",
    "region",
    "not found",
    "no results",
    "invalid url",
    "invalid input",
    "malformed",
];

const RETRYABLE_PATTERNS: &[&str] = &[
    "403",
    "429",
    "forbidden",
    "timeout",
    "timed out",
    "connection reset",
    "connection refused",
    "socket hang up",
    "network",
    "temporary",
    "rate limit",
    "retry",
];

impl PlayerError {
    /// Map a raw diagnostic (extractor stderr, sink error text) onto the
    /// taxonomy by substring inspection.
    pub fn classify(description: &str) -> Self {
        let lower = description.to_lowercase();

        if lower.contains("no results") || lower.contains("not found") {
            return Self::NotFound(description.to_string());
        }
        if PERMANENT_PATTERNS.iter().any(|p| lower.contains(p)) {
            return Self::PermanentUpstream(description.to_string());
        }
        if RETRYABLE_PATTERNS.iter().any(|p| lower.contains(p)) {
            return Self::TransientUpstream(description.to_string());
        }

        Self::ResourceExhaustion(description.to_string())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientUpstream(_))
    }
}

pub type PlayerResult<T> = std::result::Result<T, PlayerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_beats_retryable() {
        // "Video unavailable (403)" must not be retried even though it
        // mentions a retryable status code.
        let err = PlayerError::classify("ERROR: Video unavailable (403)");
        assert!(matches!(err, PlayerError::PermanentUpstream(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn rate_limit_is_transient() {
        let err = PlayerError::classify("HTTP Error 429: rate limit exceeded");
        assert!(err.is_retryable());
    }

    #[test]
    fn zero_results_is_not_found() {
        let err = PlayerError::classify("no results for query");
        assert!(matches!(err, PlayerError::NotFound(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn unexplained_exit_is_resource_exhaustion() {
        let err = PlayerError::classify("exited with code 1 without producing audio");
        assert!(matches!(err, PlayerError::ResourceExhaustion(_)));
        assert!(!err.is_retryable());
    }
}
