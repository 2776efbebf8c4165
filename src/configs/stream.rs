use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StreamConfig {
    /// Extractor binary. Resolved through PATH when not absolute.
    #[serde(default = "default_extractor_path")]
    pub extractor_path: String,
    /// Netscape cookie jar handed to the extractor when the file exists.
    #[serde(default)]
    pub cookies_path: Option<String>,
    /// A streaming spawn must emit its first audio byte within this window.
    #[serde(default = "default_first_byte_timeout_ms")]
    pub first_byte_timeout_ms: u64,
    /// Supervisory timeout for metadata lookups.
    #[serde(default = "default_search_timeout_ms")]
    pub search_timeout_ms: u64,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_resolve_retries")]
    pub resolve_retries: u32,
    #[serde(default = "default_stream_retries")]
    pub stream_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    #[serde(default = "default_breaker_failure_threshold")]
    pub breaker_failure_threshold: u32,
    #[serde(default = "default_breaker_reset_timeout_ms")]
    pub breaker_reset_timeout_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            extractor_path: default_extractor_path(),
            cookies_path: None,
            first_byte_timeout_ms: default_first_byte_timeout_ms(),
            search_timeout_ms: default_search_timeout_ms(),
            cache_ttl_secs: default_cache_ttl_secs(),
            resolve_retries: default_resolve_retries(),
            stream_retries: default_stream_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            breaker_failure_threshold: default_breaker_failure_threshold(),
            breaker_reset_timeout_ms: default_breaker_reset_timeout_ms(),
        }
    }
}

fn default_extractor_path() -> String {
    "yt-dlp".to_string()
}

fn default_first_byte_timeout_ms() -> u64 {
    15000
}

fn default_search_timeout_ms() -> u64 {
    30000
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_resolve_retries() -> u32 {
    3
}

fn default_stream_retries() -> u32 {
    2
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_retry_max_delay_ms() -> u64 {
    30000
}

fn default_breaker_failure_threshold() -> u32 {
    5
}

fn default_breaker_reset_timeout_ms() -> u64 {
    60000
}
