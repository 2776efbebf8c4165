use std::{sync::Arc, time::Duration};

use regex::Regex;
use tracing::{debug, warn};

use crate::{
    cache::StreamUrlCache,
    common::{PlayerError, PlayerResult},
    configs::StreamConfig,
    retry::{CircuitBreaker, RetryOptions, with_retry},
    sources::plugin::{AudioStream, Extractor},
    track::Track,
};

const MAX_QUERY_LENGTH: usize = 200;

/// Hosts accepted as direct source URLs; anything else is treated as (or
/// rejected from) free-text search.
const ALLOWED_HOSTS: &[&str] = &[
    "www.youtube.com",
    "youtube.com",
    "youtu.be",
    "music.youtube.com",
];

/// Resolves user queries to tracks and produces decoded audio streams by
/// orchestrating the extractor through the retry wrapper, the circuit
/// breaker and the stream-locator cache. Cloneable; all state is shared.
#[derive(Clone)]
pub struct StreamProvider {
    extractor: Arc<dyn Extractor>,
    cache: Arc<StreamUrlCache>,
    breaker: Arc<CircuitBreaker>,
    resolve_retry: RetryOptions,
    stream_retry: RetryOptions,
    shell_metachars: Regex,
}

impl StreamProvider {
    pub fn new(extractor: Arc<dyn Extractor>, config: &StreamConfig) -> Self {
        let base_delay = Duration::from_millis(config.retry_base_delay_ms);
        let max_delay = Duration::from_millis(config.retry_max_delay_ms);
        Self {
            extractor,
            cache: Arc::new(StreamUrlCache::new(Duration::from_secs(
                config.cache_ttl_secs,
            ))),
            breaker: Arc::new(CircuitBreaker::new(
                config.breaker_failure_threshold,
                Duration::from_millis(config.breaker_reset_timeout_ms),
            )),
            resolve_retry: RetryOptions {
                max_retries: config.resolve_retries,
                base_delay,
                max_delay,
                jitter: true,
            },
            stream_retry: RetryOptions {
                max_retries: config.stream_retries,
                base_delay,
                max_delay,
                jitter: true,
            },
            shell_metachars: Regex::new(r"[;|&$`\\]").expect("static regex"),
        }
    }

    pub fn cache(&self) -> &StreamUrlCache {
        &self.cache
    }

    /// Length-bound and reject anything that could be reinterpreted as shell
    /// syntax; the extractor is an external process.
    pub fn sanitize_query(&self, query: &str) -> PlayerResult<String> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Err(PlayerError::PermanentUpstream(
                "invalid input: query is empty".to_string(),
            ));
        }
        if trimmed.len() > MAX_QUERY_LENGTH {
            return Err(PlayerError::PermanentUpstream(format!(
                "invalid input: query exceeds {} characters",
                MAX_QUERY_LENGTH
            )));
        }
        if self.shell_metachars.is_match(trimmed) {
            return Err(PlayerError::PermanentUpstream(
                "invalid input: query contains forbidden characters".to_string(),
            ));
        }
        Ok(trimmed.to_string())
    }

    /// Resolve a query or URL to the best-match track.
    pub async fn resolve(&self, query: &str, requested_by: &str) -> PlayerResult<Track> {
        let query = self.sanitize_query(query)?;

        let is_url = match host_of(&query) {
            Some(host) if ALLOWED_HOSTS.contains(&host) => true,
            Some(host) => {
                return Err(PlayerError::PermanentUpstream(format!(
                    "invalid input: {} is not a supported source host",
                    host
                )));
            }
            None => false,
        };

        let video = self
            .breaker
            .execute(|| async {
                with_retry(
                    || self.extractor.search(&query, is_url),
                    self.resolve_retry.clone(),
                )
                .await
            })
            .await?;

        if let Some(stream_url) = &video.stream_url {
            self.cache.insert(&video.canonical_url, stream_url);
        }

        Ok(Track {
            title: video.title,
            url: video.canonical_url,
            requested_by: requested_by.to_string(),
            duration_secs: video.duration_secs,
        })
    }

    /// Open a decoded audio byte stream for a resolved track, preferring a
    /// warm cached locator over a fresh extraction.
    pub async fn open_stream(&self, track: &Track) -> PlayerResult<AudioStream> {
        if let Some(locator) = self.cache.get(&track.url) {
            debug!("stream cache hit for {}", track.url);
            match with_retry(|| self.extractor.open(&locator), self.stream_retry.clone()).await {
                Ok(stream) => return Ok(stream),
                Err(err) => {
                    warn!(
                        "cached locator failed for \"{}\" ({}), re-extracting",
                        track.title, err
                    );
                }
            }
        }

        with_retry(|| self.extractor.open(&track.url), self.stream_retry.clone()).await
    }
}

fn host_of(query: &str) -> Option<&str> {
    let rest = query
        .strip_prefix("https://")
        .or_else(|| query.strip_prefix("http://"))?;
    let host = rest.split(['/', '?', '#']).next().unwrap_or(rest);
    Some(host.split(':').next().unwrap_or(host))
}
