use std::{process::Stdio, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, BufReader},
    process::{Child, Command},
};
use tracing::{debug, warn};

use crate::{
    common::{PlayerError, PlayerResult},
    configs::StreamConfig,
    process::{KillSignal, ProcessSupervisor},
    sources::plugin::{AudioStream, Extractor, ResolvedVideo},
};

/// The deployed extraction strategy: yt-dlp spawned under supervision, both
/// for metadata lookups and for streaming decoded audio to stdout.
pub struct YtDlpExtractor {
    config: StreamConfig,
    supervisor: Arc<ProcessSupervisor>,
}

impl YtDlpExtractor {
    pub fn new(config: StreamConfig, supervisor: Arc<ProcessSupervisor>) -> Self {
        Self { config, supervisor }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.config.extractor_path);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    fn push_cookies(&self, cmd: &mut Command) {
        if let Some(path) = &self.config.cookies_path {
            if std::path::Path::new(path).exists() {
                cmd.args(["--cookies", path]);
            } else {
                debug!("cookie jar {} not found, continuing without it", path);
            }
        }
    }

    fn spawn(&self, cmd: &mut Command) -> PlayerResult<Child> {
        cmd.spawn().map_err(|e| {
            PlayerError::ResourceExhaustion(format!(
                "failed to spawn {}: {}",
                self.config.extractor_path, e
            ))
        })
    }
}

#[async_trait]
impl Extractor for YtDlpExtractor {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    async fn search(&self, query: &str, is_url: bool) -> PlayerResult<ResolvedVideo> {
        let mut cmd = self.command();
        cmd.args([
            "--dump-single-json",
            "--no-playlist",
            "--skip-download",
            "-f",
            "bestaudio/best",
            "-q",
            "--no-warnings",
        ]);
        self.push_cookies(&mut cmd);
        if is_url {
            cmd.arg(query);
        } else {
            cmd.arg(format!("ytsearch1:{}", query));
        }

        let mut child = self.spawn(&mut cmd)?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| PlayerError::ResourceExhaustion("extractor stdout missing".into()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| PlayerError::ResourceExhaustion("extractor stderr missing".into()))?;

        let handle = self.supervisor.track(
            child,
            format!("{} search", self.name()),
            Duration::from_millis(self.config.search_timeout_ms),
        );

        let mut out = String::new();
        let mut diag = String::new();
        let (read_out, read_err) = tokio::join!(
            stdout.read_to_string(&mut out),
            stderr.read_to_string(&mut diag)
        );
        let _ = (read_out, read_err);

        match handle.wait().await {
            Some(status) if status.success() => {}
            status => {
                warn!("{} search failed ({:?}): {}", self.name(), status, diag.trim());
                return Err(classify_diagnostic(diag.trim(), "search failed"));
            }
        }

        parse_search_output(&out)
    }

    async fn open(&self, url: &str) -> PlayerResult<AudioStream> {
        let mut cmd = self.command();
        cmd.args([
            "-f",
            "bestaudio/best",
            "-q",
            "--no-warnings",
            "--buffer-size",
            "16K",
            "-o",
            "-",
        ]);
        self.push_cookies(&mut cmd);
        cmd.arg(url);

        let mut child = self.spawn(&mut cmd)?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| PlayerError::ResourceExhaustion("extractor stdout missing".into()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| PlayerError::ResourceExhaustion("extractor stderr missing".into()))?;

        // The streaming child has no supervisory timeout; it lives for the
        // track and dies with the AudioStream guard.
        let handle =
            self.supervisor
                .track(child, format!("{} stream {}", self.name(), url), Duration::ZERO);

        // The stream must produce its first byte inside the startup window.
        let mut head = vec![0u8; 16 * 1024];
        let first_byte_timeout = Duration::from_millis(self.config.first_byte_timeout_ms);
        let read = tokio::time::timeout(first_byte_timeout, stdout.read(&mut head)).await;

        match read {
            Err(_) => {
                self.supervisor.kill(handle.id, KillSignal::Force);
                Err(PlayerError::TransientUpstream(
                    "timed out waiting for first audio byte".to_string(),
                ))
            }
            Ok(Err(e)) => {
                self.supervisor.kill(handle.id, KillSignal::Force);
                Err(PlayerError::ResourceExhaustion(format!(
                    "failed reading extractor output: {}",
                    e
                )))
            }
            Ok(Ok(0)) => {
                // stdout closed without a single byte: the child is exiting,
                // so its stderr is complete and classifiable.
                let status = handle.wait().await;
                let mut diag = String::new();
                let _ = stderr.read_to_string(&mut diag).await;
                let diag = diag.trim();
                if diag.is_empty() {
                    Err(PlayerError::ResourceExhaustion(format!(
                        "{} exited ({:?}) without producing audio",
                        self.name(),
                        status.and_then(|s| s.code())
                    )))
                } else {
                    warn!("extractor failed to start stream: {}", diag);
                    Err(classify_diagnostic(diag, "stream startup failed"))
                }
            }
            Ok(Ok(n)) => {
                head.truncate(n);
                // Keep logging diagnostics for the rest of the stream's life.
                tokio::spawn(async move {
                    let mut lines = BufReader::new(stderr).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        if line.contains("ERROR") {
                            warn!("extractor: {}", line);
                        }
                    }
                });
                let reader = Box::new(std::io::Cursor::new(head).chain(stdout));
                Ok(AudioStream::supervised(
                    reader,
                    self.supervisor.clone(),
                    handle.id,
                ))
            }
        }
    }
}

fn classify_diagnostic(diag: &str, fallback: &str) -> PlayerError {
    if diag.is_empty() {
        PlayerError::ResourceExhaustion(fallback.to_string())
    } else {
        // Prefer the tool's last ERROR line over the whole stderr dump.
        let line = diag
            .lines()
            .rev()
            .find(|l| l.contains("ERROR"))
            .unwrap_or(diag);
        PlayerError::classify(line)
    }
}

fn parse_search_output(out: &str) -> PlayerResult<ResolvedVideo> {
    let value: serde_json::Value = serde_json::from_str(out.trim())
        .map_err(|e| PlayerError::ResourceExhaustion(format!("unparseable extractor output: {}", e)))?;

    // A search returns a playlist wrapper with an `entries` array; a direct
    // URL returns the video object itself.
    let entry = match value.get("entries") {
        Some(entries) => match entries.as_array().and_then(|a| a.first()) {
            Some(first) => first,
            None => return Err(PlayerError::NotFound("no results for query".to_string())),
        },
        None => &value,
    };

    let canonical_url = entry
        .get("webpage_url")
        .and_then(|v| v.as_str())
        .ok_or_else(|| PlayerError::NotFound("no results for query".to_string()))?
        .to_string();

    let title = entry
        .get("title")
        .and_then(|v| v.as_str())
        .unwrap_or("Unknown title")
        .to_string();

    let duration_secs = entry
        .get("duration")
        .and_then(|v| v.as_f64())
        .map(|d| d.max(0.0) as u64);

    let stream_url = entry
        .get("url")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    Ok(ResolvedVideo {
        title,
        canonical_url,
        stream_url,
        duration_secs,
    })
}
