use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::{
    common::PlayerResult,
    process::{KillSignal, ProcId, ProcessSupervisor},
};

/// Best-match metadata returned by an extractor lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedVideo {
    pub title: String,
    /// Canonical source page URL.
    pub canonical_url: String,
    /// Direct media URL for the selected format, when the extractor reports
    /// one. Cached as the stream locator.
    pub stream_url: Option<String>,
    pub duration_secs: Option<u64>,
}

/// Seam to the external extraction tool. One implementation is chosen at
/// deployment time; the engine never assumes anything about the tool beyond
/// this contract.
#[async_trait]
pub trait Extractor: Send + Sync {
    fn name(&self) -> &str;

    /// Resolve a free-text query (`is_url == false`) or a direct source URL
    /// into the best match. Zero results is a permanent `NotFound` failure.
    async fn search(&self, query: &str, is_url: bool) -> PlayerResult<ResolvedVideo>;

    /// Produce a decoded audio byte stream for a source or locator URL. Must
    /// emit its first byte within the configured startup window or fail.
    async fn open(&self, url: &str) -> PlayerResult<AudioStream>;
}

/// A live audio byte stream handed to the sink. When the stream originates
/// from a supervised subprocess, dropping it force-kills the process so a
/// discarded prebuffer or a stopped track never leaks a child.
pub struct AudioStream {
    reader: Box<dyn AsyncRead + Send + Unpin>,
    guard: Option<StreamGuard>,
}

impl AudioStream {
    pub fn supervised(
        reader: Box<dyn AsyncRead + Send + Unpin>,
        supervisor: Arc<ProcessSupervisor>,
        id: ProcId,
    ) -> Self {
        Self {
            reader,
            guard: Some(StreamGuard { supervisor, id }),
        }
    }

    /// A stream with no subprocess behind it (HTTP bodies, tests).
    pub fn from_reader(reader: Box<dyn AsyncRead + Send + Unpin>) -> Self {
        Self {
            reader,
            guard: None,
        }
    }

    pub fn reader(&mut self) -> &mut (dyn AsyncRead + Send + Unpin) {
        &mut *self.reader
    }
}

impl std::fmt::Debug for AudioStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioStream")
            .field("supervised", &self.guard.is_some())
            .finish()
    }
}

struct StreamGuard {
    supervisor: Arc<ProcessSupervisor>,
    id: ProcId,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        // No-op if the process already exited and was reaped.
        self.supervisor.kill(self.id, KillSignal::Force);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn from_reader_yields_bytes() {
        let mut stream =
            AudioStream::from_reader(Box::new(std::io::Cursor::new(b"abc".to_vec())));
        let mut buf = Vec::new();
        stream.reader().read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"abc");
    }

    #[tokio::test]
    async fn dropping_supervised_stream_kills_process() {
        let supervisor = Arc::new(ProcessSupervisor::new());
        let child = tokio::process::Command::new("sleep")
            .arg("30")
            .stdout(std::process::Stdio::piped())
            .spawn()
            .expect("spawn sleep");
        let handle = supervisor.track(child, "sleep 30", Duration::ZERO);

        let stream = AudioStream::supervised(
            Box::new(std::io::Cursor::new(Vec::new())),
            supervisor.clone(),
            handle.id,
        );
        assert_eq!(supervisor.active_count(), 1);

        drop(stream);
        let status = handle.wait().await.expect("exit status");
        assert!(!status.success());
        assert_eq!(supervisor.active_count(), 0);
    }
}
