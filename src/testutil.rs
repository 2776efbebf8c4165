//! Shared mocks for controller and registry tests.

use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{
    common::{ChannelId, PlayerResult, SessionId},
    sources::{AudioStream, Extractor, ResolvedVideo},
    voice::{AudioSink, SinkEvent, TransportEvent, VoiceHandle, VoiceTransport},
};

/// Resolves every query to a deterministic video whose URL embeds the query,
/// so tests can tell tracks apart.
pub struct MockExtractor {
    pub searches: Mutex<Vec<String>>,
    pub opens: Mutex<Vec<String>>,
}

impl MockExtractor {
    pub fn new() -> Self {
        Self {
            searches: Mutex::new(Vec::new()),
            opens: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Extractor for MockExtractor {
    fn name(&self) -> &str {
        "mock"
    }

    async fn search(&self, query: &str, _is_url: bool) -> PlayerResult<ResolvedVideo> {
        self.searches.lock().push(query.to_string());
        let slug = query.replace(' ', "-");
        Ok(ResolvedVideo {
            title: query.to_string(),
            canonical_url: format!("https://www.youtube.com/watch?v={}", slug),
            stream_url: None,
            duration_secs: Some(180),
        })
    }

    async fn open(&self, url: &str) -> PlayerResult<AudioStream> {
        self.opens.lock().push(url.to_string());
        Ok(AudioStream::from_reader(Box::new(std::io::Cursor::new(
            b"pcm".to_vec(),
        ))))
    }
}

/// Always-ready transport; connections never drop on their own.
pub struct MockTransport {
    pub connects: Mutex<Vec<ChannelId>>,
    pub disconnects: AtomicU32,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            connects: Mutex::new(Vec::new()),
            disconnects: AtomicU32::new(0),
        }
    }
}

pub struct MockVoiceHandle {
    events: flume::Receiver<TransportEvent>,
    pub events_tx: flume::Sender<TransportEvent>,
    disconnects: Arc<AtomicU32>,
}

#[async_trait]
impl VoiceTransport for MockTransport {
    async fn connect(
        &self,
        _session: &SessionId,
        channel: &ChannelId,
    ) -> PlayerResult<Box<dyn VoiceHandle>> {
        self.connects.lock().push(channel.clone());
        let (tx, rx) = flume::unbounded();
        let _ = tx.send(TransportEvent::Ready);
        Ok(Box::new(MockVoiceHandle {
            events: rx,
            events_tx: tx,
            disconnects: Arc::new(AtomicU32::new(0)),
        }))
    }
}

#[async_trait]
impl VoiceHandle for MockVoiceHandle {
    fn events(&self) -> flume::Receiver<TransportEvent> {
        self.events.clone()
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

/// Records sink calls and lets tests inject playback events.
pub struct MockSink {
    events_tx: flume::Sender<SinkEvent>,
    events_rx: flume::Receiver<SinkEvent>,
    plays: AtomicU32,
    stops: AtomicU32,
    pauses: AtomicU32,
    resumes: AtomicU32,
    gain: Mutex<f64>,
}

impl MockSink {
    pub fn new() -> Self {
        let (events_tx, events_rx) = flume::unbounded();
        Self {
            events_tx,
            events_rx,
            plays: AtomicU32::new(0),
            stops: AtomicU32::new(0),
            pauses: AtomicU32::new(0),
            resumes: AtomicU32::new(0),
            gain: Mutex::new(1.0),
        }
    }

    pub fn emit_track_end(&self) {
        let _ = self.events_tx.send(SinkEvent::TrackEnd);
    }

    pub fn emit_error(&self, message: &str) {
        let _ = self.events_tx.send(SinkEvent::Error(message.to_string()));
    }

    pub fn play_count(&self) -> u32 {
        self.plays.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> u32 {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn pause_count(&self) -> u32 {
        self.pauses.load(Ordering::SeqCst)
    }

    pub fn resume_count(&self) -> u32 {
        self.resumes.load(Ordering::SeqCst)
    }

    pub fn gain(&self) -> f64 {
        *self.gain.lock()
    }
}

#[async_trait]
impl AudioSink for MockSink {
    async fn play(&self, _stream: AudioStream) -> PlayerResult<()> {
        self.plays.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        // A real sink raises TrackEnd for the stream it tears down.
        let _ = self.events_tx.send(SinkEvent::TrackEnd);
    }

    async fn pause(&self) {
        self.pauses.fetch_add(1, Ordering::SeqCst);
    }

    async fn resume(&self) {
        self.resumes.fetch_add(1, Ordering::SeqCst);
    }

    async fn set_gain(&self, gain: f64) {
        *self.gain.lock() = gain;
    }

    fn events(&self) -> flume::Receiver<SinkEvent> {
        self.events_rx.clone()
    }
}
