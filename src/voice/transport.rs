use async_trait::async_trait;

use crate::{
    common::{ChannelId, PlayerResult, SessionId},
    sources::AudioStream,
};

/// Lifecycle notifications from a live voice connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Handshake complete, audio may flow.
    Ready,
    /// The connection dropped; the engine decides whether to reconnect.
    Disconnected { reason: String },
}

/// Notifications from the audio sink about the track it is rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    /// The current stream played to completion.
    TrackEnd,
    /// Rendering failed mid-track. The message is classified upstream.
    Error(String),
}

/// Seam to the platform's voice infrastructure. The engine never opens
/// sockets itself; a transport implementation does the joining.
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    /// Initiate a connection to a voice channel. The returned handle's event
    /// channel reports `Ready` once the handshake completes.
    async fn connect(
        &self,
        session: &SessionId,
        channel: &ChannelId,
    ) -> PlayerResult<Box<dyn VoiceHandle>>;
}

/// One live (or in-progress) voice connection.
#[async_trait]
pub trait VoiceHandle: Send + Sync {
    fn events(&self) -> flume::Receiver<TransportEvent>;

    async fn disconnect(&self);
}

/// Seam to the audio renderer attached to a voice connection. Exactly one
/// stream plays at a time; `play` replaces whatever was playing.
#[async_trait]
pub trait AudioSink: Send + Sync {
    async fn play(&self, stream: AudioStream) -> PlayerResult<()>;

    /// Tear down the active stream. Implementations raise `TrackEnd` for the
    /// interrupted stream, same as a natural end of playback.
    async fn stop(&self);

    async fn pause(&self);

    async fn resume(&self);

    /// Linear gain, `1.0` is unity. The caller clamps before converting.
    async fn set_gain(&self, gain: f64);

    fn events(&self) -> flume::Receiver<SinkEvent>;
}
