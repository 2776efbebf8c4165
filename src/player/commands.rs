use serde::Serialize;
use tokio::sync::oneshot;

use crate::{
    common::{ChannelId, PlayerResult},
    player::state::{LoopMode, PlayerStateView, PlaylistSummary},
    sources::AudioStream,
    track::Track,
    voice::{SinkEvent, TransportEvent},
};

pub type Reply<T> = oneshot::Sender<PlayerResult<T>>;

/// Result of an enqueue. Position 0 means the track went straight to the
/// deck; positive values are 1-based queue positions.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueOutcome {
    pub track: Track,
    pub position: usize,
}

/// Requests from session handles, answered over the bundled oneshot.
pub enum PlayerCommand {
    /// Place an already-resolved track. Resolution happens on the handle
    /// side so a slow extractor never occupies the controller mailbox.
    Enqueue {
        track: Track,
        channel: ChannelId,
        reply: Reply<EnqueueOutcome>,
    },
    Skip {
        reply: Reply<Track>,
    },
    Stop {
        reply: Reply<()>,
    },
    Pause {
        reply: Reply<()>,
    },
    Resume {
        reply: Reply<()>,
    },
    SetVolume {
        volume: i64,
        reply: Reply<u32>,
    },
    SetLoop {
        mode: LoopMode,
        reply: Reply<()>,
    },
    /// Stored for future use; no recommendation source exists yet, so the
    /// queue still goes idle when it drains.
    SetAutoplay {
        enabled: bool,
        reply: Reply<()>,
    },
    /// Join a voice channel ahead of the first enqueue.
    Prepare {
        channel: ChannelId,
        reply: Reply<()>,
    },
    QueueTrack {
        /// 1-based.
        position: usize,
        reply: Reply<Option<Track>>,
    },
    Shuffle {
        reply: Reply<()>,
    },
    RemoveTrack {
        /// 1-based, as shown to users.
        position: usize,
        reply: Reply<Track>,
    },
    MoveTrack {
        from: usize,
        to: usize,
        reply: Reply<()>,
    },
    NowPlaying {
        reply: Reply<Option<Track>>,
    },
    StateView {
        reply: Reply<PlayerStateView>,
    },
    SavePlaylist {
        name: String,
        reply: Reply<usize>,
    },
    LoadPlaylist {
        name: String,
        channel: ChannelId,
        reply: Reply<usize>,
    },
    ListPlaylists {
        reply: Reply<Vec<PlaylistSummary>>,
    },
    DeletePlaylist {
        name: String,
        reply: Reply<bool>,
    },
    Destroy {
        reply: Reply<()>,
    },
}

/// Everything the controller task processes, external commands and its own
/// deferred work alike. Single mailbox, so ordering is total per session.
pub enum PlayerMessage {
    Command(PlayerCommand),
    /// Pull the next queue item onto the deck.
    StartNext,
    /// A scheduled recovery attempt for the current track. Ignored when the
    /// epoch no longer matches.
    RetryStart { epoch: u64 },
    /// Background stream acquisition for the deck track finished. Ignored
    /// when the epoch no longer matches; the dropped stream's guard kills
    /// its subprocess.
    StreamReady {
        epoch: u64,
        stream: PlayerResult<AudioStream>,
    },
    /// Background stream acquisition for the upcoming track finished.
    PrebufferReady {
        track: Track,
        stream: PlayerResult<AudioStream>,
    },
    Sink(SinkEvent),
    Transport(TransportEvent),
    /// Backoff elapsed, attempt the reconnect now.
    ReconnectNow,
    /// The idle-disconnect timer fired. Ignored when the generation no longer
    /// matches.
    IdleTimeout { generation: u64 },
}
