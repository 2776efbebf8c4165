use tokio::sync::{mpsc, oneshot};

use crate::{
    common::{ChannelId, PlayerError, PlayerResult},
    player::{
        commands::{EnqueueOutcome, PlayerCommand, PlayerMessage},
        state::{LoopMode, PlayerStateView, PlaylistSummary},
    },
    sources::StreamProvider,
    track::Track,
};

/// Cloneable async front to one session controller. Every call is a
/// round-trip through the controller mailbox, so results always reflect the
/// controller's own ordering.
#[derive(Clone)]
pub struct PlayerHandle {
    tx: mpsc::Sender<PlayerMessage>,
    provider: StreamProvider,
}

impl PlayerHandle {
    pub(crate) fn new(tx: mpsc::Sender<PlayerMessage>, provider: StreamProvider) -> Self {
        Self { tx, provider }
    }

    /// True once the controller task has exited; the registry uses this to
    /// detect sessions that ended on their own.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolve the query and queue the result. Resolution runs here, not in
    /// the controller, so a slow extractor never stalls other commands; the
    /// channel join proceeds alongside it.
    pub async fn enqueue(
        &self,
        query: &str,
        requested_by: &str,
        channel: ChannelId,
    ) -> PlayerResult<EnqueueOutcome> {
        let (prepared, resolved) = tokio::join!(
            self.prepare(channel.clone()),
            self.provider.resolve(query, requested_by),
        );
        prepared?;
        let track = resolved?;
        self.request(|reply| PlayerCommand::Enqueue {
            track,
            channel,
            reply,
        })
        .await
    }

    pub async fn skip(&self) -> PlayerResult<Track> {
        self.request(|reply| PlayerCommand::Skip { reply }).await
    }

    pub async fn stop(&self) -> PlayerResult<()> {
        self.request(|reply| PlayerCommand::Stop { reply }).await
    }

    pub async fn pause(&self) -> PlayerResult<()> {
        self.request(|reply| PlayerCommand::Pause { reply }).await
    }

    pub async fn resume(&self) -> PlayerResult<()> {
        self.request(|reply| PlayerCommand::Resume { reply }).await
    }

    /// Clamped to 0..=200 percent; returns the applied value.
    pub async fn set_volume(&self, volume: i64) -> PlayerResult<u32> {
        self.request(|reply| PlayerCommand::SetVolume { volume, reply })
            .await
    }

    pub async fn set_loop(&self, mode: LoopMode) -> PlayerResult<()> {
        self.request(|reply| PlayerCommand::SetLoop { mode, reply })
            .await
    }

    pub async fn set_autoplay(&self, enabled: bool) -> PlayerResult<()> {
        self.request(|reply| PlayerCommand::SetAutoplay { enabled, reply })
            .await
    }

    /// Join the channel before anything is queued, so the first track starts
    /// without the connection handshake in its path.
    pub async fn prepare(&self, channel: ChannelId) -> PlayerResult<()> {
        self.request(|reply| PlayerCommand::Prepare { channel, reply })
            .await
    }

    /// Peek at the 1-based queue position without mutating anything.
    pub async fn queue_track(&self, position: usize) -> PlayerResult<Option<Track>> {
        self.request(|reply| PlayerCommand::QueueTrack { position, reply })
            .await
    }

    pub async fn shuffle(&self) -> PlayerResult<()> {
        self.request(|reply| PlayerCommand::Shuffle { reply }).await
    }

    /// `position` is 1-based, as displayed to users.
    pub async fn remove_track(&self, position: usize) -> PlayerResult<Track> {
        self.request(|reply| PlayerCommand::RemoveTrack { position, reply })
            .await
    }

    pub async fn move_track(&self, from: usize, to: usize) -> PlayerResult<()> {
        self.request(|reply| PlayerCommand::MoveTrack { from, to, reply })
            .await
    }

    pub async fn now_playing(&self) -> PlayerResult<Option<Track>> {
        self.request(|reply| PlayerCommand::NowPlaying { reply })
            .await
    }

    pub async fn state_view(&self) -> PlayerResult<PlayerStateView> {
        self.request(|reply| PlayerCommand::StateView { reply })
            .await
    }

    /// Saves the current track plus queue; returns the track count.
    pub async fn save_playlist(&self, name: &str) -> PlayerResult<usize> {
        self.request(|reply| PlayerCommand::SavePlaylist {
            name: name.to_string(),
            reply,
        })
        .await
    }

    /// Appends the named playlist to the queue; returns the count added.
    pub async fn load_playlist(&self, name: &str, channel: ChannelId) -> PlayerResult<usize> {
        self.request(|reply| PlayerCommand::LoadPlaylist {
            name: name.to_string(),
            channel,
            reply,
        })
        .await
    }

    pub async fn list_playlists(&self) -> PlayerResult<Vec<PlaylistSummary>> {
        self.request(|reply| PlayerCommand::ListPlaylists { reply })
            .await
    }

    pub async fn delete_playlist(&self, name: &str) -> PlayerResult<bool> {
        self.request(|reply| PlayerCommand::DeletePlaylist {
            name: name.to_string(),
            reply,
        })
        .await
    }

    /// Tears the session down: playback stops, the voice connection drops and
    /// the controller task exits.
    pub async fn destroy(&self) -> PlayerResult<()> {
        self.request(|reply| PlayerCommand::Destroy { reply }).await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<PlayerResult<T>>) -> PlayerCommand,
    ) -> PlayerResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PlayerMessage::Command(build(reply_tx)))
            .await
            .map_err(|_| PlayerError::StateConflict("session no longer running".to_string()))?;
        reply_rx
            .await
            .map_err(|_| PlayerError::StateConflict("session ended mid-request".to_string()))?
    }
}
