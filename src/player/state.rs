use serde::{Deserialize, Serialize};

use crate::{common::ChannelId, track::Track};

/// Repeat behavior applied when the current track finishes normally. Errors
/// and skips never re-insert the track regardless of mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopMode {
    #[default]
    Off,
    /// Replay the finished track.
    Track,
    /// Re-append the finished track to the queue tail.
    Queue,
}

/// Where the session is in its playback lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackPhase {
    /// Nothing playing; the idle-disconnect timer may be running.
    #[default]
    Idle,
    /// A track was selected and its stream is being acquired.
    Starting,
    Playing,
    Paused,
}

/// Consistent point-in-time snapshot of one session, taken inside the
/// controller so no field can be torn against another.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerStateView {
    pub phase: PlaybackPhase,
    pub current: Option<Track>,
    pub queue: Vec<Track>,
    pub loop_mode: LoopMode,
    /// Percent, 0..=200.
    pub volume: u32,
    pub autoplay: bool,
    pub connected_channel: Option<ChannelId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistSummary {
    pub name: String,
    pub track_count: usize,
}
