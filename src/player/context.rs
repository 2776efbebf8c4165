use std::collections::HashMap;

use crate::{
    player::state::{LoopMode, PlaybackPhase},
    queue::TrackQueue,
    sources::AudioStream,
    track::Track,
};

pub const MIN_VOLUME: u32 = 0;
pub const MAX_VOLUME: u32 = 200;
pub const DEFAULT_VOLUME: u32 = 100;

/// A stream opened ahead of time for the upcoming track. Dropping it releases
/// the underlying subprocess through the stream's guard.
pub struct PrebufferedStream {
    pub track: Track,
    pub stream: AudioStream,
}

/// Mutable per-session playback state. Owned exclusively by the controller
/// task; nothing here is shared or locked.
pub struct PlayerContext {
    pub queue: TrackQueue,
    pub current: Option<Track>,
    pub phase: PlaybackPhase,
    pub loop_mode: LoopMode,
    /// Percent, clamped to `MIN_VOLUME..=MAX_VOLUME`.
    pub volume: u32,
    /// Stored but inert: no recommendation source is wired in, so draining
    /// the queue with autoplay on still goes idle.
    pub autoplay: bool,
    pub playlists: HashMap<String, Vec<Track>>,
    pub prebuffered: Option<PrebufferedStream>,
    /// Bumped on every playback start and stop; stale retry timers carry the
    /// epoch they were scheduled under and are ignored on mismatch.
    pub epoch: u64,
    /// Recovery attempts for the current track.
    pub retry_count: u32,
    /// Bumped whenever the idle timer is (re)armed or cancelled, so an
    /// already-sleeping timer task cannot fire for a revived session.
    pub idle_generation: u64,
}

impl PlayerContext {
    pub fn new() -> Self {
        Self {
            queue: TrackQueue::new(),
            current: None,
            phase: PlaybackPhase::Idle,
            loop_mode: LoopMode::Off,
            volume: DEFAULT_VOLUME,
            autoplay: false,
            playlists: HashMap::new(),
            prebuffered: None,
            epoch: 0,
            retry_count: 0,
            idle_generation: 0,
        }
    }

    /// Linear gain for the sink.
    pub fn gain(&self) -> f64 {
        f64::from(self.volume) / 100.0
    }

    /// Hand out the prebuffered stream iff it was opened for `track`.
    pub fn take_prebuffered(&mut self, track: &Track) -> Option<AudioStream> {
        match &self.prebuffered {
            Some(pb) if pb.track.url == track.url => {
                self.prebuffered.take().map(|pb| pb.stream)
            }
            _ => None,
        }
    }
}

impl Default for PlayerContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(url: &str) -> Track {
        Track {
            title: "T".to_string(),
            url: url.to_string(),
            requested_by: "tester".to_string(),
            duration_secs: None,
        }
    }

    #[test]
    fn gain_scales_from_percent() {
        let mut ctx = PlayerContext::new();
        assert_eq!(ctx.gain(), 1.0);
        ctx.volume = 50;
        assert_eq!(ctx.gain(), 0.5);
        ctx.volume = 200;
        assert_eq!(ctx.gain(), 2.0);
    }

    #[test]
    fn prebuffer_only_taken_for_matching_track() {
        let mut ctx = PlayerContext::new();
        ctx.prebuffered = Some(PrebufferedStream {
            track: track("https://youtu.be/a"),
            stream: AudioStream::from_reader(Box::new(std::io::Cursor::new(Vec::new()))),
        });

        assert!(ctx.take_prebuffered(&track("https://youtu.be/b")).is_none());
        assert!(ctx.prebuffered.is_some());
        assert!(ctx.take_prebuffered(&track("https://youtu.be/a")).is_some());
        assert!(ctx.prebuffered.is_none());
    }
}
