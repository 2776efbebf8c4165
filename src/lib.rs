//! Session-scoped music playback orchestration for voice chat: queues,
//! playback state, voice-connection lifecycle and supervised stream
//! extraction. Platform glue (the chat gateway, the audio encoder) plugs in
//! through the `voice` traits; everything else lives here.

pub mod cache;
pub mod common;
pub mod configs;
pub mod player;
pub mod process;
pub mod queue;
pub mod registry;
pub mod retry;
pub mod sources;
pub mod track;
pub mod voice;

#[cfg(test)]
pub mod testutil;

pub use common::{ChannelId, PlayerError, PlayerResult, SessionId};
pub use player::{LoopMode, PlaybackPhase, PlayerHandle, PlayerStateView};
pub use registry::{SessionRegistry, SinkFactory};
pub use track::Track;
