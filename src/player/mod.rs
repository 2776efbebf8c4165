pub mod commands;
pub mod context;
pub mod controller;
pub mod handle;
pub mod state;

pub use commands::{EnqueueOutcome, PlayerCommand, PlayerMessage};
pub use context::{PlayerContext, PrebufferedStream};
pub use controller::PlayerController;
pub use handle::PlayerHandle;
pub use state::{LoopMode, PlaybackPhase, PlayerStateView, PlaylistSummary};
