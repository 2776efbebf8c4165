pub mod plugin;
pub mod provider;
pub mod ytdlp;

pub use plugin::*;
pub use provider::*;
pub use ytdlp::*;
