pub mod base;
pub mod logging;
pub mod player;
pub mod stream;
pub mod voice;

pub use base::*;
pub use logging::*;
pub use player::*;
pub use stream::*;
pub use voice::*;
