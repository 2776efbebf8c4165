pub mod connection;
pub mod transport;

pub use connection::*;
pub use transport::*;
