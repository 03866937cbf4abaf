pub mod connection;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod local;
pub mod tcp;

pub use connection::*;
#[cfg(feature = "kafka")]
pub use kafka::*;
pub use local::*;
pub use tcp::*;
