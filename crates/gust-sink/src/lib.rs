pub mod server;
pub mod sink;

pub use server::*;
pub use sink::*;
