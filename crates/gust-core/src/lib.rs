pub mod codec;
pub mod error;
pub mod sender;
pub mod types;

pub use codec::*;
pub use error::*;
pub use sender::*;
pub use types::*;
