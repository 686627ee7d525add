pub mod error;
pub mod protocol;

pub use error::*;
pub use protocol::*;
