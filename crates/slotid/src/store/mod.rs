mod interface;
mod local;
#[cfg(feature = "redis")]
mod redis_store;

pub use interface::*;
pub use local::*;
#[cfg_attr(docsrs, doc(cfg(feature = "redis")))]
#[cfg(feature = "redis")]
pub use redis_store::*;
