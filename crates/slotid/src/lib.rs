mod allocator;
mod error;
mod mutex;
mod range;
mod store;

pub use crate::allocator::*;
pub use crate::error::*;
pub use crate::range::*;
pub use crate::store::*;
