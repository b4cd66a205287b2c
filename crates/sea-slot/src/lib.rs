//! Typed, generationally-versioned slot arena and handle table.
//!
//! All mutable state referenced by fibers and parties lives in slots
//! owned by a [`SlotManager`], accessed only through opaque [`Handle`]s so
//! that dangling references and forged handles are detected rather than
//! silently followed.

mod error;
mod manager;
mod mempool;
mod pool;
pub mod security;
mod types;

pub use error::{ErrorCode, SlotError, SlotResult};
pub use manager::{Handle, SlotManager};
pub use mempool::{BlockPool, BlockRef, DEFAULT_BLOCK_SIZE};
pub use pool::{PoolIndex, SlotPool, NULL_INDEX};
pub use types::{fnv1a32, TypeInfo, TypeRegistry, TypeTag, BOOL, BYTES, FLOAT, INT, USER_TAG_BASE};
