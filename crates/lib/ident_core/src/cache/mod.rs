//! [`ClientCache`](crate::client::ClientCache) implementations.

pub mod memory;
pub mod redis;
pub mod seal;

pub use self::memory::MemoryClientCache;
pub use self::redis::RedisClientCache;
pub use self::seal::Sealer;
