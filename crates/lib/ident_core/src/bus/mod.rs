//! [`EventBus`](crate::event::EventBus) implementations.

pub mod memory;
pub mod redis;

pub use self::memory::MemoryBus;
pub use self::redis::RedisStreamBus;
