//! Adapters layer: session store implementations.
//!
//! - `memory`: process-local store for single-replica deployments
//! - `kv`: store over a remote key-value client, for replicated deployments
//! - `redis`: the production `KeyValueClient` backed by Redis

pub mod kv;
pub mod memory;
pub mod redis;

pub use kv::KvSessionStore;
pub use memory::MemorySessionStore;
pub use redis::RedisClient;
