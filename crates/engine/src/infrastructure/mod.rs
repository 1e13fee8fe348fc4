//! Infrastructure boundary: port traits and their adapters.

pub mod clock;
pub mod memory_kv;
pub mod openai;
pub mod ports;
pub mod redis_kv;
pub mod response_text;
pub mod storage;

pub use clock::{SystemClock, SystemRandom};
pub use memory_kv::MemoryKv;
pub use openai::OpenAiClient;
pub use redis_kv::RedisKv;
pub use storage::{blob_store_from_config, LocalBlobStore, ObjectBlobStore};
