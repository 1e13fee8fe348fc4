//! Port traits for infrastructure boundaries.
//!
//! These are the only abstractions in the engine. Ports exist for:
//! - The KV hot tier (redis in production, in-memory for tests)
//! - The blob cold tier (object store or local directory)
//! - LLM completions (any OpenAI-compatible endpoint)
//! - Clock/Random (for deterministic tests)

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use talespin_domain::Message;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("KV backend error: {0}")]
    Backend(String),
    #[error("KV connection failed: {0}")]
    Connection(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// The request exceeded the configured deadline. Kept distinct so
    /// the cache can fall back to a stale entry.
    #[error("LLM request timed out")]
    Timeout,
    #[error("LLM request failed: {0}")]
    RequestFailed(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

// =============================================================================
// KV hot tier
// =============================================================================

/// Typed operations over the key/value back-end. All values are UTF-8
/// strings; callers JSON-encode. Missing keys are `None`/`false`/empty,
/// never errors.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn set(&self, key: &str, value: &str) -> Result<(), KvError>;
    async fn setex(&self, key: &str, ttl_secs: u64, value: &str) -> Result<(), KvError>;
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;
    async fn del(&self, keys: &[String]) -> Result<u64, KvError>;
    async fn exists(&self, key: &str) -> Result<bool, KvError>;
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), KvError>;

    async fn hset_map(&self, key: &str, fields: &[(String, String)]) -> Result<(), KvError>;
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, KvError>;
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, KvError>;
    async fn hexists(&self, key: &str, field: &str) -> Result<bool, KvError>;
    async fn hdel(&self, key: &str, field: &str) -> Result<bool, KvError>;

    /// Append to the tail of a list; returns the new length.
    async fn rpush(&self, key: &str, value: &str) -> Result<u64, KvError>;
    /// Inclusive range with redis semantics: negative indices count from
    /// the tail, `(0, -1)` is the whole list.
    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, KvError>;

    async fn sadd(&self, key: &str, member: &str) -> Result<(), KvError>;
    async fn smembers(&self, key: &str) -> Result<Vec<String>, KvError>;

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), KvError>;
    /// Members ordered by descending score (ties by descending member).
    async fn zrevrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, KvError>;
    async fn zrevrangebyscore(
        &self,
        key: &str,
        max: f64,
        min: f64,
        offset: usize,
        count: usize,
    ) -> Result<Vec<String>, KvError>;

    /// Glob match over the keyspace; callers only use `prefix*` forms.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, KvError>;
}

// =============================================================================
// Blob cold tier
// =============================================================================

/// Bucketed JSON object storage for session archives.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn save_json(&self, name: &str, value: &Value) -> Result<(), StorageError>;
    async fn load_json(&self, name: &str) -> Result<Option<Value>, StorageError>;
    async fn delete(&self, name: &str) -> Result<bool, StorageError>;
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
    async fn exists(&self, name: &str) -> Result<bool, StorageError>;
}

// =============================================================================
// LLM gateway
// =============================================================================

/// Single-flight completion RPC. Stateless and safe to call from
/// concurrent tasks. Returns raw text; JSON extraction is the caller's
/// responsibility.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LlmPort: Send + Sync {
    async fn complete(
        &self,
        messages: &[Message],
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, LlmError>;
}

// =============================================================================
// Clock / Random
// =============================================================================

/// Wall clock as Unix epoch seconds.
pub trait ClockPort: Send + Sync {
    fn now_epoch(&self) -> f64;
}

/// Randomness source for the simulator and the AI director.
pub trait RandomPort: Send + Sync {
    /// Uniform in [0, 1).
    fn next_f64(&self) -> f64;
    /// Uniform integer in [min, max] inclusive.
    fn gen_range(&self, min: i32, max: i32) -> i32;
    /// Uniform index in [0, len). `len` must be non-zero.
    fn pick_index(&self, len: usize) -> usize;
}

/// Weighted index selection over non-negative weights. Returns the last
/// index if rounding leaves the roll past the total.
pub fn weighted_index(random: &dyn RandomPort, weights: &[f64]) -> usize {
    let total: f64 = weights.iter().filter(|w| **w > 0.0).sum();
    if total <= 0.0 || weights.is_empty() {
        return 0;
    }
    let mut roll = random.next_f64() * total;
    for (i, weight) in weights.iter().enumerate() {
        if *weight <= 0.0 {
            continue;
        }
        if roll < *weight {
            return i;
        }
        roll -= *weight;
    }
    weights.len() - 1
}
