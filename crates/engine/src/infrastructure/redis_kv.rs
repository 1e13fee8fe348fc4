//! Redis adapter for the KV hot tier.
//!
//! Thin mapping from the `KvStore` port onto a shared
//! `ConnectionManager`. Connection failure at construction is fatal;
//! per-call failures surface as `KvError::Backend`.

use std::collections::HashMap;

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands};

use crate::infrastructure::ports::{KvError, KvStore};

#[derive(Clone)]
pub struct RedisKv {
    manager: ConnectionManager,
}

impl RedisKv {
    /// Connect and verify the backend with a PING. A misconfigured or
    /// unreachable server is a construction-time error.
    pub async fn connect(url: &str) -> Result<Self, KvError> {
        let client =
            redis::Client::open(url).map_err(|e| KvError::Connection(e.to_string()))?;
        let mut manager = ConnectionManager::new(client)
            .await
            .map_err(|e| KvError::Connection(e.to_string()))?;
        let _: String = redis::cmd("PING")
            .query_async(&mut manager)
            .await
            .map_err(|e| KvError::Connection(e.to_string()))?;
        Ok(Self { manager })
    }

    fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

fn backend(err: redis::RedisError) -> KvError {
    KvError::Backend(err.to_string())
}

#[async_trait]
impl KvStore for RedisKv {
    async fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        let mut con = self.conn();
        let _: () = con.set(key, value).await.map_err(backend)?;
        Ok(())
    }

    async fn setex(&self, key: &str, ttl_secs: u64, value: &str) -> Result<(), KvError> {
        let mut con = self.conn();
        let _: () = con
            .set_ex(key, value, ttl_secs)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut con = self.conn();
        con.get(key).await.map_err(backend)
    }

    async fn del(&self, keys: &[String]) -> Result<u64, KvError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut con = self.conn();
        con.del(keys).await.map_err(backend)
    }

    async fn exists(&self, key: &str) -> Result<bool, KvError> {
        let mut con = self.conn();
        con.exists(key).await.map_err(backend)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), KvError> {
        let mut con = self.conn();
        let _: bool = con.expire(key, ttl_secs as i64).await.map_err(backend)?;
        Ok(())
    }

    async fn hset_map(&self, key: &str, fields: &[(String, String)]) -> Result<(), KvError> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut con = self.conn();
        let _: () = con.hset_multiple(key, fields).await.map_err(backend)?;
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, KvError> {
        let mut con = self.conn();
        con.hget(key, field).await.map_err(backend)
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, KvError> {
        let mut con = self.conn();
        con.hgetall(key).await.map_err(backend)
    }

    async fn hexists(&self, key: &str, field: &str) -> Result<bool, KvError> {
        let mut con = self.conn();
        con.hexists(key, field).await.map_err(backend)
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<bool, KvError> {
        let mut con = self.conn();
        let removed: u64 = con.hdel(key, field).await.map_err(backend)?;
        Ok(removed > 0)
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<u64, KvError> {
        let mut con = self.conn();
        con.rpush(key, value).await.map_err(backend)
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, KvError> {
        let mut con = self.conn();
        con.lrange(key, start as isize, stop as isize)
            .await
            .map_err(backend)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), KvError> {
        let mut con = self.conn();
        let _: u64 = con.sadd(key, member).await.map_err(backend)?;
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, KvError> {
        let mut con = self.conn();
        con.smembers(key).await.map_err(backend)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), KvError> {
        let mut con = self.conn();
        let _: u64 = con.zadd(key, member, score).await.map_err(backend)?;
        Ok(())
    }

    async fn zrevrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, KvError> {
        let mut con = self.conn();
        con.zrevrange(key, start as isize, stop as isize)
            .await
            .map_err(backend)
    }

    async fn zrevrangebyscore(
        &self,
        key: &str,
        max: f64,
        min: f64,
        offset: usize,
        count: usize,
    ) -> Result<Vec<String>, KvError> {
        let mut con = self.conn();
        con.zrevrangebyscore_limit(key, max, min, offset as isize, count as isize)
            .await
            .map_err(backend)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, KvError> {
        let mut con = self.conn();
        con.keys(pattern).await.map_err(backend)
    }
}
