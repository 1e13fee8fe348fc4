//! In-process KV store with redis-compatible semantics.
//!
//! The default backend for tests and offline play. Matches the wire
//! backend on the details callers depend on: negative list ranges,
//! sorted-set ordering (score descending, ties by member descending),
//! and glob `keys`. TTLs are recorded but not enforced; the hot tier's
//! expiry is advisory for an in-process store.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::infrastructure::ports::{KvError, KvStore};

#[derive(Default)]
struct MemoryKvInner {
    strings: HashMap<String, String>,
    lists: HashMap<String, Vec<String>>,
    hashes: HashMap<String, BTreeMap<String, String>>,
    sets: HashMap<String, HashSet<String>>,
    zsets: HashMap<String, BTreeMap<String, f64>>,
    ttls: HashMap<String, u64>,
}

impl MemoryKvInner {
    fn key_exists(&self, key: &str) -> bool {
        self.strings.contains_key(key)
            || self.lists.contains_key(key)
            || self.hashes.contains_key(key)
            || self.sets.contains_key(key)
            || self.zsets.contains_key(key)
    }
}

pub struct MemoryKv {
    inner: RwLock<MemoryKvInner>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryKvInner::default()),
        }
    }
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve a redis-style inclusive range against a sequence length.
/// Returns `None` when the resolved window is empty.
fn resolve_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    if len == 0 {
        return None;
    }
    let mut start = if start < 0 { len + start } else { start };
    let mut stop = if stop < 0 { len + stop } else { stop };
    if start < 0 {
        start = 0;
    }
    if stop >= len {
        stop = len - 1;
    }
    if start > stop || start >= len || stop < 0 {
        return None;
    }
    Some((start as usize, stop as usize))
}

/// Minimal glob: `*` matches any run of characters. Callers only use
/// `prefix*` patterns, but infix stars work too.
fn glob_match(pattern: &str, candidate: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == candidate;
    }
    let mut rest = candidate;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(tail) => rest = tail,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }
    // Pattern ends with '*' (last part empty): anything left matches.
    true
}

/// Sorted-set members ordered by descending score, ties by descending
/// member (redis ZREVRANGE order).
fn zset_rev_ordered(zset: &BTreeMap<String, f64>) -> Vec<(String, f64)> {
    let mut items: Vec<(String, f64)> = zset.iter().map(|(m, s)| (m.clone(), *s)).collect();
    items.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.0.cmp(&a.0))
    });
    items
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        let mut inner = self.inner.write().await;
        inner.strings.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn setex(&self, key: &str, ttl_secs: u64, value: &str) -> Result<(), KvError> {
        let mut inner = self.inner.write().await;
        inner.strings.insert(key.to_string(), value.to_string());
        inner.ttls.insert(key.to_string(), ttl_secs);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let inner = self.inner.read().await;
        Ok(inner.strings.get(key).cloned())
    }

    async fn del(&self, keys: &[String]) -> Result<u64, KvError> {
        let mut inner = self.inner.write().await;
        let mut removed = 0;
        for key in keys {
            let mut hit = false;
            hit |= inner.strings.remove(key).is_some();
            hit |= inner.lists.remove(key).is_some();
            hit |= inner.hashes.remove(key).is_some();
            hit |= inner.sets.remove(key).is_some();
            hit |= inner.zsets.remove(key).is_some();
            inner.ttls.remove(key);
            if hit {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> Result<bool, KvError> {
        let inner = self.inner.read().await;
        Ok(inner.key_exists(key))
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), KvError> {
        let mut inner = self.inner.write().await;
        if inner.key_exists(key) {
            inner.ttls.insert(key.to_string(), ttl_secs);
        }
        Ok(())
    }

    async fn hset_map(&self, key: &str, fields: &[(String, String)]) -> Result<(), KvError> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut inner = self.inner.write().await;
        let hash = inner.hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            hash.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, KvError> {
        let inner = self.inner.read().await;
        Ok(inner.hashes.get(key).and_then(|h| h.get(field).cloned()))
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, KvError> {
        let inner = self.inner.read().await;
        Ok(inner
            .hashes
            .get(key)
            .map(|h| h.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn hexists(&self, key: &str, field: &str) -> Result<bool, KvError> {
        let inner = self.inner.read().await;
        Ok(inner
            .hashes
            .get(key)
            .map(|h| h.contains_key(field))
            .unwrap_or(false))
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<bool, KvError> {
        let mut inner = self.inner.write().await;
        Ok(inner
            .hashes
            .get_mut(key)
            .map(|h| h.remove(field).is_some())
            .unwrap_or(false))
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<u64, KvError> {
        let mut inner = self.inner.write().await;
        let list = inner.lists.entry(key.to_string()).or_default();
        list.push(value.to_string());
        Ok(list.len() as u64)
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, KvError> {
        let inner = self.inner.read().await;
        let Some(list) = inner.lists.get(key) else {
            return Ok(Vec::new());
        };
        Ok(match resolve_range(list.len(), start, stop) {
            Some((lo, hi)) => list[lo..=hi].to_vec(),
            None => Vec::new(),
        })
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), KvError> {
        let mut inner = self.inner.write().await;
        inner
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, KvError> {
        let inner = self.inner.read().await;
        Ok(inner
            .sets
            .get(key)
            .map(|s| {
                let mut members: Vec<String> = s.iter().cloned().collect();
                members.sort();
                members
            })
            .unwrap_or_default())
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), KvError> {
        let mut inner = self.inner.write().await;
        inner
            .zsets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    async fn zrevrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, KvError> {
        let inner = self.inner.read().await;
        let Some(zset) = inner.zsets.get(key) else {
            return Ok(Vec::new());
        };
        let ordered = zset_rev_ordered(zset);
        Ok(match resolve_range(ordered.len(), start, stop) {
            Some((lo, hi)) => ordered[lo..=hi].iter().map(|(m, _)| m.clone()).collect(),
            None => Vec::new(),
        })
    }

    async fn zrevrangebyscore(
        &self,
        key: &str,
        max: f64,
        min: f64,
        offset: usize,
        count: usize,
    ) -> Result<Vec<String>, KvError> {
        let inner = self.inner.read().await;
        let Some(zset) = inner.zsets.get(key) else {
            return Ok(Vec::new());
        };
        Ok(zset_rev_ordered(zset)
            .into_iter()
            .filter(|(_, score)| *score <= max && *score >= min)
            .skip(offset)
            .take(count)
            .map(|(member, _)| member)
            .collect())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, KvError> {
        let inner = self.inner.read().await;
        let mut all: HashSet<&String> = HashSet::new();
        all.extend(inner.strings.keys());
        all.extend(inner.lists.keys());
        all.extend(inner.hashes.keys());
        all.extend(inner.sets.keys());
        all.extend(inner.zsets.keys());
        let mut matched: Vec<String> = all
            .into_iter()
            .filter(|k| glob_match(pattern, k))
            .cloned()
            .collect();
        matched.sort();
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_del() {
        let kv = MemoryKv::new();
        kv.set("k", "v").await.expect("set");
        assert_eq!(kv.get("k").await.expect("get"), Some("v".to_string()));
        assert_eq!(kv.del(&["k".to_string()]).await.expect("del"), 1);
        assert_eq!(kv.get("k").await.expect("get"), None);
    }

    #[tokio::test]
    async fn missing_key_is_none_not_error() {
        let kv = MemoryKv::new();
        assert_eq!(kv.get("missing").await.expect("get"), None);
        assert!(!kv.exists("missing").await.expect("exists"));
        assert!(kv.hgetall("missing").await.expect("hgetall").is_empty());
    }

    #[tokio::test]
    async fn lrange_full_range_preserves_insertion_order() {
        let kv = MemoryKv::new();
        for value in ["a", "b", "c"] {
            kv.rpush("list", value).await.expect("rpush");
        }
        assert_eq!(
            kv.lrange("list", 0, -1).await.expect("lrange"),
            vec!["a", "b", "c"]
        );
    }

    #[tokio::test]
    async fn lrange_negative_window() {
        let kv = MemoryKv::new();
        for value in ["a", "b", "c", "d"] {
            kv.rpush("list", value).await.expect("rpush");
        }
        assert_eq!(
            kv.lrange("list", -2, -1).await.expect("lrange"),
            vec!["c", "d"]
        );
        assert_eq!(
            kv.lrange("list", -10, -1).await.expect("lrange"),
            vec!["a", "b", "c", "d"]
        );
        assert!(kv.lrange("list", 2, 1).await.expect("lrange").is_empty());
    }

    #[tokio::test]
    async fn hash_ops() {
        let kv = MemoryKv::new();
        kv.hset_map("h", &[("f1".into(), "v1".into()), ("f2".into(), "v2".into())])
            .await
            .expect("hset");
        assert_eq!(kv.hget("h", "f1").await.expect("hget"), Some("v1".to_string()));
        assert!(kv.hexists("h", "f2").await.expect("hexists"));
        assert!(!kv.hexists("h", "f3").await.expect("hexists"));
        assert_eq!(kv.hgetall("h").await.expect("hgetall").len(), 2);
    }

    #[tokio::test]
    async fn zrevrange_orders_by_score_then_member() {
        let kv = MemoryKv::new();
        kv.zadd("z", "a", 1.0).await.expect("zadd");
        kv.zadd("z", "b", 3.0).await.expect("zadd");
        kv.zadd("z", "c", 3.0).await.expect("zadd");
        kv.zadd("z", "d", 2.0).await.expect("zadd");
        assert_eq!(
            kv.zrevrange("z", 0, -1).await.expect("zrevrange"),
            vec!["c", "b", "d", "a"]
        );
        assert_eq!(kv.zrevrange("z", 0, 1).await.expect("zrevrange"), vec!["c", "b"]);
    }

    #[tokio::test]
    async fn zrevrangebyscore_filters_and_paginates() {
        let kv = MemoryKv::new();
        for (member, score) in [("a", 1.0), ("b", 2.0), ("c", 3.0), ("d", 4.0)] {
            kv.zadd("z", member, score).await.expect("zadd");
        }
        assert_eq!(
            kv.zrevrangebyscore("z", 3.0, 1.0, 0, 10).await.expect("range"),
            vec!["c", "b", "a"]
        );
        assert_eq!(
            kv.zrevrangebyscore("z", 4.0, 1.0, 1, 2).await.expect("range"),
            vec!["c", "b"]
        );
    }

    #[tokio::test]
    async fn keys_glob() {
        let kv = MemoryKv::new();
        kv.set("rpg:map:node:tavern", "{}").await.expect("set");
        kv.set("rpg:map:node:forest", "{}").await.expect("set");
        kv.set("rpg:state:s1", "{}").await.expect("set");
        let keys = kv.keys("rpg:map:node:*").await.expect("keys");
        assert_eq!(keys.len(), 2);
        assert!(kv.keys("nomatch:*").await.expect("keys").is_empty());
        assert_eq!(kv.keys("rpg:state:s1").await.expect("keys").len(), 1);
    }

    #[tokio::test]
    async fn del_clears_every_structure() {
        let kv = MemoryKv::new();
        kv.rpush("k", "a").await.expect("rpush");
        kv.sadd("k2", "m").await.expect("sadd");
        assert_eq!(kv.del(&["k".to_string(), "k2".to_string()]).await.expect("del"), 2);
        assert!(!kv.exists("k").await.expect("exists"));
        assert!(!kv.exists("k2").await.expect("exists"));
    }

    #[test]
    fn glob_match_cases() {
        assert!(glob_match("rpg:*", "rpg:map:node:x"));
        assert!(glob_match("rpg:*:tags", "rpg:events:tags"));
        assert!(!glob_match("rpg:*", "other:rpg:x"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "exactly"));
    }
}
