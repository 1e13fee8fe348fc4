//! Content cache and rate limiter in front of the LLM generator.
//!
//! A keyed TTL cache with LRU eviction (least access-count, ties by
//! oldest last-access), context-hash invalidation, token-set similarity
//! reuse, and a sliding-window call limiter. When the limiter refuses
//! or the generator fails in transport, the stale cached payload is
//! returned instead of failing the turn.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use talespin_domain::{CrisisLevel, PlayerId, RegionId};
use tracing::debug;

use crate::error::EngineError;

/// Cached content categories; each carries its own default TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Location,
    Npc,
    Item,
    Quest,
    Dialogue,
    Narrative,
    Description,
    Custom,
}

/// Why the decision function chose to generate (or not).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationReason {
    CacheMiss,
    StaleCache,
    ForceRefresh,
    ContextChange,
    CacheHit,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl_default: Duration,
    pub ttl_location: Duration,
    pub ttl_npc: Duration,
    pub ttl_narrative: Duration,
    pub max_cache_size: usize,
    pub similarity_threshold: f64,
    pub max_calls_per_minute: usize,
    pub min_interval: Duration,
    pub reuse_similar_content: bool,
    pub context_aware_caching: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_default: Duration::from_secs(3600),
            ttl_location: Duration::from_secs(7200),
            ttl_npc: Duration::from_secs(1800),
            ttl_narrative: Duration::from_secs(300),
            max_cache_size: 1000,
            similarity_threshold: 0.8,
            max_calls_per_minute: 20,
            min_interval: Duration::from_millis(100),
            reuse_similar_content: true,
            context_aware_caching: true,
        }
    }
}

impl CacheConfig {
    fn ttl_for(&self, kind: ContentKind) -> Duration {
        match kind {
            ContentKind::Location => self.ttl_location,
            ContentKind::Npc => self.ttl_npc,
            ContentKind::Narrative => self.ttl_narrative,
            _ => self.ttl_default,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub kind: ContentKind,
    pub content: Value,
    pub context_hash: String,
    pub created_at: Instant,
    pub last_accessed: Instant,
    pub access_count: u64,
    pub ttl: Duration,
    pub tags: HashSet<String>,
}

impl CacheEntry {
    pub fn is_expired(&self) -> bool {
        self.created_at.elapsed() > self.ttl
    }

    pub fn is_context_valid(&self, current_hash: &str) -> bool {
        self.context_hash == current_hash
    }
}

// =============================================================================
// Context hash
// =============================================================================

/// Deterministic digest over the narration-relevant state: player,
/// location, crisis level, hour bucket, and sorted flag names. Cache
/// entries are context-valid only while this digest is unchanged.
pub fn context_hash(
    player_id: &PlayerId,
    location: &RegionId,
    crisis: CrisisLevel,
    total_minutes: u64,
    flags: &[String],
) -> String {
    let mut sorted = flags.to_vec();
    sorted.sort();
    let canonical = json!({
        "crisis_level": crisis.value(),
        "flags": sorted,
        "location": location.as_str(),
        "player_id": player_id.as_str(),
        "time": total_minutes / 60,
    });
    let digest = Sha256::digest(canonical.to_string().as_bytes());
    hex::encode(digest)
}

// =============================================================================
// The cache proper
// =============================================================================

struct CacheState {
    entries: HashMap<String, CacheEntry>,
    kind_index: HashMap<ContentKind, HashSet<String>>,
}

pub struct ContentCache {
    config: CacheConfig,
    state: Mutex<CacheState>,
}

impl ContentCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                kind_index: HashMap::new(),
            }),
        }
    }

    /// Fetch an entry (expired or not), bumping its access stats.
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let entry = state.entries.get_mut(key)?;
        entry.last_accessed = Instant::now();
        entry.access_count += 1;
        Some(entry.clone())
    }

    pub fn set(
        &self,
        key: &str,
        content: Value,
        kind: ContentKind,
        context_hash: String,
        ttl: Option<Duration>,
        tags: HashSet<String>,
    ) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.entries.len() >= self.config.max_cache_size && !state.entries.contains_key(key) {
            evict_lru(&mut state);
        }
        if let Some(old) = state.entries.remove(key) {
            if let Some(index) = state.kind_index.get_mut(&old.kind) {
                index.remove(key);
            }
        }
        let now = Instant::now();
        let entry = CacheEntry {
            key: key.to_string(),
            kind,
            content,
            context_hash,
            created_at: now,
            last_accessed: now,
            access_count: 0,
            ttl: ttl.unwrap_or_else(|| self.config.ttl_for(kind)),
            tags,
        };
        state.entries.insert(key.to_string(), entry);
        state.kind_index.entry(kind).or_default().insert(key.to_string());
    }

    pub fn delete(&self, key: &str) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match state.entries.remove(key) {
            Some(entry) => {
                if let Some(index) = state.kind_index.get_mut(&entry.kind) {
                    index.remove(key);
                }
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.entries.clear();
        state.kind_index.clear();
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Non-expired entries of one kind, without touching access stats.
    pub fn get_by_kind(&self, kind: ContentKind) -> Vec<CacheEntry> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let Some(keys) = state.kind_index.get(&kind) else {
            return Vec::new();
        };
        keys.iter()
            .filter_map(|key| state.entries.get(key))
            .filter(|entry| !entry.is_expired())
            .cloned()
            .collect()
    }

    pub fn cleanup_expired(&self) -> usize {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let expired: Vec<(String, ContentKind)> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(key, entry)| (key.clone(), entry.kind))
            .collect();
        for (key, kind) in &expired {
            state.entries.remove(key);
            if let Some(index) = state.kind_index.get_mut(kind) {
                index.remove(key);
            }
        }
        expired.len()
    }

    /// Test hook: rewrite an entry's timestamps.
    #[cfg(test)]
    fn set_entry_times(&self, key: &str, created_at: Instant, last_accessed: Instant) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = state.entries.get_mut(key) {
            entry.created_at = created_at;
            entry.last_accessed = last_accessed;
        }
    }
}

/// Evict by least access count, ties broken by oldest last-access.
fn evict_lru(state: &mut CacheState) {
    let victim = state
        .entries
        .values()
        .min_by(|a, b| {
            a.access_count
                .cmp(&b.access_count)
                .then(a.last_accessed.cmp(&b.last_accessed))
        })
        .map(|entry| (entry.key.clone(), entry.kind));
    if let Some((key, kind)) = victim {
        debug!(key, "cache eviction");
        state.entries.remove(&key);
        if let Some(index) = state.kind_index.get_mut(&kind) {
            index.remove(&key);
        }
    }
}

// =============================================================================
// Similarity
// =============================================================================

/// Jaccard similarity over lowercased whitespace-tokenized word sets.
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let words_a: HashSet<String> = a.to_lowercase().split_whitespace().map(String::from).collect();
    let words_b: HashSet<String> = b.to_lowercase().split_whitespace().map(String::from).collect();
    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }
    let intersection = words_a.intersection(&words_b).count();
    let union = words_a.union(&words_b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

fn entry_text(entry: &CacheEntry) -> Option<String> {
    match &entry.content {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => {
            let name = map.get("name").and_then(Value::as_str).unwrap_or_default();
            let desc = map
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default();
            Some(format!("{name} {desc}"))
        }
        _ => None,
    }
}

// =============================================================================
// Rate limiter
// =============================================================================

/// Sliding 60-second window plus a minimum inter-call interval.
pub struct RateLimiter {
    max_calls_per_minute: usize,
    min_interval: Duration,
    window: Mutex<VecDeque<Instant>>,
}

const WINDOW: Duration = Duration::from_secs(60);

impl RateLimiter {
    pub fn new(max_calls_per_minute: usize, min_interval: Duration) -> Self {
        Self {
            max_calls_per_minute,
            min_interval,
            window: Mutex::new(VecDeque::new()),
        }
    }

    pub fn can_call(&self) -> bool {
        let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        while window
            .front()
            .is_some_and(|t| now.duration_since(*t) > WINDOW)
        {
            window.pop_front();
        }
        if window.len() >= self.max_calls_per_minute {
            return false;
        }
        if let Some(last) = window.back() {
            if now.duration_since(*last) < self.min_interval {
                return false;
            }
        }
        true
    }

    pub fn record_call(&self) {
        let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        window.push_back(Instant::now());
    }

    /// Sleep out a pending min-interval gap. Never waits out a full
    /// window - callers degrade to stale content for that case.
    pub async fn pause_for_interval(&self) {
        let wait = self.wait_time();
        if wait > 0.0 && wait <= self.min_interval.as_secs_f64() {
            tokio::time::sleep(Duration::from_secs_f64(wait)).await;
        }
    }

    /// Seconds until the limiter would next admit a call; 0 when it
    /// already would.
    pub fn wait_time(&self) -> f64 {
        if self.can_call() {
            return 0.0;
        }
        let window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        if window.len() >= self.max_calls_per_minute {
            if let Some(oldest) = window.front() {
                let age = now.duration_since(*oldest);
                return (WINDOW.saturating_sub(age)).as_secs_f64();
            }
        }
        if let Some(last) = window.back() {
            let since = now.duration_since(*last);
            return self.min_interval.saturating_sub(since).as_secs_f64();
        }
        0.0
    }
}

// =============================================================================
// Read-through policy
// =============================================================================

#[derive(Debug, Default, Clone)]
pub struct CacheStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub similar_reused: u64,
    pub calls_blocked: u64,
    pub total_calls: u64,
}

/// The cache, the limiter, and the decision function glued together.
pub struct GenerationCache {
    config: CacheConfig,
    cache: ContentCache,
    limiter: RateLimiter,
    stats: Mutex<CacheStats>,
}

impl GenerationCache {
    pub fn new(config: CacheConfig) -> Self {
        let cache = ContentCache::new(config.clone());
        let limiter = RateLimiter::new(config.max_calls_per_minute, config.min_interval);
        Self {
            config,
            cache,
            limiter,
            stats: Mutex::new(CacheStats::default()),
        }
    }

    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Decide whether a fresh generation is needed for `key` under the
    /// given context hash.
    pub fn should_generate(
        &self,
        key: &str,
        current_hash: &str,
        force: bool,
    ) -> (bool, GenerationReason) {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        stats.total_calls += 1;

        if force {
            return (true, GenerationReason::ForceRefresh);
        }
        let Some(entry) = self.cache.get(key) else {
            stats.cache_misses += 1;
            return (true, GenerationReason::CacheMiss);
        };
        if entry.is_expired() {
            stats.cache_misses += 1;
            return (true, GenerationReason::StaleCache);
        }
        if self.config.context_aware_caching && !entry.is_context_valid(current_hash) {
            stats.cache_misses += 1;
            return (true, GenerationReason::ContextChange);
        }
        stats.cache_hits += 1;
        (false, GenerationReason::CacheHit)
    }

    /// Read-through: return `(payload, freshly_generated)`. A refused or
    /// failed generation degrades to the stale payload when one exists.
    pub async fn get_or_generate<F>(
        &self,
        key: &str,
        current_hash: &str,
        kind: ContentKind,
        generator: F,
        force: bool,
    ) -> Result<(Option<Value>, bool), EngineError>
    where
        F: Future<Output = Result<Value, EngineError>>,
    {
        let (generate, reason) = self.should_generate(key, current_hash, force);
        if !generate {
            return Ok((self.cache.get(key).map(|e| e.content), false));
        }
        debug!(key, ?reason, "generation needed");

        if !self.limiter.can_call() {
            let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
            stats.calls_blocked += 1;
            return Ok((self.cache.get(key).map(|e| e.content), false));
        }

        match generator.await {
            Ok(content) => {
                self.limiter.record_call();
                let stored_hash = if self.config.context_aware_caching {
                    current_hash.to_string()
                } else {
                    String::new()
                };
                self.cache
                    .set(key, content.clone(), kind, stored_hash, None, HashSet::new());
                Ok((Some(content), true))
            }
            Err(e) => {
                // Transport failure: fall back to the stale payload.
                let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
                stats.calls_blocked += 1;
                drop(stats);
                debug!(key, error = %e, "generator failed, serving stale if present");
                Ok((self.cache.get(key).map(|entry| entry.content), false))
            }
        }
    }

    /// Top-1 similar non-expired entry of a kind, if above threshold.
    pub fn find_similar_content(
        &self,
        query: &str,
        kind: ContentKind,
        threshold: Option<f64>,
    ) -> Option<(Value, f64)> {
        if !self.config.reuse_similar_content {
            return None;
        }
        let threshold = threshold.unwrap_or(self.config.similarity_threshold);
        let best = self
            .cache
            .get_by_kind(kind)
            .into_iter()
            .filter_map(|entry| {
                entry_text(&entry).map(|text| (entry, jaccard_similarity(query, &text)))
            })
            .filter(|(_, score)| *score >= threshold)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        match best {
            Some((entry, score)) => {
                let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
                stats.similar_reused += 1;
                Some((entry.content, score))
            }
            None => None,
        }
    }

    pub fn stats(&self) -> Map<String, Value> {
        let stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        let lookups = stats.cache_hits + stats.cache_misses;
        let hit_rate = if lookups > 0 {
            stats.cache_hits as f64 / lookups as f64
        } else {
            0.0
        };
        let mut out = Map::new();
        out.insert("cache_hits".into(), json!(stats.cache_hits));
        out.insert("cache_misses".into(), json!(stats.cache_misses));
        out.insert("similar_reused".into(), json!(stats.similar_reused));
        out.insert("calls_blocked".into(), json!(stats.calls_blocked));
        out.insert("total_calls".into(), json!(stats.total_calls));
        out.insert("cache_hit_rate".into(), json!(hit_rate));
        out.insert("cache_size".into(), json!(self.cache.len()));
        out
    }

    pub fn snapshot_stats(&self) -> CacheStats {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cleanup(&self) -> usize {
        self.cache.cleanup_expired()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config(capacity: usize) -> CacheConfig {
        CacheConfig {
            max_cache_size: capacity,
            min_interval: Duration::ZERO,
            ..CacheConfig::default()
        }
    }

    fn set_plain(cache: &ContentCache, key: &str, content: &str) {
        cache.set(
            key,
            json!(content),
            ContentKind::Narrative,
            String::new(),
            None,
            HashSet::new(),
        );
    }

    #[test]
    fn get_bumps_access_stats() {
        let cache = ContentCache::new(small_config(10));
        set_plain(&cache, "k", "v");
        assert_eq!(cache.get("k").expect("entry").access_count, 1);
        assert_eq!(cache.get("k").expect("entry").access_count, 2);
    }

    #[test]
    fn expired_entry_detected() {
        let cache = ContentCache::new(small_config(10));
        cache.set(
            "k",
            json!("v"),
            ContentKind::Narrative,
            String::new(),
            Some(Duration::from_millis(10)),
            HashSet::new(),
        );
        let past = Instant::now() - Duration::from_millis(50);
        cache.set_entry_times("k", past, past);
        assert!(cache.get("k").expect("entry").is_expired());
        assert_eq!(cache.cleanup_expired(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn ttl_defaults_by_kind() {
        let config = CacheConfig::default();
        assert_eq!(config.ttl_for(ContentKind::Location), Duration::from_secs(7200));
        assert_eq!(config.ttl_for(ContentKind::Npc), Duration::from_secs(1800));
        assert_eq!(config.ttl_for(ContentKind::Narrative), Duration::from_secs(300));
        assert_eq!(config.ttl_for(ContentKind::Quest), Duration::from_secs(3600));
    }

    #[test]
    fn lru_evicts_least_accessed_then_oldest() {
        let cache = ContentCache::new(small_config(2));
        set_plain(&cache, "a", "1");
        set_plain(&cache, "b", "2");
        // "a" gets touched, so "b" is least-accessed.
        cache.get("a");
        set_plain(&cache, "c", "3");
        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn lru_tie_breaks_by_oldest_access() {
        let cache = ContentCache::new(small_config(2));
        set_plain(&cache, "a", "1");
        set_plain(&cache, "b", "2");
        let old = Instant::now() - Duration::from_secs(5);
        cache.set_entry_times("a", Instant::now(), old);
        set_plain(&cache, "c", "3");
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
    }

    #[test]
    fn jaccard_basics() {
        assert_eq!(jaccard_similarity("a b c", "a b c"), 1.0);
        assert_eq!(jaccard_similarity("a b", "c d"), 0.0);
        assert!((jaccard_similarity("a b c d", "a b") - 0.5).abs() < 1e-9);
        assert_eq!(jaccard_similarity("", "a"), 0.0);
    }

    #[test]
    fn rate_limiter_caps_window() {
        let limiter = RateLimiter::new(3, Duration::ZERO);
        for _ in 0..3 {
            assert!(limiter.can_call());
            limiter.record_call();
        }
        assert!(!limiter.can_call());
        assert!(limiter.wait_time() > 0.0);
    }

    #[test]
    fn rate_limiter_min_interval() {
        let limiter = RateLimiter::new(100, Duration::from_secs(5));
        assert!(limiter.can_call());
        limiter.record_call();
        assert!(!limiter.can_call());
        let wait = limiter.wait_time();
        assert!(wait > 0.0 && wait <= 5.0);
    }

    #[tokio::test]
    async fn read_through_generates_then_hits() {
        let cache = GenerationCache::new(small_config(10));
        let (content, fresh) = cache
            .get_or_generate("k", "ctx", ContentKind::Narrative, async { Ok(json!("text")) }, false)
            .await
            .expect("generate");
        assert_eq!(content, Some(json!("text")));
        assert!(fresh);

        let (content, fresh) = cache
            .get_or_generate(
                "k",
                "ctx",
                ContentKind::Narrative,
                async { panic!("generator must not run on a cache hit") },
                false,
            )
            .await
            .expect("hit");
        assert_eq!(content, Some(json!("text")));
        assert!(!fresh);

        let stats = cache.snapshot_stats();
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 1);
    }

    #[tokio::test]
    async fn context_change_regenerates() {
        let cache = GenerationCache::new(small_config(10));
        cache
            .get_or_generate("k", "ctx1", ContentKind::Narrative, async { Ok(json!("one")) }, false)
            .await
            .expect("generate");
        let (decision, reason) = cache.should_generate("k", "ctx2", false);
        assert!(decision);
        assert_eq!(reason, GenerationReason::ContextChange);
    }

    #[tokio::test]
    async fn force_bypasses_cache() {
        let cache = GenerationCache::new(small_config(10));
        cache
            .get_or_generate("k", "ctx", ContentKind::Narrative, async { Ok(json!("one")) }, false)
            .await
            .expect("generate");
        let (_, reason) = cache.should_generate("k", "ctx", true);
        assert_eq!(reason, GenerationReason::ForceRefresh);
    }

    #[tokio::test]
    async fn rate_limited_miss_returns_stale_or_none() {
        let mut config = small_config(10);
        config.max_calls_per_minute = 1;
        let cache = GenerationCache::new(config);

        cache
            .get_or_generate("k1", "ctx", ContentKind::Narrative, async { Ok(json!("one")) }, false)
            .await
            .expect("generate");

        // Window is full: a different key gets None, no generator run.
        let (content, fresh) = cache
            .get_or_generate(
                "k2",
                "ctx",
                ContentKind::Narrative,
                async { panic!("blocked call must not run the generator") },
                false,
            )
            .await
            .expect("blocked");
        assert_eq!(content, None);
        assert!(!fresh);
        assert_eq!(cache.snapshot_stats().calls_blocked, 1);

        // The already-cached key is still served from cache.
        let (content, fresh) = cache
            .get_or_generate(
                "k1",
                "ctx",
                ContentKind::Narrative,
                async { panic!("cache hit must not run the generator") },
                false,
            )
            .await
            .expect("hit");
        assert_eq!(content, Some(json!("one")));
        assert!(!fresh);
    }

    #[tokio::test]
    async fn generator_failure_serves_stale() {
        let cache = GenerationCache::new(small_config(10));
        cache
            .get_or_generate("k", "ctx", ContentKind::Narrative, async { Ok(json!("old")) }, false)
            .await
            .expect("generate");

        // Force regeneration; the generator fails, stale comes back.
        let (content, fresh) = cache
            .get_or_generate(
                "k",
                "ctx",
                ContentKind::Narrative,
                async { Err(EngineError::Transport("timeout".into())) },
                true,
            )
            .await
            .expect("fallback");
        assert_eq!(content, Some(json!("old")));
        assert!(!fresh);
        assert_eq!(cache.snapshot_stats().calls_blocked, 1);
    }

    #[test]
    fn similarity_lookup_top1() {
        let cache = GenerationCache::new(small_config(10));
        cache.cache().set(
            "loc1",
            json!({"name": "misty forest", "description": "tall dark pines"}),
            ContentKind::Location,
            String::new(),
            None,
            HashSet::new(),
        );
        cache.cache().set(
            "loc2",
            json!("a bustling market street"),
            ContentKind::Location,
            String::new(),
            None,
            HashSet::new(),
        );

        let (content, score) = cache
            .find_similar_content("misty forest tall dark pines", ContentKind::Location, None)
            .expect("similar");
        assert_eq!(content["name"], "misty forest");
        assert!(score >= 0.8);
        assert_eq!(cache.snapshot_stats().similar_reused, 1);

        assert!(cache
            .find_similar_content("nothing like those", ContentKind::Location, None)
            .is_none());
    }

    #[test]
    fn context_hash_is_deterministic_and_sensitive() {
        let player = PlayerId::new("p1");
        let location = RegionId::new("tavern");
        let flags = vec!["b".to_string(), "a".to_string()];
        let h1 = context_hash(&player, &location, CrisisLevel::Calm, 90, &flags);
        let h2 = context_hash(&player, &location, CrisisLevel::Calm, 90, &flags);
        assert_eq!(h1, h2);

        // Same hour bucket: unchanged.
        let h3 = context_hash(&player, &location, CrisisLevel::Calm, 119, &flags);
        assert_eq!(h1, h3);
        // Next hour bucket: changed.
        let h4 = context_hash(&player, &location, CrisisLevel::Calm, 120, &flags);
        assert_ne!(h1, h4);
        // Crisis shift: changed.
        let h5 = context_hash(&player, &location, CrisisLevel::High, 90, &flags);
        assert_ne!(h1, h5);
        // Flag order is irrelevant.
        let h6 = context_hash(
            &player,
            &location,
            CrisisLevel::Calm,
            90,
            &["a".to_string(), "b".to_string()],
        );
        assert_eq!(h1, h6);
    }

    #[test]
    fn stats_block_shape() {
        let cache = GenerationCache::new(small_config(10));
        cache.should_generate("k", "ctx", false);
        let stats = cache.stats();
        assert_eq!(stats["total_calls"], json!(1));
        assert_eq!(stats["cache_misses"], json!(1));
        assert_eq!(stats["cache_hit_rate"], json!(0.0));
    }
}
