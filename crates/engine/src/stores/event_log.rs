//! Append-only, time- and tag-indexed event log.
//!
//! Every event is persisted before listeners run, so a listener crash
//! leaves the event durably readable. Listeners run synchronously in
//! descending priority (ties in registration order); a failing listener
//! is logged and skipped without aborting the rest.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{Local, TimeZone};
use serde_json::{Map, Value};
use talespin_domain::{Event, EventId, EventPriority, EventType, PlayerId, RegionId, SessionId};
use tracing::warn;

use crate::error::EngineError;
use crate::infrastructure::ports::{ClockPort, KvStore};

fn counts_to_value(counts: HashMap<String, u64>) -> Value {
    let map: Map<String, Value> = counts
        .into_iter()
        .map(|(k, v)| (k, Value::from(v)))
        .collect();
    Value::Object(map)
}

pub type EventHandler = Arc<dyn Fn(&Event) -> Result<(), EngineError> + Send + Sync>;
pub type EventCondition = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

/// A registered listener: which types it wants, an optional predicate,
/// and an ordering priority (higher runs first).
pub struct EventListener {
    pub event_types: HashSet<EventType>,
    pub handler: EventHandler,
    pub condition: Option<EventCondition>,
    pub priority: i32,
}

impl EventListener {
    pub fn new(event_types: impl IntoIterator<Item = EventType>, handler: EventHandler) -> Self {
        Self {
            event_types: event_types.into_iter().collect(),
            handler,
            condition: None,
            priority: 0,
        }
    }

    pub fn with_condition(mut self, condition: EventCondition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    fn can_handle(&self, event: &Event) -> bool {
        if !self.event_types.contains(&event.event_type) {
            return false;
        }
        match &self.condition {
            Some(condition) => condition(event),
            None => true,
        }
    }
}

/// Parameters for `emit`; type, actor, and location are required, the
/// rest default.
pub struct EmitEvent {
    pub event_type: EventType,
    pub player_id: PlayerId,
    pub location: RegionId,
    pub data: Map<String, Value>,
    pub tags: Vec<String>,
    pub priority: EventPriority,
    pub related_events: Vec<EventId>,
}

impl EmitEvent {
    pub fn new(
        event_type: EventType,
        player_id: impl Into<PlayerId>,
        location: impl Into<RegionId>,
    ) -> Self {
        Self {
            event_type,
            player_id: player_id.into(),
            location: location.into(),
            data: Map::new(),
            tags: Vec::new(),
            priority: EventPriority::Medium,
            related_events: Vec::new(),
        }
    }

    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }

    pub fn with_entry(mut self, key: &str, value: Value) -> Self {
        self.data.insert(key.to_string(), value);
        self
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_related(mut self, related: impl IntoIterator<Item = EventId>) -> Self {
        self.related_events = related.into_iter().collect();
        self
    }
}

pub struct EventLog {
    session_id: SessionId,
    kv: Arc<dyn KvStore>,
    clock: Arc<dyn ClockPort>,
    ttl: u64,
    listeners: RwLock<Vec<EventListener>>,
    /// Enforces non-decreasing timestamps within the emission stream.
    last_timestamp: Mutex<f64>,
}

impl EventLog {
    pub fn new(
        session_id: SessionId,
        kv: Arc<dyn KvStore>,
        clock: Arc<dyn ClockPort>,
        ttl: u64,
    ) -> Self {
        Self {
            session_id,
            kv,
            clock,
            ttl,
            listeners: RwLock::new(Vec::new()),
            last_timestamp: Mutex::new(0.0),
        }
    }

    fn event_key(&self, event_id: &EventId) -> String {
        format!("rpg:events:{}:{}", self.session_id, event_id)
    }

    fn index_key(&self) -> String {
        format!("rpg:events:index:{}", self.session_id)
    }

    fn tag_key(&self, tag: &str) -> String {
        format!("rpg:events:tags:{}:{}", self.session_id, tag)
    }

    // =========================================================================
    // Emission
    // =========================================================================

    pub async fn emit(&self, params: EmitEvent) -> Result<Event, EngineError> {
        let timestamp = {
            let mut last = self.last_timestamp.lock().unwrap_or_else(|e| e.into_inner());
            let now = self.clock.now_epoch().max(*last);
            *last = now;
            now
        };

        let mut event = Event {
            event_type: params.event_type,
            event_id: EventId::generate(),
            timestamp,
            player_id: params.player_id,
            session_id: self.session_id.clone(),
            location: params.location,
            priority: params.priority,
            data: params.data,
            tags: params.tags,
            processed: false,
            related_events: params.related_events,
        };

        self.persist(&event).await?;
        self.kv
            .zadd(&self.index_key(), event.event_id.as_str(), event.timestamp)
            .await?;
        for tag in &event.tags {
            self.kv
                .sadd(&self.tag_key(tag), event.event_id.as_str())
                .await?;
        }

        if self.notify_listeners(&event) {
            event.processed = true;
            self.persist(&event).await?;
        }
        Ok(event)
    }

    async fn persist(&self, event: &Event) -> Result<(), EngineError> {
        let payload = serde_json::to_string(event)?;
        self.kv
            .setex(&self.event_key(&event.event_id), self.ttl, &payload)
            .await?;
        Ok(())
    }

    /// Run matching listeners; returns whether at least one succeeded.
    fn notify_listeners(&self, event: &Event) -> bool {
        let listeners = self.listeners.read().unwrap_or_else(|e| e.into_inner());
        let mut any_success = false;
        for listener in listeners.iter() {
            if !listener.can_handle(event) {
                continue;
            }
            match (listener.handler)(event) {
                Ok(()) => any_success = true,
                Err(e) => {
                    warn!(event = %event.event_id, error = %e, "event listener failed");
                }
            }
        }
        any_success
    }

    // =========================================================================
    // Listener registry
    // =========================================================================

    pub fn register_listener(&self, listener: EventListener) {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        listeners.push(listener);
        // Stable sort keeps registration order within a priority tier.
        listeners.sort_by_key(|l| std::cmp::Reverse(l.priority));
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn get_event(&self, event_id: &EventId) -> Result<Option<Event>, EngineError> {
        let Some(raw) = self.kv.get(&self.event_key(event_id)).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(event) => Ok(Some(event)),
            Err(e) => {
                warn!(event = %event_id, error = %e, "event payload unreadable");
                Ok(None)
            }
        }
    }

    /// All events, reverse chronological.
    pub async fn get_all_events(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Event>, EngineError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let ids = self
            .kv
            .zrevrange(
                &self.index_key(),
                offset as i64,
                (offset + limit - 1) as i64,
            )
            .await?;
        self.fetch_events(ids).await
    }

    pub async fn get_events_by_type(
        &self,
        event_type: EventType,
        limit: usize,
    ) -> Result<Vec<Event>, EngineError> {
        let events = self.get_all_events(limit, 0).await?;
        Ok(events
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect())
    }

    pub async fn get_events_by_tag(
        &self,
        tag: &str,
        limit: usize,
    ) -> Result<Vec<Event>, EngineError> {
        let ids = self.kv.smembers(&self.tag_key(tag)).await?;
        let mut events = self
            .fetch_events(ids.into_iter().take(limit).collect())
            .await?;
        events.sort_by(|a, b| {
            b.timestamp
                .partial_cmp(&a.timestamp)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(events)
    }

    pub async fn get_events_by_location(
        &self,
        location: &RegionId,
        limit: usize,
    ) -> Result<Vec<Event>, EngineError> {
        let events = self.get_all_events(limit, 0).await?;
        Ok(events
            .into_iter()
            .filter(|e| &e.location == location)
            .collect())
    }

    pub async fn get_events_in_range(
        &self,
        start_time: f64,
        end_time: f64,
        limit: usize,
    ) -> Result<Vec<Event>, EngineError> {
        let ids = self
            .kv
            .zrevrangebyscore(&self.index_key(), end_time, start_time, 0, limit)
            .await?;
        self.fetch_events(ids).await
    }

    /// Bounded BFS over `related_events` up to `depth` hops from the
    /// starting event.
    pub async fn get_related_events(
        &self,
        event_id: &EventId,
        depth: usize,
    ) -> Result<Vec<Event>, EngineError> {
        let all = self.get_all_events(1000, 0).await?;
        let by_id: HashMap<&str, &Event> =
            all.iter().map(|e| (e.event_id.as_str(), e)).collect();

        let mut result = Vec::new();
        let mut visited: HashSet<String> = HashSet::from([event_id.as_str().to_string()]);
        let mut queue: VecDeque<String> = VecDeque::from([event_id.as_str().to_string()]);

        for _ in 0..depth {
            let Some(current) = queue.pop_front() else {
                break;
            };
            let Some(event) = by_id.get(current.as_str()) else {
                continue;
            };
            for related in &event.related_events {
                if visited.insert(related.as_str().to_string()) {
                    queue.push_back(related.as_str().to_string());
                    if let Some(found) = by_id.get(related.as_str()) {
                        result.push((*found).clone());
                    }
                }
            }
        }
        Ok(result)
    }

    async fn fetch_events(&self, ids: Vec<String>) -> Result<Vec<Event>, EngineError> {
        let mut events = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(event) = self.get_event(&EventId::new(id)).await? {
                events.push(event);
            }
        }
        Ok(events)
    }

    // =========================================================================
    // Summaries
    // =========================================================================

    /// Counts by type, location, and tag over the most recent events.
    pub async fn get_event_summary(&self) -> Result<Map<String, Value>, EngineError> {
        let all = self.get_all_events(1000, 0).await?;

        let mut type_counts: HashMap<String, u64> = HashMap::new();
        let mut location_counts: HashMap<String, u64> = HashMap::new();
        let mut tag_counts: HashMap<String, u64> = HashMap::new();
        for event in &all {
            *type_counts.entry(wire_name(event.event_type)).or_default() += 1;
            *location_counts
                .entry(event.location.as_str().to_string())
                .or_default() += 1;
            for tag in &event.tags {
                *tag_counts.entry(tag.clone()).or_default() += 1;
            }
        }

        let mut summary = Map::new();
        summary.insert("total_events".into(), Value::from(all.len()));
        summary.insert("event_types".into(), counts_to_value(type_counts));
        summary.insert("locations".into(), counts_to_value(location_counts));
        summary.insert("tags".into(), counts_to_value(tag_counts));
        summary.insert(
            "last_event_time".into(),
            all.first().map(|e| Value::from(e.timestamp)).unwrap_or(Value::Null),
        );
        Ok(summary)
    }

    /// Format the most recent events as a compact text block for prompt
    /// injection. Timestamps are rendered in local wall-clock time.
    pub async fn get_context_for_narration(&self, limit: usize) -> Result<String, EngineError> {
        let events = self.get_all_events(limit, 0).await?;
        if events.is_empty() {
            return Ok("(no significant events recorded yet)".to_string());
        }

        let mut lines = vec!["[Recent significant events]".to_string(), "=".repeat(50)];
        for event in &events {
            let time_str = Local
                .timestamp_opt(event.timestamp as i64, 0)
                .single()
                .map(|t| t.format("%H:%M").to_string())
                .unwrap_or_else(|| "--:--".to_string());
            lines.push(format!(
                "[{time_str}] {} @ {}",
                title_case(&wire_name(event.event_type)),
                event.location
            ));

            let mut detail = Vec::new();
            if let Some(desc) = event.data_str("description") {
                detail.push(desc.to_string());
            }
            if let Some(target) = event.data_str("target") {
                detail.push(format!("target: {target}"));
            }
            if let Some(result) = event.data_str("result") {
                detail.push(format!("result: {result}"));
            }
            if !detail.is_empty() {
                lines.push(format!("  └─ {}", detail.join(" | ")));
            }
        }
        Ok(lines.join("\n"))
    }

    // =========================================================================
    // Cleanup
    // =========================================================================

    pub async fn clear_all_events(&self) -> Result<(), EngineError> {
        let all = self.get_all_events(1000, 0).await?;
        let mut keys: Vec<String> = all.iter().map(|e| self.event_key(&e.event_id)).collect();
        keys.push(self.index_key());
        keys.extend(
            self.kv
                .keys(&format!("rpg:events:tags:{}:*", self.session_id))
                .await?,
        );
        self.kv.del(&keys).await?;
        Ok(())
    }
}

fn wire_name(event_type: EventType) -> String {
    serde_json::to_value(event_type)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

fn title_case(snake: &str) -> String {
    snake
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::clock::FixedClock;
    use crate::infrastructure::memory_kv::MemoryKv;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn log() -> EventLog {
        EventLog::new(
            SessionId::new("s1"),
            Arc::new(MemoryKv::new()),
            Arc::new(FixedClock(1_700_000_000.0)),
            3600,
        )
    }

    fn custom(location: &str) -> EmitEvent {
        EmitEvent::new(EventType::Custom, "player", location)
    }

    #[tokio::test]
    async fn emit_persists_and_indexes() {
        let log = log();
        let event = log
            .emit(custom("tavern").with_tags(["movement"]))
            .await
            .expect("emit");
        let loaded = log.get_event(&event.event_id).await.expect("get").expect("present");
        assert_eq!(loaded.event_type, EventType::Custom);
        assert_eq!(loaded.location, RegionId::new("tavern"));

        let by_tag = log.get_events_by_tag("movement", 10).await.expect("by tag");
        assert_eq!(by_tag.len(), 1);
    }

    #[tokio::test]
    async fn all_events_reverse_chronological() {
        let log = log();
        for loc in ["a", "b", "c"] {
            log.emit(custom(loc)).await.expect("emit");
        }
        let all = log.get_all_events(10, 0).await.expect("all");
        assert_eq!(all.len(), 3);
        // Same fixed-clock second: order falls back to id ordering, but
        // the count and offset window must hold.
        let paged = log.get_all_events(2, 1).await.expect("paged");
        assert_eq!(paged.len(), 2);
    }

    #[tokio::test]
    async fn timestamps_never_decrease() {
        let log = log();
        let first = log.emit(custom("a")).await.expect("emit");
        let second = log.emit(custom("b")).await.expect("emit");
        assert!(second.timestamp >= first.timestamp);
    }

    #[tokio::test]
    async fn listener_runs_and_marks_processed() {
        let log = log();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        log.register_listener(EventListener::new(
            [EventType::Discovery],
            Arc::new(move |_e| {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        ));

        let event = log
            .emit(EmitEvent::new(EventType::Discovery, "player", "forest"))
            .await
            .expect("emit");
        assert!(event.processed);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Stored copy reflects the processed flag.
        let stored = log.get_event(&event.event_id).await.expect("get").expect("present");
        assert!(stored.processed);

        // Non-matching type leaves processed false.
        let other = log.emit(custom("forest")).await.expect("emit");
        assert!(!other.processed);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_listener_is_isolated() {
        let log = log();
        let count = Arc::new(AtomicUsize::new(0));
        log.register_listener(
            EventListener::new(
                [EventType::Custom],
                Arc::new(|_e| Err(EngineError::invariant("boom"))),
            )
            .with_priority(10),
        );
        let seen = count.clone();
        log.register_listener(EventListener::new(
            [EventType::Custom],
            Arc::new(move |_e| {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        ));

        let event = log.emit(custom("tavern")).await.expect("emit");
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(event.processed);
    }

    #[tokio::test]
    async fn listener_priority_and_condition() {
        let log = log();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = order.clone();
        log.register_listener(
            EventListener::new(
                [EventType::Custom],
                Arc::new(move |_e| {
                    o1.lock().unwrap_or_else(|e| e.into_inner()).push("low");
                    Ok(())
                }),
            )
            .with_priority(1),
        );
        let o2 = order.clone();
        log.register_listener(
            EventListener::new(
                [EventType::Custom],
                Arc::new(move |_e| {
                    o2.lock().unwrap_or_else(|e| e.into_inner()).push("high");
                    Ok(())
                }),
            )
            .with_priority(5),
        );
        let o3 = order.clone();
        log.register_listener(
            EventListener::new(
                [EventType::Custom],
                Arc::new(move |_e| {
                    o3.lock().unwrap_or_else(|e| e.into_inner()).push("never");
                    Ok(())
                }),
            )
            .with_priority(99)
            .with_condition(Arc::new(|e| e.has_tag("nope"))),
        );

        log.emit(custom("tavern")).await.expect("emit");
        let order = order.lock().unwrap_or_else(|e| e.into_inner());
        assert_eq!(*order, vec!["high", "low"]);
    }

    #[tokio::test]
    async fn related_events_bfs() {
        let log = log();
        let root = log.emit(custom("a")).await.expect("emit");
        let child = log
            .emit(custom("b").with_related([root.event_id.clone()]))
            .await
            .expect("emit");
        let grandchild = log
            .emit(custom("c").with_related([child.event_id.clone()]))
            .await
            .expect("emit");

        let depth1 = log
            .get_related_events(&grandchild.event_id, 1)
            .await
            .expect("bfs");
        assert_eq!(depth1.len(), 1);
        assert_eq!(depth1[0].event_id, child.event_id);

        let depth2 = log
            .get_related_events(&grandchild.event_id, 2)
            .await
            .expect("bfs");
        assert_eq!(depth2.len(), 2);
    }

    #[tokio::test]
    async fn summary_counts_each_event_once() {
        let log = log();
        log.emit(custom("tavern").with_tags(["a", "b"])).await.expect("emit");
        log.emit(EmitEvent::new(EventType::Discovery, "player", "tavern"))
            .await
            .expect("emit");

        let summary = log.get_event_summary().await.expect("summary");
        assert_eq!(summary["total_events"], json!(2));
        assert_eq!(summary["event_types"]["custom"], json!(1));
        assert_eq!(summary["event_types"]["discovery"], json!(1));
        assert_eq!(summary["locations"]["tavern"], json!(2));
        assert_eq!(summary["tags"]["a"], json!(1));
    }

    #[tokio::test]
    async fn narration_context_formats_events() {
        let log = log();
        assert!(log
            .get_context_for_narration(15)
            .await
            .expect("context")
            .contains("no significant events"));

        log.emit(
            custom("tavern").with_entry("description", json!("A chair broke")),
        )
        .await
        .expect("emit");
        let context = log.get_context_for_narration(15).await.expect("context");
        assert!(context.contains("Custom @ tavern"));
        assert!(context.contains("A chair broke"));
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let log = log();
        log.emit(custom("tavern").with_tags(["x"])).await.expect("emit");
        log.clear_all_events().await.expect("clear");
        assert!(log.get_all_events(10, 0).await.expect("all").is_empty());
        assert!(log.get_events_by_tag("x", 10).await.expect("by tag").is_empty());
    }

    #[test]
    fn title_case_helper() {
        assert_eq!(title_case("quest_accepted"), "Quest Accepted");
        assert_eq!(title_case("custom"), "Custom");
    }
}
