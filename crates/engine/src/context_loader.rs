//! Context-aware content loader.
//!
//! A registry of declarative content (locations, NPCs, items, quests,
//! lore, encounters) gated by load conditions over the player state and
//! the recent event history, plus LLM-backed dynamic generation for
//! EXPLORE intents that match nothing registered.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};
use talespin_domain::{Event, EventId, EventType, Message, PlayerId, RegionId};
use tracing::warn;

use crate::error::EngineError;
use crate::infrastructure::ports::LlmPort;
use crate::infrastructure::response_text::clean_and_extract_json;
use crate::prompt_templates;

/// How a load condition is anchored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadTrigger {
    LocationBased,
    EventBased,
    PlayerState,
    Combo,
    Always,
    Never,
}

/// What kind of content a loadable record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoaderContentType {
    Location,
    Npc,
    Item,
    Quest,
    Lore,
    Encounter,
    Custom,
}

pub type CustomCondition = Arc<dyn Fn(&Map<String, Value>, &[Event]) -> bool + Send + Sync>;

/// Conjunction of optional clauses; absent clauses pass. `Always` and
/// `Never` short-circuit, and a false predicate vetoes everything else.
#[derive(Clone)]
pub struct LoadCondition {
    pub trigger_type: Option<LoadTrigger>,
    pub at_location: Option<RegionId>,
    pub in_region: Option<String>,
    pub visited: HashSet<String>,
    pub requires_events: Vec<EventId>,
    pub excludes_events: Vec<EventId>,
    pub requires_event_types: Vec<EventType>,
    pub min_level: i64,
    pub max_level: i64,
    pub has_tags: Vec<String>,
    pub has_items: Vec<String>,
    pub state_conditions: Map<String, Value>,
    pub custom_condition: Option<CustomCondition>,
}

impl Default for LoadCondition {
    fn default() -> Self {
        Self {
            trigger_type: None,
            at_location: None,
            in_region: None,
            visited: HashSet::new(),
            requires_events: Vec::new(),
            excludes_events: Vec::new(),
            requires_event_types: Vec::new(),
            min_level: 1,
            max_level: 100,
            has_tags: Vec::new(),
            has_items: Vec::new(),
            state_conditions: Map::new(),
            custom_condition: None,
        }
    }
}

impl LoadCondition {
    pub fn new(trigger_type: LoadTrigger) -> Self {
        Self {
            trigger_type: Some(trigger_type),
            ..Default::default()
        }
    }

    pub fn at_location(mut self, location: impl Into<RegionId>) -> Self {
        self.at_location = Some(location.into());
        self
    }

    pub fn requiring_visited(mut self, visited: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.visited = visited.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_level_bounds(mut self, min: i64, max: i64) -> Self {
        self.min_level = min;
        self.max_level = max;
        self
    }

    pub fn requiring_tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.has_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_predicate(mut self, predicate: CustomCondition) -> Self {
        self.custom_condition = Some(predicate);
        self
    }
}

/// A piece of conditionally available content.
#[derive(Clone)]
pub struct LoadableContent {
    pub content_id: String,
    pub content_type: LoaderContentType,
    pub name: String,
    pub description: String,
    pub condition: LoadCondition,
    pub data: Map<String, Value>,
    /// Lower loads earlier.
    pub priority: i32,
    pub loaded: bool,
    pub repeatable: bool,
    pub on_load_events: Vec<EventId>,
    pub excludes: Vec<String>,
    pub replaces: Vec<String>,
}

impl LoadableContent {
    pub fn new(
        content_id: impl Into<String>,
        content_type: LoaderContentType,
        name: impl Into<String>,
        condition: LoadCondition,
    ) -> Self {
        Self {
            content_id: content_id.into(),
            content_type,
            name: name.into(),
            description: String::new(),
            condition,
            data: Map::new(),
            priority: 10,
            loaded: false,
            repeatable: false,
            on_load_events: Vec::new(),
            excludes: Vec::new(),
            replaces: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn repeatable(mut self) -> Self {
        self.repeatable = true;
        self
    }
}

/// Read-only view of the world the loader evaluates against; assembled
/// by the runtime at the top of a turn.
pub struct LoadSnapshot {
    pub player_id: PlayerId,
    pub current_location: RegionId,
    /// Region/parent grouping of the current node, if any.
    pub node_region: Option<String>,
    pub player_state: Map<String, Value>,
    /// Recent events, newest first (the loader looks at up to 100).
    pub recent_events: Vec<Event>,
    /// Event-log narrative block for dynamic-generation prompts.
    pub event_context: String,
    /// Current node name/description for dynamic-generation prompts.
    pub location_name: String,
    pub location_desc: String,
}

impl LoadSnapshot {
    fn level(&self) -> i64 {
        self.player_state
            .get("level")
            .and_then(Value::as_i64)
            .unwrap_or(1)
    }

    fn has_tag(&self, tag: &str) -> bool {
        self.player_state
            .get("tags")
            .and_then(Value::as_array)
            .map(|tags| tags.iter().any(|t| t.as_str() == Some(tag)))
            .unwrap_or(false)
    }

    fn has_item(&self, item_id: &str) -> bool {
        let Some(items) = self.player_state.get("inventory").and_then(Value::as_array) else {
            return false;
        };
        items.iter().any(|item| match item {
            Value::String(s) => s == item_id,
            Value::Object(map) => map.get("item_id").and_then(Value::as_str) == Some(item_id),
            _ => false,
        })
    }

    fn visited_locations(&self) -> HashSet<&str> {
        self.recent_events
            .iter()
            .filter(|e| e.event_type == EventType::Discovery)
            .filter_map(|e| e.data_str("target"))
            .collect()
    }

    fn event_ids(&self) -> HashSet<&str> {
        self.recent_events
            .iter()
            .map(|e| e.event_id.as_str())
            .collect()
    }

    fn event_types(&self) -> HashSet<EventType> {
        self.recent_events.iter().map(|e| e.event_type).collect()
    }
}

pub struct ContextLoader {
    content: Mutex<HashMap<String, LoadableContent>>,
    loaded: Mutex<HashSet<String>>,
    generator_cache: Mutex<HashMap<String, Value>>,
    llm: Option<Arc<dyn LlmPort>>,
    temperature: f32,
    narrator_tokens: u32,
}

impl ContextLoader {
    pub fn new(llm: Option<Arc<dyn LlmPort>>, temperature: f32, narrator_tokens: u32) -> Self {
        Self {
            content: Mutex::new(HashMap::new()),
            loaded: Mutex::new(HashSet::new()),
            generator_cache: Mutex::new(HashMap::new()),
            llm,
            temperature,
            narrator_tokens,
        }
    }

    // =========================================================================
    // Registry
    // =========================================================================

    pub fn register_content(&self, content: LoadableContent) {
        self.content
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(content.content_id.clone(), content);
    }

    pub fn register_multiple(&self, contents: impl IntoIterator<Item = LoadableContent>) {
        for content in contents {
            self.register_content(content);
        }
    }

    pub fn unregister_content(&self, content_id: &str) {
        self.content
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(content_id);
    }

    pub fn get_content(&self, content_id: &str) -> Option<LoadableContent> {
        self.content
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(content_id)
            .cloned()
    }

    pub fn get_content_by_type(&self, content_type: LoaderContentType) -> Vec<LoadableContent> {
        self.content
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|c| c.content_type == content_type)
            .cloned()
            .collect()
    }

    pub fn is_loaded(&self, content_id: &str) -> bool {
        self.loaded
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(content_id)
    }

    // =========================================================================
    // Condition evaluation
    // =========================================================================

    fn check_condition(condition: &LoadCondition, snapshot: &LoadSnapshot) -> bool {
        match condition.trigger_type {
            Some(LoadTrigger::Always) => return true,
            Some(LoadTrigger::Never) => return false,
            _ => {}
        }

        if let Some(predicate) = &condition.custom_condition {
            if !predicate(&snapshot.player_state, &snapshot.recent_events) {
                return false;
            }
        }

        if let Some(at) = &condition.at_location {
            if &snapshot.current_location != at {
                return false;
            }
        }
        if let Some(region) = &condition.in_region {
            if snapshot.node_region.as_deref() != Some(region.as_str()) {
                return false;
            }
        }

        if !condition.visited.is_empty() {
            let visited = snapshot.visited_locations();
            if !condition.visited.iter().all(|v| visited.contains(v.as_str())) {
                return false;
            }
        }

        if !condition.requires_events.is_empty() || !condition.excludes_events.is_empty() {
            let seen = snapshot.event_ids();
            if !condition
                .requires_events
                .iter()
                .all(|id| seen.contains(id.as_str()))
            {
                return false;
            }
            if condition
                .excludes_events
                .iter()
                .any(|id| seen.contains(id.as_str()))
            {
                return false;
            }
        }

        if !condition.requires_event_types.is_empty() {
            let types = snapshot.event_types();
            if !condition
                .requires_event_types
                .iter()
                .any(|t| types.contains(t))
            {
                return false;
            }
        }

        let level = snapshot.level();
        if level < condition.min_level || level > condition.max_level {
            return false;
        }
        if !condition.has_tags.iter().all(|tag| snapshot.has_tag(tag)) {
            return false;
        }
        if !condition.has_items.iter().all(|item| snapshot.has_item(item)) {
            return false;
        }
        for (key, expected) in &condition.state_conditions {
            if snapshot.player_state.get(key) != Some(expected) {
                return false;
            }
        }
        true
    }

    // =========================================================================
    // Loading
    // =========================================================================

    /// Content whose conditions pass right now, ascending priority.
    /// Non-repeatable content that already loaded is dropped.
    pub fn get_loadable(
        &self,
        snapshot: &LoadSnapshot,
        content_type: Option<LoaderContentType>,
    ) -> Vec<LoadableContent> {
        let content = self.content.lock().unwrap_or_else(|e| e.into_inner());
        let loaded = self.loaded.lock().unwrap_or_else(|e| e.into_inner());
        let mut candidates: Vec<LoadableContent> = content
            .values()
            .filter(|c| content_type.is_none() || content_type == Some(c.content_type))
            .filter(|c| c.repeatable || !loaded.contains(&c.content_id))
            .filter(|c| Self::check_condition(&c.condition, snapshot))
            .cloned()
            .collect();
        candidates.sort_by_key(|c| c.priority);
        candidates
    }

    /// Load one record by id. False when unknown, condition unmet, or a
    /// non-repeatable record was already loaded this session.
    pub fn load_content(&self, content_id: &str, snapshot: &LoadSnapshot) -> bool {
        let mut content = self.content.lock().unwrap_or_else(|e| e.into_inner());
        let Some(record) = content.get_mut(content_id) else {
            return false;
        };
        if !Self::check_condition(&record.condition, snapshot) {
            return false;
        }
        let mut loaded = self.loaded.lock().unwrap_or_else(|e| e.into_inner());
        if !record.repeatable && loaded.contains(content_id) {
            return false;
        }
        loaded.insert(content_id.to_string());
        record.loaded = true;
        true
    }

    /// Load every matching record, optionally bounded.
    pub fn load_all_matching(
        &self,
        snapshot: &LoadSnapshot,
        content_type: Option<LoaderContentType>,
        limit: Option<usize>,
    ) -> Vec<LoadableContent> {
        let mut candidates = self.get_loadable(snapshot, content_type);
        if let Some(limit) = limit {
            candidates.truncate(limit);
        }
        candidates
            .into_iter()
            .filter(|c| self.load_content(&c.content_id, snapshot))
            .collect()
    }

    // =========================================================================
    // Dynamic generation
    // =========================================================================

    /// Ask the model for content matching the player's intent, cached
    /// under `<location>:<intent>`. None when no LLM is configured or
    /// nothing parseable comes back.
    pub async fn generate_dynamic_content(
        &self,
        user_intent: &str,
        snapshot: &LoadSnapshot,
    ) -> Result<Option<Value>, EngineError> {
        let cache_key = format!("{}:{}", snapshot.current_location, user_intent);
        if let Some(cached) = self
            .generator_cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&cache_key)
        {
            return Ok(Some(cached.clone()));
        }
        let Some(llm) = &self.llm else {
            return Ok(None);
        };

        let state = &snapshot.player_state;
        let prompt = prompt_templates::dynamic_content_prompt(
            user_intent,
            &snapshot.location_name,
            &snapshot.location_desc,
            &snapshot.event_context,
            state.get("hp").and_then(Value::as_i64).unwrap_or(100),
            state.get("sanity").and_then(Value::as_i64).unwrap_or(100),
            &state
                .get("tags")
                .and_then(Value::as_array)
                .map(|tags| {
                    tags.iter()
                        .filter_map(Value::as_str)
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_default(),
            snapshot.level(),
        );

        let raw = match llm
            .complete(&[Message::user(prompt)], self.temperature, self.narrator_tokens)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "dynamic content generation failed");
                return Ok(None);
            }
        };
        let Some(parsed) = clean_and_extract_json(&raw) else {
            warn!("dynamic content response had no parseable JSON");
            return Ok(None);
        };
        self.generator_cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(cache_key, parsed.clone());
        Ok(Some(parsed))
    }

    // =========================================================================
    // Context building
    // =========================================================================

    /// The full LLM context block: environment, player, available
    /// content, event history, and the player's action.
    pub fn build_llm_context(&self, user_input: &str, snapshot: &LoadSnapshot) -> String {
        let state = &snapshot.player_state;
        let mut sections = vec![
            "[Environment]".to_string(),
            format!("Place: {}", snapshot.location_name),
            format!("Description: {}", snapshot.location_desc),
            String::new(),
            "[Player]".to_string(),
            format!("Location: {}", snapshot.current_location),
            format!(
                "HP: {}/100",
                state.get("hp").and_then(Value::as_i64).unwrap_or(100)
            ),
            format!(
                "SAN: {}/100",
                state.get("sanity").and_then(Value::as_i64).unwrap_or(100)
            ),
            String::new(),
        ];

        let available = self.get_loadable(snapshot, None);
        if !available.is_empty() {
            sections.push("[Available content]".to_string());
            for content in available.iter().take(10) {
                sections.push(format!("- {} ({:?})", content.name, content.content_type));
            }
            sections.push(String::new());
        }

        if !snapshot.event_context.is_empty() {
            sections.push(snapshot.event_context.clone());
            sections.push(String::new());
        }

        sections.push("[Player action]".to_string());
        sections.push(user_input.to_string());
        sections.join("\n")
    }

    /// Up to five suggested actions from matching content and recent
    /// NPC/item events.
    pub fn get_suggestions(&self, snapshot: &LoadSnapshot) -> Vec<String> {
        let mut suggestions = Vec::new();
        for content in self.get_loadable(snapshot, None).iter().take(5) {
            match content.content_type {
                LoaderContentType::Npc => {
                    suggestions.push(format!("Try talking to {}", content.name))
                }
                LoaderContentType::Quest => suggestions.push(format!("Check quest: {}", content.name)),
                LoaderContentType::Location => suggestions.push(format!("Explore {}", content.name)),
                _ => {}
            }
        }
        for event in snapshot.recent_events.iter().take(5) {
            match event.event_type {
                EventType::NpcMeet => {
                    let name = event.data_str("name").unwrap_or("the NPC");
                    suggestions.push(format!("Learn more about {name}"));
                }
                EventType::ItemAcquired => {
                    let item = event.data_str("item").unwrap_or("the item");
                    suggestions.push(format!("Try using {item}"));
                }
                _ => {}
            }
        }
        suggestions.truncate(5);
        suggestions
    }
}
