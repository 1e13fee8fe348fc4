//! The per-turn runtime engine (the Dungeon Master).
//!
//! `step` is the step machine: append input, fire turn hooks, dispatch
//! a command or classify intent, generate a response through the cache
//! and the LLM gateway, append the response, run the content check, and
//! persist on schedule. The ordering of those steps is a contract; even
//! on error paths the user message lands in history before any
//! response is computed, and the response is appended before the
//! narration hooks fire.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use talespin_domain::{
    player, EventType, Message, PlayerId, RegionId, RegionNode, SessionId,
};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::content_cache::{context_hash, CacheConfig, ContentKind, GenerationCache};
use crate::context_loader::{ContextLoader, LoadSnapshot};
use crate::error::EngineError;
use crate::infrastructure::ports::{BlobStore, ClockPort, KvStore, LlmPort, RandomPort};
use crate::infrastructure::response_text::clean_and_extract_json;
use crate::plugins::PluginHost;
use crate::prompt_templates;
use crate::simulation::{SimulationConfig, WorldSimulator};
use crate::stores::event_log::{EmitEvent, EventListener, EventLog};
use crate::stores::{CognitionStore, MapGraph, WorldState};

/// Classified player intent for the natural-language path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Intent {
    Explore,
    Action,
    Chat,
}

pub struct RuntimeEngine {
    session_id: SessionId,
    player_id: PlayerId,
    config: AppConfig,

    llm: Option<Arc<dyn LlmPort>>,
    clock: Arc<dyn ClockPort>,
    random: Arc<dyn RandomPort>,

    cognition: Arc<CognitionStore>,
    map_graph: Arc<MapGraph>,
    event_log: Arc<EventLog>,
    world_state: Arc<WorldState>,
    simulator: Arc<WorldSimulator>,
    cache: Arc<GenerationCache>,
    loader: Arc<ContextLoader>,
    plugins: Arc<PluginHost>,

    turn_count: AtomicU64,
    last_turn_at: Mutex<f64>,
    /// Barrier between the turn loop and the companion worker; whoever
    /// holds it owns the session's shared state.
    turn_gate: Arc<tokio::sync::Mutex<()>>,
}

impl RuntimeEngine {
    pub fn new(
        session_id: SessionId,
        player_id: PlayerId,
        config: AppConfig,
        kv: Arc<dyn KvStore>,
        blob: Arc<dyn BlobStore>,
        llm: Option<Arc<dyn LlmPort>>,
        clock: Arc<dyn ClockPort>,
        random: Arc<dyn RandomPort>,
    ) -> Self {
        let ttl = config.kv.ttl_secs;
        let cognition = Arc::new(CognitionStore::new(
            session_id.clone(),
            kv.clone(),
            blob,
            clock.clone(),
            ttl,
        ));
        let map_graph = Arc::new(MapGraph::new(kv.clone(), llm.clone(), &config));
        let event_log = Arc::new(EventLog::new(
            session_id.clone(),
            kv.clone(),
            clock.clone(),
            ttl,
        ));
        let world_state = Arc::new(WorldState::new(
            session_id.clone(),
            kv.clone(),
            clock.clone(),
            ttl,
        ));
        let simulator = Arc::new(WorldSimulator::new(
            session_id.clone(),
            world_state.clone(),
            event_log.clone(),
            random.clone(),
            clock.clone(),
            SimulationConfig::default(),
        ));
        let cache = Arc::new(GenerationCache::new(CacheConfig::default()));
        let loader = Arc::new(ContextLoader::new(
            llm.clone(),
            config.llm.temperature,
            config.llm.stages.narrator,
        ));
        let plugins = Arc::new(PluginHost::new());

        // Every event feeds the world state; installed once here.
        let state_sink = world_state.clone();
        event_log.register_listener(
            EventListener::new(
                EventType::ALL,
                Arc::new(move |event| {
                    state_sink.handle_event(event);
                    Ok(())
                }),
            )
            .with_priority(100),
        );

        Self {
            session_id,
            player_id,
            config,
            llm,
            clock,
            random,
            cognition,
            map_graph,
            event_log,
            world_state,
            simulator,
            cache,
            loader,
            plugins,
            turn_count: AtomicU64::new(0),
            last_turn_at: Mutex::new(0.0),
            turn_gate: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    // Accessors for the front-end and tests.

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn turn_count(&self) -> u64 {
        self.turn_count.load(Ordering::SeqCst)
    }

    /// Seconds since the last `step` call; 0 before the first turn.
    pub fn seconds_since_last_turn(&self) -> f64 {
        let last = *self.last_turn_at.lock().unwrap_or_else(|e| e.into_inner());
        if last == 0.0 {
            0.0
        } else {
            (self.clock.now_epoch() - last).max(0.0)
        }
    }

    pub fn cognition(&self) -> &Arc<CognitionStore> {
        &self.cognition
    }

    pub fn map_graph(&self) -> &Arc<MapGraph> {
        &self.map_graph
    }

    pub fn event_log(&self) -> &Arc<EventLog> {
        &self.event_log
    }

    pub fn world_state(&self) -> &Arc<WorldState> {
        &self.world_state
    }

    pub fn simulator(&self) -> &Arc<WorldSimulator> {
        &self.simulator
    }

    pub fn cache(&self) -> &Arc<GenerationCache> {
        &self.cache
    }

    pub fn loader(&self) -> &Arc<ContextLoader> {
        &self.loader
    }

    pub fn plugins(&self) -> &Arc<PluginHost> {
        &self.plugins
    }

    // =========================================================================
    // Player setup
    // =========================================================================

    /// Write the default character block, register the start region,
    /// and announce the new player.
    pub async fn initialize_player(
        &self,
        start_location: &RegionId,
        tags: &[String],
    ) -> Result<(), EngineError> {
        let state = player::default_state(start_location, tags);
        self.cognition.update_player_state(&state).await?;

        let region_name = self
            .map_graph
            .get_node(start_location)
            .await?
            .map(|node| node.name)
            .unwrap_or_else(|| start_location.as_str().to_string());
        self.world_state.register_region(start_location.clone(), region_name);

        self.cognition
            .add_message(&Message::system(format!("Player spawned at {start_location}")))
            .await?;

        self.plugins.broadcast(|plugin| {
            plugin.on_player_created(self.player_id.as_str(), start_location.as_str())
        });

        self.event_log
            .emit(
                EmitEvent::new(
                    EventType::Custom,
                    self.player_id.clone(),
                    start_location.clone(),
                )
                .with_entry("kind", json!("player_created"))
                .with_tags(["player", "created"]),
            )
            .await?;
        info!(player = %self.player_id, location = %start_location, "player initialized");
        Ok(())
    }

    // =========================================================================
    // The step machine
    // =========================================================================

    /// One player turn. Never fails outward: internal errors surface as
    /// DM-error sentinels in the returned text.
    pub async fn step(&self, user_input: &str) -> String {
        let _turn = self.turn_gate.lock().await;
        let turn = self.turn_count.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut last = self.last_turn_at.lock().unwrap_or_else(|e| e.into_inner());
            *last = self.clock.now_epoch();
        }

        // The user message is persisted before anything can fail.
        if let Err(e) = self
            .cognition
            .add_message(&Message::user(user_input))
            .await
        {
            warn!(error = %e, "failed to persist user message");
        }

        let state = self
            .cognition
            .get_player_state()
            .await
            .unwrap_or_default();
        let location = state
            .get("location")
            .and_then(Value::as_str)
            .map(RegionId::new);

        self.plugins.broadcast(|plugin| plugin.on_turn_start(turn));

        let hook_result = self
            .plugins
            .first_non_empty(|plugin| plugin.on_before_action(user_input, &state));
        let short_circuited = hook_result.is_some();
        let mut response = match hook_result {
            Some(short_circuit) => short_circuit,
            None => self.dispatch(user_input, &state, location.as_ref()).await,
        };

        // A before_action short-circuit skips the assistant append and
        // goes straight to the narration hook.
        if !short_circuited {
            if let Err(e) = self
                .cognition
                .add_message(&Message::assistant(&response))
                .await
            {
                warn!(error = %e, "failed to persist response");
            }
        }

        let mut hook_context = Map::new();
        hook_context.insert("turn".into(), json!(turn));
        if let Some(loc) = &location {
            hook_context.insert("location".into(), json!(loc.as_str()));
        }
        self.plugins
            .broadcast(|plugin| plugin.on_narration_generated(&response, &hook_context));

        // Content check: pull in up to three now-matching records,
        // against the state as it stands after this turn's dispatch.
        let fresh_state = self
            .cognition
            .get_player_state()
            .await
            .unwrap_or_else(|_| state.clone());
        let fresh_location = fresh_state
            .get("location")
            .and_then(Value::as_str)
            .map(RegionId::new)
            .or_else(|| location.clone());
        if let Some(loc) = &fresh_location {
            match self.build_snapshot(loc, &fresh_state).await {
                Ok(snapshot) => {
                    let loaded = self.loader.load_all_matching(&snapshot, None, Some(3));
                    for content in &loaded {
                        info!(content = %content.content_id, "content loaded");
                    }
                }
                Err(e) => warn!(error = %e, "content check skipped"),
            }
        }

        if turn % 10 == 0 {
            if let Err(e) = self.world_state.save().await {
                warn!(error = %e, "periodic world-state save failed");
                response.push_str("\n(warning: world state save failed)");
            }
        }

        self.plugins.broadcast(|plugin| plugin.on_turn_end(turn));
        response
    }

    /// Step 6: plugin commands, built-ins, then the natural-language
    /// path.
    async fn dispatch(
        &self,
        user_input: &str,
        state: &Map<String, Value>,
        location: Option<&RegionId>,
    ) -> String {
        let trimmed = user_input.trim();
        let first_token = trimmed.split_whitespace().next().unwrap_or_default();
        let rest = trimmed
            .strip_prefix(first_token)
            .map(str::trim)
            .unwrap_or_default();

        if let Some(command) = self.plugins.find_command(first_token) {
            return (command.handler)(rest);
        }

        if trimmed.starts_with("/move") {
            return match rest.split_whitespace().next() {
                Some(target) => self.handle_move(location, &RegionId::new(target)).await,
                None => "🚫 DM: Give a destination id, e.g. /move forest.".to_string(),
            };
        }
        if trimmed.starts_with("/look") {
            return self.handle_look(location, state).await;
        }
        if trimmed.starts_with("/status") {
            return self.status_summary(state);
        }
        if trimmed.starts_with("/events") {
            return self.events_summary().await;
        }
        if trimmed.starts_with("/world") {
            return self.world_summary();
        }
        if trimmed.starts_with("/plugins") {
            return self.plugins_summary();
        }

        self.handle_natural_language(trimmed, state, location).await
    }

    // =========================================================================
    // Built-in commands
    // =========================================================================

    /// Travel along an existing edge, firing movement hooks and the
    /// movement event. Returns the inaccessibility sentinel when no
    /// edge exists.
    pub async fn handle_move(&self, current: Option<&RegionId>, target: &RegionId) -> String {
        let Some(current) = current else {
            return "🚫 DM: No valid current position; cannot move.".to_string();
        };

        let edge = match self.map_graph.get_travel_edge(current, target).await {
            Ok(edge) => edge,
            Err(e) => return format!("DM Error: {e}"),
        };
        let Some(edge) = edge else {
            return format!("🚫 DM: 前方无路。You cannot reach {target} directly from {current}.");
        };

        let mut update = Map::new();
        update.insert("location".into(), json!(target.as_str()));
        if let Err(e) = self.cognition.update_player_state(&update).await {
            return format!("DM Error: {e}");
        }

        // Keep the registry aware of dynamically reached regions.
        if self.world_state.get_region_state(target).is_none() {
            let name = self
                .map_graph
                .get_node(target)
                .await
                .ok()
                .flatten()
                .map(|node| node.name)
                .unwrap_or_else(|| target.as_str().to_string());
            self.world_state.register_region(target.clone(), name);
        }

        self.plugins
            .broadcast(|plugin| plugin.on_location_exited(current.as_str()));
        self.plugins.broadcast(|plugin| {
            plugin.on_player_moved(self.player_id.as_str(), current.as_str(), target.as_str())
        });
        self.plugins
            .broadcast(|plugin| plugin.on_location_entered(target.as_str()));

        if let Err(e) = self
            .event_log
            .emit(
                EmitEvent::new(EventType::Custom, self.player_id.clone(), target.clone())
                    .with_entry("kind", json!("movement"))
                    .with_entry("from", json!(current.as_str()))
                    .with_entry("to", json!(target.as_str()))
                    .with_entry("route", json!(edge.route_info.route_name))
                    .with_tags(["movement", "location_change", "player"]),
            )
            .await
        {
            warn!(error = %e, "movement event emission failed");
        }

        let route = &edge.route_info;
        let response = format!(
            "🚶 You take the [{}] toward {target}.\nAlong the way: {}\n...\nAfter the journey, you arrive.",
            route.route_name, route.description
        );

        self.plugins
            .first_non_empty(|plugin| plugin.on_after_action("/move", &response))
            .unwrap_or(response)
    }

    /// Observe the current node: base description, any hidden layers
    /// the player's tags/skills unlock, the live location summary, and
    /// the exits. First sight of a region emits a DISCOVERY event.
    pub async fn handle_look(
        &self,
        current: Option<&RegionId>,
        state: &Map<String, Value>,
    ) -> String {
        let Some(current) = current else {
            return "❌ Current position undefined; nothing to observe.".to_string();
        };
        let node = match self.map_graph.get_node(current).await {
            Ok(node) => node,
            Err(e) => return format!("DM Error: {e}"),
        };
        let Some(node) = node else {
            return "❌ 这里的空间似乎崩塌了 (Location Data Missing)。".to_string();
        };

        let mut lines = vec![
            format!("📍 Place: {}", node.name),
            format!(
                "👁️ You see: {}",
                if node.desc.is_empty() {
                    "nothing notable for now"
                } else {
                    &node.desc
                }
            ),
            format!("🌟 Features: {}", node.geo_feature),
        ];
        lines.extend(revealed_layers(&node, state));

        if let Some(summary) = self.world_state.get_location_summary(current) {
            let npcs = summary
                .get("npcs_present")
                .and_then(Value::as_array)
                .map(|list| {
                    list.iter()
                        .filter_map(Value::as_str)
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_default();
            lines.push(format!(
                "🌦️ Weather: {} | Danger: {}{}",
                summary
                    .get("weather")
                    .and_then(Value::as_str)
                    .unwrap_or("clear"),
                summary.get("danger_level").and_then(Value::as_i64).unwrap_or(1),
                if npcs.is_empty() {
                    String::new()
                } else {
                    format!(" | Present: {npcs}")
                }
            ));
        }

        let exits = match self.map_graph.get_neighbors(current).await {
            Ok(neighbors) => neighbors
                .keys()
                .filter_map(|field| field.split_once(':').map(|(_, target)| target.to_string()))
                .collect::<Vec<_>>()
                .join(", "),
            Err(_) => String::new(),
        };
        lines.push(format!("🚪 Exits: {exits}"));

        let undiscovered = self
            .world_state
            .get_region_state(current)
            .map(|region| !region.discovered)
            .unwrap_or(false);
        if undiscovered {
            if let Err(e) = self
                .event_log
                .emit(
                    EmitEvent::new(EventType::Discovery, self.player_id.clone(), current.clone())
                        .with_entry("target", json!(current.as_str()))
                        .with_tags(["discovery", "exploration"]),
                )
                .await
            {
                warn!(error = %e, "discovery event emission failed");
            }
        }

        lines.join("\n")
    }

    fn status_summary(&self, state: &Map<String, Value>) -> String {
        let get_i64 = |key: &str, default: i64| {
            state.get(key).and_then(Value::as_i64).unwrap_or(default)
        };
        let tags = state
            .get("tags")
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default();
        [
            "📊 Status".to_string(),
            format!(
                "HP {}/{} | SAN {}/{}",
                get_i64("hp", 100),
                get_i64("max_hp", 100),
                get_i64("sanity", 100),
                get_i64("max_sanity", 100)
            ),
            format!(
                "Level {} | EXP {} | Gold {}",
                get_i64("level", 1),
                get_i64("exp", 0),
                get_i64("gold", 0)
            ),
            format!(
                "Location: {}",
                state.get("location").and_then(Value::as_str).unwrap_or("unknown")
            ),
            format!("Tags: {tags}"),
        ]
        .join("\n")
    }

    async fn events_summary(&self) -> String {
        let summary = match self.event_log.get_event_summary().await {
            Ok(summary) => summary,
            Err(e) => return format!("DM Error: {e}"),
        };
        let context = self
            .event_log
            .get_context_for_narration(15)
            .await
            .unwrap_or_default();
        format!(
            "🗂️ Events: {} total\n{}",
            summary.get("total_events").and_then(Value::as_u64).unwrap_or(0),
            context
        )
    }

    fn world_summary(&self) -> String {
        let summary = self.world_state.get_world_summary();
        format!(
            "{}Regions: {} ({} discovered) | NPCs: {} alive | Quests: {} active",
            self.world_state.get_context_for_llm(),
            summary.get("regions_count").and_then(Value::as_u64).unwrap_or(0),
            summary
                .get("discovered_regions")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            summary.get("alive_npcs").and_then(Value::as_u64).unwrap_or(0),
            summary.get("active_quests").and_then(Value::as_u64).unwrap_or(0),
        )
    }

    fn plugins_summary(&self) -> String {
        let entries = self.plugins.plugin_summary();
        if entries.is_empty() {
            return "🔌 No plugins registered.".to_string();
        }
        let mut lines = vec!["🔌 Plugins".to_string()];
        for entry in entries {
            lines.push(format!(
                "- {} v{} [{}] {}",
                entry["name"].as_str().unwrap_or("?"),
                entry["version"].as_str().unwrap_or("?"),
                entry["state"].as_str().unwrap_or("?"),
                entry["description"].as_str().unwrap_or(""),
            ));
        }
        lines.join("\n")
    }

    // =========================================================================
    // Natural language
    // =========================================================================

    async fn handle_natural_language(
        &self,
        user_input: &str,
        state: &Map<String, Value>,
        location: Option<&RegionId>,
    ) -> String {
        if self.llm.is_none() {
            return format!("DM (离线): {user_input}");
        }
        let location = location.cloned().unwrap_or_else(|| RegionId::new("unknown"));
        let node = self.map_graph.get_node(&location).await.ok().flatten();

        let (intent, keyword) = self
            .classify_intent(user_input, &location, node.as_ref(), state)
            .await;

        match intent {
            Intent::Explore => {
                if let Some(response) = self
                    .handle_explore(&keyword, &location, state, node.as_ref())
                    .await
                {
                    return response;
                }
                // No dynamic content and no new node: fall through to
                // plain narration.
                self.handle_chat(user_input, &location, state, node.as_ref())
                    .await
            }
            Intent::Action => {
                self.handle_action(user_input, &location, state, node.as_ref())
                    .await
            }
            Intent::Chat => {
                self.handle_chat(user_input, &location, state, node.as_ref())
                    .await
            }
        }
    }

    /// Classify the input into EXPLORE/ACTION/CHAT via the cache; any
    /// failure defaults to CHAT with the raw input as keyword.
    async fn classify_intent(
        &self,
        user_input: &str,
        location: &RegionId,
        node: Option<&RegionNode>,
        _state: &Map<String, Value>,
    ) -> (Intent, String) {
        let Some(llm) = self.llm.clone() else {
            return (Intent::Chat, user_input.to_string());
        };
        let location_name = node.map(|n| n.name.clone()).unwrap_or_else(|| location.as_str().to_string());
        let history = self.history_block(6).await;
        let key = format!("intent:{location}:{}", input_hash(user_input));
        let hash = self.current_context_hash(location);

        let prompt = prompt_templates::intent_prompt(&location_name, &history, user_input);
        let cognition_tokens = self.config.llm.stages.cognition;
        let generator = async move {
            let raw = llm
                .complete(&[Message::user(prompt)], 0.1, cognition_tokens)
                .await
                .map_err(EngineError::from)?;
            clean_and_extract_json(&raw)
                .ok_or_else(|| EngineError::parse("no JSON in intent response"))
        };

        self.cache.limiter().pause_for_interval().await;
        let outcome = self
            .cache
            .get_or_generate(&key, &hash, ContentKind::Narrative, generator, false)
            .await;

        let Ok((Some(value), _)) = outcome else {
            return (Intent::Chat, user_input.to_string());
        };
        let intent = match value.get("intent").and_then(Value::as_str) {
            Some("EXPLORE") => Intent::Explore,
            Some("ACTION") => Intent::Action,
            _ => Intent::Chat,
        };
        let keyword = value
            .get("keyword")
            .and_then(Value::as_str)
            .unwrap_or(user_input)
            .to_string();
        (intent, keyword)
    }

    /// EXPLORE: try registered/dynamic content first, then grow the map.
    async fn handle_explore(
        &self,
        keyword: &str,
        location: &RegionId,
        state: &Map<String, Value>,
        _node: Option<&RegionNode>,
    ) -> Option<String> {
        if let Ok(snapshot) = self.build_snapshot(location, state).await {
            if let Ok(Some(record)) = self.loader.generate_dynamic_content(keyword, &snapshot).await
            {
                return Some(format_dynamic_content(&record));
            }
        }

        match self
            .map_graph
            .create_dynamic_sub_location(location, keyword)
            .await
        {
            Ok(Some(new_id)) => {
                Some(self.handle_move(Some(location), &new_id).await)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "dynamic sub-location failed");
                None
            }
        }
    }

    /// ACTION: referee resolution plus an action event.
    async fn handle_action(
        &self,
        user_input: &str,
        location: &RegionId,
        state: &Map<String, Value>,
        node: Option<&RegionNode>,
    ) -> String {
        let location_name = node.map(|n| n.name.clone()).unwrap_or_else(|| location.as_str().to_string());
        let event_context = self
            .event_log
            .get_context_for_narration(15)
            .await
            .unwrap_or_default();
        let history = self.history_block(6).await;
        let prompt = prompt_templates::action_resolution_prompt(
            &self.config.genre,
            &self.config.tone,
            &self.config.final_conflict,
            self.world_state.crisis_level(),
            &location_name,
            state.get("hp").and_then(Value::as_i64).unwrap_or(100),
            state.get("sanity").and_then(Value::as_i64).unwrap_or(100),
            &event_context,
            &history,
            user_input,
        );

        let key = format!("action:{location}:{}", input_hash(user_input));
        let response = self.generate_narration(&key, location, prompt).await;

        if let Err(e) = self
            .event_log
            .emit(
                EmitEvent::new(EventType::Custom, self.player_id.clone(), location.clone())
                    .with_entry("kind", json!("action"))
                    .with_entry("action", json!(user_input))
                    .with_tags(["action", "player"]),
            )
            .await
        {
            warn!(error = %e, "action event emission failed");
        }
        response
    }

    /// CHAT: ambient narration, with the AI director deciding whether
    /// this scene hints at the main crisis.
    async fn handle_chat(
        &self,
        user_input: &str,
        location: &RegionId,
        _state: &Map<String, Value>,
        node: Option<&RegionNode>,
    ) -> String {
        let risk = node.and_then(|n| n.risk_level).unwrap_or(1);
        let director = if self.roll_for_crisis(risk) {
            prompt_templates::director_hint_crisis(&self.config.final_conflict)
        } else {
            prompt_templates::director_neutral()
        };

        let location_name = node.map(|n| n.name.clone()).unwrap_or_else(|| location.as_str().to_string());
        let location_desc = node.map(|n| n.desc.clone()).unwrap_or_default();
        let event_context = self
            .event_log
            .get_context_for_narration(15)
            .await
            .unwrap_or_default();
        let history = self.history_block(6).await;
        let prompt = prompt_templates::chat_narration_prompt(
            &self.config.genre,
            &self.config.tone,
            &location_name,
            &location_desc,
            &event_context,
            &history,
            user_input,
            &director,
        );

        let key = format!("chat:{location}:{}", input_hash(user_input));
        self.generate_narration(&key, location, prompt).await
    }

    /// Director dice: `min(0.7, risk * 0.1 + crisis * 0.05)`.
    fn roll_for_crisis(&self, risk_level: i32) -> bool {
        let crisis = self.world_state.crisis_level().value() as f64;
        let threshold = (risk_level.max(1) as f64 * 0.1 + crisis * 0.05).min(0.7);
        self.random.next_f64() < threshold
    }

    /// Narration through the cache; cache-level fallbacks already
    /// degrade to stale content, so `None` here means a hard failure.
    async fn generate_narration(&self, key: &str, location: &RegionId, prompt: String) -> String {
        let Some(llm) = self.llm.clone() else {
            return "DM (离线): narrative backend unconfigured".to_string();
        };
        let hash = self.current_context_hash(location);
        let temperature = self.config.llm.temperature;
        let narrator_tokens = self.config.llm.stages.narrator;
        let generator = async move {
            let raw = llm
                .complete(&[Message::user(prompt)], temperature, narrator_tokens)
                .await
                .map_err(EngineError::from)?;
            Ok(Value::String(
                crate::infrastructure::response_text::clean_model_output(&raw),
            ))
        };

        self.cache.limiter().pause_for_interval().await;
        match self
            .cache
            .get_or_generate(key, &hash, ContentKind::Narrative, generator, false)
            .await
        {
            Ok((Some(Value::String(text)), _)) => format!("DM: {text}"),
            Ok((Some(other), _)) => format!("DM: {other}"),
            Ok((None, _)) => "DM Error: the narrative backend is unavailable.".to_string(),
            Err(e) => format!("DM Error: {e}"),
        }
    }

    // =========================================================================
    // Context assembly
    // =========================================================================

    fn current_context_hash(&self, location: &RegionId) -> String {
        context_hash(
            &self.player_id,
            location,
            self.world_state.crisis_level(),
            self.world_state.world_time().total_minutes(),
            &self.world_state.flag_names(),
        )
    }

    async fn history_block(&self, limit: usize) -> String {
        self.cognition
            .get_recent_history(limit)
            .await
            .map(|messages| talespin_domain::message::format_transcript(&messages))
            .unwrap_or_default()
    }

    async fn build_snapshot(
        &self,
        location: &RegionId,
        state: &Map<String, Value>,
    ) -> Result<LoadSnapshot, EngineError> {
        let node = self.map_graph.get_node(location).await?;
        let recent_events = self.event_log.get_all_events(100, 0).await?;
        let event_context = self.event_log.get_context_for_narration(15).await?;
        Ok(LoadSnapshot {
            player_id: self.player_id.clone(),
            current_location: location.clone(),
            node_region: node
                .as_ref()
                .and_then(|n| n.parent_id.as_ref())
                .map(|id| id.as_str().to_string()),
            player_state: state.clone(),
            recent_events,
            event_context,
            location_name: node
                .as_ref()
                .map(|n| n.name.clone())
                .unwrap_or_else(|| location.as_str().to_string()),
            location_desc: node.map(|n| n.desc).unwrap_or_default(),
        })
    }

    // =========================================================================
    // Save / load
    // =========================================================================

    /// Snapshot the session: hooks decorate, then the cognition archive
    /// and the world-state block are written.
    pub async fn save_game(&self) -> Result<String, EngineError> {
        let mut update = Map::new();
        update.insert("turn_count".into(), json!(self.turn_count()));
        self.cognition.update_player_state(&update).await?;

        let snapshot = json!({
            "schema_version": 1,
            "session_id": self.session_id.as_str(),
            "turn_count": self.turn_count(),
            "world": Value::Object(self.world_state.get_world_summary()),
        });
        let decorated = self.plugins.decorate_save(snapshot);

        // Plugin decoration may patch player-state fields.
        if let Some(patch) = decorated.get("player_state").and_then(Value::as_object) {
            self.cognition.update_player_state(patch).await?;
        }

        let name = self.cognition.archive_session().await?;
        self.world_state.save().await?;
        Ok(name)
    }

    /// Restore from the archive, then the world block, then let the
    /// plugins read their data back.
    pub async fn load_game(&self) -> Result<bool, EngineError> {
        if !self.cognition.load_session().await? {
            return Ok(false);
        }
        self.world_state.load().await?;

        let state = self.cognition.get_player_state().await?;
        if let Some(turns) = state.get("turn_count").and_then(Value::as_str) {
            if let Ok(turns) = turns.parse::<u64>() {
                self.turn_count.store(turns, Ordering::SeqCst);
            }
        }

        let snapshot = json!({
            "session_id": self.session_id.as_str(),
            "state": Value::Object(state),
        });
        self.plugins
            .broadcast(|plugin| plugin.plugin_load_hook(&snapshot));
        Ok(true)
    }

    // =========================================================================
    // Companion worker
    // =========================================================================

    /// Spawn the background simulator loop. Each tick takes the turn
    /// gate, so world writes land only between player turns. The loop
    /// stops when the runtime is dropped or the handle is aborted.
    pub fn spawn_companion(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(runtime) = weak.upgrade() else {
                    break;
                };
                let _turn = runtime.turn_gate.lock().await;
                if let Err(e) = runtime.simulator.simulate_tick(None).await {
                    warn!(error = %e, "companion tick failed");
                }
            }
        })
    }
}

/// Hidden-layer reveal: each non-public layer lists required tags and
/// skills with AND/OR logic; matching layers contribute insight lines.
fn revealed_layers(node: &RegionNode, state: &Map<String, Value>) -> Vec<String> {
    let player_tags = string_set(state.get("tags"));
    let player_skills = string_set(state.get("skills"));
    let mut lines = Vec::new();

    for (layer_name, layer) in &node.layers {
        if layer_name == "public" {
            continue;
        }
        let Some(layer) = layer.as_object() else {
            continue;
        };
        let Some(desc) = layer.get("desc").and_then(Value::as_str) else {
            continue;
        };
        let access = layer
            .get("access_req")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let required_tags = string_vec(access.get("tags"));
        let required_skills = string_vec(access.get("skills"));
        let all_required = access
            .get("logic")
            .and_then(Value::as_str)
            .map(|logic| logic.eq_ignore_ascii_case("AND"))
            .unwrap_or(false);

        let has_access = if all_required {
            required_tags.iter().all(|t| player_tags.contains(t))
                && required_skills.iter().all(|s| player_skills.contains(s))
        } else {
            required_tags.iter().any(|t| player_tags.contains(t))
                || required_skills.iter().any(|s| player_skills.contains(s))
        };
        if has_access {
            lines.push(format!("🕵️ Insight ({layer_name}): {desc}"));
        }
    }
    lines
}

fn string_set(value: Option<&Value>) -> HashSet<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

fn string_vec(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

fn format_dynamic_content(record: &Value) -> String {
    if let Some(suggested) = record.get("suggested_response").and_then(Value::as_str) {
        if !suggested.is_empty() {
            return format!("DM: {suggested}");
        }
    }
    let name = record.get("name").and_then(Value::as_str).unwrap_or("something new");
    let description = record
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default();
    format!("DM: You discover {name}. {description}")
}

/// Short stable digest of the raw input for cache keys.
fn input_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(&digest[..6])
}
