//! Aggregate world state: time, crisis, flags, and the region/NPC/quest
//! registries.
//!
//! Registries are DashMaps so the event-listener path and the companion
//! simulator can mutate through `&self`; the turn loop stays the single
//! logical writer (§ concurrency model), the maps just make the narrow
//! between-turns window safe.

use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use serde_json::{json, Map, Value};
use talespin_domain::{
    CrisisLevel, Event, EventType, NpcId, NpcState, QuestId, QuestState, QuestStatus, RegionId,
    RegionState, SessionId, WeatherType, WorldTime,
};
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::infrastructure::ports::{ClockPort, KvStore};

pub struct WorldState {
    session_id: SessionId,
    kv: Arc<dyn KvStore>,
    clock: Arc<dyn ClockPort>,
    ttl: u64,

    world_time: Mutex<WorldTime>,
    crisis_level: Mutex<CrisisLevel>,
    global_flags: DashMap<String, bool>,
    global_variables: DashMap<String, Value>,

    regions: DashMap<String, RegionState>,
    npcs: DashMap<String, NpcState>,
    quests: DashMap<String, QuestState>,
}

impl WorldState {
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
            world_time: Mutex::new(WorldTime::default()),
            crisis_level: Mutex::new(CrisisLevel::Calm),
            global_flags: DashMap::new(),
            global_variables: DashMap::new(),
            regions: DashMap::new(),
            npcs: DashMap::new(),
            quests: DashMap::new(),
        }
    }

    fn key_global(&self) -> String {
        format!("rpg:world_state:{}:global", self.session_id)
    }

    fn key_region(&self, id: &str) -> String {
        format!("rpg:world_state:{}:regions:{}", self.session_id, id)
    }

    fn key_npc(&self, id: &str) -> String {
        format!("rpg:world_state:{}:npcs:{}", self.session_id, id)
    }

    fn key_quest(&self, id: &str) -> String {
        format!("rpg:world_state:{}:quests:{}", self.session_id, id)
    }

    // =========================================================================
    // Time
    // =========================================================================

    pub fn advance_time(&self, minutes: u64) {
        let mut time = self.world_time.lock().unwrap_or_else(|e| e.into_inner());
        time.advance(minutes);
    }

    pub fn world_time(&self) -> WorldTime {
        *self.world_time.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get_time_display(&self) -> String {
        self.world_time().display()
    }

    pub fn is_day(&self) -> bool {
        self.world_time().is_day()
    }

    pub fn is_night(&self) -> bool {
        self.world_time().is_night()
    }

    // =========================================================================
    // Global state
    // =========================================================================

    pub fn crisis_level(&self) -> CrisisLevel {
        *self.crisis_level.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_crisis_level(&self, level: CrisisLevel) {
        let mut current = self.crisis_level.lock().unwrap_or_else(|e| e.into_inner());
        if *current != level {
            debug!(from = current.name(), to = level.name(), "crisis level change");
            *current = level;
        }
    }

    /// Shift the crisis level, saturating to [CALM, EMERGENCY].
    pub fn shift_crisis(&self, delta: i32) {
        let current = self.crisis_level();
        self.set_crisis_level(current.saturating_add(delta));
    }

    pub fn set_flag(&self, flag: impl Into<String>, value: bool) {
        self.global_flags.insert(flag.into(), value);
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.global_flags.get(flag).map(|v| *v).unwrap_or(false)
    }

    /// Sorted flag names; part of the cache context hash.
    pub fn flag_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.global_flags.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn set_variable(&self, key: impl Into<String>, value: Value) {
        self.global_variables.insert(key.into(), value);
    }

    pub fn get_variable(&self, key: &str) -> Option<Value> {
        self.global_variables.get(key).map(|v| v.clone())
    }

    // =========================================================================
    // Regions
    // =========================================================================

    pub fn register_region(&self, region_id: impl Into<RegionId>, name: impl Into<String>) {
        let state = RegionState::new(region_id, name);
        self.regions
            .insert(state.region_id.as_str().to_string(), state);
    }

    pub fn get_region_state(&self, region_id: &RegionId) -> Option<RegionState> {
        self.regions.get(region_id.as_str()).map(|r| r.clone())
    }

    pub fn region_ids(&self) -> Vec<RegionId> {
        self.regions
            .iter()
            .map(|e| RegionId::new(e.key().clone()))
            .collect()
    }

    pub fn discovered_region_ids(&self) -> Vec<RegionId> {
        self.regions
            .iter()
            .filter(|e| e.value().discovered)
            .map(|e| RegionId::new(e.key().clone()))
            .collect()
    }

    pub fn set_region_weather(&self, region_id: &RegionId, weather: WeatherType) {
        if let Some(mut region) = self.regions.get_mut(region_id.as_str()) {
            region.weather = weather;
        }
    }

    pub fn discover_region(&self, region_id: &RegionId) {
        if let Some(mut region) = self.regions.get_mut(region_id.as_str()) {
            region.discovered = true;
        }
    }

    pub fn set_region_danger_level(&self, region_id: &RegionId, level: i32) {
        if let Some(mut region) = self.regions.get_mut(region_id.as_str()) {
            region.danger_level = level.clamp(1, 5);
        }
    }

    pub fn shift_region_danger(&self, region_id: &RegionId, delta: i32) {
        if let Some(mut region) = self.regions.get_mut(region_id.as_str()) {
            region.shift_danger(delta);
        }
    }

    // =========================================================================
    // NPCs
    // =========================================================================

    pub fn register_npc(
        &self,
        npc_id: impl Into<NpcId>,
        name: impl Into<String>,
        location: impl Into<RegionId>,
    ) {
        let npc = NpcState::new(npc_id, name, location);
        self.npcs.insert(npc.npc_id.as_str().to_string(), npc);
    }

    pub fn get_npc_state(&self, npc_id: &NpcId) -> Option<NpcState> {
        self.npcs.get(npc_id.as_str()).map(|n| n.clone())
    }

    pub fn npc_ids(&self) -> Vec<NpcId> {
        self.npcs.iter().map(|e| NpcId::new(e.key().clone())).collect()
    }

    /// Alive NPCs currently at a location.
    pub fn npcs_at(&self, location: &RegionId) -> Vec<NpcState> {
        self.npcs
            .iter()
            .filter(|e| e.value().alive && &e.value().current_location == location)
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn move_npc(&self, npc_id: &NpcId, new_location: &RegionId) -> bool {
        match self.npcs.get_mut(npc_id.as_str()) {
            Some(mut npc) if npc.alive => {
                npc.current_location = new_location.clone();
                true
            }
            _ => false,
        }
    }

    pub fn set_npc_mood(&self, npc_id: &NpcId, mood: impl Into<String>) {
        if let Some(mut npc) = self.npcs.get_mut(npc_id.as_str()) {
            npc.mood = mood.into();
        }
    }

    pub fn set_npc_available(&self, npc_id: &NpcId, available: bool) {
        if let Some(mut npc) = self.npcs.get_mut(npc_id.as_str()) {
            npc.available = available;
        }
    }

    pub fn set_npc_current_action(&self, npc_id: &NpcId, action: impl Into<String>) {
        if let Some(mut npc) = self.npcs.get_mut(npc_id.as_str()) {
            npc.current_action = action.into();
        }
    }

    pub fn set_npc_relationship(&self, npc_id: &NpcId, target: &NpcId, value: i64) {
        if let Some(mut npc) = self.npcs.get_mut(npc_id.as_str()) {
            npc.set_relationship(target, value);
        }
    }

    pub fn get_npc_relationship(&self, npc_id: &NpcId, target: &NpcId) -> i64 {
        self.npcs
            .get(npc_id.as_str())
            .map(|npc| npc.relationship_with(target))
            .unwrap_or(0)
    }

    pub fn kill_npc(&self, npc_id: &NpcId) {
        if let Some(mut npc) = self.npcs.get_mut(npc_id.as_str()) {
            npc.alive = false;
            npc.health = 0;
            npc.available = false;
        }
    }

    // =========================================================================
    // Quests
    // =========================================================================

    pub fn register_quest(
        &self,
        quest_id: impl Into<QuestId>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) {
        let quest = QuestState::new(quest_id, name, description);
        self.quests.insert(quest.quest_id.as_str().to_string(), quest);
    }

    pub fn insert_quest(&self, quest: QuestState) {
        self.quests.insert(quest.quest_id.as_str().to_string(), quest);
    }

    pub fn get_quest_state(&self, quest_id: &QuestId) -> Option<QuestState> {
        self.quests.get(quest_id.as_str()).map(|q| q.clone())
    }

    pub fn accept_quest(&self, quest_id: &QuestId) -> bool {
        let now = self.clock.now_epoch();
        match self.quests.get_mut(quest_id.as_str()) {
            Some(mut quest) => match quest.transition_to(QuestStatus::Active) {
                Ok(()) => {
                    quest.accepted_time = Some(now);
                    true
                }
                Err(e) => {
                    warn!(quest = %quest_id, error = %e, "quest accept rejected");
                    false
                }
            },
            None => false,
        }
    }

    pub fn complete_quest(&self, quest_id: &QuestId) -> bool {
        let now = self.clock.now_epoch();
        match self.quests.get_mut(quest_id.as_str()) {
            Some(mut quest) => match quest.transition_to(QuestStatus::Completed) {
                Ok(()) => {
                    quest.completed_time = Some(now);
                    true
                }
                Err(e) => {
                    warn!(quest = %quest_id, error = %e, "quest complete rejected");
                    false
                }
            },
            None => false,
        }
    }

    pub fn fail_quest(&self, quest_id: &QuestId) -> bool {
        match self.quests.get_mut(quest_id.as_str()) {
            Some(mut quest) => quest.transition_to(QuestStatus::Failed).is_ok(),
            None => false,
        }
    }

    pub fn abandon_quest(&self, quest_id: &QuestId) -> bool {
        match self.quests.get_mut(quest_id.as_str()) {
            Some(mut quest) => quest.transition_to(QuestStatus::Abandoned).is_ok(),
            None => false,
        }
    }

    pub fn update_quest_progress(&self, quest_id: &QuestId, progress: i32) {
        if let Some(mut quest) = self.quests.get_mut(quest_id.as_str()) {
            quest.set_progress(progress);
        }
    }

    pub fn complete_objective(&self, quest_id: &QuestId, objective: &str) {
        if let Some(mut quest) = self.quests.get_mut(quest_id.as_str()) {
            if quest.objectives.contains_key(objective) {
                quest.objectives.insert(objective.to_string(), Value::Bool(true));
            }
        }
    }

    pub fn get_active_quests(&self) -> Vec<QuestState> {
        self.quests
            .iter()
            .filter(|e| e.value().status == QuestStatus::Active)
            .map(|e| e.value().clone())
            .collect()
    }

    /// Quests still available whose giver NPC stands at `location`.
    pub fn get_available_quests_at_location(&self, location: &RegionId) -> Vec<QuestState> {
        self.quests
            .iter()
            .filter(|e| e.value().status == QuestStatus::Available)
            .filter(|e| {
                e.value()
                    .giver_npc_id
                    .as_ref()
                    .and_then(|giver| self.npcs.get(giver.as_str()))
                    .map(|npc| &npc.current_location == location)
                    .unwrap_or(false)
            })
            .map(|e| e.value().clone())
            .collect()
    }

    // =========================================================================
    // Summaries
    // =========================================================================

    pub fn get_world_summary(&self) -> Map<String, Value> {
        let crisis = self.crisis_level();
        let mut summary = Map::new();
        summary.insert("time".into(), json!(self.get_time_display()));
        summary.insert("crisis_level".into(), json!(crisis.value()));
        summary.insert("crisis_level_name".into(), json!(crisis.name()));
        summary.insert("regions_count".into(), json!(self.regions.len()));
        summary.insert(
            "discovered_regions".into(),
            json!(self.regions.iter().filter(|e| e.value().discovered).count()),
        );
        summary.insert("npcs_count".into(), json!(self.npcs.len()));
        summary.insert(
            "alive_npcs".into(),
            json!(self.npcs.iter().filter(|e| e.value().alive).count()),
        );
        summary.insert("quests_count".into(), json!(self.quests.len()));
        summary.insert("active_quests".into(), json!(self.get_active_quests().len()));
        summary.insert("global_flags".into(), json!(self.flag_names()));
        summary
    }

    /// Weather, danger, discovery, NPC presence, and quest availability
    /// at one location.
    pub fn get_location_summary(&self, location: &RegionId) -> Option<Map<String, Value>> {
        let region = self.get_region_state(location)?;
        let npcs_present: Vec<String> =
            self.npcs_at(location).into_iter().map(|n| n.name).collect();

        let mut summary = Map::new();
        summary.insert("location".into(), json!(region.name));
        summary.insert("weather".into(), json!(region.weather));
        summary.insert("danger_level".into(), json!(region.danger_level));
        summary.insert("discovered".into(), json!(region.discovered));
        summary.insert("npcs_present".into(), json!(npcs_present));
        summary.insert(
            "available_quests".into(),
            json!(self.get_available_quests_at_location(location).len()),
        );
        Some(summary)
    }

    /// World-state text block for prompt injection.
    pub fn get_context_for_llm(&self) -> String {
        let time = self.world_time();
        let crisis = self.crisis_level();
        let mut lines = vec![
            "[World state]".to_string(),
            format!("Time: {}", time.display()),
            format!("Crisis level: {} ({})", crisis.name(), crisis.value()),
            format!("Period: {}", time.period_of_day()),
        ];
        if time.is_night() {
            lines.push("It is night; visibility is poor".to_string());
        }
        lines.push(String::new());
        lines.push(format!("Situation: {}", crisis.description()));
        lines.push(String::new());
        lines.join("\n")
    }

    // =========================================================================
    // Event integration
    // =========================================================================

    /// Auto-mutate from an event. Wired to the event log as a static
    /// listener by the runtime constructor.
    pub fn handle_event(&self, event: &Event) {
        match event.event_type {
            EventType::Discovery => {
                if let Some(target) = event.data_str("target") {
                    self.discover_region(&RegionId::new(target));
                }
            }
            EventType::QuestAccepted => {
                if let Some(quest_id) = event.data_str("quest_id") {
                    self.accept_quest(&QuestId::new(quest_id));
                }
            }
            EventType::QuestCompleted => {
                if let Some(quest_id) = event.data_str("quest_id") {
                    self.complete_quest(&QuestId::new(quest_id));
                }
                if self.crisis_level() > CrisisLevel::Low {
                    self.shift_crisis(-1);
                }
            }
            EventType::WorldEvent => {
                let change = event.data_i64("crisis_change").unwrap_or(0) as i32;
                self.shift_crisis(change);
            }
            EventType::TimePass => {
                let minutes = event.data_i64("minutes").unwrap_or(10).max(0) as u64;
                self.advance_time(minutes);
            }
            _ => {}
        }
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    pub async fn save(&self) -> Result<(), EngineError> {
        let global = json!({
            "time": self.world_time(),
            "crisis_level": self.crisis_level(),
            "flags": self.global_flags.iter()
                .map(|e| (e.key().clone(), Value::Bool(*e.value())))
                .collect::<Map<String, Value>>(),
            "variables": self.global_variables.iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect::<Map<String, Value>>(),
        });
        self.kv
            .setex(&self.key_global(), self.ttl, &global.to_string())
            .await?;

        // Snapshot each registry before writing; map guards must not be
        // held across the round-trips.
        let regions: Vec<(String, String)> = self
            .regions
            .iter()
            .map(|e| Ok((e.key().clone(), serde_json::to_string(e.value())?)))
            .collect::<Result<_, serde_json::Error>>()?;
        for (id, payload) in regions {
            self.kv
                .setex(&self.key_region(&id), self.ttl, &payload)
                .await?;
        }
        let npcs: Vec<(String, String)> = self
            .npcs
            .iter()
            .map(|e| Ok((e.key().clone(), serde_json::to_string(e.value())?)))
            .collect::<Result<_, serde_json::Error>>()?;
        for (id, payload) in npcs {
            self.kv.setex(&self.key_npc(&id), self.ttl, &payload).await?;
        }
        let quests: Vec<(String, String)> = self
            .quests
            .iter()
            .map(|e| Ok((e.key().clone(), serde_json::to_string(e.value())?)))
            .collect::<Result<_, serde_json::Error>>()?;
        for (id, payload) in quests {
            self.kv
                .setex(&self.key_quest(&id), self.ttl, &payload)
                .await?;
        }
        Ok(())
    }

    pub async fn load(&self) -> Result<bool, EngineError> {
        if let Some(raw) = self.kv.get(&self.key_global()).await? {
            let global: Value = serde_json::from_str(&raw)?;
            if let Ok(time) = serde_json::from_value::<WorldTime>(global["time"].clone()) {
                *self.world_time.lock().unwrap_or_else(|e| e.into_inner()) = time;
            }
            if let Ok(crisis) =
                serde_json::from_value::<CrisisLevel>(global["crisis_level"].clone())
            {
                self.set_crisis_level(crisis);
            }
            if let Some(flags) = global["flags"].as_object() {
                for (flag, value) in flags {
                    self.global_flags
                        .insert(flag.clone(), value.as_bool().unwrap_or(false));
                }
            }
            if let Some(vars) = global["variables"].as_object() {
                for (key, value) in vars {
                    self.global_variables.insert(key.clone(), value.clone());
                }
            }
        }

        for key in self
            .kv
            .keys(&format!("rpg:world_state:{}:regions:*", self.session_id))
            .await?
        {
            if let Some(raw) = self.kv.get(&key).await? {
                match serde_json::from_str::<RegionState>(&raw) {
                    Ok(region) => {
                        self.regions
                            .insert(region.region_id.as_str().to_string(), region);
                    }
                    Err(e) => warn!(key = %key, error = %e, "region state unreadable, skipped"),
                }
            }
        }
        for key in self
            .kv
            .keys(&format!("rpg:world_state:{}:npcs:*", self.session_id))
            .await?
        {
            if let Some(raw) = self.kv.get(&key).await? {
                match serde_json::from_str::<NpcState>(&raw) {
                    Ok(npc) => {
                        self.npcs.insert(npc.npc_id.as_str().to_string(), npc);
                    }
                    Err(e) => warn!(key = %key, error = %e, "npc state unreadable, skipped"),
                }
            }
        }
        for key in self
            .kv
            .keys(&format!("rpg:world_state:{}:quests:*", self.session_id))
            .await?
        {
            if let Some(raw) = self.kv.get(&key).await? {
                match serde_json::from_str::<QuestState>(&raw) {
                    Ok(quest) => {
                        self.quests.insert(quest.quest_id.as_str().to_string(), quest);
                    }
                    Err(e) => warn!(key = %key, error = %e, "quest state unreadable, skipped"),
                }
            }
        }
        Ok(true)
    }

    pub async fn clear(&self) -> Result<(), EngineError> {
        let keys = self
            .kv
            .keys(&format!("rpg:world_state:{}*", self.session_id))
            .await?;
        self.kv.del(&keys).await?;
        self.regions.clear();
        self.npcs.clear();
        self.quests.clear();
        self.global_flags.clear();
        self.global_variables.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::clock::FixedClock;
    use crate::infrastructure::memory_kv::MemoryKv;
    use serde_json::json;

    fn world() -> WorldState {
        WorldState::new(
            SessionId::new("s1"),
            Arc::new(MemoryKv::new()),
            Arc::new(FixedClock(1_700_000_000.0)),
            3600,
        )
    }

    fn event(event_type: EventType, data: Map<String, Value>) -> Event {
        Event {
            event_type,
            event_id: talespin_domain::EventId::new("evt_test00000001"),
            timestamp: 1_700_000_000.0,
            player_id: talespin_domain::PlayerId::new("player"),
            session_id: SessionId::new("s1"),
            location: RegionId::new("tavern"),
            priority: talespin_domain::EventPriority::Medium,
            data,
            tags: vec![],
            processed: false,
            related_events: vec![],
        }
    }

    #[test]
    fn quest_lifecycle_decrements_crisis() {
        let world = world();
        world.set_crisis_level(CrisisLevel::Medium);
        world.register_quest("q1", "Find the relic", "Recover it");

        assert!(world.accept_quest(&QuestId::new("q1")));
        let mut data = Map::new();
        data.insert("quest_id".into(), json!("q1"));
        world.handle_event(&event(EventType::QuestCompleted, data));

        assert_eq!(
            world.get_quest_state(&QuestId::new("q1")).expect("quest").status,
            QuestStatus::Completed
        );
        assert_eq!(world.crisis_level(), CrisisLevel::Low);
    }

    #[test]
    fn quest_completion_at_low_keeps_crisis() {
        let world = world();
        world.set_crisis_level(CrisisLevel::Low);
        world.register_quest("q1", "n", "d");
        world.accept_quest(&QuestId::new("q1"));
        let mut data = Map::new();
        data.insert("quest_id".into(), json!("q1"));
        world.handle_event(&event(EventType::QuestCompleted, data));
        assert_eq!(world.crisis_level(), CrisisLevel::Low);
    }

    #[test]
    fn accept_twice_is_rejected() {
        let world = world();
        world.register_quest("q1", "n", "d");
        assert!(world.accept_quest(&QuestId::new("q1")));
        assert!(!world.accept_quest(&QuestId::new("q1")));
    }

    #[test]
    fn world_event_saturates_crisis() {
        let world = world();
        let mut data = Map::new();
        data.insert("crisis_change".into(), json!(99));
        world.handle_event(&event(EventType::WorldEvent, data));
        assert_eq!(world.crisis_level(), CrisisLevel::Emergency);

        let mut data = Map::new();
        data.insert("crisis_change".into(), json!(-99));
        world.handle_event(&event(EventType::WorldEvent, data));
        assert_eq!(world.crisis_level(), CrisisLevel::Calm);
    }

    #[test]
    fn discovery_event_marks_region() {
        let world = world();
        world.register_region("forest", "Whispering Forest");
        let mut data = Map::new();
        data.insert("target".into(), json!("forest"));
        world.handle_event(&event(EventType::Discovery, data));
        assert!(world.get_region_state(&RegionId::new("forest")).expect("region").discovered);
    }

    #[test]
    fn time_pass_event_advances_clock() {
        let world = world();
        let before = world.world_time().total_minutes();
        world.handle_event(&event(EventType::TimePass, Map::new()));
        assert_eq!(world.world_time().total_minutes(), before + 10);

        let mut data = Map::new();
        data.insert("minutes".into(), json!(45));
        world.handle_event(&event(EventType::TimePass, data));
        assert_eq!(world.world_time().total_minutes(), before + 55);
    }

    #[test]
    fn location_summary_lists_alive_npcs_and_quests() {
        let world = world();
        world.register_region("tavern", "The Rusty Flagon");
        world.register_npc("mira", "Mira", "tavern");
        world.register_npc("bram", "Bram", "tavern");
        world.kill_npc(&NpcId::new("bram"));
        let mut quest = QuestState::new("q1", "Errand", "Run an errand");
        quest.giver_npc_id = Some(NpcId::new("mira"));
        world.insert_quest(quest);

        let summary = world
            .get_location_summary(&RegionId::new("tavern"))
            .expect("summary");
        assert_eq!(summary["npcs_present"], json!(["Mira"]));
        assert_eq!(summary["available_quests"], json!(1));
        assert_eq!(summary["discovered"], json!(false));
    }

    #[test]
    fn npc_movement_requires_alive() {
        let world = world();
        world.register_npc("mira", "Mira", "tavern");
        assert!(world.move_npc(&NpcId::new("mira"), &RegionId::new("forest")));
        world.kill_npc(&NpcId::new("mira"));
        assert!(!world.move_npc(&NpcId::new("mira"), &RegionId::new("tavern")));
    }

    #[tokio::test]
    async fn save_load_round_trip() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let clock = Arc::new(FixedClock(1_700_000_000.0));
        let world = WorldState::new(SessionId::new("s1"), kv.clone(), clock.clone(), 3600);
        world.advance_time(90);
        world.set_crisis_level(CrisisLevel::High);
        world.set_flag("gate_open", true);
        world.register_region("tavern", "The Rusty Flagon");
        world.discover_region(&RegionId::new("tavern"));
        world.register_npc("mira", "Mira", "tavern");
        world.register_quest("q1", "Errand", "Run an errand");
        world.save().await.expect("save");

        let restored = WorldState::new(SessionId::new("s1"), kv, clock, 3600);
        assert!(restored.load().await.expect("load"));
        assert_eq!(restored.crisis_level(), CrisisLevel::High);
        assert_eq!(restored.world_time().total_minutes(), 8 * 60 + 90);
        assert!(restored.has_flag("gate_open"));
        assert!(restored.get_region_state(&RegionId::new("tavern")).expect("region").discovered);
        assert!(restored.get_npc_state(&NpcId::new("mira")).is_some());
        assert!(restored.get_quest_state(&QuestId::new("q1")).is_some());
    }

    #[tokio::test]
    async fn clear_wipes_registries_and_keys() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let world = WorldState::new(
            SessionId::new("s1"),
            kv.clone(),
            Arc::new(FixedClock(0.0)),
            3600,
        );
        world.register_region("tavern", "Tavern");
        world.save().await.expect("save");
        world.clear().await.expect("clear");
        assert!(world.region_ids().is_empty());
        assert!(kv
            .keys("rpg:world_state:s1*")
            .await
            .expect("keys")
            .is_empty());
    }
}
