//! Background world simulation: time, weather, NPC activity, world
//! events, and crisis drift.
//!
//! The simulator shares the session's world state and event log with
//! the turn loop and runs on the companion worker; everything it emits
//! lands in the event log before the next turn reads its context.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{Local, TimeZone};
use serde_json::json;
use talespin_domain::{
    CrisisLevel, EventPriority, EventType, NpcId, NpcState, RegionId, SessionId, WeatherType,
};
use tracing::debug;

use crate::error::EngineError;
use crate::infrastructure::ports::{weighted_index, ClockPort, RandomPort};
use crate::stores::event_log::{EmitEvent, EventLog};
use crate::stores::world_state::WorldState;

const HISTORY_CAP: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationPhase {
    /// Player away; ticks run in fast-forward batches.
    Quiet,
    /// Player actively driving turns.
    Active,
    /// Player just returned; a catch-up summary is owed.
    Transition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorldEventCategory {
    Natural,
    Political,
    Economic,
    Social,
    Mystical,
    Crisis,
}

impl WorldEventCategory {
    fn wire_name(self) -> &'static str {
        match self {
            WorldEventCategory::Natural => "natural",
            WorldEventCategory::Political => "political",
            WorldEventCategory::Economic => "economic",
            WorldEventCategory::Social => "social",
            WorldEventCategory::Mystical => "mystical",
            WorldEventCategory::Crisis => "crisis",
        }
    }
}

/// One NPC action produced by a tick.
#[derive(Debug, Clone)]
pub struct NpcActivity {
    pub npc_id: NpcId,
    pub activity_type: String,
    pub timestamp: f64,
    pub from_location: Option<RegionId>,
    pub to_location: Option<RegionId>,
    pub description: String,
    pub affected_npcs: Vec<NpcId>,
}

/// One simulated world event.
#[derive(Debug, Clone)]
pub struct WorldEventRecord {
    pub event_id: String,
    pub category: WorldEventCategory,
    pub name: String,
    pub description: String,
    pub timestamp: f64,
    pub duration_minutes: u64,
    pub affected_regions: Vec<RegionId>,
    pub crisis_change: i32,
    pub narrative: String,
}

#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub npc_activity_chance: f64,
    pub npc_move_chance: f64,
    pub npc_social_chance: f64,
    pub event_base_chance: f64,
    pub crisis_event_bonus: f64,
    pub crisis_natural_decay: f64,
    pub crisis_escalation_chance: f64,
    pub default_tick_minutes: u64,
    pub max_tick_minutes: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            npc_activity_chance: 0.3,
            npc_move_chance: 0.15,
            npc_social_chance: 0.1,
            event_base_chance: 0.1,
            crisis_event_bonus: 0.05,
            crisis_natural_decay: 0.05,
            crisis_escalation_chance: 0.1,
            default_tick_minutes: 30,
            max_tick_minutes: 480,
        }
    }
}

struct EventTemplate {
    name: &'static str,
    description: &'static str,
    duration: u64,
    crisis_change: i32,
    narrative: &'static str,
}

pub struct WorldSimulator {
    session_id: SessionId,
    world_state: Arc<WorldState>,
    event_log: Arc<EventLog>,
    random: Arc<dyn RandomPort>,
    clock: Arc<dyn ClockPort>,
    config: SimulationConfig,

    phase: Mutex<SimulationPhase>,
    tick_count: AtomicU64,
    recent_activities: Mutex<Vec<NpcActivity>>,
    recent_world_events: Mutex<Vec<WorldEventRecord>>,
}

impl WorldSimulator {
    pub fn new(
        session_id: SessionId,
        world_state: Arc<WorldState>,
        event_log: Arc<EventLog>,
        random: Arc<dyn RandomPort>,
        clock: Arc<dyn ClockPort>,
        config: SimulationConfig,
    ) -> Self {
        Self {
            session_id,
            world_state,
            event_log,
            random,
            clock,
            config,
            phase: Mutex::new(SimulationPhase::Active),
            tick_count: AtomicU64::new(0),
            recent_activities: Mutex::new(Vec::new()),
            recent_world_events: Mutex::new(Vec::new()),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn phase(&self) -> SimulationPhase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_phase(&self, phase: SimulationPhase) {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner()) = phase;
    }

    // =========================================================================
    // Tick
    // =========================================================================

    /// Advance the world by `minutes` (clamped to the configured max):
    /// time, weather, NPC activity, world events, crisis drift.
    pub async fn simulate_tick(
        &self,
        minutes: Option<u64>,
    ) -> Result<Vec<WorldEventRecord>, EngineError> {
        let minutes = minutes
            .unwrap_or(self.config.default_tick_minutes)
            .min(self.config.max_tick_minutes);
        self.tick_count.fetch_add(1, Ordering::Relaxed);

        self.world_state.advance_time(minutes);
        self.simulate_weather_change();

        let activities = self.simulate_npc_activities().await?;
        {
            let mut recent = self
                .recent_activities
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            recent.extend(activities);
            trim_to_cap(&mut recent);
        }

        let events = self.simulate_world_events().await?;
        {
            let mut recent = self
                .recent_world_events
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            recent.extend(events.iter().cloned());
            trim_to_cap(&mut recent);
        }

        self.adjust_crisis_level();
        Ok(events)
    }

    // =========================================================================
    // Weather
    // =========================================================================

    /// Each region resamples its weather with probability 0.1; under
    /// high crisis the distribution skews toward haunted/fog/storm.
    fn simulate_weather_change(&self) {
        let high_crisis = self.world_state.crisis_level() >= CrisisLevel::High;
        let weights: [f64; 7] = if high_crisis {
            [10.0, 15.0, 20.0, 15.0, 5.0, 10.0, 25.0]
        } else {
            [30.0, 25.0, 15.0, 5.0, 5.0, 10.0, 10.0]
        };
        for region_id in self.world_state.region_ids() {
            if self.random.next_f64() < 0.1 {
                let weather =
                    WeatherType::ALL[weighted_index(self.random.as_ref(), &weights)];
                self.world_state.set_region_weather(&region_id, weather);
            }
        }
    }

    // =========================================================================
    // NPC activity
    // =========================================================================

    pub async fn simulate_npc_activities(&self) -> Result<Vec<NpcActivity>, EngineError> {
        let mut activities = Vec::new();
        for npc_id in self.world_state.npc_ids() {
            let Some(npc) = self.world_state.get_npc_state(&npc_id) else {
                continue;
            };
            if !npc.alive {
                continue;
            }
            if self.random.next_f64() >= self.config.npc_activity_chance {
                continue;
            }
            if let Some(activity) = self.decide_npc_activity(&npc) {
                self.apply_npc_activity(&activity, &npc).await?;
                activities.push(activity);
            }
        }
        Ok(activities)
    }

    fn decide_npc_activity(&self, npc: &NpcState) -> Option<NpcActivity> {
        let roll = self.random.next_f64();
        if roll < self.config.npc_move_chance {
            self.generate_npc_movement(npc)
        } else if roll < self.config.npc_move_chance + self.config.npc_social_chance {
            self.generate_npc_social(npc)
        } else {
            self.generate_npc_routine(npc)
        }
    }

    fn generate_npc_movement(&self, npc: &NpcState) -> Option<NpcActivity> {
        let candidates: Vec<RegionId> = self
            .world_state
            .discovered_region_ids()
            .into_iter()
            .filter(|rid| rid != &npc.current_location)
            .collect();
        if candidates.is_empty() {
            return None;
        }
        let target = candidates[self.random.pick_index(candidates.len())].clone();
        Some(NpcActivity {
            npc_id: npc.npc_id.clone(),
            activity_type: "move".to_string(),
            timestamp: self.clock.now_epoch(),
            from_location: Some(npc.current_location.clone()),
            to_location: Some(target.clone()),
            description: format!(
                "{} traveled from {} to {}",
                npc.name, npc.current_location, target
            ),
            affected_npcs: Vec::new(),
        })
    }

    fn generate_npc_social(&self, npc: &NpcState) -> Option<NpcActivity> {
        let nearby: Vec<NpcState> = self
            .world_state
            .npcs_at(&npc.current_location)
            .into_iter()
            .filter(|other| other.npc_id != npc.npc_id)
            .collect();
        if nearby.is_empty() {
            return None;
        }
        let target = &nearby[self.random.pick_index(nearby.len())];
        let actions = [
            ("gossip", "gossiped with"),
            ("trade", "traded with"),
            ("argue", "argued with"),
            ("cooperate", "worked together with"),
        ];
        let (_, verb) = actions[self.random.pick_index(actions.len())];
        Some(NpcActivity {
            npc_id: npc.npc_id.clone(),
            activity_type: "social".to_string(),
            timestamp: self.clock.now_epoch(),
            from_location: None,
            to_location: None,
            description: format!("{} {verb} {}", npc.name, target.name),
            affected_npcs: vec![target.npc_id.clone()],
        })
    }

    fn generate_npc_routine(&self, npc: &NpcState) -> Option<NpcActivity> {
        let hour = self.world_state.world_time().hours;
        let options: [(&str, &str); 3] = if (6..12).contains(&hour) {
            [
                ("work", "is working"),
                ("gather", "is gathering supplies"),
                ("patrol", "is on patrol"),
            ]
        } else if (12..18).contains(&hour) {
            [
                ("work", "is working"),
                ("trade", "is trading"),
                ("rest", "is resting"),
            ]
        } else {
            [
                ("rest", "is resting"),
                ("socialize", "is socializing"),
                ("guard", "is keeping watch"),
            ]
        };
        let (activity_type, verb) = options[self.random.pick_index(options.len())];
        Some(NpcActivity {
            npc_id: npc.npc_id.clone(),
            activity_type: activity_type.to_string(),
            timestamp: self.clock.now_epoch(),
            from_location: None,
            to_location: None,
            description: format!("{} {verb}", npc.name),
            affected_npcs: Vec::new(),
        })
    }

    async fn apply_npc_activity(
        &self,
        activity: &NpcActivity,
        npc: &NpcState,
    ) -> Result<(), EngineError> {
        if activity.activity_type == "move" {
            if let Some(target) = &activity.to_location {
                self.world_state.move_npc(&npc.npc_id, target);
            }
        } else if activity.activity_type == "social" {
            for target in &activity.affected_npcs {
                let current = self.world_state.get_npc_relationship(&npc.npc_id, target);
                // Socializing skews mildly positive.
                let change = self.random.gen_range(-5, 10) as i64;
                self.world_state
                    .set_npc_relationship(&npc.npc_id, target, current + change);
            }
        }
        self.world_state
            .set_npc_current_action(&npc.npc_id, activity.activity_type.clone());

        let location = activity
            .to_location
            .clone()
            .unwrap_or_else(|| npc.current_location.clone());
        self.event_log
            .emit(
                EmitEvent::new(
                    EventType::Custom,
                    format!("npc_{}", npc.npc_id),
                    location,
                )
                .with_entry("activity", json!(activity.activity_type))
                .with_entry("description", json!(activity.description))
                .with_tags(["npc", "simulation", activity.activity_type.as_str()]),
            )
            .await?;
        Ok(())
    }

    // =========================================================================
    // World events
    // =========================================================================

    pub async fn simulate_world_events(&self) -> Result<Vec<WorldEventRecord>, EngineError> {
        let crisis = self.world_state.crisis_level().value() as f64;
        let chance = self.config.event_base_chance + self.config.crisis_event_bonus * crisis;
        if self.random.next_f64() >= chance {
            return Ok(Vec::new());
        }
        match self.generate_random_event() {
            Some(event) => {
                self.apply_world_event(&event).await?;
                Ok(vec![event])
            }
            None => Ok(Vec::new()),
        }
    }

    fn generate_random_event(&self) -> Option<WorldEventRecord> {
        let crisis = self.world_state.crisis_level().value() as f64;
        let categories = [
            WorldEventCategory::Natural,
            WorldEventCategory::Political,
            WorldEventCategory::Economic,
            WorldEventCategory::Social,
            WorldEventCategory::Mystical,
            WorldEventCategory::Crisis,
        ];
        let weights = [
            30.0 - crisis * 3.0,
            15.0,
            15.0,
            20.0,
            5.0 + crisis * 2.0,
            5.0 + crisis * 4.0,
        ];
        let category = categories[weighted_index(self.random.as_ref(), &weights)];

        let templates = event_templates(category);
        if templates.is_empty() {
            return None;
        }
        let template = &templates[self.random.pick_index(templates.len())];

        let discovered = self.world_state.discovered_region_ids();
        let mut affected = Vec::new();
        if !discovered.is_empty() {
            let count = self.random.gen_range(1, discovered.len().min(3) as i32) as usize;
            let mut picked = std::collections::HashSet::new();
            while picked.len() < count.min(discovered.len()) {
                picked.insert(self.random.pick_index(discovered.len()));
                if picked.len() == discovered.len() {
                    break;
                }
            }
            affected = picked.into_iter().map(|i| discovered[i].clone()).collect();
        }

        let now = self.clock.now_epoch();
        Some(WorldEventRecord {
            event_id: format!("we_{}_{}", now as u64, self.random.gen_range(1000, 9999)),
            category,
            name: template.name.to_string(),
            description: template.description.to_string(),
            timestamp: now,
            duration_minutes: template.duration,
            affected_regions: affected,
            crisis_change: template.crisis_change,
            narrative: template.narrative.to_string(),
        })
    }

    async fn apply_world_event(&self, event: &WorldEventRecord) -> Result<(), EngineError> {
        if event.crisis_change != 0 {
            self.world_state.shift_crisis(event.crisis_change);
        }
        for region_id in &event.affected_regions {
            if event.crisis_change > 0 {
                self.world_state.shift_region_danger(region_id, 1);
            } else if event.crisis_change < 0 {
                self.world_state.shift_region_danger(region_id, -1);
            }
        }

        let location = event
            .affected_regions
            .first()
            .cloned()
            .unwrap_or_else(|| RegionId::new("unknown"));
        self.event_log
            .emit(
                EmitEvent::new(EventType::WorldEvent, "world_simulator", location)
                    .with_entry("event_id", json!(event.event_id))
                    .with_entry("category", json!(event.category.wire_name()))
                    .with_entry("name", json!(event.name))
                    .with_entry("description", json!(event.description))
                    .with_entry("crisis_change", json!(event.crisis_change))
                    .with_entry("narrative", json!(event.narrative))
                    .with_tags(["world_event", "simulation", event.category.wire_name()])
                    .with_priority(EventPriority::High),
            )
            .await?;
        debug!(name = %event.name, category = ?event.category, "world event applied");
        Ok(())
    }

    // =========================================================================
    // Crisis drift
    // =========================================================================

    fn adjust_crisis_level(&self) {
        let current = self.world_state.crisis_level();

        // Decay is easier the lower the level already is.
        if current > CrisisLevel::Calm {
            let decay_chance = self.config.crisis_natural_decay
                * (CrisisLevel::Emergency.value() - current.value() + 1) as f64;
            if self.random.next_f64() < decay_chance {
                self.world_state.shift_crisis(-1);
            }
        }
        if self.world_state.crisis_level() < CrisisLevel::Emergency
            && self.random.next_f64() < self.config.crisis_escalation_chance
        {
            self.world_state.shift_crisis(1);
        }
    }

    // =========================================================================
    // Phase hooks
    // =========================================================================

    /// Fast-forward while the player was away: one 30-minute tick per
    /// half hour of idleness, capped at 24 hours.
    pub async fn on_player_idle(
        &self,
        idle_minutes: u64,
    ) -> Result<Vec<WorldEventRecord>, EngineError> {
        self.set_phase(SimulationPhase::Quiet);
        let mut events = Vec::new();
        let capped = idle_minutes.min(24 * 60);
        for _ in 0..(capped / 30) {
            events.extend(self.simulate_tick(Some(30)).await?);
        }
        Ok(events)
    }

    /// Back to active play; returns the catch-up narrative.
    pub fn on_player_return(&self) -> String {
        self.set_phase(SimulationPhase::Transition);
        let narrative = self.get_recent_narrative();
        self.set_phase(SimulationPhase::Active);
        format!(
            "{narrative}\nTime has passed; it is now {}\nCurrent crisis level: {}",
            self.world_state.get_time_display(),
            self.world_state.crisis_level().name()
        )
    }

    pub fn on_player_action(&self) {
        self.set_phase(SimulationPhase::Active);
    }

    // =========================================================================
    // Summaries
    // =========================================================================

    pub fn get_simulation_summary(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut summary = serde_json::Map::new();
        summary.insert(
            "tick_count".into(),
            json!(self.tick_count.load(Ordering::Relaxed)),
        );
        summary.insert(
            "phase".into(),
            json!(match self.phase() {
                SimulationPhase::Quiet => "quiet",
                SimulationPhase::Active => "active",
                SimulationPhase::Transition => "transition",
            }),
        );
        summary.insert(
            "recent_activities".into(),
            json!(self
                .recent_activities
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .len()),
        );
        summary.insert(
            "recent_events".into(),
            json!(self
                .recent_world_events
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .len()),
        );
        summary.insert("world_time".into(), json!(self.world_state.get_time_display()));
        summary.insert(
            "crisis_level".into(),
            json!(self.world_state.crisis_level().name()),
        );
        summary
    }

    /// Narrative digest of recent world events and NPC activity for
    /// prompt injection; empty when nothing happened.
    pub fn get_recent_narrative(&self) -> String {
        let mut lines = vec!["[World developments]".to_string()];

        let events = self
            .recent_world_events
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if !events.is_empty() {
            lines.push("Recent world events:".to_string());
            for event in events.iter().rev().take(5).rev() {
                let time_str = Local
                    .timestamp_opt(event.timestamp as i64, 0)
                    .single()
                    .map(|t| t.format("%H:%M").to_string())
                    .unwrap_or_else(|| "--:--".to_string());
                lines.push(format!("  [{time_str}] {}: {}", event.name, event.description));
            }
        }
        drop(events);

        let activities = self
            .recent_activities
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if !activities.is_empty() {
            lines.push("Recent NPC activity:".to_string());
            for activity in activities.iter().rev().take(5).rev() {
                lines.push(format!("  {}", activity.description));
            }
        }

        if lines.len() > 1 {
            lines.join("\n")
        } else {
            String::new()
        }
    }
}

fn trim_to_cap<T>(buffer: &mut Vec<T>) {
    if buffer.len() > HISTORY_CAP {
        let excess = buffer.len() - HISTORY_CAP;
        buffer.drain(..excess);
    }
}

fn event_templates(category: WorldEventCategory) -> Vec<EventTemplate> {
    match category {
        WorldEventCategory::Natural => vec![
            EventTemplate {
                name: "Sudden Storm",
                description: "A violent storm sweeps across the area",
                duration: 120,
                crisis_change: 0,
                narrative: "Black clouds pile up and thunder rolls closer...",
            },
            EventTemplate {
                name: "Bountiful Harvest",
                description: "Good weather brings the fields to a rich harvest",
                duration: 0,
                crisis_change: -1,
                narrative: "Golden fields sway in the wind; the season is kind.",
            },
            EventTemplate {
                name: "Earthquake",
                description: "The ground shakes violently without warning",
                duration: 30,
                crisis_change: 1,
                narrative: "The earth trembles and a deep rumble rises from far below...",
            },
        ],
        WorldEventCategory::Political => vec![
            EventTemplate {
                name: "Border Skirmish",
                description: "A small clash breaks out at the border",
                duration: 0,
                crisis_change: 1,
                narrative: "Word arrives that the border country is restless...",
            },
            EventTemplate {
                name: "Peace Accord",
                description: "The factions reach a temporary peace",
                duration: 0,
                crisis_change: -1,
                narrative: "Messengers hurry back and forth until an accord is struck.",
            },
        ],
        WorldEventCategory::Economic => vec![
            EventTemplate {
                name: "Caravan Arrival",
                description: "A large caravan arrives bearing rare goods",
                duration: 0,
                crisis_change: 0,
                narrative: "Dust rises on the road; a caravan is drawing near...",
            },
            EventTemplate {
                name: "Supply Shortage",
                description: "Certain supplies are suddenly scarce",
                duration: 0,
                crisis_change: 0,
                narrative: "The market murmurs; some shelves have gone empty.",
            },
        ],
        WorldEventCategory::Social => vec![
            EventTemplate {
                name: "Festival",
                description: "A festival fills the settlement",
                duration: 180,
                crisis_change: -1,
                narrative: "Drums and banners everywhere; the people celebrate.",
            },
            EventTemplate {
                name: "Spreading Rumors",
                description: "Rumors about a mysterious happening spread",
                duration: 0,
                crisis_change: 0,
                narrative: "People whisper in corners about some secret...",
            },
        ],
        WorldEventCategory::Mystical => vec![
            EventTemplate {
                name: "Arcane Surge",
                description: "An unusual magical disturbance charges the air",
                duration: 60,
                crisis_change: 1,
                narrative: "A strange energy hangs in the air, setting teeth on edge...",
            },
            EventTemplate {
                name: "Omen in the Sky",
                description: "A strange sign appears in the sky",
                duration: 0,
                crisis_change: 1,
                narrative: "The clouds twist into uncanny shapes, as if foretelling something...",
            },
        ],
        WorldEventCategory::Crisis => vec![
            EventTemplate {
                name: "Crisis Deepens",
                description: "The central crisis takes a new turn",
                duration: 0,
                crisis_change: 2,
                narrative: "Troubling news from afar; the situation is worsening...",
            },
            EventTemplate {
                name: "A Turning Point",
                description: "A sliver of hope appears amid the crisis",
                duration: 0,
                crisis_change: -1,
                narrative: "In the dark, a thin line of light shows itself...",
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::clock::{FixedClock, SeqRandom};
    use crate::infrastructure::memory_kv::MemoryKv;
    use crate::infrastructure::ports::KvStore;

    fn fixture(random: Arc<dyn RandomPort>, config: SimulationConfig) -> WorldSimulator {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let clock = Arc::new(FixedClock(1_700_000_000.0));
        let world_state = Arc::new(WorldState::new(
            SessionId::new("s1"),
            kv.clone(),
            clock.clone(),
            3600,
        ));
        let event_log = Arc::new(EventLog::new(SessionId::new("s1"), kv, clock.clone(), 3600));
        WorldSimulator::new(
            SessionId::new("s1"),
            world_state,
            event_log,
            random,
            clock,
            config,
        )
    }

    #[tokio::test]
    async fn tick_advances_time_exactly() {
        let sim = fixture(Arc::new(SeqRandom::new(vec![0.99])), SimulationConfig::default());
        let before = sim.world_state.world_time().total_minutes();
        sim.simulate_tick(Some(30)).await.expect("tick");
        assert_eq!(sim.world_state.world_time().total_minutes(), before + 30);
    }

    #[tokio::test]
    async fn tick_clamps_to_max() {
        let sim = fixture(Arc::new(SeqRandom::new(vec![0.99])), SimulationConfig::default());
        let before = sim.world_state.world_time().total_minutes();
        sim.simulate_tick(Some(10_000)).await.expect("tick");
        assert_eq!(
            sim.world_state.world_time().total_minutes(),
            before + 480
        );
    }

    #[tokio::test]
    async fn forced_npc_move_relocates_and_emits() {
        let config = SimulationConfig {
            npc_activity_chance: 1.0,
            npc_move_chance: 1.0,
            event_base_chance: 0.0,
            crisis_natural_decay: 0.0,
            crisis_escalation_chance: 0.0,
            ..SimulationConfig::default()
        };
        // Rolls: activity gate (0.0 < 1.0), move branch (0.0 < 1.0).
        let sim = fixture(Arc::new(SeqRandom::new(vec![0.0])), config);
        sim.world_state.register_region("tavern", "Tavern");
        sim.world_state.register_region("forest", "Forest");
        sim.world_state.discover_region(&RegionId::new("forest"));
        sim.world_state.register_npc("mira", "Mira", "tavern");

        let before = sim.world_state.world_time().total_minutes();
        sim.simulate_tick(Some(30)).await.expect("tick");
        assert_eq!(sim.world_state.world_time().total_minutes(), before + 30);

        let npc = sim
            .world_state
            .get_npc_state(&NpcId::new("mira"))
            .expect("npc");
        assert_eq!(npc.current_location, RegionId::new("forest"));
        assert_eq!(npc.current_action, "move");

        let activities = sim
            .recent_activities
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        assert!(!activities.is_empty());

        let crisis = sim.world_state.crisis_level();
        assert!(crisis >= CrisisLevel::Calm && crisis <= CrisisLevel::Emergency);

        let emitted = sim.event_log.get_events_by_tag("npc", 10).await.expect("events");
        assert_eq!(emitted.len(), 1);
    }

    #[tokio::test]
    async fn social_updates_relationship_within_bounds() {
        let config = SimulationConfig {
            npc_activity_chance: 1.0,
            npc_move_chance: 0.0,
            npc_social_chance: 1.0,
            event_base_chance: 0.0,
            crisis_escalation_chance: 0.0,
            ..SimulationConfig::default()
        };
        let sim = fixture(Arc::new(SeqRandom::new(vec![0.0])), config);
        sim.world_state.register_region("tavern", "Tavern");
        sim.world_state.register_npc("mira", "Mira", "tavern");
        sim.world_state.register_npc("bram", "Bram", "tavern");

        sim.simulate_tick(Some(30)).await.expect("tick");
        let rel = sim
            .world_state
            .get_npc_relationship(&NpcId::new("mira"), &NpcId::new("bram"));
        // SeqRandom's gen_range returns the minimum: -5.
        assert_eq!(rel, -5);
    }

    #[tokio::test]
    async fn guaranteed_world_event_emits_high_priority() {
        let config = SimulationConfig {
            npc_activity_chance: 0.0,
            event_base_chance: 1.0,
            crisis_natural_decay: 0.0,
            crisis_escalation_chance: 0.0,
            ..SimulationConfig::default()
        };
        let sim = fixture(Arc::new(SeqRandom::new(vec![0.0])), config);
        sim.world_state.register_region("tavern", "Tavern");
        sim.world_state.discover_region(&RegionId::new("tavern"));

        let events = sim.simulate_tick(Some(30)).await.expect("tick");
        assert_eq!(events.len(), 1);

        let emitted = sim
            .event_log
            .get_events_by_type(EventType::WorldEvent, 10)
            .await
            .expect("events");
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].priority, EventPriority::High);
        assert!(emitted[0].has_tag("simulation"));
    }

    #[tokio::test]
    async fn crisis_stays_in_bounds_under_escalation() {
        let config = SimulationConfig {
            npc_activity_chance: 0.0,
            event_base_chance: 0.0,
            crisis_natural_decay: 0.0,
            crisis_escalation_chance: 1.0,
            ..SimulationConfig::default()
        };
        let sim = fixture(Arc::new(SeqRandom::new(vec![0.5])), config);
        for _ in 0..10 {
            sim.simulate_tick(Some(30)).await.expect("tick");
        }
        assert_eq!(sim.world_state.crisis_level(), CrisisLevel::Emergency);
    }

    #[tokio::test]
    async fn idle_runs_bounded_ticks() {
        let config = SimulationConfig {
            npc_activity_chance: 0.0,
            event_base_chance: 0.0,
            crisis_natural_decay: 0.0,
            crisis_escalation_chance: 0.0,
            ..SimulationConfig::default()
        };
        let sim = fixture(Arc::new(SeqRandom::new(vec![0.99])), config);
        let before = sim.world_state.world_time().total_minutes();
        sim.on_player_idle(90).await.expect("idle");
        assert_eq!(sim.world_state.world_time().total_minutes(), before + 90);
        assert_eq!(sim.phase(), SimulationPhase::Quiet);

        let summary = sim.on_player_return();
        assert!(summary.contains("Time has passed"));
        assert_eq!(sim.phase(), SimulationPhase::Active);
    }

    #[test]
    fn history_buffers_trim() {
        let mut buffer: Vec<u32> = (0..80).collect();
        trim_to_cap(&mut buffer);
        assert_eq!(buffer.len(), HISTORY_CAP);
        assert_eq!(buffer[0], 30);
    }
}
