//! World-state value types: time, crisis, weather, and the three
//! registry item types (regions, NPCs, quests).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::DomainError;
use crate::ids::{NpcId, QuestId, RegionId};

/// Weather in a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeatherType {
    Clear,
    Cloudy,
    Rain,
    Storm,
    Snow,
    Fog,
    Haunted,
}

impl WeatherType {
    /// All variants, in wire order. Weighted sampling indexes into this.
    pub const ALL: [WeatherType; 7] = [
        WeatherType::Clear,
        WeatherType::Cloudy,
        WeatherType::Rain,
        WeatherType::Storm,
        WeatherType::Snow,
        WeatherType::Fog,
        WeatherType::Haunted,
    ];
}

/// Global tension gauge, ordinal 0-5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CrisisLevel {
    Calm,
    Low,
    Medium,
    High,
    Critical,
    Emergency,
}

impl CrisisLevel {
    pub fn value(self) -> i32 {
        self as i32
    }

    pub fn from_value(value: i32) -> Self {
        match value.clamp(0, 5) {
            0 => CrisisLevel::Calm,
            1 => CrisisLevel::Low,
            2 => CrisisLevel::Medium,
            3 => CrisisLevel::High,
            4 => CrisisLevel::Critical,
            _ => CrisisLevel::Emergency,
        }
    }

    /// Apply a signed delta, saturating to [CALM, EMERGENCY].
    pub fn saturating_add(self, delta: i32) -> Self {
        Self::from_value(self.value() + delta)
    }

    pub fn name(self) -> &'static str {
        match self {
            CrisisLevel::Calm => "CALM",
            CrisisLevel::Low => "LOW",
            CrisisLevel::Medium => "MEDIUM",
            CrisisLevel::High => "HIGH",
            CrisisLevel::Critical => "CRITICAL",
            CrisisLevel::Emergency => "EMERGENCY",
        }
    }

    /// One-line situation description for prompt injection.
    pub fn description(self) -> &'static str {
        match self {
            CrisisLevel::Calm => "The world is quiet; nothing seems out of place",
            CrisisLevel::Low => "Odd rumors circulate, but it is still mostly safe",
            CrisisLevel::Medium => "A crisis is brewing; strange signs appear everywhere",
            CrisisLevel::High => "The crisis has surfaced and danger is rising",
            CrisisLevel::Critical => "The world teeters on the edge of collapse",
            CrisisLevel::Emergency => "Emergency! Immediate action is required",
        }
    }
}

/// Minutes-since-session-start world clock with derived day/hour/minute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldTime {
    pub days: u32,
    pub hours: u32,
    pub minutes: u32,
    total_minutes: u64,
}

impl WorldTime {
    pub fn new(days: u32, hours: u32, minutes: u32) -> Self {
        let total = days as u64 * 24 * 60 + hours as u64 * 60 + minutes as u64;
        Self::from_total_minutes(total)
    }

    pub fn from_total_minutes(total_minutes: u64) -> Self {
        let days = (total_minutes / (24 * 60)) as u32;
        let remaining = total_minutes % (24 * 60);
        Self {
            days,
            hours: (remaining / 60) as u32,
            minutes: (remaining % 60) as u32,
            total_minutes,
        }
    }

    pub fn total_minutes(&self) -> u64 {
        self.total_minutes
    }

    pub fn advance(&mut self, minutes: u64) {
        *self = Self::from_total_minutes(self.total_minutes + minutes);
    }

    pub fn period_of_day(&self) -> &'static str {
        match self.hours {
            5..=7 => "dawn",
            8..=11 => "morning",
            12..=13 => "noon",
            14..=16 => "afternoon",
            17..=19 => "evening",
            20..=22 => "night",
            _ => "late night",
        }
    }

    pub fn is_day(&self) -> bool {
        (6..20).contains(&self.hours)
    }

    pub fn is_night(&self) -> bool {
        !self.is_day()
    }

    pub fn display(&self) -> String {
        format!(
            "Day {} {:02}:{:02} ({})",
            self.days,
            self.hours,
            self.minutes,
            self.period_of_day()
        )
    }
}

impl Default for WorldTime {
    /// Sessions start on day 0 at 08:00.
    fn default() -> Self {
        Self::new(0, 8, 0)
    }
}

/// Per-region live state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionState {
    pub region_id: RegionId,
    pub name: String,
    #[serde(default = "default_weather")]
    pub weather: WeatherType,
    #[serde(default = "default_danger")]
    pub danger_level: i32,
    #[serde(default)]
    pub discovered: bool,
    #[serde(default)]
    pub fully_explored: bool,
    #[serde(default)]
    pub special_status: Map<String, Value>,
    #[serde(default)]
    pub last_updated: f64,
}

fn default_weather() -> WeatherType {
    WeatherType::Clear
}

fn default_danger() -> i32 {
    1
}

impl RegionState {
    pub fn new(region_id: impl Into<RegionId>, name: impl Into<String>) -> Self {
        Self {
            region_id: region_id.into(),
            name: name.into(),
            weather: WeatherType::Clear,
            danger_level: 1,
            discovered: false,
            fully_explored: false,
            special_status: Map::new(),
            last_updated: 0.0,
        }
    }

    /// Adjust the danger level by a delta, clamped to [1, 5].
    pub fn shift_danger(&mut self, delta: i32) {
        self.danger_level = (self.danger_level + delta).clamp(1, 5);
    }
}

/// Per-NPC live state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NpcState {
    pub npc_id: NpcId,
    pub name: String,
    pub current_location: RegionId,
    pub home_location: RegionId,
    #[serde(default = "default_true")]
    pub alive: bool,
    #[serde(default = "default_health")]
    pub health: i32,
    #[serde(default = "default_mood")]
    pub mood: String,
    #[serde(default = "default_true")]
    pub available: bool,
    #[serde(default = "default_action")]
    pub current_action: String,
    /// npc_id -> relationship in [-100, 100]
    #[serde(default)]
    pub relationships: Map<String, Value>,
    #[serde(default)]
    pub active_quests: Vec<QuestId>,
    #[serde(default)]
    pub dialogue_state: Map<String, Value>,
    #[serde(default)]
    pub last_interacted: f64,
}

fn default_true() -> bool {
    true
}

fn default_health() -> i32 {
    100
}

fn default_mood() -> String {
    "neutral".to_string()
}

fn default_action() -> String {
    "idle".to_string()
}

impl NpcState {
    pub fn new(
        npc_id: impl Into<NpcId>,
        name: impl Into<String>,
        location: impl Into<RegionId>,
    ) -> Self {
        let location = location.into();
        Self {
            npc_id: npc_id.into(),
            name: name.into(),
            current_location: location.clone(),
            home_location: location,
            alive: true,
            health: 100,
            mood: "neutral".to_string(),
            available: true,
            current_action: "idle".to_string(),
            relationships: Map::new(),
            active_quests: Vec::new(),
            dialogue_state: Map::new(),
            last_interacted: 0.0,
        }
    }

    pub fn relationship_with(&self, target: &NpcId) -> i64 {
        self.relationships
            .get(target.as_str())
            .and_then(Value::as_i64)
            .unwrap_or(0)
    }

    /// Set a relationship value, clamped to [-100, 100].
    pub fn set_relationship(&mut self, target: &NpcId, value: i64) {
        self.relationships
            .insert(target.as_str().to_string(), Value::from(value.clamp(-100, 100)));
    }
}

/// Quest progression status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestStatus {
    Available,
    Active,
    Completed,
    Failed,
    Abandoned,
}

impl QuestStatus {
    /// Legal transitions: `available -> active -> {completed, failed,
    /// abandoned}`; everything else is rejected.
    pub fn can_transition_to(self, next: QuestStatus) -> bool {
        matches!(
            (self, next),
            (QuestStatus::Available, QuestStatus::Active)
                | (QuestStatus::Active, QuestStatus::Completed)
                | (QuestStatus::Active, QuestStatus::Failed)
                | (QuestStatus::Active, QuestStatus::Abandoned)
        )
    }
}

/// Per-quest live state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestState {
    pub quest_id: QuestId,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub stage: i32,
    #[serde(default = "default_max_stage")]
    pub max_stage: i32,
    #[serde(default = "default_status")]
    pub status: QuestStatus,
    #[serde(default)]
    pub progress: i32,
    #[serde(default = "default_max_progress")]
    pub max_progress: i32,
    /// objective id -> completed
    #[serde(default)]
    pub objectives: Map<String, Value>,
    #[serde(default)]
    pub accepted_time: Option<f64>,
    #[serde(default)]
    pub completed_time: Option<f64>,
    #[serde(default)]
    pub deadline: Option<f64>,
    #[serde(default)]
    pub giver_npc_id: Option<NpcId>,
    #[serde(default)]
    pub target_location: Option<RegionId>,
}

fn default_max_stage() -> i32 {
    1
}

fn default_status() -> QuestStatus {
    QuestStatus::Available
}

fn default_max_progress() -> i32 {
    100
}

impl QuestState {
    pub fn new(
        quest_id: impl Into<QuestId>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            quest_id: quest_id.into(),
            name: name.into(),
            description: description.into(),
            stage: 0,
            max_stage: 1,
            status: QuestStatus::Available,
            progress: 0,
            max_progress: 100,
            objectives: Map::new(),
            accepted_time: None,
            completed_time: None,
            deadline: None,
            giver_npc_id: None,
            target_location: None,
        }
    }

    /// Move to a new status, enforcing the quest state machine.
    pub fn transition_to(&mut self, next: QuestStatus) -> Result<(), DomainError> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::invalid_state_transition(format!(
                "quest {}: {:?} -> {:?}",
                self.quest_id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }

    /// Update progress, clamped to [0, max_progress].
    pub fn set_progress(&mut self, progress: i32) {
        self.progress = progress.clamp(0, self.max_progress);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn world_time_advances_and_rolls_over() {
        let mut t = WorldTime::default();
        assert_eq!(t.total_minutes(), 8 * 60);
        t.advance(17 * 60); // 08:00 + 17h = day 1, 01:00
        assert_eq!(t.days, 1);
        assert_eq!(t.hours, 1);
        assert_eq!(t.minutes, 0);
        assert_eq!(t.total_minutes(), 25 * 60);
    }

    #[test]
    fn day_night_boundary() {
        assert!(WorldTime::new(0, 6, 0).is_day());
        assert!(WorldTime::new(0, 19, 59).is_day());
        assert!(WorldTime::new(0, 20, 0).is_night());
        assert!(WorldTime::new(0, 5, 59).is_night());
    }

    #[test]
    fn period_of_day_covers_all_hours() {
        for hour in 0..24 {
            let t = WorldTime::new(0, hour, 0);
            assert!(!t.period_of_day().is_empty());
        }
        assert_eq!(WorldTime::new(0, 12, 30).period_of_day(), "noon");
        assert_eq!(WorldTime::new(0, 23, 0).period_of_day(), "late night");
    }

    #[test]
    fn crisis_saturates_both_ends() {
        assert_eq!(CrisisLevel::Calm.saturating_add(-3), CrisisLevel::Calm);
        assert_eq!(CrisisLevel::Emergency.saturating_add(2), CrisisLevel::Emergency);
        assert_eq!(CrisisLevel::Medium.saturating_add(1), CrisisLevel::High);
        assert_eq!(CrisisLevel::Medium.saturating_add(-2), CrisisLevel::Calm);
    }

    #[test]
    fn crisis_wire_names() {
        assert_eq!(
            serde_json::to_string(&CrisisLevel::Emergency).expect("serialize"),
            "\"EMERGENCY\""
        );
    }

    #[test]
    fn region_danger_clamps() {
        let mut region = RegionState::new("forest", "Whispering Forest");
        region.shift_danger(10);
        assert_eq!(region.danger_level, 5);
        region.shift_danger(-99);
        assert_eq!(region.danger_level, 1);
    }

    #[test]
    fn npc_relationship_clamps() {
        let mut npc = NpcState::new("mira", "Mira", "tavern");
        npc.set_relationship(&NpcId::new("bram"), 250);
        assert_eq!(npc.relationship_with(&NpcId::new("bram")), 100);
        npc.set_relationship(&NpcId::new("bram"), -250);
        assert_eq!(npc.relationship_with(&NpcId::new("bram")), -100);
        assert_eq!(npc.relationship_with(&NpcId::new("stranger")), 0);
    }

    #[test]
    fn quest_lifecycle_happy_path() {
        let mut quest = QuestState::new("q1", "Find the relic", "Recover the relic");
        quest.transition_to(QuestStatus::Active).expect("accept");
        quest.transition_to(QuestStatus::Completed).expect("complete");
        assert_eq!(quest.status, QuestStatus::Completed);
    }

    #[test]
    fn quest_rejects_illegal_transitions() {
        let mut quest = QuestState::new("q1", "Find the relic", "Recover the relic");
        assert!(quest.transition_to(QuestStatus::Completed).is_err());
        quest.transition_to(QuestStatus::Active).expect("accept");
        quest.transition_to(QuestStatus::Failed).expect("fail");
        assert!(quest.transition_to(QuestStatus::Active).is_err());
        assert!(quest.transition_to(QuestStatus::Completed).is_err());
    }

    #[test]
    fn quest_progress_clamps() {
        let mut quest = QuestState::new("q1", "n", "d");
        quest.set_progress(150);
        assert_eq!(quest.progress, 100);
        quest.set_progress(-5);
        assert_eq!(quest.progress, 0);
    }

    #[test]
    fn quest_state_round_trips() {
        let mut quest = QuestState::new("q1", "Find the relic", "Recover the relic");
        quest.giver_npc_id = Some(NpcId::new("mira"));
        quest.transition_to(QuestStatus::Active).expect("accept");
        let json = serde_json::to_string(&quest).expect("serialize");
        let back: QuestState = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.status, QuestStatus::Active);
        assert_eq!(back.giver_npc_id, Some(NpcId::new("mira")));
    }
}
