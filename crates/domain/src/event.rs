//! Game event model.
//!
//! Events are immutable once emitted; only the `processed` flag is
//! flipped (to true) after at least one listener handled the event.
//! The type enumeration is wire-compatible: variants are only ever
//! appended, never renamed or reordered.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::{EventId, PlayerId, RegionId, SessionId};

/// Closed set of event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    // Exploration
    Discovery,
    ExplorationComplete,
    HiddenRevealed,

    // Interaction
    NpcMeet,
    NpcConversation,
    RelationshipChange,
    AllianceFormed,

    // Action
    CombatStart,
    CombatEnd,
    QuestAccepted,
    QuestCompleted,
    QuestFailed,
    ItemAcquired,
    ItemUsed,

    // World
    WorldEvent,
    CrisisTriggered,
    TimePass,

    // Catch-all
    Custom,
}

impl EventType {
    /// Every variant, in wire order.
    pub const ALL: [EventType; 18] = [
        EventType::Discovery,
        EventType::ExplorationComplete,
        EventType::HiddenRevealed,
        EventType::NpcMeet,
        EventType::NpcConversation,
        EventType::RelationshipChange,
        EventType::AllianceFormed,
        EventType::CombatStart,
        EventType::CombatEnd,
        EventType::QuestAccepted,
        EventType::QuestCompleted,
        EventType::QuestFailed,
        EventType::ItemAcquired,
        EventType::ItemUsed,
        EventType::WorldEvent,
        EventType::CrisisTriggered,
        EventType::TimePass,
        EventType::Custom,
    ];
}

/// Listener ordering weight; lower value is more urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventPriority {
    Critical,
    High,
    Medium,
    Low,
}

/// An immutable game event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    pub event_id: EventId,
    /// Unix timestamp in seconds. Non-decreasing within a session's
    /// emission stream.
    pub timestamp: f64,
    pub player_id: PlayerId,
    pub session_id: SessionId,
    pub location: RegionId,
    #[serde(default = "default_priority")]
    pub priority: EventPriority,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub processed: bool,
    #[serde(default)]
    pub related_events: Vec<EventId>,
}

fn default_priority() -> EventPriority {
    EventPriority::Medium
}

impl Event {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Value of a string field in the payload, if present.
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    /// Value of an integer field in the payload, if present.
    pub fn data_i64(&self, key: &str) -> Option<i64> {
        self.data.get(key).and_then(Value::as_i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Event {
        let mut data = Map::new();
        data.insert("target".into(), json!("forest"));
        data.insert("minutes".into(), json!(30));
        Event {
            event_type: EventType::Discovery,
            event_id: EventId::new("evt_000000000001"),
            timestamp: 1_700_000_000.5,
            player_id: PlayerId::new("player"),
            session_id: SessionId::new("s1"),
            location: RegionId::new("tavern"),
            priority: EventPriority::High,
            data,
            tags: vec!["exploration".into()],
            processed: false,
            related_events: vec![EventId::new("evt_000000000000")],
        }
    }

    #[test]
    fn event_type_wire_names_are_snake_case() {
        assert_eq!(
            serde_json::to_string(&EventType::QuestAccepted).expect("serialize"),
            "\"quest_accepted\""
        );
        assert_eq!(
            serde_json::from_str::<EventType>("\"world_event\"").expect("deserialize"),
            EventType::WorldEvent
        );
        assert_eq!(
            serde_json::to_string(&EventType::Custom).expect("serialize"),
            "\"custom\""
        );
    }

    #[test]
    fn encode_decode_is_identity() {
        let event = sample();
        let json = serde_json::to_string(&event).expect("serialize");
        let back: Event = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.event_type, event.event_type);
        assert_eq!(back.event_id, event.event_id);
        assert_eq!(back.timestamp, event.timestamp);
        assert_eq!(back.priority, event.priority);
        assert_eq!(back.data, event.data);
        assert_eq!(back.tags, event.tags);
        assert_eq!(back.processed, event.processed);
        assert_eq!(back.related_events, event.related_events);
    }

    #[test]
    fn missing_optional_fields_default() {
        let json = json!({
            "event_type": "custom",
            "event_id": "evt_abcabcabcabc",
            "timestamp": 1.0,
            "player_id": "player",
            "session_id": "s1",
            "location": "tavern"
        });
        let event: Event = serde_json::from_value(json).expect("deserialize");
        assert_eq!(event.priority, EventPriority::Medium);
        assert!(event.tags.is_empty());
        assert!(!event.processed);
    }

    #[test]
    fn data_accessors() {
        let event = sample();
        assert_eq!(event.data_str("target"), Some("forest"));
        assert_eq!(event.data_i64("minutes"), Some(30));
        assert!(event.data_str("missing").is_none());
        assert!(event.has_tag("exploration"));
        assert!(!event.has_tag("combat"));
    }
}
