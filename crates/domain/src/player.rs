//! Player-state defaults and rules.
//!
//! The live player state is a string-keyed hash in the KV tier; these
//! helpers define the default block written at character creation, the
//! attribute math, and the clamping rules the engine enforces.

use serde_json::{json, Map, Value};

use crate::ids::RegionId;

/// State-hash fields decoded as JSON on read.
pub const COMPLEX_FIELDS: [&str; 5] = ["attributes", "skills", "inventory", "quests", "story_nodes"];

/// State-hash fields parsed as integers on read.
pub const INT_FIELDS: [&str; 7] = ["hp", "max_hp", "sanity", "max_sanity", "level", "exp", "gold"];

/// The six attribute keys, in display order.
pub const ATTRIBUTE_KEYS: [&str; 6] = ["str", "dex", "int", "wis", "con", "cha"];

/// Default state block written by `initialize_player`.
pub fn default_state(start_location: &RegionId, tags: &[String]) -> Map<String, Value> {
    let tags: Vec<Value> = if tags.is_empty() {
        vec![json!("traveler")]
    } else {
        tags.iter().map(|t| json!(t)).collect()
    };
    let mut attributes = Map::new();
    for key in ATTRIBUTE_KEYS {
        attributes.insert(key.to_string(), json!(10));
    }
    let mut state = Map::new();
    state.insert("hp".into(), json!(100));
    state.insert("max_hp".into(), json!(100));
    state.insert("sanity".into(), json!(100));
    state.insert("max_sanity".into(), json!(100));
    state.insert("location".into(), json!(start_location.as_str()));
    state.insert("tags".into(), Value::Array(tags));
    state.insert("skills".into(), json!(["observation"]));
    state.insert("attributes".into(), Value::Object(attributes));
    state.insert("inventory".into(), json!([]));
    state.insert("level".into(), json!(1));
    state.insert("exp".into(), json!(0));
    state.insert("gold".into(), json!(100));
    state
}

/// D&D 5e style modifier for an attribute score in [1, 30].
pub fn attribute_modifier(score: i32) -> i32 {
    (clamp_attribute(score) - 10).div_euclid(2)
}

/// Attributes live in [1, 30].
pub fn clamp_attribute(score: i32) -> i32 {
    score.clamp(1, 30)
}

/// Skill proficiency lives in [1, 5].
pub fn clamp_proficiency(level: i32) -> i32 {
    level.clamp(1, 5)
}

/// Vital stats live in [0, max].
pub fn clamp_vital(value: i64, max: i64) -> i64 {
    value.clamp(0, max.max(0))
}

/// Primary attribute backing a skill check, if the skill is known.
pub fn skill_attribute(skill: &str) -> Option<&'static str> {
    let attr = match skill {
        "arcana" | "history" | "nature" | "religion" | "investigation" => "int",
        "insight" | "perception" | "medicine" | "survival" | "animal_handling" => "wis",
        "persuasion" | "deception" | "intimidation" | "street_wise" | "performance" => "cha",
        "athletics" => "str",
        "acrobatics" | "stealth" | "sleight_of_hand" => "dex",
        "observation" => "wis",
        _ => return None,
    };
    Some(attr)
}
