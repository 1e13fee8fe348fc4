//! Prompt builders for the DM, the map engine, and the context loader.
//!
//! Every prompt instructs the model not to emit `<think>` spans; the
//! cleaning pass in `infrastructure::response_text` strips them anyway
//! when a model ignores the instruction.

use talespin_domain::{CrisisLevel, RegionNode};

/// Intent classifier prompt. Expects a JSON object
/// `{"intent": "EXPLORE"|"ACTION"|"CHAT", "keyword": "..."}`.
pub fn intent_prompt(location_name: &str, history: &str, user_input: &str) -> String {
    format!(
        r#"You are a game command parser.
Player location: {location_name}

[Recent conversation]
{history}
----------------
Current input: "{user_input}"

Classify the player's intent:
1. **EXPLORE**: the player wants to reach a concrete place not on the map
   (e.g. "find a shop", "enter that door"). If a previous action opened a
   way in and the input is "go inside", that is EXPLORE.
2. **ACTION**: the player tries to change the situation (attack, flee,
   break the door, hack the terminal).
3. **CHAT**: small talk or observation.

Return JSON only:
{{
    "intent": "EXPLORE" | "ACTION" | "CHAT",
    "keyword": "place name (EXPLORE) / action verb (ACTION)"
}}"#
    )
}

/// Action-resolution referee prompt.
pub fn action_resolution_prompt(
    genre: &str,
    tone: &str,
    final_conflict: &str,
    crisis: CrisisLevel,
    location_name: &str,
    hp: i64,
    sanity: i64,
    event_context: &str,
    history: &str,
    user_input: &str,
) -> String {
    format!(
        r#"You are a strict TRPG referee.
World genre: {genre}
Overall tone: {tone}
Background crisis: {final_conflict} (tension: {crisis_name})
Scene: {location_name}
Player status: HP {hp} | SAN {sanity}

{event_context}

[Previously]
{history}
----------------
Player action: "{user_input}"

Perform **action resolution**. Rules:

1. **Consequence driven**: do not just describe the attempt - rule on the
   outcome (success / failure / costly success).
2. **State change**: the action must change the environment or the
   player's state: information gained, damage taken, an alarm raised.
3. **Use the history**: if the player is retrying the same action, this
   attempt gets a decisive result.
4. **Consistency**: judge impossible actions by the physics or magic of
   {genre} and punish them.
5. **Style**: hard, objective, compact. At most 150 words. Never output
   <think> tags."#,
        crisis_name = crisis.name(),
    )
}

/// Free-chat narration prompt with the AI-director directive baked in.
pub fn chat_narration_prompt(
    genre: &str,
    tone: &str,
    location_name: &str,
    location_desc: &str,
    event_context: &str,
    history: &str,
    user_input: &str,
    director_instruction: &str,
) -> String {
    format!(
        r#"You are the **immersive simulation engine** of a professional TRPG.
World genre: {genre}
Overall tone: {tone}
Current place: {location_name} - {location_desc}
Player input: "{user_input}"

{event_context}

[Context]
{history}
----------------
{director_instruction}

Respond under these narrative principles:

1. **Physical grounding**: describe objects, light, sound, and smell that
   exist in the scene; no hollow metaphors.
2. **Logical consistency**: the response is the direct result of the
   player's behavior, extrapolated with restraint by {genre} common sense.
3. **Style**: keep the {tone} register exactly.
4. **Form**: at most 150 words, second person, never output <think> tags."#
    )
}

/// Director directive when the roll says: hint the main crisis.
pub fn director_hint_crisis(final_conflict: &str) -> String {
    format!(
        "**[AI Director]**: this scene must obliquely hint at signs of \
         [{final_conflict}] - a wrong sound, a moving shadow - and build tension."
    )
}

/// Director directive for neutral ambience.
pub fn director_neutral() -> String {
    "**[AI Director]**: focus on the physical atmosphere of the scene; \
     stay calm or mysterious, do not manufacture panic."
        .to_string()
}

/// Route-concept synthesis prompt for an edge between two known nodes.
/// Expects JSON `{route_name, geo_type, description, risk_level, rumors}`.
pub fn route_concept_prompt(
    genre: &str,
    tone: &str,
    from_node: &RegionNode,
    to_node: &RegionNode,
) -> String {
    format!(
        r#"You are a physically-minded route designer for a {genre} world
with a {tone} tone.

Design the travel route between two regions:
- From: {from_name} ({from_geo}) - {from_desc}
- To: {to_name} ({to_geo}) - {to_desc}

The route must be geographically plausible for both endpoints and usable
in both directions. Output strict JSON (no Markdown fences):
{{
  "route_name": "name of the path",
  "geo_type": "terrain or structure type",
  "description": "one or two sentences of concrete physical detail",
  "risk_level": integer 1-5,
  "rumors": ["optional short rumor lines"]
}}"#,
        from_name = from_node.name,
        from_geo = from_node.geo_feature,
        from_desc = from_node.desc,
        to_name = to_node.name,
        to_geo = to_node.geo_feature,
        to_desc = to_node.desc,
    )
}

/// Dynamic sub-location synthesis prompt. Expects JSON
/// `{name, desc, geo_feature, risk_level, connection_path_name}`.
pub fn sub_location_prompt(parent: &RegionNode, keyword: &str) -> String {
    format!(
        r#"You are a map-subdivision designer who insists on physical
plausibility. Generate one reachable new sub-location from the player's
stated intent.
Parent place: {parent_name} ({parent_geo})
Parent description: {parent_desc}
The player wants to explore: "{keyword}"

The place must fit the parent's geography; avoid abstract metaphor and
keep the approach perceivable. Output strict JSON (no Markdown fences):
{{
  "name": "place name",
  "desc": "compact description with tangible physical detail",
  "geo_feature": "terrain or architectural feature",
  "risk_level": integer 1-5,
  "connection_path_name": "name of the path that leads there (e.g. Rusty Ladder)"
}}"#,
        parent_name = parent.name,
        parent_geo = if parent.geo_feature.is_empty() {
            "unknown terrain"
        } else {
            &parent.geo_feature
        },
        parent_desc = parent.desc,
    )
}

/// Dynamic content generation prompt for the context loader. Expects
/// JSON `{content_type, name, description, data, requires_action,
/// suggested_response}`.
pub fn dynamic_content_prompt(
    user_intent: &str,
    location_name: &str,
    location_desc: &str,
    event_context: &str,
    hp: i64,
    sanity: i64,
    tags: &str,
    level: i64,
) -> String {
    format!(
        r#"You are a resourceful Dungeon Master. The player is doing this:

Player intent: {user_intent}
Current place: {location_name} - {location_desc}

[Recent event background]
{event_context}

[Player status]
HP: {hp}/100
SAN: {sanity}/100
Tags: {tags}
Level: {level}

Generate fitting game content for the intent and situation.

Return JSON only:
{{
    "content_type": "location|npc|item|quest|encounter",
    "name": "content name",
    "description": "detailed description",
    "data": {{"custom fields": "value"}},
    "requires_action": "whether the player must act further",
    "suggested_response": "suggested reply to the player"
}}"#
    )
}
