//! Session cognition: chat history, the live player-state hash, and
//! the save archive.
//!
//! Three keys per session - `rpg:history:<s>` (list of JSON messages),
//! `rpg:state:<s>` (hash of string-encoded fields), `rpg:meta:<s>`
//! (JSON metadata). The blob archive is the source of truth on restore:
//! hot keys are wiped before replay.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use serde_json::{json, Map, Value};
use talespin_domain::{player, Message, SessionId};
use tracing::warn;

use crate::error::EngineError;
use crate::infrastructure::ports::{BlobStore, ClockPort, KvStore};

const SAVE_PREFIX: &str = "saves/";
const SCHEMA_VERSION: u64 = 1;

pub struct CognitionStore {
    session_id: SessionId,
    kv: Arc<dyn KvStore>,
    blob: Arc<dyn BlobStore>,
    clock: Arc<dyn ClockPort>,
    ttl: u64,
}

impl CognitionStore {
    pub fn new(
        session_id: SessionId,
        kv: Arc<dyn KvStore>,
        blob: Arc<dyn BlobStore>,
        clock: Arc<dyn ClockPort>,
        ttl: u64,
    ) -> Self {
        Self {
            session_id,
            kv,
            blob,
            clock,
            ttl,
        }
    }

    fn history_key(&self) -> String {
        format!("rpg:history:{}", self.session_id)
    }

    fn state_key(&self) -> String {
        format!("rpg:state:{}", self.session_id)
    }

    fn meta_key(&self) -> String {
        format!("rpg:meta:{}", self.session_id)
    }

    fn save_name(&self) -> String {
        format!("{SAVE_PREFIX}{}.json", self.session_id)
    }

    fn now_iso(&self) -> String {
        Utc.timestamp_opt(self.clock.now_epoch() as i64, 0)
            .single()
            .map(|t| t.to_rfc3339())
            .unwrap_or_default()
    }

    // =========================================================================
    // History
    // =========================================================================

    pub async fn add_message(&self, message: &Message) -> Result<(), EngineError> {
        let payload = serde_json::to_string(message)?;
        self.kv.rpush(&self.history_key(), &payload).await?;
        self.kv.expire(&self.history_key(), self.ttl).await?;
        Ok(())
    }

    /// The last `limit` messages, oldest first. Empty history yields an
    /// empty vec.
    pub async fn get_recent_history(&self, limit: usize) -> Result<Vec<Message>, EngineError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let raw = self
            .kv
            .lrange(&self.history_key(), -(limit as i64), -1)
            .await?;
        Ok(decode_messages(raw))
    }

    pub async fn get_all_history(&self) -> Result<Vec<Message>, EngineError> {
        let raw = self.kv.lrange(&self.history_key(), 0, -1).await?;
        Ok(decode_messages(raw))
    }

    // =========================================================================
    // Player state
    // =========================================================================

    /// Write state fields. Maps and sequences are JSON-encoded, scalars
    /// stringified, strings passed through.
    pub async fn update_player_state(
        &self,
        updates: &Map<String, Value>,
    ) -> Result<(), EngineError> {
        let fields: Vec<(String, String)> = updates
            .iter()
            .map(|(key, value)| (key.clone(), encode_state_value(value)))
            .collect();
        self.kv.hset_map(&self.state_key(), &fields).await?;
        self.kv.expire(&self.state_key(), self.ttl).await?;
        Ok(())
    }

    /// Read the full state hash, decoding the known complex fields as
    /// JSON and the known counters as integers. Decode failures leave
    /// the raw string in place.
    pub async fn get_player_state(&self) -> Result<Map<String, Value>, EngineError> {
        let raw = self.kv.hgetall(&self.state_key()).await?;
        let mut state = Map::new();
        for (key, value) in raw {
            let decoded = if player::COMPLEX_FIELDS.contains(&key.as_str()) {
                serde_json::from_str(&value).unwrap_or(Value::String(value))
            } else if player::INT_FIELDS.contains(&key.as_str()) {
                value
                    .parse::<i64>()
                    .map(Value::from)
                    .unwrap_or(Value::String(value))
            } else {
                Value::String(value)
            };
            state.insert(key, decoded);
        }
        Ok(state)
    }

    // =========================================================================
    // Archive
    // =========================================================================

    /// Snapshot the session into the blob tier. Returns the object name.
    pub async fn archive_session(&self) -> Result<String, EngineError> {
        let history = self.get_all_history().await?;
        let final_state = self.get_player_state().await?;
        let metadata = self.next_metadata(&final_state).await?;

        // Keep the rolling metadata in the hot tier so the next save
        // increments from it.
        self.kv
            .setex(
                &self.meta_key(),
                self.ttl,
                &Value::Object(metadata.clone()).to_string(),
            )
            .await?;

        let archive = json!({
            "schema_version": SCHEMA_VERSION,
            "session_id": self.session_id.as_str(),
            "metadata": metadata,
            "history": history,
            "final_state": final_state,
        });
        let name = self.save_name();
        self.blob.save_json(&name, &archive).await?;
        Ok(name)
    }

    /// Restore the session from the blob tier. The hot keys are wiped
    /// first; returns false on a missing or unreadable archive.
    pub async fn load_session(&self) -> Result<bool, EngineError> {
        let Some(archive) = self.blob.load_json(&self.save_name()).await? else {
            return Ok(false);
        };
        let Some(history) = archive.get("history").and_then(Value::as_array) else {
            warn!(session = %self.session_id, "archive missing history block");
            return Ok(false);
        };

        let keys = vec![self.history_key()];
        self.kv.del(&keys).await?;
        for entry in history {
            self.kv.rpush(&self.history_key(), &entry.to_string()).await?;
        }
        self.kv.expire(&self.history_key(), self.ttl).await?;

        self.kv.del(&[self.state_key()]).await?;
        if let Some(final_state) = archive.get("final_state").and_then(Value::as_object) {
            let fields: Vec<(String, String)> = final_state
                .iter()
                .map(|(key, value)| (key.clone(), encode_state_value(value)))
                .collect();
            self.kv.hset_map(&self.state_key(), &fields).await?;
        }
        self.kv.expire(&self.state_key(), self.ttl).await?;

        let metadata = archive.get("metadata").cloned().unwrap_or(json!({}));
        self.kv
            .setex(&self.meta_key(), self.ttl, &metadata.to_string())
            .await?;
        Ok(true)
    }

    /// Metadata for all archives under the save prefix.
    pub async fn list_saves(blob: &dyn BlobStore) -> Result<Vec<Map<String, Value>>, EngineError> {
        let mut saves = Vec::new();
        for name in blob.list(SAVE_PREFIX).await? {
            let Some(archive) = blob.load_json(&name).await? else {
                continue;
            };
            let session_id = name
                .trim_start_matches(SAVE_PREFIX)
                .trim_end_matches(".json")
                .to_string();
            let metadata = archive.get("metadata").and_then(Value::as_object);
            let final_state = archive.get("final_state").and_then(Value::as_object);

            let mut entry = Map::new();
            entry.insert(
                "session_id".into(),
                metadata
                    .and_then(|m| m.get("session_id").cloned())
                    .unwrap_or(json!(session_id)),
            );
            for field in ["timestamp", "playtime_minutes", "location"] {
                entry.insert(
                    field.into(),
                    metadata.and_then(|m| m.get(field).cloned()).unwrap_or(Value::Null),
                );
            }
            for field in ["hp", "sanity"] {
                entry.insert(
                    field.into(),
                    final_state
                        .and_then(|s| s.get(field).cloned())
                        .unwrap_or(Value::Null),
                );
            }
            saves.push(entry);
        }
        Ok(saves)
    }

    pub async fn delete_save(&self) -> Result<bool, EngineError> {
        Ok(self.blob.delete(&self.save_name()).await?)
    }

    /// Drop the hot keys without touching the archive.
    pub async fn clear_session(&self) -> Result<(), EngineError> {
        self.kv
            .del(&[self.history_key(), self.state_key(), self.meta_key()])
            .await?;
        Ok(())
    }

    async fn next_metadata(
        &self,
        state: &Map<String, Value>,
    ) -> Result<Map<String, Value>, EngineError> {
        let location = state
            .get("location")
            .and_then(Value::as_str)
            .unwrap_or("Unknown")
            .to_string();

        if let Some(raw) = self.kv.get(&self.meta_key()).await? {
            if let Ok(Value::Object(mut metadata)) = serde_json::from_str(&raw) {
                let playtime = metadata
                    .get("playtime_minutes")
                    .and_then(Value::as_i64)
                    .unwrap_or(0);
                metadata.insert("timestamp".into(), json!(self.now_iso()));
                metadata.insert("location".into(), json!(location));
                metadata.insert("playtime_minutes".into(), json!(playtime + 1));
                return Ok(metadata);
            }
        }

        let mut metadata = Map::new();
        metadata.insert("session_id".into(), json!(self.session_id.as_str()));
        metadata.insert("created_at".into(), json!(self.now_iso()));
        metadata.insert("timestamp".into(), json!(self.now_iso()));
        metadata.insert("playtime_minutes".into(), json!(1));
        metadata.insert("location".into(), json!(location));
        metadata.insert("hp".into(), state.get("hp").cloned().unwrap_or(json!(100)));
        metadata.insert(
            "sanity".into(),
            state.get("sanity").cloned().unwrap_or(json!(100)),
        );
        Ok(metadata)
    }
}

fn decode_messages(raw: Vec<String>) -> Vec<Message> {
    raw.iter()
        .filter_map(|entry| match serde_json::from_str(entry) {
            Ok(message) => Some(message),
            Err(e) => {
                warn!(error = %e, "history entry unreadable, skipped");
                None
            }
        })
        .collect()
}

fn encode_state_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(_) | Value::Array(_) => value.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => "null".to_string(),
    }
}
