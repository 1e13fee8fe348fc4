//! Shared fixtures: a scripted LLM stub and a seeded two-region world.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use talespin_domain::{Message, PlayerId, RegionId, RegionSeed, SessionId};
use talespin_engine::config::AppConfig;
use talespin_engine::infrastructure::clock::SystemClock;
use talespin_engine::infrastructure::ports::{KvStore, LlmError, LlmPort};
use talespin_engine::infrastructure::storage::LocalBlobStore;
use talespin_engine::infrastructure::{MemoryKv, SystemRandom};
use talespin_engine::runtime::RuntimeEngine;

/// LLM stub that replays queued responses (falling back to a default)
/// and counts every call. Can be switched into a failing mode.
pub struct ScriptedLlm {
    responses: Mutex<VecDeque<String>>,
    default_response: String,
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl ScriptedLlm {
    pub fn new(default_response: &str) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            default_response: default_response.to_string(),
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    pub fn queue(&self, response: &str) {
        self.responses
            .lock()
            .expect("responses lock")
            .push_back(response.to_string());
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl LlmPort for ScriptedLlm {
    async fn complete(
        &self,
        _messages: &[Message],
        _temperature: f32,
        _max_tokens: u32,
    ) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(LlmError::RequestFailed("scripted failure".to_string()));
        }
        Ok(self
            .responses
            .lock()
            .expect("responses lock")
            .pop_front()
            .unwrap_or_else(|| self.default_response.clone()))
    }
}

pub struct Fixture {
    pub runtime: Arc<RuntimeEngine>,
    pub llm: Arc<ScriptedLlm>,
    pub kv: Arc<dyn KvStore>,
    // Keeps the blob directory alive for the test's duration.
    _blob_dir: tempfile::TempDir,
}

/// The bootstrap region pair used across scenarios.
pub fn seed_regions() -> Vec<RegionSeed> {
    vec![
        RegionSeed::new("tavern", "The Rusty Flagon")
            .with_neighbors([RegionId::new("forest")]),
        RegionSeed::new("forest", "Whispering Forest")
            .with_neighbors([RegionId::new("tavern")]),
    ]
}

/// A runtime over in-memory stores with the scripted LLM, a seeded
/// two-region map (fixed "Muddy Path" route), and an initialized
/// player standing in the tavern.
pub async fn seeded_runtime() -> Fixture {
    let llm = Arc::new(ScriptedLlm::new("DM default narration."));
    llm.queue(r#"{"route_name": "Muddy Path", "geo_type": "trail", "description": "A rutted track through the pines", "risk_level": 2, "rumors": []}"#);

    let blob_dir = tempfile::tempdir().expect("tempdir");
    let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
    let runtime = Arc::new(RuntimeEngine::new(
        SessionId::new("s1"),
        PlayerId::new("player"),
        AppConfig::default(),
        kv.clone(),
        Arc::new(LocalBlobStore::new(blob_dir.path())),
        Some(llm.clone()),
        Arc::new(SystemClock::new()),
        Arc::new(SystemRandom::new()),
    ));

    runtime
        .map_graph()
        .ingest_l2_graph(&seed_regions())
        .await
        .expect("ingest");
    runtime
        .initialize_player(&RegionId::new("tavern"), &[])
        .await
        .expect("initialize player");
    runtime
        .world_state()
        .register_region("forest", "Whispering Forest");

    Fixture {
        runtime,
        llm,
        kv,
        _blob_dir: blob_dir,
    }
}
