//! Talespin player - interactive terminal front-end.
//!
//! Reads player input line by line and feeds it to the runtime engine.
//! Slash commands that the engine does not own (`/quit`, `/help`,
//! `/map`, `/exits`, `/save`, `/load`) are handled here; everything
//! else - including `/look`, `/move`, `/status` and free text - goes
//! through `RuntimeEngine::step`.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde_json::Value;
use talespin_domain::{PlayerId, RegionId, RegionSeed, SessionId};
use talespin_engine::config::{KvBackend, StorageKind};
use talespin_engine::infrastructure::ports::{KvStore, LlmPort};
use talespin_engine::infrastructure::{
    blob_store_from_config, MemoryKv, OpenAiClient, RedisKv, SystemClock, SystemRandom,
};
use talespin_engine::{AppConfig, RuntimeEngine};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const BANNER: &str = r#"
  _____     _             _
 |_   _|_ _| | ___  ___ _ __ (_)_ __
   | |/ _` | |/ _ \/ __| '_ \| | '_ \
   | | (_| | |  __/\__ \ |_) | | | | |
   |_|\__,_|_|\___||___/ .__/|_|_| |_|
                       |_|
"#;

const HELP: &str = "\
Commands:
  /look           observe the current place
  /move <id>      travel to a connected region
  /exits          list reachable regions
  /map            show the current node
  /status         player status
  /events         recent event log
  /world          world state summary
  /plugins        loaded plugins
  /save           save the session
  /load           restore the session
  /help           this text
  /quit           leave the game
Anything else is free text for the DM.";

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "talespin=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = AppConfig::from_env().context("configuration")?;
    tracing::info!("Starting Talespin");
    tracing::info!("  LLM: {}", config.llm.base_url);
    tracing::info!(
        "  Storage: {}",
        match config.storage.kind {
            StorageKind::Local => &config.storage.base_path,
            StorageKind::Minio => &config.storage.endpoint,
        }
    );

    let session_id = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "session_001".to_string());

    let kv: Arc<dyn KvStore> = match config.kv.backend {
        KvBackend::Memory => Arc::new(MemoryKv::new()),
        KvBackend::Redis => Arc::new(
            RedisKv::connect(&config.kv.url())
                .await
                .context("KV backend")?,
        ),
    };
    let blob = blob_store_from_config(&config.storage).context("blob storage")?;
    let llm: Option<Arc<dyn LlmPort>> = if config.llm.base_url.is_empty() {
        None
    } else {
        Some(Arc::new(OpenAiClient::new(&config.llm)))
    };

    let runtime = Arc::new(RuntimeEngine::new(
        SessionId::new(session_id.clone()),
        PlayerId::new("player"),
        config,
        kv,
        blob,
        llm,
        Arc::new(SystemClock::new()),
        Arc::new(SystemRandom::new()),
    ));

    bootstrap_world(&runtime).await.context("world bootstrap")?;
    let companion = runtime.spawn_companion(Duration::from_secs(60));

    println!("{BANNER}");
    println!("Session: {session_id} - type /help for commands.\n");
    println!("{}\n", runtime.step("/look").await);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        use std::io::Write;
        std::io::stdout().flush().ok();

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        match input.to_lowercase().as_str() {
            "/quit" | "/exit" | "q" | "exit" => break,
            "/help" | "h" => {
                println!("{HELP}\n");
                continue;
            }
            "/map" => {
                println!("{}\n", map_view(&runtime).await);
                continue;
            }
            "/exits" => {
                println!("{}\n", exits_view(&runtime).await);
                continue;
            }
            "/save" => {
                match runtime.save_game().await {
                    Ok(name) => println!("💾 Saved: {name}\n"),
                    Err(e) => println!("❌ Save failed: {e}\n"),
                }
                continue;
            }
            "/load" => {
                match runtime.load_game().await {
                    Ok(true) => println!("📂 Session restored.\n"),
                    Ok(false) => println!("❌ No save found for this session.\n"),
                    Err(e) => println!("❌ Load failed: {e}\n"),
                }
                continue;
            }
            _ => {}
        }

        // Long absences fast-forward the world before the next turn.
        let idle_secs = runtime.seconds_since_last_turn();
        if idle_secs > 600.0 {
            let idle_minutes = (idle_secs / 60.0) as u64;
            if runtime.simulator().on_player_idle(idle_minutes).await.is_ok() {
                println!("{}\n", runtime.simulator().on_player_return());
            }
        }

        println!("{}\n", runtime.step(input).await);
    }

    companion.abort();
    println!("Farewell, traveler.");
    Ok(ExitCode::SUCCESS)
}

/// Seed a starter map and character on first run. A real deployment
/// ingests a generated world instead; this keeps a fresh session
/// playable out of the box.
async fn bootstrap_world(runtime: &RuntimeEngine) -> anyhow::Result<()> {
    let start = RegionId::new("tavern");
    if !runtime.map_graph().node_exists(&start).await? {
        let mut tavern = RegionSeed::new("tavern", "The Rusty Flagon")
            .with_neighbors([RegionId::new("forest")]);
        tavern.desc = "Low beams, a guttering hearth, and the smell of stale beer.".to_string();
        tavern.geo_feature = "timber-framed taproom".to_string();
        tavern.risk_level = Some(1);

        let mut forest = RegionSeed::new("forest", "Whispering Forest")
            .with_neighbors([RegionId::new("tavern")]);
        forest.desc = "Black pines crowd a path littered with pale mushrooms.".to_string();
        forest.geo_feature = "dense conifer forest".to_string();
        forest.risk_level = Some(3);

        runtime.map_graph().ingest_l2_graph(&[tavern, forest]).await?;
    }

    let state = runtime.cognition().get_player_state().await?;
    if state.is_empty() {
        runtime.initialize_player(&start, &[]).await?;
        runtime.world_state().register_region("forest", "Whispering Forest");
    }
    Ok(())
}

async fn current_location(runtime: &RuntimeEngine) -> Option<RegionId> {
    runtime
        .cognition()
        .get_player_state()
        .await
        .ok()?
        .get("location")
        .and_then(Value::as_str)
        .map(RegionId::new)
}

async fn map_view(runtime: &RuntimeEngine) -> String {
    let Some(location) = current_location(runtime).await else {
        return "No current location.".to_string();
    };
    match runtime.map_graph().get_node(&location).await {
        Ok(Some(node)) => format!(
            "🗺️ {} [{}]\n{}\n{}",
            node.name,
            location,
            node.desc,
            exits_view(runtime).await
        ),
        Ok(None) => format!("🗺️ {location} (no map data)"),
        Err(e) => format!("Map unavailable: {e}"),
    }
}

async fn exits_view(runtime: &RuntimeEngine) -> String {
    let Some(location) = current_location(runtime).await else {
        return "No current location.".to_string();
    };
    match runtime.map_graph().get_neighbors(&location).await {
        Ok(neighbors) if neighbors.is_empty() => "🚪 No exits.".to_string(),
        Ok(neighbors) => {
            let mut targets: Vec<String> = neighbors
                .keys()
                .filter_map(|field| field.split_once(':').map(|(_, t)| t.to_string()))
                .collect();
            targets.sort();
            format!("🚪 Exits: {}", targets.join(", "))
        }
        Err(e) => format!("Exits unavailable: {e}"),
    }
}
