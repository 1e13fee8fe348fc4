//! Plugin host: lifecycle, hook dispatch, and the command/tool
//! registries.
//!
//! A plugin is a trait object with default no-op hooks; the host calls
//! whatever a plugin chose to override. There is no dynamic loading
//! here - plugins are registered as values and gated by the lifecycle
//! state machine `UNLOADED -> LOADING -> LOADED -> UNLOADING ->
//! UNLOADED | ERROR`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginLifecycle {
    Unloaded,
    Loading,
    Loaded,
    Unloading,
    Error,
}

/// A command a plugin contributes to the turn dispatcher.
#[derive(Clone)]
pub struct PluginCommand {
    pub name: String,
    pub description: String,
    pub aliases: Vec<String>,
    /// Receives the input after the command token; returns the reply.
    pub handler: Arc<dyn Fn(&str) -> String + Send + Sync>,
}

impl PluginCommand {
    pub fn matches(&self, token: &str) -> bool {
        self.name == token || self.aliases.iter().any(|a| a == token)
    }
}

/// A tool a plugin exposes to the LLM tool-call protocol.
#[derive(Clone)]
pub struct LlmTool {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub handler: Arc<dyn Fn(&Value) -> Value + Send + Sync>,
}

/// The hook surface. Every method has a no-op default; a plugin
/// overrides the ones it cares about. Hooks receive narrow context
/// values rather than an engine handle.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str {
        "0.1.0"
    }

    fn description(&self) -> &str {
        ""
    }

    /// Lifecycle: called when the host loads the plugin.
    fn on_load(&self) -> Result<(), EngineError> {
        Ok(())
    }

    /// Lifecycle: called when the host unloads the plugin.
    fn on_unload(&self) -> Result<(), EngineError> {
        Ok(())
    }

    fn on_player_created(&self, _player_id: &str, _location: &str) {}

    fn on_player_moved(&self, _player_id: &str, _from: &str, _to: &str) {}

    fn on_turn_start(&self, _turn: u64) {}

    fn on_turn_end(&self, _turn: u64) {}

    /// Return `Some(reply)` to short-circuit the turn before dispatch.
    fn on_before_action(&self, _input: &str, _state: &Map<String, Value>) -> Option<String> {
        None
    }

    /// Return `Some(rewritten)` to replace the outgoing response.
    fn on_after_action(&self, _input: &str, _response: &str) -> Option<String> {
        None
    }

    fn on_narration_generated(&self, _narrative: &str, _context: &Map<String, Value>) {}

    /// Decorate the save snapshot; return it (modified or not).
    fn on_save(&self, snapshot: Value) -> Value {
        snapshot
    }

    /// Restore plugin data from a loaded snapshot. (The lifecycle
    /// method above keeps the `on_load` name; this is the hook.)
    fn plugin_load_hook(&self, _snapshot: &Value) {}

    fn on_world_generated(&self) {}

    fn on_location_entered(&self, _location: &str) {}

    fn on_location_exited(&self, _location: &str) {}

    fn commands(&self) -> Vec<PluginCommand> {
        Vec::new()
    }

    fn tools(&self) -> Vec<LlmTool> {
        Vec::new()
    }
}

/// Plugin-scoped sub-map inside the player state hash.
pub fn get_plugin_state<'a>(
    player_state: &'a Map<String, Value>,
    plugin_name: &str,
) -> Option<&'a Map<String, Value>> {
    player_state
        .get(&format!("plugin_{plugin_name}"))
        .and_then(Value::as_object)
}

pub fn set_plugin_state(
    player_state: &mut Map<String, Value>,
    plugin_name: &str,
    state: Map<String, Value>,
) {
    player_state.insert(format!("plugin_{plugin_name}"), Value::Object(state));
}

struct Registered {
    plugin: Arc<dyn Plugin>,
    lifecycle: PluginLifecycle,
}

pub struct PluginHost {
    plugins: Mutex<HashMap<String, Registered>>,
    enabled: Mutex<Vec<String>>,
}

impl PluginHost {
    pub fn new() -> Self {
        Self {
            plugins: Mutex::new(HashMap::new()),
            enabled: Mutex::new(Vec::new()),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Register without loading. Duplicate names are rejected.
    pub fn register(&self, plugin: Arc<dyn Plugin>) -> Result<(), EngineError> {
        let name = plugin.name().to_string();
        let mut plugins = self.plugins.lock().unwrap_or_else(|e| e.into_inner());
        if plugins.contains_key(&name) {
            return Err(EngineError::invariant(format!(
                "plugin '{name}' already registered"
            )));
        }
        plugins.insert(
            name,
            Registered {
                plugin,
                lifecycle: PluginLifecycle::Unloaded,
            },
        );
        Ok(())
    }

    /// Load a registered plugin. A failing `on_load` marks ERROR and
    /// leaves the enabled set unchanged.
    pub fn load(&self, name: &str) -> bool {
        let plugin = {
            let mut plugins = self.plugins.lock().unwrap_or_else(|e| e.into_inner());
            let Some(registered) = plugins.get_mut(name) else {
                warn!(plugin = name, "load of unknown plugin");
                return false;
            };
            if registered.lifecycle == PluginLifecycle::Loaded {
                return true;
            }
            registered.lifecycle = PluginLifecycle::Loading;
            registered.plugin.clone()
        };

        match plugin.on_load() {
            Ok(()) => {
                let mut plugins = self.plugins.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(registered) = plugins.get_mut(name) {
                    registered.lifecycle = PluginLifecycle::Loaded;
                }
                self.enabled
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(name.to_string());
                info!(plugin = name, version = plugin.version(), "plugin loaded");
                true
            }
            Err(e) => {
                let mut plugins = self.plugins.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(registered) = plugins.get_mut(name) {
                    registered.lifecycle = PluginLifecycle::Error;
                }
                warn!(plugin = name, error = %e, "plugin load failed");
                false
            }
        }
    }

    pub fn load_all(&self) {
        let names: Vec<String> = {
            let plugins = self.plugins.lock().unwrap_or_else(|e| e.into_inner());
            plugins.keys().cloned().collect()
        };
        for name in names {
            self.load(&name);
        }
    }

    pub fn unload(&self, name: &str) -> bool {
        let plugin = {
            let mut plugins = self.plugins.lock().unwrap_or_else(|e| e.into_inner());
            let Some(registered) = plugins.get_mut(name) else {
                return false;
            };
            if registered.lifecycle != PluginLifecycle::Loaded {
                return false;
            }
            registered.lifecycle = PluginLifecycle::Unloading;
            registered.plugin.clone()
        };

        let outcome = plugin.on_unload();
        let mut plugins = self.plugins.lock().unwrap_or_else(|e| e.into_inner());
        match outcome {
            Ok(()) => {
                if let Some(registered) = plugins.get_mut(name) {
                    registered.lifecycle = PluginLifecycle::Unloaded;
                }
                self.enabled
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .retain(|n| n != name);
                true
            }
            Err(e) => {
                if let Some(registered) = plugins.get_mut(name) {
                    registered.lifecycle = PluginLifecycle::Error;
                }
                warn!(plugin = name, error = %e, "plugin unload failed");
                false
            }
        }
    }

    pub fn lifecycle(&self, name: &str) -> Option<PluginLifecycle> {
        self.plugins
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .map(|r| r.lifecycle)
    }

    /// Enabled plugins in enable order.
    fn enabled_plugins(&self) -> Vec<Arc<dyn Plugin>> {
        let enabled = self.enabled.lock().unwrap_or_else(|e| e.into_inner());
        let plugins = self.plugins.lock().unwrap_or_else(|e| e.into_inner());
        enabled
            .iter()
            .filter_map(|name| plugins.get(name))
            .filter(|r| r.lifecycle == PluginLifecycle::Loaded)
            .map(|r| r.plugin.clone())
            .collect()
    }

    // =========================================================================
    // Hook dispatch
    // =========================================================================

    /// Broadcast a hook to every enabled plugin, collecting returns.
    pub fn broadcast<R>(&self, hook: impl Fn(&dyn Plugin) -> R) -> Vec<R> {
        self.enabled_plugins()
            .iter()
            .map(|plugin| hook(plugin.as_ref()))
            .collect()
    }

    /// Broadcast in enable order, returning the first `Some`.
    pub fn first_non_empty<R>(&self, hook: impl Fn(&dyn Plugin) -> Option<R>) -> Option<R> {
        self.enabled_plugins()
            .iter()
            .find_map(|plugin| hook(plugin.as_ref()))
    }

    /// Thread the save snapshot through every plugin's `on_save`.
    pub fn decorate_save(&self, snapshot: Value) -> Value {
        self.enabled_plugins()
            .iter()
            .fold(snapshot, |acc, plugin| plugin.on_save(acc))
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Resolve a command token; duplicates resolve to the
    /// first-enabled plugin's handler.
    pub fn find_command(&self, token: &str) -> Option<PluginCommand> {
        self.enabled_plugins()
            .iter()
            .flat_map(|plugin| plugin.commands())
            .find(|command| command.matches(token))
    }

    /// Summary of every command from enabled plugins, first wins.
    pub fn command_summary(&self) -> Map<String, Value> {
        let mut summary = Map::new();
        for plugin in self.enabled_plugins() {
            for command in plugin.commands() {
                if !summary.contains_key(&command.name) {
                    summary.insert(
                        command.name.clone(),
                        json!({
                            "description": command.description,
                            "plugin": plugin.name(),
                            "aliases": command.aliases,
                        }),
                    );
                }
            }
        }
        summary
    }

    // =========================================================================
    // LLM tools
    // =========================================================================

    /// Run raw model output through the tool-call protocol: if it holds
    /// a `{thought, tool_name, arguments}` object, execute the matching
    /// tool; otherwise the output is free text and `None` comes back.
    pub fn dispatch_tool_output(&self, raw: &str) -> Option<Value> {
        let call = crate::infrastructure::response_text::parse_tool_call(raw)?;
        self.execute_tool(&call.tool_name, &call.arguments)
    }

    pub fn execute_tool(&self, tool_name: &str, parameters: &Value) -> Option<Value> {
        for plugin in self.enabled_plugins() {
            if let Some(tool) = plugin.tools().into_iter().find(|t| t.name == tool_name) {
                return Some((tool.handler)(parameters));
            }
        }
        None
    }

    pub fn tool_summary(&self) -> Vec<Value> {
        let mut tools = Vec::new();
        for plugin in self.enabled_plugins() {
            for tool in plugin.tools() {
                tools.push(json!({
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.parameters,
                    "plugin": plugin.name(),
                }));
            }
        }
        tools
    }

    /// Name/version/state listing for the `/plugins` command.
    pub fn plugin_summary(&self) -> Vec<Value> {
        let plugins = self.plugins.lock().unwrap_or_else(|e| e.into_inner());
        let mut entries: Vec<Value> = plugins
            .values()
            .map(|r| {
                json!({
                    "name": r.plugin.name(),
                    "version": r.plugin.version(),
                    "description": r.plugin.description(),
                    "state": format!("{:?}", r.lifecycle),
                })
            })
            .collect();
        entries.sort_by_key(|v| v["name"].as_str().unwrap_or_default().to_string());
        entries
    }
}

impl Default for PluginHost {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct EchoPlugin {
        name: String,
        short_circuit: bool,
        turns: AtomicU64,
    }

    impl EchoPlugin {
        fn new(name: &str, short_circuit: bool) -> Self {
            Self {
                name: name.to_string(),
                short_circuit,
                turns: AtomicU64::new(0),
            }
        }
    }

    impl Plugin for EchoPlugin {
        fn name(&self) -> &str {
            &self.name
        }

        fn on_turn_start(&self, _turn: u64) {
            self.turns.fetch_add(1, Ordering::SeqCst);
        }

        fn on_before_action(&self, input: &str, _state: &Map<String, Value>) -> Option<String> {
            if self.short_circuit && input == "stop" {
                Some(format!("{} intercepted", self.name))
            } else {
                None
            }
        }

        fn commands(&self) -> Vec<PluginCommand> {
            let name = self.name.clone();
            vec![PluginCommand {
                name: "/echo".to_string(),
                description: "echo back".to_string(),
                aliases: vec!["/e".to_string()],
                handler: Arc::new(move |args| format!("{name}: {args}")),
            }]
        }

        fn tools(&self) -> Vec<LlmTool> {
            vec![LlmTool {
                name: "shout".to_string(),
                description: "uppercase".to_string(),
                parameters: json!({"type": "object"}),
                handler: Arc::new(|params| {
                    json!({
                        "result": params["text"].as_str().unwrap_or_default().to_uppercase()
                    })
                }),
            }]
        }
    }

    struct FailingPlugin;

    impl Plugin for FailingPlugin {
        fn name(&self) -> &str {
            "failing"
        }

        fn on_load(&self) -> Result<(), EngineError> {
            Err(EngineError::invariant("refuses to load"))
        }
    }

    #[test]
    fn register_rejects_duplicates() {
        let host = PluginHost::new();
        host.register(Arc::new(EchoPlugin::new("echo", false))).expect("register");
        assert!(host.register(Arc::new(EchoPlugin::new("echo", false))).is_err());
    }

    #[test]
    fn lifecycle_transitions() {
        let host = PluginHost::new();
        host.register(Arc::new(EchoPlugin::new("echo", false))).expect("register");
        assert_eq!(host.lifecycle("echo"), Some(PluginLifecycle::Unloaded));
        assert!(host.load("echo"));
        assert_eq!(host.lifecycle("echo"), Some(PluginLifecycle::Loaded));
        assert!(host.unload("echo"));
        assert_eq!(host.lifecycle("echo"), Some(PluginLifecycle::Unloaded));
        assert!(!host.unload("echo"));
    }

    #[test]
    fn failing_load_marks_error_and_stays_disabled() {
        let host = PluginHost::new();
        host.register(Arc::new(FailingPlugin)).expect("register");
        assert!(!host.load("failing"));
        assert_eq!(host.lifecycle("failing"), Some(PluginLifecycle::Error));
        assert!(host.broadcast(|_| ()).is_empty());
    }

    #[test]
    fn broadcast_reaches_all_enabled() {
        let host = PluginHost::new();
        let a = Arc::new(EchoPlugin::new("a", false));
        let b = Arc::new(EchoPlugin::new("b", false));
        host.register(a.clone()).expect("register");
        host.register(b.clone()).expect("register");
        host.load("a");
        host.load("b");

        host.broadcast(|plugin| plugin.on_turn_start(1));
        assert_eq!(a.turns.load(Ordering::SeqCst), 1);
        assert_eq!(b.turns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn first_non_empty_respects_enable_order() {
        let host = PluginHost::new();
        host.register(Arc::new(EchoPlugin::new("first", true))).expect("register");
        host.register(Arc::new(EchoPlugin::new("second", true))).expect("register");
        host.load("first");
        host.load("second");

        let result = host.first_non_empty(|plugin| plugin.on_before_action("stop", &Map::new()));
        assert_eq!(result, Some("first intercepted".to_string()));

        let none = host.first_non_empty(|plugin| plugin.on_before_action("go", &Map::new()));
        assert_eq!(none, None);
    }

    #[test]
    fn command_resolution_first_enabled_wins() {
        let host = PluginHost::new();
        host.register(Arc::new(EchoPlugin::new("one", false))).expect("register");
        host.register(Arc::new(EchoPlugin::new("two", false))).expect("register");
        host.load("one");
        host.load("two");

        let command = host.find_command("/echo").expect("command");
        assert_eq!((command.handler)("hi"), "one: hi");
        let by_alias = host.find_command("/e").expect("alias");
        assert_eq!((by_alias.handler)("hi"), "one: hi");
        assert!(host.find_command("/missing").is_none());
    }

    #[test]
    fn tool_execution() {
        let host = PluginHost::new();
        host.register(Arc::new(EchoPlugin::new("echo", false))).expect("register");
        host.load("echo");

        let result = host
            .execute_tool("shout", &json!({"text": "hello"}))
            .expect("tool");
        assert_eq!(result["result"], "HELLO");
        assert!(host.execute_tool("missing", &json!({})).is_none());
    }

    #[test]
    fn tool_output_protocol_round_trip() {
        let host = PluginHost::new();
        host.register(Arc::new(EchoPlugin::new("echo", false))).expect("register");
        host.load("echo");

        let raw = r#"Considering the map... {"thought": "loud", "tool_name": "shout", "arguments": {"text": "hi"}} done."#;
        let result = host.dispatch_tool_output(raw).expect("tool call");
        assert_eq!(result["result"], "HI");

        // Free text stays free text.
        assert!(host.dispatch_tool_output("The corridor is silent.").is_none());
    }

    #[test]
    fn save_decoration_threads_through() {
        struct Decorator;
        impl Plugin for Decorator {
            fn name(&self) -> &str {
                "decorator"
            }
            fn on_save(&self, mut snapshot: Value) -> Value {
                if let Some(obj) = snapshot.as_object_mut() {
                    obj.insert("decorated".into(), json!(true));
                }
                snapshot
            }
        }
        let host = PluginHost::new();
        host.register(Arc::new(Decorator)).expect("register");
        host.load("decorator");
        let snapshot = host.decorate_save(json!({"turn": 3}));
        assert_eq!(snapshot["decorated"], json!(true));
        assert_eq!(snapshot["turn"], json!(3));
    }

    #[test]
    fn plugin_state_helpers() {
        let mut state = Map::new();
        let mut plugin_data = Map::new();
        plugin_data.insert("mana".into(), json!(50));
        set_plugin_state(&mut state, "arcana", plugin_data);
        let read = get_plugin_state(&state, "arcana").expect("state");
        assert_eq!(read.get("mana"), Some(&json!(50)));
        assert!(get_plugin_state(&state, "other").is_none());
    }
}
