//! Persistence-backed stores: the map graph, the event log, the world
//! state registries, and the session cognition store.

pub mod cognition;
pub mod event_log;
pub mod map_graph;
pub mod world_state;

pub use cognition::CognitionStore;
pub use event_log::{EventListener, EventLog};
pub use map_graph::MapGraph;
pub use world_state::WorldState;
