//! Talespin domain model.
//!
//! Pure data types shared by the engine and the player front-end: ids,
//! the event model, world-state value types, the map graph payloads,
//! chat messages, and player-state helpers. No I/O and no async here.

pub mod error;
pub mod event;
pub mod ids;
pub mod map;
pub mod message;
pub mod player;
pub mod world;

pub use error::DomainError;
pub use event::{Event, EventPriority, EventType};
pub use ids::{EventId, NpcId, PlayerId, QuestId, RegionId, SessionId};
pub use map::{EdgePayload, NodeKind, RegionNode, RegionSeed, RouteConcept};
pub use message::{Message, Role};
pub use world::{
    CrisisLevel, NpcState, QuestState, QuestStatus, RegionState, WeatherType, WorldTime,
};
