use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// String-backed identifiers.
///
/// Map nodes, NPCs, and quests use opaque human-readable ids (`tavern`,
/// `blacksmith_mira`) that double as KV key fragments, so ids wrap a
/// `String` rather than a `Uuid`. Generated ids still come from v4 UUIDs.
macro_rules! define_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_id!(SessionId);
define_id!(PlayerId);
define_id!(RegionId);
define_id!(NpcId);
define_id!(QuestId);
define_id!(EventId);

impl RegionId {
    /// Fresh id for a dynamically synthesized sub-location.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }
}

impl EventId {
    /// Fresh event id, `evt_` plus 12 hex chars.
    pub fn generate() -> Self {
        let hex = Uuid::new_v4().simple().to_string();
        Self(format!("evt_{}", &hex[..12]))
    }
}
