//! Map graph payloads.
//!
//! The world map is an id-indexed table in the KV tier: nodes under
//! `rpg:map:node:<id>` and out-edges as hash fields `Travel:<target>`.
//! There are no in-memory pointers between nodes; edges are resolved by
//! id lookup only.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::RegionId;

/// Node granularity tag: macro regions come from world bootstrap,
/// dynamic sub-locations are synthesized during play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    L2,
    #[serde(rename = "L3_Dynamic")]
    L3Dynamic,
}

/// A persisted map node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionNode {
    pub node_id: RegionId,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub name: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub geo_feature: String,
    #[serde(default)]
    pub risk_level: Option<i32>,
    /// Back-reference for dynamic sub-locations; never an owning pointer.
    #[serde(default)]
    pub parent_id: Option<RegionId>,
    #[serde(default)]
    pub keyword: Option<String>,
    /// Hidden observation layers keyed by layer name, each with a `desc`
    /// and an `access_req` of tags/skills plus `logic` AND/OR.
    #[serde(default)]
    pub layers: Map<String, Value>,
}

impl RegionNode {
    pub fn new(node_id: impl Into<RegionId>, kind: NodeKind, name: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            kind,
            name: name.into(),
            desc: String::new(),
            geo_feature: String::new(),
            risk_level: None,
            parent_id: None,
            keyword: None,
            layers: Map::new(),
        }
    }

    pub fn with_desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = desc.into();
        self
    }

    pub fn with_geo_feature(mut self, geo_feature: impl Into<String>) -> Self {
        self.geo_feature = geo_feature.into();
        self
    }

    pub fn with_risk_level(mut self, risk: i32) -> Self {
        self.risk_level = Some(risk.clamp(1, 5));
        self
    }
}

/// Narrative description of the path between two regions, stored on the
/// edge in both directions with identical payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteConcept {
    pub route_name: String,
    #[serde(default)]
    pub geo_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_route_risk")]
    pub risk_level: i32,
    #[serde(default)]
    pub rumors: Vec<String>,
}

fn default_route_risk() -> i32 {
    1
}

impl RouteConcept {
    /// Sentinel concept stored when route synthesis fails, so the graph
    /// stays connected.
    pub fn error_fallback(reason: &str) -> Self {
        let mut truncated = reason.to_string();
        truncated.truncate(50);
        Self {
            route_name: "ERROR_FALLBACK".to_string(),
            geo_type: "unknown".to_string(),
            description: format!("Route synthesis failed: {truncated}"),
            risk_level: 99,
            rumors: Vec::new(),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.route_name == "ERROR_FALLBACK"
    }
}

/// Edge hash-field payload: `Travel:<target>` -> this, JSON-encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgePayload {
    pub target_id: RegionId,
    #[serde(rename = "type")]
    pub kind: String,
    pub route_info: RouteConcept,
}

impl EdgePayload {
    pub fn travel(target_id: impl Into<RegionId>, route_info: RouteConcept) -> Self {
        Self {
            target_id: target_id.into(),
            kind: "Travel".to_string(),
            route_info,
        }
    }
}

/// Bootstrap input for `ingest_l2_graph`: a region plus its neighbor ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionSeed {
    pub region_id: RegionId,
    pub name: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub geo_feature: String,
    #[serde(default)]
    pub risk_level: Option<i32>,
    #[serde(default)]
    pub neighbors: Vec<RegionId>,
    #[serde(default)]
    pub layers: Map<String, Value>,
}

impl RegionSeed {
    pub fn new(region_id: impl Into<RegionId>, name: impl Into<String>) -> Self {
        Self {
            region_id: region_id.into(),
            name: name.into(),
            desc: String::new(),
            geo_feature: String::new(),
            risk_level: None,
            neighbors: Vec::new(),
            layers: Map::new(),
        }
    }

    pub fn with_neighbors(mut self, neighbors: impl IntoIterator<Item = RegionId>) -> Self {
        self.neighbors = neighbors.into_iter().collect();
        self
    }

    /// Node payload persisted for this seed (neighbors excluded).
    pub fn into_node(self, kind: NodeKind) -> RegionNode {
        RegionNode {
            node_id: self.region_id,
            kind,
            name: self.name,
            desc: self.desc,
            geo_feature: self.geo_feature,
            risk_level: self.risk_level,
            parent_id: None,
            keyword: None,
            layers: self.layers,
        }
    }
}
