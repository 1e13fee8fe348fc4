//! The region graph, persisted as id-indexed KV entries.
//!
//! Nodes live under `rpg:map:node:<id>` and out-edges as fields
//! `Travel:<target>` of the hash `rpg:map:edges:<id>`. Edges are always
//! written in pairs with identical route payloads; a duplicate ingest
//! skips existing edges, so re-running the bootstrap is idempotent.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use talespin_domain::{
    EdgePayload, NodeKind, RegionId, RegionNode, RegionSeed, RouteConcept,
};
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::error::EngineError;
use crate::infrastructure::ports::{KvStore, LlmPort};
use crate::infrastructure::response_text::clean_and_extract_json;
use crate::prompt_templates;

const KEY_PREFIX_NODE: &str = "rpg:map:node:";
const KEY_PREFIX_EDGE: &str = "rpg:map:edges:";

pub struct MapGraph {
    kv: Arc<dyn KvStore>,
    llm: Option<Arc<dyn LlmPort>>,
    ttl: u64,
    genre: String,
    tone: String,
    temperature: f32,
    map_gen_tokens: u32,
}

impl MapGraph {
    pub fn new(kv: Arc<dyn KvStore>, llm: Option<Arc<dyn LlmPort>>, config: &AppConfig) -> Self {
        Self {
            kv,
            llm,
            ttl: config.kv.ttl_secs,
            genre: config.genre.clone(),
            tone: config.tone.clone(),
            temperature: config.llm.temperature,
            map_gen_tokens: config.llm.stages.map_gen,
        }
    }

    fn node_key(node_id: &RegionId) -> String {
        format!("{KEY_PREFIX_NODE}{node_id}")
    }

    fn edge_key(node_id: &RegionId) -> String {
        format!("{KEY_PREFIX_EDGE}{node_id}")
    }

    // =========================================================================
    // Node CRUD
    // =========================================================================

    pub async fn save_node(&self, node: &RegionNode) -> Result<(), EngineError> {
        let payload = serde_json::to_string(node)?;
        self.kv
            .setex(&Self::node_key(&node.node_id), self.ttl, &payload)
            .await?;
        Ok(())
    }

    /// Fetch a node. A corrupt payload reads as absent.
    pub async fn get_node(&self, node_id: &RegionId) -> Result<Option<RegionNode>, EngineError> {
        let Some(raw) = self.kv.get(&Self::node_key(node_id)).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(node) => Ok(Some(node)),
            Err(e) => {
                warn!(node = %node_id, error = %e, "map node payload unreadable, treating as absent");
                Ok(None)
            }
        }
    }

    pub async fn node_exists(&self, node_id: &RegionId) -> Result<bool, EngineError> {
        Ok(self.kv.exists(&Self::node_key(node_id)).await?)
    }

    /// Raw out-edge hash: `"Travel:<target>" -> payload-json`, untouched
    /// for callers to parse.
    pub async fn get_neighbors(
        &self,
        node_id: &RegionId,
    ) -> Result<HashMap<String, String>, EngineError> {
        Ok(self.kv.hgetall(&Self::edge_key(node_id)).await?)
    }

    /// The route payload of the `Travel:<target>` edge out of `from`,
    /// if one exists.
    pub async fn get_travel_edge(
        &self,
        from: &RegionId,
        target: &RegionId,
    ) -> Result<Option<EdgePayload>, EngineError> {
        let field = format!("Travel:{target}");
        let Some(raw) = self.kv.hget(&Self::edge_key(from), &field).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(payload) => Ok(Some(payload)),
            Err(e) => {
                warn!(from = %from, target = %target, error = %e, "edge payload unreadable");
                Ok(None)
            }
        }
    }

    // =========================================================================
    // Edge writes
    // =========================================================================

    /// Write both halves of a bidirectional Travel edge with the same
    /// route concept. A later call overwrites the concept.
    pub async fn connect_nodes_with_concept(
        &self,
        from: &RegionId,
        to: &RegionId,
        route: &RouteConcept,
    ) -> Result<(), EngineError> {
        let forward = serde_json::to_string(&EdgePayload::travel(to.clone(), route.clone()))?;
        let backward = serde_json::to_string(&EdgePayload::travel(from.clone(), route.clone()))?;
        let key_from = Self::edge_key(from);
        let key_to = Self::edge_key(to);
        let field_forward = format!("Travel:{to}");
        let field_backward = format!("Travel:{from}");

        self.kv
            .hset_map(&key_from, &[(field_forward.clone(), forward)])
            .await?;
        if let Err(e) = self
            .kv
            .hset_map(&key_to, &[(field_backward, backward)])
            .await
        {
            // Half-written edge: roll the forward half back so the
            // idempotent ingest skip-check can complete it on replay.
            error!(from = %from, to = %to, error = %e, "edge pair half-written, rolling back");
            if let Err(rollback) = self.kv.hdel(&key_from, &field_forward).await {
                error!(from = %from, to = %to, error = %rollback, "edge rollback failed");
            }
            return Err(e.into());
        }
        self.kv.expire(&key_from, self.ttl).await?;
        self.kv.expire(&key_to, self.ttl).await?;
        Ok(())
    }

    // =========================================================================
    // L2 ingest
    // =========================================================================

    /// Materialize the bootstrap region list: persist every node, then
    /// synthesize a route concept for each neighbor pair that does not
    /// already have a `Travel` edge, writing both directions.
    pub async fn ingest_l2_graph(&self, regions: &[RegionSeed]) -> Result<(), EngineError> {
        info!(regions = regions.len(), "ingesting L2 region graph");

        for seed in regions {
            if seed.region_id.as_str().is_empty() {
                continue;
            }
            let node = seed.clone().into_node(NodeKind::L2);
            self.save_node(&node).await?;
        }

        for seed in regions {
            let from = &seed.region_id;
            if from.as_str().is_empty() {
                continue;
            }
            for to in &seed.neighbors {
                let field = format!("Travel:{to}");
                if self.kv.hexists(&Self::edge_key(from), &field).await? {
                    continue;
                }
                let route = self.generate_route_concept(from, to).await;
                self.connect_nodes_with_concept(from, to, &route).await?;
                info!(from = %from, to = %to, route = %route.route_name, "linked regions");
            }
        }
        Ok(())
    }

    /// LLM-assisted route synthesis. Every failure path degrades to the
    /// fallback concept so the graph stays connected.
    async fn generate_route_concept(&self, from: &RegionId, to: &RegionId) -> RouteConcept {
        let (node_a, node_b) = match (self.get_node(from).await, self.get_node(to).await) {
            (Ok(Some(a)), Ok(Some(b))) => (a, b),
            _ => return RouteConcept::error_fallback("endpoint node missing"),
        };
        let Some(llm) = &self.llm else {
            return RouteConcept::error_fallback("llm client unconfigured");
        };

        let prompt = prompt_templates::route_concept_prompt(&self.genre, &self.tone, &node_a, &node_b);
        let raw = match llm
            .complete(
                &[talespin_domain::Message::user(prompt)],
                self.temperature,
                self.map_gen_tokens,
            )
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!(from = %from, to = %to, error = %e, "route synthesis transport failure");
                return RouteConcept::error_fallback(&e.to_string());
            }
        };

        match clean_and_extract_json(&raw).map(serde_json::from_value::<RouteConcept>) {
            Some(Ok(route)) => route,
            _ => {
                warn!(from = %from, to = %to, "route synthesis returned no parseable JSON");
                RouteConcept::error_fallback("no JSON in response")
            }
        }
    }

    // =========================================================================
    // Dynamic sub-locations
    // =========================================================================

    /// Synthesize an L3 sub-location under `parent_id` from the player's
    /// keyword. Returns the new node id, or `None` when the parent or
    /// the LLM is missing or the response does not parse; nothing is
    /// persisted on the `None` paths before the node write.
    pub async fn create_dynamic_sub_location(
        &self,
        parent_id: &RegionId,
        keyword: &str,
    ) -> Result<Option<RegionId>, EngineError> {
        let Some(parent) = self.get_node(parent_id).await? else {
            warn!(parent = %parent_id, "dynamic sub-location: parent node missing");
            return Ok(None);
        };
        let Some(llm) = &self.llm else {
            warn!("dynamic sub-location: llm client unconfigured");
            return Ok(None);
        };

        let prompt = prompt_templates::sub_location_prompt(&parent, keyword);
        let raw = match llm
            .complete(
                &[talespin_domain::Message::user(prompt)],
                self.temperature,
                self.map_gen_tokens,
            )
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "dynamic sub-location generation failed");
                return Ok(None);
            }
        };
        let Some(info) = clean_and_extract_json(&raw) else {
            warn!("dynamic sub-location response had no parseable JSON");
            return Ok(None);
        };

        let risk = info
            .get("risk_level")
            .and_then(Value::as_i64)
            .unwrap_or(1)
            .clamp(1, 5) as i32;

        let new_id = RegionId::generate();
        let mut node = RegionNode::new(
            new_id.clone(),
            NodeKind::L3Dynamic,
            info.get("name")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("{keyword} site")),
        )
        .with_desc(
            info.get("desc")
                .and_then(Value::as_str)
                .unwrap_or_default(),
        )
        .with_geo_feature(
            info.get("geo_feature")
                .and_then(Value::as_str)
                .unwrap_or("unknown"),
        )
        .with_risk_level(risk);
        node.parent_id = Some(parent_id.clone());
        node.keyword = Some(keyword.to_string());

        self.save_node(&node).await?;

        let route = RouteConcept {
            route_name: info
                .get("connection_path_name")
                .and_then(Value::as_str)
                .unwrap_or("Unmarked Path")
                .to_string(),
            geo_type: node.geo_feature.clone(),
            description: "Generated path linking parent location to dynamic sub-location."
                .to_string(),
            risk_level: risk,
            rumors: Vec::new(),
        };
        self.connect_nodes_with_concept(parent_id, &new_id, &route)
            .await?;

        Ok(Some(new_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::memory_kv::MemoryKv;

    fn graph() -> MapGraph {
        MapGraph::new(Arc::new(MemoryKv::new()), None, &AppConfig::default())
    }

    fn seed_pair() -> Vec<RegionSeed> {
        vec![
            RegionSeed::new("tavern", "The Rusty Flagon")
                .with_neighbors([RegionId::new("forest")]),
            RegionSeed::new("forest", "Whispering Forest")
                .with_neighbors([RegionId::new("tavern")]),
        ]
    }

    #[tokio::test]
    async fn save_and_get_node() {
        let graph = graph();
        let node = RegionNode::new("tavern", NodeKind::L2, "The Rusty Flagon")
            .with_desc("Low beams, stale beer.");
        graph.save_node(&node).await.expect("save");
        let loaded = graph
            .get_node(&RegionId::new("tavern"))
            .await
            .expect("get")
            .expect("present");
        assert_eq!(loaded.name, "The Rusty Flagon");
        assert!(graph.node_exists(&RegionId::new("tavern")).await.expect("exists"));
    }

    #[tokio::test]
    async fn ingest_without_llm_links_with_fallback() {
        let graph = graph();
        graph.ingest_l2_graph(&seed_pair()).await.expect("ingest");

        let forward = graph
            .get_travel_edge(&RegionId::new("tavern"), &RegionId::new("forest"))
            .await
            .expect("edge")
            .expect("present");
        let backward = graph
            .get_travel_edge(&RegionId::new("forest"), &RegionId::new("tavern"))
            .await
            .expect("edge")
            .expect("present");
        assert!(forward.route_info.is_fallback());
        assert_eq!(forward.route_info, backward.route_info);
        assert_eq!(forward.route_info.risk_level, 99);
    }

    #[tokio::test]
    async fn ingest_with_llm_stores_synthesized_route() {
        use crate::infrastructure::ports::MockLlmPort;

        let mut llm = MockLlmPort::new();
        llm.expect_complete().returning(|_, _, _| {
            Ok(r#"{"route_name": "Muddy Path", "geo_type": "trail", "description": "A rutted track", "risk_level": 2, "rumors": []}"#.to_string())
        });
        let graph = MapGraph::new(
            Arc::new(MemoryKv::new()),
            Some(Arc::new(llm)),
            &AppConfig::default(),
        );

        graph.ingest_l2_graph(&seed_pair()).await.expect("ingest");
        let edge = graph
            .get_travel_edge(&RegionId::new("tavern"), &RegionId::new("forest"))
            .await
            .expect("edge")
            .expect("present");
        assert_eq!(edge.route_info.route_name, "Muddy Path");
        assert_eq!(edge.route_info.risk_level, 2);
    }

    #[tokio::test]
    async fn ingest_is_idempotent() {
        let graph = graph();
        graph.ingest_l2_graph(&seed_pair()).await.expect("first");
        graph.ingest_l2_graph(&seed_pair()).await.expect("second");

        let neighbors = graph
            .get_neighbors(&RegionId::new("tavern"))
            .await
            .expect("neighbors");
        assert_eq!(neighbors.len(), 1);
        assert!(neighbors.contains_key("Travel:forest"));
    }

    #[tokio::test]
    async fn explicit_connect_overwrites_concept() {
        let graph = graph();
        graph.ingest_l2_graph(&seed_pair()).await.expect("ingest");
        let route = RouteConcept {
            route_name: "Muddy Path".into(),
            geo_type: "trail".into(),
            description: "A rutted track".into(),
            risk_level: 2,
            rumors: vec![],
        };
        graph
            .connect_nodes_with_concept(&RegionId::new("tavern"), &RegionId::new("forest"), &route)
            .await
            .expect("connect");
        let edge = graph
            .get_travel_edge(&RegionId::new("tavern"), &RegionId::new("forest"))
            .await
            .expect("edge")
            .expect("present");
        assert_eq!(edge.route_info.route_name, "Muddy Path");
    }

    #[tokio::test]
    async fn dynamic_sub_location_without_llm_is_none() {
        let graph = graph();
        graph.ingest_l2_graph(&seed_pair()).await.expect("ingest");
        let result = graph
            .create_dynamic_sub_location(&RegionId::new("tavern"), "cellar")
            .await
            .expect("call");
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn dynamic_sub_location_missing_parent_is_none() {
        let graph = graph();
        let result = graph
            .create_dynamic_sub_location(&RegionId::new("nowhere"), "cellar")
            .await
            .expect("call");
        assert!(result.is_none());
    }
}
