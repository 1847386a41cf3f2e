//! Graph store contract and the in-memory implementation.
//!
//! The production graph database is an external service; everything in this
//! crate talks to it through [`GraphStore`]. [`InMemoryGraphStore`] keeps
//! vertices and edges in concurrent maps and doubles as the test substitute.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::network::GraphError;

/// Property value stored on vertices and edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<PropertyValue>),
}

impl PropertyValue {
    /// Numeric view; integers widen to floats.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            PropertyValue::Float(f) => Some(*f),
            PropertyValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Float(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Int(v)
    }
}

impl From<u32> for PropertyValue {
    fn from(v: u32) -> Self {
        PropertyValue::Int(i64::from(v))
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::String(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::String(v)
    }
}

impl From<(f64, f64)> for PropertyValue {
    fn from((a, b): (f64, f64)) -> Self {
        PropertyValue::Array(vec![PropertyValue::Float(a), PropertyValue::Float(b)])
    }
}

pub type Properties = BTreeMap<String, PropertyValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    pub id: String,
    pub label: String,
    pub properties: Properties,
}

impl Vertex {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            properties: Properties::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }
}

/// Directed edge `from -> to`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub label: String,
    pub from: String,
    pub to: String,
    pub properties: Properties,
}

impl Edge {
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            from: from.into(),
            to: to.into(),
            properties: Properties::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

/// `property <op> value` filter for store queries.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub key: String,
    pub op: Comparison,
    pub value: PropertyValue,
}

impl Predicate {
    pub fn new(key: &str, op: Comparison, value: impl Into<PropertyValue>) -> Self {
        Self {
            key: key.to_string(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(key: &str, value: impl Into<PropertyValue>) -> Self {
        Self::new(key, Comparison::Eq, value)
    }

    pub fn gte(key: &str, value: impl Into<PropertyValue>) -> Self {
        Self::new(key, Comparison::Gte, value)
    }

    /// Missing properties never match. Numbers compare numerically; other
    /// values support equality only.
    pub fn matches(&self, properties: &Properties) -> bool {
        let Some(actual) = properties.get(&self.key) else {
            return false;
        };
        if let (Some(a), Some(b)) = (actual.as_float(), self.value.as_float()) {
            return match self.op {
                Comparison::Eq => a == b,
                Comparison::Gt => a > b,
                Comparison::Gte => a >= b,
                Comparison::Lt => a < b,
                Comparison::Lte => a <= b,
            };
        }
        self.op == Comparison::Eq && *actual == self.value
    }
}

/// Vertex/edge CRUD and traversal offered by the graph database.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Cheap liveness check.
    async fn ping(&self) -> Result<(), GraphError>;

    /// Insert or replace a vertex by id.
    async fn upsert_vertex(&self, vertex: Vertex) -> Result<(), GraphError>;

    /// Remove a vertex and its incident edges. Returns whether it existed.
    async fn remove_vertex(&self, id: &str) -> Result<bool, GraphError>;

    /// Insert or replace an edge by id. Both endpoints must already exist.
    async fn upsert_edge(&self, edge: Edge) -> Result<(), GraphError>;

    async fn get_vertex(&self, id: &str) -> Result<Option<Vertex>, GraphError>;

    /// Vertices with `label` satisfying every predicate, in insertion order.
    async fn query_vertices(
        &self,
        label: &str,
        predicates: &[Predicate],
    ) -> Result<Vec<Vertex>, GraphError>;

    /// Edges with `label` satisfying every predicate, in insertion order.
    async fn query_edges(&self, label: &str, predicates: &[Predicate])
        -> Result<Vec<Edge>, GraphError>;

    /// Vertex ids reachable from `start` over outgoing `edge_label` edges in
    /// at most `max_hops` steps, breadth-first, without repeats or `start`.
    async fn traverse_out(
        &self,
        start: &str,
        edge_label: &str,
        max_hops: usize,
    ) -> Result<Vec<String>, GraphError>;
}

/// Concurrent in-memory store.
#[derive(Debug)]
pub struct InMemoryGraphStore {
    vertices: DashMap<String, (u64, Vertex)>,
    edges: DashMap<String, (u64, Edge)>,
    /// vertex id -> ids of outgoing edges
    outgoing: DashMap<String, Vec<String>>,
    seq: AtomicU64,
    online: AtomicBool,
}

impl Default for InMemoryGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self {
            vertices: DashMap::new(),
            edges: DashMap::new(),
            outgoing: DashMap::new(),
            seq: AtomicU64::new(0),
            online: AtomicBool::new(true),
        }
    }

    /// Simulate losing (or regaining) the connection to the store.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    fn check_online(&self) -> Result<(), GraphError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(GraphError::Unreachable("in-memory store is offline".to_string()))
        }
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    fn detach_edge(&self, edge: &Edge) {
        if let Some(mut out) = self.outgoing.get_mut(&edge.from) {
            out.retain(|id| id != &edge.id);
        }
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn ping(&self) -> Result<(), GraphError> {
        self.check_online()
    }

    async fn upsert_vertex(&self, vertex: Vertex) -> Result<(), GraphError> {
        self.check_online()?;
        let seq = match self.vertices.get(&vertex.id) {
            Some(existing) => existing.0,
            None => self.next_seq(),
        };
        self.vertices.insert(vertex.id.clone(), (seq, vertex));
        Ok(())
    }

    async fn remove_vertex(&self, id: &str) -> Result<bool, GraphError> {
        self.check_online()?;
        if self.vertices.remove(id).is_none() {
            return Ok(false);
        }
        let incident: Vec<Edge> = self
            .edges
            .iter()
            .filter(|e| e.1.from == id || e.1.to == id)
            .map(|e| e.1.clone())
            .collect();
        for edge in incident {
            self.edges.remove(&edge.id);
            self.detach_edge(&edge);
        }
        self.outgoing.remove(id);
        Ok(true)
    }

    async fn upsert_edge(&self, edge: Edge) -> Result<(), GraphError> {
        self.check_online()?;
        for endpoint in [&edge.from, &edge.to] {
            if !self.vertices.contains_key(endpoint) {
                return Err(GraphError::MissingVertex {
                    edge: edge.id.clone(),
                    vertex: endpoint.clone(),
                });
            }
        }
        let seq = match self.edges.remove(&edge.id) {
            Some((_, (seq, old))) => {
                self.detach_edge(&old);
                seq
            }
            None => self.next_seq(),
        };
        self.outgoing
            .entry(edge.from.clone())
            .or_default()
            .push(edge.id.clone());
        self.edges.insert(edge.id.clone(), (seq, edge));
        Ok(())
    }

    async fn get_vertex(&self, id: &str) -> Result<Option<Vertex>, GraphError> {
        self.check_online()?;
        Ok(self.vertices.get(id).map(|v| v.1.clone()))
    }

    async fn query_vertices(
        &self,
        label: &str,
        predicates: &[Predicate],
    ) -> Result<Vec<Vertex>, GraphError> {
        self.check_online()?;
        let mut hits: Vec<(u64, Vertex)> = self
            .vertices
            .iter()
            .filter(|v| v.1.label == label && predicates.iter().all(|p| p.matches(&v.1.properties)))
            .map(|v| v.value().clone())
            .collect();
        hits.sort_by_key(|(seq, _)| *seq);
        Ok(hits.into_iter().map(|(_, v)| v).collect())
    }

    async fn query_edges(
        &self,
        label: &str,
        predicates: &[Predicate],
    ) -> Result<Vec<Edge>, GraphError> {
        self.check_online()?;
        let mut hits: Vec<(u64, Edge)> = self
            .edges
            .iter()
            .filter(|e| e.1.label == label && predicates.iter().all(|p| p.matches(&e.1.properties)))
            .map(|e| e.value().clone())
            .collect();
        hits.sort_by_key(|(seq, _)| *seq);
        Ok(hits.into_iter().map(|(_, e)| e).collect())
    }

    async fn traverse_out(
        &self,
        start: &str,
        edge_label: &str,
        max_hops: usize,
    ) -> Result<Vec<String>, GraphError> {
        self.check_online()?;
        let mut seen: HashSet<String> = HashSet::from([start.to_string()]);
        let mut reached = Vec::new();
        let mut frontier = VecDeque::from([(start.to_string(), 0usize)]);

        while let Some((vertex, depth)) = frontier.pop_front() {
            if depth == max_hops {
                continue;
            }
            let out_ids = match self.outgoing.get(&vertex) {
                Some(ids) => ids.clone(),
                None => continue,
            };
            for edge_id in out_ids {
                let Some(edge) = self.edges.get(&edge_id).map(|e| e.1.clone()) else {
                    continue;
                };
                if edge.label != edge_label {
                    continue;
                }
                if seen.insert(edge.to.clone()) {
                    reached.push(edge.to.clone());
                    frontier.push_back((edge.to, depth + 1));
                }
            }
        }
        Ok(reached)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::block_on;

    fn chain() -> InMemoryGraphStore {
        let store = InMemoryGraphStore::new();
        block_on(async {
            for id in ["a", "b", "c", "d"] {
                store.upsert_vertex(Vertex::new(id, "junction")).await.unwrap();
            }
            store.upsert_edge(Edge::new("ab", "pipeline", "a", "b")).await.unwrap();
            store.upsert_edge(Edge::new("bc", "pipeline", "b", "c")).await.unwrap();
            store.upsert_edge(Edge::new("cd", "pipeline", "c", "d")).await.unwrap();
            store.upsert_edge(Edge::new("ca", "pipeline", "c", "a")).await.unwrap();
        });
        store
    }

    #[test]
    fn test_edge_requires_both_endpoints() {
        let store = InMemoryGraphStore::new();
        block_on(async {
            store.upsert_vertex(Vertex::new("a", "junction")).await.unwrap();
            let err = store
                .upsert_edge(Edge::new("ax", "pipeline", "a", "x"))
                .await
                .unwrap_err();
            assert!(matches!(err, GraphError::MissingVertex { ref vertex, .. } if vertex == "x"));
            assert_eq!(store.edge_count(), 0);
        });
    }

    #[test]
    fn test_traverse_is_bounded_and_skips_cycles() {
        let store = chain();
        block_on(async {
            assert_eq!(store.traverse_out("a", "pipeline", 2).await.unwrap(), vec!["b", "c"]);
            assert_eq!(
                store.traverse_out("a", "pipeline", 10).await.unwrap(),
                vec!["b", "c", "d"]
            );
            assert!(store.traverse_out("d", "pipeline", 10).await.unwrap().is_empty());
            assert!(store.traverse_out("a", "pipeline", 0).await.unwrap().is_empty());
        });
    }

    #[test]
    fn test_predicates_compare_numerically() {
        let store = InMemoryGraphStore::new();
        block_on(async {
            store
                .upsert_vertex(Vertex::new("p", "pipe").with("age", 25.0).with("leaks", 2u32))
                .await
                .unwrap();
            store
                .upsert_vertex(Vertex::new("q", "pipe").with("age", 15.0).with("leaks", 5u32))
                .await
                .unwrap();
            let hits = store
                .query_vertices("pipe", &[Predicate::gte("age", 20.0), Predicate::gte("leaks", 2i64)])
                .await
                .unwrap();
            assert_eq!(hits.len(), 1);
            assert_eq!(hits[0].id, "p");
            let none = store
                .query_vertices("pipe", &[Predicate::eq("material", "steel")])
                .await
                .unwrap();
            assert!(none.is_empty());
        });
    }

    #[test]
    fn test_remove_vertex_drops_incident_edges() {
        let store = chain();
        block_on(async {
            assert!(store.remove_vertex("c").await.unwrap());
            assert_eq!(store.edge_count(), 1);
            assert_eq!(store.traverse_out("a", "pipeline", 10).await.unwrap(), vec!["b"]);
        });
    }

    #[test]
    fn test_offline_store_reports_connectivity() {
        let store = chain();
        store.set_online(false);
        let err = block_on(store.ping()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::GraphConnectivity);
        store.set_online(true);
        assert!(block_on(store.ping()).is_ok());
    }
}
