//! The water network as seen by the risk pipeline.
//!
//! Topology lives in the [`GraphStore`]; a local copy of segment geometry is
//! kept for the spatial join, which is pure computation. All writes go through
//! a single writer lock so an indicator batch is never half-linked.

use std::collections::{BTreeMap, HashMap, HashSet};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::NetworkParams;
use crate::detect::LeakIndicator;
use crate::network::store::{Edge, GraphStore, Predicate, PropertyValue, Vertex};
use crate::network::{
    GraphError, Junction, PipelineSegment, INDICATES_DEFECT_LABEL, JUNCTION_LABEL,
    LEAK_INDICATOR_LABEL, PIPELINE_LABEL,
};

/// Outcome of associating an indicator batch with the network.
#[derive(Debug, Default)]
pub struct Association {
    /// segment id -> indices into the indicator slice, in input order
    pub by_segment: HashMap<String, Vec<usize>>,
    /// Indicators beyond the association distance of every segment.
    pub unassociated: Vec<usize>,
    /// Segments whose link batch could not be written.
    pub failed: BTreeMap<String, GraphError>,
}

impl Association {
    pub fn indices_for(&self, segment_id: &str) -> &[usize] {
        self.by_segment
            .get(segment_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

pub struct WaterNetworkGraph<S> {
    store: S,
    params: NetworkParams,
    junctions: HashMap<String, Junction>,
    /// Segments in asset-feed order.
    segments: Vec<PipelineSegment>,
    segment_index: HashMap<String, usize>,
    writer: Mutex<()>,
}

impl<S: GraphStore> WaterNetworkGraph<S> {
    /// Write junctions and segments into `store` and keep the geometry locally.
    ///
    /// A segment that violates its invariants, repeats an id, or references a
    /// junction that does not exist is rejected and fails the build.
    pub async fn build(
        store: S,
        junctions: Vec<Junction>,
        segments: Vec<PipelineSegment>,
        params: NetworkParams,
    ) -> Result<Self, GraphError> {
        store.ping().await?;

        let mut junction_map = HashMap::with_capacity(junctions.len());
        for j in junctions {
            if junction_map.contains_key(&j.id) {
                return Err(GraphError::Duplicate {
                    what: "junction",
                    id: j.id,
                });
            }
            let vertex = Vertex::new(j.id.clone(), JUNCTION_LABEL)
                .with("junction_id", j.id.as_str())
                .with("location", j.location)
                .with("elevation_m", j.elevation_m);
            store.upsert_vertex(vertex).await?;
            junction_map.insert(j.id.clone(), j);
        }

        let mut segment_index = HashMap::with_capacity(segments.len());
        for (i, s) in segments.iter().enumerate() {
            s.validate()?;
            if segment_index.insert(s.segment_id.clone(), i).is_some() {
                return Err(GraphError::Duplicate {
                    what: "segment",
                    id: s.segment_id.clone(),
                });
            }
            store.upsert_edge(pipeline_edge(s)).await?;
        }

        info!(
            junctions = junction_map.len(),
            segments = segments.len(),
            "water network created"
        );

        Ok(Self {
            store,
            params,
            junctions: junction_map,
            segments,
            segment_index,
            writer: Mutex::new(()),
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn params(&self) -> &NetworkParams {
        &self.params
    }

    /// Segments in asset-feed order.
    pub fn segments(&self) -> &[PipelineSegment] {
        &self.segments
    }

    pub fn segment(&self, segment_id: &str) -> Option<&PipelineSegment> {
        self.segment_index.get(segment_id).map(|&i| &self.segments[i])
    }

    /// Nearest segment to `point` and the distance to it.
    ///
    /// Distance is measured to the segment polyline, or to the straight run
    /// between its junctions when the polyline has fewer than two points. Ties
    /// go to the earlier segment.
    pub fn nearest_segment(&self, point: (f64, f64)) -> Option<(&PipelineSegment, f64)> {
        let mut best: Option<(&PipelineSegment, f64)> = None;
        for s in &self.segments {
            let Some(d) = self.distance_to(s, point) else {
                continue;
            };
            if best.map_or(true, |(_, bd)| d < bd) {
                best = Some((s, d));
            }
        }
        best
    }

    fn distance_to(&self, segment: &PipelineSegment, point: (f64, f64)) -> Option<f64> {
        match segment.coordinates.as_slice() {
            [] | [_] => {
                let a = self.junctions.get(&segment.start_node)?.location;
                let b = self.junctions.get(&segment.end_node)?.location;
                Some(point_to_line(point, a, b))
            }
            line => line
                .windows(2)
                .map(|w| point_to_line(point, w[0], w[1]))
                .min_by(|a, b| a.total_cmp(b)),
        }
    }

    /// Associate every indicator with its nearest segment and record the links.
    ///
    /// Each segment's indicators are written as one batch under the writer
    /// lock. A failed batch is rolled back and reported in
    /// [`Association::failed`]; other segments are unaffected.
    pub async fn associate_indicators(&self, indicators: &[LeakIndicator]) -> Association {
        let mut association = Association::default();
        let mut distances: HashMap<usize, f64> = HashMap::new();

        for (i, indicator) in indicators.iter().enumerate() {
            match self.nearest_segment(indicator.location) {
                Some((segment, d))
                    if self.params.max_association_distance.map_or(true, |max| d <= max) =>
                {
                    association
                        .by_segment
                        .entry(segment.segment_id.clone())
                        .or_default()
                        .push(i);
                    distances.insert(i, d);
                }
                _ => association.unassociated.push(i),
            }
        }

        let _guard = self.writer.lock().await;
        for segment in &self.segments {
            let Some(batch) = association.by_segment.get(&segment.segment_id) else {
                continue;
            };
            if let Err(e) = self.link_batch(segment, batch, indicators, &distances).await {
                warn!(segment = %segment.segment_id, error = %e, "indicator link batch failed");
                association.failed.insert(segment.segment_id.clone(), e);
            }
        }
        for failed in association.failed.keys() {
            association.by_segment.remove(failed);
        }

        debug!(
            indicators = indicators.len(),
            segments = association.by_segment.len(),
            unassociated = association.unassociated.len(),
            failed = association.failed.len(),
            "indicator association complete"
        );
        association
    }

    async fn link_batch(
        &self,
        segment: &PipelineSegment,
        batch: &[usize],
        indicators: &[LeakIndicator],
        distances: &HashMap<usize, f64>,
    ) -> Result<(), GraphError> {
        let mut written = Vec::with_capacity(batch.len());
        let result = async {
            for &i in batch {
                let indicator = &indicators[i];
                let vertex_id = format!("leak-{}", Uuid::new_v4());
                self.store.upsert_vertex(indicator_vertex(&vertex_id, indicator)).await?;
                written.push(vertex_id.clone());

                let edge = Edge::new(
                    format!("{vertex_id}->{}", segment.segment_id),
                    INDICATES_DEFECT_LABEL,
                    vertex_id,
                    segment.start_node.clone(),
                )
                .with("segment_id", segment.segment_id.as_str())
                .with("distance", distances.get(&i).copied().unwrap_or(0.0));
                self.store.upsert_edge(edge).await?;
            }
            Ok::<(), GraphError>(())
        }
        .await;

        if result.is_err() {
            for id in &written {
                if let Err(e) = self.store.remove_vertex(id).await {
                    debug!(vertex = %id, error = %e, "rollback could not remove vertex");
                }
            }
        }
        result
    }

    /// Leak-indicator vertices linked to `segment_id`.
    pub async fn linked_indicators(&self, segment_id: &str) -> Result<Vec<Vertex>, GraphError> {
        let links = self
            .store
            .query_edges(INDICATES_DEFECT_LABEL, &[Predicate::eq("segment_id", segment_id)])
            .await?;
        let mut vertices = Vec::with_capacity(links.len());
        for link in links {
            if let Some(v) = self.store.get_vertex(&link.from).await? {
                vertices.push(v);
            }
        }
        Ok(vertices)
    }

    /// Segments at least `min_age` years old AND with at least `min_leaks`
    /// recorded leaks, in asset-feed order.
    pub async fn find_vulnerable_segments(
        &self,
        min_age: f64,
        min_leaks: u32,
    ) -> Result<Vec<String>, GraphError> {
        let edges = self
            .store
            .query_edges(
                PIPELINE_LABEL,
                &[
                    Predicate::gte("age_years", min_age),
                    Predicate::gte("historical_leaks", min_leaks),
                ],
            )
            .await?;
        let hits: HashSet<String> = edges
            .into_iter()
            .filter_map(|e| {
                e.properties
                    .get("segment_id")
                    .and_then(PropertyValue::as_str)
                    .map(str::to_string)
            })
            .collect();
        Ok(self
            .segments
            .iter()
            .filter(|s| hits.contains(&s.segment_id))
            .map(|s| s.segment_id.clone())
            .collect())
    }

    /// Junctions downstream of `segment_id` within `max_hops` pipeline edges,
    /// following flow direction from its end junction.
    pub async fn trace_downstream(
        &self,
        segment_id: &str,
        max_hops: usize,
    ) -> Result<Vec<String>, GraphError> {
        let segment = self
            .segment(segment_id)
            .ok_or_else(|| GraphError::UnknownSegment(segment_id.to_string()))?;
        let reached = self
            .store
            .traverse_out(&segment.end_node, PIPELINE_LABEL, max_hops)
            .await?;
        debug!(segment = %segment_id, hops = max_hops, reached = reached.len(), "downstream trace");
        Ok(reached)
    }
}

fn pipeline_edge(s: &PipelineSegment) -> Edge {
    let polyline = PropertyValue::Array(s.coordinates.iter().map(|&p| p.into()).collect());
    let mut edge = Edge::new(
        s.segment_id.clone(),
        PIPELINE_LABEL,
        s.start_node.clone(),
        s.end_node.clone(),
    )
    .with("segment_id", s.segment_id.as_str())
    .with("material", s.pipe_material.as_str())
    .with("diameter_mm", s.diameter_mm)
    .with("age_years", s.age_years)
    .with("length_m", s.length_meters)
    .with("historical_leaks", s.historical_leaks);
    edge.properties.insert("coordinates".to_string(), polyline);
    edge
}

fn indicator_vertex(id: &str, indicator: &LeakIndicator) -> Vertex {
    Vertex::new(id, LEAK_INDICATOR_LABEL)
        .with("indicator_id", id)
        .with("location", indicator.location)
        .with("type", indicator.indicator_type.to_string())
        .with("confidence", indicator.confidence)
        .with("severity", indicator.severity)
        .with("timestamp", indicator.timestamp.to_rfc3339())
        .with("image_source", indicator.image_source.as_str())
}

/// Euclidean distance from `p` to the closed segment `a`-`b`.
fn point_to_line(p: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let len_sq = dx * dx + dy * dy;
    let t = if len_sq == 0.0 {
        0.0
    } else {
        (((p.0 - a.0) * dx + (p.1 - a.1) * dy) / len_sq).clamp(0.0, 1.0)
    };
    let (cx, cy) = (a.0 + t * dx, a.1 + t * dy);
    ((p.0 - cx).powi(2) + (p.1 - cy).powi(2)).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::IndicatorType;
    use crate::error::ErrorKind;
    use crate::network::tests::segment;
    use crate::network::InMemoryGraphStore;
    use chrono::Utc;

    fn junction(id: &str, x: f64, y: f64) -> Junction {
        Junction {
            id: id.to_string(),
            location: (x, y),
            elevation_m: 0.0,
        }
    }

    fn indicator_at(location: (f64, f64)) -> LeakIndicator {
        LeakIndicator {
            location,
            indicator_type: IndicatorType::Thermal,
            confidence: 0.8,
            severity: 0.4,
            timestamp: Utc::now(),
            image_source: "thermal".to_string(),
            metadata: BTreeMap::new(),
        }
    }

    /// j1 -> j2 -> j3, plus a branch j2 -> j4; s1 has an explicit bent polyline.
    async fn network() -> WaterNetworkGraph<InMemoryGraphStore> {
        let junctions = vec![
            junction("j1", 0.0, 0.0),
            junction("j2", 0.0, 10.0),
            junction("j3", 0.0, 20.0),
            junction("j4", 10.0, 10.0),
        ];
        let mut s1 = segment("s1", "j1", "j2");
        s1.coordinates = vec![(0.0, 0.0), (5.0, 5.0), (0.0, 10.0)];
        s1.age_years = 35.0;
        s1.historical_leaks = 3;
        let mut s2 = segment("s2", "j2", "j3");
        s2.age_years = 35.0;
        s2.historical_leaks = 1;
        let mut s3 = segment("s3", "j2", "j4");
        s3.age_years = 10.0;
        s3.historical_leaks = 4;
        WaterNetworkGraph::build(
            InMemoryGraphStore::new(),
            junctions,
            vec![s1, s2, s3],
            NetworkParams::default(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_build_rejects_dangling_segment() {
        let result = WaterNetworkGraph::build(
            InMemoryGraphStore::new(),
            vec![junction("j1", 0.0, 0.0)],
            vec![segment("s1", "j1", "j9")],
            NetworkParams::default(),
        )
        .await;
        let err = result.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::TopologyIntegrity);
    }

    #[tokio::test]
    async fn test_build_fails_when_store_offline() {
        let store = InMemoryGraphStore::new();
        store.set_online(false);
        let err = WaterNetworkGraph::build(store, vec![], vec![], NetworkParams::default())
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::GraphConnectivity);
    }

    #[tokio::test]
    async fn test_nearest_segment_uses_polyline_then_junction_fallback() {
        let g = network().await;
        let (s, d) = g.nearest_segment((5.0, 5.5)).unwrap();
        assert_eq!(s.segment_id, "s1");
        assert!(d < 0.5);
        let (s, d) = g.nearest_segment((1.0, 15.0)).unwrap();
        assert_eq!(s.segment_id, "s2");
        assert!((d - 1.0).abs() < 1e-12);
        let (s, _) = g.nearest_segment((8.0, 11.0)).unwrap();
        assert_eq!(s.segment_id, "s3");
    }

    #[tokio::test]
    async fn test_association_links_indicators_per_segment() {
        let g = network().await;
        let indicators = vec![
            indicator_at((1.0, 15.0)),
            indicator_at((5.0, 5.5)),
            indicator_at((0.5, 18.0)),
        ];
        let assoc = g.associate_indicators(&indicators).await;
        assert_eq!(assoc.indices_for("s2"), &[0, 2]);
        assert_eq!(assoc.indices_for("s1"), &[1]);
        assert!(assoc.indices_for("s3").is_empty());
        assert!(assoc.failed.is_empty());

        let linked = g.linked_indicators("s2").await.unwrap();
        assert_eq!(linked.len(), 2);
        assert!(linked.iter().all(|v| v.label == LEAK_INDICATOR_LABEL));
    }

    #[tokio::test]
    async fn test_association_distance_limit() {
        let mut g = network().await;
        g.params.max_association_distance = Some(2.0);
        let assoc = g
            .associate_indicators(&[indicator_at((1.0, 15.0)), indicator_at((-50.0, 0.0))])
            .await;
        assert_eq!(assoc.indices_for("s2"), &[0]);
        assert_eq!(assoc.unassociated, vec![1]);
    }

    #[tokio::test]
    async fn test_offline_store_fails_batches_without_partial_links() {
        let g = network().await;
        g.store().set_online(false);
        let assoc = g.associate_indicators(&[indicator_at((1.0, 15.0))]).await;
        assert!(assoc.by_segment.is_empty());
        assert_eq!(assoc.failed["s2"].kind(), ErrorKind::GraphConnectivity);
        g.store().set_online(true);
        assert!(g.linked_indicators("s2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_vulnerability_requires_both_criteria() {
        let g = network().await;
        // s1: 35y/3 leaks, s2: 35y/1 leak, s3: 10y/4 leaks
        assert_eq!(g.find_vulnerable_segments(20.0, 2).await.unwrap(), vec!["s1"]);
        assert_eq!(
            g.find_vulnerable_segments(0.0, 0).await.unwrap(),
            vec!["s1", "s2", "s3"]
        );
        assert!(g.find_vulnerable_segments(40.0, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_downstream_trace() {
        let g = network().await;
        assert_eq!(g.trace_downstream("s1", 10).await.unwrap(), vec!["j3", "j4"]);
        // j3 has no outgoing pipelines
        assert!(g.trace_downstream("s2", 10).await.unwrap().is_empty());
        assert_eq!(
            g.trace_downstream("nope", 10).await.unwrap_err().kind(),
            ErrorKind::MissingInput
        );
    }
}
