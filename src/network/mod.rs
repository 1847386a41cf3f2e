//! Water network topology: junctions, pipeline segments, and the graph that
//! ties leak indicators to the segments they most likely belong to.

pub mod graph;
pub mod store;

pub use graph::{Association, WaterNetworkGraph};
pub use store::{GraphStore, InMemoryGraphStore};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ErrorKind;

/// Vertex label for junctions.
pub const JUNCTION_LABEL: &str = "junction";
/// Edge label for pipeline segments.
pub const PIPELINE_LABEL: &str = "pipeline";
/// Vertex label for linked leak indicators.
pub const LEAK_INDICATOR_LABEL: &str = "leak_indicator";
/// Edge label linking a leak indicator to its segment.
pub const INDICATES_DEFECT_LABEL: &str = "indicates_defect";

#[derive(Debug, Clone, Error)]
pub enum GraphError {
    #[error("graph store unreachable: {0}")]
    Unreachable(String),

    #[error("edge {edge} references missing vertex {vertex}")]
    MissingVertex { edge: String, vertex: String },

    #[error("segment {segment_id} rejected: {reason}")]
    InvalidSegment { segment_id: String, reason: String },

    #[error("duplicate {what} id {id}")]
    Duplicate { what: &'static str, id: String },

    #[error("unknown segment: {0}")]
    UnknownSegment(String),
}

impl GraphError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GraphError::Unreachable(_) => ErrorKind::GraphConnectivity,
            GraphError::MissingVertex { .. }
            | GraphError::InvalidSegment { .. }
            | GraphError::Duplicate { .. } => ErrorKind::TopologyIntegrity,
            GraphError::UnknownSegment(_) => ErrorKind::MissingInput,
        }
    }
}

/// A junction between pipeline segments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Junction {
    pub id: String,
    /// Same coordinate unit as indicator locations.
    pub location: (f64, f64),
    #[serde(default)]
    pub elevation_m: f64,
}

/// A physical pipe run between two junctions, as supplied by the asset feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSegment {
    pub segment_id: String,
    pub start_node: String,
    pub end_node: String,
    pub pipe_material: String,
    pub diameter_mm: f64,
    pub age_years: f64,
    pub length_meters: f64,
    /// Ordered polyline; may be empty when only the endpoints are known.
    #[serde(default)]
    pub coordinates: Vec<(f64, f64)>,
    #[serde(default)]
    pub historical_leaks: u32,
}

impl PipelineSegment {
    /// Check the record invariants before it enters the topology.
    pub fn validate(&self) -> Result<(), GraphError> {
        let reject = |reason: String| GraphError::InvalidSegment {
            segment_id: self.segment_id.clone(),
            reason,
        };
        if self.segment_id.is_empty() {
            return Err(reject("empty segment id".to_string()));
        }
        if self.start_node == self.end_node {
            return Err(reject(format!("start and end are both {}", self.start_node)));
        }
        if !(self.age_years.is_finite() && self.age_years >= 0.0) {
            return Err(reject(format!("age_years {} is not a non-negative number", self.age_years)));
        }
        if !(self.diameter_mm.is_finite() && self.length_meters.is_finite()) {
            return Err(reject("non-finite dimensions".to_string()));
        }
        if self
            .coordinates
            .iter()
            .any(|(a, b)| !a.is_finite() || !b.is_finite())
        {
            return Err(reject("non-finite polyline coordinate".to_string()));
        }
        Ok(())
    }
}
