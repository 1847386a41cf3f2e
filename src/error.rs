//! Error taxonomy shared by detectors, the network graph, and the pipeline.

use serde::{Deserialize, Serialize};

/// The kind of failure behind any error raised by this crate.
///
/// Every module-level error maps onto exactly one kind so that the pipeline
/// report never carries an unlabeled failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Absent band or record. Non-fatal: the consumer contributes nothing.
    MissingInput,
    /// Non-finite values or mismatched raster dimensions.
    MalformedInput,
    /// The graph store could not be reached.
    GraphConnectivity,
    /// An edge or segment that would leave the topology inconsistent.
    TopologyIntegrity,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::MissingInput => write!(f, "missing_input"),
            ErrorKind::MalformedInput => write!(f, "malformed_input"),
            ErrorKind::GraphConnectivity => write!(f, "graph_connectivity"),
            ErrorKind::TopologyIntegrity => write!(f, "topology_integrity"),
        }
    }
}
