//! leakwatch -- defect-risk inference for buried water pipelines.
//!
//! This crate provides the signal detectors that turn aerial imagery into leak
//! indicators, the network graph that ties indicators to pipeline segments,
//! the fuzzy analyzer that scores each segment, and the pipeline that ranks
//! the network into an inspection worklist.

pub mod config;
pub mod detect;
pub mod error;
pub mod fuzzy;
pub mod network;
pub mod pipeline;
pub mod raster;

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::config::Calibration;
use crate::detect::Bands;
use crate::network::{InMemoryGraphStore, Junction, PipelineSegment, WaterNetworkGraph};
use crate::pipeline::RiskPipeline;

/// Everything one run needs: the network and one acquisition pass.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Scene {
    pub junctions: Vec<Junction>,
    pub segments: Vec<PipelineSegment>,
    pub bands: Bands,
}

impl Scene {
    /// Read a scene from a JSON file.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scene file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse scene file: {}", path.display()))
    }

    /// Build the network into an in-memory store and wire a pipeline around it.
    ///
    /// Returns the bands separately so the caller can hand them to a run.
    pub async fn into_pipeline(
        self,
        calibration: Calibration,
    ) -> Result<(RiskPipeline<InMemoryGraphStore>, Bands)> {
        let graph = WaterNetworkGraph::build(
            InMemoryGraphStore::new(),
            self.junctions,
            self.segments,
            calibration.network.clone(),
        )
        .await
        .context("failed to build water network")?;
        Ok((RiskPipeline::new(Arc::new(graph), Arc::new(calibration)), self.bands))
    }
}
