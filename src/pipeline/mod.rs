//! Risk pipeline: detectors, aggregation, association, inference, ranking.

pub mod report;

pub use report::{RiskReport, SegmentFailure};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Calibration;
use crate::detect::aggregate::{AggregatedIndicators, IndicatorAggregator};
use crate::detect::{Bands, IndicatorType, LeakIndicator};
use crate::error::ErrorKind;
use crate::fuzzy::{DefectProbability, FuzzyDefectAnalyzer};
use crate::network::{GraphError, GraphStore, PipelineSegment, WaterNetworkGraph};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("detector {detector} task aborted: {message}")]
    DetectorAborted {
        detector: IndicatorType,
        message: String,
    },
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Graph(e) => e.kind(),
            // A detector only aborts on input it could not digest.
            PipelineError::DetectorAborted { .. } => ErrorKind::MalformedInput,
        }
    }
}

/// Ranked segments plus the ones that could not be scored.
#[derive(Debug, Clone, Default)]
pub struct Prioritization {
    pub worklist: Vec<DefectProbability>,
    pub rejected: Vec<SegmentFailure>,
}

/// Orchestrates one calibration over one network.
pub struct RiskPipeline<S> {
    graph: Arc<WaterNetworkGraph<S>>,
    calibration: Arc<Calibration>,
}

impl<S> Clone for RiskPipeline<S> {
    fn clone(&self) -> Self {
        Self {
            graph: Arc::clone(&self.graph),
            calibration: Arc::clone(&self.calibration),
        }
    }
}

impl<S: GraphStore> RiskPipeline<S> {
    pub fn new(graph: Arc<WaterNetworkGraph<S>>, calibration: Arc<Calibration>) -> Self {
        info!(version = %calibration.version, segments = graph.segments().len(), "risk pipeline initialized");
        Self { graph, calibration }
    }

    pub fn graph(&self) -> &WaterNetworkGraph<S> {
        &self.graph
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    /// Run every applicable detector on the blocking pool and merge the results
    /// in detector order.
    pub async fn process_imagery(&self, bands: Bands) -> AggregatedIndicators {
        let applicable = bands.applicable();
        if applicable.is_empty() {
            debug!("no detector has its bands, imagery pass skipped");
            return AggregatedIndicators::default();
        }

        let bands = Arc::new(bands);
        let tasks = applicable.iter().map(|&kind| {
            let bands = Arc::clone(&bands);
            let calibration = Arc::clone(&self.calibration);
            tokio::task::spawn_blocking(move || kind.detect(&bands, &calibration))
        });
        let outcomes = join_all(tasks).await;

        let mut aggregator = IndicatorAggregator::new();
        for (kind, outcome) in applicable.into_iter().zip(outcomes) {
            match outcome {
                Ok(result) => aggregator.record(kind, result),
                Err(join) => {
                    let e = PipelineError::DetectorAborted {
                        detector: kind,
                        message: join.to_string(),
                    };
                    aggregator.record_failure(kind, e.kind(), e.to_string());
                }
            }
        }
        info!(total = aggregator.len(), failed = aggregator.failures().len(), "imagery processed");
        aggregator.finish()
    }

    /// Score one segment against the indicators attributed to it.
    pub fn analyze_segment(
        &self,
        segment: &PipelineSegment,
        indicators: &[LeakIndicator],
    ) -> DefectProbability {
        FuzzyDefectAnalyzer::new(&self.calibration).calculate_defect_probability(segment, indicators)
    }

    /// Score a known segment by id.
    pub fn assess(
        &self,
        segment_id: &str,
        indicators: &[LeakIndicator],
    ) -> Result<DefectProbability, PipelineError> {
        let segment = self
            .graph
            .segment(segment_id)
            .ok_or_else(|| GraphError::UnknownSegment(segment_id.to_string()))?;
        Ok(self.analyze_segment(segment, indicators))
    }

    /// Score `segments` with caller-supplied indicator subsets and rank them.
    ///
    /// Segments that fail validation are reported, not scored.
    pub fn prioritize(
        &self,
        segments: &[PipelineSegment],
        indicators_by_segment: &HashMap<String, Vec<LeakIndicator>>,
    ) -> Prioritization {
        let mut worklist = Vec::with_capacity(segments.len());
        let mut rejected = Vec::new();
        for s in segments {
            if let Err(e) = s.validate() {
                warn!(segment = %s.segment_id, error = %e, "segment rejected from ranking");
                rejected.push(SegmentFailure {
                    segment_id: s.segment_id.clone(),
                    kind: e.kind(),
                    message: e.to_string(),
                });
                continue;
            }
            let indicators = indicators_by_segment
                .get(&s.segment_id)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            worklist.push(self.analyze_segment(s, indicators));
        }
        rank(&mut worklist);
        Prioritization { worklist, rejected }
    }

    /// Full run: imagery, association with the network, inference, ranking.
    pub async fn run(&self, bands: Bands) -> RiskReport {
        let generated_at = Utc::now();
        let run_id = Uuid::new_v4();

        let aggregated = self.process_imagery(bands).await;
        let association = self.graph.associate_indicators(&aggregated.indicators).await;

        let mut worklist = Vec::with_capacity(self.graph.segments().len());
        let mut failed_segments = Vec::new();
        for segment in self.graph.segments() {
            if let Some(e) = association.failed.get(&segment.segment_id) {
                failed_segments.push(SegmentFailure {
                    segment_id: segment.segment_id.clone(),
                    kind: e.kind(),
                    message: e.to_string(),
                });
                continue;
            }
            let indicators: Vec<LeakIndicator> = association
                .indices_for(&segment.segment_id)
                .iter()
                .map(|&i| aggregated.indicators[i].clone())
                .collect();
            worklist.push(self.analyze_segment(segment, &indicators));
        }
        rank(&mut worklist);

        if !failed_segments.is_empty() {
            warn!(failed = failed_segments.len(), "some segments could not be scored");
        }
        info!(
            %run_id,
            scored = worklist.len(),
            indicators = aggregated.indicators.len(),
            "risk run complete"
        );

        RiskReport {
            run_id,
            calibration_version: self.calibration.version.clone(),
            generated_at,
            indicator_counts: aggregated.counts,
            indicators_total: aggregated.indicators.len(),
            unassociated_indicators: association.unassociated.len(),
            worklist,
            failed_segments,
            failed_detectors: aggregated.failures,
        }
    }

    /// Vulnerable segments using the calibration's thresholds.
    pub async fn vulnerable_segments(&self) -> Result<Vec<String>, PipelineError> {
        let p = &self.calibration.network;
        Ok(self
            .graph
            .find_vulnerable_segments(p.vulnerable_min_age_years, p.vulnerable_min_leaks)
            .await?)
    }

    /// Downstream junctions of `segment_id`, bounded by the calibration's hop limit.
    pub async fn downstream_of(&self, segment_id: &str) -> Result<Vec<String>, PipelineError> {
        Ok(self
            .graph
            .trace_downstream(segment_id, self.calibration.network.trace_max_hops)
            .await?)
    }
}

/// Descending by probability; equal probabilities keep their input order.
fn rank(worklist: &mut [DefectProbability]) {
    worklist.sort_by(|a, b| b.probability.total_cmp(&a.probability));
}
