//! The result of one end-to-end run.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::detect::aggregate::DetectorFailure;
use crate::detect::IndicatorType;
use crate::error::ErrorKind;
use crate::fuzzy::DefectProbability;

/// A segment that could not be scored in this run.
#[derive(Debug, Clone, Serialize)]
pub struct SegmentFailure {
    pub segment_id: String,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskReport {
    pub run_id: Uuid,
    pub calibration_version: String,
    pub generated_at: DateTime<Utc>,
    pub indicator_counts: BTreeMap<IndicatorType, usize>,
    pub indicators_total: usize,
    /// Indicators farther than the association distance from every segment.
    pub unassociated_indicators: usize,
    /// Scored segments, most probable defect first.
    pub worklist: Vec<DefectProbability>,
    pub failed_segments: Vec<SegmentFailure>,
    pub failed_detectors: Vec<DetectorFailure>,
}

impl RiskReport {
    /// Whether every detector and every segment completed.
    pub fn is_complete(&self) -> bool {
        self.failed_segments.is_empty() && self.failed_detectors.is_empty()
    }

    pub fn entry(&self, segment_id: &str) -> Option<&DefectProbability> {
        self.worklist.iter().find(|p| p.segment_id == segment_id)
    }

    /// Plain-text rendering for terminals.
    pub fn to_table(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "Risk report {} (calibration {}, {})\n",
            self.run_id,
            self.calibration_version,
            self.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        let counts: Vec<String> = self
            .indicator_counts
            .iter()
            .map(|(kind, n)| format!("{kind}={n}"))
            .collect();
        out.push_str(&format!(
            "Indicators: {} [{}], unassociated {}\n\n",
            self.indicators_total,
            counts.join(", "),
            self.unassociated_indicators
        ));

        out.push_str(&format!(
            "{:<16} | {:>11} | {:<8} | {:>10} | Action\n",
            "Segment", "Probability", "Urgency", "Indicators"
        ));
        out.push_str(&format!("{:-<16}-|-{:-<11}-|-{:-<8}-|-{:-<10}-|-{:-<40}\n", "", "", "", "", ""));
        for p in &self.worklist {
            let indicators = p.contributing_factors.get("indicator_count").copied().unwrap_or(0.0);
            out.push_str(&format!(
                "{:<16} | {:>11.2} | {:<8} | {:>10} | {}\n",
                p.segment_id, p.probability, p.urgency, indicators as usize, p.recommended_action
            ));
        }

        for f in &self.failed_detectors {
            out.push_str(&format!("\nDetector {} failed ({}): {}", f.detector, f.kind, f.message));
        }
        for f in &self.failed_segments {
            out.push_str(&format!("\nSegment {} failed ({}): {}", f.segment_id, f.kind, f.message));
        }
        out
    }
}
