//! Merges per-detector outcomes for one acquisition pass.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{info, warn};

use crate::detect::{DetectError, IndicatorType, LeakIndicator};
use crate::error::ErrorKind;

/// A detector call that failed; its siblings are unaffected.
#[derive(Debug, Clone, Serialize)]
pub struct DetectorFailure {
    pub detector: IndicatorType,
    pub kind: ErrorKind,
    pub message: String,
}

/// Concatenates indicator lists in detector order and keeps failures apart.
#[derive(Debug, Default)]
pub struct IndicatorAggregator {
    indicators: Vec<LeakIndicator>,
    counts: BTreeMap<IndicatorType, usize>,
    failures: Vec<DetectorFailure>,
}

impl IndicatorAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of one detector call.
    pub fn record(&mut self, detector: IndicatorType, outcome: Result<Vec<LeakIndicator>, DetectError>) {
        match outcome {
            Ok(found) => {
                info!(detector = %detector, count = found.len(), "indicators found");
                *self.counts.entry(detector).or_default() += found.len();
                self.indicators.extend(found);
            }
            Err(e) => {
                warn!(detector = %detector, error = %e, "detector failed");
                self.failures.push(DetectorFailure {
                    detector,
                    kind: e.kind(),
                    message: e.to_string(),
                });
            }
        }
    }

    /// Record a detector that never produced an outcome.
    pub fn record_failure(&mut self, detector: IndicatorType, kind: ErrorKind, message: String) {
        warn!(detector = %detector, %kind, %message, "detector did not complete");
        self.failures.push(DetectorFailure {
            detector,
            kind,
            message,
        });
    }

    pub fn len(&self) -> usize {
        self.indicators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indicators.is_empty()
    }

    pub fn counts(&self) -> &BTreeMap<IndicatorType, usize> {
        &self.counts
    }

    pub fn failures(&self) -> &[DetectorFailure] {
        &self.failures
    }

    pub fn finish(self) -> AggregatedIndicators {
        AggregatedIndicators {
            indicators: self.indicators,
            counts: self.counts,
            failures: self.failures,
        }
    }
}

/// The merged result of an acquisition pass.
#[derive(Debug, Clone, Default)]
pub struct AggregatedIndicators {
    pub indicators: Vec<LeakIndicator>,
    pub counts: BTreeMap<IndicatorType, usize>,
    pub failures: Vec<DetectorFailure>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn indicator(kind: IndicatorType) -> LeakIndicator {
        LeakIndicator {
            location: (1.0, 2.0),
            indicator_type: kind,
            confidence: 0.5,
            severity: 0.5,
            timestamp: Utc::now(),
            image_source: "test".to_string(),
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn test_merges_in_detector_order_and_isolates_failures() {
        let mut agg = IndicatorAggregator::new();
        agg.record(IndicatorType::Thermal, Ok(vec![indicator(IndicatorType::Thermal)]));
        agg.record(
            IndicatorType::Vegetation,
            Err(DetectError::ShapeMismatch { expected: 4, actual: 3 }),
        );
        agg.record(
            IndicatorType::Ponding,
            Ok(vec![indicator(IndicatorType::Ponding), indicator(IndicatorType::Ponding)]),
        );

        let out = agg.finish();
        assert_eq!(out.indicators.len(), 3);
        assert_eq!(out.indicators[0].indicator_type, IndicatorType::Thermal);
        assert_eq!(out.counts[&IndicatorType::Ponding], 2);
        assert!(!out.counts.contains_key(&IndicatorType::Vegetation));
        assert_eq!(out.failures.len(), 1);
        assert_eq!(out.failures[0].detector, IndicatorType::Vegetation);
        assert_eq!(out.failures[0].kind, ErrorKind::MalformedInput);
    }
}
