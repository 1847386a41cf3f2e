//! Mamdani-style defect analyzer.
//!
//! Inputs are fuzzified, each rule fires at `min(age, count) * weight`, and the
//! strongest firing becomes the base probability. When nothing fires, the base
//! falls back to the calibration's neutral default rather than zero. Material
//! vulnerability scales the base and recorded leak history adds a capped boost.

use std::collections::BTreeMap;

use crate::config::{Calibration, FuzzyParams};
use crate::detect::LeakIndicator;
use crate::fuzzy::{AgeMemberships, CountMemberships, DefectProbability, Urgency};
use crate::network::PipelineSegment;

/// Stateless analyzer bound to one calibration.
#[derive(Debug, Clone)]
pub struct FuzzyDefectAnalyzer<'a> {
    calibration: &'a Calibration,
}

impl<'a> FuzzyDefectAnalyzer<'a> {
    pub fn new(calibration: &'a Calibration) -> Self {
        Self { calibration }
    }

    fn params(&self) -> &FuzzyParams {
        &self.calibration.fuzzy
    }

    pub fn fuzzify_age(&self, age_years: f64) -> AgeMemberships {
        let sets = &self.params().age;
        AgeMemberships {
            new: sets.new.degree(age_years),
            moderate: sets.moderate.degree(age_years),
            old: sets.old.degree(age_years),
            ancient: sets.ancient.degree(age_years),
        }
    }

    pub fn fuzzify_indicator_count(&self, count: usize) -> CountMemberships {
        let sets = &self.params().count;
        let x = count as f64;
        CountMemberships {
            few: sets.few.degree(x),
            several: sets.several.degree(x),
            many: sets.many.degree(x),
        }
    }

    /// Case-insensitive lookup; spaces and hyphens read as underscores.
    pub fn material_vulnerability(&self, material: &str) -> f64 {
        let key = material.trim().to_lowercase().replace([' ', '-'], "_");
        self.params()
            .materials
            .get(&key)
            .copied()
            .unwrap_or(self.params().unknown_material)
    }

    /// Firing strength of every rule, in table order.
    pub fn evaluate_rules(&self, age: &AgeMemberships, count: &CountMemberships) -> Vec<f64> {
        self.params()
            .rules
            .iter()
            .map(|rule| age.get(rule.age).min(count.get(rule.count)) * rule.weight)
            .collect()
    }

    /// Strongest firing, or the neutral default when no rule fired at all.
    pub fn base_probability(&self, fired: &[f64]) -> f64 {
        let strongest = fired.iter().copied().fold(0.0, f64::max);
        if strongest > 0.0 {
            strongest
        } else {
            self.params().default_probability
        }
    }

    /// Combine the base with material vulnerability and leak history.
    pub fn adjust(&self, base: f64, material_vulnerability: f64, historical_leaks: u32) -> f64 {
        let p = self.params();
        let leak_boost = (f64::from(historical_leaks) * p.leak_boost_per_event).min(p.leak_boost_cap);
        (base * (1.0 + material_vulnerability) + leak_boost).clamp(0.0, 1.0)
    }

    /// Full inference for one segment and the indicators associated with it.
    pub fn calculate_defect_probability(
        &self,
        segment: &PipelineSegment,
        indicators: &[LeakIndicator],
    ) -> DefectProbability {
        let age = self.fuzzify_age(segment.age_years);
        let count = self.fuzzify_indicator_count(indicators.len());
        let material = self.material_vulnerability(&segment.pipe_material);

        let fired = self.evaluate_rules(&age, &count);
        let base = self.base_probability(&fired);
        let probability = self.adjust(base, material, segment.historical_leaks);

        let avg_severity = if indicators.is_empty() {
            0.0
        } else {
            indicators.iter().map(|i| i.severity).sum::<f64>() / indicators.len() as f64
        };
        let urgency = Urgency::classify(probability, avg_severity, &self.calibration.urgency);

        let contributing_factors = BTreeMap::from([
            ("age_years".to_string(), segment.age_years),
            ("material_vulnerability".to_string(), material),
            ("historical_leaks".to_string(), f64::from(segment.historical_leaks)),
            ("indicator_count".to_string(), indicators.len() as f64),
            ("avg_severity".to_string(), avg_severity),
        ]);

        DefectProbability {
            segment_id: segment.segment_id.clone(),
            probability,
            contributing_factors,
            recommended_action: urgency.recommended_action().to_string(),
            urgency,
        }
    }
}
