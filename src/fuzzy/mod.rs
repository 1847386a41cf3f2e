//! Fuzzy inference over segment attributes and indicator evidence.

pub mod analyzer;
pub mod membership;

pub use analyzer::FuzzyDefectAnalyzer;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::UrgencyParams;

/// Linguistic categories for pipe age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgeTerm {
    New,
    Moderate,
    Old,
    Ancient,
}

/// Linguistic categories for the number of associated indicators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountTerm {
    Few,
    Several,
    Many,
}

/// `IF age IS <age> AND indicators ARE <count> THEN weight`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub age: AgeTerm,
    pub count: CountTerm,
    pub weight: f64,
}

impl Rule {
    pub fn new(age: AgeTerm, count: CountTerm, weight: f64) -> Self {
        Self { age, count, weight }
    }
}

/// Membership degrees of one age value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AgeMemberships {
    pub new: f64,
    pub moderate: f64,
    pub old: f64,
    pub ancient: f64,
}

impl AgeMemberships {
    pub fn get(&self, term: AgeTerm) -> f64 {
        match term {
            AgeTerm::New => self.new,
            AgeTerm::Moderate => self.moderate,
            AgeTerm::Old => self.old,
            AgeTerm::Ancient => self.ancient,
        }
    }
}

/// Membership degrees of one indicator count.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CountMemberships {
    pub few: f64,
    pub several: f64,
    pub many: f64,
}

impl CountMemberships {
    pub fn get(&self, term: CountTerm) -> f64 {
        match term {
            CountTerm::Few => self.few,
            CountTerm::Several => self.several,
            CountTerm::Many => self.many,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Urgency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Urgency::Low => write!(f, "low"),
            Urgency::Medium => write!(f, "medium"),
            Urgency::High => write!(f, "high"),
            Urgency::Critical => write!(f, "critical"),
        }
    }
}

impl Urgency {
    /// First matching band wins: critical, high, medium, low.
    pub fn classify(probability: f64, avg_severity: f64, bands: &UrgencyParams) -> Self {
        if probability > bands.critical_probability || avg_severity > bands.critical_severity {
            Urgency::Critical
        } else if probability > bands.high_probability {
            Urgency::High
        } else if probability > bands.medium_probability {
            Urgency::Medium
        } else {
            Urgency::Low
        }
    }

    pub fn recommended_action(self) -> &'static str {
        match self {
            Urgency::Critical => "Immediate inspection and repair required",
            Urgency::High => "Schedule inspection within 1 week",
            Urgency::Medium => "Schedule inspection within 1 month",
            Urgency::Low => "Monitor for changes",
        }
    }
}

/// Inference result for one segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefectProbability {
    pub segment_id: String,
    pub probability: f64,
    /// Named inputs behind the probability, for audit.
    pub contributing_factors: BTreeMap<String, f64>,
    pub recommended_action: String,
    pub urgency: Urgency,
}
