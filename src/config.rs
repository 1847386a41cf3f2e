//! Calibration: the single versioned parameter set every component reads.
//!
//! Detector thresholds, fuzzy membership breakpoints, the rule table, the
//! material vulnerability table and the urgency bands all live here so that a
//! different calibration can be swapped in without touching control flow.
//! The compiled-in defaults reproduce the reference calibration exactly.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::fuzzy::membership::Membership;
use crate::fuzzy::{AgeTerm, CountTerm, Rule};

/// Environment variable naming a calibration file.
pub const CALIBRATION_ENV: &str = "LEAKWATCH_CALIBRATION";

/// Standard system location for the calibration file.
pub const SYSTEM_CALIBRATION_PATH: &str = "/etc/leakwatch/calibration.toml";

// ---------------------------------------------------------------------------
// Top-level calibration
// ---------------------------------------------------------------------------

/// Root parameter set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// Identifies the table set; copied into every report.
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "DetectorParams::thermal")]
    pub thermal: DetectorParams,
    #[serde(default = "DetectorParams::vegetation")]
    pub vegetation: DetectorParams,
    #[serde(default = "DetectorParams::subsidence")]
    pub subsidence: DetectorParams,
    #[serde(default = "DetectorParams::ponding")]
    pub ponding: DetectorParams,
    #[serde(default)]
    pub fuzzy: FuzzyParams,
    #[serde(default)]
    pub urgency: UrgencyParams,
    #[serde(default)]
    pub network: NetworkParams,
}

fn default_version() -> String {
    "reference-1".to_string()
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            version: default_version(),
            thermal: DetectorParams::thermal(),
            vegetation: DetectorParams::vegetation(),
            subsidence: DetectorParams::subsidence(),
            ponding: DetectorParams::ponding(),
            fuzzy: FuzzyParams::default(),
            urgency: UrgencyParams::default(),
            network: NetworkParams::default(),
        }
    }
}

impl Calibration {
    /// Load a calibration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read calibration file: {}", path.display()))?;
        let calibration: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse calibration file: {}", path.display()))?;
        calibration
            .validate()
            .with_context(|| format!("invalid calibration file: {}", path.display()))?;
        info!(path = %path.display(), version = %calibration.version, "loaded calibration");
        Ok(calibration)
    }

    /// Resolve the calibration for this process.
    ///
    /// An explicit path must load. Otherwise the lookup order is the
    /// `LEAKWATCH_CALIBRATION` variable, the system location, then the
    /// compiled-in defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load(path),
            None => Ok(Self::load_or_default()),
        }
    }

    /// Try the environment override and the system location, falling back to
    /// defaults when neither loads.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CALIBRATION_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "LEAKWATCH_CALIBRATION set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CALIBRATION_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system calibration exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no calibration file found, using compiled-in defaults");
        Self::default()
    }

    /// Reject parameter sets that would break the [0,1] output contracts.
    pub fn validate(&self) -> Result<()> {
        for (name, params) in [
            ("thermal", &self.thermal),
            ("vegetation", &self.vegetation),
            ("subsidence", &self.subsidence),
            ("ponding", &self.ponding),
        ] {
            params.validate().with_context(|| format!("[{name}]"))?;
        }
        self.fuzzy.validate().context("[fuzzy]")?;
        self.urgency.validate().context("[urgency]")?;
        if let Some(d) = self.network.max_association_distance {
            if !d.is_finite() || d < 0.0 {
                bail!("[network] max_association_distance must be a non-negative number, got {d}");
            }
        }
        Ok(())
    }

    /// Render the calibration back to TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to serialize calibration")
    }
}

// ---------------------------------------------------------------------------
// Detectors
// ---------------------------------------------------------------------------

/// Binary mask cleanup applied before component extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Morphology {
    None,
    /// Dilate then erode with a square `kernel`; fills gaps in sparse masks.
    Close { kernel: usize },
    /// Erode then dilate with a square `kernel`; strips thin structures.
    Open { kernel: usize },
}

/// Parameters for one signal detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorParams {
    /// Score above which a pixel is anomalous.
    pub threshold: f64,
    /// Magnitude that maps to severity 1.0.
    pub saturation: f64,
    /// Subtract `threshold` from the peak score before normalising.
    #[serde(default)]
    pub offset_by_threshold: bool,
    /// Reliability of this detector type, copied onto every indicator.
    pub confidence: f64,
    /// Components must cover strictly more pixels than this.
    pub min_area: usize,
    /// Components must cover strictly fewer pixels than this, when set.
    #[serde(default)]
    pub max_area: Option<usize>,
    #[serde(default = "default_morphology")]
    pub morphology: Morphology,
    pub image_source: String,
}

fn default_morphology() -> Morphology {
    Morphology::None
}

impl DetectorParams {
    pub fn thermal() -> Self {
        Self {
            threshold: 2.0,
            saturation: 10.0,
            offset_by_threshold: false,
            confidence: 0.8,
            min_area: 10,
            max_area: None,
            morphology: Morphology::None,
            image_source: "thermal".to_string(),
        }
    }

    pub fn vegetation() -> Self {
        Self {
            threshold: 0.15,
            saturation: 0.3,
            offset_by_threshold: false,
            confidence: 0.7,
            min_area: 20,
            max_area: None,
            morphology: Morphology::Close { kernel: 5 },
            image_source: "multispectral".to_string(),
        }
    }

    pub fn subsidence() -> Self {
        Self {
            threshold: 0.10,
            saturation: 0.5,
            offset_by_threshold: false,
            confidence: 0.75,
            min_area: 30,
            max_area: None,
            morphology: Morphology::Close { kernel: 7 },
            image_source: "drone".to_string(),
        }
    }

    pub fn ponding() -> Self {
        Self {
            threshold: 0.30,
            saturation: 0.5,
            offset_by_threshold: true,
            confidence: 0.85,
            min_area: 15,
            max_area: Some(500),
            morphology: Morphology::Open { kernel: 15 },
            image_source: "multispectral".to_string(),
        }
    }

    /// Severity for a component whose peak score is `peak`, clipped to [0,1].
    pub fn severity(&self, peak: f64) -> f64 {
        let magnitude = if self.offset_by_threshold {
            peak - self.threshold
        } else {
            peak
        };
        (magnitude / self.saturation).clamp(0.0, 1.0)
    }

    /// Whether a component of `area` pixels survives the area band.
    pub fn accepts_area(&self, area: usize) -> bool {
        area > self.min_area && self.max_area.map_or(true, |max| area < max)
    }

    fn validate(&self) -> Result<()> {
        if !self.threshold.is_finite() {
            bail!("threshold must be finite");
        }
        if !(self.saturation.is_finite() && self.saturation > 0.0) {
            bail!("saturation must be positive, got {}", self.saturation);
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            bail!("confidence must lie in [0,1], got {}", self.confidence);
        }
        if let Some(max) = self.max_area {
            if max <= self.min_area {
                bail!("max_area {} must exceed min_area {}", max, self.min_area);
            }
        }
        match self.morphology {
            Morphology::Close { kernel } | Morphology::Open { kernel } if kernel == 0 => {
                bail!("morphology kernel must be at least 1")
            }
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Fuzzy inference
// ---------------------------------------------------------------------------

/// Membership functions for the age variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgeSets {
    pub new: Membership,
    pub moderate: Membership,
    pub old: Membership,
    pub ancient: Membership,
}

impl Default for AgeSets {
    fn default() -> Self {
        Self {
            new: Membership::LeftShoulder { full_until: 0.0, zero_at: 10.0 },
            moderate: Membership::Trapezoid { a: 5.0, b: 10.0, c: 20.0, d: 25.0 },
            old: Membership::Trapezoid { a: 20.0, b: 30.0, c: 40.0, d: 50.0 },
            ancient: Membership::RightShoulder { zero_until: 40.0, full_at: 60.0 },
        }
    }
}

/// Membership functions for the indicator-count variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountSets {
    pub few: Membership,
    pub several: Membership,
    pub many: Membership,
}

impl Default for CountSets {
    fn default() -> Self {
        Self {
            few: Membership::LeftShoulder { full_until: 0.0, zero_at: 2.0 },
            several: Membership::Trapezoid { a: 1.0, b: 2.0, c: 3.0, d: 4.0 },
            many: Membership::RightShoulder { zero_until: 3.0, full_at: 5.0 },
        }
    }
}

/// Fuzzy rule base and the crisp adjustments applied after defuzzification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FuzzyParams {
    pub age: AgeSets,
    pub count: CountSets,
    pub rules: Vec<Rule>,
    /// Base probability when no rule fires with a non-zero strength.
    pub default_probability: f64,
    /// Vulnerability by lower-cased material name.
    pub materials: BTreeMap<String, f64>,
    pub unknown_material: f64,
    pub leak_boost_per_event: f64,
    pub leak_boost_cap: f64,
}

impl Default for FuzzyParams {
    fn default() -> Self {
        let rules = vec![
            Rule::new(AgeTerm::Ancient, CountTerm::Many, 0.95),
            Rule::new(AgeTerm::Ancient, CountTerm::Several, 0.85),
            Rule::new(AgeTerm::Old, CountTerm::Many, 0.85),
            Rule::new(AgeTerm::Old, CountTerm::Several, 0.70),
            Rule::new(AgeTerm::Moderate, CountTerm::Many, 0.65),
            Rule::new(AgeTerm::Moderate, CountTerm::Several, 0.50),
            Rule::new(AgeTerm::New, CountTerm::Few, 0.20),
        ];
        let materials = [
            ("pvc", 0.3),
            ("steel", 0.5),
            ("cast_iron", 0.7),
            ("concrete", 0.6),
            ("asbestos", 0.9),
            ("unknown", 0.5),
        ]
        .into_iter()
        .map(|(name, score)| (name.to_string(), score))
        .collect();

        Self {
            age: AgeSets::default(),
            count: CountSets::default(),
            rules,
            default_probability: 0.5,
            materials,
            unknown_material: 0.5,
            leak_boost_per_event: 0.1,
            leak_boost_cap: 0.3,
        }
    }
}

impl FuzzyParams {
    fn validate(&self) -> Result<()> {
        let unit = 0.0..=1.0;
        if self.rules.is_empty() {
            bail!("rule table is empty");
        }
        for rule in &self.rules {
            if !unit.contains(&rule.weight) {
                bail!("rule {:?}&{:?} weight {} outside [0,1]", rule.age, rule.count, rule.weight);
            }
        }
        if !unit.contains(&self.default_probability) {
            bail!("default_probability outside [0,1]");
        }
        for (name, score) in &self.materials {
            if !unit.contains(score) {
                bail!("material {name} vulnerability {score} outside [0,1]");
            }
        }
        if !unit.contains(&self.unknown_material) {
            bail!("unknown_material outside [0,1]");
        }
        if !(self.leak_boost_per_event >= 0.0 && self.leak_boost_cap >= 0.0) {
            bail!("leak boost parameters must be non-negative");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Urgency
// ---------------------------------------------------------------------------

/// Lower bounds (exclusive) of the urgency bands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UrgencyParams {
    pub critical_probability: f64,
    pub critical_severity: f64,
    pub high_probability: f64,
    pub medium_probability: f64,
}

impl Default for UrgencyParams {
    fn default() -> Self {
        Self {
            critical_probability: 0.8,
            critical_severity: 0.8,
            high_probability: 0.6,
            medium_probability: 0.4,
        }
    }
}

impl UrgencyParams {
    fn validate(&self) -> Result<()> {
        if !(self.medium_probability <= self.high_probability
            && self.high_probability <= self.critical_probability)
        {
            bail!("urgency bands must satisfy medium <= high <= critical");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

/// Spatial join and query defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkParams {
    /// Indicators farther than this from every segment stay unassociated.
    pub max_association_distance: Option<f64>,
    pub vulnerable_min_age_years: f64,
    pub vulnerable_min_leaks: u32,
    pub trace_max_hops: usize,
}

impl Default for NetworkParams {
    fn default() -> Self {
        Self {
            max_association_distance: None,
            vulnerable_min_age_years: 20.0,
            vulnerable_min_leaks: 2,
            trace_max_hops: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        Calibration::default().validate().unwrap();
    }

    #[test]
    fn test_partial_toml_overrides_named_sections_only() {
        let toml = r#"
            version = "field-trial-2"

            [urgency]
            high_probability = 0.55
        "#;
        let cal: Calibration = toml::from_str(toml).unwrap();
        assert_eq!(cal.version, "field-trial-2");
        assert_eq!(cal.urgency.high_probability, 0.55);
        assert_eq!(cal.urgency.critical_probability, 0.8);
        assert_eq!(cal.thermal, DetectorParams::thermal());
        assert_eq!(cal.fuzzy.rules.len(), 7);
    }

    #[test]
    fn test_toml_round_trip_preserves_tables() {
        let cal = Calibration::default();
        let text = cal.to_toml().unwrap();
        let back: Calibration = toml::from_str(&text).unwrap();
        assert_eq!(back, cal);
    }

    #[test]
    fn test_ponding_severity_offsets_by_threshold() {
        let p = DetectorParams::ponding();
        assert!((p.severity(0.55) - 0.5).abs() < 1e-12);
        assert_eq!(p.severity(0.1), 0.0);
        assert_eq!(p.severity(5.0), 1.0);
    }

    #[test]
    fn test_area_band_is_exclusive() {
        let p = DetectorParams::ponding();
        assert!(!p.accepts_area(15));
        assert!(p.accepts_area(16));
        assert!(p.accepts_area(499));
        assert!(!p.accepts_area(500));

        let t = DetectorParams::thermal();
        assert!(!t.accepts_area(10));
        assert!(t.accepts_area(11));
        assert!(t.accepts_area(1_000_000));
    }

    #[test]
    fn test_validate_rejects_bad_confidence() {
        let mut cal = Calibration::default();
        cal.vegetation.confidence = 1.5;
        assert!(cal.validate().is_err());
    }

    #[test]
    fn test_load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.toml");
        std::fs::write(&path, "version = \"from-disk\"\n").unwrap();
        let cal = Calibration::load(&path).unwrap();
        assert_eq!(cal.version, "from-disk");
        assert!(Calibration::resolve(Some(&dir.path().join("missing.toml"))).is_err());
    }
}
