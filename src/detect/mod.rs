//! Signal detectors: raster bands in, leak indicators out.
//!
//! The four detector types form a closed set dispatched through
//! [`IndicatorType::detect`]. Every detector follows the same shape: score each
//! pixel, threshold, clean the mask morphologically, label 8-connected
//! components, keep those inside the area band, and emit one indicator per
//! surviving component.

pub mod aggregate;
pub mod ponding;
pub mod subsidence;
pub mod thermal;
pub mod vegetation;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::{Calibration, DetectorParams, Morphology};
use crate::detect::vegetation::NdviBaseline;
use crate::error::ErrorKind;
use crate::raster::Raster;

/// Replaces exact-zero denominators in normalized-difference indices.
pub const ZERO_DENOMINATOR: f64 = 1e-10;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("raster shape mismatch: expected {expected} samples, have {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("ragged raster: row {row} has {actual} samples, expected {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("band {band} is ragged: row {row} has {actual} samples, expected {expected}")]
    RaggedBand {
        band: &'static str,
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("band {band} has a non-finite sample at index {index}")]
    NonFinite { band: &'static str, index: usize },

    #[error("band {band} is {actual:?}, expected {expected:?} to match its co-registered band")]
    DimensionMismatch {
        band: &'static str,
        expected: (usize, usize),
        actual: (usize, usize),
    },
}

impl DetectError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::MalformedInput
    }
}

/// Which physical signal an indicator was extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorType {
    Thermal,
    Vegetation,
    Subsidence,
    Ponding,
}

impl std::fmt::Display for IndicatorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndicatorType::Thermal => write!(f, "thermal"),
            IndicatorType::Vegetation => write!(f, "vegetation"),
            IndicatorType::Subsidence => write!(f, "subsidence"),
            IndicatorType::Ponding => write!(f, "ponding"),
        }
    }
}

impl IndicatorType {
    pub const ALL: [IndicatorType; 4] = [
        IndicatorType::Thermal,
        IndicatorType::Vegetation,
        IndicatorType::Subsidence,
        IndicatorType::Ponding,
    ];

    /// The calibration entry for this detector.
    pub fn params(self, calibration: &Calibration) -> &DetectorParams {
        match self {
            IndicatorType::Thermal => &calibration.thermal,
            IndicatorType::Vegetation => &calibration.vegetation,
            IndicatorType::Subsidence => &calibration.subsidence,
            IndicatorType::Ponding => &calibration.ponding,
        }
    }

    /// Whether every band this detector needs is present.
    pub fn is_applicable(self, bands: &Bands) -> bool {
        match self {
            IndicatorType::Thermal => bands.thermal.is_some(),
            IndicatorType::Vegetation => bands.nir.is_some() && bands.red.is_some(),
            IndicatorType::Subsidence => {
                (bands.previous.is_some() || bands.previous_bgr.is_some())
                    && (bands.current.is_some() || bands.current_bgr.is_some())
            }
            IndicatorType::Ponding => bands.green.is_some() && bands.nir.is_some(),
        }
    }

    /// Run this detector over `bands`. Missing bands yield no indicators.
    ///
    /// Bands are shape-checked here, so a ragged band fails only the
    /// detectors that read it.
    pub fn detect(
        self,
        bands: &Bands,
        calibration: &Calibration,
    ) -> Result<Vec<LeakIndicator>, DetectError> {
        if !self.is_applicable(bands) {
            debug!(detector = %self, "required bands absent, detector skipped");
            return Ok(Vec::new());
        }
        let params = self.params(calibration);
        match self {
            IndicatorType::Thermal => match &bands.thermal {
                Some(t) => thermal::detect(&t.to_raster("thermal")?, bands.reference_temp, params),
                None => Ok(Vec::new()),
            },
            IndicatorType::Vegetation => match (&bands.nir, &bands.red) {
                (Some(nir), Some(red)) => {
                    let baseline = match &bands.ndvi_baseline {
                        None => NdviBaseline::SceneMedian,
                        Some(Baseline::Scalar(v)) => NdviBaseline::Scalar(*v),
                        Some(Baseline::PerPixel(b)) => {
                            NdviBaseline::PerPixel(b.to_raster("ndvi_baseline")?)
                        }
                    };
                    vegetation::detect(
                        &nir.to_raster("nir")?,
                        &red.to_raster("red")?,
                        &baseline,
                        params,
                    )
                }
                _ => Ok(Vec::new()),
            },
            IndicatorType::Subsidence => {
                let before = bands.previous_grayscale()?;
                let after = bands.current_grayscale()?;
                match (before, after) {
                    (Some(before), Some(after)) => subsidence::detect(&before, &after, params),
                    _ => Ok(Vec::new()),
                }
            }
            IndicatorType::Ponding => match (&bands.green, &bands.nir) {
                (Some(green), Some(nir)) => {
                    ponding::detect(&green.to_raster("green")?, &nir.to_raster("nir")?, params)
                }
                _ => Ok(Vec::new()),
            },
        }
    }
}

/// A localized anomaly suggestive of a pipeline defect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeakIndicator {
    /// (row, col) centroid in the caller's coordinate unit.
    pub location: (f64, f64),
    pub indicator_type: IndicatorType,
    pub confidence: f64,
    pub severity: f64,
    pub timestamp: DateTime<Utc>,
    pub image_source: String,
    pub metadata: BTreeMap<String, f64>,
}

/// One band as delivered: a list of rows, unchecked until a detector reads it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Band(pub Vec<Vec<f64>>);

impl Band {
    /// Shape-check the rows into a raster.
    pub fn to_raster(&self, band: &'static str) -> Result<Raster, DetectError> {
        Raster::from_row_slices(&self.0).map_err(|e| match e {
            DetectError::RaggedRow {
                row,
                expected,
                actual,
            } => DetectError::RaggedBand {
                band,
                row,
                expected,
                actual,
            },
            other => other,
        })
    }
}

impl From<Raster> for Band {
    fn from(r: Raster) -> Self {
        Band(r.into())
    }
}

/// NDVI reference: one value for the whole scene or one per pixel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Baseline {
    Scalar(f64),
    PerPixel(Band),
}

impl From<f64> for Baseline {
    fn from(v: f64) -> Self {
        Baseline::Scalar(v)
    }
}

impl From<Raster> for Baseline {
    fn from(r: Raster) -> Self {
        Baseline::PerPixel(r.into())
    }
}

/// A colour capture as separate blue, green and red planes, 0-255.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BgrCapture {
    pub blue: Band,
    pub green: Band,
    pub red: Band,
}

impl BgrCapture {
    pub fn to_grayscale(&self) -> Result<Raster, DetectError> {
        subsidence::grayscale_from_bgr(
            &self.blue.to_raster("blue")?,
            &self.green.to_raster("green")?,
            &self.red.to_raster("red")?,
        )
    }
}

/// The co-registered bands of one acquisition pass. Absent bands are `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bands {
    /// Surface temperature in °C.
    pub thermal: Option<Band>,
    /// Ambient reference for the thermal band; the band median when absent.
    pub reference_temp: Option<f64>,
    pub nir: Option<Band>,
    pub red: Option<Band>,
    pub green: Option<Band>,
    /// Scalar or per-pixel NDVI baseline; the scene median when absent.
    pub ndvi_baseline: Option<Baseline>,
    /// Grayscale 0-255 capture before the change window.
    pub previous: Option<Band>,
    /// Grayscale 0-255 capture after the change window.
    pub current: Option<Band>,
    /// Colour capture before the change window; `previous` wins when both are set.
    pub previous_bgr: Option<BgrCapture>,
    /// Colour capture after the change window; `current` wins when both are set.
    pub current_bgr: Option<BgrCapture>,
}

impl Bands {
    /// Detectors whose bands are all present.
    pub fn applicable(&self) -> Vec<IndicatorType> {
        IndicatorType::ALL
            .into_iter()
            .filter(|t| t.is_applicable(self))
            .collect()
    }

    fn previous_grayscale(&self) -> Result<Option<Raster>, DetectError> {
        grayscale(self.previous.as_ref(), self.previous_bgr.as_ref(), "previous")
    }

    fn current_grayscale(&self) -> Result<Option<Raster>, DetectError> {
        grayscale(self.current.as_ref(), self.current_bgr.as_ref(), "current")
    }
}

fn grayscale(
    gray: Option<&Band>,
    bgr: Option<&BgrCapture>,
    band: &'static str,
) -> Result<Option<Raster>, DetectError> {
    match (gray, bgr) {
        (Some(g), _) => g.to_raster(band).map(Some),
        (None, Some(c)) => c.to_grayscale().map(Some),
        (None, None) => Ok(None),
    }
}

/// `(a - b) / (a + b)` with exact-zero denominators replaced.
pub fn normalized_difference(a: &Raster, b: &Raster) -> Raster {
    a.zip_map(b, |x, y| {
        let denominator = x + y;
        let denominator = if denominator == 0.0 {
            ZERO_DENOMINATOR
        } else {
            denominator
        };
        (x - y) / denominator
    })
}

/// Shared tail of every detector: mask, clean, label, filter, emit.
///
/// `score` is the per-pixel anomaly field; `magnitude_key` names the metadata
/// entry that records the component's peak score.
pub(crate) fn extract_indicators(
    score: &Raster,
    kind: IndicatorType,
    params: &DetectorParams,
    magnitude_key: &str,
) -> Vec<LeakIndicator> {
    // A spatially uniform field has nothing localized to report.
    if score.is_uniform() {
        return Vec::new();
    }

    let mask = score.threshold(params.threshold);
    if mask.count() == 0 {
        return Vec::new();
    }
    let mask = match params.morphology {
        Morphology::None => mask,
        Morphology::Close { kernel } => mask.close(kernel),
        Morphology::Open { kernel } => mask.open(kernel),
    };

    let timestamp = Utc::now();
    let components = mask.components();
    let total = components.len();

    let indicators: Vec<LeakIndicator> = components
        .into_iter()
        .filter(|c| params.accepts_area(c.area))
        .map(|c| {
            let peak = c.peak(score);
            let mut metadata = BTreeMap::new();
            metadata.insert(magnitude_key.to_string(), peak);
            metadata.insert("area".to_string(), c.area as f64);
            LeakIndicator {
                location: c.centroid,
                indicator_type: kind,
                confidence: params.confidence.clamp(0.0, 1.0),
                severity: params.severity(peak),
                timestamp,
                image_source: params.image_source.clone(),
                metadata,
            }
        })
        .collect();

    debug!(
        detector = %kind,
        components = total,
        kept = indicators.len(),
        "component extraction complete"
    );
    indicators
}
