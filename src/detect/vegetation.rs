//! Vegetation-index anomaly detection.
//!
//! Persistent sub-surface moisture shows up as vegetation that is greener than
//! its surroundings, i.e. NDVI above the scene baseline.

use crate::config::DetectorParams;
use crate::detect::{
    extract_indicators, normalized_difference, DetectError, IndicatorType, LeakIndicator,
};
use crate::raster::Raster;

/// NDVI = (NIR - Red) / (NIR + Red).
pub fn ndvi(nir: &Raster, red: &Raster) -> Raster {
    normalized_difference(nir, red)
}

/// What NDVI is measured against.
#[derive(Debug, Clone, PartialEq)]
pub enum NdviBaseline {
    /// Median NDVI of the scene itself.
    SceneMedian,
    /// One reference value for every pixel.
    Scalar(f64),
    /// A co-registered reference raster.
    PerPixel(Raster),
}

/// Detect vegetation anomalies from co-registered NIR and red bands.
pub fn detect(
    nir: &Raster,
    red: &Raster,
    baseline: &NdviBaseline,
    params: &DetectorParams,
) -> Result<Vec<LeakIndicator>, DetectError> {
    nir.ensure_same_dims(red, "red")?;
    nir.ensure_finite("nir")?;
    red.ensure_finite("red")?;

    let index = ndvi(nir, red);
    let excess = match baseline {
        NdviBaseline::SceneMedian => match index.median() {
            Some(median) => index.map(|v| v - median),
            None => return Ok(Vec::new()),
        },
        &NdviBaseline::Scalar(base) => {
            if !base.is_finite() {
                return Err(DetectError::NonFinite {
                    band: "ndvi_baseline",
                    index: 0,
                });
            }
            index.map(|v| v - base)
        }
        NdviBaseline::PerPixel(b) => {
            nir.ensure_same_dims(b, "ndvi_baseline")?;
            b.ensure_finite("ndvi_baseline")?;
            index.zip_map(b, |v, base| v - base)
        }
    };

    Ok(extract_indicators(
        &excess,
        IndicatorType::Vegetation,
        params,
        "ndvi_diff",
    ))
}
