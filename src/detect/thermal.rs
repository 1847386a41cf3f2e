//! Thermal anomaly detection.
//!
//! Escaping water shifts the surface temperature relative to the surrounding
//! soil (cooler by day, warmer by night), so the score is the absolute
//! deviation from a reference temperature.

use crate::config::DetectorParams;
use crate::detect::{extract_indicators, DetectError, IndicatorType, LeakIndicator};
use crate::raster::Raster;

/// Detect thermal anomalies in a band of surface temperatures (°C).
///
/// `reference_temp` defaults to the band median.
pub fn detect(
    thermal: &Raster,
    reference_temp: Option<f64>,
    params: &DetectorParams,
) -> Result<Vec<LeakIndicator>, DetectError> {
    thermal.ensure_finite("thermal")?;
    let reference = match reference_temp {
        Some(t) if !t.is_finite() => {
            return Err(DetectError::NonFinite {
                band: "reference_temp",
                index: 0,
            })
        }
        Some(t) => t,
        None => match thermal.median() {
            Some(m) => m,
            None => return Ok(Vec::new()),
        },
    };

    let deviation = thermal.map(|t| (t - reference).abs());
    Ok(extract_indicators(
        &deviation,
        IndicatorType::Thermal,
        params,
        "temp_diff",
    ))
}
