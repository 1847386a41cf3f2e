//! Ground subsidence via temporal change detection.
//!
//! Soil washed out by a leak lets the surface sag, which shows up as a change
//! between two co-registered grayscale captures of the same area.

use crate::config::DetectorParams;
use crate::detect::{extract_indicators, DetectError, IndicatorType, LeakIndicator};
use crate::raster::Raster;

/// Full-scale grayscale intensity.
pub const GRAY_FULL_SCALE: f64 = 255.0;

/// Collapse a blue/green/red capture to grayscale with the usual luma weights.
pub fn grayscale_from_bgr(
    blue: &Raster,
    green: &Raster,
    red: &Raster,
) -> Result<Raster, DetectError> {
    blue.ensure_same_dims(green, "green")?;
    blue.ensure_same_dims(red, "red")?;
    let bg = blue.zip_map(green, |b, g| 0.114 * b + 0.587 * g);
    Ok(bg.zip_map(red, |partial, r| partial + 0.299 * r))
}

/// Absolute change between two captures, normalized to full scale.
pub fn normalized_change(before: &Raster, after: &Raster) -> Raster {
    before.zip_map(after, |b, a| (b - a).abs() / GRAY_FULL_SCALE)
}

/// Detect subsidence between `before` and `after` grayscale captures.
pub fn detect(
    before: &Raster,
    after: &Raster,
    params: &DetectorParams,
) -> Result<Vec<LeakIndicator>, DetectError> {
    before.ensure_same_dims(after, "current")?;
    before.ensure_finite("previous")?;
    after.ensure_finite("current")?;

    let change = normalized_change(before, after);
    Ok(extract_indicators(
        &change,
        IndicatorType::Subsidence,
        params,
        "change",
    ))
}
