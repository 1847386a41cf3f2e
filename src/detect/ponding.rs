//! Surface ponding detection with the normalized difference water index.
//!
//! Opening the water mask with a large kernel strips thin wet edges, and the
//! area band rejects anything the size of a river or lake, leaving
//! small-to-medium pools of surfaced water.

use crate::config::DetectorParams;
use crate::detect::{
    extract_indicators, normalized_difference, DetectError, IndicatorType, LeakIndicator,
};
use crate::raster::Raster;

/// NDWI = (Green - NIR) / (Green + NIR).
pub fn ndwi(green: &Raster, nir: &Raster) -> Raster {
    normalized_difference(green, nir)
}

/// Detect surface water accumulation from co-registered green and NIR bands.
pub fn detect(
    green: &Raster,
    nir: &Raster,
    params: &DetectorParams,
) -> Result<Vec<LeakIndicator>, DetectError> {
    green.ensure_same_dims(nir, "nir")?;
    green.ensure_finite("green")?;
    nir.ensure_finite("nir")?;

    let index = ndwi(green, nir);
    Ok(extract_indicators(
        &index,
        IndicatorType::Ponding,
        params,
        "ndwi",
    ))
}
