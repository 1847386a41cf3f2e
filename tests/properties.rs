//! Range, exhaustiveness and monotonicity properties of the scoring path.

use std::collections::BTreeMap;

use chrono::Utc;
use leakwatch::config::{Calibration, DetectorParams, UrgencyParams};
use leakwatch::detect::vegetation::NdviBaseline;
use leakwatch::detect::{ponding, subsidence, thermal, vegetation, IndicatorType, LeakIndicator};
use leakwatch::fuzzy::{FuzzyDefectAnalyzer, Urgency};
use leakwatch::network::PipelineSegment;
use leakwatch::raster::Raster;
use proptest::prelude::*;

const MATERIALS: [&str; 7] = ["pvc", "steel", "cast_iron", "concrete", "asbestos", "unknown", "clay"];

fn segment(age: f64, material: &str, leaks: u32) -> PipelineSegment {
    PipelineSegment {
        segment_id: "p".to_string(),
        start_node: "a".to_string(),
        end_node: "b".to_string(),
        pipe_material: material.to_string(),
        diameter_mm: 200.0,
        age_years: age,
        length_meters: 100.0,
        coordinates: Vec::new(),
        historical_leaks: leaks,
    }
}

fn indicators(severities: &[f64]) -> Vec<LeakIndicator> {
    severities
        .iter()
        .map(|&severity| LeakIndicator {
            location: (0.0, 0.0),
            indicator_type: IndicatorType::Subsidence,
            confidence: 0.75,
            severity,
            timestamp: Utc::now(),
            image_source: "drone".to_string(),
            metadata: BTreeMap::new(),
        })
        .collect()
}

/// Band samples with exact zeros, values straddling zero, and wide magnitudes.
fn band_sample() -> impl Strategy<Value = f64> {
    prop_oneof![
        Just(0.0),
        -1e-9f64..1e-9,
        0.0f64..1.0,
        -1e6f64..1e6,
    ]
}

fn band(samples: Vec<f64>) -> Raster {
    Raster::new(12, 12, samples).unwrap()
}

fn assert_unit_interval(found: &[LeakIndicator]) -> Result<(), TestCaseError> {
    for ind in found {
        prop_assert!((0.0..=1.0).contains(&ind.severity));
        prop_assert!((0.0..=1.0).contains(&ind.confidence));
    }
    Ok(())
}

proptest! {
    #[test]
    fn probability_stays_in_unit_interval(
        age in 0.0f64..150.0,
        material in prop::sample::select(MATERIALS.to_vec()),
        leaks in 0u32..1000,
        severities in prop::collection::vec(0.0f64..=1.0, 0..12),
    ) {
        let cal = Calibration::default();
        let analyzer = FuzzyDefectAnalyzer::new(&cal);
        let result = analyzer.calculate_defect_probability(
            &segment(age, material, leaks),
            &indicators(&severities),
        );
        prop_assert!((0.0..=1.0).contains(&result.probability));
        prop_assert_eq!(result.recommended_action.as_str(), result.urgency.recommended_action());
    }

    #[test]
    fn urgency_bands_are_exhaustive_and_ordered(p in 0.0f64..=1.0, s in 0.0f64..=1.0) {
        let bands = UrgencyParams::default();
        let u = Urgency::classify(p, s, &bands);
        let expected = if p > 0.8 || s > 0.8 {
            Urgency::Critical
        } else if p > 0.6 {
            Urgency::High
        } else if p > 0.4 {
            Urgency::Medium
        } else {
            Urgency::Low
        };
        prop_assert_eq!(u, expected);
    }

    #[test]
    fn more_leaks_never_lower_probability(
        age in 0.0f64..100.0,
        material in prop::sample::select(MATERIALS.to_vec()),
        leaks in 0u32..10,
        count in 0usize..8,
    ) {
        let cal = Calibration::default();
        let analyzer = FuzzyDefectAnalyzer::new(&cal);
        let found = indicators(&vec![0.3; count]);
        let fewer = analyzer.calculate_defect_probability(&segment(age, material, leaks), &found);
        let more = analyzer.calculate_defect_probability(&segment(age, material, leaks + 1), &found);
        prop_assert!(more.probability >= fewer.probability);
    }

    #[test]
    fn more_vulnerable_material_never_lowers_probability(
        age in 0.0f64..100.0,
        leaks in 0u32..5,
        count in 0usize..8,
    ) {
        let cal = Calibration::default();
        let analyzer = FuzzyDefectAnalyzer::new(&cal);
        let found = indicators(&vec![0.3; count]);
        let ranked = ["pvc", "steel", "concrete", "cast_iron", "asbestos"];
        let probs: Vec<f64> = ranked
            .iter()
            .map(|m| analyzer.calculate_defect_probability(&segment(age, m, leaks), &found).probability)
            .collect();
        prop_assert!(probs.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn no_evidence_past_ten_years_is_age_independent(
        a in 10.0f64..200.0,
        b in 10.0f64..200.0,
        leaks in 0u32..5,
    ) {
        let cal = Calibration::default();
        let analyzer = FuzzyDefectAnalyzer::new(&cal);
        let pa = analyzer.calculate_defect_probability(&segment(a, "steel", leaks), &[]);
        let pb = analyzer.calculate_defect_probability(&segment(b, "steel", leaks), &[]);
        prop_assert_eq!(pa.probability, pb.probability);
    }

    #[test]
    fn thermal_outputs_stay_in_unit_interval(
        samples in prop::collection::vec(-10.0f64..60.0, 144),
        reference in prop::option::of(0.0f64..40.0),
    ) {
        let raster = Raster::new(12, 12, samples).unwrap();
        let found = thermal::detect(&raster, reference, &DetectorParams::thermal()).unwrap();
        for ind in found {
            prop_assert!((0.0..=1.0).contains(&ind.severity));
            prop_assert!((0.0..=1.0).contains(&ind.confidence));
        }
    }

    #[test]
    fn below_threshold_fields_yield_nothing(
        samples in prop::collection::vec(20.0f64..21.9, 100),
    ) {
        let raster = Raster::new(10, 10, samples).unwrap();
        let found = thermal::detect(&raster, Some(20.0), &DetectorParams::thermal()).unwrap();
        prop_assert!(found.is_empty());
    }

    #[test]
    fn vegetation_outputs_stay_in_unit_interval(
        nir in prop::collection::vec(band_sample(), 144),
        red in prop::collection::vec(band_sample(), 144),
        scalar in prop::option::of(-1.0f64..1.0),
    ) {
        let baseline = scalar.map_or(NdviBaseline::SceneMedian, NdviBaseline::Scalar);
        let params = DetectorParams::vegetation();
        let found = vegetation::detect(&band(nir), &band(red), &baseline, &params).unwrap();
        assert_unit_interval(&found)?;
    }

    #[test]
    fn subsidence_outputs_stay_in_unit_interval(
        before in prop::collection::vec(prop_oneof![0.0f64..=255.0, band_sample()], 144),
        after in prop::collection::vec(prop_oneof![0.0f64..=255.0, band_sample()], 144),
    ) {
        let found = subsidence::detect(&band(before), &band(after), &DetectorParams::subsidence())
            .unwrap();
        assert_unit_interval(&found)?;
    }

    #[test]
    fn ponding_outputs_stay_in_unit_interval(
        green in prop::collection::vec(band_sample(), 144),
        nir in prop::collection::vec(band_sample(), 144),
    ) {
        let found = ponding::detect(&band(green), &band(nir), &DetectorParams::ponding()).unwrap();
        assert_unit_interval(&found)?;
    }

    #[test]
    fn vegetation_below_threshold_yields_nothing(
        pixels in prop::collection::vec((0.3f64..0.44, 0.1f64..1.0), 144),
    ) {
        // NDVI confined to a band narrower than the 0.15 excess threshold
        let red: Vec<f64> = pixels.iter().map(|&(_, r)| r).collect();
        let nir: Vec<f64> = pixels.iter().map(|&(v, r)| r * (1.0 + v) / (1.0 - v)).collect();
        let found = vegetation::detect(
            &band(nir),
            &band(red),
            &NdviBaseline::SceneMedian,
            &DetectorParams::vegetation(),
        )
        .unwrap();
        prop_assert!(found.is_empty());
    }

    #[test]
    fn subsidence_below_threshold_yields_nothing(
        pixels in prop::collection::vec((0.0f64..255.0, -25.0f64..25.0), 144),
    ) {
        // |change| < 25 / 255, under the 0.10 threshold
        let before: Vec<f64> = pixels.iter().map(|&(b, _)| b).collect();
        let after: Vec<f64> = pixels.iter().map(|&(b, d)| b + d).collect();
        let found = subsidence::detect(&band(before), &band(after), &DetectorParams::subsidence())
            .unwrap();
        prop_assert!(found.is_empty());
    }

    #[test]
    fn ponding_below_threshold_yields_nothing(
        pixels in prop::collection::vec((0.01f64..1.0, 0.6f64..2.0), 144),
    ) {
        // NDWI = (1 - k) / (1 + k) stays at or under 0.25
        let green: Vec<f64> = pixels.iter().map(|&(g, _)| g).collect();
        let nir: Vec<f64> = pixels.iter().map(|&(g, k)| g * k).collect();
        let found = ponding::detect(&band(green), &band(nir), &DetectorParams::ponding()).unwrap();
        prop_assert!(found.is_empty());
    }
}

/// The max-of-rules base with a neutral default is not monotone in age across
/// category transitions; these are the known dips.
#[test]
fn age_dips_are_pinned() {
    let cal = Calibration::default();
    let analyzer = FuzzyDefectAnalyzer::new(&cal);
    let two = indicators(&[0.3, 0.3]);
    let at20 = analyzer.calculate_defect_probability(&segment(20.0, "pvc", 0), &two);
    let at25 = analyzer.calculate_defect_probability(&segment(25.0, "pvc", 0), &two);
    // moderate&several (0.5) hands over to a half-fired old&several (0.35)
    assert!((at20.probability - 0.65).abs() < 1e-12);
    assert!((at25.probability - 0.455).abs() < 1e-12);

    let none = indicators(&[]);
    let at9 = analyzer.calculate_defect_probability(&segment(9.0, "pvc", 0), &none);
    let at10 = analyzer.calculate_defect_probability(&segment(10.0, "pvc", 0), &none);
    // a weakly fired new&few sits far below the neutral default
    assert!(at9.probability < at10.probability);
}
