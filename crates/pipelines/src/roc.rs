//! Threshold sweep against ground validation points
//!
//! Walks a band of candidate thresholds over a score image, classifies
//! each validation point and reports the usual confusion-matrix rates
//! per threshold. The output table picks the operating threshold for
//! the final maps.

use defolia_core::{Error, Feature, FeatureCollection, Image, PropertyValue, Reducer, Result};

use crate::reduce::{reduce_regions, ReduceRegionsOptions};
use crate::score::SCORE_BAND;

/// Sweep settings. Thresholds run from `start` toward `stop` in
/// increments of `step`, endpoints included.
#[derive(Debug, Clone)]
pub struct RocParams {
    pub start: f64,
    pub stop: f64,
    pub step: f64,
    /// Score band the thresholds apply to
    pub score_band: String,
    /// Validation property holding the 0/1 reference label
    pub label_property: String,
}

impl Default for RocParams {
    fn default() -> Self {
        Self {
            start: 0.30,
            stop: -0.40,
            step: -0.005,
            score_band: SCORE_BAND.to_string(),
            label_property: "combined".to_string(),
        }
    }
}

#[derive(Default, Clone, Copy)]
struct Tally {
    total: usize,
    correct: usize,
}

impl Tally {
    fn add(&mut self, ok: bool) {
        self.total += 1;
        if ok {
            self.correct += 1;
        }
    }

    fn rate(self) -> Option<f64> {
        if self.total == 0 {
            None
        } else {
            Some(self.correct as f64 / self.total as f64)
        }
    }
}

fn set_rate(feature: &mut Feature, key: &str, value: Option<f64>) {
    match value {
        Some(v) => feature.set_property(key, v),
        None => feature.set_property(key, PropertyValue::Null),
    }
}

/// Classify the score at every validation point across the threshold
/// range and accumulate accuracy rates.
///
/// A point classifies positive when its score sits at or below the
/// threshold. Output is one geometry-less feature per threshold with
/// `threshold`, `TPR`, `FPR`, `OA`, `Pos_UA`, `Neg_UA` and
/// `valid_classified`. Points that sample no valid pixel, or carry no
/// label, drop out; a rate over an empty partition comes back Null.
pub fn roc_sweep(
    score: &Image,
    validation: &FeatureCollection,
    params: &RocParams,
) -> Result<FeatureCollection> {
    if params.step == 0.0 || !params.step.is_finite() {
        return Err(Error::InvalidParameter {
            name: "step",
            value: params.step.to_string(),
            reason: "threshold step must be finite and non-zero".to_string(),
        });
    }
    let span = (params.stop - params.start) / params.step;
    if span < 0.0 {
        return Err(Error::InvalidParameter {
            name: "step",
            value: params.step.to_string(),
            reason: "step leads away from stop".to_string(),
        });
    }

    let sampled = reduce_regions(
        &score.select(&[params.score_band.as_str()])?,
        validation,
        Reducer::Mean,
        &ReduceRegionsOptions::default(),
    )?;
    let samples: Vec<(f64, f64)> = sampled
        .iter()
        .filter_map(|feature| {
            let value = feature.get_number(&params.score_band)?;
            let label = feature.get_number(&params.label_property)?;
            Some((value, label))
        })
        .collect();

    let steps = (span + 1e-9).floor() as usize;
    let mut out = FeatureCollection::new();
    for i in 0..=steps {
        let threshold = params.start + i as f64 * params.step;

        let mut all = Tally::default();
        let mut labeled_pos = Tally::default();
        let mut labeled_neg = Tally::default();
        let mut classed_pos = Tally::default();
        let mut classed_neg = Tally::default();
        for &(value, label) in &samples {
            let classified = if value <= threshold { 1.0 } else { 0.0 };
            let ok = classified == label;
            all.add(ok);
            if label == 1.0 {
                labeled_pos.add(ok);
            }
            if label == 0.0 {
                labeled_neg.add(ok);
            }
            if classified == 1.0 {
                classed_pos.add(ok);
            } else {
                classed_neg.add(ok);
            }
        }

        let mut feature = Feature::empty();
        feature.set_property("threshold", threshold);
        set_rate(&mut feature, "TPR", labeled_pos.rate());
        set_rate(&mut feature, "FPR", labeled_neg.rate().map(|r| 1.0 - r));
        set_rate(&mut feature, "OA", all.rate());
        set_rate(&mut feature, "Pos_UA", classed_pos.rate());
        set_rate(&mut feature, "Neg_UA", classed_neg.rate());
        feature.set_property("valid_classified", samples.len() as i64);
        out.push(feature);
    }
    Ok(out)
}
