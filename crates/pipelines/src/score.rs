//! Defoliation scoring against a fitted seasonal baseline
//!
//! The anomaly path subtracts the trend prediction `slope*doy + offset`
//! from each observation and averages the residual over the summer
//! window; healthy canopy sits near zero, defoliation goes negative.
//! The means path skips the model and differences two summer means
//! directly.

use defolia_core::raster::Raster;
use defolia_core::{Error, Image, ImageCollection, Result};
use rayon::prelude::*;

use crate::preprocess::EVI_BAND;
use crate::trend::{OFFSET_BAND, SLOPE_BAND};

/// Primary score band shared by both methods
pub const SCORE_BAND: &str = "mean_intensity";

/// Timing and quality bands of the anomaly method
pub const START_DATE_BAND: &str = "start_date";
pub const END_DATE_BAND: &str = "end_date";
pub const MID_DATE_BAND: &str = "mid_date";
pub const PEAK_DATE_BAND: &str = "peak_date";
pub const QA_MASK_BAND: &str = "qa_mask";

/// Settings shared by the scoring methods
#[derive(Debug, Clone)]
pub struct ScoreParams {
    /// Inclusive day-of-year window the score averages over
    pub window_start: u16,
    pub window_end: u16,
    /// Band scored against the baseline
    pub y_band: String,
    /// Anomaly at or below this counts as an intense observation for
    /// the timing bands
    pub intense_threshold: f64,
    /// Valid window observations needed for `qa_mask` to read 1
    pub min_observations: usize,
}

impl Default for ScoreParams {
    fn default() -> Self {
        Self {
            window_start: 161,
            window_end: 208,
            y_band: EVI_BAND.to_string(),
            intense_threshold: -0.1,
            min_observations: 4,
        }
    }
}

/// Score a year of scenes against a fitted trend image.
///
/// Per scene, `anom = y - (slope*doy + offset)`; the output's
/// `mean_intensity` is the mean anomaly inside the window. Timing bands
/// hold the day-of-year extent and the most negative observation of the
/// intense anomalies, NaN where none occurred. `qa_mask` flags pixels
/// with enough valid window observations to trust the score. Returns
/// `None` when no scene falls in the window.
pub fn seasonal_anomaly_score(
    collection: &ImageCollection,
    trend: &Image,
    params: &ScoreParams,
) -> Result<Option<Image>> {
    let window = collection.filter_day_of_year(params.window_start, params.window_end);
    let Some(template) = window.first() else {
        return Ok(None);
    };
    let (rows, cols) = template.shape();
    if trend.shape() != (rows, cols) {
        return Err(Error::SizeMismatch {
            er: rows,
            ec: cols,
            ar: trend.rows(),
            ac: trend.cols(),
        });
    }
    let year = template.year()?;
    let slope = trend.band(SLOPE_BAND)?;
    let offset = trend.band(OFFSET_BAND)?;

    // per-scene anomaly rasters; doy is constant within a scene
    let mut scenes: Vec<(Raster<f64>, f64)> = Vec::with_capacity(window.len());
    for image in window.iter() {
        if image.shape() != (rows, cols) {
            return Err(Error::SizeMismatch {
                er: rows,
                ec: cols,
                ar: image.rows(),
                ac: image.cols(),
            });
        }
        let y = image.band(&params.y_band)?;
        let doy = image.day_of_year()? as f64;
        let data: Vec<f64> = (0..rows)
            .into_par_iter()
            .flat_map(|row| {
                let mut row_data = vec![f64::NAN; cols];
                for col in 0..cols {
                    if !image.is_valid(row, col) {
                        continue;
                    }
                    // SAFETY: shapes validated against the template
                    let yv = unsafe { y.get_unchecked(row, col) };
                    let sv = unsafe { slope.get_unchecked(row, col) };
                    let ov = unsafe { offset.get_unchecked(row, col) };
                    if yv.is_nan() || sv.is_nan() || ov.is_nan() {
                        continue;
                    }
                    row_data[col] = yv - (sv * doy + ov);
                }
                row_data
            })
            .collect();
        scenes.push((crate::util::build_output(y, data)?, doy));
    }
    let scenes = &scenes;

    let stats: Vec<Vec<[f64; 6]>> = (0..rows)
        .into_par_iter()
        .map(|row| {
            let mut out_row = vec![[f64::NAN; 6]; cols];
            for col in 0..cols {
                let mut sum = 0.0;
                let mut count = 0usize;
                let mut start = f64::INFINITY;
                let mut end = f64::NEG_INFINITY;
                let mut peak_doy = f64::NAN;
                let mut peak_anom = f64::INFINITY;
                for (anom, doy) in scenes {
                    let a = unsafe { anom.get_unchecked(row, col) };
                    if a.is_nan() {
                        continue;
                    }
                    count += 1;
                    sum += a;
                    if a <= params.intense_threshold {
                        start = start.min(*doy);
                        end = end.max(*doy);
                        if a < peak_anom {
                            peak_anom = a;
                            peak_doy = *doy;
                        }
                    }
                }
                if count == 0 {
                    continue;
                }
                let cell = &mut out_row[col];
                cell[0] = sum / count as f64;
                if start.is_finite() {
                    cell[1] = start;
                    cell[2] = end;
                    cell[3] = (start + end) / 2.0;
                    cell[4] = peak_doy;
                }
                cell[5] = if count >= params.min_observations {
                    1.0
                } else {
                    0.0
                };
            }
            out_row
        })
        .collect();

    let names = [
        SCORE_BAND,
        START_DATE_BAND,
        END_DATE_BAND,
        MID_DATE_BAND,
        PEAK_DATE_BAND,
        QA_MASK_BAND,
    ];
    let reference = &scenes[0].0;
    let mut bands = Vec::with_capacity(names.len());
    for (k, name) in names.iter().enumerate() {
        let data: Vec<f64> = stats
            .iter()
            .flat_map(|row| row.iter().map(move |cell| cell[k]))
            .collect();
        bands.push((name.to_string(), crate::util::build_output(reference, data)?));
    }

    let image = crate::util::mask_nan_pixels(Image::from_bands(bands)?)?
        .with_property("method", "anomaly")
        .with_property("year", year as i64);
    Ok(Some(image))
}

/// Difference of two summer means: target year minus baseline year.
///
/// Emits `mean_intensity` with `year`, `baseyear` and method `"means"`.
/// Returns `None` when either window is empty.
pub fn paired_means_score(
    target: &ImageCollection,
    baseline: &ImageCollection,
    params: &ScoreParams,
) -> Result<Option<Image>> {
    let target_window = target.filter_day_of_year(params.window_start, params.window_end);
    let baseline_window = baseline.filter_day_of_year(params.window_start, params.window_end);
    let (Some(target_first), Some(baseline_first)) =
        (target_window.first(), baseline_window.first())
    else {
        return Ok(None);
    };
    let year = target_first.year()?;
    let baseyear = baseline_first.year()?;

    let y = params.y_band.as_str();
    let (Some(target_mean), Some(baseline_mean)) = (
        target_window.select(&[y])?.mean()?,
        baseline_window.select(&[y])?.mean()?,
    ) else {
        return Ok(None);
    };

    let t = target_mean.band(y)?;
    let b = baseline_mean.band(y)?;
    crate::util::check_dimensions(t, b)?;

    let (rows, cols) = t.shape();
    let data: Vec<f64> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![f64::NAN; cols];
            for col in 0..cols {
                let tv = unsafe { t.get_unchecked(row, col) };
                let bv = unsafe { b.get_unchecked(row, col) };
                if !tv.is_nan() && !bv.is_nan() {
                    row_data[col] = tv - bv;
                }
            }
            row_data
        })
        .collect();

    let band = crate::util::build_output(t, data)?;
    let image = crate::util::mask_nan_pixels(Image::from_band(SCORE_BAND, band)?)?
        .with_property("method", "means")
        .with_property("year", year as i64)
        .with_property("baseyear", baseyear as i64);
    Ok(Some(image))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::DOY_BAND;
    use approx::assert_relative_eq;
    use chrono::TimeZone;

    fn make_band(values: &[f64], rows: usize, cols: usize) -> Raster<f64> {
        let mut band = Raster::from_vec(values.to_vec(), rows, cols).unwrap();
        band.set_nodata(Some(f64::NAN));
        band
    }

    fn scene(year: i32, doy: u32, evi: f64) -> Image {
        Image::from_bands(vec![
            (EVI_BAND.to_string(), make_band(&[evi; 4], 2, 2)),
            (DOY_BAND.to_string(), make_band(&[doy as f64; 4], 2, 2)),
        ])
        .unwrap()
        .with_timestamp(
            chrono::Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).unwrap()
                + chrono::Duration::days(doy as i64 - 1),
        )
    }

    fn flat_trend(slope: f64, offset: f64) -> Image {
        Image::from_bands(vec![
            (SLOPE_BAND.to_string(), make_band(&[slope; 4], 2, 2)),
            (OFFSET_BAND.to_string(), make_band(&[offset; 4], 2, 2)),
        ])
        .unwrap()
    }

    #[test]
    fn test_anomaly_score_and_timing() {
        let collection = ImageCollection::from_images(vec![
            scene(2021, 100, 0.9), // outside the window
            scene(2021, 170, 0.4),
            scene(2021, 180, 0.3),
        ]);
        let params = ScoreParams {
            min_observations: 2,
            ..Default::default()
        };

        let defol = seasonal_anomaly_score(&collection, &flat_trend(0.0, 0.5), &params)
            .unwrap()
            .unwrap();

        // anomalies -0.1 and -0.2 inside the window
        let score = defol.band(SCORE_BAND).unwrap().get(0, 0).unwrap();
        assert_relative_eq!(score, -0.15, epsilon = 1e-12);
        assert_eq!(defol.band(START_DATE_BAND).unwrap().get(0, 0).unwrap(), 170.0);
        assert_eq!(defol.band(END_DATE_BAND).unwrap().get(0, 0).unwrap(), 180.0);
        assert_eq!(defol.band(MID_DATE_BAND).unwrap().get(0, 0).unwrap(), 175.0);
        // the most negative anomaly names the peak
        assert_eq!(defol.band(PEAK_DATE_BAND).unwrap().get(0, 0).unwrap(), 180.0);
        assert_eq!(defol.band(QA_MASK_BAND).unwrap().get(0, 0).unwrap(), 1.0);
        assert_eq!(defol.property_number("year"), Some(2021.0));
    }

    #[test]
    fn test_mild_anomaly_leaves_timing_unset() {
        let collection = ImageCollection::from_images(vec![scene(2021, 200, 0.35)]);
        let trend = flat_trend(0.001, 0.2);

        let defol = seasonal_anomaly_score(&collection, &trend, &ScoreParams::default())
            .unwrap()
            .unwrap();

        // predicted 0.4, observed 0.35: above the intense threshold
        let score = defol.band(SCORE_BAND).unwrap().get(0, 0).unwrap();
        assert_relative_eq!(score, -0.05, epsilon = 1e-12);
        assert!(defol.band(START_DATE_BAND).unwrap().get(0, 0).unwrap().is_nan());
        // one observation, default minimum is four
        assert_eq!(defol.band(QA_MASK_BAND).unwrap().get(0, 0).unwrap(), 0.0);
    }

    #[test]
    fn test_empty_window_is_none() {
        let collection = ImageCollection::from_images(vec![scene(2021, 100, 0.9)]);
        let result =
            seasonal_anomaly_score(&collection, &flat_trend(0.0, 0.5), &ScoreParams::default())
                .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_paired_means() {
        let target = ImageCollection::from_images(vec![
            scene(2021, 170, 0.25),
            scene(2021, 180, 0.35),
        ]);
        let baseline = ImageCollection::from_images(vec![scene(2019, 175, 0.5)]);

        let defol = paired_means_score(&target, &baseline, &ScoreParams::default())
            .unwrap()
            .unwrap();
        let score = defol.band(SCORE_BAND).unwrap().get(0, 0).unwrap();
        assert_relative_eq!(score, -0.2, epsilon = 1e-12);
        assert_eq!(defol.property_number("year"), Some(2021.0));
        assert_eq!(defol.property_number("baseyear"), Some(2019.0));
    }
}
