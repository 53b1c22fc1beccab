//! Per-pixel seasonal trend models
//!
//! Two fits over a preprocessed collection: a robust Theil-Sen line of
//! EVI against day of year, and a six-term harmonic ordinary least
//! squares. Both emit coefficient images a scoring pass subtracts real
//! observations from.

use chrono::{DateTime, Utc};
use defolia_core::raster::Raster;
use defolia_core::{Error, Image, ImageCollection, Result};
use nalgebra::{Matrix6, Vector6};
use rayon::prelude::*;

use crate::preprocess::EVI_BAND;

/// Coefficient band names for [`sens_slope`]
pub const SLOPE_BAND: &str = "slope";
pub const OFFSET_BAND: &str = "offset";

/// Coefficient band names for [`harmonic_fit`], by predictor. `sin_12`
/// is the annual term, `sin_4` the four-month harmonic.
pub const HARMONIC_BANDS: [&str; 6] = ["constant", "days", "sin_12", "cos_12", "sin_4", "cos_4"];

const DAYS_PER_YEAR: f64 = 365.25;
const SECONDS_PER_DAY: f64 = 86_400.0;

/// Per-pixel Theil-Sen fit of `y_band` against `x_band`.
///
/// The slope is the median of slopes between all sample pairs with
/// distinct x; the offset is `median(y) - slope * median(x)`. Pixels
/// with fewer than two usable samples are masked. Returns `None` for an
/// empty collection.
pub fn sens_slope(
    collection: &ImageCollection,
    x_band: &str,
    y_band: &str,
) -> Result<Option<Image>> {
    let Some(template) = collection.first() else {
        return Ok(None);
    };
    let (rows, cols) = template.shape();

    let mut sources = Vec::with_capacity(collection.len());
    for image in collection.iter() {
        if image.shape() != (rows, cols) {
            return Err(Error::SizeMismatch {
                er: rows,
                ec: cols,
                ar: image.rows(),
                ac: image.cols(),
            });
        }
        sources.push((image, image.band(x_band)?, image.band(y_band)?));
    }

    let fitted: Vec<(Vec<f64>, Vec<f64>)> = (0..rows)
        .into_par_iter()
        .map(|row| {
            let mut slope_row = vec![f64::NAN; cols];
            let mut offset_row = vec![f64::NAN; cols];
            for col in 0..cols {
                let mut xs = Vec::new();
                let mut ys = Vec::new();
                for (image, x, y) in &sources {
                    if !image.is_valid(row, col) {
                        continue;
                    }
                    // SAFETY: shapes validated against the template
                    let xv = unsafe { x.get_unchecked(row, col) };
                    let yv = unsafe { y.get_unchecked(row, col) };
                    if xv.is_nan() || yv.is_nan() {
                        continue;
                    }
                    xs.push(xv);
                    ys.push(yv);
                }

                let mut slopes = Vec::new();
                for i in 0..xs.len() {
                    for j in (i + 1)..xs.len() {
                        let dx = xs[j] - xs[i];
                        if dx.abs() > 1e-10 {
                            slopes.push((ys[j] - ys[i]) / dx);
                        }
                    }
                }
                if slopes.is_empty() {
                    continue;
                }
                let slope = median(&mut slopes);
                slope_row[col] = slope;
                offset_row[col] = median(&mut ys) - slope * median(&mut xs);
            }
            (slope_row, offset_row)
        })
        .collect();

    let mut slope_data = Vec::with_capacity(rows * cols);
    let mut offset_data = Vec::with_capacity(rows * cols);
    for (slope_row, offset_row) in fitted {
        slope_data.extend(slope_row);
        offset_data.extend(offset_row);
    }

    let reference = template.band(y_band)?;
    let image = Image::from_bands(vec![
        (
            SLOPE_BAND.to_string(),
            crate::util::build_output(reference, slope_data)?,
        ),
        (
            OFFSET_BAND.to_string(),
            crate::util::build_output(reference, offset_data)?,
        ),
    ])?;
    let image = crate::util::mask_nan_pixels(image)?.with_property("method", "Theil-Sen");
    Ok(Some(image))
}

/// Settings for the harmonic fit
#[derive(Debug, Clone)]
pub struct HarmonicParams {
    /// Epoch the linear `days` predictor counts from
    pub start: DateTime<Utc>,
    /// Band regressed on the harmonic design
    pub y_band: String,
}

impl HarmonicParams {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            start,
            y_band: EVI_BAND.to_string(),
        }
    }
}

/// Per-pixel OLS of `y_band` on `[1, days, sin_12, cos_12, sin_4,
/// cos_4]`, solved through the normal equations.
///
/// Pixels with fewer samples than predictors, or a singular design, are
/// masked. Returns `None` for an empty collection.
pub fn harmonic_fit(
    collection: &ImageCollection,
    params: &HarmonicParams,
) -> Result<Option<Image>> {
    let Some(template) = collection.first() else {
        return Ok(None);
    };
    let (rows, cols) = template.shape();

    // the design row is constant per image
    let mut sources: Vec<(&Image, &Raster<f64>, Vector6<f64>)> =
        Vec::with_capacity(collection.len());
    for image in collection.iter() {
        if image.shape() != (rows, cols) {
            return Err(Error::SizeMismatch {
                er: rows,
                ec: cols,
                ar: image.rows(),
                ac: image.cols(),
            });
        }
        let ts = image.timestamp().ok_or(Error::MissingTimestamp)?;
        let days = (ts - params.start).num_seconds() as f64 / SECONDS_PER_DAY;
        let annual = days * 2.0 * std::f64::consts::PI / DAYS_PER_YEAR;
        let design = Vector6::new(
            1.0,
            days,
            annual.sin(),
            annual.cos(),
            (3.0 * annual).sin(),
            (3.0 * annual).cos(),
        );
        sources.push((image, image.band(&params.y_band)?, design));
    }
    let sources = &sources;

    let fitted: Vec<Vec<[f64; 6]>> = (0..rows)
        .into_par_iter()
        .map(|row| {
            let mut out_row = vec![[f64::NAN; 6]; cols];
            for col in 0..cols {
                let mut xtx = Matrix6::<f64>::zeros();
                let mut xty = Vector6::<f64>::zeros();
                let mut count = 0usize;
                for (image, y, design) in sources {
                    if !image.is_valid(row, col) {
                        continue;
                    }
                    // SAFETY: shapes validated against the template
                    let yv = unsafe { y.get_unchecked(row, col) };
                    if yv.is_nan() {
                        continue;
                    }
                    xtx += design * design.transpose();
                    xty += design * yv;
                    count += 1;
                }
                if count < 6 {
                    continue;
                }
                if let Some(beta) = xtx.lu().solve(&xty) {
                    for (k, slot) in out_row[col].iter_mut().enumerate() {
                        *slot = beta[k];
                    }
                }
            }
            out_row
        })
        .collect();

    let reference = template.band(&params.y_band)?;
    let mut bands = Vec::with_capacity(HARMONIC_BANDS.len());
    for (k, name) in HARMONIC_BANDS.iter().enumerate() {
        let data: Vec<f64> = fitted
            .iter()
            .flat_map(|row| row.iter().map(move |coeffs| coeffs[k]))
            .collect();
        bands.push((name.to_string(), crate::util::build_output(reference, data)?));
    }

    let image = crate::util::mask_nan_pixels(Image::from_bands(bands)?)?
        .with_property("method", "harmonic");
    Ok(Some(image))
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = values.len();
    if n % 2 == 0 {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    } else {
        values[n / 2]
    }
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

    fn sample(doy: u32, evi: f64) -> Image {
        Image::from_bands(vec![
            (EVI_BAND.to_string(), make_band(&[evi; 4], 2, 2)),
            (DOY_BAND.to_string(), make_band(&[doy as f64; 4], 2, 2)),
        ])
        .unwrap()
        .with_timestamp(
            chrono::Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap()
                + chrono::Duration::days(doy as i64 - 1),
        )
    }

    #[test]
    fn test_sens_slope_recovers_line() {
        let images: Vec<Image> = [100u32, 150, 200]
            .iter()
            .map(|&doy| sample(doy, 0.001 * doy as f64 + 0.2))
            .collect();

        let fit = sens_slope(&ImageCollection::from_images(images), DOY_BAND, EVI_BAND)
            .unwrap()
            .unwrap();
        assert_relative_eq!(
            fit.band(SLOPE_BAND).unwrap().get(0, 0).unwrap(),
            0.001,
            epsilon = 1e-12
        );
        assert_relative_eq!(
            fit.band(OFFSET_BAND).unwrap().get(0, 0).unwrap(),
            0.2,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_sens_slope_shrugs_off_outlier() {
        let mut images: Vec<Image> = [100u32, 120, 140, 160, 180]
            .iter()
            .map(|&doy| sample(doy, 0.001 * doy as f64 + 0.2))
            .collect();
        images.push(sample(200, 5.0));

        let fit = sens_slope(&ImageCollection::from_images(images), DOY_BAND, EVI_BAND)
            .unwrap()
            .unwrap();
        assert_relative_eq!(
            fit.band(SLOPE_BAND).unwrap().get(0, 0).unwrap(),
            0.001,
            epsilon = 1e-12
        );
        assert_relative_eq!(
            fit.band(OFFSET_BAND).unwrap().get(0, 0).unwrap(),
            0.2,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_sens_slope_needs_two_samples() {
        let fit = sens_slope(
            &ImageCollection::from_images(vec![sample(100, 0.5)]),
            DOY_BAND,
            EVI_BAND,
        )
        .unwrap()
        .unwrap();
        assert!(!fit.is_valid(0, 0));

        let empty = sens_slope(&ImageCollection::new(), DOY_BAND, EVI_BAND).unwrap();
        assert!(empty.is_none());
    }

    #[test]
    fn test_harmonic_fit_recovers_coefficients() {
        let start = chrono::Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
        let truth = [0.3, 0.0005, 0.05, -0.02, 0.01, 0.003];

        let images: Vec<Image> = (0..12)
            .map(|m| {
                let days = (15 + 30 * m) as f64;
                let annual = days * 2.0 * std::f64::consts::PI / DAYS_PER_YEAR;
                let evi = truth[0]
                    + truth[1] * days
                    + truth[2] * annual.sin()
                    + truth[3] * annual.cos()
                    + truth[4] * (3.0 * annual).sin()
                    + truth[5] * (3.0 * annual).cos();
                Image::from_band(EVI_BAND, make_band(&[evi; 4], 2, 2))
                    .unwrap()
                    .with_timestamp(start + chrono::Duration::days(15 + 30 * m))
            })
            .collect();

        let fit = harmonic_fit(
            &ImageCollection::from_images(images),
            &HarmonicParams::new(start),
        )
        .unwrap()
        .unwrap();

        for (name, expected) in HARMONIC_BANDS.iter().zip(truth.iter()) {
            let got = fit.band(name).unwrap().get(1, 1).unwrap();
            assert_relative_eq!(got, *expected, epsilon = 1e-8);
        }
    }

    #[test]
    fn test_harmonic_fit_underdetermined_is_masked() {
        let start = chrono::Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
        let images: Vec<Image> = (0..4)
            .map(|m| {
                Image::from_band(EVI_BAND, make_band(&[0.5; 4], 2, 2))
                    .unwrap()
                    .with_timestamp(start + chrono::Duration::days(30 * m))
            })
            .collect();

        let fit = harmonic_fit(
            &ImageCollection::from_images(images),
            &HarmonicParams::new(start),
        )
        .unwrap()
        .unwrap();
        assert!(!fit.is_valid(0, 0));
    }
}
