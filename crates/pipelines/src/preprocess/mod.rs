//! Per-scene sensor preprocessing
//!
//! Each sensor path produces the same contract: images with an `EVI`
//! band and a `doy` band, a validity mask built from the sensor's QA
//! tests, the acquisition timestamp preserved, and a `source` property
//! naming the path. Downstream stages never care which sensor a scene
//! came from.

mod landsat;
mod modis;
mod sentinel2;

pub use landsat::{preprocess_landsat, HARMONIZED_BANDS, L7_SR_BANDS, L8_SR_BANDS};
pub use modis::preprocess_modis;
pub use sentinel2::{preprocess_sentinel2, CLEAR_THRESHOLD, CLOUD_SCORE_BAND};

use crate::util::{build_mask, is_nodata_f64};
use defolia_core::raster::Raster;
use defolia_core::{Error, Image, Result};
use rayon::prelude::*;

/// Common band vocabulary after harmonization
pub const BLUE: &str = "BLUE";
pub const GREEN: &str = "GREEN";
pub const RED: &str = "RED";
pub const NIR: &str = "NIR";
pub const SWIR1: &str = "SWIR1";
pub const SWIR2: &str = "SWIR2";

/// Output band names shared by every sensor path
pub const EVI_BAND: &str = "EVI";
pub const DOY_BAND: &str = "doy";

/// Landcover-class window treated as forest
#[derive(Debug, Clone)]
pub struct ForestMask {
    /// Landcover classes, co-registered with the imagery grid
    pub landcover: Raster<i32>,
    /// Inclusive class range counted as forest
    pub min_class: i32,
    pub max_class: i32,
}

impl ForestMask {
    /// NLCD forest-to-shrub classes (41..=71), the Sentinel-2/Landsat choice
    pub fn nlcd(landcover: Raster<i32>) -> Self {
        Self {
            landcover,
            min_class: 41,
            max_class: 71,
        }
    }

    /// IGBP forest classes (1..=5), the MODIS choice
    pub fn igbp(landcover: Raster<i32>) -> Self {
        Self {
            landcover,
            min_class: 1,
            max_class: 5,
        }
    }

    fn to_mask(&self, template: &Raster<f64>) -> Result<Raster<u8>> {
        if self.landcover.shape() != template.shape() {
            return Err(Error::SizeMismatch {
                er: template.rows(),
                ec: template.cols(),
                ar: self.landcover.rows(),
                ac: self.landcover.cols(),
            });
        }
        let (rows, cols) = template.shape();
        let data: Vec<u8> = (0..rows)
            .into_par_iter()
            .flat_map(|row| {
                let mut row_data = vec![0u8; cols];
                for col in 0..cols {
                    let class = unsafe { self.landcover.get_unchecked(row, col) };
                    if class >= self.min_class && class <= self.max_class {
                        row_data[col] = 1;
                    }
                }
                row_data
            })
            .collect();
        build_mask(template, data)
    }
}

/// Options shared by every sensor path.
///
/// The forest mask defaults to off; applying it is an explicit per-job
/// decision, not a global.
#[derive(Debug, Clone, Default)]
pub struct PreprocessOptions {
    /// Restrict valid pixels to a landcover class window
    pub forest_mask: Option<ForestMask>,
    /// Phenology image with `SoS`/`EoS` day-of-year bands; scenes only
    /// count inside the per-pixel growing season window
    pub phenology: Option<Image>,
}

// ---------------------------------------------------------------------------
// Shared mask builders
// ---------------------------------------------------------------------------

/// 1 where every listed bit of the QA word is clear. NaN QA pixels are
/// invalid.
pub(crate) fn bits_clear_mask(qa: &Raster<f64>, bits: &[u32]) -> Result<Raster<u8>> {
    let (rows, cols) = qa.shape();
    let nodata = qa.nodata();
    let test: u32 = bits.iter().fold(0, |acc, bit| acc | (1 << bit));

    let data: Vec<u8> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![0u8; cols];
            for col in 0..cols {
                let v = unsafe { qa.get_unchecked(row, col) };
                if is_nodata_f64(v, nodata) {
                    continue;
                }
                if (v as u32) & test == 0 {
                    row_data[col] = 1;
                }
            }
            row_data
        })
        .collect();
    build_mask(qa, data)
}

/// 1 where the band is at or above the threshold
pub(crate) fn gte_mask(band: &Raster<f64>, threshold: f64) -> Result<Raster<u8>> {
    let (rows, cols) = band.shape();
    let nodata = band.nodata();

    let data: Vec<u8> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![0u8; cols];
            for col in 0..cols {
                let v = unsafe { band.get_unchecked(row, col) };
                if !is_nodata_f64(v, nodata) && v >= threshold {
                    row_data[col] = 1;
                }
            }
            row_data
        })
        .collect();
    build_mask(band, data)
}

/// AND two masks together
pub(crate) fn intersect_masks(a: &Raster<u8>, b: &Raster<u8>) -> Result<Raster<u8>> {
    if a.shape() != b.shape() {
        return Err(Error::SizeMismatch {
            er: a.rows(),
            ec: a.cols(),
            ar: b.rows(),
            ac: b.cols(),
        });
    }
    let (rows, cols) = a.shape();
    let data: Vec<u8> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![0u8; cols];
            for col in 0..cols {
                let va = unsafe { a.get_unchecked(row, col) };
                let vb = unsafe { b.get_unchecked(row, col) };
                if va != 0 && vb != 0 {
                    row_data[col] = 1;
                }
            }
            row_data
        })
        .collect();
    let mut out = Raster::from_vec(data, rows, cols)?;
    out.set_transform(a.transform().clone());
    out.set_crs(a.crs().cloned());
    Ok(out)
}

/// 1 where `SoS <= doy <= EoS` per pixel
pub(crate) fn phenology_mask(
    phenology: &Image,
    doy: u16,
    template: &Raster<f64>,
) -> Result<Raster<u8>> {
    let sos = phenology.band("SoS")?;
    let eos = phenology.band("EoS")?;
    if sos.shape() != template.shape() {
        return Err(Error::SizeMismatch {
            er: template.rows(),
            ec: template.cols(),
            ar: sos.rows(),
            ac: sos.cols(),
        });
    }

    let (rows, cols) = template.shape();
    let doy = doy as f64;
    let data: Vec<u8> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![0u8; cols];
            for col in 0..cols {
                let s = unsafe { sos.get_unchecked(row, col) };
                let e = unsafe { eos.get_unchecked(row, col) };
                if !s.is_nan() && !e.is_nan() && doy >= s && doy <= e {
                    row_data[col] = 1;
                }
            }
            row_data
        })
        .collect();
    build_mask(template, data)
}

/// `value * factor + offset` per pixel, NaN passed through
pub(crate) fn scale_band(band: &Raster<f64>, factor: f64, offset: f64) -> Result<Raster<f64>> {
    let (rows, cols) = band.shape();
    let nodata = band.nodata();

    let data: Vec<f64> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![f64::NAN; cols];
            for col in 0..cols {
                let v = unsafe { band.get_unchecked(row, col) };
                if !is_nodata_f64(v, nodata) {
                    row_data[col] = v * factor + offset;
                }
            }
            row_data
        })
        .collect();
    crate::util::build_output(band, data)
}

/// Assemble the common output image: EVI + doy bands, QA mask applied,
/// range/forest/phenology tests ANDed in, timestamp and source carried.
pub(crate) fn finish_scene(
    source: &Image,
    evi: Raster<f64>,
    qa_mask: Raster<u8>,
    options: &PreprocessOptions,
    source_name: &str,
) -> Result<Image> {
    let doy = source.day_of_year()?;
    let timestamp = source.timestamp().ok_or(Error::MissingTimestamp)?;

    let doy_band = {
        let mut band = evi.like(doy as f64);
        band.set_nodata(Some(f64::NAN));
        band
    };

    let mut scene = Image::from_bands(vec![
        (EVI_BAND.to_string(), evi),
        (DOY_BAND.to_string(), doy_band),
    ])?;

    scene = scene.update_mask(&qa_mask)?;

    let range_mask = crate::indices::evi_range_mask(scene.band(EVI_BAND)?, 0.0, 1.0)?;
    scene = scene.update_mask(&range_mask)?;

    if let Some(forest) = &options.forest_mask {
        let mask = forest.to_mask(scene.band(EVI_BAND)?)?;
        scene = scene.update_mask(&mask)?;
    }
    if let Some(phenology) = &options.phenology {
        let mask = phenology_mask(phenology, doy, scene.band(EVI_BAND)?)?;
        scene = scene.update_mask(&mask)?;
    }

    Ok(scene
        .with_timestamp(timestamp)
        .with_property("source", source_name))
}

// ---------------------------------------------------------------------------
// Per-year rescaling
// ---------------------------------------------------------------------------

/// Rescale EVI by each year's per-pixel maximum, emitting `EVI_scaled`.
///
/// Years with no scenes are skipped. Output images keep `doy` and the
/// acquisition timestamp.
pub fn rescale_years(
    collection: &defolia_core::ImageCollection,
    start_year: i32,
    end_year: i32,
) -> Result<defolia_core::ImageCollection> {
    use chrono::TimeZone;

    let mut out = defolia_core::ImageCollection::new();
    for year in start_year..=end_year {
        let start = chrono::Utc
            .with_ymd_and_hms(year, 1, 1, 0, 0, 0)
            .single()
            .ok_or_else(|| Error::Other(format!("invalid year {}", year)))?;
        let end = chrono::Utc
            .with_ymd_and_hms(year + 1, 1, 1, 0, 0, 0)
            .single()
            .ok_or_else(|| Error::Other(format!("invalid year {}", year + 1)))?;

        let in_year = collection.filter_date(start, end);
        let Some(year_max) = in_year.select(&[EVI_BAND])?.max()? else {
            tracing::warn!(year, "no scenes in year, skipping rescale");
            continue;
        };
        let max_band = year_max.band(EVI_BAND)?;

        let scaled = in_year.map(|image| {
            let evi = image.band(EVI_BAND)?;
            let (rows, cols) = evi.shape();
            let data: Vec<f64> = (0..rows)
                .into_par_iter()
                .flat_map(|row| {
                    let mut row_data = vec![f64::NAN; cols];
                    for col in 0..cols {
                        let v = unsafe { evi.get_unchecked(row, col) };
                        let m = unsafe { max_band.get_unchecked(row, col) };
                        if !v.is_nan() && !m.is_nan() && m.abs() > 1e-10 {
                            row_data[col] = v / m;
                        }
                    }
                    row_data
                })
                .collect();
            let scaled_band = crate::util::build_output(evi, data)?;
            let mut out_image = image.select(&[DOY_BAND])?;
            out_image.add_band("EVI_scaled", scaled_band)?;
            Ok(out_image)
        })?;

        for image in scaled {
            out.push(image);
        }
    }
    Ok(out)
}
