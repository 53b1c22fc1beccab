//! Vegetation index math
//!
//! The workflow runs on a single index, EVI, computed per scene from
//! surface reflectance bands. Two denominator variants exist and the
//! difference matters: mixing them shifts every downstream anomaly.

use crate::util::{build_output, check_dimensions, is_nodata_f64};
use defolia_core::raster::Raster;
use defolia_core::Result;
use rayon::prelude::*;

/// Parameters for EVI
///
/// `EVI = G * (NIR - Red) / (NIR + C1 * Red - C2 * Blue + L)`
///
/// The default coefficients subtract the blue term, the expression used
/// for the Sentinel-2 series. The harmonized Landsat series (and the
/// MODIS series) historically *added* it; [`EviParams::landsat`] keeps
/// that sign so re-derived scores stay comparable with the archive.
#[derive(Debug, Clone)]
pub struct EviParams {
    /// Gain factor (default: 2.5)
    pub g: f64,
    /// Aerosol coefficient for red band (default: 6.0)
    pub c1: f64,
    /// Aerosol coefficient for blue band (default: 7.5)
    pub c2: f64,
    /// Canopy background adjustment (default: 1.0)
    pub l: f64,
}

impl Default for EviParams {
    fn default() -> Self {
        Self {
            g: 2.5,
            c1: 6.0,
            c2: 7.5,
            l: 1.0,
        }
    }
}

impl EviParams {
    /// Blue-term sign variant used by the harmonized Landsat and MODIS
    /// paths: denominator `NIR + 6*Red + 7.5*Blue + 1`.
    pub fn landsat() -> Self {
        Self {
            c2: -7.5,
            ..Self::default()
        }
    }
}

/// Enhanced Vegetation Index (Huete et al., 2002)
///
/// Pixels where any input is nodata, or where the denominator vanishes,
/// are NaN in the output.
pub fn evi(
    nir: &Raster<f64>,
    red: &Raster<f64>,
    blue: &Raster<f64>,
    params: &EviParams,
) -> Result<Raster<f64>> {
    check_dimensions(nir, red)?;
    check_dimensions(nir, blue)?;

    let (rows, cols) = nir.shape();
    let nodata_nir = nir.nodata();
    let nodata_red = red.nodata();
    let nodata_blue = blue.nodata();

    let data: Vec<f64> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![f64::NAN; cols];
            for col in 0..cols {
                let n = unsafe { nir.get_unchecked(row, col) };
                let r = unsafe { red.get_unchecked(row, col) };
                let b = unsafe { blue.get_unchecked(row, col) };

                if is_nodata_f64(n, nodata_nir)
                    || is_nodata_f64(r, nodata_red)
                    || is_nodata_f64(b, nodata_blue)
                {
                    continue;
                }

                let denom = n + params.c1 * r - params.c2 * b + params.l;
                if denom.abs() < 1e-10 {
                    continue;
                }

                row_data[col] = params.g * (n - r) / denom;
            }
            row_data
        })
        .collect();

    build_output(nir, data)
}

/// Validity mask for an index band: 1 where `lo <= value <= hi`.
///
/// EVI outside [0, 1] over forest means the retrieval failed (snow,
/// residual cloud, shadow); those pixels are masked, not clamped.
pub fn evi_range_mask(index: &Raster<f64>, lo: f64, hi: f64) -> Result<Raster<u8>> {
    let (rows, cols) = index.shape();
    let nodata = index.nodata();

    let data: Vec<u8> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![0u8; cols];
            for col in 0..cols {
                let v = unsafe { index.get_unchecked(row, col) };
                if !is_nodata_f64(v, nodata) && v >= lo && v <= hi {
                    row_data[col] = 1;
                }
            }
            row_data
        })
        .collect();

    crate::util::build_mask(index, data)
}
