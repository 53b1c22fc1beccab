//! Shared helpers for band math over `Raster<f64>`

use defolia_core::raster::Raster;
use defolia_core::{Error, Image, Result};
use ndarray::Array2;
use rayon::prelude::*;

pub(crate) fn is_nodata_f64(value: f64, nodata: Option<f64>) -> bool {
    if value.is_nan() {
        return true;
    }
    match nodata {
        Some(nd) => (value - nd).abs() < f64::EPSILON,
        None => false,
    }
}

pub(crate) fn check_dimensions(a: &Raster<f64>, b: &Raster<f64>) -> Result<()> {
    if a.shape() != b.shape() {
        return Err(Error::SizeMismatch {
            er: a.rows(),
            ec: a.cols(),
            ar: b.rows(),
            ac: b.cols(),
        });
    }
    Ok(())
}

pub(crate) fn build_output(template: &Raster<f64>, data: Vec<f64>) -> Result<Raster<f64>> {
    let (rows, cols) = template.shape();
    let mut output = template.with_same_meta::<f64>();
    output.set_nodata(Some(f64::NAN));
    *output.data_mut() =
        Array2::from_shape_vec((rows, cols), data).map_err(|e| Error::Other(e.to_string()))?;
    Ok(output)
}

pub(crate) fn build_mask(template: &Raster<f64>, data: Vec<u8>) -> Result<Raster<u8>> {
    let (rows, cols) = template.shape();
    let mut mask = template.with_same_meta::<u8>();
    *mask.data_mut() =
        Array2::from_shape_vec((rows, cols), data).map_err(|e| Error::Other(e.to_string()))?;
    Ok(mask)
}

/// Re-mask an assembled image so pixels whose first band is NaN read
/// as no-data. Stats builders fill NaN where a pixel could not be
/// computed; this turns that convention into the mask.
pub(crate) fn mask_nan_pixels(image: Image) -> Result<Image> {
    let names = image.band_names();
    let first = image.band(names[0])?;
    let (rows, cols) = first.shape();
    let data: Vec<u8> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![0u8; cols];
            for col in 0..cols {
                if !unsafe { first.get_unchecked(row, col) }.is_nan() {
                    row_data[col] = 1;
                }
            }
            row_data
        })
        .collect();
    let mask = build_mask(first, data)?;
    image.update_mask(&mask)
}
