//! Region reduction: collapse image pixels over features
//!
//! Each feature collects the valid pixels its geometry covers and
//! reduces them to one value per band, attached as a property named
//! after the band. A region with no valid pixels gets Null, never zero;
//! downstream filters rely on that distinction.

use defolia_core::raster::GeoTransform;
use defolia_core::{
    Crs, Error, Feature, FeatureCollection, Image, PropertyValue, Reducer, Result,
};
use geo::{BoundingRect, Contains};
use geo_types::{Geometry, Point};
use rayon::prelude::*;

/// Options for region reduction.
///
/// The image grid is sampled as-is; `crs` is checked against the image
/// and `scale` is recorded for provenance, neither resamples.
#[derive(Debug, Clone, Default)]
pub struct ReduceRegionsOptions {
    /// CRS the feature coordinates are expressed in
    pub crs: Option<Crs>,
    /// Nominal sampling scale in metres
    pub scale: Option<f64>,
}

/// Reduce the image's valid pixels over every feature.
///
/// Polygons cover the pixels whose center they contain, points sample
/// the pixel they fall in. Output features keep their geometry, id and
/// existing properties and gain one property per band.
pub fn reduce_regions(
    image: &Image,
    features: &FeatureCollection,
    reducer: Reducer,
    options: &ReduceRegionsOptions,
) -> Result<FeatureCollection> {
    if let (Some(image_crs), Some(feature_crs)) = (image.crs(), options.crs.as_ref()) {
        if !image_crs.is_equivalent(feature_crs) {
            return Err(Error::CrsMismatch(
                image_crs.identifier(),
                feature_crs.identifier(),
            ));
        }
    }
    if let Some(scale) = options.scale {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(Error::InvalidParameter {
                name: "scale",
                value: scale.to_string(),
                reason: "sampling scale must be positive".to_string(),
            });
        }
    }

    let band_names = image.band_names();
    let mut out = Vec::with_capacity(features.len());
    for feature in features.iter() {
        let mut reduced = feature.clone();
        let pixels = covered_pixels(image, feature.geometry.as_ref());

        for name in &band_names {
            let band = image.band(name)?;
            let mut sum = 0.0;
            let mut first = 0.0;
            let mut count = 0usize;
            for &(row, col) in &pixels {
                if !image.is_valid(row, col) {
                    continue;
                }
                // SAFETY: covered_pixels only yields in-bounds indices
                let v = unsafe { band.get_unchecked(row, col) };
                if v.is_nan() {
                    continue;
                }
                count += 1;
                if count == 1 {
                    first = v;
                }
                sum += v;
            }
            match reducer.finish(sum, first, count) {
                Some(value) => reduced.set_property(*name, value),
                None => reduced.set_property(*name, PropertyValue::Null),
            }
        }
        out.push(reduced);
    }
    Ok(FeatureCollection::from_features(out))
}

/// Pixel indices a geometry covers. Polygons and other areal shapes use
/// center containment over the bounding-box pixel window; points map
/// straight to their pixel.
fn covered_pixels(image: &Image, geometry: Option<&Geometry<f64>>) -> Vec<(usize, usize)> {
    let Some(geometry) = geometry else {
        return Vec::new();
    };
    let (rows, cols) = image.shape();
    let transform = image.transform();

    match geometry {
        Geometry::Point(p) => point_pixel(transform, rows, cols, p.x(), p.y())
            .into_iter()
            .collect(),
        Geometry::MultiPoint(mp) => mp
            .0
            .iter()
            .filter_map(|p| point_pixel(transform, rows, cols, p.x(), p.y()))
            .collect(),
        other => {
            let Some(rect) = other.bounding_rect() else {
                return Vec::new();
            };

            let corners = [
                (rect.min().x, rect.min().y),
                (rect.min().x, rect.max().y),
                (rect.max().x, rect.min().y),
                (rect.max().x, rect.max().y),
            ];
            let mut min_col = f64::INFINITY;
            let mut max_col = f64::NEG_INFINITY;
            let mut min_row = f64::INFINITY;
            let mut max_row = f64::NEG_INFINITY;
            for (x, y) in corners {
                let (col, row) = transform.geo_to_pixel(x, y);
                min_col = min_col.min(col);
                max_col = max_col.max(col);
                min_row = min_row.min(row);
                max_row = max_row.max(row);
            }
            if !min_col.is_finite() || !min_row.is_finite() {
                return Vec::new();
            }

            let row_start = min_row.floor().max(0.0) as usize;
            let row_end = (max_row.ceil().max(0.0) as usize).min(rows);
            let col_start = min_col.floor().max(0.0) as usize;
            let col_end = (max_col.ceil().max(0.0) as usize).min(cols);

            let mut pixels = Vec::new();
            for row in row_start..row_end {
                for col in col_start..col_end {
                    let (x, y) = transform.pixel_to_geo(col, row);
                    if other.contains(&Point::new(x, y)) {
                        pixels.push((row, col));
                    }
                }
            }
            pixels
        }
    }
}

fn point_pixel(
    transform: &GeoTransform,
    rows: usize,
    cols: usize,
    x: f64,
    y: f64,
) -> Option<(usize, usize)> {
    let (col, row) = transform.geo_to_pixel(x, y);
    let (col, row) = (col.floor(), row.floor());
    if col < 0.0 || row < 0.0 || col >= cols as f64 || row >= rows as f64 {
        return None;
    }
    Some((row as usize, col as usize))
}

/// Multiply every band by the true ground area of its pixel, in square
/// metres. Indicator bands become per-pixel areas this way, so summing
/// them yields area totals that stay honest at high latitudes.
pub fn multiply_pixel_area(image: &Image) -> Result<Image> {
    let (rows, cols) = image.shape();
    let mut bands = Vec::with_capacity(image.band_count());
    for name in image.band_names() {
        let band = image.band(name)?;
        let data: Vec<f64> = (0..rows)
            .into_par_iter()
            .flat_map(|row| {
                let area = image.pixel_area(row);
                let mut row_data = vec![f64::NAN; cols];
                for col in 0..cols {
                    let v = unsafe { band.get_unchecked(row, col) };
                    if !v.is_nan() {
                        row_data[col] = v * area;
                    }
                }
                row_data
            })
            .collect();
        bands.push((name.to_string(), crate::util::build_output(band, data)?));
    }

    let mut out = Image::from_bands(bands)?.update_mask(&image.mask_band())?;
    for (key, value) in image.properties() {
        out.set_property(key.clone(), value.clone());
    }
    if let Some(ts) = image.timestamp() {
        out = out.with_timestamp(ts);
    }
    Ok(out)
}
