//! Gridded forest and defoliation statistics
//!
//! Summarizes land cover and defoliation over a regular analysis grid
//! and joins the two tables on the shared cell id. Forest area uses the
//! 30 m land-cover raster, defoliation the 10 m score product; the join
//! reconciles the scales per cell.

use defolia_core::{Error, Feature, FeatureCollection, Image, Reducer, Result};
use rayon::prelude::*;

use crate::reduce::{multiply_pixel_area, reduce_regions, ReduceRegionsOptions};

/// Join key every gridded product carries
pub const GRID_ID: &str = "id";

/// Output properties of the forest table
pub const FOREST_BAND: &str = "forest";
pub const DECIDUOUS_BAND: &str = "deciduous";

// NLCD class codes: 41 deciduous, 42 evergreen, 43 mixed
const DECIDUOUS_CLASS: f64 = 41.0;
const FOREST_CLASSES: std::ops::RangeInclusive<f64> = 41.0..=43.0;

/// Forest and deciduous area in square metres per grid cell.
///
/// The first band of `landcover` holds NLCD class codes; forest covers
/// classes 41 through 43, deciduous is class 41 alone. Non-forest
/// classes count as zero area, only nodata pixels are left out.
pub fn forest_grid_stats(
    landcover: &Image,
    grid: &FeatureCollection,
) -> Result<FeatureCollection> {
    let areas = multiply_pixel_area(&landcover_indicators(landcover)?)?;
    reduce_regions(
        &areas,
        grid,
        Reducer::Sum,
        &ReduceRegionsOptions {
            crs: None,
            scale: Some(30.0),
        },
    )
}

/// Score and QA band area sums per grid cell, one property per band.
pub fn defoliation_grid_stats(
    defol: &Image,
    grid: &FeatureCollection,
) -> Result<FeatureCollection> {
    let areas = multiply_pixel_area(defol)?;
    reduce_regions(
        &areas,
        grid,
        Reducer::Sum,
        &ReduceRegionsOptions {
            crs: None,
            scale: Some(10.0),
        },
    )
}

/// Inner join of the two gridded tables on the cell id.
///
/// Cells present on only one side drop out; the output keeps the forest
/// side's geometry and both property sets. Colliding property names are
/// an error, so rename score bands before reducing when joining several
/// years.
pub fn grid_join(
    forest_stats: &FeatureCollection,
    defol_stats: &FeatureCollection,
) -> Result<FeatureCollection> {
    forest_stats.inner_join(defol_stats, GRID_ID)
}

/// Two indicator bands from a class raster, NaN only where the input
/// has no data.
fn landcover_indicators(landcover: &Image) -> Result<Image> {
    let name = landcover
        .band_names()
        .first()
        .copied()
        .ok_or_else(|| Error::BandNotFound("landcover".to_string()))?;
    let classes = landcover.band(name)?;
    let (rows, cols) = classes.shape();

    let cells: Vec<[f64; 2]> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![[f64::NAN; 2]; cols];
            for col in 0..cols {
                if !landcover.is_valid(row, col) {
                    continue;
                }
                let v = unsafe { classes.get_unchecked(row, col) };
                if v.is_nan() {
                    continue;
                }
                row_data[col] = [
                    if FOREST_CLASSES.contains(&v) { 1.0 } else { 0.0 },
                    if v == DECIDUOUS_CLASS { 1.0 } else { 0.0 },
                ];
            }
            row_data
        })
        .collect();

    let names = [FOREST_BAND, DECIDUOUS_BAND];
    let mut bands = Vec::with_capacity(names.len());
    for (k, band_name) in names.iter().enumerate() {
        let data: Vec<f64> = cells.iter().map(|cell| cell[k]).collect();
        bands.push((
            band_name.to_string(),
            crate::util::build_output(classes, data)?,
        ));
    }
    Image::from_bands(bands)?.update_mask(&landcover.mask_band())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use defolia_core::raster::{GeoTransform, Raster};
    use defolia_core::vector::{covering_grid, GridParams};
    use defolia_core::Crs;

    fn class_image(values: &[f64], rows: usize, cols: usize) -> Image {
        let mut band = Raster::from_vec(values.to_vec(), rows, cols).unwrap();
        band.set_transform(GeoTransform::north_up(0.0, rows as f64 * 30.0, 30.0));
        band.set_nodata(Some(f64::NAN));
        Image::from_band("landcover", band).unwrap()
    }

    fn analysis_grid(bounds: (f64, f64, f64, f64), cell_size: f64) -> FeatureCollection {
        covering_grid(
            bounds,
            &GridParams {
                crs: Crs::conus_albers(),
                cell_size,
            },
        )
    }

    fn cell<'a>(table: &'a FeatureCollection, id: &str) -> &'a Feature {
        table.iter().find(|f| f.id.as_deref() == Some(id)).unwrap()
    }

    #[test]
    fn test_forest_areas_per_cell() {
        #[rustfmt::skip]
        let landcover = class_image(&[
            41.0, 41.0, 42.0, 42.0,
            41.0, 41.0, 42.0, 42.0,
            11.0, 11.0, 43.0, 43.0,
            11.0, 11.0, 43.0, 43.0,
        ], 4, 4);
        let grid = analysis_grid((0.0, 0.0, 120.0, 120.0), 60.0);

        let table = forest_grid_stats(&landcover, &grid).unwrap();
        assert_eq!(table.len(), 4);

        // top-left quadrant is all deciduous
        let deciduous = cell(&table, "0_1");
        assert_relative_eq!(deciduous.get_number(FOREST_BAND).unwrap(), 3600.0);
        assert_relative_eq!(deciduous.get_number(DECIDUOUS_BAND).unwrap(), 3600.0);

        // evergreen counts as forest but not deciduous
        let evergreen = cell(&table, "1_1");
        assert_relative_eq!(evergreen.get_number(FOREST_BAND).unwrap(), 3600.0);
        assert_relative_eq!(evergreen.get_number(DECIDUOUS_BAND).unwrap(), 0.0);

        // open water is zero forest, not Null
        let water = cell(&table, "0_0");
        assert_relative_eq!(water.get_number(FOREST_BAND).unwrap(), 0.0);
    }

    #[test]
    fn test_defoliation_sums_per_cell() {
        let mut band = Raster::from_vec(vec![0.5, 0.25, 1.0, f64::NAN], 2, 2).unwrap();
        band.set_transform(GeoTransform::north_up(0.0, 60.0, 30.0));
        band.set_nodata(Some(f64::NAN));
        let defol = Image::from_band("defoliation", band).unwrap();

        let grid = analysis_grid((0.0, 0.0, 60.0, 60.0), 60.0);
        let table = defoliation_grid_stats(&defol, &grid).unwrap();

        let only = cell(&table, "0_0");
        assert_relative_eq!(only.get_number("defoliation").unwrap(), 1575.0);
    }

    #[test]
    fn test_join_drops_single_sided_cells() {
        let forest = FeatureCollection::from_features(vec![
            Feature::point(0.0, 0.0)
                .with_property(GRID_ID, "0_0")
                .with_property(FOREST_BAND, 3600.0),
            Feature::point(1.0, 0.0)
                .with_property(GRID_ID, "1_0")
                .with_property(FOREST_BAND, 1800.0),
        ]);
        let defol = FeatureCollection::from_features(vec![Feature::empty()
            .with_property(GRID_ID, "0_0")
            .with_property("defoliation", 900.0)]);

        let joined = grid_join(&forest, &defol).unwrap();
        assert_eq!(joined.len(), 1);
        let f = joined.first().unwrap();
        assert_eq!(f.get_number(FOREST_BAND), Some(3600.0));
        assert_eq!(f.get_number("defoliation"), Some(900.0));
        assert!(f.geometry.is_some());
    }
}
