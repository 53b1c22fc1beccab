//! Annual defoliated-area accounting over a region
//!
//! For each year the scored scenes mosaic into one map, classify at two
//! severities and integrate pixel areas over the region. The output
//! table feeds the year-over-year acreage summaries.

use std::collections::BTreeSet;

use defolia_core::{
    Feature, FeatureCollection, Image, ImageCollection, PropertyFilter, PropertyValue, Reducer,
    Result,
};
use rayon::prelude::*;
use tracing::warn;

use crate::reduce::{multiply_pixel_area, reduce_regions, ReduceRegionsOptions};
use crate::score::SCORE_BAND;

/// Output bands of the per-year classification
pub const MAPPABLE_BAND: &str = "mappable";
pub const DEFOL_BAND: &str = "defol";
pub const SEVERE_BAND: &str = "severe";

/// Classification cutoffs for the area table
#[derive(Debug, Clone)]
pub struct AreaParams {
    /// Scores strictly below this count as defoliated
    pub defol_threshold: f64,
    /// Scores strictly below this count as severe
    pub severe_threshold: f64,
    /// Score band the thresholds apply to
    pub score_band: String,
    /// Source label whose scenes are left out of the mosaics
    pub exclude_source: Option<String>,
}

impl Default for AreaParams {
    fn default() -> Self {
        Self {
            defol_threshold: -0.04,
            severe_threshold: -0.2,
            score_band: SCORE_BAND.to_string(),
            exclude_source: Some("HLS".to_string()),
        }
    }
}

/// Tabulate mappable, defoliated and severely defoliated area per year.
///
/// Years come from the `year` property of the collection's images. Each
/// row carries `year` plus the three area sums in square metres over
/// the region; a year whose mosaic leaves no valid pixel in the region
/// gets Null sums.
pub fn defoliated_area(
    collection: &ImageCollection,
    region: &Feature,
    params: &AreaParams,
) -> Result<FeatureCollection> {
    let mut years = BTreeSet::new();
    for image in collection.iter() {
        match image.property_number("year") {
            Some(year) => {
                years.insert(year as i64);
            }
            None => warn!("skipping scored image without a year property"),
        }
    }

    let regions = FeatureCollection::from_features(vec![region.clone()]);
    let mut out = FeatureCollection::new();
    for year in years {
        let mut yearly = collection.filter(&PropertyFilter::eq("year", year));
        if let Some(source) = &params.exclude_source {
            yearly = yearly.filter(&PropertyFilter::neq("source", source.as_str()));
        }
        let Some(mosaic) = yearly.mosaic()? else {
            continue;
        };

        let classified = classify(&mosaic, params)?;
        let areas = multiply_pixel_area(&classified)?;
        let reduced = reduce_regions(
            &areas,
            &regions,
            Reducer::Sum,
            &ReduceRegionsOptions::default(),
        )?;

        let mut row = Feature::empty();
        row.set_property("year", year);
        if let Some(sums) = reduced.first() {
            for key in [MAPPABLE_BAND, DEFOL_BAND, SEVERE_BAND] {
                let value = sums
                    .get_property(key)
                    .cloned()
                    .unwrap_or(PropertyValue::Null);
                row.set_property(key, value);
            }
        }
        out.push(row);
    }
    Ok(out)
}

/// Indicator bands from a score mosaic: mappable is 1 wherever the
/// score is valid, defol and severe flag the threshold exceedances.
fn classify(mosaic: &Image, params: &AreaParams) -> Result<Image> {
    let score = mosaic.band(&params.score_band)?;
    let (rows, cols) = score.shape();

    let cells: Vec<[f64; 3]> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![[f64::NAN; 3]; cols];
            for col in 0..cols {
                if !mosaic.is_valid(row, col) {
                    continue;
                }
                let v = unsafe { score.get_unchecked(row, col) };
                if v.is_nan() {
                    continue;
                }
                row_data[col] = [
                    1.0,
                    if v < params.defol_threshold { 1.0 } else { 0.0 },
                    if v < params.severe_threshold { 1.0 } else { 0.0 },
                ];
            }
            row_data
        })
        .collect();

    let names = [MAPPABLE_BAND, DEFOL_BAND, SEVERE_BAND];
    let mut bands = Vec::with_capacity(names.len());
    for (k, name) in names.iter().enumerate() {
        let data: Vec<f64> = cells.iter().map(|cell| cell[k]).collect();
        bands.push((name.to_string(), crate::util::build_output(score, data)?));
    }
    Image::from_bands(bands)?.update_mask(&mosaic.mask_band())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use defolia_core::raster::{GeoTransform, Raster};
    use geo_types::{coord, Rect};

    fn scored(year: i64, source: &str, values: &[f64]) -> Image {
        let mut band = Raster::from_vec(values.to_vec(), 2, 2).unwrap();
        band.set_transform(GeoTransform::north_up(0.0, 60.0, 30.0));
        band.set_nodata(Some(f64::NAN));
        Image::from_band(SCORE_BAND, band)
            .unwrap()
            .with_property("year", year)
            .with_property("source", source)
    }

    fn whole_region() -> Feature {
        let rect = Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 60.0, y: 60.0 });
        Feature::new(geo_types::Geometry::Polygon(rect.to_polygon()))
    }

    #[test]
    fn test_area_sums_per_year() {
        // one severe, one mild, one healthy, one missing pixel
        let collection = ImageCollection::from_images(vec![scored(
            2021,
            "Sentinel-2",
            &[-0.3, -0.1, 0.05, f64::NAN],
        )]);

        let table =
            defoliated_area(&collection, &whole_region(), &AreaParams::default()).unwrap();
        assert_eq!(table.len(), 1);
        let row = table.first().unwrap();
        assert_eq!(row.get_number("year"), Some(2021.0));
        assert_relative_eq!(row.get_number(MAPPABLE_BAND).unwrap(), 2700.0);
        assert_relative_eq!(row.get_number(DEFOL_BAND).unwrap(), 1800.0);
        assert_relative_eq!(row.get_number(SEVERE_BAND).unwrap(), 900.0);
    }

    #[test]
    fn test_excluded_source_left_out() {
        let collection = ImageCollection::from_images(vec![
            scored(2021, "HLS", &[-0.3; 4]),
            scored(2021, "Sentinel-2", &[0.1; 4]),
        ]);

        let table =
            defoliated_area(&collection, &whole_region(), &AreaParams::default()).unwrap();
        let row = table.first().unwrap();
        // the HLS mosaic would have called every pixel defoliated
        assert_relative_eq!(row.get_number(DEFOL_BAND).unwrap(), 0.0);
        assert_relative_eq!(row.get_number(MAPPABLE_BAND).unwrap(), 3600.0);
    }

    #[test]
    fn test_years_ordered_and_separate() {
        let collection = ImageCollection::from_images(vec![
            scored(2022, "Sentinel-2", &[-0.3; 4]),
            scored(2020, "Sentinel-2", &[0.1; 4]),
        ]);

        let table =
            defoliated_area(&collection, &whole_region(), &AreaParams::default()).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.features[0].get_number("year"), Some(2020.0));
        assert_eq!(table.features[1].get_number("year"), Some(2022.0));
        assert_relative_eq!(table.features[0].get_number(DEFOL_BAND).unwrap(), 0.0);
        assert_relative_eq!(table.features[1].get_number(DEFOL_BAND).unwrap(), 3600.0);
    }
}
