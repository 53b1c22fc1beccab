//! End-to-end workflow tests over small synthetic rasters.
//!
//! Two scenarios: the gridded forest/defoliation join as run for the
//! mapped products, and the trend → score → accuracy chain that sits
//! behind the annual area tables.

use chrono::{Duration, TimeZone, Utc};
use defolia_core::raster::{GeoTransform, Raster};
use defolia_core::vector::{covering_grid, GridParams};
use defolia_core::{Crs, Feature, FeatureCollection, Image, ImageCollection};
use defolia_pipelines::area::{defoliated_area, AreaParams, DEFOL_BAND, MAPPABLE_BAND, SEVERE_BAND};
use defolia_pipelines::gridstats::{
    defoliation_grid_stats, forest_grid_stats, grid_join, DECIDUOUS_BAND, FOREST_BAND, GRID_ID,
};
use defolia_pipelines::preprocess::{DOY_BAND, EVI_BAND};
use defolia_pipelines::roc::{roc_sweep, RocParams};
use defolia_pipelines::score::{seasonal_anomaly_score, ScoreParams, QA_MASK_BAND, SCORE_BAND};
use defolia_pipelines::trend::sens_slope;
use geo_types::{coord, Geometry, Rect};

fn georeferenced(values: &[f64], rows: usize, cols: usize, pixel_size: f64) -> Raster<f64> {
    let mut band = Raster::from_vec(values.to_vec(), rows, cols).unwrap();
    band.set_transform(GeoTransform::north_up(
        0.0,
        rows as f64 * pixel_size,
        pixel_size,
    ));
    band.set_nodata(Some(f64::NAN));
    band
}

// ---------------------------------------------------------------------------
// Gridded forest x defoliation join
// ---------------------------------------------------------------------------

#[test]
fn gridded_join_keeps_doubly_covered_cells_only() {
    // land cover spans four 60 m cells, the defoliation product only the
    // top two
    #[rustfmt::skip]
    let landcover = Image::from_band("landcover", georeferenced(&[
        41.0, 41.0, 41.0, 41.0,
        41.0, 41.0, 41.0, 41.0,
        42.0, 42.0, 42.0, 42.0,
        42.0, 42.0, 42.0, 42.0,
    ], 4, 4, 30.0))
    .unwrap();

    let mut defol_band = Raster::from_vec(vec![1.0; 8], 2, 4).unwrap();
    defol_band.set_transform(GeoTransform::north_up(0.0, 120.0, 30.0));
    defol_band.set_nodata(Some(f64::NAN));
    let defol = Image::from_band("defoliation", defol_band).unwrap();

    let params = GridParams {
        crs: Crs::conus_albers(),
        cell_size: 60.0,
    };
    let full_grid = covering_grid(landcover.bounds(), &params);
    let defol_grid = covering_grid(defol.bounds(), &params);
    assert_eq!(full_grid.len(), 4);
    assert_eq!(defol_grid.len(), 2);

    let forest = forest_grid_stats(&landcover, &full_grid).unwrap();
    let defoliation = defoliation_grid_stats(&defol, &defol_grid).unwrap();
    let joined = grid_join(&forest, &defoliation).unwrap();

    // one record per doubly-covered cell, none for the forest-only cells
    assert_eq!(joined.len(), 2);
    let mut ids: Vec<_> = joined.iter().filter_map(|f| f.id.clone()).collect();
    ids.sort();
    assert_eq!(ids, ["0_1", "1_1"]);

    for cell in joined.iter() {
        // four deciduous pixels and four flagged pixels of 900 m2 each
        assert_eq!(cell.get_number(FOREST_BAND), Some(3600.0));
        assert_eq!(cell.get_number(DECIDUOUS_BAND), Some(3600.0));
        assert_eq!(cell.get_number("defoliation"), Some(3600.0));
        assert!(cell.geometry.is_some());
        assert!(cell.get_property(GRID_ID).is_some());
    }
}

// ---------------------------------------------------------------------------
// Trend -> score -> accuracy chain
// ---------------------------------------------------------------------------

fn scene(year: i32, doy: u32, evi: [f64; 4]) -> Image {
    let evi_band = georeferenced(&evi, 2, 2, 30.0);
    let doy_band = georeferenced(&[doy as f64; 4], 2, 2, 30.0);
    Image::from_bands(vec![
        (EVI_BAND.to_string(), evi_band),
        (DOY_BAND.to_string(), doy_band),
    ])
    .unwrap()
    .with_timestamp(
        Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).unwrap() + Duration::days(doy as i64 - 1),
    )
}

#[test]
fn outbreak_pixel_scores_and_classifies() {
    // 2020 baseline: stable canopy everywhere
    let baseline = ImageCollection::from_images(vec![
        scene(2020, 120, [0.5; 4]),
        scene(2020, 160, [0.5; 4]),
        scene(2020, 200, [0.5; 4]),
        scene(2020, 240, [0.5; 4]),
    ]);
    let trend = sens_slope(&baseline, DOY_BAND, EVI_BAND).unwrap().unwrap();

    // 2021: pixel (0,1) loses a quarter EVI through the summer window
    let outbreak = [0.5, 0.25, 0.5, 0.5];
    let target = ImageCollection::from_images(vec![
        scene(2021, 170, outbreak),
        scene(2021, 180, outbreak),
        scene(2021, 190, outbreak),
        scene(2021, 200, outbreak),
    ]);
    let score = seasonal_anomaly_score(&target, &trend, &ScoreParams::default())
        .unwrap()
        .unwrap();

    let intensity = score.band(SCORE_BAND).unwrap();
    assert!((intensity.get(0, 0).unwrap() - 0.0).abs() < 1e-9);
    assert!((intensity.get(0, 1).unwrap() + 0.25).abs() < 1e-9);
    // four window observations clear the quality floor
    assert_eq!(score.band(QA_MASK_BAND).unwrap().get(0, 1).unwrap(), 1.0);

    // the annual area table sees one damaged pixel
    let region = Feature::new(Geometry::Polygon(
        Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 60.0, y: 60.0 }).to_polygon(),
    ));
    let table = defoliated_area(
        &ImageCollection::from_images(vec![score.clone()]),
        &region,
        &AreaParams::default(),
    )
    .unwrap();
    let row = table.first().unwrap();
    assert_eq!(row.get_number("year"), Some(2021.0));
    assert_eq!(row.get_number(MAPPABLE_BAND), Some(3600.0));
    assert_eq!(row.get_number(DEFOL_BAND), Some(900.0));
    assert_eq!(row.get_number(SEVERE_BAND), Some(900.0));

    // ground truth at the pixel centers separates cleanly
    let validation = FeatureCollection::from_features(vec![
        Feature::point(15.0, 45.0).with_property("combined", 0),
        Feature::point(45.0, 45.0).with_property("combined", 1),
        Feature::point(15.0, 15.0).with_property("combined", 0),
        Feature::point(45.0, 15.0).with_property("combined", 0),
    ]);
    let sweep = roc_sweep(&score, &validation, &RocParams::default()).unwrap();
    let operating = sweep
        .iter()
        .find(|f| (f.get_number("threshold").unwrap() + 0.1).abs() < 1e-9)
        .unwrap();
    assert_eq!(operating.get_number("TPR"), Some(1.0));
    assert_eq!(operating.get_number("FPR"), Some(0.0));
    assert_eq!(operating.get_number("OA"), Some(1.0));
    assert_eq!(operating.get_number("valid_classified"), Some(4.0));
}
