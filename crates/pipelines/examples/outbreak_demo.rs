//! Outbreak demo: synthetic defoliation workflow end to end
//!
//! Generates a 60x60 synthetic study area with:
//! - Healthy canopy (EVI 0.55) across two years of scenes
//! - An elliptical outbreak (EVI 0.30) in the target year
//! - Isolated false-positive pixels (EVI 0.30), i.e. sensor salt noise
//!
//! Then runs the full scoring chain and writes each product:
//!   1. score.tif      - mean summer EVI anomaly per pixel
//!   2. qa.tif         - observation-count quality mask
//!   3. defol_mask.tif - thresholded score, small groups removed
//!   4. area.csv       - mappable/defoliated/severe area table
//!   5. roc.csv        - threshold sweep against labeled points
//!
//! Run:
//!   cargo run -p defolia-pipelines --example outbreak_demo

use std::fs;
use std::path::Path;

use chrono::{Duration, TimeZone, Utc};
use geo_types::{coord, Geometry, Rect};

use defolia_core::io::{write_csv, write_geotiff, GeoTiffOptions};
use defolia_core::{Crs, Feature, FeatureCollection, GeoTransform, Image, ImageCollection, Raster};
use defolia_pipelines::area::{defoliated_area, AreaParams};
use defolia_pipelines::denoise::filter_small_groups;
use defolia_pipelines::preprocess::{DOY_BAND, EVI_BAND};
use defolia_pipelines::roc::{roc_sweep, RocParams};
use defolia_pipelines::score::{seasonal_anomaly_score, ScoreParams, QA_MASK_BAND, SCORE_BAND};
use defolia_pipelines::trend::sens_slope;

const ROWS: usize = 60;
const COLS: usize = 60;
const ORIGIN_X: f64 = 1_600_000.0;
const ORIGIN_Y: f64 = 2_400_000.0;
const CELL: f64 = 30.0;

fn main() {
    let out_dir = Path::new("output/outbreak_demo");
    fs::create_dir_all(out_dir).expect("Cannot create output directory");

    // --- 1. Build the scene stacks ---
    let healthy = base_raster(0.55);
    let infested = target_evi();
    println!("Study area: {}x{} pixels at {} m", COLS, ROWS, CELL);
    println!("Outbreak ellipse: {} pixels", count_outbreak());

    let baseline = ImageCollection::from_images(
        [150, 165, 180, 195, 210]
            .iter()
            .map(|&doy| scene(2020, doy, &healthy))
            .collect(),
    );
    let target = ImageCollection::from_images(
        [150, 170, 175, 185, 200, 230]
            .iter()
            .map(|&doy| scene(2021, doy, &infested))
            .collect(),
    );
    println!(
        "Scenes: {} baseline (2020), {} target (2021)",
        baseline.len(),
        target.len()
    );

    // --- 2. Fit the seasonal baseline ---
    let trend = sens_slope(&baseline, DOY_BAND, EVI_BAND)
        .expect("trend fit failed")
        .expect("baseline collection is empty");
    println!("\nTrend bands: {:?}", trend.band_names());

    // --- 3. Score the target year ---
    let score = seasonal_anomaly_score(&target, &trend, &ScoreParams::default())
        .expect("scoring failed")
        .expect("no target scene in the summer window");
    let intensity = score.band(SCORE_BAND).expect("score band missing");
    print_stats("  score", intensity);
    save(out_dir, "score.tif", intensity);
    save(out_dir, "qa.tif", score.band(QA_MASK_BAND).expect("qa band missing"));

    // --- 4. Threshold and denoise ---
    let mut binary = intensity.with_same_meta::<u8>();
    {
        let cells = binary.data_mut();
        for (out, value) in cells.iter_mut().zip(intensity.data().iter()) {
            *out = (value.is_finite() && *value < -0.045) as u8;
        }
    }
    let before = count_set(&binary);
    let mask = filter_small_groups(&binary, 11);
    let after = count_set(&mask);
    println!("\nDefoliated pixels: {} raw, {} after denoise", before, after);
    println!("  (isolated noise removed: {})", before - after);
    write_geotiff(&mask, &out_dir.join("defol_mask.tif"), &GeoTiffOptions::default())
        .expect("Failed to write defol_mask.tif");

    // --- 5. Area accounting over the study region ---
    let bounds = intensity.bounds();
    let region = Feature::new(Geometry::Polygon(
        Rect::new(
            coord! { x: bounds.0, y: bounds.1 },
            coord! { x: bounds.2, y: bounds.3 },
        )
        .to_polygon(),
    ));
    let scored = ImageCollection::from_images(vec![score.clone()]);
    let area = defoliated_area(&scored, &region, &AreaParams::default())
        .expect("area accounting failed");
    println!("\nArea table:");
    for row in area.iter() {
        println!(
            "  year {}: mappable {:.1} ha, defoliated {:.1} ha, severe {:.1} ha",
            row.get_number("year").unwrap_or(f64::NAN),
            row.get_number("mappable").unwrap_or(f64::NAN) / 10_000.0,
            row.get_number("defol").unwrap_or(f64::NAN) / 10_000.0,
            row.get_number("severe").unwrap_or(f64::NAN) / 10_000.0,
        );
    }
    write_csv(
        &area,
        out_dir.join("area.csv"),
        &["year", "mappable", "defol", "severe"],
    )
    .expect("Failed to write area.csv");

    // --- 6. ROC sweep against labeled validation points ---
    let sweep = roc_sweep(&score, &validation_points(), &RocParams::default())
        .expect("roc sweep failed");
    let best = sweep
        .iter()
        .max_by(|a, b| {
            let oa_a = a.get_number("OA").unwrap_or(f64::NEG_INFINITY);
            let oa_b = b.get_number("OA").unwrap_or(f64::NEG_INFINITY);
            oa_a.total_cmp(&oa_b)
        })
        .expect("empty sweep");
    println!(
        "\nROC: {} thresholds; best OA {:.2} at threshold {:.3} (TPR {:.2}, FPR {:.2})",
        sweep.len(),
        best.get_number("OA").unwrap_or(f64::NAN),
        best.get_number("threshold").unwrap_or(f64::NAN),
        best.get_number("TPR").unwrap_or(f64::NAN),
        best.get_number("FPR").unwrap_or(f64::NAN),
    );
    write_csv(
        &sweep,
        out_dir.join("roc.csv"),
        &["threshold", "TPR", "FPR", "OA", "Pos_UA", "Neg_UA", "valid_classified"],
    )
    .expect("Failed to write roc.csv");

    println!("\n5 files written to {}/", out_dir.display());
}

/// Healthy-canopy raster with the demo georeferencing.
fn base_raster(fill: f64) -> Raster<f64> {
    let mut r = Raster::filled(ROWS, COLS, fill);
    r.set_transform(GeoTransform::new(ORIGIN_X, ORIGIN_Y, CELL, -CELL));
    r.set_crs(Some(Crs::conus_albers()));
    r.set_nodata(Some(f64::NAN));
    r
}

fn in_outbreak(row: usize, col: usize) -> bool {
    let dr = (row as f64 - 30.0) / 8.0;
    let dc = (col as f64 - 30.0) / 12.0;
    dr * dr + dc * dc <= 1.0
}

fn count_outbreak() -> usize {
    (0..ROWS)
        .flat_map(|r| (0..COLS).map(move |c| (r, c)))
        .filter(|&(r, c)| in_outbreak(r, c))
        .count()
}

/// Target-year EVI: healthy canopy, the outbreak ellipse, and isolated
/// noise pixels at deterministic LCG positions well clear of both the
/// ellipse and the negative validation points.
fn target_evi() -> Raster<f64> {
    let mut evi = base_raster(0.55);
    for r in 0..ROWS {
        for c in 0..COLS {
            if in_outbreak(r, c) {
                evi.set(r, c, 0.30).unwrap();
            }
        }
    }

    let mut seed: u64 = 42;
    let mut placed = 0;
    while placed < 25 {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
        let r = ((seed >> 33) as usize) % ROWS;
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
        let c = ((seed >> 33) as usize) % COLS;

        let dr = (r as f64 - 30.0) / 8.0;
        let dc = (c as f64 - 30.0) / 12.0;
        if r < 10 || dr * dr + dc * dc <= 1.44 {
            continue;
        }
        evi.set(r, c, 0.30).unwrap();
        placed += 1;
    }
    evi
}

fn scene(year: i32, doy: u32, evi: &Raster<f64>) -> Image {
    let mut doy_band = evi.with_same_meta::<f64>();
    doy_band.data_mut().fill(doy as f64);
    Image::from_bands(vec![
        (EVI_BAND.to_string(), evi.clone()),
        (DOY_BAND.to_string(), doy_band),
    ])
    .expect("scene bands")
    .with_timestamp(
        Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).unwrap() + Duration::days(doy as i64 - 1),
    )
}

/// Four labeled points inside the outbreak, four on healthy canopy.
fn validation_points() -> FeatureCollection {
    let mut points = FeatureCollection::new();
    for (row, col, label) in [
        (30, 30, 1i64),
        (28, 33, 1),
        (33, 27, 1),
        (30, 36, 1),
        (5, 5, 0),
        (5, 20, 0),
        (5, 40, 0),
        (5, 55, 0),
    ] {
        let x = ORIGIN_X + (col as f64 + 0.5) * CELL;
        let y = ORIGIN_Y - (row as f64 + 0.5) * CELL;
        points.push(Feature::point(x, y).with_property("combined", label));
    }
    points
}

fn print_stats(label: &str, raster: &Raster<f64>) {
    let s = raster.statistics();
    println!(
        "{:<8} min={:>7.3}  max={:>7.3}  mean={:>7.3}  valid={:>5}  nodata={:>5}",
        label,
        s.min.unwrap_or(f64::NAN),
        s.max.unwrap_or(f64::NAN),
        s.mean.unwrap_or(f64::NAN),
        s.valid_count,
        s.nodata_count,
    );
}

fn save(dir: &Path, name: &str, raster: &Raster<f64>) {
    let path = dir.join(name);
    write_geotiff(raster, &path, &GeoTiffOptions::default())
        .unwrap_or_else(|e| panic!("Failed to write {}: {}", path.display(), e));
}

fn count_set(mask: &Raster<u8>) -> usize {
    mask.data().iter().filter(|&&v| v != 0).count()
}
