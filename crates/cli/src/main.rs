//! Defolia CLI - Forest canopy defoliation analysis

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use defolia_core::io::{read_geojson, read_geotiff, write_geotiff, GeoTiffOptions, TableFormat};
use defolia_core::vector::GridParams;
use defolia_core::{Crs, FeatureCollection, Image, ImageCollection, Raster, RasterElement};
use defolia_engine::{
    Catalog, ExportRunner, ImageExport, JobHandle, JobState, MemoryCatalog, TableExport,
};
use defolia_pipelines::area::{defoliated_area, AreaParams};
use defolia_pipelines::climate::{climate_lag_window, ClimateParams, ClimateVariable};
use defolia_pipelines::denoise::filter_small_groups;
use defolia_pipelines::gridstats::{
    defoliation_grid_stats, forest_grid_stats, grid_join, DECIDUOUS_BAND, FOREST_BAND, GRID_ID,
};
use defolia_pipelines::indices::{evi, evi_range_mask, EviParams};
use defolia_pipelines::preprocess::EVI_BAND;
use defolia_pipelines::roc::{roc_sweep, RocParams};
use defolia_pipelines::score::SCORE_BAND;

// ─── CLI structure ──────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "defolia")]
#[command(author, version, about = "Forest canopy defoliation analysis", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show information about a raster file
    Info {
        /// Input raster file
        input: PathBuf,
    },
    /// Enhanced Vegetation Index from reflectance bands
    Evi {
        /// NIR band file
        #[arg(long)]
        nir: PathBuf,
        /// Red band file
        #[arg(long)]
        red: PathBuf,
        /// Blue band file
        #[arg(long)]
        blue: PathBuf,
        /// Output file
        output: PathBuf,
        /// Use the Landsat/MODIS blue-term sign variant
        #[arg(long)]
        landsat: bool,
        /// Keep values outside [0, 1] instead of masking them
        #[arg(long)]
        raw: bool,
    },
    /// Regular covering grid over a raster's bounds
    Grid {
        /// Raster whose bounds the grid covers
        input: PathBuf,
        /// Output file (.geojson)
        output: PathBuf,
        /// Cell edge length in CRS units
        #[arg(short, long, default_value = "10000")]
        cell_size: f64,
        /// EPSG code of the grid CRS (default: raster CRS, else 5070)
        #[arg(long)]
        epsg: Option<u32>,
    },
    /// Remove small connected groups from a thresholded score raster
    Denoise {
        /// Input score raster
        input: PathBuf,
        /// Output file (0/1 raster)
        output: PathBuf,
        /// Scores strictly below this count as defoliated
        #[arg(short, long, default_value = "-0.045", allow_hyphen_values = true)]
        threshold: f64,
        /// Minimum 4-connected group size to keep
        #[arg(short, long, default_value = "11")]
        min_pixels: usize,
    },
    /// ROC threshold sweep of a score raster against labeled points
    Roc {
        /// Score raster file
        #[arg(long)]
        score: PathBuf,
        /// Validation points file (.geojson)
        #[arg(long)]
        points: PathBuf,
        /// Output table (.csv or .geojson)
        output: PathBuf,
        /// First (largest) threshold
        #[arg(long, default_value = "0.30", allow_hyphen_values = true)]
        start: f64,
        /// Last (smallest) threshold
        #[arg(long, default_value = "-0.40", allow_hyphen_values = true)]
        stop: f64,
        /// Threshold decrement (negative)
        #[arg(long, default_value = "-0.005", allow_hyphen_values = true)]
        step: f64,
        /// Validation property holding the 0/1 reference label
        #[arg(long, default_value = "combined")]
        label: String,
    },
    /// Forest cover and defoliation totals joined per grid cell
    Gridstats {
        /// Landcover class raster (NLCD codes)
        #[arg(long)]
        landcover: PathBuf,
        /// Defoliation score raster
        #[arg(long)]
        defoliation: PathBuf,
        /// Output table (.csv or .geojson)
        output: PathBuf,
        /// Grid cell edge length in CRS units
        #[arg(short, long, default_value = "10000")]
        cell_size: f64,
        /// EPSG code of the grid CRS (default: landcover CRS, else 5070)
        #[arg(long)]
        epsg: Option<u32>,
    },
    /// Defoliated area per year over a region
    Area {
        /// Score raster for one year, as YEAR=PATH (repeatable)
        #[arg(long = "score", value_name = "YEAR=PATH", required = true)]
        scores: Vec<String>,
        /// Region file (.geojson); the first feature bounds the sums
        #[arg(long)]
        region: PathBuf,
        /// Output table (.csv or .geojson)
        output: PathBuf,
        /// Scores strictly below this count as defoliated
        #[arg(long, default_value = "-0.04", allow_hyphen_values = true)]
        defol_threshold: f64,
        /// Scores strictly below this count as severe
        #[arg(long, default_value = "-0.2", allow_hyphen_values = true)]
        severe_threshold: f64,
    },
    /// Climate anomaly per grid cell for a run of monthly lag windows
    Climate {
        /// Daily climate raster, as YYYY-MM-DD=PATH (repeatable)
        #[arg(long = "scene", value_name = "DATE=PATH", required = true)]
        scenes: Vec<String>,
        /// Grid cells file (.geojson)
        #[arg(long)]
        grid: PathBuf,
        /// Output folder; one table per lag month
        #[arg(long)]
        folder: PathBuf,
        /// Variable: prcp, tmax
        #[arg(long, default_value = "prcp")]
        variable: String,
        /// Year whose June 1 anchors the lag windows
        #[arg(long)]
        year: i32,
        /// Run lag windows 1 through this many months
        #[arg(long, default_value = "24")]
        max_lag: u32,
    },
    /// Run the export jobs described by a JSON config file
    Batch {
        /// Job config file
        #[arg(long)]
        config: PathBuf,
    },
}

// ─── Batch config ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct BatchConfig {
    #[serde(default)]
    assets: AssetConfig,
    jobs: Vec<JobSpec>,
}

/// Named local assets the jobs refer to, loaded into a catalog up front
#[derive(Debug, Default, Deserialize)]
struct AssetConfig {
    #[serde(default)]
    images: HashMap<String, ImageAsset>,
    #[serde(default)]
    collections: HashMap<String, Vec<SceneAsset>>,
    #[serde(default)]
    tables: HashMap<String, PathBuf>,
}

#[derive(Debug, Deserialize)]
struct ImageAsset {
    path: PathBuf,
    /// Band name the pipelines see
    band: String,
}

#[derive(Debug, Deserialize)]
struct SceneAsset {
    path: PathBuf,
    band: String,
    /// Acquisition date, YYYY-MM-DD
    #[serde(default)]
    date: Option<String>,
    /// Scoring year the scene belongs to
    #[serde(default)]
    year: Option<i32>,
    /// Sensor label, matched by source filters
    #[serde(default)]
    source: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum JobSpec {
    Roc {
        score: String,
        points: String,
        output: PathBuf,
        start: Option<f64>,
        stop: Option<f64>,
        step: Option<f64>,
        label: Option<String>,
    },
    Gridstats {
        landcover: String,
        defoliation: String,
        output: PathBuf,
        cell_size: Option<f64>,
        epsg: Option<u32>,
    },
    Area {
        scores: String,
        region: String,
        output: PathBuf,
        defol_threshold: Option<f64>,
        severe_threshold: Option<f64>,
    },
    Climate {
        scenes: String,
        grid: String,
        folder: PathBuf,
        variable: String,
        year: i32,
        max_lag: Option<u32>,
    },
}

// ─── Helpers ────────────────────────────────────────────────────────────

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

fn read_raster(path: &Path) -> Result<Raster<f64>> {
    let pb = spinner("Reading raster...");
    let raster: Raster<f64> = read_geotiff(path)
        .with_context(|| format!("Failed to read raster {}", path.display()))?;
    pb.finish_and_clear();
    info!("Input: {} x {}", raster.cols(), raster.rows());
    Ok(raster)
}

fn read_table(path: &Path) -> Result<FeatureCollection> {
    read_geojson(path).with_context(|| format!("Failed to read table {}", path.display()))
}

fn write_raster<T: RasterElement>(raster: &Raster<T>, path: &Path) -> Result<()> {
    let pb = spinner("Writing output...");
    write_geotiff(raster, path, &GeoTiffOptions::default())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    pb.finish_and_clear();
    Ok(())
}

fn done(name: &str, path: &Path, elapsed: std::time::Duration) {
    println!("{} saved to: {}", name, path.display());
    println!("  Processing time: {:.2?}", elapsed);
}

fn parse_date(s: &str) -> Result<DateTime<Utc>> {
    let day = chrono::NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .with_context(|| format!("Invalid date: {} (expected YYYY-MM-DD)", s))?;
    let midnight = day
        .and_hms_opt(0, 0, 0)
        .with_context(|| format!("Invalid date: {}", s))?;
    Ok(midnight.and_utc())
}

fn parse_variable(s: &str) -> Result<ClimateVariable> {
    match s.to_lowercase().as_str() {
        "prcp" | "precipitation" => Ok(ClimateVariable::Prcp),
        "tmax" | "temperature" => Ok(ClimateVariable::Tmax),
        _ => anyhow::bail!("Unknown variable: {}. Use prcp or tmax.", s),
    }
}

fn parse_year_scene(s: &str) -> Result<(i32, PathBuf)> {
    let (year, path) = s
        .split_once('=')
        .with_context(|| format!("Score must be YEAR=PATH, got: {}", s))?;
    let year: i32 = year.trim().parse().context("Invalid year")?;
    Ok((year, PathBuf::from(path.trim())))
}

fn parse_dated_scene(s: &str) -> Result<(DateTime<Utc>, PathBuf)> {
    let (date, path) = s
        .split_once('=')
        .with_context(|| format!("Scene must be DATE=PATH, got: {}", s))?;
    Ok((parse_date(date)?, PathBuf::from(path.trim())))
}

fn grid_crs(epsg: Option<u32>, fallback: Option<&Crs>) -> Crs {
    match epsg {
        Some(code) => Crs::from_epsg(code),
        None => fallback.cloned().unwrap_or_else(Crs::conus_albers),
    }
}

/// Job description and folder from a user-facing output path
fn split_output(output: &Path, fallback: &str) -> (String, PathBuf) {
    let description = output
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(fallback)
        .to_string();
    let folder = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    (description, folder)
}

/// Table export job for an output path. A `.csv` extension selects CSV,
/// anything else GeoJSON.
fn table_job(collection: FeatureCollection, output: &Path, selectors: Vec<String>) -> TableExport {
    let format = if output
        .extension()
        .map(|e| e.eq_ignore_ascii_case("csv"))
        .unwrap_or(false)
    {
        TableFormat::Csv
    } else {
        TableFormat::GeoJson
    };
    let (description, folder) = split_output(output, "table");
    TableExport {
        collection,
        description,
        folder,
        format,
        selectors,
    }
}

fn wait_job(handle: JobHandle) -> Result<()> {
    match handle.wait() {
        JobState::Succeeded => Ok(()),
        JobState::Failed(reason) => anyhow::bail!("export failed: {}", reason),
        other => anyhow::bail!("export ended in state {:?}", other),
    }
}

// ─── Shared analysis builders ───────────────────────────────────────────

fn gridstats_table(
    landcover: &Image,
    defoliation: &Image,
    cell_size: f64,
    epsg: Option<u32>,
) -> Result<(FeatureCollection, Vec<String>)> {
    let params = GridParams {
        crs: grid_crs(epsg, landcover.crs()),
        cell_size,
    };
    let grid = defolia_core::covering_grid(landcover.bounds(), &params);
    info!("Grid: {} cells at {} units", grid.len(), cell_size);

    let forest = forest_grid_stats(landcover, &grid).context("Failed to sum forest cover")?;
    let defol =
        defoliation_grid_stats(defoliation, &grid).context("Failed to sum defoliation")?;
    let joined = grid_join(&forest, &defol).context("Failed to join grid tables")?;

    let mut selectors = vec![
        GRID_ID.to_string(),
        FOREST_BAND.to_string(),
        DECIDUOUS_BAND.to_string(),
    ];
    selectors.extend(defoliation.band_names().iter().map(|n| n.to_string()));
    Ok((joined, selectors))
}

/// One export job per lag month, each independently named so a rerun
/// never clobbers an unrelated window.
fn climate_jobs(
    archive: &ImageCollection,
    grid: &FeatureCollection,
    variable: ClimateVariable,
    year: i32,
    max_lag: u32,
    folder: &Path,
) -> Result<Vec<TableExport>> {
    if max_lag == 0 {
        anyhow::bail!("At least one lag month is required");
    }
    let mut jobs = Vec::with_capacity(max_lag as usize);
    for lag in 1..=max_lag {
        let params = ClimateParams {
            target_year: year,
            month_lag: lag,
            variable,
        };
        let table = climate_lag_window(archive, grid, &params)
            .with_context(|| format!("Failed to build lag {} window", lag))?;
        let var = variable.band();
        let selectors = vec![
            GRID_ID.to_string(),
            format!("{}_mean_{}", var, lag),
            format!("{}_recent_{}", var, lag),
            format!("{}_anom_{}", var, lag),
            "days".to_string(),
        ];
        jobs.push(TableExport {
            collection: table,
            description: format!("{}_lag_{}", var, lag),
            folder: folder.to_path_buf(),
            format: TableFormat::Csv,
            selectors,
        });
    }
    Ok(jobs)
}

fn score_collection(scores: &[String]) -> Result<ImageCollection> {
    let mut collection = ImageCollection::new();
    for entry in scores {
        let (year, path) = parse_year_scene(entry)?;
        let raster = read_raster(&path)?;
        let image = Image::from_band(SCORE_BAND, raster)?.with_property("year", year as i64);
        collection.push(image);
    }
    Ok(collection)
}

fn dated_collection(scenes: &[String], band: &str) -> Result<ImageCollection> {
    let mut collection = ImageCollection::new();
    for entry in scenes {
        let (date, path) = parse_dated_scene(entry)?;
        let raster = read_raster(&path)?;
        collection.push(Image::from_band(band, raster)?.with_timestamp(date));
    }
    Ok(collection)
}

// ─── Batch assets ───────────────────────────────────────────────────────

fn load_catalog(assets: &AssetConfig) -> Result<MemoryCatalog> {
    let mut catalog = MemoryCatalog::new();
    for (name, asset) in &assets.images {
        let raster = read_raster(&asset.path)?;
        catalog.insert_image(name.clone(), Image::from_band(asset.band.clone(), raster)?);
    }
    for (name, scenes) in &assets.collections {
        let mut collection = ImageCollection::new();
        for scene in scenes {
            let raster = read_raster(&scene.path)?;
            let mut image = Image::from_band(scene.band.clone(), raster)?;
            if let Some(date) = &scene.date {
                image = image.with_timestamp(parse_date(date)?);
            }
            if let Some(year) = scene.year {
                image = image.with_property("year", year as i64);
            }
            if let Some(source) = &scene.source {
                image = image.with_property("source", source.as_str());
            }
            collection.push(image);
        }
        catalog.insert_collection(name.clone(), collection);
    }
    for (name, path) in &assets.tables {
        catalog.insert_table(name.clone(), read_table(path)?);
    }
    Ok(catalog)
}

fn batch_jobs(catalog: &MemoryCatalog, jobs: &[JobSpec]) -> Result<Vec<TableExport>> {
    let mut exports = Vec::new();
    for job in jobs {
        match job {
            JobSpec::Roc {
                score,
                points,
                output,
                start,
                stop,
                step,
                label,
            } => {
                let defaults = RocParams::default();
                let params = RocParams {
                    start: start.unwrap_or(defaults.start),
                    stop: stop.unwrap_or(defaults.stop),
                    step: step.unwrap_or(defaults.step),
                    score_band: defaults.score_band,
                    label_property: label.clone().unwrap_or(defaults.label_property),
                };
                let image = catalog.image(score)?;
                let validation = catalog.feature_collection(points)?;
                let table = roc_sweep(&image, &validation, &params)
                    .with_context(|| format!("ROC sweep on {} failed", score))?;
                exports.push(table_job(table, output, roc_selectors()));
            }
            JobSpec::Gridstats {
                landcover,
                defoliation,
                output,
                cell_size,
                epsg,
            } => {
                let lc = catalog.image(landcover)?;
                let defol = catalog.image(defoliation)?;
                let (table, selectors) =
                    gridstats_table(&lc, &defol, cell_size.unwrap_or(10_000.0), *epsg)?;
                exports.push(table_job(table, output, selectors));
            }
            JobSpec::Area {
                scores,
                region,
                output,
                defol_threshold,
                severe_threshold,
            } => {
                let defaults = AreaParams::default();
                let params = AreaParams {
                    defol_threshold: defol_threshold.unwrap_or(defaults.defol_threshold),
                    severe_threshold: severe_threshold.unwrap_or(defaults.severe_threshold),
                    ..defaults
                };
                let collection = catalog.image_collection(scores)?;
                let table = region_area_table(&collection, &catalog.feature_collection(region)?, &params)?;
                exports.push(table_job(table, output, area_selectors()));
            }
            JobSpec::Climate {
                scenes,
                grid,
                folder,
                variable,
                year,
                max_lag,
            } => {
                let archive = catalog.image_collection(scenes)?;
                let cells = catalog.feature_collection(grid)?;
                let variable = parse_variable(variable)?;
                exports.extend(climate_jobs(
                    &archive,
                    &cells,
                    variable,
                    *year,
                    max_lag.unwrap_or(24),
                    folder,
                )?);
            }
        }
    }
    Ok(exports)
}

fn region_area_table(
    collection: &ImageCollection,
    regions: &FeatureCollection,
    params: &AreaParams,
) -> Result<FeatureCollection> {
    let region = regions
        .first()
        .cloned()
        .context("Region file has no features")?;
    defoliated_area(collection, &region, params).context("Failed to sum defoliated area")
}

fn roc_selectors() -> Vec<String> {
    ["threshold", "TPR", "FPR", "OA", "Pos_UA", "Neg_UA", "valid_classified"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn area_selectors() -> Vec<String> {
    ["year", "mappable", "defol", "severe"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

// ─── Main ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        // ── Info ─────────────────────────────────────────────────────
        Commands::Info { input } => {
            let raster = read_raster(&input)?;
            let (rows, cols) = raster.shape();
            let bounds = raster.bounds();
            let stats = raster.statistics();

            println!("File: {}", input.display());
            println!("Dimensions: {} x {} ({} cells)", cols, rows, raster.len());
            println!("Cell size: {}", raster.cell_size());
            println!(
                "Bounds: ({:.6}, {:.6}) - ({:.6}, {:.6})",
                bounds.0, bounds.1, bounds.2, bounds.3
            );
            if let Some(crs) = raster.crs() {
                println!("CRS: {}", crs.identifier());
            }
            if let Some(nodata) = raster.nodata() {
                println!("NoData: {}", nodata);
            }
            println!("\nStatistics:");
            if let Some(min) = stats.min {
                println!("  Min: {:.4}", min);
            }
            if let Some(max) = stats.max {
                println!("  Max: {:.4}", max);
            }
            if let Some(mean) = stats.mean {
                println!("  Mean: {:.4}", mean);
            }
            println!(
                "  Valid cells: {} ({:.1}%)",
                stats.valid_count,
                100.0 * stats.valid_count as f64 / raster.len() as f64
            );
        }

        // ── EVI ──────────────────────────────────────────────────────
        Commands::Evi {
            nir,
            red,
            blue,
            output,
            landsat,
            raw,
        } => {
            let params = if landsat {
                EviParams::landsat()
            } else {
                EviParams::default()
            };
            let nir_r = read_raster(&nir)?;
            let red_r = read_raster(&red)?;
            let blue_r = read_raster(&blue)?;
            let start = Instant::now();
            let mut result =
                evi(&nir_r, &red_r, &blue_r, &params).context("Failed to calculate EVI")?;
            if !raw {
                let mask = evi_range_mask(&result, 0.0, 1.0)?;
                for (cell, keep) in result.data_mut().iter_mut().zip(mask.data().iter()) {
                    if *keep == 0 {
                        *cell = f64::NAN;
                    }
                }
            }
            let elapsed = start.elapsed();

            let image = Image::from_band(EVI_BAND, result)?;
            let (description, folder) = split_output(&output, EVI_BAND);
            let runner = ExportRunner::new()?;
            wait_job(runner.submit_image(ImageExport::new(image, description, folder)))?;
            done("EVI", &output, elapsed);
        }

        // ── Grid ─────────────────────────────────────────────────────
        Commands::Grid {
            input,
            output,
            cell_size,
            epsg,
        } => {
            let raster = read_raster(&input)?;
            let params = GridParams {
                crs: grid_crs(epsg, raster.crs()),
                cell_size,
            };
            let start = Instant::now();
            let cells = defolia_core::covering_grid(raster.bounds(), &params);
            info!("Grid: {} cells", cells.len());
            let elapsed = start.elapsed();

            let runner = ExportRunner::new()?;
            let job = table_job(cells, &output, vec![GRID_ID.to_string()]);
            let path = job.output_path();
            wait_job(runner.submit_table(job))?;
            done("Grid", &path, elapsed);
        }

        // ── Denoise ──────────────────────────────────────────────────
        Commands::Denoise {
            input,
            output,
            threshold,
            min_pixels,
        } => {
            let score = read_raster(&input)?;
            let start = Instant::now();
            let mut binary = score.with_same_meta::<u8>();
            {
                let cells = binary.data_mut();
                for (out, value) in cells.iter_mut().zip(score.data().iter()) {
                    *out = (value.is_finite() && *value < threshold) as u8;
                }
            }
            let result = filter_small_groups(&binary, min_pixels);
            let elapsed = start.elapsed();
            write_raster(&result, &output)?;
            done("Denoised mask", &output, elapsed);
        }

        // ── ROC ──────────────────────────────────────────────────────
        Commands::Roc {
            score,
            points,
            output,
            start,
            stop,
            step,
            label,
        } => {
            let raster = read_raster(&score)?;
            let image = Image::from_band(SCORE_BAND, raster)?;
            let validation = read_table(&points)?;
            info!("Validation points: {}", validation.len());

            let params = RocParams {
                start,
                stop,
                step,
                label_property: label,
                ..RocParams::default()
            };
            let began = Instant::now();
            let pb = spinner("Sweeping thresholds...");
            let table =
                roc_sweep(&image, &validation, &params).context("Failed to sweep thresholds")?;
            pb.finish_and_clear();
            let elapsed = began.elapsed();

            let runner = ExportRunner::new()?;
            let job = table_job(table, &output, roc_selectors());
            let path = job.output_path();
            wait_job(runner.submit_table(job))?;
            done("ROC sweep", &path, elapsed);
        }

        // ── Gridstats ────────────────────────────────────────────────
        Commands::Gridstats {
            landcover,
            defoliation,
            output,
            cell_size,
            epsg,
        } => {
            let lc = Image::from_band("landcover", read_raster(&landcover)?)?;
            let defol = Image::from_band("defoliation", read_raster(&defoliation)?)?;

            let start = Instant::now();
            let pb = spinner("Summing per grid cell...");
            let (table, selectors) = gridstats_table(&lc, &defol, cell_size, epsg)?;
            pb.finish_and_clear();
            let elapsed = start.elapsed();
            info!("Joined cells: {}", table.len());

            let runner = ExportRunner::new()?;
            let job = table_job(table, &output, selectors);
            let path = job.output_path();
            wait_job(runner.submit_table(job))?;
            done("Grid statistics", &path, elapsed);
        }

        // ── Area ─────────────────────────────────────────────────────
        Commands::Area {
            scores,
            region,
            output,
            defol_threshold,
            severe_threshold,
        } => {
            let collection = score_collection(&scores)?;
            let regions = read_table(&region)?;
            let params = AreaParams {
                defol_threshold,
                severe_threshold,
                ..AreaParams::default()
            };

            let start = Instant::now();
            let pb = spinner("Summing defoliated area...");
            let table = region_area_table(&collection, &regions, &params)?;
            pb.finish_and_clear();
            let elapsed = start.elapsed();

            let runner = ExportRunner::new()?;
            let job = table_job(table, &output, area_selectors());
            let path = job.output_path();
            wait_job(runner.submit_table(job))?;
            done("Area table", &path, elapsed);
        }

        // ── Climate ──────────────────────────────────────────────────
        Commands::Climate {
            scenes,
            grid,
            folder,
            variable,
            year,
            max_lag,
        } => {
            let variable = parse_variable(&variable)?;
            let archive = dated_collection(&scenes, variable.band())?;
            let cells = read_table(&grid)?;
            info!("Archive: {} scenes, {} cells", archive.len(), cells.len());

            let start = Instant::now();
            let pb = spinner("Building lag windows...");
            let jobs = climate_jobs(&archive, &cells, variable, year, max_lag, &folder)?;
            pb.finish_and_clear();

            let runner = ExportRunner::new()?;
            let handles: Vec<JobHandle> =
                jobs.into_iter().map(|j| runner.submit_table(j)).collect();
            report_jobs(handles)?;
            println!("  Processing time: {:.2?}", start.elapsed());
        }

        // ── Batch ────────────────────────────────────────────────────
        Commands::Batch { config } => {
            let text = std::fs::read_to_string(&config)
                .with_context(|| format!("Failed to read {}", config.display()))?;
            let batch: BatchConfig =
                serde_json::from_str(&text).context("Failed to parse batch config")?;
            info!("Batch: {} jobs", batch.jobs.len());

            let start = Instant::now();
            let catalog = load_catalog(&batch.assets)?;
            let jobs = batch_jobs(&catalog, &batch.jobs)?;

            let runner = ExportRunner::new()?;
            let handles: Vec<JobHandle> =
                jobs.into_iter().map(|j| runner.submit_table(j)).collect();
            report_jobs(handles)?;
            println!("  Processing time: {:.2?}", start.elapsed());
        }
    }

    Ok(())
}

fn report_jobs(handles: Vec<JobHandle>) -> Result<()> {
    let total = handles.len();
    let mut failed = 0;
    for handle in handles {
        let description = handle.description().to_string();
        match handle.wait() {
            JobState::Succeeded => println!("  {} ... ok", description),
            JobState::Failed(reason) => {
                failed += 1;
                eprintln!("  {} ... FAILED: {}", description, reason);
            }
            other => {
                failed += 1;
                eprintln!("  {} ... {:?}", description, other);
            }
        }
    }
    if failed > 0 {
        anyhow::bail!("{} of {} export jobs failed", failed, total);
    }
    println!("{} export jobs completed", total);
    Ok(())
}
