//! Export job descriptions and their writers
//!
//! A job bundles the finished product with everything the writer needs.
//! The description doubles as the output file stem, so independently
//! named jobs never contend for the same file and re-running one simply
//! rewrites its own output.

use std::path::PathBuf;

use defolia_core::io::{write_csv, write_geojson, write_geotiff, GeoTiffOptions, TableFormat};
use defolia_core::{Crs, Error, FeatureCollection, Image};
use tracing::info;

use crate::error::{EngineError, Result};

/// Render ceiling applied when a job does not set its own
pub const DEFAULT_MAX_PIXELS: u64 = 100_000_000;

/// A feature table headed for disk
#[derive(Debug, Clone)]
pub struct TableExport {
    pub collection: FeatureCollection,
    /// Job name and output file stem
    pub description: String,
    /// Directory the output lands in, created if missing
    pub folder: PathBuf,
    pub format: TableFormat,
    /// Columns in output order; `".geo"` selects the geometry
    pub selectors: Vec<String>,
}

impl TableExport {
    pub fn output_path(&self) -> PathBuf {
        self.folder
            .join(format!("{}.{}", self.description, self.format.extension()))
    }

    pub(crate) fn run(&self) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.folder)?;
        let path = self.output_path();
        let selectors: Vec<&str> = self.selectors.iter().map(String::as_str).collect();
        match self.format {
            TableFormat::Csv => write_csv(&self.collection, &path, &selectors)?,
            TableFormat::GeoJson => write_geojson(&self.collection, &path, &selectors)?,
        }
        info!(rows = self.collection.len(), path = %path.display(), "table written");
        Ok(path)
    }
}

/// A rendered image headed for disk as GeoTIFF, one file per band
#[derive(Debug, Clone)]
pub struct ImageExport {
    pub image: Image,
    /// Job name and output file stem
    pub description: String,
    /// Directory the output lands in, created if missing
    pub folder: PathBuf,
    /// Required output CRS; a differing image is an error, the local
    /// evaluator does not reproject
    pub crs: Option<Crs>,
    /// Required ground resolution in metres, checked against the grid
    pub scale: Option<f64>,
    /// Ceiling on pixels times bands, refusing oversized renders before
    /// any file is touched
    pub max_pixels: u64,
    /// Bounds to clip to before rendering
    pub region: Option<(f64, f64, f64, f64)>,
}

impl ImageExport {
    pub fn new(image: Image, description: impl Into<String>, folder: impl Into<PathBuf>) -> Self {
        Self {
            image,
            description: description.into(),
            folder: folder.into(),
            crs: None,
            scale: None,
            max_pixels: DEFAULT_MAX_PIXELS,
            region: None,
        }
    }

    pub(crate) fn run(&self) -> Result<Vec<PathBuf>> {
        if let (Some(want), Some(have)) = (self.crs.as_ref(), self.image.crs()) {
            if !want.is_equivalent(have) {
                return Err(Error::CrsMismatch(have.identifier(), want.identifier()).into());
            }
        }
        if let Some(scale) = self.scale {
            let actual = self.image.transform().cell_size();
            if (scale - actual).abs() > 1e-6 {
                return Err(EngineError::ScaleMismatch {
                    requested: scale,
                    actual,
                });
            }
        }

        let rendered = match self.region {
            Some(bounds) => self.image.clip(bounds)?,
            None => self.image.clone(),
        };
        let (rows, cols) = rendered.shape();
        let required = (rows * cols * rendered.band_count()) as u64;
        if required > self.max_pixels {
            return Err(EngineError::TooManyPixels {
                required,
                max_pixels: self.max_pixels,
            });
        }

        std::fs::create_dir_all(&self.folder)?;
        let options = GeoTiffOptions {
            crs: self.crs.clone(),
        };
        let single = rendered.band_count() == 1;
        let mut written = Vec::with_capacity(rendered.band_count());
        for name in rendered.band_names() {
            let file = if single {
                format!("{}.tif", self.description)
            } else {
                format!("{}_{}.tif", self.description, name)
            };
            let path = self.folder.join(file);
            write_geotiff(rendered.band(name)?, &path, &options)?;
            info!(band = name, path = %path.display(), "band written");
            written.push(path);
        }
        Ok(written)
    }
}
