//! Multi-band images with validity masks and acquisition metadata

mod collection;

pub use collection::ImageCollection;

use crate::crs::Crs;
use crate::error::{Error, Result};
use crate::raster::{GeoTransform, Raster};
use crate::vector::PropertyValue;
use chrono::{DateTime, Datelike, Utc};
use std::collections::HashMap;

/// A multi-band image: uniquely named `f64` bands on a shared grid, a
/// per-pixel validity mask, a property map and an optional acquisition
/// timestamp.
///
/// Bands are stored as [`Raster<f64>`] with NaN as no-data, so individual
/// bands can be handed to band math without copying metadata around. The
/// mask is the single source of pixel validity: masking is monotone (it
/// only ever shrinks) and masked pixels read NaN in every band.
#[derive(Debug, Clone)]
pub struct Image {
    bands: Vec<(String, Raster<f64>)>,
    mask: Raster<u8>,
    transform: GeoTransform,
    crs: Option<Crs>,
    properties: HashMap<String, PropertyValue>,
    timestamp: Option<DateTime<Utc>>,
}

impl Image {
    /// Build an image from named bands. The first band defines the grid;
    /// the rest must match its shape.
    pub fn from_bands(bands: Vec<(String, Raster<f64>)>) -> Result<Self> {
        let Some((_, first)) = bands.first() else {
            return Err(Error::Other("image needs at least one band".to_string()));
        };
        let (rows, cols) = first.shape();
        let transform = *first.transform();
        let crs = first.crs().cloned();

        let mut image = Self {
            bands: Vec::with_capacity(bands.len()),
            mask: {
                let mut m: Raster<u8> = Raster::filled(rows, cols, 1);
                m.set_transform(transform);
                m.set_crs(crs.clone());
                m
            },
            transform,
            crs,
            properties: HashMap::new(),
            timestamp: None,
        };
        for (name, band) in bands {
            image.add_band(name, band)?;
        }
        Ok(image)
    }

    /// Single-band convenience constructor
    pub fn from_band(name: impl Into<String>, band: Raster<f64>) -> Result<Self> {
        Self::from_bands(vec![(name.into(), band)])
    }

    // Bands

    pub fn band_names(&self) -> Vec<&str> {
        self.bands.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn has_band(&self, name: &str) -> bool {
        self.bands.iter().any(|(n, _)| n == name)
    }

    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    /// Get a band by name
    pub fn band(&self, name: &str) -> Result<&Raster<f64>> {
        self.bands
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, b)| b)
            .ok_or_else(|| Error::BandNotFound(name.to_string()))
    }

    /// Add a band; its georeferencing is overwritten with the image's
    pub fn add_band(&mut self, name: impl Into<String>, mut band: Raster<f64>) -> Result<()> {
        let name = name.into();
        if self.has_band(&name) {
            return Err(Error::DuplicateBand(name));
        }
        let (rows, cols) = self.shape();
        if band.shape() != (rows, cols) {
            return Err(Error::SizeMismatch {
                er: rows,
                ec: cols,
                ar: band.rows(),
                ac: band.cols(),
            });
        }
        band.set_transform(self.transform);
        band.set_crs(self.crs.clone());
        band.set_nodata(Some(f64::NAN));
        self.bands.push((name, band));
        Ok(())
    }

    /// Builder-style band addition
    pub fn with_band(mut self, name: impl Into<String>, band: Raster<f64>) -> Result<Self> {
        self.add_band(name, band)?;
        Ok(self)
    }

    /// Subset bands by name, keeping mask, properties and timestamp
    pub fn select(&self, names: &[&str]) -> Result<Image> {
        self.select_renamed(names, names)
    }

    /// Subset bands and rename them in one pass. Both slices must have
    /// the same length; this is how sensor band vocabularies are
    /// harmonized to a common one.
    pub fn select_renamed(&self, names: &[&str], renamed: &[&str]) -> Result<Image> {
        if names.len() != renamed.len() {
            return Err(Error::InvalidParameter {
                name: "renamed",
                value: format!("{} names for {} bands", renamed.len(), names.len()),
                reason: "selection and rename lists must have the same length".to_string(),
            });
        }
        let mut bands = Vec::with_capacity(names.len());
        for (old, new) in names.iter().zip(renamed.iter()) {
            let band = self.band(old)?.clone();
            bands.push((new.to_string(), band));
        }
        let mut image = Image::from_bands(bands)?;
        image.mask = self.mask.clone();
        image.properties = self.properties.clone();
        image.timestamp = self.timestamp;
        Ok(image)
    }

    /// Zero-filled band on this image's grid
    pub fn constant_band(&self, value: f64) -> Raster<f64> {
        let mut band: Raster<f64> = Raster::filled(self.rows(), self.cols(), value);
        band.set_transform(self.transform);
        band.set_crs(self.crs.clone());
        band.set_nodata(Some(f64::NAN));
        band
    }

    // Mask handling

    /// Intersect the validity mask with another (non-zero = keep).
    ///
    /// Invalidated pixels become NaN in every band; they are no-data from
    /// here on, never zero.
    pub fn update_mask(&self, mask: &Raster<u8>) -> Result<Image> {
        let (rows, cols) = self.shape();
        if mask.shape() != (rows, cols) {
            return Err(Error::SizeMismatch {
                er: rows,
                ec: cols,
                ar: mask.rows(),
                ac: mask.cols(),
            });
        }

        let mut out = self.clone();
        for row in 0..rows {
            for col in 0..cols {
                // SAFETY: row/col bounded by shape above
                let keep = unsafe { mask.get_unchecked(row, col) } != 0
                    && unsafe { out.mask.get_unchecked(row, col) } != 0;
                if !keep {
                    unsafe { out.mask.set_unchecked(row, col, 0) };
                    for (_, band) in out.bands.iter_mut() {
                        unsafe { band.set_unchecked(row, col, f64::NAN) };
                    }
                }
            }
        }
        Ok(out)
    }

    /// Copy of the validity mask as a 0/1 raster
    pub fn mask_band(&self) -> Raster<u8> {
        self.mask.clone()
    }

    /// Replace invalid pixels with a fill value and mark them valid
    pub fn unmask(&self, fill: f64) -> Image {
        let (rows, cols) = self.shape();
        let mut out = self.clone();
        for row in 0..rows {
            for col in 0..cols {
                if unsafe { out.mask.get_unchecked(row, col) } == 0 {
                    unsafe { out.mask.set_unchecked(row, col, 1) };
                    for (_, band) in out.bands.iter_mut() {
                        unsafe { band.set_unchecked(row, col, fill) };
                    }
                }
            }
        }
        out
    }

    /// Invalidate every pixel whose center falls outside the bounding box
    pub fn clip(&self, bounds: (f64, f64, f64, f64)) -> Result<Image> {
        let (min_x, min_y, max_x, max_y) = bounds;
        let (rows, cols) = self.shape();
        let mut keep: Raster<u8> = Raster::filled(rows, cols, 0);
        for row in 0..rows {
            for col in 0..cols {
                let (x, y) = self.transform.pixel_to_geo(col, row);
                if x >= min_x && x <= max_x && y >= min_y && y <= max_y {
                    unsafe { keep.set_unchecked(row, col, 1) };
                }
            }
        }
        self.update_mask(&keep)
    }

    /// Pixel validity at (row, col), false outside the grid
    pub fn is_valid(&self, row: usize, col: usize) -> bool {
        self.mask.get(row, col).map(|m| m != 0).unwrap_or(false)
    }

    // Grid metadata

    pub fn rows(&self) -> usize {
        self.mask.rows()
    }

    pub fn cols(&self) -> usize {
        self.mask.cols()
    }

    pub fn shape(&self) -> (usize, usize) {
        self.mask.shape()
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn crs(&self) -> Option<&Crs> {
        self.crs.as_ref()
    }

    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        self.transform.bounds(self.cols(), self.rows())
    }

    /// Ground area in square metres of a pixel in the given row
    pub fn pixel_area(&self, row: usize) -> f64 {
        let geographic = self.crs.as_ref().map(Crs::is_geographic).unwrap_or(false);
        self.transform.pixel_area(row, geographic)
    }

    // Properties and time

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn with_property(
        mut self,
        key: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> Self {
        self.set_property(key, value);
        self
    }

    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }

    pub fn property_number(&self, key: &str) -> Option<f64> {
        self.properties.get(key).and_then(PropertyValue::as_f64)
    }

    pub fn properties(&self) -> &HashMap<String, PropertyValue> {
        &self.properties
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// 1-based ordinal day of the acquisition date
    pub fn day_of_year(&self) -> Result<u16> {
        let ts = self.timestamp.ok_or(Error::MissingTimestamp)?;
        Ok(ts.ordinal() as u16)
    }

    /// Acquisition year
    pub fn year(&self) -> Result<i32> {
        let ts = self.timestamp.ok_or(Error::MissingTimestamp)?;
        Ok(ts.year())
    }
}
