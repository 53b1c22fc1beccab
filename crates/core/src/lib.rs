//! # defolia Core
//!
//! Typed data model and io for the defolia analysis pipelines.
//!
//! This crate provides:
//! - `Raster<T>`: Generic georeferenced raster grid
//! - `Image` / `ImageCollection`: multi-band imagery with validity masks,
//!   properties and acquisition timestamps
//! - `Feature` / `FeatureCollection`: vector records with property
//!   filters, null-excluding aggregates and inner joins
//! - `covering_grid`: regular cell tessellations used as join keys
//! - `Reducer`: named aggregation selectors
//! - I/O for GeoTIFF rasters and selector-driven CSV/GeoJSON tables

pub mod crs;
pub mod error;
pub mod image;
pub mod io;
pub mod raster;
pub mod reducer;
pub mod vector;

pub use crs::Crs;
pub use error::{Error, Result};
pub use image::{Image, ImageCollection};
pub use raster::{GeoTransform, Raster, RasterElement};
pub use reducer::Reducer;
pub use vector::{covering_grid, Feature, FeatureCollection, PropertyFilter, PropertyValue};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::crs::Crs;
    pub use crate::error::{Error, Result};
    pub use crate::image::{Image, ImageCollection};
    pub use crate::raster::{GeoTransform, Raster, RasterElement};
    pub use crate::reducer::Reducer;
    pub use crate::vector::{
        covering_grid, Feature, FeatureCollection, GridParams, PropertyFilter, PropertyValue,
    };
}
