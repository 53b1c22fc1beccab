//! I/O: GeoTIFF rasters and selector-driven tables

mod geotiff;
mod table;

pub use geotiff::{read_geotiff, write_geotiff, GeoTiffOptions};
pub use table::{read_geojson, write_csv, write_geojson, TableFormat, GEO_SELECTOR};
