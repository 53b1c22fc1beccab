//! Regular covering grids used as spatial join keys

use crate::crs::Crs;
use crate::vector::{Feature, FeatureCollection};
use geo_types::{coord, Geometry, Rect};

/// Parameters for a covering grid
#[derive(Debug, Clone)]
pub struct GridParams {
    /// Grid CRS; cell edges are aligned to multiples of `cell_size`
    /// from this CRS's origin
    pub crs: Crs,
    /// Cell edge length in CRS units
    pub cell_size: f64,
}

impl GridParams {
    /// The 10 km CONUS Albers grid the summary products are reported on
    pub fn albers_10km() -> Self {
        Self {
            crs: Crs::conus_albers(),
            cell_size: 10_000.0,
        }
    }
}

/// Tessellate a bounding box with regular square cells.
///
/// Cells are aligned to the CRS origin so the same region always produces
/// the same cells with the same ids, no matter how the bounding box is
/// nudged. Each cell carries its global column/row index as property
/// `"id"` (`"{col}_{row}"`), the key every gridded product joins on.
pub fn covering_grid(
    bounds: (f64, f64, f64, f64),
    params: &GridParams,
) -> FeatureCollection {
    let (min_x, min_y, max_x, max_y) = bounds;
    let size = params.cell_size;

    let col0 = (min_x / size).floor() as i64;
    let col1 = (max_x / size).ceil() as i64;
    let row0 = (min_y / size).floor() as i64;
    let row1 = (max_y / size).ceil() as i64;

    let mut cells = FeatureCollection::new();
    for row in row0..row1 {
        for col in col0..col1 {
            let x = col as f64 * size;
            let y = row as f64 * size;
            let rect = Rect::new(
                coord! { x: x, y: y },
                coord! { x: x + size, y: y + size },
            );
            let mut cell = Feature::new(Geometry::Polygon(rect.to_polygon()));
            cell.set_property("id", format!("{}_{}", col, row));
            cell.id = Some(format!("{}_{}", col, row));
            cells.push(cell);
        }
    }
    cells
}
