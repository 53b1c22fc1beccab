//! Ordered image collections with declarative narrowing and composites

use crate::error::{Error, Result};
use crate::image::Image;
use crate::raster::Raster;
use crate::vector::PropertyFilter;
use chrono::{DateTime, Utc};

/// An ordered stack of [`Image`]s.
///
/// Filters narrow the stack declaratively and compose conjunctively by
/// chaining; a filter that matches nothing yields an empty collection
/// that flows silently through composites (which then return `None`).
#[derive(Debug, Clone, Default)]
pub struct ImageCollection {
    images: Vec<Image>,
}

impl ImageCollection {
    pub fn new() -> Self {
        Self { images: Vec::new() }
    }

    pub fn from_images(images: Vec<Image>) -> Self {
        Self { images }
    }

    pub fn push(&mut self, image: Image) {
        self.images.push(image);
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn first(&self) -> Option<&Image> {
        self.images.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Image> {
        self.images.iter()
    }

    // Narrowing

    /// Keep images acquired in `[start, end)`. Images without a
    /// timestamp never match a date filter.
    pub fn filter_date(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> ImageCollection {
        self.retain(|img| {
            img.timestamp()
                .map(|ts| ts >= start && ts < end)
                .unwrap_or(false)
        })
    }

    /// Keep images whose ordinal day falls in `start..=end`
    pub fn filter_day_of_year(&self, start: u16, end: u16) -> ImageCollection {
        self.retain(|img| {
            img.day_of_year()
                .map(|doy| doy >= start && doy <= end)
                .unwrap_or(false)
        })
    }

    /// Keep images whose footprint intersects the bounding box
    pub fn filter_bounds(&self, bounds: (f64, f64, f64, f64)) -> ImageCollection {
        let (min_x, min_y, max_x, max_y) = bounds;
        self.retain(|img| {
            let (bx0, by0, bx1, by1) = img.bounds();
            bx0 <= max_x && bx1 >= min_x && by0 <= max_y && by1 >= min_y
        })
    }

    /// Keep images whose properties match the predicate
    pub fn filter(&self, filter: &PropertyFilter) -> ImageCollection {
        self.retain(|img| filter.matches(img.properties()))
    }

    fn retain(&self, pred: impl Fn(&Image) -> bool) -> ImageCollection {
        ImageCollection {
            images: self.images.iter().filter(|i| pred(i)).cloned().collect(),
        }
    }

    // Transformation

    /// Apply a fallible per-image transformation
    pub fn map(&self, f: impl Fn(&Image) -> Result<Image>) -> Result<ImageCollection> {
        let mut out = Vec::with_capacity(self.images.len());
        for image in &self.images {
            out.push(f(image)?);
        }
        Ok(ImageCollection { images: out })
    }

    /// Concatenate two collections, keeping order
    pub fn merge(&self, other: &ImageCollection) -> ImageCollection {
        let mut images = self.images.clone();
        images.extend(other.images.iter().cloned());
        ImageCollection { images }
    }

    /// Select the same band subset from every image
    pub fn select(&self, names: &[&str]) -> Result<ImageCollection> {
        self.map(|img| img.select(names))
    }

    /// Sort by acquisition time, earliest first; untimestamped images sort last
    pub fn sort_by_time(&self) -> ImageCollection {
        let mut images = self.images.clone();
        images.sort_by_key(|img| img.timestamp().map(|ts| ts.timestamp()).unwrap_or(i64::MAX));
        ImageCollection { images }
    }

    /// Attach the named bands of the timestamp-matched image from another
    /// collection to each image here. Images with no match are dropped;
    /// this is a join, not a decoration.
    pub fn link(&self, other: &ImageCollection, bands: &[&str]) -> Result<ImageCollection> {
        let mut out = Vec::new();
        for image in &self.images {
            let Some(ts) = image.timestamp() else {
                continue;
            };
            let Some(matched) = other.images.iter().find(|o| o.timestamp() == Some(ts)) else {
                continue;
            };
            let mut linked = image.clone();
            for name in bands {
                linked.add_band(*name, matched.band(name)?.clone())?;
            }
            out.push(linked);
        }
        Ok(ImageCollection { images: out })
    }

    // Composites

    /// First valid pixel in collection order
    pub fn mosaic(&self) -> Result<Option<Image>> {
        self.composite(Composite::Mosaic)
    }

    /// Per-pixel mean over valid samples
    pub fn mean(&self) -> Result<Option<Image>> {
        self.composite(Composite::Mean)
    }

    /// Per-pixel sum over valid samples
    pub fn sum(&self) -> Result<Option<Image>> {
        self.composite(Composite::Sum)
    }

    /// Per-pixel maximum over valid samples
    pub fn max(&self) -> Result<Option<Image>> {
        self.composite(Composite::Max)
    }

    fn composite(&self, op: Composite) -> Result<Option<Image>> {
        let Some(template) = self.images.first() else {
            return Ok(None);
        };
        let (rows, cols) = template.shape();
        let band_names: Vec<String> =
            template.band_names().iter().map(|s| s.to_string()).collect();

        for image in &self.images {
            if image.shape() != (rows, cols) {
                return Err(Error::SizeMismatch {
                    er: rows,
                    ec: cols,
                    ar: image.rows(),
                    ac: image.cols(),
                });
            }
            for name in &band_names {
                image.band(name)?;
            }
        }

        let mut out_bands: Vec<(String, Raster<f64>)> = Vec::with_capacity(band_names.len());
        let mut any_valid: Raster<u8> = template.mask_band().like(0);

        for name in &band_names {
            let sources: Vec<&Raster<f64>> = self
                .images
                .iter()
                .map(|i| i.band(name))
                .collect::<Result<_>>()?;

            let mut band = template.constant_band(f64::NAN);
            for row in 0..rows {
                for col in 0..cols {
                    let mut acc = f64::NAN;
                    let mut count = 0usize;
                    for (image, source) in self.images.iter().zip(&sources) {
                        if !image.is_valid(row, col) {
                            continue;
                        }
                        // SAFETY: every image shares the template shape
                        let v = unsafe { source.get_unchecked(row, col) };
                        if v.is_nan() {
                            continue;
                        }
                        count += 1;
                        match op {
                            Composite::Mosaic => {
                                acc = v;
                                break;
                            }
                            Composite::Mean | Composite::Sum => {
                                acc = if count == 1 { v } else { acc + v };
                            }
                            Composite::Max => {
                                acc = if count == 1 { v } else { acc.max(v) };
                            }
                        }
                    }
                    if count > 0 {
                        let value = match op {
                            Composite::Mean => acc / count as f64,
                            _ => acc,
                        };
                        unsafe {
                            band.set_unchecked(row, col, value);
                            any_valid.set_unchecked(row, col, 1);
                        }
                    }
                }
            }
            out_bands.push((name.clone(), band));
        }

        let composite = Image::from_bands(out_bands)?.update_mask(&any_valid)?;
        Ok(Some(composite))
    }
}

impl IntoIterator for ImageCollection {
    type Item = Image;
    type IntoIter = std::vec::IntoIter<Image>;

    fn into_iter(self) -> Self::IntoIter {
        self.images.into_iter()
    }
}

#[derive(Debug, Clone, Copy)]
enum Composite {
    Mosaic,
    Mean,
    Sum,
    Max,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn make_image(values: &[f64], day: u32, rows: usize, cols: usize) -> Image {
        let mut band = Raster::from_vec(values.to_vec(), rows, cols).unwrap();
        band.set_nodata(Some(f64::NAN));
        Image::from_band("EVI", band)
            .unwrap()
            .with_timestamp(Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap()
                + chrono::Duration::days(day as i64 - 1))
    }

    #[test]
    fn test_filter_date_half_open() {
        let collection = ImageCollection::from_images(vec![
            make_image(&[1.0; 4], 100, 2, 2),
            make_image(&[2.0; 4], 150, 2, 2),
            make_image(&[3.0; 4], 200, 2, 2),
        ]);

        let start = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap()
            + chrono::Duration::days(99);
        let end = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap()
            + chrono::Duration::days(199);
        let narrowed = collection.filter_date(start, end);
        assert_eq!(narrowed.len(), 2);

        // end boundary excluded
        let exact_end = collection.filter_date(
            start,
            Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::days(149),
        );
        assert_eq!(exact_end.len(), 1);
    }

    #[test]
    fn test_filter_day_of_year_inclusive() {
        let collection = ImageCollection::from_images(vec![
            make_image(&[1.0; 4], 161, 2, 2),
            make_image(&[2.0; 4], 208, 2, 2),
            make_image(&[3.0; 4], 209, 2, 2),
        ]);
        assert_eq!(collection.filter_day_of_year(161, 208).len(), 2);
    }

    #[test]
    fn test_empty_filter_flows_through_composites() {
        let collection = ImageCollection::from_images(vec![make_image(&[1.0; 4], 100, 2, 2)]);
        let none = collection.filter_day_of_year(300, 350);
        assert!(none.is_empty());
        assert!(none.mean().unwrap().is_none());
        assert!(none.mosaic().unwrap().is_none());
    }

    #[test]
    fn test_mean_skips_invalid_samples() {
        let a = make_image(&[1.0, 1.0, f64::NAN, 1.0], 100, 2, 2);
        let b = make_image(&[3.0, 3.0, 3.0, 3.0], 150, 2, 2);

        let mean = ImageCollection::from_images(vec![a, b])
            .mean()
            .unwrap()
            .unwrap();
        let band = mean.band("EVI").unwrap();
        assert_eq!(band.get(0, 0).unwrap(), 2.0);
        // only one valid sample at (1, 0)
        assert_eq!(band.get(1, 0).unwrap(), 3.0);
    }

    #[test]
    fn test_mosaic_takes_first_valid() {
        let mut first = make_image(&[1.0, f64::NAN, 1.0, 1.0], 100, 2, 2);
        let mut mask: Raster<u8> = Raster::filled(2, 2, 1);
        mask.set(1, 1, 0).unwrap();
        first = first.update_mask(&mask).unwrap();
        let second = make_image(&[9.0, 9.0, 9.0, 9.0], 150, 2, 2);

        let mosaic = ImageCollection::from_images(vec![first, second])
            .mosaic()
            .unwrap()
            .unwrap();
        let band = mosaic.band("EVI").unwrap();
        assert_eq!(band.get(0, 0).unwrap(), 1.0);
        // NaN and masked pixels fall through to the next image
        assert_eq!(band.get(0, 1).unwrap(), 9.0);
        assert_eq!(band.get(1, 1).unwrap(), 9.0);
    }

    #[test]
    fn test_link_attaches_bands_by_timestamp() {
        let optical = make_image(&[0.5; 4], 100, 2, 2);
        let score = {
            let mut band = Raster::from_vec(vec![0.9; 4], 2, 2).unwrap();
            band.set_nodata(Some(f64::NAN));
            Image::from_band("cs_cdf", band)
                .unwrap()
                .with_timestamp(optical.timestamp().unwrap())
        };
        let unmatched = make_image(&[0.5; 4], 200, 2, 2);

        let linked = ImageCollection::from_images(vec![optical, unmatched])
            .link(
                &ImageCollection::from_images(vec![score]),
                &["cs_cdf"],
            )
            .unwrap();
        assert_eq!(linked.len(), 1);
        assert!(linked.first().unwrap().has_band("cs_cdf"));
    }
}
