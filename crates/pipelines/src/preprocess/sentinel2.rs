//! Sentinel-2 L2A preprocessing

use crate::indices::{evi, EviParams};
use crate::preprocess::{finish_scene, gte_mask, scale_band, PreprocessOptions};
use defolia_core::{ImageCollection, Result};

/// Cloud Score+ QA band linked onto each scene
pub const CLOUD_SCORE_BAND: &str = "cs_cdf";

/// Minimum Cloud Score+ value counted as clear sky
pub const CLEAR_THRESHOLD: f64 = 0.65;

/// Reflectance scale divisor for the harmonized L2A archive
const REFLECTANCE_SCALE: f64 = 1.0 / 10_000.0;

/// Preprocess a Sentinel-2 collection into `EVI`/`doy` scenes.
///
/// Each scene is linked with its Cloud Score+ image by timestamp (scenes
/// without a score are dropped), reflectances are scaled from DN, EVI is
/// computed from B8/B4/B2 with the standard blue-minus expression, and
/// the validity mask keeps pixels with `cs_cdf >= CLEAR_THRESHOLD` and
/// EVI in [0, 1], plus whatever the options add.
pub fn preprocess_sentinel2(
    collection: &ImageCollection,
    cloud_scores: &ImageCollection,
    options: &PreprocessOptions,
) -> Result<ImageCollection> {
    let linked = collection.link(cloud_scores, &[CLOUD_SCORE_BAND])?;
    if linked.len() < collection.len() {
        tracing::warn!(
            scenes = collection.len(),
            linked = linked.len(),
            "scenes without a cloud score were dropped"
        );
    }

    let params = EviParams::default();
    linked.map(|image| {
        let nir = scale_band(image.band("B8")?, REFLECTANCE_SCALE, 0.0)?;
        let red = scale_band(image.band("B4")?, REFLECTANCE_SCALE, 0.0)?;
        let blue = scale_band(image.band("B2")?, REFLECTANCE_SCALE, 0.0)?;

        let index = evi(&nir, &red, &blue, &params)?;
        let clear = gte_mask(image.band(CLOUD_SCORE_BAND)?, CLEAR_THRESHOLD)?;

        finish_scene(image, index, clear, options, "S2")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::{DOY_BAND, EVI_BAND};
    use chrono::TimeZone;
    use defolia_core::raster::Raster;
    use defolia_core::Image;

    fn dn_band(value: f64, rows: usize, cols: usize) -> Raster<f64> {
        let mut band = Raster::filled(rows, cols, value);
        band.set_nodata(Some(f64::NAN));
        band
    }

    fn scene(cs: &[f64]) -> (ImageCollection, ImageCollection) {
        let ts = chrono::Utc.with_ymd_and_hms(2021, 6, 10, 15, 0, 0).unwrap();
        let image = Image::from_bands(vec![
            ("B2".to_string(), dn_band(500.0, 2, 2)),
            ("B4".to_string(), dn_band(1000.0, 2, 2)),
            ("B8".to_string(), dn_band(5000.0, 2, 2)),
        ])
        .unwrap()
        .with_timestamp(ts);

        let mut score_band = Raster::from_vec(cs.to_vec(), 2, 2).unwrap();
        score_band.set_nodata(Some(f64::NAN));
        let score = Image::from_band(CLOUD_SCORE_BAND, score_band)
            .unwrap()
            .with_timestamp(ts);

        (
            ImageCollection::from_images(vec![image]),
            ImageCollection::from_images(vec![score]),
        )
    }

    #[test]
    fn test_preprocess_scales_and_masks() {
        let (scenes, scores) = scene(&[0.9, 0.9, 0.5, 0.9]);
        let out = preprocess_sentinel2(&scenes, &scores, &PreprocessOptions::default()).unwrap();
        assert_eq!(out.len(), 1);

        let image = out.first().unwrap();
        assert_eq!(image.band_names(), vec![EVI_BAND, DOY_BAND]);

        // 2.5 * (0.5 - 0.1) / (0.5 + 0.6 - 0.375 + 1)
        let expected = 2.5 * 0.4 / 1.725;
        let got = image.band(EVI_BAND).unwrap().get(0, 0).unwrap();
        assert!((got - expected).abs() < 1e-9);

        // cloudy pixel masked out, not zeroed
        assert!(!image.is_valid(1, 0));
        assert!(image.band(EVI_BAND).unwrap().get(1, 0).unwrap().is_nan());

        // June 10 is day 161
        assert_eq!(image.band(DOY_BAND).unwrap().get(0, 0).unwrap(), 161.0);
        assert_eq!(
            image.property("source"),
            Some(&defolia_core::PropertyValue::String("S2".to_string()))
        );
    }

    #[test]
    fn test_unlinked_scene_is_dropped() {
        let ts = chrono::Utc.with_ymd_and_hms(2021, 7, 1, 15, 0, 0).unwrap();
        let lonely = Image::from_bands(vec![
            ("B2".to_string(), dn_band(500.0, 2, 2)),
            ("B4".to_string(), dn_band(1000.0, 2, 2)),
            ("B8".to_string(), dn_band(5000.0, 2, 2)),
        ])
        .unwrap()
        .with_timestamp(ts);

        let out = preprocess_sentinel2(
            &ImageCollection::from_images(vec![lonely]),
            &ImageCollection::new(),
            &PreprocessOptions::default(),
        )
        .unwrap();
        assert!(out.is_empty());
    }
}
