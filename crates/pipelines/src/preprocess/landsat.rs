//! Harmonized Landsat 7/8 preprocessing

use crate::indices::{evi, EviParams};
use crate::preprocess::{
    bits_clear_mask, finish_scene, scale_band, PreprocessOptions, BLUE, GREEN, NIR, RED, SWIR1,
    SWIR2,
};
use defolia_core::{Image, ImageCollection, Result};

/// Landsat 7 surface reflectance bands, in harmonization order
pub const L7_SR_BANDS: [&str; 6] = ["SR_B1", "SR_B2", "SR_B3", "SR_B4", "SR_B5", "SR_B7"];

/// Landsat 8 surface reflectance bands, in harmonization order
pub const L8_SR_BANDS: [&str; 6] = ["SR_B2", "SR_B3", "SR_B4", "SR_B5", "SR_B6", "SR_B7"];

/// Common vocabulary both sensors are renamed to
pub const HARMONIZED_BANDS: [&str; 6] = [BLUE, GREEN, RED, NIR, SWIR1, SWIR2];

/// Collection 2 Level 2 scale and offset for SR bands
const SR_SCALE: f64 = 0.0000275;
const SR_OFFSET: f64 = -0.2;

/// QA_PIXEL bits that must be clear: 3 = cloud, 4 = cloud shadow
const QA_CLEAR_BITS: [u32; 2] = [3, 4];

/// Preprocess harmonized Landsat 7 + 8 collections into `EVI`/`doy`
/// scenes.
///
/// Per sensor, the QA_PIXEL cloud and shadow bits are tested and the SR
/// bands scaled before the band vocabularies are harmonized; the merged
/// collection then gets EVI with the legacy blue-plus expression.
pub fn preprocess_landsat(
    l7: &ImageCollection,
    l8: &ImageCollection,
    options: &PreprocessOptions,
) -> Result<ImageCollection> {
    let l7 = l7.map(|image| harmonize(image, &L7_SR_BANDS))?;
    let l8 = l8.map(|image| harmonize(image, &L8_SR_BANDS))?;
    let merged = l7.merge(&l8);

    let params = EviParams::landsat();
    merged.map(|image| {
        let index = evi(image.band(NIR)?, image.band(RED)?, image.band(BLUE)?, &params)?;
        let clear = image.mask_band();
        finish_scene(image, index, clear, options, "Landsat")
    })
}

/// Scale the SR bands, apply the QA mask, and rename to the common
/// vocabulary. The QA test runs on the sensor's native bands; after
/// renaming the QA_PIXEL band is gone.
fn harmonize(image: &Image, sr_bands: &[&str; 6]) -> Result<Image> {
    let clear = bits_clear_mask(image.band("QA_PIXEL")?, &QA_CLEAR_BITS)?;

    let mut scaled_bands = Vec::with_capacity(sr_bands.len());
    for (sr, common) in sr_bands.iter().zip(HARMONIZED_BANDS.iter()) {
        let band = scale_band(image.band(sr)?, SR_SCALE, SR_OFFSET)?;
        scaled_bands.push((common.to_string(), band));
    }

    let mut harmonized = Image::from_bands(scaled_bands)?.update_mask(&clear)?;
    if let Some(ts) = image.timestamp() {
        harmonized = harmonized.with_timestamp(ts);
    }
    Ok(harmonized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::EVI_BAND;
    use chrono::TimeZone;
    use defolia_core::raster::Raster;

    fn dn_band(value: f64) -> Raster<f64> {
        let mut band = Raster::filled(2, 2, value);
        band.set_nodata(Some(f64::NAN));
        band
    }

    fn l7_scene(qa: f64) -> Image {
        // DN 10909.09 scales to ~0.1, 21818.18 to ~0.4
        let mut bands = vec![];
        for (name, dn) in [
            ("SR_B1", 10909.0909),
            ("SR_B2", 10909.0909),
            ("SR_B3", 10909.0909),
            ("SR_B4", 21818.1818),
            ("SR_B5", 10909.0909),
            ("SR_B7", 10909.0909),
        ] {
            bands.push((name.to_string(), dn_band(dn)));
        }
        bands.push(("QA_PIXEL".to_string(), dn_band(qa)));
        Image::from_bands(bands)
            .unwrap()
            .with_timestamp(chrono::Utc.with_ymd_and_hms(2021, 6, 15, 15, 30, 0).unwrap())
    }

    fn l8_scene() -> Image {
        let mut bands = vec![];
        for (name, dn) in [
            ("SR_B2", 10909.0909),
            ("SR_B3", 10909.0909),
            ("SR_B4", 10909.0909),
            ("SR_B5", 21818.1818),
            ("SR_B6", 10909.0909),
            ("SR_B7", 10909.0909),
        ] {
            bands.push((name.to_string(), dn_band(dn)));
        }
        bands.push(("QA_PIXEL".to_string(), dn_band(0.0)));
        Image::from_bands(bands)
            .unwrap()
            .with_timestamp(chrono::Utc.with_ymd_and_hms(2021, 6, 23, 15, 30, 0).unwrap())
    }

    #[test]
    fn test_l7_l8_harmonization_equivalence() {
        // identical reflectances through both band maps give identical EVI
        let out = preprocess_landsat(
            &ImageCollection::from_images(vec![l7_scene(0.0)]),
            &ImageCollection::from_images(vec![l8_scene()]),
            &PreprocessOptions::default(),
        )
        .unwrap();
        assert_eq!(out.len(), 2);

        let mut values = out
            .iter()
            .map(|img| img.band(EVI_BAND).unwrap().get(0, 0).unwrap());
        let a = values.next().unwrap();
        let b = values.next().unwrap();
        assert!((a - b).abs() < 1e-9, "L7 {} vs L8 {}", a, b);
    }

    #[test]
    fn test_qa_cloud_bit_masks_scene() {
        // bit 3 set on every pixel: the whole scene is cloud
        let out = preprocess_landsat(
            &ImageCollection::from_images(vec![l7_scene(8.0)]),
            &ImageCollection::new(),
            &PreprocessOptions::default(),
        )
        .unwrap();
        let image = out.first().unwrap();
        assert!(!image.is_valid(0, 0));
        assert!(image.band(EVI_BAND).unwrap().get(0, 0).unwrap().is_nan());
    }

    #[test]
    fn test_evi_uses_legacy_blue_sign() {
        let out = preprocess_landsat(
            &ImageCollection::from_images(vec![l7_scene(0.0)]),
            &ImageCollection::new(),
            &PreprocessOptions::default(),
        )
        .unwrap();
        let got = out
            .first()
            .unwrap()
            .band(EVI_BAND)
            .unwrap()
            .get(0, 0)
            .unwrap();

        // nir 0.4, red/blue 0.1: 2.5*0.3 / (0.4 + 0.6 + 0.75 + 1)
        let expected = 2.5 * 0.3 / 2.75;
        assert!((got - expected).abs() < 1e-6, "got {}", got);
    }
}
