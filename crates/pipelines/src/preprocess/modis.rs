//! MODIS daily surface reflectance preprocessing
//!
//! The 250 m reflectance product carries no usable QA of its own, so
//! each scene is linked with its same-day 1 km companion and screened
//! with that product's observation count and state flags.

use crate::indices::{evi, EviParams};
use crate::preprocess::{
    bits_clear_mask, finish_scene, gte_mask, intersect_masks, scale_band, PreprocessOptions,
};
use defolia_core::{ImageCollection, Result};

/// Reflectance bands on the 250 m product
const RED_SR: &str = "sur_refl_b01";
const NIR_SR: &str = "sur_refl_b02";

/// Bands pulled across from the 1 km companion product
const BLUE_SR: &str = "sur_refl_b03";
const OBS_BAND: &str = "num_observations_1km";
const STATE_BAND: &str = "state_1km";

/// state_1km bits that must be clear: 2 = shadow, 8/9 = cirrus,
/// 10 = internal cloud, 15 = snow
const STATE_CLEAR_BITS: [u32; 5] = [2, 8, 9, 10, 15];

const REFLECTANCE_SCALE: f64 = 1.0 / 10_000.0;

/// Preprocess daily MODIS reflectance into `EVI`/`doy` scenes.
///
/// `reflectance` is the 250 m product, `companion` the 1 km product the
/// QA and blue bands come from; scenes without a same-day companion are
/// dropped. The blue-plus EVI expression is used, matching the Landsat
/// path.
pub fn preprocess_modis(
    reflectance: &ImageCollection,
    companion: &ImageCollection,
    options: &PreprocessOptions,
) -> Result<ImageCollection> {
    let before = reflectance.len();
    let linked = reflectance.link(companion, &[OBS_BAND, STATE_BAND, BLUE_SR])?;
    if linked.len() < before {
        tracing::warn!(
            dropped = before - linked.len(),
            "scenes without a 1 km companion dropped"
        );
    }

    let params = EviParams::landsat();
    linked.map(|image| {
        let observed = gte_mask(image.band(OBS_BAND)?, 1.0)?;
        let clear = bits_clear_mask(image.band(STATE_BAND)?, &STATE_CLEAR_BITS)?;
        let qa = intersect_masks(&observed, &clear)?;

        let nir = scale_band(image.band(NIR_SR)?, REFLECTANCE_SCALE, 0.0)?;
        let red = scale_band(image.band(RED_SR)?, REFLECTANCE_SCALE, 0.0)?;
        let blue = scale_band(image.band(BLUE_SR)?, REFLECTANCE_SCALE, 0.0)?;
        let index = evi(&nir, &red, &blue, &params)?;

        finish_scene(image, index, qa, options, "MODIS")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::{ForestMask, EVI_BAND};
    use chrono::TimeZone;
    use defolia_core::raster::Raster;
    use defolia_core::Image;

    fn dn_band(values: &[f64]) -> Raster<f64> {
        let mut band = Raster::from_vec(values.to_vec(), 2, 2).unwrap();
        band.set_nodata(Some(f64::NAN));
        band
    }

    fn day(d: u32) -> chrono::DateTime<chrono::Utc> {
        chrono::Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap()
            + chrono::Duration::days(d as i64 - 1)
    }

    fn reflectance_scene(d: u32) -> Image {
        Image::from_bands(vec![
            (RED_SR.to_string(), dn_band(&[1000.0; 4])),
            (NIR_SR.to_string(), dn_band(&[4000.0; 4])),
        ])
        .unwrap()
        .with_timestamp(day(d))
    }

    fn companion_scene(d: u32, obs: &[f64], state: &[f64]) -> Image {
        Image::from_bands(vec![
            (OBS_BAND.to_string(), dn_band(obs)),
            (STATE_BAND.to_string(), dn_band(state)),
            (BLUE_SR.to_string(), dn_band(&[1000.0; 4])),
        ])
        .unwrap()
        .with_timestamp(day(d))
    }

    #[test]
    fn test_clear_pixel_evi() {
        let out = preprocess_modis(
            &ImageCollection::from_images(vec![reflectance_scene(160)]),
            &ImageCollection::from_images(vec![companion_scene(160, &[2.0; 4], &[0.0; 4])]),
            &PreprocessOptions::default(),
        )
        .unwrap();
        assert_eq!(out.len(), 1);

        let image = out.first().unwrap();
        let got = image.band(EVI_BAND).unwrap().get(0, 0).unwrap();
        // nir 0.4, red/blue 0.1 through the blue-plus form
        let expected = 2.5 * 0.3 / 2.75;
        assert!((got - expected).abs() < 1e-9, "got {}", got);
        assert_eq!(
            image.property("source"),
            Some(&defolia_core::PropertyValue::String("MODIS".to_string()))
        );
    }

    #[test]
    fn test_state_and_observation_gates() {
        // (0,0) clear, (0,1) internal cloud, (1,0) snow, (1,1) never observed
        let state = [0.0, 1024.0, 32768.0, 0.0];
        let obs = [1.0, 1.0, 1.0, 0.0];
        let out = preprocess_modis(
            &ImageCollection::from_images(vec![reflectance_scene(160)]),
            &ImageCollection::from_images(vec![companion_scene(160, &obs, &state)]),
            &PreprocessOptions::default(),
        )
        .unwrap();

        let image = out.first().unwrap();
        assert!(image.is_valid(0, 0));
        assert!(!image.is_valid(0, 1));
        assert!(!image.is_valid(1, 0));
        assert!(!image.is_valid(1, 1));
    }

    #[test]
    fn test_unlinked_scene_dropped() {
        let out = preprocess_modis(
            &ImageCollection::from_images(vec![
                reflectance_scene(160),
                reflectance_scene(161),
            ]),
            &ImageCollection::from_images(vec![companion_scene(160, &[1.0; 4], &[0.0; 4])]),
            &PreprocessOptions::default(),
        )
        .unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_igbp_forest_mask() {
        let mut landcover: Raster<i32> = Raster::new(2, 2);
        landcover.set(0, 0, 4).unwrap();
        landcover.set(0, 1, 13).unwrap();
        landcover.set(1, 0, 1).unwrap();
        landcover.set(1, 1, 16).unwrap();

        let options = PreprocessOptions {
            forest_mask: Some(ForestMask::igbp(landcover)),
            ..Default::default()
        };
        let out = preprocess_modis(
            &ImageCollection::from_images(vec![reflectance_scene(160)]),
            &ImageCollection::from_images(vec![companion_scene(160, &[1.0; 4], &[0.0; 4])]),
            &options,
        )
        .unwrap();

        let image = out.first().unwrap();
        assert!(image.is_valid(0, 0));
        assert!(!image.is_valid(0, 1));
        assert!(image.is_valid(1, 0));
        assert!(!image.is_valid(1, 1));
    }
}
