//! Lagged climate windows against the DAYMET archive
//!
//! For a given lag, one calendar month ending `lag - 1` months before
//! June 1 of the target year is summed and compared with the long-run
//! climatology of the same month. Running the full 1..=24 lag range
//! builds the predictor table for the climate correlation study.

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Duration, Months, TimeZone, Utc};
use defolia_core::{
    Error, FeatureCollection, Image, ImageCollection, Raster, Reducer, Result,
};
use rayon::prelude::*;
use tracing::warn;

use crate::reduce::{reduce_regions, ReduceRegionsOptions};

/// DAYMET variable the window aggregates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClimateVariable {
    /// Daily precipitation, mm
    Prcp,
    /// Daily maximum temperature, degrees C
    Tmax,
}

impl ClimateVariable {
    pub fn band(self) -> &'static str {
        match self {
            ClimateVariable::Prcp => "prcp",
            ClimateVariable::Tmax => "tmax",
        }
    }
}

/// Window selection for one lag
#[derive(Debug, Clone)]
pub struct ClimateParams {
    /// Year whose June 1 anchors the lag arithmetic
    pub target_year: i32,
    /// How many months before the anchor the window ends, 1 meaning May
    /// of the target year
    pub month_lag: u32,
    pub variable: ClimateVariable,
}

/// Month-summed climate anomaly per grid cell.
///
/// The window is `[June 1 - lag months, June 1 - (lag-1) months)`. The
/// climatological mean is the day-of-year-matched sum over every year
/// in the archive divided by the year count; the anomaly is the recent
/// sum minus that mean. Cell means come back per band, named
/// `{var}_mean_{lag}`, `{var}_recent_{lag}` and `{var}_anom_{lag}`,
/// with a `days` property carrying the window length. An archive with
/// no scenes in the window yields an empty table.
pub fn climate_lag_window(
    daymet: &ImageCollection,
    grid: &FeatureCollection,
    params: &ClimateParams,
) -> Result<FeatureCollection> {
    if params.month_lag == 0 {
        return Err(Error::InvalidParameter {
            name: "month_lag",
            value: params.month_lag.to_string(),
            reason: "lag starts at one month".to_string(),
        });
    }
    let anchor = june_first(params.target_year)?;
    let (start, end) = lag_window(anchor, params.month_lag)?;
    let days = (end - start).num_days();

    let var = params.variable.band();
    let archive = daymet.select(&[var])?;

    let Some(recent) = archive.filter_date(start, end).sum()? else {
        warn!(
            lag = params.month_lag,
            "no climate scenes in the lag window"
        );
        return Ok(FeatureCollection::new());
    };

    // same calendar month across every year on record
    let start_doy = start.ordinal() as u16;
    let end_doy = (end - Duration::days(1)).ordinal() as u16;
    let matched = archive.filter_day_of_year(start_doy, end_doy);
    let mut years = BTreeSet::new();
    for image in matched.iter() {
        years.insert(image.year()?);
    }
    let Some(total) = matched.sum()? else {
        return Ok(FeatureCollection::new());
    };
    let n_years = years.len() as f64;

    let mean = crate::preprocess::scale_band(total.band(var)?, 1.0 / n_years, 0.0)?;
    let recent_band = recent.band(var)?;
    let anom = subtract(recent_band, &mean)?;

    let image = Image::from_bands(vec![
        (format!("{}_mean_{}", var, params.month_lag), mean),
        (
            format!("{}_recent_{}", var, params.month_lag),
            recent_band.clone(),
        ),
        (format!("{}_anom_{}", var, params.month_lag), anom),
    ])?;

    let mut table = reduce_regions(
        &image,
        grid,
        Reducer::Mean,
        &ReduceRegionsOptions::default(),
    )?;
    for feature in table.iter_mut() {
        feature.set_property("days", days);
    }
    Ok(table)
}

fn june_first(year: i32) -> Result<DateTime<Utc>> {
    Utc.with_ymd_and_hms(year, 6, 1, 0, 0, 0)
        .single()
        .ok_or_else(|| Error::InvalidParameter {
            name: "target_year",
            value: year.to_string(),
            reason: "no June 1 anchor for this year".to_string(),
        })
}

fn lag_window(anchor: DateTime<Utc>, lag: u32) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let out_of_range = || Error::InvalidParameter {
        name: "month_lag",
        value: lag.to_string(),
        reason: "lag window falls outside the representable calendar".to_string(),
    };
    let start = anchor
        .checked_sub_months(Months::new(lag))
        .ok_or_else(out_of_range)?;
    let end = anchor
        .checked_sub_months(Months::new(lag - 1))
        .ok_or_else(out_of_range)?;
    Ok((start, end))
}

/// `a - b` per pixel, NaN wherever either side is NaN
fn subtract(a: &Raster<f64>, b: &Raster<f64>) -> Result<Raster<f64>> {
    crate::util::check_dimensions(a, b)?;
    let (rows, cols) = a.shape();
    let data: Vec<f64> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![f64::NAN; cols];
            for col in 0..cols {
                let av = unsafe { a.get_unchecked(row, col) };
                let bv = unsafe { b.get_unchecked(row, col) };
                if !av.is_nan() && !bv.is_nan() {
                    row_data[col] = av - bv;
                }
            }
            row_data
        })
        .collect();
    crate::util::build_output(a, data)
}
