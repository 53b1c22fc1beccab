//! # defolia Pipelines
//!
//! The analysis stages of the defoliation workflow: sensor preprocessing,
//! vegetation index math, trend fitting and anomaly scoring, region
//! reduction, accuracy sweeps and the gridded summary products.
//!
//! Every stage is a pure function over the core data model; jobs wire the
//! stages together and the engine crate handles asset input and export.

pub mod area;
pub mod climate;
pub mod denoise;
pub mod gridstats;
pub mod indices;
pub mod preprocess;
pub mod reduce;
pub mod roc;
pub mod score;
pub mod trend;

mod util;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::area::{defoliated_area, AreaParams};
    pub use crate::climate::{climate_lag_window, ClimateParams, ClimateVariable};
    pub use crate::denoise::filter_small_groups;
    pub use crate::gridstats::{defoliation_grid_stats, forest_grid_stats, grid_join};
    pub use crate::indices::{evi, evi_range_mask, EviParams};
    pub use crate::preprocess::{PreprocessOptions, BLUE, GREEN, NIR, RED, SWIR1, SWIR2};
    pub use crate::reduce::{multiply_pixel_area, reduce_regions, ReduceRegionsOptions};
    pub use crate::roc::{roc_sweep, RocParams};
    pub use crate::score::{paired_means_score, seasonal_anomaly_score, ScoreParams};
    pub use crate::trend::{harmonic_fit, sens_slope, HarmonicParams};
}
