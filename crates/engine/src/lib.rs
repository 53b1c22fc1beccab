//! # defolia Engine
//!
//! The boundary layer of the defoliation workflow: a [`Catalog`] turns
//! asset names into core data values, and export jobs write scored
//! products back to disk through a small job runner. The pipeline
//! crates stay pure; everything that touches storage or a runtime
//! lives here.

pub mod catalog;
pub mod error;
pub mod export;
pub mod job;

pub use catalog::{Catalog, MemoryCatalog};
pub use error::{EngineError, Result};
pub use export::{ImageExport, TableExport, DEFAULT_MAX_PIXELS};
pub use job::{ExportRunner, JobHandle, JobState};
