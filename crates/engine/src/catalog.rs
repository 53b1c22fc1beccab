//! Named asset access
//!
//! Pipelines take their inputs as plain values; the catalog is the one
//! seam where a name becomes data. Keeping it a trait lets tests and
//! the CLI share the in-memory store and leaves room for other
//! backends without touching the pipelines.

use std::collections::HashMap;

use defolia_core::{FeatureCollection, Image, ImageCollection};

use crate::error::{EngineError, Result};

/// Read-only source of named assets
pub trait Catalog: Send + Sync {
    fn image(&self, path: &str) -> Result<Image>;
    fn image_collection(&self, path: &str) -> Result<ImageCollection>;
    fn feature_collection(&self, path: &str) -> Result<FeatureCollection>;
}

/// In-memory catalog backing tests and the CLI's local store
#[derive(Default)]
pub struct MemoryCatalog {
    images: HashMap<String, Image>,
    collections: HashMap<String, ImageCollection>,
    tables: HashMap<String, FeatureCollection>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_image(&mut self, path: impl Into<String>, image: Image) {
        self.images.insert(path.into(), image);
    }

    pub fn insert_collection(&mut self, path: impl Into<String>, collection: ImageCollection) {
        self.collections.insert(path.into(), collection);
    }

    pub fn insert_table(&mut self, path: impl Into<String>, table: FeatureCollection) {
        self.tables.insert(path.into(), table);
    }
}

impl Catalog for MemoryCatalog {
    fn image(&self, path: &str) -> Result<Image> {
        self.images
            .get(path)
            .cloned()
            .ok_or_else(|| EngineError::UnknownAsset(path.to_string()))
    }

    fn image_collection(&self, path: &str) -> Result<ImageCollection> {
        self.collections
            .get(path)
            .cloned()
            .ok_or_else(|| EngineError::UnknownAsset(path.to_string()))
    }

    fn feature_collection(&self, path: &str) -> Result<FeatureCollection> {
        self.tables
            .get(path)
            .cloned()
            .ok_or_else(|| EngineError::UnknownAsset(path.to_string()))
    }
}
