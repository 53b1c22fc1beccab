//! Vector data structures: features, property tables, filters and joins

mod grid;

pub use grid::{covering_grid, GridParams};

use crate::error::{Error, Result};
use geo_types::Geometry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Property value types carried by features and images
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl PropertyValue {
    /// Numeric view of the value; `None` for Null, Bool and String
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Int(v) => Some(*v as f64),
            PropertyValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, PropertyValue::Null)
    }

    /// Canonical string used to match join keys. Null values never match.
    fn join_key(&self) -> Option<String> {
        match self {
            PropertyValue::Null => None,
            PropertyValue::Bool(v) => Some(format!("b:{}", v)),
            PropertyValue::Int(v) => Some(format!("i:{}", v)),
            // Debug formatting of f64 round-trips exactly
            PropertyValue::Float(v) => Some(format!("f:{:?}", v)),
            PropertyValue::String(v) => Some(format!("s:{}", v)),
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Bool(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Int(v)
    }
}

impl From<i32> for PropertyValue {
    fn from(v: i32) -> Self {
        PropertyValue::Int(v as i64)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Float(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::String(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::String(v)
    }
}

impl From<Option<f64>> for PropertyValue {
    fn from(v: Option<f64>) -> Self {
        match v {
            Some(v) => PropertyValue::Float(v),
            None => PropertyValue::Null,
        }
    }
}

/// Declarative predicate over feature properties.
///
/// Predicates compose conjunctively by chaining `filter` calls.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyFilter {
    Eq(String, PropertyValue),
    Neq(String, PropertyValue),
    Gt(String, f64),
    Gte(String, f64),
    Lt(String, f64),
    Lte(String, f64),
    /// Keep features where the property exists and is not Null
    NotNull(String),
}

impl PropertyFilter {
    pub fn eq(key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        PropertyFilter::Eq(key.into(), value.into())
    }

    pub fn neq(key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        PropertyFilter::Neq(key.into(), value.into())
    }

    pub fn gte(key: impl Into<String>, value: f64) -> Self {
        PropertyFilter::Gte(key.into(), value)
    }

    pub fn lte(key: impl Into<String>, value: f64) -> Self {
        PropertyFilter::Lte(key.into(), value)
    }

    pub fn not_null(key: impl Into<String>) -> Self {
        PropertyFilter::NotNull(key.into())
    }

    /// Evaluate the predicate against a property map
    pub fn matches(&self, properties: &HashMap<String, PropertyValue>) -> bool {
        let numeric = |key: &str| properties.get(key).and_then(PropertyValue::as_f64);
        match self {
            PropertyFilter::Eq(key, value) => match (properties.get(key), value) {
                // numeric equality crosses the Int/Float divide
                (Some(a), b) => match (a.as_f64(), b.as_f64()) {
                    (Some(x), Some(y)) => x == y,
                    _ => a == b,
                },
                (None, _) => false,
            },
            PropertyFilter::Neq(key, value) => match (properties.get(key), value) {
                (Some(a), b) => match (a.as_f64(), b.as_f64()) {
                    (Some(x), Some(y)) => x != y,
                    _ => a != b,
                },
                // a missing property is not equal to anything
                (None, _) => true,
            },
            PropertyFilter::Gt(key, value) => numeric(key).map(|v| v > *value).unwrap_or(false),
            PropertyFilter::Gte(key, value) => numeric(key).map(|v| v >= *value).unwrap_or(false),
            PropertyFilter::Lt(key, value) => numeric(key).map(|v| v < *value).unwrap_or(false),
            PropertyFilter::Lte(key, value) => numeric(key).map(|v| v <= *value).unwrap_or(false),
            PropertyFilter::NotNull(key) => {
                properties.get(key).map(|v| !v.is_null()).unwrap_or(false)
            }
        }
    }
}

/// A geographic feature with geometry and properties
#[derive(Debug, Clone)]
pub struct Feature {
    /// Feature geometry
    pub geometry: Option<Geometry<f64>>,
    /// Feature properties
    pub properties: HashMap<String, PropertyValue>,
    /// Optional feature ID
    pub id: Option<String>,
}

impl Feature {
    /// Create a new feature with geometry
    pub fn new(geometry: Geometry<f64>) -> Self {
        Self {
            geometry: Some(geometry),
            properties: HashMap::new(),
            id: None,
        }
    }

    /// Create a feature with no geometry
    pub fn empty() -> Self {
        Self {
            geometry: None,
            properties: HashMap::new(),
            id: None,
        }
    }

    /// Point feature, the shape validation plots come in as
    pub fn point(x: f64, y: f64) -> Self {
        Self::new(Geometry::Point(geo_types::Point::new(x, y)))
    }

    /// Set a property
    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) {
        self.properties.insert(key.into(), value.into());
    }

    /// Builder-style property setter
    pub fn with_property(
        mut self,
        key: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> Self {
        self.set_property(key, value);
        self
    }

    /// Get a property
    pub fn get_property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }

    /// Numeric property view
    pub fn get_number(&self, key: &str) -> Option<f64> {
        self.properties.get(key).and_then(PropertyValue::as_f64)
    }
}

/// Collection of features
#[derive(Debug, Clone, Default)]
pub struct FeatureCollection {
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    pub fn new() -> Self {
        Self {
            features: Vec::new(),
        }
    }

    pub fn from_features(features: Vec<Feature>) -> Self {
        Self { features }
    }

    pub fn push(&mut self, feature: Feature) {
        self.features.push(feature);
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn first(&self) -> Option<&Feature> {
        self.features.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Feature> {
        self.features.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Feature> {
        self.features.iter_mut()
    }

    /// Keep the features matching the predicate. Zero matches is not an
    /// error; the empty collection flows through downstream aggregation.
    pub fn filter(&self, filter: &PropertyFilter) -> FeatureCollection {
        FeatureCollection {
            features: self
                .features
                .iter()
                .filter(|f| filter.matches(&f.properties))
                .cloned()
                .collect(),
        }
    }

    /// Apply a transformation to every feature
    pub fn map(&self, f: impl Fn(&Feature) -> Feature) -> FeatureCollection {
        FeatureCollection {
            features: self.features.iter().map(f).collect(),
        }
    }

    /// Mean of a numeric property over the collection.
    ///
    /// Null and missing values are excluded from both numerator and
    /// denominator; a collection with no usable values yields `None`,
    /// never zero.
    pub fn aggregate_mean(&self, key: &str) -> Option<f64> {
        let mut sum = 0.0;
        let mut count = 0usize;
        for feature in &self.features {
            if let Some(v) = feature.get_number(key) {
                if v.is_finite() {
                    sum += v;
                    count += 1;
                }
            }
        }
        if count == 0 {
            None
        } else {
            Some(sum / count as f64)
        }
    }

    /// Inner equi-join on a shared property key.
    ///
    /// Every primary feature is paired with every secondary feature whose
    /// key value matches; unmatched features on either side are dropped.
    /// Output features keep the primary geometry and id and carry the
    /// flattened properties of both sides. A non-key property defined on
    /// both sides is a collision and an error, not a silent override.
    pub fn inner_join(&self, secondary: &FeatureCollection, key: &str) -> Result<FeatureCollection> {
        let mut by_key: HashMap<String, Vec<&Feature>> = HashMap::new();
        for feature in &secondary.features {
            if let Some(k) = feature.get_property(key).and_then(PropertyValue::join_key) {
                by_key.entry(k).or_default().push(feature);
            }
        }

        let mut out = FeatureCollection::new();
        for primary in &self.features {
            let Some(k) = primary.get_property(key).and_then(PropertyValue::join_key) else {
                continue;
            };
            let Some(matches) = by_key.get(&k) else {
                continue;
            };
            for matched in matches {
                let mut joined = Feature {
                    geometry: primary.geometry.clone(),
                    properties: primary.properties.clone(),
                    id: primary.id.clone(),
                };
                for (name, value) in &matched.properties {
                    if name == key {
                        continue;
                    }
                    if joined.properties.contains_key(name) {
                        return Err(Error::DuplicateProperty(name.clone()));
                    }
                    joined.properties.insert(name.clone(), value.clone());
                }
                out.push(joined);
            }
        }
        Ok(out)
    }
}

impl IntoIterator for FeatureCollection {
    type Item = Feature;
    type IntoIter = std::vec::IntoIter<Feature>;

    fn into_iter(self) -> Self::IntoIter {
        self.features.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(id: &str, forest: f64) -> Feature {
        Feature::empty()
            .with_property("id", id)
            .with_property("forest", forest)
    }

    #[test]
    fn test_filter_eq_and_chaining() {
        let fc = FeatureCollection::from_features(vec![
            Feature::empty()
                .with_property("year", 2021i64)
                .with_property("source", "S2"),
            Feature::empty()
                .with_property("year", 2021i64)
                .with_property("source", "HLS"),
            Feature::empty()
                .with_property("year", 2022i64)
                .with_property("source", "S2"),
        ]);

        let narrowed = fc
            .filter(&PropertyFilter::eq("year", 2021i64))
            .filter(&PropertyFilter::neq("source", "HLS"));
        assert_eq!(narrowed.len(), 1);
    }

    #[test]
    fn test_aggregate_mean_excludes_null() {
        let fc = FeatureCollection::from_features(vec![
            Feature::empty().with_property("v", 2.0),
            Feature::empty().with_property("v", 4.0),
            Feature::empty().with_property("v", PropertyValue::Null),
            Feature::empty(),
        ]);

        assert_eq!(fc.aggregate_mean("v"), Some(3.0));
        assert_eq!(fc.filter(&PropertyFilter::not_null("v")).len(), 2);
    }

    #[test]
    fn test_aggregate_mean_empty_is_none() {
        let fc = FeatureCollection::new();
        assert_eq!(fc.aggregate_mean("v"), None);
    }

    #[test]
    fn test_inner_join_drops_unmatched() {
        let forest = FeatureCollection::from_features(vec![cell("0_0", 100.0), cell("1_0", 50.0)]);
        let defol = FeatureCollection::from_features(vec![Feature::empty()
            .with_property("id", "0_0")
            .with_property("defoliation", 7.5)]);

        let joined = forest.inner_join(&defol, "id").unwrap();
        assert_eq!(joined.len(), 1);
        let f = joined.first().unwrap();
        assert_eq!(f.get_number("forest"), Some(100.0));
        assert_eq!(f.get_number("defoliation"), Some(7.5));
    }

    #[test]
    fn test_inner_join_idempotent() {
        let a = FeatureCollection::from_features(vec![cell("0_0", 1.0), cell("1_1", 2.0)]);
        let b = FeatureCollection::from_features(vec![
            Feature::empty().with_property("id", "0_0").with_property("x", 1.0),
            Feature::empty().with_property("id", "1_1").with_property("x", 2.0),
        ]);

        let once = a.inner_join(&b, "id").unwrap();
        let again = once.inner_join(&b, "id");
        // the second join collides on the already-flattened fields
        assert!(again.is_err());

        // joining the original pair twice gives identical record sets
        let twice = a.inner_join(&b, "id").unwrap();
        assert_eq!(once.len(), twice.len());
        for (x, y) in once.iter().zip(twice.iter()) {
            assert_eq!(x.get_number("x"), y.get_number("x"));
        }
    }

    #[test]
    fn test_inner_join_collision_is_error() {
        let a = FeatureCollection::from_features(vec![cell("0_0", 1.0)]);
        let b = FeatureCollection::from_features(vec![cell("0_0", 2.0)]);
        assert!(matches!(
            a.inner_join(&b, "id"),
            Err(Error::DuplicateProperty(_))
        ));
    }
}
