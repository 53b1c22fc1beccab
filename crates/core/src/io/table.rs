//! Selector-driven table export: CSV and GeoJSON
//!
//! The selector list controls exactly which columns appear in the output.
//! Intermediate fields not named are dropped; a selected field absent on
//! a record serializes as empty (CSV) or null (GeoJSON).

use crate::error::{Error, Result};
use crate::vector::{Feature, FeatureCollection, PropertyValue};
use std::convert::TryInto;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Selector naming the geometry rather than a property
pub const GEO_SELECTOR: &str = ".geo";

/// Table sink formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableFormat {
    Csv,
    GeoJson,
}

impl TableFormat {
    /// Conventional file extension for the format
    pub fn extension(&self) -> &'static str {
        match self {
            TableFormat::Csv => "csv",
            TableFormat::GeoJson => "geojson",
        }
    }
}

/// Write a feature collection as CSV with the given column selectors.
///
/// The `".geo"` selector writes the geometry as a GeoJSON string column,
/// matching what table exports do elsewhere.
pub fn write_csv<P: AsRef<Path>>(
    collection: &FeatureCollection,
    path: P,
    selectors: &[&str],
) -> Result<()> {
    if selectors.is_empty() {
        return Err(Error::InvalidParameter {
            name: "selectors",
            value: "[]".to_string(),
            reason: "table export needs at least one column".to_string(),
        });
    }

    let mut writer = csv::Writer::from_path(path.as_ref())?;
    writer.write_record(selectors)?;

    for feature in collection.iter() {
        let mut record = Vec::with_capacity(selectors.len());
        for selector in selectors {
            record.push(csv_field(feature, selector)?);
        }
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

fn csv_field(feature: &Feature, selector: &str) -> Result<String> {
    if selector == GEO_SELECTOR {
        return match &feature.geometry {
            Some(geometry) => {
                let value = geojson::Geometry::new(geojson::Value::from(geometry));
                Ok(serde_json::to_string(&value)?)
            }
            None => Ok(String::new()),
        };
    }
    Ok(match feature.get_property(selector) {
        None | Some(PropertyValue::Null) => String::new(),
        Some(PropertyValue::Bool(v)) => v.to_string(),
        Some(PropertyValue::Int(v)) => v.to_string(),
        Some(PropertyValue::Float(v)) => {
            if v.is_finite() {
                format!("{}", v)
            } else {
                String::new()
            }
        }
        Some(PropertyValue::String(v)) => v.clone(),
    })
}

/// Write a feature collection as GeoJSON.
///
/// Geometries are always carried when present; the selector list governs
/// the properties (the `".geo"` selector is implicit here and ignored).
pub fn write_geojson<P: AsRef<Path>>(
    collection: &FeatureCollection,
    path: P,
    selectors: &[&str],
) -> Result<()> {
    let mut features = Vec::with_capacity(collection.len());
    for feature in collection.iter() {
        let geometry = feature
            .geometry
            .as_ref()
            .map(|g| geojson::Geometry::new(geojson::Value::from(g)));

        let mut properties = geojson::JsonObject::new();
        for selector in selectors {
            if *selector == GEO_SELECTOR {
                continue;
            }
            let value = feature
                .get_property(selector)
                .map(property_to_json)
                .unwrap_or(serde_json::Value::Null);
            properties.insert(selector.to_string(), value);
        }

        features.push(geojson::Feature {
            bbox: None,
            geometry,
            id: feature
                .id
                .clone()
                .map(|id| geojson::feature::Id::String(id)),
            properties: Some(properties),
            foreign_members: None,
        });
    }

    let fc = geojson::FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    };

    let file = File::create(path.as_ref())?;
    let mut writer = BufWriter::new(file);
    let text = serde_json::to_string(&geojson::GeoJson::FeatureCollection(fc))?;
    writer.write_all(text.as_bytes())?;
    writer.flush()?;
    Ok(())
}

/// Read a GeoJSON FeatureCollection from disk
pub fn read_geojson<P: AsRef<Path>>(path: P) -> Result<FeatureCollection> {
    let text = std::fs::read_to_string(path.as_ref())?;
    let geojson: geojson::GeoJson = text
        .parse()
        .map_err(|e: geojson::Error| Error::Other(e.to_string()))?;

    let geojson::GeoJson::FeatureCollection(fc) = geojson else {
        return Err(Error::Other(
            "expected a GeoJSON FeatureCollection".to_string(),
        ));
    };

    let mut out = FeatureCollection::new();
    for gj in fc.features {
        let geometry = match gj.geometry {
            Some(g) => Some(
                g.value
                    .try_into()
                    .map_err(|e: geojson::Error| Error::Other(e.to_string()))?,
            ),
            None => None,
        };
        let mut feature = Feature {
            geometry,
            properties: Default::default(),
            id: match gj.id {
                Some(geojson::feature::Id::String(s)) => Some(s),
                Some(geojson::feature::Id::Number(n)) => Some(n.to_string()),
                None => None,
            },
        };
        if let Some(props) = gj.properties {
            for (key, value) in props {
                feature.properties.insert(key, json_to_property(&value));
            }
        }
        out.push(feature);
    }
    Ok(out)
}

fn property_to_json(value: &PropertyValue) -> serde_json::Value {
    match value {
        PropertyValue::Null => serde_json::Value::Null,
        PropertyValue::Bool(v) => serde_json::Value::Bool(*v),
        PropertyValue::Int(v) => serde_json::Value::Number((*v).into()),
        PropertyValue::Float(v) => serde_json::Number::from_f64(*v)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        PropertyValue::String(v) => serde_json::Value::String(v.clone()),
    }
}

fn json_to_property(value: &serde_json::Value) -> PropertyValue {
    match value {
        serde_json::Value::Null => PropertyValue::Null,
        serde_json::Value::Bool(v) => PropertyValue::Bool(*v),
        serde_json::Value::Number(n) => {
            if let Some(v) = n.as_i64() {
                PropertyValue::Int(v)
            } else {
                PropertyValue::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(v) => PropertyValue::String(v.clone()),
        other => PropertyValue::String(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roc_row(threshold: f64, tpr: f64) -> Feature {
        Feature::empty()
            .with_property("threshold", threshold)
            .with_property("TPR", tpr)
            .with_property("scratch", "dropped")
    }

    #[test]
    fn test_csv_selectors_control_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roc.csv");

        let fc = FeatureCollection::from_features(vec![roc_row(0.3, 1.0), roc_row(0.295, 0.98)]);
        write_csv(&fc, &path, &["threshold", "TPR"]).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("threshold,TPR"));
        assert_eq!(lines.next(), Some("0.3,1"));
        assert!(!text.contains("scratch"));
    }

    #[test]
    fn test_csv_missing_field_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.csv");

        let fc = FeatureCollection::from_features(vec![
            Feature::empty().with_property("a", 1.0),
            Feature::empty()
                .with_property("a", 2.0)
                .with_property("b", PropertyValue::Null),
        ]);
        write_csv(&fc, &path, &["a", "b"]).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let rows: Vec<_> = text.lines().collect();
        assert_eq!(rows[1], "1,");
        assert_eq!(rows[2], "2,");
    }

    #[test]
    fn test_empty_selectors_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("none.csv");
        let fc = FeatureCollection::new();
        assert!(write_csv(&fc, &path, &[]).is_err());
    }

    #[test]
    fn test_geojson_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cells.geojson");

        let mut cell = Feature::point(-75.5, 43.2);
        cell.set_property("id", "3_7");
        cell.set_property("forest", 81234.5);
        cell.set_property("noise", 999.0);
        let fc = FeatureCollection::from_features(vec![cell]);

        write_geojson(&fc, &path, &["id", "forest"]).unwrap();
        let back = read_geojson(&path).unwrap();

        assert_eq!(back.len(), 1);
        let f = back.first().unwrap();
        assert!(f.geometry.is_some());
        assert_eq!(
            f.get_property("id"),
            Some(&PropertyValue::String("3_7".to_string()))
        );
        assert_eq!(f.get_number("forest"), Some(81234.5));
        // unselected fields do not survive export
        assert!(f.get_property("noise").is_none());
    }
}
