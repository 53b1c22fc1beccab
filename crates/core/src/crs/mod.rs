//! Coordinate Reference System handling

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coordinate Reference System representation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Crs {
    /// EPSG code if known
    epsg: Option<u32>,
    /// WKT representation, kept verbatim when read from files
    wkt: Option<String>,
}

impl Crs {
    /// Create a CRS from an EPSG code
    pub fn from_epsg(code: u32) -> Self {
        Self {
            epsg: Some(code),
            wkt: None,
        }
    }

    /// Create a CRS from a WKT string
    pub fn from_wkt(wkt: impl Into<String>) -> Self {
        Self {
            epsg: None,
            wkt: Some(wkt.into()),
        }
    }

    /// Parse an `EPSG:nnnn` identifier as produced by [`Crs::identifier`].
    pub fn from_identifier(id: &str) -> Option<Self> {
        let code = id.strip_prefix("EPSG:")?.parse().ok()?;
        Some(Self::from_epsg(code))
    }

    /// WGS84 geographic CRS (EPSG:4326)
    pub fn wgs84() -> Self {
        Self::from_epsg(4326)
    }

    /// CONUS Albers equal-area (EPSG:5070), used for gridded summaries
    pub fn conus_albers() -> Self {
        Self::from_epsg(5070)
    }

    /// UTM zone 18N (EPSG:32618), the working projection for New York State
    pub fn utm_18n() -> Self {
        Self::from_epsg(32618)
    }

    /// Get EPSG code if known
    pub fn epsg(&self) -> Option<u32> {
        self.epsg
    }

    /// Get WKT representation
    pub fn wkt(&self) -> Option<&str> {
        self.wkt.as_deref()
    }

    /// True for geographic (degree-unit) systems, which need
    /// latitude-dependent pixel areas.
    pub fn is_geographic(&self) -> bool {
        matches!(self.epsg, Some(4326) | Some(4269) | Some(4617))
    }

    /// Check if two CRS are equivalent
    pub fn is_equivalent(&self, other: &Crs) -> bool {
        if let (Some(a), Some(b)) = (self.epsg, other.epsg) {
            return a == b;
        }
        if let (Some(a), Some(b)) = (&self.wkt, &other.wkt) {
            return a == b;
        }
        false
    }

    /// Get a string identifier for this CRS
    pub fn identifier(&self) -> String {
        if let Some(code) = self.epsg {
            return format!("EPSG:{}", code);
        }
        if let Some(wkt) = &self.wkt {
            return format!("WKT:{}", &wkt[..wkt.len().min(50)]);
        }
        "Unknown".to_string()
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identifier())
    }
}

impl Default for Crs {
    fn default() -> Self {
        Self::wgs84()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crs_epsg() {
        let crs = Crs::from_epsg(5070);
        assert_eq!(crs.epsg(), Some(5070));
        assert_eq!(crs.identifier(), "EPSG:5070");
    }

    #[test]
    fn test_crs_equivalence() {
        let a = Crs::from_epsg(4326);
        let b = Crs::wgs84();
        assert!(a.is_equivalent(&b));
    }

    #[test]
    fn test_crs_identifier_round_trip() {
        let crs = Crs::utm_18n();
        let parsed = Crs::from_identifier(&crs.identifier()).unwrap();
        assert!(crs.is_equivalent(&parsed));
    }

    #[test]
    fn test_geographic_flag() {
        assert!(Crs::wgs84().is_geographic());
        assert!(!Crs::conus_albers().is_geographic());
    }
}
