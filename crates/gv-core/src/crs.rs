//! Coordinate reference system resolution results

use std::fmt;
use serde::{Deserialize, Serialize};

/// Numeric identifier in the EPSG registry
pub type EpsgCode = u32;

/// EPSG codes that describe WGS84 longitude/latitude
pub const WGS84_EQUIVALENT_CODES: [EpsgCode; 2] = [4326, 4979];

/// Result of resolving a file's CRS
///
/// `Wgs84` means no reprojection is needed, either because the file says so
/// or because nothing better could be determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ResolvedCrs {
    #[default]
    Wgs84,
    Epsg(EpsgCode),
}

impl ResolvedCrs {
    /// Build from an EPSG code, folding WGS84-equivalent codes into `Wgs84`
    pub fn from_epsg(code: EpsgCode) -> Self {
        if WGS84_EQUIVALENT_CODES.contains(&code) {
            ResolvedCrs::Wgs84
        } else {
            ResolvedCrs::Epsg(code)
        }
    }

    /// The source EPSG code when reprojection is required
    pub fn epsg(&self) -> Option<EpsgCode> {
        match self {
            ResolvedCrs::Wgs84 => None,
            ResolvedCrs::Epsg(code) => Some(*code),
        }
    }

    pub fn needs_reprojection(&self) -> bool {
        self.epsg().is_some()
    }
}

impl fmt::Display for ResolvedCrs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedCrs::Wgs84 => write!(f, "EPSG:4326"),
            ResolvedCrs::Epsg(code) => write!(f, "EPSG:{}", code),
        }
    }
}
