//! Coordinate transforms between EPSG-identified CRSes
//!
//! Definitions come from the bundled EPSG proj4 strings and are evaluated with
//! `proj4rs`. Geographic definitions work in radians internally; callers always
//! deal in degrees.

use gv_core::EpsgCode;
use proj4rs::proj::Proj;
use thiserror::Error;

use crate::wkb::{map_coords_in_place, WkbError};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReprojectError {
    #[error("unknown EPSG code {0}")]
    UnknownCode(EpsgCode),

    #[error("invalid definition for EPSG:{code}: {message}")]
    InvalidDefinition { code: EpsgCode, message: String },

    #[error("transform failed: {0}")]
    Transform(String),

    #[error(transparent)]
    Wkb(#[from] WkbError),
}

struct Endpoint {
    proj: Proj,
    geographic: bool,
}

impl Endpoint {
    fn from_code(code: EpsgCode) -> Result<Self, ReprojectError> {
        let short = u16::try_from(code).map_err(|_| ReprojectError::UnknownCode(code))?;
        let definition = crs_definitions::from_code(short).ok_or(ReprojectError::UnknownCode(code))?;
        let proj = Proj::from_proj_string(definition.proj4).map_err(|e| ReprojectError::InvalidDefinition {
            code,
            message: e.to_string(),
        })?;
        Ok(Self {
            proj,
            geographic: definition.proj4.contains("+proj=longlat"),
        })
    }
}

/// Transforms x/y pairs from one CRS to another.
///
/// Input is always x/y (longitude first for geographic sources). With
/// `always_xy` the output is x/y too; otherwise a geographic target follows its
/// authority axis order and comes back latitude first.
pub struct Reprojector {
    source: Endpoint,
    target: Endpoint,
    source_code: EpsgCode,
    target_code: EpsgCode,
    always_xy: bool,
}

impl Reprojector {
    pub fn new(source: EpsgCode, target: EpsgCode, always_xy: bool) -> Result<Self, ReprojectError> {
        Ok(Self {
            source: Endpoint::from_code(source)?,
            target: Endpoint::from_code(target)?,
            source_code: source,
            target_code: target,
            always_xy,
        })
    }

    /// Longitude-first transform into WGS84
    pub fn to_wgs84(source: EpsgCode) -> Result<Self, ReprojectError> {
        Self::new(source, 4326, true)
    }

    pub fn source_code(&self) -> EpsgCode {
        self.source_code
    }

    pub fn target_code(&self) -> EpsgCode {
        self.target_code
    }

    pub fn transform(&self, x: f64, y: f64) -> Result<(f64, f64), ReprojectError> {
        if self.source_code == self.target_code {
            return Ok(self.order(x, y));
        }

        let mut point = if self.source.geographic {
            (x.to_radians(), y.to_radians(), 0.0)
        } else {
            (x, y, 0.0)
        };
        proj4rs::transform::transform(&self.source.proj, &self.target.proj, &mut point)
            .map_err(|e| ReprojectError::Transform(e.to_string()))?;

        let (mut out_x, mut out_y) = (point.0, point.1);
        if self.target.geographic {
            out_x = out_x.to_degrees();
            out_y = out_y.to_degrees();
        }
        if !out_x.is_finite() || !out_y.is_finite() {
            return Err(ReprojectError::Transform(format!(
                "({}, {}) has no finite image in EPSG:{}",
                x, y, self.target_code
            )));
        }
        Ok(self.order(out_x, out_y))
    }

    fn order(&self, x: f64, y: f64) -> (f64, f64) {
        if !self.always_xy && self.target.geographic {
            (y, x)
        } else {
            (x, y)
        }
    }

    /// Rewrite every coordinate of a WKB buffer in place.
    ///
    /// On error the buffer is left unchanged.
    pub fn transform_wkb(&self, buf: &mut [u8]) -> Result<(), ReprojectError> {
        map_coords_in_place(buf, |x, y| self.transform(x, y))
    }
}

impl std::fmt::Debug for Reprojector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reprojector")
            .field("source", &self.source_code)
            .field("target", &self.target_code)
            .field("always_xy", &self.always_xy)
            .finish()
    }
}
