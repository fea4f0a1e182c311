//! Geometry handling for the geospatial query platform
//!
//! - [`crs`]: resolving a file's coordinate reference system from its metadata
//! - [`classify`]: picking the geometry column out of a schema
//! - [`expr`]: SQL expressions that normalize geometry to WGS84 WKB
//! - [`wkb`]: reading, writing and rewriting well-known binary
//! - [`geoarrow`]: turning WKB streams into per-kind columnar buffers
//! - [`reproject`]: coordinate transforms between EPSG definitions

pub mod classify;
pub mod crs;
pub mod expr;
pub mod geoarrow;
pub mod reproject;
pub mod wkb;

pub use classify::classify;
pub use crs::{resolve_crs, CrsCache, FileMetadata};
pub use expr::{build_map_query, build_wkb_expression};
pub use geoarrow::{build, GeoArrowTable};
pub use wkb::WkbError;
