//! Well-known binary geometry encoding
//!
//! Both plain ISO WKB and the PostGIS extended form (EWKB) are understood on
//! the read side: Z/M dimensions may be flagged either through the ISO
//! thousands convention or the EWKB high bits, and EWKB may embed an SRID.
//! The writer always produces 2D little-endian ISO WKB.

mod header;
mod rewrite;
mod walk;
mod writer;

pub use header::{
    peek_kind, read_collection_header, read_header, ByteOrder, CollectionHeader, Dimensions, WkbHeader,
    GEOMETRY_COLLECTION_CODE, HEADER_LEN,
};
pub use rewrite::map_coords_in_place;
pub use walk::{walk, walk_any, RawCoord, WkbVisitor};
pub use writer::{from_geojson, write_geometry};

use thiserror::Error;

/// Reasons a single WKB buffer cannot be decoded
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WkbError {
    #[error("buffer truncated: needed {needed} bytes at offset {offset}, have {available}")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("invalid byte order flag {0:#04x}")]
    InvalidByteOrder(u8),

    #[error("unknown geometry type code {0}")]
    UnknownGeometryType(u32),

    #[error("unsupported geometry type code {0}")]
    Unsupported(u32),

    #[error("expected {expected} but found {found}")]
    UnexpectedMember {
        expected: gv_core::GeometryKind,
        found: gv_core::GeometryKind,
    },

    #[error("invalid GeoJSON geometry: {0}")]
    InvalidGeoJson(String),
}
