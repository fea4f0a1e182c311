//! Per-kind columnar geometry tables
//!
//! Each table stores interleaved x/y doubles plus the GeoArrow offset arrays its
//! kind needs. Offsets are cumulative and start at zero:
//!
//! - `part_offsets`: vertex index where each linestring or ring starts
//! - `polygon_offsets`: ring index where each polygon starts (multipolygons)
//! - `geom_offsets`: index of the first member of each feature, counted in the
//!   unit one level down (rings for polygons, points for multipoints, lines for
//!   multilinestrings, polygons for multipolygons)
//!
//! `feature_indices[i]` is the result row the i-th feature came from.

use gv_core::GeometryKind;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointTable {
    pub coordinates: Vec<f64>,
    pub feature_indices: Vec<u32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LineStringTable {
    pub coordinates: Vec<f64>,
    pub part_offsets: Vec<u32>,
    pub feature_indices: Vec<u32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolygonTable {
    pub coordinates: Vec<f64>,
    pub part_offsets: Vec<u32>,
    pub geom_offsets: Vec<u32>,
    pub feature_indices: Vec<u32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultiPointTable {
    pub coordinates: Vec<f64>,
    pub geom_offsets: Vec<u32>,
    pub feature_indices: Vec<u32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultiLineStringTable {
    pub coordinates: Vec<f64>,
    pub part_offsets: Vec<u32>,
    pub geom_offsets: Vec<u32>,
    pub feature_indices: Vec<u32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultiPolygonTable {
    pub coordinates: Vec<f64>,
    pub part_offsets: Vec<u32>,
    pub polygon_offsets: Vec<u32>,
    pub geom_offsets: Vec<u32>,
    pub feature_indices: Vec<u32>,
}

/// Columnar geometry for one kind
#[derive(Debug, Clone, PartialEq)]
pub enum GeoArrowTable {
    Point(PointTable),
    LineString(LineStringTable),
    Polygon(PolygonTable),
    MultiPoint(MultiPointTable),
    MultiLineString(MultiLineStringTable),
    MultiPolygon(MultiPolygonTable),
}

impl GeoArrowTable {
    pub fn kind(&self) -> GeometryKind {
        match self {
            GeoArrowTable::Point(_) => GeometryKind::Point,
            GeoArrowTable::LineString(_) => GeometryKind::LineString,
            GeoArrowTable::Polygon(_) => GeometryKind::Polygon,
            GeoArrowTable::MultiPoint(_) => GeometryKind::MultiPoint,
            GeoArrowTable::MultiLineString(_) => GeometryKind::MultiLineString,
            GeoArrowTable::MultiPolygon(_) => GeometryKind::MultiPolygon,
        }
    }

    /// Interleaved x/y coordinates
    pub fn coordinates(&self) -> &[f64] {
        match self {
            GeoArrowTable::Point(t) => &t.coordinates,
            GeoArrowTable::LineString(t) => &t.coordinates,
            GeoArrowTable::Polygon(t) => &t.coordinates,
            GeoArrowTable::MultiPoint(t) => &t.coordinates,
            GeoArrowTable::MultiLineString(t) => &t.coordinates,
            GeoArrowTable::MultiPolygon(t) => &t.coordinates,
        }
    }

    /// Linestring/ring vertex offsets; `None` for point kinds
    pub fn part_offsets(&self) -> Option<&[u32]> {
        match self {
            GeoArrowTable::Point(_) | GeoArrowTable::MultiPoint(_) => None,
            GeoArrowTable::LineString(t) => Some(&t.part_offsets),
            GeoArrowTable::Polygon(t) => Some(&t.part_offsets),
            GeoArrowTable::MultiLineString(t) => Some(&t.part_offsets),
            GeoArrowTable::MultiPolygon(t) => Some(&t.part_offsets),
        }
    }

    pub fn feature_indices(&self) -> &[u32] {
        match self {
            GeoArrowTable::Point(t) => &t.feature_indices,
            GeoArrowTable::LineString(t) => &t.feature_indices,
            GeoArrowTable::Polygon(t) => &t.feature_indices,
            GeoArrowTable::MultiPoint(t) => &t.feature_indices,
            GeoArrowTable::MultiLineString(t) => &t.feature_indices,
            GeoArrowTable::MultiPolygon(t) => &t.feature_indices,
        }
    }

    /// Number of features
    pub fn len(&self) -> usize {
        self.feature_indices().len()
    }

    pub fn is_empty(&self) -> bool {
        self.feature_indices().is_empty()
    }

    pub fn vertex_count(&self) -> usize {
        self.coordinates().len() / 2
    }

    /// Check that the offsets agree with the coordinate buffer
    pub fn is_consistent(&self) -> bool {
        match self.part_offsets() {
            Some(offsets) => offsets.last().map(|&last| last as usize) == Some(self.vertex_count()),
            None => true,
        }
    }
}
