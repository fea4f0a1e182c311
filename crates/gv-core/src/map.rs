//! Output of a map query

use indexmap::IndexMap;

use crate::attributes::AttributeColumn;

/// Geometry and attributes produced by a single map query execution.
///
/// Every present WKB buffer encodes one geometry in WGS84 with longitude as x.
/// Ownership passes to the caller; the engine keeps no reference.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapQueryResult {
    /// One entry per row, `None` for null geometry
    pub wkb_arrays: Vec<Option<Vec<u8>>>,
    /// Geometry type label, `GEOMETRY` when rows disagree
    pub geometry_type: String,
    /// Attribute columns in result order
    pub attributes: IndexMap<String, AttributeColumn>,
    pub row_count: usize,
}

impl MapQueryResult {
    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }

    /// Number of rows carrying a geometry
    pub fn geometry_count(&self) -> usize {
        self.wkb_arrays.iter().filter(|wkb| wkb.is_some()).count()
    }

    /// WKB buffers borrowed as slices, in row order
    pub fn wkb_slices(&self) -> Vec<Option<&[u8]>> {
        self.wkb_arrays.iter().map(|wkb| wkb.as_deref()).collect()
    }
}
