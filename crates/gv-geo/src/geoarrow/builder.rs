//! Two-pass WKB to GeoArrow conversion
//!
//! The first pass classifies buffers by reading only their 5-byte header. The
//! second pass works per kind: it validates and counts every buffer, allocates
//! each output array once at its final size, then copies coordinates and
//! records offsets. Malformed buffers are dropped during counting so they never
//! reach the output.

use std::collections::BTreeMap;

use ahash::AHashMap;
use gv_core::{GeometryKind, MapQueryResult};
use tracing::{debug, warn};

use super::table::*;
use crate::wkb::{peek_kind, read_header, walk, RawCoord, WkbError, WkbVisitor};

/// Build one table per geometry kind found in `buffers`.
///
/// `None` entries are null geometries and are skipped. When `known_kind` is
/// given the header classification pass is skipped and every buffer is decoded
/// as that kind; buffers of any other kind are dropped.
pub fn build<B: AsRef<[u8]>>(
    buffers: &[Option<B>],
    known_kind: Option<GeometryKind>,
) -> BTreeMap<GeometryKind, GeoArrowTable> {
    let (groups, mut dropped) = group_by_kind(buffers, known_kind);

    let mut tables = BTreeMap::new();
    for kind in GeometryKind::ALL {
        let Some(indices) = groups.get(&kind) else {
            continue;
        };

        let (table, rejected) = match kind {
            GeometryKind::Point => build_points(buffers, indices),
            nested => build_nested(buffers, indices, nested),
        };
        dropped += rejected;

        if !table.is_empty() {
            debug_assert!(table.is_consistent());
            tables.insert(kind, table);
        }
    }

    if dropped > 0 {
        warn!(dropped, "Dropped malformed geometries while building GeoArrow tables");
    }
    tables
}

/// Build tables for a map query result.
///
/// A uniform geometry type reported by the query stands in for the
/// classification pass.
pub fn build_from_map_result(result: &MapQueryResult) -> BTreeMap<GeometryKind, GeoArrowTable> {
    let known_kind = GeometryKind::from_label(&result.geometry_type);
    build(&result.wkb_arrays, known_kind)
}

fn group_by_kind<B: AsRef<[u8]>>(
    buffers: &[Option<B>],
    known_kind: Option<GeometryKind>,
) -> (AHashMap<GeometryKind, Vec<u32>>, usize) {
    let mut groups: AHashMap<GeometryKind, Vec<u32>> = AHashMap::new();
    let mut dropped = 0;

    for (row, buffer) in buffers.iter().enumerate() {
        let Some(buffer) = buffer else { continue };

        let kind = match known_kind {
            Some(kind) => kind,
            None => match peek_kind(buffer.as_ref()) {
                Ok(kind) => kind,
                Err(error) => {
                    debug!(row, %error, "Unreadable WKB header");
                    dropped += 1;
                    continue;
                }
            },
        };
        groups.entry(kind).or_default().push(row as u32);
    }

    (groups, dropped)
}

fn point_xy(buf: &[u8]) -> Result<(f64, f64), WkbError> {
    let header = read_header(buf, 0)?;
    if header.kind != GeometryKind::Point {
        return Err(WkbError::UnexpectedMember {
            expected: GeometryKind::Point,
            found: header.kind,
        });
    }

    let start = header.len;
    let needed = header.dimensions.coord_size();
    if buf.len() < start + needed {
        return Err(WkbError::Truncated {
            offset: start,
            needed,
            available: buf.len().saturating_sub(start),
        });
    }

    let order = header.byte_order;
    let read = |at: usize| {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&buf[at..at + 8]);
        order.read_f64(bytes)
    };
    Ok((read(start), read(start + 8)))
}

fn build_points<B: AsRef<[u8]>>(buffers: &[Option<B>], indices: &[u32]) -> (GeoArrowTable, usize) {
    let buffer_at = |row: u32| buffers[row as usize].as_ref().map(|b| b.as_ref()).unwrap_or_default();

    let feature_indices: Vec<u32> = indices
        .iter()
        .copied()
        .filter(|&row| match point_xy(buffer_at(row)) {
            Ok(_) => true,
            Err(error) => {
                debug!(row, %error, "Dropping malformed point");
                false
            }
        })
        .collect();

    let mut coordinates = Vec::with_capacity(feature_indices.len() * 2);
    for &row in &feature_indices {
        if let Ok((x, y)) = point_xy(buffer_at(row)) {
            coordinates.push(x);
            coordinates.push(y);
        }
    }

    let rejected = indices.len() - feature_indices.len();
    (
        GeoArrowTable::Point(PointTable {
            coordinates,
            feature_indices,
        }),
        rejected,
    )
}

/// Sizes gathered by the counting pass
#[derive(Debug, Default, Clone, Copy)]
struct Counts {
    coords: usize,
    lines: usize,
    polygons: usize,
}

impl WkbVisitor for Counts {
    fn coord(&mut self, _coord: RawCoord) {
        self.coords += 1;
    }

    fn line_end(&mut self) {
        self.lines += 1;
    }

    fn polygon_end(&mut self) {
        self.polygons += 1;
    }
}

/// Output arrays filled by the copy pass
struct Filler {
    coordinates: Vec<f64>,
    part_offsets: Vec<u32>,
    polygon_offsets: Vec<u32>,
    geom_offsets: Vec<u32>,
    feature_indices: Vec<u32>,
    track_lines: bool,
    track_polygons: bool,
}

impl Filler {
    fn with_counts(kind: GeometryKind, totals: Counts, features: usize) -> Self {
        let track_lines = !matches!(kind, GeometryKind::MultiPoint);
        let track_polygons = kind == GeometryKind::MultiPolygon;
        let has_geom_offsets = kind != GeometryKind::LineString;

        let offsets = |track: bool, len: usize| {
            if track {
                let mut offsets = Vec::with_capacity(len + 1);
                offsets.push(0);
                offsets
            } else {
                Vec::new()
            }
        };

        Self {
            coordinates: Vec::with_capacity(totals.coords * 2),
            part_offsets: offsets(track_lines, totals.lines),
            polygon_offsets: offsets(track_polygons, totals.polygons),
            geom_offsets: offsets(has_geom_offsets, features),
            feature_indices: Vec::with_capacity(features),
            track_lines,
            track_polygons,
        }
    }

    fn vertex_count(&self) -> u32 {
        (self.coordinates.len() / 2) as u32
    }

    fn lengths(&self) -> [usize; 4] {
        [
            self.coordinates.len(),
            self.part_offsets.len(),
            self.polygon_offsets.len(),
            self.geom_offsets.len(),
        ]
    }

    fn truncate(&mut self, lengths: [usize; 4]) {
        self.coordinates.truncate(lengths[0]);
        self.part_offsets.truncate(lengths[1]);
        self.polygon_offsets.truncate(lengths[2]);
        self.geom_offsets.truncate(lengths[3]);
    }

    fn finish_feature(&mut self, kind: GeometryKind, row: u32) {
        let offset = match kind {
            GeometryKind::Polygon | GeometryKind::MultiLineString => Some(self.part_offsets.len() - 1),
            GeometryKind::MultiPoint => Some(self.coordinates.len() / 2),
            GeometryKind::MultiPolygon => Some(self.polygon_offsets.len() - 1),
            GeometryKind::Point | GeometryKind::LineString => None,
        };
        if let Some(offset) = offset {
            self.geom_offsets.push(offset as u32);
        }
        self.feature_indices.push(row);
    }

    fn into_table(self, kind: GeometryKind) -> GeoArrowTable {
        let Filler {
            coordinates,
            part_offsets,
            polygon_offsets,
            geom_offsets,
            feature_indices,
            ..
        } = self;

        match kind {
            GeometryKind::Point => GeoArrowTable::Point(PointTable {
                coordinates,
                feature_indices,
            }),
            GeometryKind::LineString => GeoArrowTable::LineString(LineStringTable {
                coordinates,
                part_offsets,
                feature_indices,
            }),
            GeometryKind::Polygon => GeoArrowTable::Polygon(PolygonTable {
                coordinates,
                part_offsets,
                geom_offsets,
                feature_indices,
            }),
            GeometryKind::MultiPoint => GeoArrowTable::MultiPoint(MultiPointTable {
                coordinates,
                geom_offsets,
                feature_indices,
            }),
            GeometryKind::MultiLineString => GeoArrowTable::MultiLineString(MultiLineStringTable {
                coordinates,
                part_offsets,
                geom_offsets,
                feature_indices,
            }),
            GeometryKind::MultiPolygon => GeoArrowTable::MultiPolygon(MultiPolygonTable {
                coordinates,
                part_offsets,
                polygon_offsets,
                geom_offsets,
                feature_indices,
            }),
        }
    }
}

impl WkbVisitor for Filler {
    fn coord(&mut self, coord: RawCoord) {
        self.coordinates.push(coord.x);
        self.coordinates.push(coord.y);
    }

    fn line_end(&mut self) {
        if self.track_lines {
            let end = self.vertex_count();
            self.part_offsets.push(end);
        }
    }

    fn polygon_end(&mut self) {
        if self.track_polygons {
            let end = (self.part_offsets.len() - 1) as u32;
            self.polygon_offsets.push(end);
        }
    }
}

fn build_nested<B: AsRef<[u8]>>(
    buffers: &[Option<B>],
    indices: &[u32],
    kind: GeometryKind,
) -> (GeoArrowTable, usize) {
    let buffer_at = |row: u32| buffers[row as usize].as_ref().map(|b| b.as_ref()).unwrap_or_default();

    // Counting pass: validates every buffer and sizes the output
    let mut totals = Counts::default();
    let mut accepted = Vec::with_capacity(indices.len());
    for &row in indices {
        let mut counts = Counts::default();
        match walk(buffer_at(row), kind, &mut counts) {
            Ok(_) => {
                totals.coords += counts.coords;
                totals.lines += counts.lines;
                totals.polygons += counts.polygons;
                accepted.push(row);
            }
            Err(error) => debug!(row, %error, %kind, "Dropping malformed geometry"),
        }
    }

    // Copy pass
    let mut filler = Filler::with_counts(kind, totals, accepted.len());
    let mut rejected = indices.len() - accepted.len();
    for &row in &accepted {
        let lengths = filler.lengths();
        match walk(buffer_at(row), kind, &mut filler) {
            Ok(_) => filler.finish_feature(kind, row),
            Err(error) => {
                debug!(row, %error, %kind, "Geometry failed after validation");
                filler.truncate(lengths);
                rejected += 1;
            }
        }
    }

    (filler.into_table(kind), rejected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wkb::write_geometry;
    use geo_types::{line_string, point, polygon, Geometry, MultiPolygon};

    fn square() -> Geometry<f64> {
        Geometry::Polygon(polygon![
            (x: 0.0, y: 0.0),
            (x: 10.0, y: 0.0),
            (x: 10.0, y: 10.0),
            (x: 0.0, y: 10.0),
            (x: 0.0, y: 0.0)
        ])
    }

    #[test]
    fn test_polygon_round_trip() {
        let buffers = vec![Some(write_geometry(&square()))];
        let tables = build(&buffers, None);

        let table = &tables[&GeometryKind::Polygon];
        assert_eq!(
            table.coordinates(),
            &[0.0, 0.0, 10.0, 0.0, 10.0, 10.0, 0.0, 10.0, 0.0, 0.0]
        );
        assert_eq!(table.part_offsets(), Some(&[0u32, 5][..]));
        assert_eq!(table.feature_indices(), &[0]);
        match table {
            GeoArrowTable::Polygon(polygons) => assert_eq!(polygons.geom_offsets, vec![0, 1]),
            other => panic!("unexpected table {:?}", other.kind()),
        }
    }

    #[test]
    fn test_truncated_buffer_is_excluded() {
        let line = write_geometry(&Geometry::LineString(line_string![(x: 1.0, y: 1.0), (x: 2.0, y: 2.0)]));
        let mut truncated = write_geometry(&square());
        truncated.truncate(truncated.len() - 4);

        let buffers = vec![Some(write_geometry(&square())), Some(truncated), Some(line)];
        let tables = build(&buffers, None);

        let polygons = &tables[&GeometryKind::Polygon];
        assert_eq!(polygons.feature_indices(), &[0]);
        assert_eq!(polygons.vertex_count(), 5);
        assert!(polygons.is_consistent());

        let lines = &tables[&GeometryKind::LineString];
        assert_eq!(lines.feature_indices(), &[2]);
        assert_eq!(lines.coordinates(), &[1.0, 1.0, 2.0, 2.0]);
    }

    #[test]
    fn test_nulls_and_points_keep_row_indices() {
        let buffers = vec![
            None,
            Some(write_geometry(&Geometry::Point(point!(x: 15.0, y: 42.0)))),
            Some(vec![9, 9, 9]),
            Some(write_geometry(&Geometry::Point(point!(x: -1.0, y: 1.0)))),
        ];
        let tables = build(&buffers, None);
        assert_eq!(tables.len(), 1);

        let points = &tables[&GeometryKind::Point];
        assert_eq!(points.feature_indices(), &[1, 3]);
        assert_eq!(points.coordinates(), &[15.0, 42.0, -1.0, 1.0]);
        assert_eq!(points.part_offsets(), None);
    }

    #[test]
    fn test_known_kind_drops_other_kinds() {
        let buffers = vec![
            Some(write_geometry(&square())),
            Some(write_geometry(&Geometry::Point(point!(x: 0.0, y: 0.0)))),
        ];
        let tables = build(&buffers, Some(GeometryKind::Polygon));
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[&GeometryKind::Polygon].feature_indices(), &[0]);
    }

    #[test]
    fn test_multipolygon_offsets() {
        let with_hole = polygon!(
            exterior: [
                (x: 0.0, y: 0.0),
                (x: 4.0, y: 0.0),
                (x: 4.0, y: 4.0),
                (x: 0.0, y: 0.0)
            ],
            interiors: [
                [
                    (x: 1.0, y: 1.0),
                    (x: 2.0, y: 1.0),
                    (x: 1.0, y: 1.0)
                ]
            ]
        );
        let Geometry::Polygon(simple) = square() else { unreachable!() };
        let multi = MultiPolygon(vec![with_hole, simple]);
        let buffers = vec![Some(write_geometry(&Geometry::MultiPolygon(multi)))];

        let tables = build(&buffers, None);
        match &tables[&GeometryKind::MultiPolygon] {
            GeoArrowTable::MultiPolygon(table) => {
                assert_eq!(table.part_offsets, vec![0, 4, 7, 12]);
                assert_eq!(table.polygon_offsets, vec![0, 2, 3]);
                assert_eq!(table.geom_offsets, vec![0, 2]);
                assert_eq!(table.coordinates.len(), 24);
            }
            other => panic!("unexpected table {:?}", other.kind()),
        }
    }

    #[test]
    fn test_ewkb_point_with_srid_and_z() {
        let mut buf = vec![1u8];
        buf.extend_from_slice(&0xA000_0001u32.to_le_bytes());
        buf.extend_from_slice(&4326u32.to_le_bytes());
        for v in [15.0f64, 42.0, 100.0] {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        let tables = build(&[Some(buf)], None);
        assert_eq!(tables[&GeometryKind::Point].coordinates(), &[15.0, 42.0]);
    }

    #[test]
    fn test_build_from_map_result_uses_uniform_type() {
        let result = MapQueryResult {
            wkb_arrays: vec![Some(write_geometry(&square())), None],
            geometry_type: "POLYGON".to_string(),
            row_count: 2,
            ..Default::default()
        };
        let tables = build_from_map_result(&result);
        assert_eq!(tables.keys().copied().collect::<Vec<_>>(), vec![GeometryKind::Polygon]);
    }
}
