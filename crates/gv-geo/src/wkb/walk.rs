//! Bounds-checked traversal of a WKB geometry

use gv_core::GeometryKind;

use super::header::{read_collection_header, read_header, ByteOrder, Dimensions, GEOMETRY_COLLECTION_CODE};
use super::WkbError;

/// A coordinate as found in the buffer.
///
/// Only x and y are decoded; Z and M ordinates are skipped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawCoord {
    pub x: f64,
    pub y: f64,
    /// Byte offset of the x ordinate
    pub offset: usize,
    pub byte_order: ByteOrder,
}

/// Receives structure events while a geometry is walked
pub trait WkbVisitor {
    fn coord(&mut self, coord: RawCoord);

    /// A linestring or ring finished
    fn line_end(&mut self) {}

    /// A polygon finished
    fn polygon_end(&mut self) {}
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn ensure(&self, needed: usize) -> Result<(), WkbError> {
        let available = self.buf.len().saturating_sub(self.pos);
        if needed > available {
            return Err(WkbError::Truncated {
                offset: self.pos,
                needed,
                available,
            });
        }
        Ok(())
    }

    fn read_u32(&mut self, order: ByteOrder) -> Result<u32, WkbError> {
        self.ensure(4)?;
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.buf[self.pos..self.pos + 4]);
        self.pos += 4;
        Ok(order.read_u32(bytes))
    }

    fn read_f64_at(&self, offset: usize, order: ByteOrder) -> f64 {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.buf[offset..offset + 8]);
        order.read_f64(bytes)
    }

    /// Read a count and make sure that many fixed-size items fit in the buffer
    fn read_count(&mut self, order: ByteOrder, item_size: usize) -> Result<usize, WkbError> {
        let count = self.read_u32(order)? as usize;
        self.ensure(count.saturating_mul(item_size))?;
        Ok(count)
    }

    fn read_coords(
        &mut self,
        count: usize,
        order: ByteOrder,
        dims: Dimensions,
        visitor: &mut impl WkbVisitor,
    ) -> Result<(), WkbError> {
        let size = dims.coord_size();
        self.ensure(count.saturating_mul(size))?;
        for _ in 0..count {
            let offset = self.pos;
            visitor.coord(RawCoord {
                x: self.read_f64_at(offset, order),
                y: self.read_f64_at(offset + 8, order),
                offset,
                byte_order: order,
            });
            self.pos += size;
        }
        Ok(())
    }
}

/// Walk one geometry of the `expected` kind starting at the beginning of `buf`.
///
/// Every read is bounds-checked, so a truncated or inconsistent buffer yields an
/// error. Events already delivered to the visitor before the error are not
/// rolled back; callers that must not see partial output should validate with a
/// counting visitor first.
///
/// Returns the number of bytes consumed.
pub fn walk(buf: &[u8], expected: GeometryKind, visitor: &mut impl WkbVisitor) -> Result<usize, WkbError> {
    let mut cursor = Cursor { buf, pos: 0 };
    walk_geometry(&mut cursor, expected, visitor)?;
    Ok(cursor.pos)
}

/// Nesting limit for GeometryCollections inside GeometryCollections
const MAX_COLLECTION_DEPTH: usize = 32;

/// Walk one geometry of any kind, descending into GeometryCollections.
///
/// Members of a collection may be of any kind, including further
/// collections. Returns the number of bytes consumed.
pub fn walk_any(buf: &[u8], visitor: &mut impl WkbVisitor) -> Result<usize, WkbError> {
    let mut cursor = Cursor { buf, pos: 0 };
    walk_any_geometry(&mut cursor, visitor, 0)?;
    Ok(cursor.pos)
}

fn walk_any_geometry(cursor: &mut Cursor<'_>, visitor: &mut impl WkbVisitor, depth: usize) -> Result<(), WkbError> {
    let Some(collection) = read_collection_header(cursor.buf, cursor.pos)? else {
        let header = read_header(cursor.buf, cursor.pos)?;
        return walk_geometry(cursor, header.kind, visitor);
    };
    if depth >= MAX_COLLECTION_DEPTH {
        return Err(WkbError::Unsupported(GEOMETRY_COLLECTION_CODE));
    }
    cursor.pos += collection.len;

    let members = cursor.read_count(collection.byte_order, super::HEADER_LEN)?;
    for _ in 0..members {
        walk_any_geometry(cursor, visitor, depth + 1)?;
    }
    Ok(())
}

fn walk_geometry(
    cursor: &mut Cursor<'_>,
    expected: GeometryKind,
    visitor: &mut impl WkbVisitor,
) -> Result<(), WkbError> {
    let header = read_header(cursor.buf, cursor.pos)?;
    if header.kind != expected {
        return Err(WkbError::UnexpectedMember {
            expected,
            found: header.kind,
        });
    }
    cursor.pos += header.len;

    let order = header.byte_order;
    let dims = header.dimensions;
    match header.kind {
        GeometryKind::Point => cursor.read_coords(1, order, dims, visitor),
        GeometryKind::LineString => {
            let count = cursor.read_count(order, dims.coord_size())?;
            cursor.read_coords(count, order, dims, visitor)?;
            visitor.line_end();
            Ok(())
        }
        GeometryKind::Polygon => {
            // Each ring needs at least its own 4-byte point count
            let rings = cursor.read_count(order, 4)?;
            for _ in 0..rings {
                let count = cursor.read_count(order, dims.coord_size())?;
                cursor.read_coords(count, order, dims, visitor)?;
                visitor.line_end();
            }
            visitor.polygon_end();
            Ok(())
        }
        multi => {
            let member = multi.member_kind().unwrap_or(GeometryKind::Point);
            // Each member needs at least a header
            let members = cursor.read_count(order, super::HEADER_LEN)?;
            for _ in 0..members {
                walk_geometry(cursor, member, visitor)?;
            }
            Ok(())
        }
    }
}
