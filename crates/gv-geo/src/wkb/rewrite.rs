//! In-place coordinate rewriting

use super::walk::{walk_any, RawCoord, WkbVisitor};
use super::WkbError;

struct Positions(Vec<RawCoord>);

impl WkbVisitor for Positions {
    fn coord(&mut self, coord: RawCoord) {
        self.0.push(coord);
    }
}

/// Rewrite every x/y pair of a WKB geometry in place.
///
/// GeometryCollections are rewritten member by member. Structure, byte order,
/// dimensions and any Z/M ordinates are preserved. The
/// buffer is validated completely before the first write, so on error it is
/// left untouched.
pub fn map_coords_in_place<E, F>(buf: &mut [u8], mut f: F) -> Result<(), E>
where
    E: From<WkbError>,
    F: FnMut(f64, f64) -> Result<(f64, f64), E>,
{
    let mut positions = Positions(Vec::new());
    walk_any(buf, &mut positions)?;

    let mut mapped = Vec::with_capacity(positions.0.len());
    for coord in &positions.0 {
        mapped.push(f(coord.x, coord.y)?);
    }

    for (coord, (x, y)) in positions.0.iter().zip(mapped) {
        let order = coord.byte_order;
        buf[coord.offset..coord.offset + 8].copy_from_slice(&order.write_f64(x));
        buf[coord.offset + 8..coord.offset + 16].copy_from_slice(&order.write_f64(y));
    }
    Ok(())
}
