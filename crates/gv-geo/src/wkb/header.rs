use gv_core::GeometryKind;

use super::WkbError;

/// Byte-order flag plus the 32-bit type code
pub const HEADER_LEN: usize = 5;

pub const GEOMETRY_COLLECTION_CODE: u32 = 7;

const EWKB_Z_FLAG: u32 = 0x8000_0000;
const EWKB_M_FLAG: u32 = 0x4000_0000;
const EWKB_SRID_FLAG: u32 = 0x2000_0000;
const EWKB_FLAGS: u32 = EWKB_Z_FLAG | EWKB_M_FLAG | EWKB_SRID_FLAG;

/// Byte order of the numbers that follow a header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    BigEndian,
    LittleEndian,
}

impl ByteOrder {
    pub fn from_flag(flag: u8) -> Result<Self, WkbError> {
        match flag {
            0 => Ok(ByteOrder::BigEndian),
            1 => Ok(ByteOrder::LittleEndian),
            other => Err(WkbError::InvalidByteOrder(other)),
        }
    }

    pub fn read_u32(self, bytes: [u8; 4]) -> u32 {
        match self {
            ByteOrder::BigEndian => u32::from_be_bytes(bytes),
            ByteOrder::LittleEndian => u32::from_le_bytes(bytes),
        }
    }

    pub fn read_f64(self, bytes: [u8; 8]) -> f64 {
        match self {
            ByteOrder::BigEndian => f64::from_be_bytes(bytes),
            ByteOrder::LittleEndian => f64::from_le_bytes(bytes),
        }
    }

    pub fn write_f64(self, value: f64) -> [u8; 8] {
        match self {
            ByteOrder::BigEndian => value.to_be_bytes(),
            ByteOrder::LittleEndian => value.to_le_bytes(),
        }
    }
}

/// Ordinates stored per coordinate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Dimensions {
    pub has_z: bool,
    pub has_m: bool,
}

impl Dimensions {
    /// Number of doubles per coordinate
    pub fn ordinates(&self) -> usize {
        2 + self.has_z as usize + self.has_m as usize
    }

    /// Bytes per coordinate
    pub fn coord_size(&self) -> usize {
        self.ordinates() * 8
    }
}

/// Decoded geometry header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WkbHeader {
    pub byte_order: ByteOrder,
    pub kind: GeometryKind,
    pub dimensions: Dimensions,
    pub srid: Option<u32>,
    /// Bytes taken by the header, including an embedded SRID
    pub len: usize,
}

/// Split a raw type code into the base kind and dimensions.
fn decode_type_code(raw: u32) -> Result<(GeometryKind, Dimensions, bool), WkbError> {
    let has_srid = raw & EWKB_SRID_FLAG != 0;
    let mut dimensions = Dimensions {
        has_z: raw & EWKB_Z_FLAG != 0,
        has_m: raw & EWKB_M_FLAG != 0,
    };

    let code = raw & !EWKB_FLAGS;
    let base = code % 1000;
    match code / 1000 {
        0 => {}
        1 => dimensions.has_z = true,
        2 => dimensions.has_m = true,
        3 => {
            dimensions.has_z = true;
            dimensions.has_m = true;
        }
        _ => return Err(WkbError::UnknownGeometryType(raw)),
    }

    let kind = match GeometryKind::from_wkb_code(base) {
        Some(kind) => kind,
        // GeometryCollection, and the curve/surface types, are valid WKB we do not lay out
        None if (7..=17).contains(&base) => return Err(WkbError::Unsupported(base)),
        None => return Err(WkbError::UnknownGeometryType(raw)),
    };

    Ok((kind, dimensions, has_srid))
}

fn fixed<const N: usize>(buf: &[u8], offset: usize) -> Result<[u8; N], WkbError> {
    buf.get(offset..offset + N)
        .and_then(|slice| slice.try_into().ok())
        .ok_or(WkbError::Truncated {
            offset,
            needed: N,
            available: buf.len().saturating_sub(offset),
        })
}

/// Read only the fixed 5-byte header to find the geometry kind.
///
/// Coordinates and any embedded SRID are not inspected.
pub fn peek_kind(buf: &[u8]) -> Result<GeometryKind, WkbError> {
    let [flag] = fixed::<1>(buf, 0)?;
    let byte_order = ByteOrder::from_flag(flag)?;
    let raw = byte_order.read_u32(fixed::<4>(buf, 1)?);
    decode_type_code(raw).map(|(kind, _, _)| kind)
}

/// Header of a GeometryCollection, which has no [`GeometryKind`] of its own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionHeader {
    pub byte_order: ByteOrder,
    /// Bytes taken by the header, including an embedded SRID
    pub len: usize,
}

/// Read the header at `offset` if it starts a GeometryCollection.
///
/// Any other valid or invalid header gives `Ok(None)`; only a truncated or
/// badly ordered header is an error.
pub fn read_collection_header(buf: &[u8], offset: usize) -> Result<Option<CollectionHeader>, WkbError> {
    let [flag] = fixed::<1>(buf, offset)?;
    let byte_order = ByteOrder::from_flag(flag)?;
    let raw = byte_order.read_u32(fixed::<4>(buf, offset + 1)?);

    let code = raw & !EWKB_FLAGS;
    if code % 1000 != GEOMETRY_COLLECTION_CODE || code / 1000 > 3 {
        return Ok(None);
    }
    let len = if raw & EWKB_SRID_FLAG != 0 {
        fixed::<4>(buf, offset + HEADER_LEN)?;
        HEADER_LEN + 4
    } else {
        HEADER_LEN
    };
    Ok(Some(CollectionHeader { byte_order, len }))
}

/// Read a full header at `offset`, including an EWKB SRID when flagged.
pub fn read_header(buf: &[u8], offset: usize) -> Result<WkbHeader, WkbError> {
    let [flag] = fixed::<1>(buf, offset)?;
    let byte_order = ByteOrder::from_flag(flag)?;
    let raw = byte_order.read_u32(fixed::<4>(buf, offset + 1)?);
    let (kind, dimensions, has_srid) = decode_type_code(raw)?;

    let (srid, len) = if has_srid {
        let srid = byte_order.read_u32(fixed::<4>(buf, offset + HEADER_LEN)?);
        (Some(srid), HEADER_LEN + 4)
    } else {
        (None, HEADER_LEN)
    };

    Ok(WkbHeader {
        byte_order,
        kind,
        dimensions,
        srid,
        len,
    })
}
