//! Spatial SQL functions for the SQLite context
//!
//! Geometry values are plain WKB blobs, so `ST_AsWKB` and `ST_GeomFromWKB`
//! only validate and pass bytes through. A malformed geometry turns into NULL
//! for its own row instead of failing the statement.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use ahash::AHashMap;
use gv_core::{EpsgCode, ResolvedCrs};
use gv_geo::crs::crs_from_str;
use gv_geo::reproject::{ReprojectError, Reprojector};
use gv_geo::wkb::{
    from_geojson, peek_kind, walk_any, write_geometry, RawCoord, WkbError, WkbVisitor, GEOMETRY_COLLECTION_CODE,
};
use parking_lot::Mutex;
use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use tracing::debug;

/// Reprojectors by (source, target, always_xy), shared by both `ST_Transform` arities
type ReprojectorCache = Arc<Mutex<AHashMap<(EpsgCode, EpsgCode, bool), Reprojector>>>;

fn flags() -> FunctionFlags {
    FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC
}

fn user_error<E>(error: E) -> rusqlite::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
{
    rusqlite::Error::UserFunctionError(error.into())
}

struct Validate;

impl WkbVisitor for Validate {
    fn coord(&mut self, _coord: RawCoord) {}
}

/// Check a buffer and report its type label
fn geometry_type(buf: &[u8]) -> Result<&'static str, WkbError> {
    walk_any(buf, &mut Validate)?;
    match peek_kind(buf) {
        Ok(kind) => Ok(kind.label()),
        Err(WkbError::Unsupported(GEOMETRY_COLLECTION_CODE)) => Ok("GEOMETRYCOLLECTION"),
        Err(error) => Err(error),
    }
}

/// A geometry argument, or `None` for NULL and for anything that is not a
/// valid WKB blob
fn geometry_arg(ctx: &Context<'_>, idx: usize) -> Option<Vec<u8>> {
    match ctx.get_raw(idx) {
        ValueRef::Null => None,
        ValueRef::Blob(buf) => match geometry_type(buf) {
            Ok(_) => Some(buf.to_vec()),
            Err(error) => {
                debug!(%error, "Malformed WKB, using NULL");
                None
            }
        },
        other => {
            debug!(value_type = %other.data_type(), "Geometry argument is not a blob, using NULL");
            None
        }
    }
}

fn epsg_arg(ctx: &Context<'_>, idx: usize) -> rusqlite::Result<EpsgCode> {
    let text: String = ctx.get(idx)?;
    crs_from_str(&text)
        .map(|crs| match crs {
            ResolvedCrs::Wgs84 => 4326,
            ResolvedCrs::Epsg(code) => code,
        })
        .ok_or_else(|| user_error(format!("unrecognized CRS '{}'", text)))
}

/// `ST_Transform(geom, source, target[, always_xy])`.
///
/// An unusable CRS fails the statement since every row would fail alike; a
/// geometry that cannot be transformed becomes NULL.
fn transform(ctx: &Context<'_>, cache: &ReprojectorCache) -> rusqlite::Result<Option<Vec<u8>>> {
    let Some(mut wkb) = geometry_arg(ctx, 0) else {
        return Ok(None);
    };
    let source = epsg_arg(ctx, 1)?;
    let target = epsg_arg(ctx, 2)?;
    let always_xy = if ctx.len() > 3 {
        ctx.get::<Option<bool>>(3)?.unwrap_or(false)
    } else {
        false
    };

    let mut reprojectors = cache.lock();
    let reprojector = match reprojectors.entry((source, target, always_xy)) {
        std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
        std::collections::hash_map::Entry::Vacant(entry) => {
            debug!(source, target, always_xy, "Creating reprojector");
            entry.insert(Reprojector::new(source, target, always_xy).map_err(user_error)?)
        }
    };

    match reprojector.transform_wkb(&mut wkb) {
        Ok(()) => Ok(Some(wkb)),
        Err(error @ (ReprojectError::Wkb(_) | ReprojectError::Transform(_))) => {
            debug!(%error, source, target, "Geometry cannot be transformed, using NULL");
            Ok(None)
        }
        Err(error) => Err(user_error(error)),
    }
}

/// Register the spatial functions on `conn`
pub(crate) fn register(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function("ST_AsWKB", 1, flags(), |ctx| Ok(geometry_arg(ctx, 0)))?;
    conn.create_scalar_function("ST_GeomFromWKB", 1, flags(), |ctx| Ok(geometry_arg(ctx, 0)))?;

    conn.create_scalar_function("ST_GeomFromGeoJSON", 1, flags(), |ctx| {
        let Some(text) = ctx.get::<Option<String>>(0)? else {
            return Ok(None);
        };
        match from_geojson(&text) {
            Ok(wkb) => Ok(Some(wkb)),
            Err(error) => {
                debug!(%error, "Malformed GeoJSON, using NULL");
                Ok(None)
            }
        }
    })?;

    conn.create_scalar_function("ST_GeometryType", 1, flags(), |ctx| {
        Ok(geometry_arg(ctx, 0).and_then(|wkb| geometry_type(&wkb).ok()).map(str::to_string))
    })?;

    let cache: ReprojectorCache = Arc::default();
    for arity in [3, 4] {
        let cache = AssertUnwindSafe(cache.clone());
        conn.create_scalar_function("ST_Transform", arity, flags(), move |ctx| transform(ctx, &cache))?;
    }

    conn.create_scalar_function("ST_Point", 2, flags(), |ctx| {
        let x: f64 = ctx.get(0)?;
        let y: f64 = ctx.get(1)?;
        Ok(write_geometry(&geo_types::Point::new(x, y).into()))
    })?;

    Ok(())
}
