//! SQL that turns a geometry column into WGS84 WKB
//!
//! Every expression produced here evaluates to longitude-first WKB: the
//! reprojection, when needed, passes `always_xy = true` so geographic targets
//! never come back latitude-first.

use gv_core::{GeometryColumn, GeometryColumnKind, ResolvedCrs};

/// Output column carrying normalized WKB
pub const WKB_ALIAS: &str = "__gv_wkb";
/// Output column carrying the per-row geometry type label
pub const GEOMETRY_TYPE_ALIAS: &str = "__gv_geom_type";
/// Alias given to the caller's query when it is wrapped
pub const SOURCE_ALIAS: &str = "__src";

const TARGET_CRS: &str = "EPSG:4326";

/// Quote an identifier, doubling embedded quotes
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal, doubling embedded quotes
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Expression for the column as an engine geometry value
pub fn build_geometry_value(column: &str, kind: GeometryColumnKind) -> String {
    let column = quote_identifier(column);
    match kind {
        GeometryColumnKind::NativeSpatial => column,
        GeometryColumnKind::RawWkbBlob => format!("ST_GeomFromWKB({})", column),
        GeometryColumnKind::TextualGeoJson => format!("ST_GeomFromGeoJSON({})", column),
    }
}

fn reprojected(geometry: String, crs: ResolvedCrs) -> String {
    match crs.epsg() {
        Some(code) => format!(
            "ST_Transform({}, {}, {}, true)",
            geometry,
            quote_literal(&format!("EPSG:{}", code)),
            quote_literal(TARGET_CRS)
        ),
        None => geometry,
    }
}

/// Expression evaluating to WGS84 WKB for `column`
pub fn build_wkb_expression(column: &str, kind: GeometryColumnKind, crs: ResolvedCrs) -> String {
    if kind == GeometryColumnKind::RawWkbBlob && !crs.needs_reprojection() {
        // Already WKB in the right CRS
        return quote_identifier(column);
    }
    let geometry = build_geometry_value(column, kind);
    format!("ST_AsWKB({})", reprojected(geometry, crs))
}

/// Expression evaluating to the geometry type label of `column`
pub fn build_geometry_type_expression(column: &str, kind: GeometryColumnKind) -> String {
    format!("ST_GeometryType({})", build_geometry_value(column, kind))
}

/// Wrap a caller's query so every row also carries WGS84 WKB and its type.
///
/// All original columns are preserved; the two extra columns are named
/// [`WKB_ALIAS`] and [`GEOMETRY_TYPE_ALIAS`].
pub fn build_map_query(sql: &str, column: &GeometryColumn, crs: ResolvedCrs) -> String {
    let inner = sql.trim().trim_end_matches(';').trim_end();
    format!(
        "SELECT {src}.*, {wkb} AS {wkb_alias}, {ty} AS {ty_alias} FROM ({inner}) AS {src}",
        src = SOURCE_ALIAS,
        wkb = build_wkb_expression(&column.name, column.kind, crs),
        wkb_alias = WKB_ALIAS,
        ty = build_geometry_type_expression(&column.name, column.kind),
        ty_alias = GEOMETRY_TYPE_ALIAS,
        inner = inner,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_expressions() {
        assert_eq!(
            build_wkb_expression("geom", GeometryColumnKind::NativeSpatial, ResolvedCrs::Wgs84),
            r#"ST_AsWKB("geom")"#
        );
        assert_eq!(
            build_wkb_expression("geom", GeometryColumnKind::NativeSpatial, ResolvedCrs::Epsg(32633)),
            r#"ST_AsWKB(ST_Transform("geom", 'EPSG:32633', 'EPSG:4326', true))"#
        );
    }

    #[test]
    fn test_blob_passthrough_and_reprojection() {
        assert_eq!(
            build_wkb_expression("wkb_geometry", GeometryColumnKind::RawWkbBlob, ResolvedCrs::Wgs84),
            r#""wkb_geometry""#
        );
        assert_eq!(
            build_wkb_expression("wkb_geometry", GeometryColumnKind::RawWkbBlob, ResolvedCrs::Epsg(5070)),
            r#"ST_AsWKB(ST_Transform(ST_GeomFromWKB("wkb_geometry"), 'EPSG:5070', 'EPSG:4326', true))"#
        );
    }

    #[test]
    fn test_geojson_text() {
        assert_eq!(
            build_wkb_expression("shape", GeometryColumnKind::TextualGeoJson, ResolvedCrs::Wgs84),
            r#"ST_AsWKB(ST_GeomFromGeoJSON("shape"))"#
        );
        assert_eq!(
            build_geometry_type_expression("shape", GeometryColumnKind::TextualGeoJson),
            r#"ST_GeometryType(ST_GeomFromGeoJSON("shape"))"#
        );
    }

    #[test]
    fn test_quoting() {
        assert_eq!(quote_identifier(r#"we"ird"#), r#""we""ird""#);
        assert_eq!(quote_literal("it's"), "'it''s'");
    }

    #[test]
    fn test_map_query_wraps_source() {
        let column = GeometryColumn::new("geom", GeometryColumnKind::NativeSpatial);
        let sql = build_map_query("SELECT * FROM parcels LIMIT 10;  ", &column, ResolvedCrs::Wgs84);
        assert_eq!(
            sql,
            r#"SELECT __src.*, ST_AsWKB("geom") AS __gv_wkb, ST_GeometryType("geom") AS __gv_geom_type FROM (SELECT * FROM parcels LIMIT 10) AS __src"#
        );
    }
}
