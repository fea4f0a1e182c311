//! 2D little-endian ISO WKB writer

use geo_types::{Coord, Geometry, LineString, Polygon};

use super::header::GEOMETRY_COLLECTION_CODE;
use super::WkbError;

const LITTLE_ENDIAN: u8 = 1;

fn write_header(out: &mut Vec<u8>, code: u32) {
    out.push(LITTLE_ENDIAN);
    out.extend_from_slice(&code.to_le_bytes());
}

fn write_count(out: &mut Vec<u8>, count: usize) {
    out.extend_from_slice(&(count as u32).to_le_bytes());
}

fn write_coord(out: &mut Vec<u8>, coord: Coord<f64>) {
    out.extend_from_slice(&coord.x.to_le_bytes());
    out.extend_from_slice(&coord.y.to_le_bytes());
}

fn write_line_body(out: &mut Vec<u8>, line: &LineString<f64>) {
    write_count(out, line.0.len());
    for coord in &line.0 {
        write_coord(out, *coord);
    }
}

fn write_polygon_body(out: &mut Vec<u8>, polygon: &Polygon<f64>) {
    let exterior_present = !polygon.exterior().0.is_empty();
    let ring_count = exterior_present as usize + polygon.interiors().len();
    write_count(out, ring_count);
    if exterior_present {
        write_line_body(out, polygon.exterior());
    }
    for ring in polygon.interiors() {
        write_line_body(out, ring);
    }
}

fn write_into(out: &mut Vec<u8>, geometry: &Geometry<f64>) {
    match geometry {
        Geometry::Point(point) => {
            write_header(out, 1);
            write_coord(out, point.0);
        }
        Geometry::Line(line) => {
            write_header(out, 2);
            write_count(out, 2);
            write_coord(out, line.start);
            write_coord(out, line.end);
        }
        Geometry::LineString(line) => {
            write_header(out, 2);
            write_line_body(out, line);
        }
        Geometry::Polygon(polygon) => {
            write_header(out, 3);
            write_polygon_body(out, polygon);
        }
        Geometry::MultiPoint(points) => {
            write_header(out, 4);
            write_count(out, points.0.len());
            for point in &points.0 {
                write_header(out, 1);
                write_coord(out, point.0);
            }
        }
        Geometry::MultiLineString(lines) => {
            write_header(out, 5);
            write_count(out, lines.0.len());
            for line in &lines.0 {
                write_header(out, 2);
                write_line_body(out, line);
            }
        }
        Geometry::MultiPolygon(polygons) => {
            write_header(out, 6);
            write_count(out, polygons.0.len());
            for polygon in &polygons.0 {
                write_header(out, 3);
                write_polygon_body(out, polygon);
            }
        }
        Geometry::GeometryCollection(collection) => {
            write_header(out, GEOMETRY_COLLECTION_CODE);
            write_count(out, collection.0.len());
            for member in &collection.0 {
                write_into(out, member);
            }
        }
        Geometry::Rect(rect) => write_into(out, &Geometry::Polygon(rect.to_polygon())),
        Geometry::Triangle(triangle) => write_into(out, &Geometry::Polygon(triangle.to_polygon())),
    }
}

/// Encode a geometry as WKB
pub fn write_geometry(geometry: &Geometry<f64>) -> Vec<u8> {
    let mut out = Vec::new();
    write_into(&mut out, geometry);
    out
}

/// Parse a GeoJSON geometry object and encode it as WKB
pub fn from_geojson(text: &str) -> Result<Vec<u8>, WkbError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| WkbError::InvalidGeoJson(e.to_string()))?;
    let geometry = geojson::Geometry::from_json_value(value)
        .map_err(|e| WkbError::InvalidGeoJson(e.to_string()))?;
    let geometry: Geometry<f64> = geometry
        .try_into()
        .map_err(|e: geojson::Error| WkbError::InvalidGeoJson(e.to_string()))?;
    Ok(write_geometry(&geometry))
}
