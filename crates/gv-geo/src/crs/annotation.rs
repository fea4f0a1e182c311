//! Parquet logical type annotations: `GeometryType(crs=...)` and
//! `GeographyType(crs=..., algorithm=...)`

use ahash::AHashMap;
use gv_core::ResolvedCrs;

use super::geoparquet::crs_from_str;
use super::FileMetadata;

const TYPE_PREFIXES: [&str; 2] = ["GeometryType(", "GeographyType("];

/// Resolve from the per-column logical type annotation
pub fn from_annotation(metadata: &FileMetadata, column: &str) -> Option<ResolvedCrs> {
    let annotation = metadata.column_annotations.get(column)?;
    parse_annotation(annotation, &metadata.key_values)
}

/// Parse one annotation string.
///
/// `None` means the annotation is not a spatial logical type or its CRS value
/// could not be understood.
pub fn parse_annotation(annotation: &str, key_values: &AHashMap<String, String>) -> Option<ResolvedCrs> {
    let trimmed = annotation.trim();
    let params = TYPE_PREFIXES.iter().find_map(|prefix| {
        let head = trimmed.get(..prefix.len())?;
        head.eq_ignore_ascii_case(prefix).then(|| &trimmed[prefix.len()..])
    })?;
    let params = params.strip_suffix(')')?;

    let Some(value) = crs_parameter(params) else {
        return Some(ResolvedCrs::Wgs84);
    };

    if value.starts_with('{') {
        let blob = balanced_object(value)?;
        return crs_from_str(blob);
    }

    let value = value.split(',').next().unwrap_or_default().trim();
    match value {
        "" | "<null>" | "null" => Some(ResolvedCrs::Wgs84),
        _ => {
            if let Some(srid) = value.strip_prefix("srid:") {
                let srid: u32 = srid.trim().parse().ok()?;
                return Some(if srid == 0 {
                    ResolvedCrs::Wgs84
                } else {
                    ResolvedCrs::from_epsg(srid)
                });
            }
            if let Some(key) = value.strip_prefix("projjson:") {
                let projjson = key_values.get(key.trim())?;
                return crs_from_str(projjson);
            }
            crs_from_str(value)
        }
    }
}

/// Text following `crs=` when the parameter is present
fn crs_parameter(params: &str) -> Option<&str> {
    let mut search = 0;
    while let Some(found) = params[search..].find("crs=") {
        let at = search + found;
        let boundary = params[..at]
            .chars()
            .next_back()
            .map_or(true, |c| c == ',' || c.is_whitespace());
        if boundary {
            return Some(params[at + 4..].trim_start());
        }
        search = at + 4;
    }
    None
}

/// The leading `{...}` object of `text`, matched by brace depth.
///
/// Braces inside JSON string literals, including escaped quotes, do not count.
fn balanced_object(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, byte) in text.bytes().enumerate() {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&text[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(annotation: &str) -> Option<ResolvedCrs> {
        parse_annotation(annotation, &AHashMap::new())
    }

    #[test]
    fn test_srid_forms() {
        assert_eq!(parse("GeometryType(crs=srid:5070)"), Some(ResolvedCrs::Epsg(5070)));
        assert_eq!(parse("GeometryType(crs=srid:0)"), Some(ResolvedCrs::Wgs84));
        assert_eq!(parse("GeometryType(crs=srid:4979)"), Some(ResolvedCrs::Wgs84));
        assert_eq!(parse("GeometryType(crs=srid:abc)"), None);
    }

    #[test]
    fn test_null_and_missing_crs() {
        assert_eq!(parse("GeometryType(crs=<null>)"), Some(ResolvedCrs::Wgs84));
        assert_eq!(parse("GeometryType(crs=)"), Some(ResolvedCrs::Wgs84));
        assert_eq!(parse("GeometryType()"), Some(ResolvedCrs::Wgs84));
        assert_eq!(
            parse("GeographyType(crs=<null>, algorithm=spherical)"),
            Some(ResolvedCrs::Wgs84)
        );
    }

    #[test]
    fn test_not_a_spatial_type() {
        assert_eq!(parse("String"), None);
        assert_eq!(parse("GeometryType(crs=srid:5070"), None);
    }

    #[test]
    fn test_inline_projjson_with_nested_braces() {
        let annotation = r#"GeometryType(crs={"type":"ProjectedCRS","name":"odd } name {","base_crs":{"id":{"authority":"EPSG","code":4326}},"id":{"authority":"EPSG","code":32633}})"#;
        assert_eq!(parse(annotation), Some(ResolvedCrs::Epsg(32633)));
    }

    #[test]
    fn test_escaped_quote_inside_string() {
        let annotation = r#"GeographyType(crs={"name":"a \"}\" b","id":{"authority":"EPSG","code":3035}}, algorithm=vincenty)"#;
        assert_eq!(parse(annotation), Some(ResolvedCrs::Epsg(3035)));
    }

    #[test]
    fn test_unbalanced_blob_falls_through() {
        assert_eq!(parse(r#"GeometryType(crs={"id":{"authority":"EPSG")"#), None);
    }

    #[test]
    fn test_projjson_reference() {
        let mut kv = AHashMap::new();
        kv.insert(
            "crs_key".to_string(),
            r#"{"id":{"authority":"EPSG","code":2193}}"#.to_string(),
        );
        assert_eq!(
            parse_annotation("GeometryType(crs=projjson:crs_key)", &kv),
            Some(ResolvedCrs::Epsg(2193))
        );
        assert_eq!(parse_annotation("GeometryType(crs=projjson:missing)", &kv), None);
    }

    #[test]
    fn test_authority_code_string() {
        assert_eq!(parse("GeometryType(crs=EPSG:3857)"), Some(ResolvedCrs::Epsg(3857)));
        assert_eq!(parse("GeometryType(crs=OGC:CRS84)"), Some(ResolvedCrs::Wgs84));
    }
}
