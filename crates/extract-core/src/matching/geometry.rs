//! WKT parsing and DE-9IM predicates for geometric rule conditions.

use geo::{Coord, Geometry, LineString, Polygon, Relate};
use serde_json::{json, Value};
use wkt::TryFromWkt;

use super::parser::GeoOp;
use crate::error::{ExtractError, Result};

pub fn parse_wkt(text: &str) -> Result<Geometry<f64>> {
    Geometry::<f64>::try_from_wkt_str(text.trim())
        .map_err(|e| ExtractError::InvalidGeometry(e.to_string()))
}

/// Evaluate `subject <op> reference`.
pub fn relate(op: GeoOp, subject: &Geometry<f64>, reference: &Geometry<f64>) -> bool {
    let matrix = subject.relate(reference);
    match op {
        GeoOp::Intersects => matrix.is_intersects(),
        GeoOp::Contains => matrix.is_contains(),
        GeoOp::Disjoint => matrix.is_disjoint(),
        GeoOp::Equals => matrix.is_equal_topo(),
        GeoOp::Within => matrix.is_within(),
    }
}

// ---------------------------------------------------------------------------
// GeoJSON
// ---------------------------------------------------------------------------

fn position(c: &Coord<f64>) -> Value {
    json!([c.x, c.y])
}

fn ring(line: &LineString<f64>) -> Value {
    Value::Array(line.coords().map(position).collect())
}

fn polygon_rings(polygon: &Polygon<f64>) -> Value {
    let mut rings = vec![ring(polygon.exterior())];
    rings.extend(polygon.interiors().iter().map(ring));
    Value::Array(rings)
}

/// GeoJSON geometry object for a parsed geometry.
pub fn to_geojson(geometry: &Geometry<f64>) -> Value {
    match geometry {
        Geometry::Point(p) => json!({"type": "Point", "coordinates": position(&p.0)}),
        Geometry::Line(l) => json!({
            "type": "LineString",
            "coordinates": [position(&l.start), position(&l.end)],
        }),
        Geometry::LineString(ls) => json!({"type": "LineString", "coordinates": ring(ls)}),
        Geometry::Polygon(p) => json!({"type": "Polygon", "coordinates": polygon_rings(p)}),
        Geometry::MultiPoint(mp) => json!({
            "type": "MultiPoint",
            "coordinates": mp.iter().map(|p| position(&p.0)).collect::<Vec<_>>(),
        }),
        Geometry::MultiLineString(mls) => json!({
            "type": "MultiLineString",
            "coordinates": mls.iter().map(ring).collect::<Vec<_>>(),
        }),
        Geometry::MultiPolygon(mp) => json!({
            "type": "MultiPolygon",
            "coordinates": mp.iter().map(polygon_rings).collect::<Vec<_>>(),
        }),
        Geometry::GeometryCollection(gc) => json!({
            "type": "GeometryCollection",
            "geometries": gc.iter().map(to_geojson).collect::<Vec<_>>(),
        }),
        Geometry::Rect(r) => json!({"type": "Polygon", "coordinates": polygon_rings(&r.to_polygon())}),
        Geometry::Triangle(t) => {
            json!({"type": "Polygon", "coordinates": polygon_rings(&t.to_polygon())})
        }
    }
}
