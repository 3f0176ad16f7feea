use std::f64::consts::PI;

use geo::{BooleanOps, Coord, LineString, MultiPolygon, Polygon};

use crate::error::HsaError;

/// Segments per semicircular end cap when buffering an edge.
const CAP_SEGMENTS: usize = 16;

/// Parse an STC-S-like footprint string into closed polygons of
/// (RA, Dec) vertices in decimal degrees.
///
/// Accepts the single-polygon notation `Polygon ICRS ra1 dec1 ra2 dec2 ...`
/// (frame tags `ICRS`, `FK5` and `J2000` are all treated as ICRS) and the
/// multi-polygon notation `UNION ICRS (Polygon ... Polygon ...)`.
pub fn parse_polygons(footprint: &str) -> Result<Vec<Polygon<f64>>, HsaError> {
    let trimmed = footprint.trim();
    if trimmed.is_empty() {
        return Err(HsaError::Footprint("empty footprint string".to_string()));
    }

    let mut parts: Vec<Vec<Coord<f64>>> = Vec::new();
    let mut current: Option<Vec<f64>> = None;

    for token in trimmed.split(|ch: char| ch.is_whitespace() || ch == '(' || ch == ')') {
        if token.is_empty() {
            continue;
        }
        let upper = token.to_uppercase();
        match upper.as_str() {
            "UNION" | "ICRS" | "FK5" | "J2000" => continue,
            "POLYGON" => {
                if let Some(values) = current.take() {
                    parts.push(close_part(trimmed, values)?);
                }
                current = Some(Vec::new());
            }
            _ => {
                let value = token.parse::<f64>().map_err(|_| {
                    HsaError::Footprint(format!("non-numeric vertex token {token:?} in {trimmed}"))
                })?;
                match current.as_mut() {
                    Some(values) => values.push(value),
                    None => {
                        return Err(HsaError::Footprint(format!(
                            "vertex outside a Polygon block in {trimmed}"
                        )));
                    }
                }
            }
        }
    }
    if let Some(values) = current.take() {
        parts.push(close_part(trimmed, values)?);
    }

    if parts.is_empty() {
        return Err(HsaError::Footprint(format!(
            "no Polygon token in {trimmed}"
        )));
    }

    Ok(parts
        .into_iter()
        .map(|coords| Polygon::new(LineString::new(coords), Vec::new()))
        .collect())
}

fn close_part(footprint: &str, values: Vec<f64>) -> Result<Vec<Coord<f64>>, HsaError> {
    if values.len() % 2 != 0 {
        return Err(HsaError::Footprint(format!(
            "odd vertex count in {footprint}"
        )));
    }
    if values.len() < 6 {
        return Err(HsaError::Footprint(format!(
            "polygon with fewer than 3 vertices in {footprint}"
        )));
    }
    Ok(values
        .chunks(2)
        .map(|pair| Coord {
            x: pair[0],
            y: pair[1],
        })
        .collect())
}

/// Union the parts of a multi-part footprint into one shape, possibly
/// disconnected (e.g. the two WFPC2 chip quadrilaterals).
pub fn unioned_shape(parts: &[Polygon<f64>]) -> MultiPolygon<f64> {
    let mut iter = parts.iter();
    let Some(first) = iter.next() else {
        return MultiPolygon::new(Vec::new());
    };
    let mut shape = MultiPolygon::new(vec![first.clone()]);
    for part in iter {
        shape = shape.union(&MultiPolygon::new(vec![part.clone()]));
    }
    shape
}

/// Parse a footprint string and union its parts into one shape.
pub fn footprint_shape(footprint: &str) -> Result<MultiPolygon<f64>, HsaError> {
    Ok(unioned_shape(&parse_polygons(footprint)?))
}

/// Dilate a shape by `radius_deg` in plain planar degrees.
///
/// No cos(dec) correction is applied; for the arcminute-scale buffers used
/// here the error is negligible away from the poles. The dilation is the
/// union of the shape with a discretized capsule over every ring edge, so
/// area grows strictly with the radius.
pub fn buffer_shape(shape: &MultiPolygon<f64>, radius_deg: f64) -> MultiPolygon<f64> {
    if radius_deg <= 0.0 {
        return shape.clone();
    }
    let mut buffered = shape.clone();
    for polygon in shape.iter() {
        for ring in std::iter::once(polygon.exterior()).chain(polygon.interiors().iter()) {
            for edge in ring.lines() {
                let capsule = edge_capsule(edge.start, edge.end, radius_deg);
                buffered = buffered.union(&MultiPolygon::new(vec![capsule]));
            }
        }
    }
    buffered
}

fn edge_capsule(start: Coord<f64>, end: Coord<f64>, radius: f64) -> Polygon<f64> {
    let heading = (end.y - start.y).atan2(end.x - start.x);
    let mut coords = Vec::with_capacity(2 * (CAP_SEGMENTS + 1));
    for step in 0..=CAP_SEGMENTS {
        let angle = heading + PI / 2.0 + PI * step as f64 / CAP_SEGMENTS as f64;
        coords.push(Coord {
            x: start.x + radius * angle.cos(),
            y: start.y + radius * angle.sin(),
        });
    }
    for step in 0..=CAP_SEGMENTS {
        let angle = heading - PI / 2.0 + PI * step as f64 / CAP_SEGMENTS as f64;
        coords.push(Coord {
            x: end.x + radius * angle.cos(),
            y: end.y + radius * angle.sin(),
        });
    }
    Polygon::new(LineString::new(coords), Vec::new())
}

/// Compute the ORIENTAT position angle (PA of the detector +y axis) from
/// the first edge of a footprint polygon, in degrees wrapped to (-180, 180].
///
/// The -0.24 deg offset matches the archive polygons to the ORIENTAT header
/// keyword of the corresponding exposures.
pub fn orientat(footprint: &str) -> Result<f64, HsaError> {
    let parts = parse_polygons(footprint)?;
    let exterior = parts[0].exterior();
    let first = exterior.0[0];
    let second = exterior.0[1];

    let dra = (second.x - first.x) * first.y.to_radians().cos();
    let ddec = second.y - first.y;

    let mut angle = 90.0 + dra.atan2(ddec).to_degrees() - 0.24;
    while angle > 180.0 {
        angle -= 360.0;
    }
    while angle <= -180.0 {
        angle += 360.0;
    }
    Ok(angle)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use assert_matches::assert_matches;
    use geo::Area;

    use super::*;

    const RECT: &str = "Polygon ICRS 10.0 0.0 10.1 0.0 10.1 0.1 10.0 0.1";

    #[test]
    fn parse_single_polygon() {
        let parts = parse_polygons(RECT).unwrap();
        assert_eq!(parts.len(), 1);
        // geo closes the exterior ring, so 4 vertices become 5 coordinates
        let exterior = &parts[0].exterior().0;
        assert_eq!(exterior.len(), 5);
        assert_eq!(exterior[0], Coord { x: 10.0, y: 0.0 });
        assert_eq!(exterior[2], Coord { x: 10.1, y: 0.1 });
        assert_eq!(exterior[4], exterior[0]);
    }

    #[test]
    fn parse_union_notation() {
        let footprint = "UNION ICRS (Polygon 0 0 1 0 1 1 0 1 Polygon 5 5 6 5 6 6 5 6)";
        let parts = parse_polygons(footprint).unwrap();
        assert_eq!(parts.len(), 2);
        let shape = unioned_shape(&parts);
        assert_eq!(shape.0.len(), 2);
        assert_relative_eq!(shape.unsigned_area(), 2.0, epsilon = 1e-9);
    }

    #[test]
    fn fk5_frame_accepted() {
        let parts = parse_polygons("Polygon FK5 0 0 1 0 1 1").unwrap();
        assert_eq!(parts.len(), 1);
    }

    #[test]
    fn malformed_footprints_are_errors() {
        assert_matches!(parse_polygons(""), Err(HsaError::Footprint(_)));
        assert_matches!(parse_polygons("ICRS 1 2 3 4"), Err(HsaError::Footprint(_)));
        assert_matches!(
            parse_polygons("Polygon ICRS 1 2 3"),
            Err(HsaError::Footprint(_))
        );
        assert_matches!(
            parse_polygons("Polygon ICRS 1 2 3 4"),
            Err(HsaError::Footprint(_))
        );
        assert_matches!(
            parse_polygons("Polygon ICRS 1 2 x 4 5 6"),
            Err(HsaError::Footprint(_))
        );
    }

    #[test]
    fn overlapping_parts_union_to_one_polygon() {
        let footprint = "UNION ICRS (Polygon 0 0 2 0 2 2 0 2 Polygon 1 1 3 1 3 3 1 3)";
        let shape = footprint_shape(footprint).unwrap();
        assert_eq!(shape.0.len(), 1);
        assert_relative_eq!(shape.unsigned_area(), 7.0, epsilon = 1e-9);
    }

    #[test]
    fn buffer_grows_area() {
        let shape = footprint_shape(RECT).unwrap();
        let buffered = buffer_shape(&shape, 0.05);
        assert!(buffered.unsigned_area() > shape.unsigned_area());
        // area of a rectangle dilated by r: a*b + 2r(a+b) + pi r^2, with the
        // caps slightly undershooting the circle
        let expected = 0.1 * 0.1 + 2.0 * 0.05 * 0.2 + PI * 0.05 * 0.05;
        assert_relative_eq!(buffered.unsigned_area(), expected, epsilon = 2e-4);
    }

    #[test]
    fn zero_buffer_is_identity() {
        let shape = footprint_shape(RECT).unwrap();
        let buffered = buffer_shape(&shape, 0.0);
        assert_relative_eq!(
            buffered.unsigned_area(),
            shape.unsigned_area(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn orientat_cardinal_directions() {
        // first edge due +y: orientat = 90 + atan2(0, 1) - 0.24 = 89.76
        let up = orientat("Polygon ICRS 0 0 0 1 1 1 1 0").unwrap();
        assert_relative_eq!(up, 89.76, epsilon = 1e-9);

        // first edge due -y: 90 + 180 - 0.24 wraps to -90.24
        let down = orientat("Polygon ICRS 0 1 0 0 1 0 1 1").unwrap();
        assert_relative_eq!(down, -90.24, epsilon = 1e-9);

        // first edge due +x at dec 0: 90 + 90 - 0.24
        let east = orientat("Polygon ICRS 0 0 1 0 1 1 0 1").unwrap();
        assert_relative_eq!(east, 179.76, epsilon = 1e-9);
    }
}
