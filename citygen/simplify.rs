use geo::{Coord, LineString, Simplify};

use crate::geom::CoordExt;

/// Two-stage polyline simplification: a radial-distance pre-filter to thin
/// out the densely sampled integration output, then Douglas–Peucker.
///
/// Both stages preserve the first and last points exactly.
pub fn simplify_polyline(line: &LineString, tolerance: f64) -> LineString {
    let filtered = radial_distance_filter(line, tolerance);
    filtered.simplify(&tolerance)
}

/// Drop any point closer than `tolerance` to the previously kept point.
///
/// The final input point is always appended, even when the last kept point
/// already equals it; Douglas–Peucker keeps endpoints and collapses the
/// zero-length tail, so the duplicate is harmless downstream.
pub fn radial_distance_filter(line: &LineString, tolerance: f64) -> LineString {
    let coords = &line.0;
    if coords.len() < 3 {
        return line.clone();
    }
    let tolerance_sq = tolerance * tolerance;

    let mut kept: Vec<Coord> = Vec::with_capacity(coords.len());
    kept.push(coords[0]);
    let mut last = coords[0];
    for &point in &coords[1..coords.len() - 1] {
        if point.distance_to_sq(last) > tolerance_sq {
            kept.push(point);
            last = point;
        }
    }
    kept.push(coords[coords.len() - 1]);
    LineString::new(kept)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(coords: &[(f64, f64)]) -> LineString {
        LineString::new(coords.iter().map(|&(x, y)| Coord { x, y }).collect())
    }

    #[test]
    fn test_radial_filter_thins_dense_runs() {
        let dense = line(&[
            (0.0, 0.0),
            (0.1, 0.0),
            (0.2, 0.0),
            (1.5, 0.0),
            (1.6, 0.0),
            (3.0, 0.0),
        ]);
        let filtered = radial_distance_filter(&dense, 1.0);
        assert_eq!(
            filtered,
            line(&[(0.0, 0.0), (1.5, 0.0), (3.0, 0.0)])
        );
    }

    #[test]
    fn test_radial_filter_keeps_duplicate_final_point() {
        // The last input point is appended unconditionally, so a kept point
        // exactly at the end produces a duplicate tail.
        let dense = line(&[(0.0, 0.0), (2.0, 0.0), (2.0, 0.0)]);
        let filtered = radial_distance_filter(&dense, 1.0);
        assert_eq!(filtered, line(&[(0.0, 0.0), (2.0, 0.0), (2.0, 0.0)]));
    }

    #[test]
    fn test_simplify_preserves_endpoints() {
        let wiggle = line(&[
            (0.0, 0.0),
            (1.0, 0.01),
            (2.0, -0.02),
            (3.0, 0.01),
            (4.0, 0.0),
        ]);
        let simplified = simplify_polyline(&wiggle, 0.5);
        assert_eq!(simplified.0.first(), wiggle.0.first());
        assert_eq!(simplified.0.last(), wiggle.0.last());
        assert_eq!(simplified.0.len(), 2);
    }

    #[test]
    fn test_simplify_keeps_genuine_corners() {
        let corner = line(&[
            (0.0, 0.0),
            (5.0, 0.1),
            (10.0, 0.0),
            (10.0, 10.0),
        ]);
        let simplified = simplify_polyline(&corner, 0.5);
        assert!(simplified.0.contains(&Coord { x: 10.0, y: 0.0 }));
        assert_eq!(simplified.0.len(), 3);
    }
}
