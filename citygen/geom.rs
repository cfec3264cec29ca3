use std::cmp::Ordering;

use geo::{AffineOps, AffineTransform, BoundingRect, Contains, Coord, MultiPoint, Point, Polygon};
use rand::Rng;
use rand::rngs::StdRng;

pub const ZERO: Coord = Coord { x: 0.0, y: 0.0 };

/// 2D vector operations on [geo::Coord] that geo itself doesn't provide.
///
/// geo's `Coord` already supports `+`, `-` and scalar `*`/`/`; everything else
/// the generator needs (dot/cross products, perpendiculars, signed angles,
/// rotation about a point) lives here.
pub trait CoordExt {
    fn dot(&self, other: Coord) -> f64;
    /// The standard 2D cross product `x·other.y − other.x·y`.
    fn cross(&self, other: Coord) -> f64;
    fn magnitude(&self) -> f64;
    fn magnitude_sq(&self) -> f64;
    fn distance_to(&self, other: Coord) -> f64;
    fn distance_to_sq(&self, other: Coord) -> f64;
    /// Unit vector in the same direction, or the zero vector if this is one.
    fn normalized(&self) -> Coord;
    /// Perpendicular obtained by a clockwise quarter-turn: (y, −x).
    fn perpendicular_cw(&self) -> Coord;
    /// Perpendicular obtained by a counter-clockwise quarter-turn: (−y, x).
    fn perpendicular_ccw(&self) -> Coord;
    /// Signed angle from `self` to `other` in (−π, π].
    fn angle_to(&self, other: Coord) -> f64;
    fn rotate_around(&self, center: Coord, angle: f64) -> Coord;
    /// Euclidean closeness under an explicit tolerance. Never compare
    /// coordinates with `==` outside of exact-snap contexts.
    fn approx_eq(&self, other: Coord, tolerance: f64) -> bool;
}

impl CoordExt for Coord {
    fn dot(&self, other: Coord) -> f64 {
        self.x * other.x + self.y * other.y
    }

    fn cross(&self, other: Coord) -> f64 {
        self.x * other.y - other.x * self.y
    }

    fn magnitude(&self) -> f64 {
        self.magnitude_sq().sqrt()
    }

    fn magnitude_sq(&self) -> f64 {
        self.x * self.x + self.y * self.y
    }

    fn distance_to(&self, other: Coord) -> f64 {
        (*self - other).magnitude()
    }

    fn distance_to_sq(&self, other: Coord) -> f64 {
        (*self - other).magnitude_sq()
    }

    fn normalized(&self) -> Coord {
        let magnitude = self.magnitude();
        if magnitude == 0.0 {
            return ZERO;
        }
        *self / magnitude
    }

    fn perpendicular_cw(&self) -> Coord {
        Coord {
            x: self.y,
            y: -self.x,
        }
    }

    fn perpendicular_ccw(&self) -> Coord {
        Coord {
            x: -self.y,
            y: self.x,
        }
    }

    fn angle_to(&self, other: Coord) -> f64 {
        f64::atan2(self.cross(other), self.dot(other))
    }

    fn rotate_around(&self, center: Coord, angle: f64) -> Coord {
        let (sin, cos) = angle.sin_cos();
        let offset = *self - center;
        center
            + Coord {
                x: offset.x * cos - offset.y * sin,
                y: offset.x * sin + offset.y * cos,
            }
    }

    fn approx_eq(&self, other: Coord, tolerance: f64) -> bool {
        self.distance_to_sq(other) <= tolerance * tolerance
    }
}

/// Lexicographic coordinate ordering, x then y.
pub fn lex_cmp(a: Coord, b: Coord) -> Ordering {
    a.x.partial_cmp(&b.x)
        .unwrap_or(Ordering::Equal)
        .then(a.y.partial_cmp(&b.y).unwrap_or(Ordering::Equal))
}

/// The arithmetic mean of a polygon's vertices.
///
/// This is NOT geo's area-weighted centroid; face deduplication and park
/// spacing are defined against the vertex mean, so keep the two apart.
pub fn vertex_centroid(polygon: &Polygon) -> Coord {
    coords_centroid(ring_coords(polygon))
}

/// The arithmetic mean of a coordinate sequence.
pub fn coords_centroid(coords: &[Coord]) -> Coord {
    debug_assert!(!coords.is_empty());
    let mut sum = ZERO;
    for c in coords {
        sum = sum + *c;
    }
    sum / coords.len() as f64
}

/// The exterior vertices without the closing duplicate geo appends.
pub fn ring_coords(polygon: &Polygon) -> &[Coord] {
    let coords = &polygon.exterior().0;
    match coords.as_slice() {
        [head @ .., last] if !head.is_empty() && head[0] == *last => head,
        all => all,
    }
}

/// Scale a polygon about its vertex centroid.
pub fn scale_about_centroid(polygon: &Polygon, factor: f64) -> Polygon {
    let center = vertex_centroid(polygon);
    let transform = AffineTransform::scale(factor, factor, center);
    polygon.affine_transform(&transform)
}

/// A uniform random point inside the polygon, by rejection sampling over its
/// bounding rect. Falls back to the first vertex when the tries are exhausted
/// (thin or degenerate polygons); the caller gets a usable point either way.
pub fn random_point_in_polygon(polygon: &Polygon, rng: &mut StdRng, max_tries: usize) -> Coord {
    let first_vertex = polygon.exterior().0[0];
    let Some(bounds) = polygon.bounding_rect() else {
        return first_vertex;
    };
    for _ in 0..max_tries {
        let candidate = Coord {
            x: rng.random_range(bounds.min().x..=bounds.max().x),
            y: rng.random_range(bounds.min().y..=bounds.max().y),
        };
        if polygon.contains(&candidate) {
            return candidate;
        }
    }
    tracing::warn!(
        "No interior point found after {max_tries} tries; falling back to a vertex"
    );
    first_vertex
}

/// Convex hull of a point cloud.
pub fn convex_hull(points: &[Coord]) -> Polygon {
    use geo::ConvexHull;
    let multipoint: MultiPoint = points.iter().map(|c| Point::from(*c)).collect();
    multipoint.convex_hull()
}
