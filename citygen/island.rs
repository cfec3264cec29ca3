use std::f64::consts::TAU;

use eyre::ensure;
use geo::{Contains, Coord, LineString, Polygon};
use rand::Rng;
use rand::rngs::StdRng;

use crate::geom::{lex_cmp, ring_coords, vertex_centroid, CoordExt};
use crate::voronoi::Voronoi;

/// Matching tolerance when pairing land-cell edges with sea-cell edges.
const COASTLINE_MATCH_TOLERANCE: f64 = 0.1;

/// Subdivide coastline edges longer than this multiple of the average.
const REFINE_LENGTH_FACTOR: f64 = 3.0;

/// Perpendicular perturbation range, as a fraction of the longest edge.
const PERTURBATION_MIN: f64 = 0.05;
const PERTURBATION_MAX: f64 = 0.20;

/// Probability of flipping a perturbation to the other side.
const PERTURBATION_FLIP: f64 = 0.2;

/// The shape the island roughly follows. Dispatch is on the tag; there is
/// no need for trait objects over three variants.
#[derive(Debug, Clone)]
pub enum BoundaryShape {
    Radial { center: Coord, radius: f64 },
    Polygon(Polygon),
    Union(Vec<BoundaryShape>),
}

impl BoundaryShape {
    pub fn contains(&self, point: Coord) -> bool {
        match self {
            BoundaryShape::Radial { center, radius } => {
                point.distance_to_sq(*center) <= radius * radius
            }
            BoundaryShape::Polygon(polygon) => polygon.contains(&point),
            BoundaryShape::Union(shapes) => shapes.iter().any(|shape| shape.contains(point)),
        }
    }
}

/// Derive an organic coastline polygon from a Voronoi diagram and a
/// boundary shape: cells whose centroid is inside the shape are land, the
/// edges shared between land and sea cells are the coast, and the ordered
/// coast is roughened with perpendicular noise.
pub fn coastline(
    voronoi: &Voronoi,
    shape: &BoundaryShape,
    rng: &mut StdRng,
) -> eyre::Result<Polygon> {
    let mut land_edges: Vec<(Coord, Coord)> = Vec::new();
    let mut sea_edges: Vec<(Coord, Coord)> = Vec::new();
    for polygon in voronoi.polygons() {
        let edges = polygon_edges(polygon);
        if shape.contains(vertex_centroid(polygon)) {
            land_edges.extend(edges);
        } else {
            sea_edges.extend(edges);
        }
    }
    tracing::debug!(
        "Classified {} land and {} sea edges",
        land_edges.len(),
        sea_edges.len()
    );

    let coast: Vec<(Coord, Coord)> = land_edges
        .into_iter()
        .filter(|land| sea_edges.iter().any(|sea| edges_match(land, sea)))
        .collect();
    ensure!(
        coast.len() >= 3,
        "boundary shape produced no coastline ({} edges)",
        coast.len()
    );

    let ordered = order_coastline(&coast);
    ensure!(ordered.len() >= 3, "coastline failed to close into a ring");

    let refined = refine_coastline(&ordered, rng);
    ensure!(refined.len() >= 3, "refined coastline is degenerate");
    Ok(Polygon::new(LineString::new(refined), vec![]))
}

fn polygon_edges(polygon: &Polygon) -> Vec<(Coord, Coord)> {
    let ring = ring_coords(polygon);
    (0..ring.len())
        .map(|i| (ring[i], ring[(i + 1) % ring.len()]))
        .collect()
}

fn edges_match(a: &(Coord, Coord), b: &(Coord, Coord)) -> bool {
    (a.0.approx_eq(b.0, COASTLINE_MATCH_TOLERANCE) && a.1.approx_eq(b.1, COASTLINE_MATCH_TOLERANCE))
        || (a.0.approx_eq(b.1, COASTLINE_MATCH_TOLERANCE)
            && a.1.approx_eq(b.0, COASTLINE_MATCH_TOLERANCE))
}

/// Angle of `direction` measured counter-clockwise from `reference`, in
/// [0, 2π).
fn directional_angle(direction: Coord, reference: Coord) -> f64 {
    let mut angle = reference.angle_to(direction);
    if angle < 0.0 {
        angle += TAU;
    }
    angle
}

/// Order an unordered bag of coastline edges into a ring.
///
/// Starts at the lexicographically smallest vertex heading (0, 1) and
/// greedily follows the edge with the smallest turn. When no unused edge
/// shares the current vertex (the Voronoi coast can be slightly gappy), a
/// bridging hop is synthesized toward the endpoint minimizing
/// turn + distance penalty.
fn order_coastline(edges: &[(Coord, Coord)]) -> Vec<Coord> {
    let max_edge_length = edges
        .iter()
        .map(|(a, b)| a.distance_to(*b))
        .fold(0.0, f64::max);
    let start = edges
        .iter()
        .flat_map(|(a, b)| [*a, *b])
        .min_by(|a, b| lex_cmp(*a, *b))
        .expect("at least one coastline edge");

    let mut used = vec![false; edges.len()];
    let mut path = vec![start];
    let mut current = start;
    let mut previous_direction = Coord { x: 0.0, y: 1.0 };

    // Bridging hops don't consume an edge, so bound the walk defensively.
    let max_iterations = edges.len() * 2 + 8;
    for _ in 0..max_iterations {
        if used.iter().all(|&u| u) {
            break;
        }

        let mut best: Option<(f64, usize, Coord)> = None;
        for (i, edge) in edges.iter().enumerate() {
            if used[i] {
                continue;
            }
            let next = if edge.0.approx_eq(current, COASTLINE_MATCH_TOLERANCE) {
                edge.1
            } else if edge.1.approx_eq(current, COASTLINE_MATCH_TOLERANCE) {
                edge.0
            } else {
                continue;
            };
            let angle = directional_angle(next - current, previous_direction);
            if best.is_none_or(|(a, _, _)| angle < a) {
                best = Some((angle, i, next));
            }
        }

        let next = match best {
            Some((_, i, next)) => {
                used[i] = true;
                next
            }
            None => {
                // Bridge toward the most continuation-like unused endpoint.
                let mut bridge: Option<(f64, Coord)> = None;
                for (i, edge) in edges.iter().enumerate() {
                    if used[i] {
                        continue;
                    }
                    for endpoint in [edge.0, edge.1] {
                        let hop = endpoint - current;
                        let distance = hop.magnitude();
                        if distance == 0.0 {
                            continue;
                        }
                        let score = directional_angle(hop, previous_direction)
                            + distance / max_edge_length * TAU;
                        if bridge.is_none_or(|(s, _)| score < s) {
                            bridge = Some((score, endpoint));
                        }
                    }
                }
                match bridge {
                    Some((_, endpoint)) => endpoint,
                    None => break,
                }
            }
        };

        let hop = next - current;
        if hop.magnitude_sq() > 0.0 {
            previous_direction = hop;
        }
        path.push(next);
        current = next;
        if current.approx_eq(start, COASTLINE_MATCH_TOLERANCE) {
            break;
        }
    }

    // Drop an exact-ish closing duplicate; Polygon::new closes the ring.
    if path.len() > 1
        && path[path.len() - 1].approx_eq(path[0], COASTLINE_MATCH_TOLERANCE)
    {
        path.pop();
    }
    path
}

/// Subdivide long coastline edges and roughen the new vertices with random
/// perpendicular offsets, flipping sides occasionally so the coast doesn't
/// bulge in one direction only.
fn refine_coastline(ring: &[Coord], rng: &mut StdRng) -> Vec<Coord> {
    let edge = |i: usize| -> (Coord, Coord) { (ring[i], ring[(i + 1) % ring.len()]) };
    let lengths: Vec<f64> = (0..ring.len())
        .map(|i| {
            let (a, b) = edge(i);
            a.distance_to(b)
        })
        .collect();
    let average = lengths.iter().sum::<f64>() / lengths.len() as f64;
    let longest = lengths.iter().copied().fold(0.0, f64::max);
    let threshold_sq = (average * REFINE_LENGTH_FACTOR).powi(2);

    let mut refined = Vec::with_capacity(ring.len() * 2);
    for i in 0..ring.len() {
        let (from, to) = edge(i);
        refined.push(from);

        let length_sq = lengths[i] * lengths[i];
        if length_sq <= threshold_sq {
            continue;
        }
        let divisions = (length_sq / threshold_sq).ceil() as usize;
        let perpendicular = (to - from).normalized().perpendicular_cw();
        for step in 1..divisions {
            let t = step as f64 / divisions as f64;
            let magnitude = rng.random_range(PERTURBATION_MIN..PERTURBATION_MAX) * longest;
            let side = if rng.random::<f64>() < PERTURBATION_FLIP {
                -1.0
            } else {
                1.0
            };
            let point = from + (to - from) * t + perpendicular * (magnitude * side);
            refined.push(point);
        }
    }
    refined
}
