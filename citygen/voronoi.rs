use std::collections::HashSet;

use eyre::{bail, ensure};
use geo::{Contains, Coord, Point, Polygon};
use rand::Rng;
use rand::rngs::StdRng;

use crate::geom::{lex_cmp, vertex_centroid, CoordExt};
use crate::graph::RoadGraph;

/// Tolerance for classifying a point against a perpendicular bisector.
const POSITION_TOLERANCE: f64 = 0.001;

/// Endpoint snap resolution used to deduplicate the global edge set.
const EDGE_RESOLUTION: f64 = 0.01;

/// Sentinel sites sit at ±2.5× the diagram half-extents.
const SENTINEL_DISTANCE: f64 = 2.5;

/// Cap on the node count of a single cell loop during polygon extraction.
const MAX_CELL_LOOP: usize = 64;

#[derive(Debug, Clone, Copy)]
struct Edge {
    start: Coord,
    end: Coord,
}

impl Edge {
    fn new(start: Coord, end: Coord) -> Self {
        Self { start, end }
    }
}

#[derive(Debug, Clone)]
struct Cell {
    site: Coord,
    edges: Vec<Edge>,
    sentinel: bool,
}

/// A perpendicular bisector between two sites, as a point on the line and
/// the normal pointing toward the newly inserted site.
struct Bisector {
    midpoint: Coord,
    normal: Coord,
}

/// Which side of a bisector a point falls on. Points within tolerance of
/// the line count as the far side, so grazing edges survive intact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    /// Same side as the inserted site; cell area lost to it.
    Near,
    Far,
}

impl Bisector {
    fn between(site: Coord, other: Coord) -> Self {
        Self {
            midpoint: (site + other) / 2.0,
            normal: site - other,
        }
    }

    fn side(&self, point: Coord) -> Side {
        let distance = (point - self.midpoint).dot(self.normal);
        if distance > POSITION_TOLERANCE {
            Side::Near
        } else {
            Side::Far
        }
    }

    fn intersect(&self, edge: &Edge) -> eyre::Result<Coord> {
        let direction = self.normal.perpendicular_cw();
        let span = edge.end - edge.start;
        let denominator = direction.cross(span);
        if denominator.abs() < 1e-12 {
            bail!("degenerate intersection between bisector and cell edge");
        }
        let t = (edge.start - self.midpoint).cross(span) / denominator;
        Ok(self.midpoint + direction * t)
    }
}

/// Approximate Voronoi diagram built by incremental half-plane clipping.
///
/// Every new site's perpendicular bisector against each existing cell either
/// misses the cell (zero crossing points) or cuts it in exactly two; any
/// other count means the construction has gone numerically inconsistent and
/// the whole diagram is abandoned (callers retry with a fresh seed).
pub struct Voronoi {
    sites: Vec<Coord>,
    cells: Vec<Cell>,
    edges: Vec<Edge>,
    polygons: Vec<Polygon>,
    center: Coord,
    half_extents: Coord,
}

impl Voronoi {
    pub fn new(sites: Vec<Coord>) -> eyre::Result<Self> {
        ensure!(sites.len() >= 2, "a Voronoi diagram needs at least 2 sites");
        let mut min = sites[0];
        let mut max = sites[0];
        for site in &sites[1..] {
            min.x = min.x.min(site.x);
            min.y = min.y.min(site.y);
            max.x = max.x.max(site.x);
            max.y = max.y.max(site.y);
        }
        let center = (min + max) / 2.0;
        let half_extents = (max - min) * 0.51;
        Self::with_bounds(sites, center, half_extents)
    }

    /// Construct with explicit bounds; [Voronoi::refine] keeps the parent
    /// diagram's bounds so relaxation doesn't shrink the domain.
    pub fn with_bounds(sites: Vec<Coord>, center: Coord, half_extents: Coord) -> eyre::Result<Self> {
        ensure!(sites.len() >= 2, "a Voronoi diagram needs at least 2 sites");
        ensure!(
            half_extents.x > 0.0 && half_extents.y > 0.0,
            "Voronoi sites are collinear"
        );
        for (i, a) in sites.iter().enumerate() {
            for b in &sites[i + 1..] {
                ensure!(
                    !a.approx_eq(*b, POSITION_TOLERANCE),
                    "duplicate Voronoi sites at ({}, {})",
                    a.x,
                    a.y
                );
            }
        }

        let mut voronoi = Self {
            sites,
            cells: Vec::new(),
            edges: Vec::new(),
            polygons: Vec::new(),
            center,
            half_extents,
        };
        voronoi.insert_sentinels();
        for i in 0..voronoi.sites.len() {
            let site = voronoi.sites[i];
            voronoi.insert_cell(site)?;
        }
        voronoi.clip_borders()?;
        voronoi.build_polygons();
        Ok(voronoi)
    }

    pub fn polygons(&self) -> &[Polygon] {
        &self.polygons
    }

    pub fn sites(&self) -> &[Coord] {
        &self.sites
    }

    /// One Lloyd relaxation step: a fresh diagram over the centroids of the
    /// current polygons, within the same bounds.
    pub fn refine(&self) -> eyre::Result<Voronoi> {
        let centroids: Vec<Coord> = self.polygons.iter().map(vertex_centroid).collect();
        Voronoi::with_bounds(centroids, self.center, self.half_extents)
    }

    /// Four big rectangular cells pinwheeled around the border rectangle so
    /// every real cell's bisectors have something to cut against. Whatever
    /// inconsistency the sentinels have among themselves lies outside the
    /// border and is discarded by [Voronoi::clip_borders].
    fn insert_sentinels(&mut self) {
        let c = self.center;
        let h = self.half_extents;
        let low = c - h;
        let high = c + h;
        let reach = 4.0 * h.x.max(h.y);

        let rectangles = [
            // west
            (
                Coord { x: c.x - SENTINEL_DISTANCE * h.x, y: c.y },
                Coord { x: low.x - reach, y: low.y - reach },
                Coord { x: low.x, y: high.y },
            ),
            // north
            (
                Coord { x: c.x, y: c.y + SENTINEL_DISTANCE * h.y },
                Coord { x: low.x - reach, y: high.y },
                Coord { x: high.x, y: high.y + reach },
            ),
            // east
            (
                Coord { x: c.x + SENTINEL_DISTANCE * h.x, y: c.y },
                Coord { x: high.x, y: low.y },
                Coord { x: high.x + reach, y: high.y + reach },
            ),
            // south
            (
                Coord { x: c.x, y: c.y - SENTINEL_DISTANCE * h.y },
                Coord { x: low.x, y: low.y - reach },
                Coord { x: high.x + reach, y: low.y },
            ),
        ];

        for (site, low, high) in rectangles {
            let corners = [
                Coord { x: low.x, y: low.y },
                Coord { x: high.x, y: low.y },
                Coord { x: high.x, y: high.y },
                Coord { x: low.x, y: high.y },
            ];
            let edges = (0..4)
                .map(|i| Edge::new(corners[i], corners[(i + 1) % 4]))
                .collect();
            self.cells.push(Cell {
                site,
                edges,
                sentinel: true,
            });
        }
    }

    /// Clip every existing cell against the new site's bisector and collect
    /// the bisector segments bounding the new cell.
    fn insert_cell(&mut self, site: Coord) -> eyre::Result<()> {
        let mut new_cell_edges: Vec<Edge> = Vec::new();

        for cell in &mut self.cells {
            let bisector = Bisector::between(site, cell.site);

            let mut critical: Vec<Coord> = Vec::new();
            let mut kept: Vec<Edge> = Vec::with_capacity(cell.edges.len());
            for edge in &cell.edges {
                let start_side = bisector.side(edge.start);
                let end_side = bisector.side(edge.end);
                match (start_side, end_side) {
                    (Side::Near, Side::Near) => {} // absorbed by the new cell
                    (Side::Far, Side::Far) => kept.push(*edge),
                    _ => {
                        let crossing = bisector.intersect(edge)?;
                        if !critical
                            .iter()
                            .any(|c| c.approx_eq(crossing, POSITION_TOLERANCE))
                        {
                            critical.push(crossing);
                        }
                        // keep the half on the old site's side
                        if start_side == Side::Far {
                            kept.push(Edge::new(edge.start, crossing));
                        } else {
                            kept.push(Edge::new(crossing, edge.end));
                        }
                    }
                }
            }

            match critical.len() {
                0 => {
                    cell.edges = kept;
                }
                2 => {
                    ensure!(
                        !critical[0].approx_eq(critical[1], POSITION_TOLERANCE),
                        "self-loop edge between coincident critical points"
                    );
                    let shared = Edge::new(critical[0], critical[1]);
                    kept.push(shared);
                    cell.edges = kept;
                    new_cell_edges.push(shared);
                }
                n => bail!("critical point count {n} outside {{0, 2}}"),
            }
        }

        self.cells.push(Cell {
            site,
            edges: new_cell_edges,
            sentinel: false,
        });
        Ok(())
    }

    /// Clip all real cells to the border rectangle and lay border-hugging
    /// edge chains along each side, then rebuild the deduplicated edge set.
    fn clip_borders(&mut self) -> eyre::Result<()> {
        self.cells.retain(|cell| !cell.sentinel);

        let low = self.center - self.half_extents;
        let high = self.center + self.half_extents;
        // (corner a, corner b, inward normal)
        let borders = [
            (low, Coord { x: high.x, y: low.y }, Coord { x: 0.0, y: 1.0 }),
            (Coord { x: high.x, y: low.y }, high, Coord { x: -1.0, y: 0.0 }),
            (high, Coord { x: low.x, y: high.y }, Coord { x: 0.0, y: -1.0 }),
            (Coord { x: low.x, y: high.y }, low, Coord { x: 1.0, y: 0.0 }),
        ];

        let mut chains: Vec<Edge> = Vec::new();
        for (from, to, inward) in borders {
            let mut criticals = vec![from, to];
            let side_length = from.distance_to(to);
            let direction = (to - from).normalized();
            let line = Bisector {
                midpoint: from,
                // Side::Near is the outside, matching insert_cell semantics.
                normal: inward * -1.0,
            };
            for cell in &mut self.cells {
                let mut kept = Vec::with_capacity(cell.edges.len());
                for edge in &cell.edges {
                    match (line.side(edge.start), line.side(edge.end)) {
                        (Side::Near, Side::Near) => {}
                        (Side::Far, Side::Far) => kept.push(*edge),
                        (start_side, _) => {
                            let crossing = line.intersect(edge)?;
                            // A crossing on this side's infinite line can
                            // fall past the rectangle corner; only in-range
                            // crossings join the chain.
                            let along = (crossing - from).dot(direction);
                            if (-POSITION_TOLERANCE..=side_length + POSITION_TOLERANCE)
                                .contains(&along)
                            {
                                criticals.push(crossing);
                            }
                            if start_side == Side::Far {
                                kept.push(Edge::new(edge.start, crossing));
                            } else {
                                kept.push(Edge::new(crossing, edge.end));
                            }
                        }
                    }
                }
                cell.edges = kept;
            }

            // Sorted criticals along the side become the border chain.
            criticals.sort_by(|a, b| {
                let ta = (*a - from).dot(direction);
                let tb = (*b - from).dot(direction);
                ta.partial_cmp(&tb).unwrap_or(std::cmp::Ordering::Equal)
            });
            criticals.dedup_by(|a, b| a.approx_eq(*b, EDGE_RESOLUTION));
            for pair in criticals.windows(2) {
                chains.push(Edge::new(pair[0], pair[1]));
            }
        }

        self.rebuild_edges(chains);
        Ok(())
    }

    fn rebuild_edges(&mut self, chains: Vec<Edge>) {
        let mut seen: HashSet<((i64, i64), (i64, i64))> = HashSet::new();
        self.edges.clear();

        let snap = |p: Coord| -> (i64, i64) {
            (
                (p.x / EDGE_RESOLUTION).round() as i64,
                (p.y / EDGE_RESOLUTION).round() as i64,
            )
        };
        let cell_edges: Vec<Edge> = self
            .cells
            .iter()
            .flat_map(|cell| cell.edges.iter().copied())
            .collect();
        for edge in cell_edges.into_iter().chain(chains) {
            if edge.start.approx_eq(edge.end, EDGE_RESOLUTION) {
                continue;
            }
            // Lexicographic smaller endpoint first, so both orientations of
            // a shared edge collapse to one key.
            let (start, end) = match lex_cmp(edge.start, edge.end) {
                std::cmp::Ordering::Greater => (edge.end, edge.start),
                _ => (edge.start, edge.end),
            };
            if seen.insert((snap(start), snap(end))) {
                self.edges.push(Edge::new(start, end));
            }
        }
    }

    /// Lift the edge set to a graph and keep the closed loops that actually
    /// enclose a generator site.
    fn build_polygons(&mut self) {
        let mut graph =
            RoadGraph::from_segments(self.edges.iter().map(|e| (e.start, e.end)));
        graph.find_closed_loops(MAX_CELL_LOOP);

        let mut polygons = Vec::new();
        for loop_nodes in graph.closed_loops().to_vec() {
            let polygon = graph.loop_polygon(&loop_nodes);
            if polygon.exterior().0.len() < 4 {
                tracing::warn!("Skipping a degenerate cell polygon");
                continue;
            }
            if self
                .sites
                .iter()
                .any(|site| polygon.contains(&Point::from(*site)))
            {
                polygons.push(polygon);
            }
        }
        if polygons.len() < self.sites.len() {
            tracing::warn!(
                "{} of {} cell polygons failed to close",
                self.sites.len() - polygons.len(),
                self.sites.len()
            );
        }
        self.polygons = polygons;
    }
}

/// Uniform random points in the rectangle, at least `min_distance` apart,
/// checked by a linear scan. Rejections silently raise the attempt budget
/// until `n` points are accepted (with a hard cap against hopeless inputs).
pub fn generate_points(
    min: Coord,
    max: Coord,
    n: usize,
    min_distance: f64,
    rng: &mut StdRng,
) -> Vec<Coord> {
    let mut accepted: Vec<Coord> = Vec::with_capacity(n);
    let mut attempts = 0usize;
    let budget = n * 100;
    while accepted.len() < n && attempts < budget {
        attempts += 1;
        let candidate = Coord {
            x: rng.random_range(min.x..max.x),
            y: rng.random_range(min.y..max.y),
        };
        if accepted
            .iter()
            .all(|point| point.distance_to(candidate) >= min_distance)
        {
            accepted.push(candidate);
        }
    }
    if accepted.len() < n {
        tracing::warn!(
            "Accepted only {} of {n} points with min distance {min_distance}",
            accepted.len()
        );
    }
    accepted
}
