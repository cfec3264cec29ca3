use std::collections::HashMap;
use std::f64::consts::TAU;

use geo::{Coord, LineString, Polygon};
use kdtree::KdTree;
use kdtree::distance::squared_euclidean;
use petgraph::Undirected;
use petgraph::graph::NodeIndex;

use crate::geom::{coords_centroid, CoordExt};

/// Streamline coordinates snap to this grid before intersection detection.
pub const GRID_RESOLUTION: f64 = 0.75;
const HALF_GRID_RESOLUTION: f64 = GRID_RESOLUTION / 2.0;

/// Two nodes closer than this are the same node.
const NODE_TOLERANCE: f64 = 0.01;

/// Two face centroids closer than this are the same face.
const CENTROID_TOLERANCE: f64 = 0.01;

pub type NodeId = NodeIndex<usize>;

/// Node weights are snapped positions; edge weights the polyline path
/// connecting the two endpoint nodes. Node indices are assigned in insertion
/// order, which makes them the stable integer IDs consumers key on.
pub type PlanarGraph = petgraph::Graph<Coord, Vec<Coord>, Undirected, usize>;

type GridKey = (i64, i64);

fn grid_key(point: Coord) -> GridKey {
    (
        (point.x / GRID_RESOLUTION).floor() as i64,
        (point.y / GRID_RESOLUTION).floor() as i64,
    )
}

fn snap_to_grid(point: Coord) -> Coord {
    Coord {
        x: (point.x / GRID_RESOLUTION).floor() * GRID_RESOLUTION,
        y: (point.y / GRID_RESOLUTION).floor() * GRID_RESOLUTION,
    }
}

/// A snapped sample along a streamline, remembering which source segment
/// produced it so intersections can be folded back into the polyline.
#[derive(Debug, Clone, Copy)]
struct GridSample {
    key: GridKey,
    position: Coord,
    segment: usize,
}

/// Planar graph extracted from a set of streamlines.
///
/// Streamlines are resampled onto a coarse grid; grid cells visited by two
/// or more distinct streamlines become nodes, and the grid points between
/// consecutive nodes along a streamline become the connecting edge paths.
pub struct RoadGraph {
    pub graph: PlanarGraph,
    index: KdTree<f64, NodeId, [f64; 2]>,
    samples_per_streamline: Vec<Vec<GridSample>>,
    nodes_by_key: HashMap<GridKey, NodeId>,
    closed_loops: Vec<Vec<NodeId>>,
}

impl Default for RoadGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl RoadGraph {
    pub fn new() -> Self {
        Self {
            graph: PlanarGraph::default(),
            index: KdTree::new(2),
            samples_per_streamline: Vec::new(),
            nodes_by_key: HashMap::new(),
            closed_loops: Vec::new(),
        }
    }

    /// Build a graph from bare segments, merging endpoints within the node
    /// tolerance but without snapping to the coarse grid (the Voronoi stage
    /// needs exact cell corners).
    pub fn from_segments(segments: impl IntoIterator<Item = (Coord, Coord)>) -> Self {
        let mut graph = Self::new();
        for (start, end) in segments {
            graph.add_segment(start, end);
        }
        graph
    }

    /// Add a single edge between the nodes at `start` and `end`, creating
    /// them if no node exists within tolerance.
    pub fn add_segment(&mut self, start: Coord, end: Coord) {
        let from = self.node_at(start);
        let to = self.node_at(end);
        if from == to {
            return;
        }
        let path = vec![self.graph[from], self.graph[to]];
        self.graph.update_edge(from, to, path);
    }

    pub fn node_position(&self, node: NodeId) -> Coord {
        self.graph[node]
    }

    pub fn closed_loops(&self) -> &[Vec<NodeId>] {
        &self.closed_loops
    }

    /// Resample the streamlines onto the snap grid, create nodes for cells
    /// visited by at least two streamlines, and connect consecutive nodes
    /// along each streamline with their grid-point paths.
    pub fn add_streamlines(&mut self, streamlines: &[LineString]) {
        // Which streamlines visit each grid cell, in first-visit order so
        // node IDs don't depend on hash iteration.
        let mut visit_order: Vec<GridKey> = Vec::new();
        let mut visitors: HashMap<GridKey, Vec<usize>> = HashMap::new();

        let base = self.samples_per_streamline.len();
        for (offset, streamline) in streamlines.iter().enumerate() {
            let samples = sample_streamline(streamline);
            for sample in &samples {
                let entry = visitors.entry(sample.key).or_insert_with(|| {
                    visit_order.push(sample.key);
                    Vec::new()
                });
                if !entry.contains(&(base + offset)) {
                    entry.push(base + offset);
                }
            }
            self.samples_per_streamline.push(samples);
        }

        for key in &visit_order {
            if visitors[key].len() < 2 {
                continue;
            }
            self.node_at(snap_to_grid(Coord {
                x: key.0 as f64 * GRID_RESOLUTION,
                y: key.1 as f64 * GRID_RESOLUTION,
            }));
        }

        // Edges between consecutive node hits along each streamline. The
        // path is the inclusive run of grid points between the two nodes.
        for samples in &self.samples_per_streamline[base..] {
            let node_hits: Vec<(usize, NodeId)> = samples
                .iter()
                .enumerate()
                .filter_map(|(i, sample)| self.nodes_by_key.get(&sample.key).map(|&n| (i, n)))
                .collect();
            for pair in node_hits.windows(2) {
                let (from_index, from) = pair[0];
                let (to_index, to) = pair[1];
                if from == to {
                    // A streamline wobbling inside one cell; a node is never
                    // its own neighbour.
                    continue;
                }
                let path: Vec<Coord> = samples[from_index..=to_index]
                    .iter()
                    .map(|sample| sample.position)
                    .collect();
                self.graph.update_edge(from, to, path);
            }
        }
    }

    /// Fold the discovered junctions back into the source streamlines:
    /// every node cell hit along a segment gets the node position inserted
    /// at the segment's source index, shifted by prior insertions.
    pub fn modify_streamlines(&mut self, streamlines: &mut [LineString]) {
        assert_eq!(streamlines.len(), self.samples_per_streamline.len());
        for (streamline, samples) in streamlines.iter_mut().zip(&self.samples_per_streamline) {
            let mut shift = 0usize;
            for sample in samples {
                if !self.nodes_by_key.contains_key(&sample.key) {
                    continue;
                }
                let position = sample.position;
                let at = (sample.segment + shift).min(streamline.0.len());
                if streamline.0.get(at) == Some(&position)
                    || (at > 0 && streamline.0.get(at - 1) == Some(&position))
                {
                    continue;
                }
                streamline.0.insert(at, position);
                shift += 1;
            }
        }
    }

    /// Enumerate minimal enclosed faces with a rightmost-turn walk,
    /// deduplicating rotations and reflections of the same face by centroid.
    pub fn find_closed_loops(&mut self, max_size: usize) -> &[Vec<NodeId>] {
        let mut centroids: Vec<Coord> = Vec::new();
        let mut loops: Vec<Vec<NodeId>> = Vec::new();

        for start_node in self.graph.node_indices() {
            let first_hops: Vec<NodeId> = self.graph.neighbors(start_node).collect();
            for first_hop in first_hops {
                if let Some(found) = self.walk_face(start_node, first_hop, max_size) {
                    let positions: Vec<Coord> =
                        found.iter().map(|&n| self.graph[n]).collect();
                    let centroid = coords_centroid(&positions);
                    let fresh = !centroids
                        .iter()
                        .any(|&c| c.approx_eq(centroid, CENTROID_TOLERANCE));
                    if fresh {
                        centroids.push(centroid);
                        loops.push(found);
                    }
                }
            }
        }

        tracing::debug!("Found {} closed loops", loops.len());
        self.closed_loops = loops;
        &self.closed_loops
    }

    fn walk_face(&self, base: NodeId, first: NodeId, max_size: usize) -> Option<Vec<NodeId>> {
        let mut base_direction = self.graph[first] - self.graph[base];
        let mut visited = vec![base];
        let mut loop_nodes = vec![base];
        let mut current = first;

        loop {
            visited.push(current);
            loop_nodes.push(current);
            if loop_nodes.len() >= max_size {
                return None;
            }

            let neighbours: Vec<NodeId> = self.graph.neighbors(current).collect();
            if loop_nodes.len() > 3 && neighbours.contains(&base) {
                return Some(loop_nodes);
            }

            // Rightmost turn: the not-yet-visited neighbour with the largest
            // turn angle relative to the previous hop.
            let mut best: Option<(f64, NodeId)> = None;
            for &next in &neighbours {
                if visited.contains(&next) {
                    continue;
                }
                let mut angle = base_direction.angle_to(self.graph[next] - self.graph[current]);
                if angle <= 0.0 {
                    angle += TAU;
                }
                if angle >= TAU {
                    continue; // straight ahead is not a turn
                }
                if best.is_none_or(|(best_angle, _)| angle > best_angle) {
                    best = Some((angle, next));
                }
            }
            let (_, next) = best?;
            base_direction = self.graph[next] - self.graph[current];
            current = next;
        }
    }

    /// The face polygon of a closed loop: the concatenation of the
    /// connecting edge paths, each oriented along the traversal.
    pub fn loop_polygon(&self, loop_nodes: &[NodeId]) -> Polygon {
        let mut ring: Vec<Coord> = Vec::new();
        for i in 0..loop_nodes.len() {
            let from = loop_nodes[i];
            let to = loop_nodes[(i + 1) % loop_nodes.len()];
            let Some(edge) = self.graph.find_edge(from, to) else {
                continue;
            };
            let path = &self.graph[edge];
            let from_position = self.graph[from];
            let oriented: Vec<Coord> = if path
                .first()
                .is_some_and(|&p| p.approx_eq(from_position, NODE_TOLERANCE))
            {
                path.clone()
            } else {
                path.iter().rev().copied().collect()
            };
            for point in oriented {
                if ring.last() != Some(&point) {
                    ring.push(point);
                }
            }
        }
        Polygon::new(LineString::new(ring), vec![])
    }

    /// Find or create the node for a snapped position, reusing any existing
    /// node within tolerance rather than comparing floats for equality.
    fn node_at(&mut self, position: Coord) -> NodeId {
        let nearby = self
            .index
            .within(
                &[position.x, position.y],
                NODE_TOLERANCE * NODE_TOLERANCE,
                &squared_euclidean,
            )
            .expect("coordinates are finite");
        if let Some((_, &existing)) = nearby.first() {
            self.nodes_by_key.insert(grid_key(position), existing);
            return existing;
        }
        let node = self.graph.add_node(position);
        self.index
            .add([position.x, position.y], node)
            .expect("coordinates are finite");
        self.nodes_by_key.insert(grid_key(position), node);
        node
    }
}

/// Resample a streamline every half grid cell, snapping to the grid and
/// dropping consecutive duplicates. The first and last segments extend one
/// half-step past their ends so junctions just beyond an endpoint register.
fn sample_streamline(streamline: &LineString) -> Vec<GridSample> {
    let points = &streamline.0;
    let mut samples: Vec<GridSample> = Vec::new();
    let mut last_key: Option<GridKey> = None;

    for segment in 1..points.len() {
        let from = points[segment - 1];
        let to = points[segment];
        let length = from.distance_to(to);
        if length == 0.0 {
            continue;
        }
        let direction = (to - from) / length;
        let steps = (length / HALF_GRID_RESOLUTION).floor() as i64;

        let first_step = if segment == 1 { -1 } else { 0 };
        let last_step = if segment == points.len() - 1 {
            steps + 1
        } else {
            steps
        };
        for step in first_step..=last_step {
            let sample = from + direction * (step as f64 * HALF_GRID_RESOLUTION);
            let key = grid_key(sample);
            if last_key == Some(key) {
                continue;
            }
            last_key = Some(key);
            samples.push(GridSample {
                key,
                position: snap_to_grid(sample),
                segment,
            });
        }
    }
    samples
}

#[cfg(test)]
mod tests {
    use float_cmp::assert_approx_eq;
    use geo::Area;

    use super::*;

    fn line(coords: &[(f64, f64)]) -> LineString {
        LineString::new(coords.iter().map(|&(x, y)| Coord { x, y }).collect())
    }

    #[test]
    fn test_crossing_streamlines_create_a_node() {
        let mut graph = RoadGraph::new();
        graph.add_streamlines(&[
            line(&[(-10.0, 0.0), (10.0, 0.0)]),
            line(&[(0.0, -10.0), (0.0, 10.0)]),
        ]);
        assert_eq!(graph.graph.node_count(), 1);
        let node = graph.graph.node_indices().next().unwrap();
        assert!(graph.node_position(node).approx_eq(
            Coord { x: 0.0, y: 0.0 },
            GRID_RESOLUTION
        ));
    }

    #[test]
    fn test_neighbour_relation_is_symmetric() {
        let mut graph = RoadGraph::new();
        graph.add_streamlines(&[
            line(&[(0.0, 0.0), (20.0, 0.0)]),
            line(&[(5.0, -10.0), (5.0, 10.0)]),
            line(&[(15.0, -10.0), (15.0, 10.0)]),
        ]);
        assert_eq!(graph.graph.node_count(), 2);
        let nodes: Vec<NodeId> = graph.graph.node_indices().collect();
        let (a, b) = (nodes[0], nodes[1]);
        assert!(graph.graph.neighbors(a).any(|n| n == b));
        assert!(graph.graph.neighbors(b).any(|n| n == a));
        // The connecting path runs between the two node positions
        let edge = graph.graph.find_edge(a, b).unwrap();
        let path = &graph.graph[edge];
        assert!(path.len() >= 2);
        let ends = [path[0], path[path.len() - 1]];
        assert!(ends.iter().any(|e| e.approx_eq(graph.graph[a], 1e-9)));
        assert!(ends.iter().any(|e| e.approx_eq(graph.graph[b], 1e-9)));
    }

    #[test]
    fn test_three_half_lines_make_no_loop() {
        let mut graph = RoadGraph::new();
        graph.add_streamlines(&[
            line(&[(0.0, 0.0), (10.0, 0.0), (10.0, 10.0)]),
            line(&[(5.0, -5.0), (5.0, 15.0)]),
        ]);
        graph.find_closed_loops(20);
        assert!(graph.closed_loops().is_empty());
    }

    #[test]
    fn test_closed_square_yields_a_face() {
        let mut graph = RoadGraph::new();
        graph.add_streamlines(&[
            line(&[(0.0, 0.0), (10.0, 0.0), (10.0, 10.0)]),
            line(&[(5.0, -5.0), (5.0, 15.0)]),
            line(&[(0.0, 0.0), (0.0, 10.0), (10.0, 10.0)]),
        ]);
        graph.find_closed_loops(20);

        // Rotations of the same face walked from different start nodes
        // dedup down to a single loop by centroid.
        assert_eq!(graph.closed_loops().len(), 1);
        let loop_nodes = graph.closed_loops()[0].clone();
        assert!(loop_nodes.len() >= 3);

        // The ring polygon is the snapped square outline.
        let polygon = graph.loop_polygon(&loop_nodes);
        let snapped_side = (10.0 / GRID_RESOLUTION).floor() * GRID_RESOLUTION;
        assert_approx_eq!(
            f64,
            polygon.unsigned_area(),
            snapped_side * snapped_side,
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_modify_streamlines_inserts_junctions() {
        let mut streamlines = vec![
            line(&[(-10.0, 0.0), (10.0, 0.0)]),
            line(&[(0.0, -10.0), (0.0, 10.0)]),
        ];
        let mut graph = RoadGraph::new();
        graph.add_streamlines(&streamlines);
        let before = streamlines[0].0.len();
        graph.modify_streamlines(&mut streamlines);
        assert!(streamlines[0].0.len() > before);
        // The junction point itself is now part of the polyline
        let node = graph.graph.node_indices().next().unwrap();
        let junction = graph.node_position(node);
        assert!(streamlines[0].0.contains(&junction));
        assert!(streamlines[1].0.contains(&junction));
    }

    #[test]
    fn test_node_ids_are_insertion_ordered() {
        let mut graph = RoadGraph::new();
        graph.add_streamlines(&[
            line(&[(0.0, 0.0), (20.0, 0.0)]),
            line(&[(5.0, -10.0), (5.0, 10.0)]),
            line(&[(15.0, -10.0), (15.0, 10.0)]),
        ]);
        let ids: Vec<usize> = graph.graph.node_indices().map(|n| n.index()).collect();
        assert_eq!(ids, vec![0, 1]);
    }
}
