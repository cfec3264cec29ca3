use geo::{Coord, LineString};

use crate::geom::CoordExt;

/// Uniform grid of square cells used to enforce streamline separation.
///
/// Cell side equals the separation distance `dsep`, so a minimum-distance
/// check only ever has to look at the 3×3 neighbourhood around a point's
/// cell. Cells store the raw sample points pushed into them.
#[derive(Debug, Clone)]
pub struct GridIndex {
    origin: Coord,
    dsep: f64,
    cols: usize,
    rows: usize,
    cells: Vec<Vec<Coord>>,
}

impl GridIndex {
    pub fn new(origin: Coord, world_dimensions: Coord, dsep: f64) -> Self {
        assert!(dsep > 0.0, "cell size must be positive");
        let cols = (world_dimensions.x / dsep).ceil().max(1.0) as usize;
        let rows = (world_dimensions.y / dsep).ceil().max(1.0) as usize;
        Self {
            origin,
            dsep,
            cols,
            rows,
            cells: vec![Vec::new(); cols * rows],
        }
    }

    pub fn add_point(&mut self, point: Coord) {
        let cell = self.cell_index(point);
        self.cells[cell].push(point);
    }

    pub fn add_polyline(&mut self, line: &LineString) {
        for &point in &line.0 {
            self.add_point(point);
        }
    }

    /// Copy every sample from `other` into this grid. The two indices are
    /// independent afterwards.
    pub fn add_all(&mut self, other: &GridIndex) {
        for point in other.points() {
            self.add_point(point);
        }
    }

    pub fn points(&self) -> impl Iterator<Item = Coord> + '_ {
        self.cells.iter().flatten().copied()
    }

    /// True iff every stored sample in the 3×3 neighbourhood of `point`'s
    /// cell (other than `point` itself) is at squared distance at least
    /// `distance_sq`.
    pub fn is_valid_sample(&self, point: Coord, distance_sq: f64) -> bool {
        let (col, row) = self.cell_coords(point);
        for neighbour_row in row.saturating_sub(1)..=(row + 1).min(self.rows - 1) {
            for neighbour_col in col.saturating_sub(1)..=(col + 1).min(self.cols - 1) {
                for &sample in &self.cells[neighbour_row * self.cols + neighbour_col] {
                    if sample == point {
                        continue;
                    }
                    if sample.distance_to_sq(point) < distance_sq {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// All stored samples within `radius` of `point`.
    pub fn points_within(&self, point: Coord, radius: f64) -> Vec<Coord> {
        let reach = (radius / self.dsep).ceil() as usize;
        let (col, row) = self.cell_coords(point);
        let radius_sq = radius * radius;

        let mut found = Vec::new();
        for neighbour_row in row.saturating_sub(reach)..=(row + reach).min(self.rows - 1) {
            for neighbour_col in col.saturating_sub(reach)..=(col + reach).min(self.cols - 1) {
                for &sample in &self.cells[neighbour_row * self.cols + neighbour_col] {
                    if sample.distance_to_sq(point) <= radius_sq {
                        found.push(sample);
                    }
                }
            }
        }
        found
    }

    /// Cell coordinates of a world point, clamped into the grid so samples
    /// that drift slightly out of the world still land in a border cell.
    fn cell_coords(&self, point: Coord) -> (usize, usize) {
        let offset = point - self.origin;
        let col = (offset.x / self.dsep).floor().clamp(0.0, (self.cols - 1) as f64) as usize;
        let row = (offset.y / self.dsep).floor().clamp(0.0, (self.rows - 1) as f64) as usize;
        (col, row)
    }

    fn cell_index(&self, point: Coord) -> usize {
        let (col, row) = self.cell_coords(point);
        row * self.cols + col
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> GridIndex {
        GridIndex::new(
            Coord { x: 0.0, y: 0.0 },
            Coord { x: 100.0, y: 100.0 },
            10.0,
        )
    }

    #[test]
    fn test_empty_grid_validates_everything() {
        let index = grid();
        assert!(index.is_valid_sample(Coord { x: 50.0, y: 50.0 }, 100.0));
    }

    #[test]
    fn test_nearby_sample_invalidates() {
        let mut index = grid();
        index.add_point(Coord { x: 50.0, y: 50.0 });
        assert!(!index.is_valid_sample(Coord { x: 53.0, y: 50.0 }, 25.0));
        assert!(index.is_valid_sample(Coord { x: 56.0, y: 50.0 }, 25.0));
    }

    #[test]
    fn test_validation_sees_across_cell_borders() {
        let mut index = grid();
        // Just inside cell (0, 0); the query lands in cell (1, 0).
        index.add_point(Coord { x: 9.9, y: 5.0 });
        assert!(!index.is_valid_sample(Coord { x: 10.1, y: 5.0 }, 1.0));
    }

    #[test]
    fn test_sample_does_not_invalidate_itself() {
        let mut index = grid();
        let point = Coord { x: 42.0, y: 42.0 };
        index.add_point(point);
        assert!(index.is_valid_sample(point, 100.0));
    }

    #[test]
    fn test_points_within_radius() {
        let mut index = grid();
        index.add_point(Coord { x: 50.0, y: 50.0 });
        index.add_point(Coord { x: 70.0, y: 50.0 });
        index.add_point(Coord { x: 50.0, y: 95.0 });

        let near = index.points_within(Coord { x: 51.0, y: 51.0 }, 25.0);
        assert_eq!(near.len(), 2);
    }

    #[test]
    fn test_out_of_bounds_points_clamp_to_border_cells() {
        let mut index = grid();
        index.add_point(Coord { x: -5.0, y: 105.0 });
        assert!(!index.is_valid_sample(Coord { x: 0.5, y: 99.5 }, 1000.0));
    }

    #[test]
    fn test_add_all_copies_samples() {
        let mut a = grid();
        a.add_point(Coord { x: 10.0, y: 10.0 });
        let mut b = GridIndex::new(
            Coord { x: 0.0, y: 0.0 },
            Coord { x: 100.0, y: 100.0 },
            25.0,
        );
        b.add_all(&a);
        assert_eq!(b.points().count(), 1);
        // Independent after the copy
        a.add_point(Coord { x: 20.0, y: 20.0 });
        assert_eq!(b.points().count(), 1);
    }
}
