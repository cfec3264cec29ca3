use geo::Coord;

use crate::field::TensorField;
use crate::geom::{self, CoordExt};

/// Squared eigenvector magnitude below which the field is considered
/// degenerate (water, or cancelling basis fields).
pub const DEGENERATE_EIGENVECTOR_SQ: f64 = 0.01;

/// Step operators over the tensor field. Euler takes one sample per step;
/// RK4 takes three and weights them 1:4:1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldIntegrator {
    Euler,
    Rk4,
}

impl FieldIntegrator {
    /// The step vector at `point`, of length ≈ `dstep`, following the major
    /// or minor eigenvector. Returns the zero vector at degenerate points.
    pub fn integrate(
        &self,
        field: &TensorField,
        point: Coord,
        major: bool,
        dstep: f64,
    ) -> Coord {
        match self {
            FieldIntegrator::Euler => {
                let direction = sample_eigenvector(field, point, major);
                direction * dstep
            }
            FieldIntegrator::Rk4 => {
                let k1 = sample_eigenvector(field, point, major);
                if k1 == geom::ZERO {
                    return geom::ZERO;
                }
                let half = Coord {
                    x: dstep / 2.0,
                    y: dstep / 2.0,
                };
                let full = Coord { x: dstep, y: dstep };
                let k23 = sample_eigenvector(field, point + half, major);
                let k4 = sample_eigenvector(field, point + full, major);
                (k1 + k23 * 4.0 + k4) * (dstep / 6.0)
            }
        }
    }
}

fn sample_eigenvector(field: &TensorField, point: Coord, major: bool) -> Coord {
    let tensor = field.sample(point);
    let eigenvector = if major {
        tensor.major()
    } else {
        tensor.minor()
    };
    if eigenvector.magnitude_sq() < DEGENERATE_EIGENVECTOR_SQ {
        return geom::ZERO;
    }
    eigenvector
}
