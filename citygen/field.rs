use geo::{Contains, Coord, Polygon};
use noise::{NoiseFn, Simplex};

use crate::geom::{self, CoordExt};

/// A 2×2 symmetric traceless tensor, encoded as a nonnegative magnitude `r`
/// and the matrix row `(cos 2θ, sin 2θ)`.
///
/// Streamlines follow its eigenvectors: [Tensor::major] is `(cos θ, sin θ)`
/// and [Tensor::minor] the perpendicular. The zero tensor (r = 0) has both
/// eigenvectors zero and θ defined as 0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tensor {
    r: f64,
    matrix: [f64; 2],
}

impl Tensor {
    pub const fn new(r: f64, matrix: [f64; 2]) -> Self {
        Self { r, matrix }
    }

    pub const fn zero() -> Self {
        Self::new(0.0, [0.0, 0.0])
    }

    pub fn from_angle(theta: f64) -> Self {
        Self::new(1.0, [(2.0 * theta).cos(), (2.0 * theta).sin()])
    }

    /// The tensor whose major eigenvector is perpendicular to `v`, used by
    /// radial basis fields: matrix row `(v.y² − v.x², −2·v.x·v.y)`,
    /// renormalized to keep the row a unit vector.
    pub fn from_vector(v: Coord) -> Self {
        let t1 = v.y * v.y - v.x * v.x;
        let t2 = -2.0 * v.x * v.y;
        let length = f64::hypot(t1, t2);
        if length == 0.0 {
            return Self::zero();
        }
        Self::new(1.0, [t1 / length, t2 / length])
    }

    pub fn is_zero(&self) -> bool {
        self.r == 0.0
    }

    pub fn theta(&self) -> f64 {
        if self.is_zero() {
            return 0.0;
        }
        0.5 * f64::atan2(self.matrix[1], self.matrix[0])
    }

    /// Weighted sum of two tensors. In smooth mode the magnitude is
    /// renormalized to the summed matrix row's length; in non-smooth mode it
    /// is pinned to 2 and the row left unnormalized (the eigen directions
    /// only depend on the row's angle, which scaling preserves).
    pub fn add(&self, other: &Tensor, smooth: bool) -> Tensor {
        let matrix = [
            self.matrix[0] * self.r + other.matrix[0] * other.r,
            self.matrix[1] * self.r + other.matrix[1] * other.r,
        ];
        if smooth {
            let r = f64::hypot(matrix[0], matrix[1]);
            if r == 0.0 {
                return Tensor::zero();
            }
            Tensor::new(r, [matrix[0] / r, matrix[1] / r])
        } else {
            Tensor::new(2.0, matrix)
        }
    }

    pub fn scale(&self, factor: f64) -> Tensor {
        Tensor::new(self.r * factor, self.matrix)
    }

    /// Rotate the tensor's angle by `delta`, keeping the magnitude.
    pub fn rotate(&mut self, delta: f64) {
        if self.is_zero() || delta == 0.0 {
            return;
        }
        let theta = self.theta() + delta;
        self.matrix = [(2.0 * theta).cos(), (2.0 * theta).sin()];
    }

    pub fn major(&self) -> Coord {
        if self.is_zero() {
            return geom::ZERO;
        }
        let theta = self.theta();
        Coord {
            x: theta.cos(),
            y: theta.sin(),
        }
    }

    pub fn minor(&self) -> Coord {
        if self.is_zero() {
            return geom::ZERO;
        }
        let theta = self.theta() + std::f64::consts::FRAC_PI_2;
        Coord {
            x: theta.cos(),
            y: theta.sin(),
        }
    }
}

/// The two basis-field flavours. Dispatch happens on the tag instead of
/// through trait objects; there are only ever these two.
#[derive(Debug, Clone, Copy)]
pub enum BasisKind {
    /// Constant direction field at angle θ₀.
    Grid { theta: f64 },
    /// Circulating field around the center.
    Radial,
}

/// A localized tensor contribution with a distance-decay profile.
#[derive(Debug, Clone)]
pub struct BasisField {
    pub center: Coord,
    pub size: f64,
    pub decay: f64,
    pub kind: BasisKind,
}

impl BasisField {
    fn tensor_at(&self, point: Coord) -> Tensor {
        match self.kind {
            BasisKind::Grid { theta } => Tensor::from_angle(theta),
            BasisKind::Radial => Tensor::from_vector(point - self.center),
        }
    }

    /// Scalar weight of this field at `point`.
    ///
    /// Smooth mode uses an unbounded inverse power `(d/S)^−D`; non-smooth
    /// mode a clamped polynomial falloff `max(0, 1 − d/S)^D` that reaches
    /// exactly zero at distance S. A non-smooth field with no decay (D = 0)
    /// still cuts off at S rather than degenerating to weight 1 everywhere.
    fn weight(&self, point: Coord, smooth: bool) -> f64 {
        let normalized_distance = point.distance_to(self.center) / self.size;
        if smooth {
            normalized_distance.powf(-self.decay)
        } else if self.decay == 0.0 && normalized_distance >= 1.0 {
            0.0
        } else {
            (1.0 - normalized_distance).max(0.0).powf(self.decay)
        }
    }

    fn weighted_tensor(&self, point: Coord, smooth: bool) -> Tensor {
        self.tensor_at(point).scale(self.weight(point, smooth))
    }
}

/// Rotational-noise settings for the composite field.
#[derive(Debug, Clone)]
pub struct NoiseParams {
    pub global_noise: bool,
    pub noise_size_park: f64,
    pub noise_angle_park: f64,
    pub noise_size_global: f64,
    pub noise_angle_global: f64,
}

impl Default for NoiseParams {
    fn default() -> Self {
        Self {
            global_noise: false,
            noise_size_park: 20.0,
            noise_angle_park: 1.5,
            noise_size_global: 30.0,
            noise_angle_global: 0.35,
        }
    }
}

/// Weighted superposition of basis fields with a water mask and optional
/// rotational noise inside parks (and, if enabled, globally).
pub struct TensorField {
    basis_fields: Vec<BasisField>,
    noise: Simplex,
    noise_params: NoiseParams,
    parks: Vec<Polygon>,
    land: Option<Polygon>,
    river: Option<Polygon>,
    pub smooth: bool,
}

impl TensorField {
    pub fn new(noise_params: NoiseParams, smooth: bool, seed: u32) -> Self {
        Self {
            basis_fields: Vec::new(),
            noise: Simplex::new(seed),
            noise_params,
            parks: Vec::new(),
            land: None,
            river: None,
            smooth,
        }
    }

    pub fn add_grid(&mut self, center: Coord, size: f64, decay: f64, theta: f64) {
        self.basis_fields.push(BasisField {
            center,
            size,
            decay,
            kind: BasisKind::Grid { theta },
        });
    }

    pub fn add_radial(&mut self, center: Coord, size: f64, decay: f64) {
        self.basis_fields.push(BasisField {
            center,
            size,
            decay,
            kind: BasisKind::Radial,
        });
    }

    pub fn set_land(&mut self, coastline: Polygon) {
        self.land = Some(coastline);
    }

    pub fn set_river(&mut self, river: Polygon) {
        self.river = Some(river);
    }

    pub fn add_park(&mut self, park: Polygon) {
        self.parks.push(park);
    }

    pub fn parks(&self) -> &[Polygon] {
        &self.parks
    }

    /// Whether `point` lies inside the land mask and outside the river.
    pub fn on_land(&self, point: Coord) -> bool {
        if let Some(river) = &self.river {
            if river.contains(&point) {
                return false;
            }
        }
        match &self.land {
            Some(coastline) => coastline.contains(&point),
            None => true,
        }
    }

    /// Sample the composite tensor at `point`.
    ///
    /// Water returns the zero tensor; an empty field defaults to an
    /// axis-aligned grid tensor so the generator still produces output.
    pub fn sample(&self, point: Coord) -> Tensor {
        if !self.on_land(point) {
            return Tensor::zero();
        }
        if self.basis_fields.is_empty() {
            return Tensor::new(1.0, [0.0, 0.0]);
        }

        let mut accumulated = Tensor::zero();
        for basis in &self.basis_fields {
            accumulated = accumulated.add(&basis.weighted_tensor(point, self.smooth), self.smooth);
        }

        if self.parks.iter().any(|park| park.contains(&point)) {
            let angle = self.rotational_noise(
                point,
                self.noise_params.noise_size_park,
                self.noise_params.noise_angle_park,
            );
            accumulated.rotate(angle);
        }
        if self.noise_params.global_noise {
            let angle = self.rotational_noise(
                point,
                self.noise_params.noise_size_global,
                self.noise_params.noise_angle_global,
            );
            accumulated.rotate(angle);
        }
        accumulated
    }

    fn rotational_noise(&self, point: Coord, size: f64, angle: f64) -> f64 {
        self.noise.get([point.x / size, point.y / size]) * angle
    }
}
