use std::path::Path;

use eyre::{ensure, WrapErr};
use serde::{Deserialize, Serialize};

use crate::field::NoiseParams;
use crate::streamline::StreamlineParams;

/// Map generation configuration, loaded from JSON. Every field has a
/// default so partial configs stay valid.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MapConfig {
    pub seed: u64,
    /// Side length of the square world.
    pub size: f64,
    /// Smooth tensor-field accumulation mode.
    pub smooth: bool,
    pub random_radial_fields: usize,
    /// Target fraction of the land area covered by parks.
    pub park_area_percentage: f64,
    pub min_distance_between_parks: f64,
    /// Road tiers in descending priority; `road` tiers trace the network,
    /// the `path` tier traces inside parks.
    pub road_parameters: Vec<RoadTierConfig>,
    /// Voronoi cell count for the island coastline.
    pub coast_cells: usize,
    pub boundary: BoundaryKind,
    pub noise: NoiseConfig,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            size: 1000.0,
            smooth: false,
            random_radial_fields: 2,
            park_area_percentage: 0.1,
            min_distance_between_parks: 100.0,
            road_parameters: vec![
                RoadTierConfig::main(),
                RoadTierConfig::major(),
                RoadTierConfig::minor(),
                RoadTierConfig::path(),
            ],
            coast_cells: 30,
            boundary: BoundaryKind::Disk,
            noise: NoiseConfig::default(),
        }
    }
}

impl MapConfig {
    pub fn from_path(path: &Path) -> eyre::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read config {}", path.display()))?;
        let config: MapConfig = serde_json::from_str(&contents)
            .wrap_err_with(|| format!("Failed to parse config {}", path.display()))?;
        config.validate()
    }

    /// Normalize and sanity-check the configuration. `dtest` is clamped to
    /// `dsep`; a `dstep` at or above `dsep` would let a single integration
    /// step jump over the separation constraint, so it is rejected.
    pub fn validate(mut self) -> eyre::Result<Self> {
        ensure!(self.size > 0.0, "world size must be positive");
        ensure!(
            (0.0..=1.0).contains(&self.park_area_percentage),
            "parkAreaPercentage must be within [0, 1]"
        );
        ensure!(
            !self.road_parameters.is_empty(),
            "at least one road tier is required"
        );
        ensure!(self.coast_cells >= 4, "coastCells must be at least 4");
        for tier in &mut self.road_parameters {
            ensure!(
                tier.dstep < tier.dsep,
                "tier {:?}: dstep ({}) must be smaller than dsep ({})",
                tier.name,
                tier.dstep,
                tier.dsep
            );
            tier.dtest = tier.dtest.min(tier.dsep);
            for (label, probability) in [
                ("earlyCollisionProbability", tier.early_collision_probability),
                ("culDeSacProbability", tier.cul_de_sac_probability),
            ] {
                ensure!(
                    (0.0..=1.0).contains(&probability),
                    "tier {:?}: {label} must be within [0, 1]",
                    tier.name
                );
            }
            ensure!(
                tier.simplification_tolerance >= 0.0,
                "tier {:?}: simplificationTolerance must be nonnegative",
                tier.name
            );
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TierKind {
    Road,
    Path,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryKind {
    /// A disk around the world center.
    Disk,
    /// The convex hull of random points, for more angular islands.
    Hull,
}

/// Per-tier streamline tracing parameters. See [StreamlineParams] for the
/// meaning of the d* distances.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoadTierConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: TierKind,
    pub dsep: f64,
    pub dtest: f64,
    pub dstep: f64,
    pub d_circle_join: f64,
    #[serde(rename = "dlookahead")]
    pub d_lookahead: f64,
    pub road_join_angle: f64,
    pub path_integration_limit: usize,
    pub max_seed_tries: usize,
    pub early_collision_probability: f64,
    pub simplification_tolerance: f64,
    pub cul_de_sac_probability: f64,
    pub cul_de_sac_radius_min: f64,
    pub cul_de_sac_radius_max: f64,
    pub max_streamlines: usize,
}

impl Default for RoadTierConfig {
    fn default() -> Self {
        RoadTierConfig::minor()
    }
}

impl RoadTierConfig {
    pub fn main() -> Self {
        Self {
            name: "Main".into(),
            kind: TierKind::Road,
            dsep: 400.0,
            dtest: 200.0,
            dstep: 1.0,
            d_circle_join: 5.0,
            d_lookahead: 500.0,
            road_join_angle: 0.1,
            path_integration_limit: 2688,
            max_seed_tries: 300,
            early_collision_probability: 0.0,
            simplification_tolerance: 0.5,
            cul_de_sac_probability: 0.0,
            cul_de_sac_radius_min: 4.0,
            cul_de_sac_radius_max: 9.0,
            max_streamlines: 100,
        }
    }

    pub fn major() -> Self {
        Self {
            name: "Major".into(),
            dsep: 100.0,
            dtest: 30.0,
            d_lookahead: 200.0,
            ..Self::main()
        }
    }

    pub fn minor() -> Self {
        Self {
            name: "Minor".into(),
            dsep: 20.0,
            dtest: 10.0,
            d_lookahead: 40.0,
            early_collision_probability: 0.7,
            cul_de_sac_probability: 0.3,
            ..Self::main()
        }
    }

    pub fn path() -> Self {
        Self {
            name: "Path".into(),
            kind: TierKind::Path,
            dsep: 20.0,
            dtest: 10.0,
            d_lookahead: 40.0,
            ..Self::main()
        }
    }

    pub fn streamline_params(&self) -> StreamlineParams {
        StreamlineParams {
            dsep: self.dsep,
            dtest: self.dtest,
            dstep: self.dstep,
            dcirclejoin: self.d_circle_join,
            dlookahead: self.d_lookahead,
            road_join_angle: self.road_join_angle,
            path_integration_limit: self.path_integration_limit,
            max_seed_tries: self.max_seed_tries,
            early_collision_probability: self.early_collision_probability,
            simplification_tolerance: self.simplification_tolerance,
            culdesac_probability: self.cul_de_sac_probability,
            culdesac_radius_min: self.cul_de_sac_radius_min,
            culdesac_radius_max: self.cul_de_sac_radius_max,
        }
        .clamped()
    }
}

/// Rotational-noise settings, mirrored into [NoiseParams].
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NoiseConfig {
    pub global_noise: bool,
    pub noise_size_park: f64,
    pub noise_angle_park: f64,
    pub noise_size_global: f64,
    pub noise_angle_global: f64,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        let defaults = NoiseParams::default();
        Self {
            global_noise: defaults.global_noise,
            noise_size_park: defaults.noise_size_park,
            noise_angle_park: defaults.noise_angle_park,
            noise_size_global: defaults.noise_size_global,
            noise_angle_global: defaults.noise_angle_global,
        }
    }
}

impl From<&NoiseConfig> for NoiseParams {
    fn from(config: &NoiseConfig) -> Self {
        Self {
            global_noise: config.global_noise,
            noise_size_park: config.noise_size_park,
            noise_angle_park: config.noise_angle_park,
            noise_size_global: config.noise_size_global,
            noise_angle_global: config.noise_angle_global,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let json = r#"{
            "seed": 42,
            "size": 2000.0,
            "smooth": true,
            "randomRadialFields": 0,
            "roadParameters": [{
                "name": "Main",
                "type": "road",
                "dsep": 400, "dtest": 200, "dstep": 1,
                "dCircleJoin": 5, "dlookahead": 500,
                "roadJoinAngle": 0.1,
                "pathIntegrationLimit": 2688,
                "maxSeedTries": 300,
                "earlyCollisionProbability": 0,
                "simplificationTolerance": 0.5,
                "culDeSacProbability": 0
            }]
        }"#;
        let config: MapConfig = serde_json::from_str(json).unwrap();
        let config = config.validate().unwrap();
        assert_eq!(config.seed, 42);
        assert_eq!(config.size, 2000.0);
        assert!(config.smooth);
        assert_eq!(config.road_parameters.len(), 1);
        let tier = &config.road_parameters[0];
        assert_eq!(tier.name, "Main");
        assert_eq!(tier.kind, TierKind::Road);
        assert_eq!(tier.dsep, 400.0);
        assert_eq!(tier.d_circle_join, 5.0);
        assert_eq!(tier.d_lookahead, 500.0);
        // Defaults fill the unspecified fields
        assert_eq!(tier.cul_de_sac_radius_min, 4.0);
        assert_eq!(config.coast_cells, 30);
    }

    #[test]
    fn test_dtest_is_clamped_to_dsep() {
        let mut config = MapConfig::default();
        config.road_parameters[0].dtest = 10_000.0;
        let config = config.validate().unwrap();
        assert_eq!(
            config.road_parameters[0].dtest,
            config.road_parameters[0].dsep
        );
    }

    #[test]
    fn test_dstep_at_or_above_dsep_is_rejected() {
        let mut config = MapConfig::default();
        config.road_parameters[0].dstep = config.road_parameters[0].dsep;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_out_of_range_probability_is_rejected() {
        let mut config = MapConfig::default();
        config.road_parameters[0].cul_de_sac_probability = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_config_round_trips_through_json() {
        let config = MapConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: MapConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.seed, parsed.seed);
        assert_eq!(config.road_parameters.len(), parsed.road_parameters.len());
    }
}
