use std::f64::consts::FRAC_PI_2;

use eyre::{bail, WrapErr};
use geo::{Area, Coord, LineString, Polygon};
use rand::Rng;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::{BoundaryKind, MapConfig, TierKind};
use crate::field::TensorField;
use crate::geom::{
    self, convex_hull, random_point_in_polygon, scale_about_centroid, vertex_centroid, CoordExt,
};
use crate::graph::RoadGraph;
use crate::integrate::FieldIntegrator;
use crate::island::{self, BoundaryShape};
use crate::streamline::StreamlineGenerator;
use crate::voronoi::{generate_points, Voronoi};

/// The island's Voronoi construction is numerically fragile; failed
/// attempts advance the seed by one and retry, up to this bound.
const MAX_ISLAND_ATTEMPTS: u64 = 10;

/// Node cap for block faces during park selection.
const MAX_BLOCK_LOOP: usize = 20;

/// Parks are inset slightly from their block face so the surrounding roads
/// stay visible.
const PARK_INSET: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoadType {
    Main,
    Major,
    Minor,
    Path,
}

impl RoadType {
    fn from_tier(name: &str, kind: TierKind) -> Self {
        if kind == TierKind::Path {
            return RoadType::Path;
        }
        match name.to_ascii_lowercase().as_str() {
            "main" => RoadType::Main,
            "major" => RoadType::Major,
            "minor" => RoadType::Minor,
            other => {
                tracing::warn!("Unknown road tier name {other:?}, treating as minor");
                RoadType::Minor
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Road {
    pub kind: RoadType,
    pub line: LineString,
}

/// The generated city: roads in paint order, park polygons, the planar
/// road graph, and the island coastline.
pub struct Map {
    pub roads: Vec<Road>,
    pub parks: Vec<Polygon>,
    pub graph: RoadGraph,
    pub city_shape: Polygon,
}

impl Map {
    /// Run the whole pipeline: island, tensor field, road tiers in
    /// descending priority, planar graph, parks, park paths, dangling-end
    /// joining.
    pub fn generate(config: &MapConfig) -> eyre::Result<Map> {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let world_dimensions = Coord {
            x: config.size,
            y: config.size,
        };

        let city_shape = generate_island(config).wrap_err("island generation failed")?;
        tracing::info!(
            "Coastline with {} vertices, {:.0} land area",
            city_shape.exterior().0.len(),
            city_shape.unsigned_area()
        );

        let mut field = build_field(config, &city_shape, &mut rng);

        // Road tiers in descending priority; every tier ingests the samples
        // of the one before it (which are already cumulative).
        let mut generators: Vec<(RoadType, StreamlineGenerator)> = Vec::new();
        for tier in config
            .road_parameters
            .iter()
            .filter(|tier| tier.kind == TierKind::Road)
        {
            let mut generator = StreamlineGenerator::new(
                FieldIntegrator::Rk4,
                geom::ZERO,
                world_dimensions,
                tier.streamline_params(),
            );
            if let Some((_, previous)) = generators.last() {
                let (major, minor) = previous.grids();
                generator.ingest_samples(major, minor);
            }
            generator.create_all_streamlines(&field, &mut rng, tier.max_streamlines);
            tracing::info!(
                "Tier {:?}: {} streamlines",
                tier.name,
                generator.simplified_streamlines().len()
            );
            generators.push((RoadType::from_tier(&tier.name, tier.kind), generator));
        }

        // Planar graph over the simplified streamlines of all road tiers.
        let mut all_simplified: Vec<LineString> = generators
            .iter()
            .flat_map(|(_, generator)| generator.simplified_streamlines().iter().cloned())
            .collect();
        let mut graph = RoadGraph::new();
        graph.add_streamlines(&all_simplified);
        graph.modify_streamlines(&mut all_simplified);
        graph.find_closed_loops(MAX_BLOCK_LOOP);
        tracing::info!(
            "Graph: {} nodes, {} blocks",
            graph.graph.node_count(),
            graph.closed_loops().len()
        );

        let parks = select_parks(config, &graph, &city_shape);
        for park in &parks {
            field.add_park(park.clone());
        }

        // Park paths: one bounded generator per park, seeded against the
        // accumulated road samples.
        let mut path_generators: Vec<StreamlineGenerator> = Vec::new();
        if let Some(tier) = config
            .road_parameters
            .iter()
            .find(|tier| tier.kind == TierKind::Path)
        {
            for park in &parks {
                let mut generator = StreamlineGenerator::new(
                    FieldIntegrator::Rk4,
                    geom::ZERO,
                    world_dimensions,
                    tier.streamline_params(),
                )
                .with_bound(park.clone());
                if let Some((_, previous)) = generators.last() {
                    let (major, minor) = previous.grids();
                    generator.ingest_samples(major, minor);
                }
                generator.create_all_streamlines(&field, &mut rng, tier.max_streamlines);
                path_generators.push(generator);
            }
        }

        for (_, generator) in &mut generators {
            generator.join_dangling_streamlines(&field, &mut rng);
        }
        for generator in &mut path_generators {
            generator.join_dangling_streamlines(&field, &mut rng);
        }

        // Roads in generation order, which is also the renderer's paint
        // order: Main, Major, Minor, then Path.
        let mut roads = Vec::new();
        for (kind, generator) in &generators {
            for line in generator.simplified_streamlines() {
                roads.push(Road {
                    kind: *kind,
                    line: line.clone(),
                });
            }
        }
        for generator in &path_generators {
            for line in generator.simplified_streamlines() {
                roads.push(Road {
                    kind: RoadType::Path,
                    line: line.clone(),
                });
            }
        }
        tracing::info!("Generated {} roads, {} parks", roads.len(), parks.len());

        Ok(Map {
            roads,
            parks,
            graph,
            city_shape,
        })
    }
}

/// Compose the tensor field: a grid basis field pinned to each world
/// corner, plus the configured number of radial fields at random points of
/// the island.
fn build_field(config: &MapConfig, city_shape: &Polygon, rng: &mut StdRng) -> TensorField {
    let mut field = TensorField::new((&config.noise).into(), config.smooth, config.seed as u32);
    field.set_land(city_shape.clone());

    let size = config.size;
    let corners = [
        geom::ZERO,
        Coord { x: size, y: 0.0 },
        Coord { x: size, y: size },
        Coord { x: 0.0, y: size },
    ];
    for corner in corners {
        let theta = rng.random_range(0.0..FRAC_PI_2);
        let decay = rng.random_range(0.5..1.5);
        field.add_grid(corner, size, decay, theta);
    }
    for _ in 0..config.random_radial_fields {
        let center = random_point_in_polygon(city_shape, rng, 64);
        let radius = rng.random_range(size * 0.05..size * 0.25);
        let decay = rng.random_range(1.0..3.0);
        field.add_radial(center, radius, decay);
    }
    field
}

/// Build the island coastline, retrying with advanced seeds when the
/// Voronoi construction detects an inconsistency.
fn generate_island(config: &MapConfig) -> eyre::Result<Polygon> {
    for attempt in 0..MAX_ISLAND_ATTEMPTS {
        match try_island(config, config.seed.wrapping_add(attempt)) {
            Ok(coastline) => return Ok(coastline),
            Err(error) => {
                tracing::warn!("Island attempt {attempt} failed: {error}");
            }
        }
    }
    bail!("island generation failed after {MAX_ISLAND_ATTEMPTS} attempts");
}

fn try_island(config: &MapConfig, seed: u64) -> eyre::Result<Polygon> {
    let mut rng = StdRng::seed_from_u64(seed);
    let size = config.size;
    let min_site_distance = size / (config.coast_cells as f64).sqrt() / 2.0;
    let sites = generate_points(
        geom::ZERO,
        Coord { x: size, y: size },
        config.coast_cells,
        min_site_distance,
        &mut rng,
    );
    // One Lloyd step makes the coast cells evenly sized.
    let voronoi = Voronoi::new(sites)?.refine()?;
    let shape = boundary_shape(config, &mut rng);
    island::coastline(&voronoi, &shape, &mut rng)
}

fn boundary_shape(config: &MapConfig, rng: &mut StdRng) -> BoundaryShape {
    let size = config.size;
    let center = Coord {
        x: size / 2.0,
        y: size / 2.0,
    };
    match config.boundary {
        BoundaryKind::Disk => BoundaryShape::Radial {
            center,
            radius: size * 0.4,
        },
        BoundaryKind::Hull => {
            let points: Vec<Coord> = (0..12)
                .map(|_| {
                    let angle = rng.random_range(0.0..std::f64::consts::TAU);
                    let radius = rng.random_range(size * 0.2..size * 0.45);
                    Coord {
                        x: center.x + radius * angle.cos(),
                        y: center.y + radius * angle.sin(),
                    }
                })
                .collect();
            BoundaryShape::Polygon(convex_hull(&points))
        }
    }
}

/// Pick block faces as parks until the target share of the land area is
/// covered, keeping park centroids apart.
fn select_parks(config: &MapConfig, graph: &RoadGraph, city_shape: &Polygon) -> Vec<Polygon> {
    let target_area = config.park_area_percentage * city_shape.unsigned_area();
    let mut parks: Vec<Polygon> = Vec::new();
    let mut covered = 0.0;

    for loop_nodes in graph.closed_loops() {
        if covered >= target_area {
            break;
        }
        let face = graph.loop_polygon(loop_nodes);
        if face.exterior().0.len() < 4 {
            continue;
        }
        let face_area = face.unsigned_area();
        // A face covering a quarter of the island is the network's outer
        // ring, not a block.
        if face_area == 0.0 || face_area > 0.25 * city_shape.unsigned_area() {
            continue;
        }
        let centroid = vertex_centroid(&face);
        let spaced = parks.iter().all(|park| {
            vertex_centroid(park).distance_to(centroid) >= config.min_distance_between_parks
        });
        if !spaced {
            continue;
        }
        covered += face_area;
        parks.push(scale_about_centroid(&face, PARK_INSET));
    }

    if covered < target_area {
        tracing::debug!(
            "Park area target not reached: {covered:.0} of {target_area:.0}"
        );
    }
    parks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RoadTierConfig;

    /// A small, fast configuration for end-to-end tests.
    fn test_config(seed: u64) -> MapConfig {
        MapConfig {
            seed,
            size: 500.0,
            smooth: false,
            random_radial_fields: 1,
            park_area_percentage: 0.2,
            min_distance_between_parks: 50.0,
            coast_cells: 16,
            road_parameters: vec![
                RoadTierConfig {
                    name: "Main".into(),
                    dsep: 100.0,
                    dtest: 50.0,
                    dstep: 2.0,
                    d_lookahead: 150.0,
                    path_integration_limit: 600,
                    max_streamlines: 10,
                    ..RoadTierConfig::main()
                },
                RoadTierConfig {
                    name: "Minor".into(),
                    dsep: 40.0,
                    dtest: 20.0,
                    dstep: 2.0,
                    d_lookahead: 60.0,
                    path_integration_limit: 600,
                    max_streamlines: 20,
                    ..RoadTierConfig::minor()
                },
            ],
            ..MapConfig::default()
        }
        .validate()
        .unwrap()
    }

    /// Generation involves a fragile Voronoi stage; scan a few seeds for
    /// one that produces a road network, the way a user would.
    fn generate_some_map() -> Map {
        for seed in [7, 11, 23, 42] {
            if let Ok(map) = Map::generate(&test_config(seed)) {
                if !map.roads.is_empty() {
                    return map;
                }
            }
        }
        panic!("no seed produced a map with roads");
    }

    #[test]
    fn test_generate_produces_in_bounds_roads() {
        let map = generate_some_map();

        let main_roads: Vec<_> = map
            .roads
            .iter()
            .filter(|road| road.kind == RoadType::Main)
            .collect();
        assert!(!main_roads.is_empty());
        assert!(main_roads.iter().any(|road| road.line.0.len() >= 6));

        for road in &map.roads {
            for point in &road.line.0 {
                assert!((0.0..=500.0).contains(&point.x), "{point:?}");
                assert!((0.0..=500.0).contains(&point.y), "{point:?}");
            }
        }
    }

    #[test]
    fn test_roads_are_grouped_in_tier_order() {
        let map = generate_some_map();
        let order: Vec<RoadType> = map.roads.iter().map(|road| road.kind).collect();
        let mut sorted = order.clone();
        sorted.sort_by_key(|kind| match kind {
            RoadType::Main => 0,
            RoadType::Major => 1,
            RoadType::Minor => 2,
            RoadType::Path => 3,
        });
        assert_eq!(order, sorted);
    }

    #[test]
    fn test_identical_seeds_generate_identical_maps() {
        let config = test_config(7);
        let first = Map::generate(&config);
        let second = Map::generate(&config);
        match (first, second) {
            (Ok(a), Ok(b)) => {
                assert_eq!(a.roads.len(), b.roads.len());
                for (left, right) in a.roads.iter().zip(b.roads.iter()) {
                    assert_eq!(left.kind, right.kind);
                    assert_eq!(left.line, right.line);
                }
                assert_eq!(a.parks.len(), b.parks.len());
            }
            (Err(a), Err(b)) => assert_eq!(a.to_string(), b.to_string()),
            _ => panic!("one run failed while the other succeeded"),
        }
    }

    #[test]
    fn test_parks_keep_their_distance() {
        let map = generate_some_map();
        for (i, park) in map.parks.iter().enumerate() {
            let centroid = vertex_centroid(park);
            for other in &map.parks[i + 1..] {
                assert!(vertex_centroid(other).distance_to(centroid) >= 50.0);
            }
        }
    }
}
