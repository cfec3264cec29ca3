use std::io::Write;
use std::path::PathBuf;

use citygen::config::MapConfig;
use citygen::io::output_writer;
use citygen::map::{Map, Road, RoadType};
use clap::Parser;
use geo::{Coord, Polygon};
use svg::node::element;
use svg::Document;

/// Generate a city road map from a JSON configuration and render it as SVG
///
/// Examples:
///     citygen city.json | display -density 200 -
///     citygen city.json --output city.svg
#[derive(Debug, Parser)]
#[clap(name = "citygen", verbatim_doc_comment)]
struct CmdlineOptions {
    /// The log level
    #[clap(short, long, default_value_t = tracing::Level::INFO)]
    log_level: tracing::Level,

    /// Path to the JSON map configuration
    config: PathBuf,

    /// Output file to write the SVG to. Defaults to stdout.
    #[clap(short, long)]
    output: Option<PathBuf>,

    /// Draw the road-graph nodes on top of the map
    #[clap(long)]
    draw_graph: bool,

    /// Override the configured seed
    #[clap(long)]
    seed: Option<u64>,
}

struct Palette {
    sea: &'static str,
    land: &'static str,
    park: &'static str,
    road: &'static str,
    main_road: &'static str,
    node: &'static str,
}

const PALETTE: Palette = Palette {
    sea: "#a8c8dc",
    land: "#f2efe9",
    park: "#c8e0b4",
    road: "#ffffff",
    main_road: "#fddc9a",
    node: "#d46a6a",
};

fn road_style(kind: RoadType) -> (f64, &'static str) {
    match kind {
        RoadType::Main => (5.0, PALETTE.main_road),
        RoadType::Major => (3.5, PALETTE.road),
        RoadType::Minor => (2.0, PALETTE.road),
        RoadType::Path => (1.0, PALETTE.road),
    }
}

fn polygon_element(polygon: &Polygon, fill: &str, stroke: &str, width: f64) -> element::Path {
    let mut data = element::path::Data::new();
    let ring = polygon.exterior();
    if let Some(first) = ring.0.first() {
        data = data.move_to((first.x, first.y));
        for coord in &ring.0[1..] {
            data = data.line_to((coord.x, coord.y));
        }
        data = data.close();
    }
    element::Path::new()
        .set("d", data)
        .set("fill", fill)
        .set("stroke", stroke)
        .set("stroke-width", width)
}

fn road_element(road: &Road) -> element::Polyline {
    let (width, color) = road_style(road.kind);
    let points: Vec<(f64, f64)> = road.line.0.iter().map(|c| (c.x, c.y)).collect();
    element::Polyline::new()
        .set("points", points)
        .set("fill", "none")
        .set("stroke", color)
        .set("stroke-width", width)
        .set("stroke-linecap", "round")
        .set("stroke-linejoin", "round")
}

fn render(map: &Map, size: f64, draw_graph: bool) -> Document {
    let mut document = Document::new()
        .set("viewBox", (0.0, 0.0, size, size))
        .set("width", 1024)
        .set("height", 1024);

    document = document.add(
        element::Rectangle::new()
            .set("x", 0.0)
            .set("y", 0.0)
            .set("width", size)
            .set("height", size)
            .set("fill", PALETTE.sea),
    );
    document = document.add(polygon_element(&map.city_shape, PALETTE.land, "#b0a890", 1.5));
    for park in &map.parks {
        document = document.add(polygon_element(park, PALETTE.park, "none", 0.0));
    }

    // Roads are listed front-to-back (Main first); paint back-to-front so
    // the widest tiers end up on top.
    for road in map.roads.iter().rev() {
        document = document.add(road_element(road));
    }

    if draw_graph {
        for node in map.graph.graph.node_indices() {
            let Coord { x, y } = map.graph.node_position(node);
            document = document.add(
                element::Circle::new()
                    .set("cx", x)
                    .set("cy", y)
                    .set("r", 2.0)
                    .set("fill", PALETTE.node),
            );
        }
    }

    document
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let args = CmdlineOptions::parse();

    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(args.log_level.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .init();

    let mut config = MapConfig::from_path(&args.config)?;
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    tracing::info!(
        "Generating a {}x{} city with seed {}",
        config.size,
        config.size,
        config.seed
    );

    let map = Map::generate(&config)?;
    let document = render(&map, config.size, args.draw_graph);

    let mut writer = output_writer(&args.output)?;
    write!(writer, "{document}")?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}
