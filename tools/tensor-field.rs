use std::io::Write;
use std::path::PathBuf;

use citygen::config::MapConfig;
use citygen::field::{NoiseParams, TensorField};
use citygen::io::output_writer;
use clap::Parser;
use geo::{Coord, Line};
use wkt::ToWkt;

/// Sample a map's tensor field on a uniform grid and dump the eigenvector
/// directions as WKT LINESTRINGs, for eyeballing a configuration before a
/// full generation
///
/// Examples:
///     tensor-field --config city.json | wkt2svg > field.svg
#[derive(Debug, Parser)]
#[clap(name = "tensor-field", verbatim_doc_comment)]
struct CmdlineOptions {
    /// The log level
    #[clap(short, long, default_value_t = tracing::Level::INFO)]
    log_level: tracing::Level,

    /// Path to the JSON map configuration. Without one, a single
    /// axis-aligned grid field is sampled.
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Output file to write result to. Defaults to stdout.
    #[clap(short, long)]
    output: Option<PathBuf>,

    /// Grid spacing between samples
    #[clap(short, long, default_value_t = 20.0)]
    spacing: f64,

    /// Sample the minor eigenvector instead of the major one
    #[clap(short, long)]
    minor: bool,
}

fn build_field(config: &Option<MapConfig>) -> TensorField {
    match config {
        Some(config) => {
            let mut field =
                TensorField::new((&config.noise).into(), config.smooth, config.seed as u32);
            let size = config.size;
            let corners = [
                Coord { x: 0.0, y: 0.0 },
                Coord { x: size, y: 0.0 },
                Coord { x: size, y: size },
                Coord { x: 0.0, y: size },
            ];
            for (i, corner) in corners.into_iter().enumerate() {
                field.add_grid(corner, size, 1.0, i as f64 * 0.3);
            }
            field
        }
        None => {
            let mut field = TensorField::new(NoiseParams::default(), false, 0);
            field.add_grid(Coord { x: 0.0, y: 0.0 }, f64::INFINITY, 0.0, 0.0);
            field
        }
    }
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

    let config = match &args.config {
        Some(path) => Some(MapConfig::from_path(path)?),
        None => None,
    };
    let size = config.as_ref().map_or(200.0, |config| config.size);
    let field = build_field(&config);

    let mut writer = output_writer(&args.output)?;
    let steps = (size / args.spacing) as usize;
    for j in 0..=steps {
        for i in 0..=steps {
            let point = Coord {
                x: i as f64 * args.spacing,
                y: j as f64 * args.spacing,
            };
            let tensor = field.sample(point);
            let eigenvector = if args.minor {
                tensor.minor()
            } else {
                tensor.major()
            };
            // Scale to the grid spacing so the plot reads well.
            let tip = Coord {
                x: point.x + eigenvector.x * args.spacing * 0.4,
                y: point.y + eigenvector.y * args.spacing * 0.4,
            };
            let line = Line::new(point, tip);
            writeln!(writer, "{}", line.to_wkt())?;
        }
    }
    writer.flush()?;
    Ok(())
}
