use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// A buffered writer for the tool output: the given file, or stdout when no
/// path (or `-`) is given.
pub fn output_writer(output: &Option<PathBuf>) -> eyre::Result<BufWriter<Box<dyn Write>>> {
    let sink: Box<dyn Write> = match output {
        Some(path) if path != Path::new("-") => {
            tracing::trace!("Writing to {}", path.display());
            Box::new(File::create(path)?)
        }
        _ => {
            tracing::trace!("Writing to stdout");
            Box::new(std::io::stdout())
        }
    };
    Ok(BufWriter::new(sink))
}
