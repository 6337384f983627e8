//! `pack` and `unpack` commands.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use mediabundle::{BundleConfig, Compression, ZipPackager};
use tracing::info;

use super::common::{builder, format_size, open};
use crate::error::CliError;

/// Write the bundle at `path` into a zip archive at `output`.
///
/// A partially written archive is removed when packing fails.
pub fn run_pack(path: &Path, output: &Path, compression: Compression) -> Result<(), CliError> {
    let bundle = open(path)?;
    if output.exists() {
        return Err(CliError::InvalidArgument(format!(
            "{} already exists",
            output.display()
        )));
    }

    let file = File::create(output).map_err(|source| CliError::Create {
        path: output.to_path_buf(),
        source,
    })?;
    let packager = ZipPackager::new().with_compression(compression);
    let report = match bundle.pack(&packager, file) {
        Ok(report) => report,
        Err(e) => {
            let _ = std::fs::remove_file(output);
            return Err(e.into());
        }
    };

    info!(archive = %output.display(), entries = report.entries.len(), "Bundle packed");
    println!(
        "Packed {} files ({}) into {}",
        report.entries.len(),
        format_size(report.total_size()),
        output.display()
    );
    Ok(())
}

/// Extract the archive into `work_dir` and load the bundle it holds.
pub fn run_unpack(archive: &Path, work_dir: &Path, config: &BundleConfig) -> Result<(), CliError> {
    let file = File::open(archive).map_err(|source| CliError::Open {
        path: archive.to_path_buf(),
        source,
    })?;
    let packager = ZipPackager::new().with_compression(config.compression);
    let config = BundleConfig {
        work_dir: work_dir.to_path_buf(),
        ..config.clone()
    };
    let bundle = builder(&config).load_from_package(&packager, BufReader::new(file))?;

    println!(
        "Unpacked bundle {} with {} elements",
        bundle.identifier().unwrap_or("-"),
        bundle.elements().len()
    );
    println!("  Root: {}", bundle.root().display());
    Ok(())
}
